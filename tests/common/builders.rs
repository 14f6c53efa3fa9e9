//! Test data builders for frames, objects and batches

use odeflow::{BatchMeta, BoundingBox, FrameMeta, ObjectMeta};
use std::time::Duration;

/// Builder for detected objects
pub struct ObjectBuilder {
    track_id: u64,
    class_id: u16,
    bbox: BoundingBox,
    confidence: f32,
}

impl ObjectBuilder {
    pub fn new(class_id: u16) -> Self {
        Self {
            track_id: 0,
            class_id,
            bbox: BoundingBox::new(100.0, 100.0, 50.0, 120.0),
            confidence: 0.9,
        }
    }

    pub fn track(mut self, track_id: u64) -> Self {
        self.track_id = track_id;
        self
    }

    pub fn bbox(mut self, left: f32, top: f32, width: f32, height: f32) -> Self {
        self.bbox = BoundingBox::new(left, top, width, height);
        self
    }

    pub fn build(self) -> ObjectMeta {
        ObjectMeta::new(self.track_id, self.class_id, self.bbox, self.confidence)
    }
}

/// Builder for one frame of metadata
pub struct FrameBuilder {
    source_id: u32,
    frame_number: u64,
    objects: Vec<ObjectMeta>,
}

impl FrameBuilder {
    pub fn new(frame_number: u64) -> Self {
        Self {
            source_id: 0,
            frame_number,
            objects: Vec::new(),
        }
    }

    pub fn source(mut self, source_id: u32) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn object(mut self, object: ObjectBuilder) -> Self {
        self.objects.push(object.build());
        self
    }

    pub fn build(self) -> FrameMeta {
        let timestamp = Duration::from_millis(self.frame_number * 33);
        self.objects.into_iter().fold(
            FrameMeta::new(self.source_id, self.frame_number, timestamp),
            FrameMeta::with_object,
        )
    }

    pub fn batch(self) -> BatchMeta {
        BatchMeta::single(self.build())
    }
}

/// One single-frame batch per frame number, each holding one object of
/// `class_id` with a distinct track id.
pub fn single_object_batches(class_id: u16, frames: u64) -> Vec<BatchMeta> {
    (0..frames)
        .map(|n| {
            FrameBuilder::new(n)
                .object(ObjectBuilder::new(class_id).track(n + 1))
                .batch()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::new(7)
            .source(1)
            .object(ObjectBuilder::new(2).track(11))
            .object(ObjectBuilder::new(0))
            .build();

        assert_eq!(frame.frame_number, 7);
        assert_eq!(frame.source_id, 1);
        assert_eq!(frame.objects.len(), 2);
        assert_eq!(frame.objects[0].track_id, 11);
        assert!(!frame.objects[1].is_tracked());
    }
}

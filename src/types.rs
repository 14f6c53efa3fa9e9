//! Per-buffer metadata types exchanged with the media engine.
//!
//! # Main Types
//!
//! - [`BatchMeta`] - One buffer: an ordered batch of frames, one per source
//! - [`FrameMeta`] - Frame-level fields plus its ordered detected objects
//! - [`ObjectMeta`] - One detected object `{track_id, class_id, bbox, confidence}`
//! - [`MessageRecord`] - Outgoing message accumulated on a frame for the message sink
//!
//! The engine produces these; the core only reads them, except for the
//! overlay attributes and message accumulator which actions mutate in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Track id carried by objects that no tracker has identified.
pub const UNTRACKED_OBJECT_ID: u64 = u64::MAX;

/// RGBA color with every channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RgbaColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl RgbaColor {
    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// True when every channel lies in `0.0..=1.0`.
    pub fn is_valid(&self) -> bool {
        [self.red, self.green, self.blue, self.alpha]
            .iter()
            .all(|c| (0.0..=1.0).contains(c))
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Visual overlay attributes the renderer draws for an object.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlayParams {
    pub border_width: u32,
    pub border_color: Option<RgbaColor>,
    pub bg_color: Option<RgbaColor>,
}

/// One detected object within a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub track_id: u64,
    pub class_id: u16,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub overlay: OverlayParams,
}

impl ObjectMeta {
    pub fn new(track_id: u64, class_id: u16, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            track_id,
            class_id,
            bbox,
            confidence,
            overlay: OverlayParams::default(),
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.track_id != UNTRACKED_OBJECT_ID
    }
}

/// One frame of one source.
#[derive(Debug, Clone, Default)]
pub struct FrameMeta {
    pub source_id: u32,
    /// Name of the source component, stamped by the pipeline before handlers run.
    pub source_name: Option<Arc<str>>,
    pub frame_number: u64,
    /// Presentation timestamp relative to stream start.
    pub timestamp: Duration,
    pub objects: Vec<ObjectMeta>,
    /// Message accumulator drained by downstream message sinks.
    pub messages: Vec<MessageRecord>,
}

impl FrameMeta {
    pub fn new(source_id: u32, frame_number: u64, timestamp: Duration) -> Self {
        Self {
            source_id,
            frame_number,
            timestamp,
            ..Self::default()
        }
    }

    pub fn with_object(mut self, object: ObjectMeta) -> Self {
        self.objects.push(object);
        self
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }
}

/// One buffer's worth of metadata.
#[derive(Debug, Clone, Default)]
pub struct BatchMeta {
    pub frames: Vec<FrameMeta>,
}

impl BatchMeta {
    pub fn new(frames: Vec<FrameMeta>) -> Self {
        Self { frames }
    }

    pub fn single(frame: FrameMeta) -> Self {
        Self {
            frames: vec![frame],
        }
    }

    /// Copy of every accumulated message, frames in order.
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.frames
            .iter()
            .flat_map(|frame| frame.messages.iter().cloned())
            .collect()
    }

    pub fn object_count(&self) -> usize {
        self.frames.iter().map(|f| f.objects.len()).sum()
    }
}

/// Object part of a [`MessageRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageObject {
    pub track_id: u64,
    pub class_id: u16,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl From<&ObjectMeta> for MessageObject {
    fn from(object: &ObjectMeta) -> Self {
        Self {
            track_id: object.track_id,
            class_id: object.class_id,
            confidence: object.confidence,
            bbox: object.bbox,
        }
    }
}

/// Structured event appended to a frame by the add-message-metadata action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub trigger: String,
    pub source_id: u32,
    pub source_name: Option<String>,
    pub frame_number: u64,
    pub timestamp_ms: u64,
    pub created_at: DateTime<Utc>,
    pub object: Option<MessageObject>,
}

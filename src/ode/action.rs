//! Actions: the side effects a trigger runs when it matches.
//!
//! The kind set is closed. Every action is a pure function of the
//! occurrence it is handed, the frame it may mutate, and its own static
//! configuration, so one action can be shared by any number of triggers.

use crate::display::DisplayResource;
use crate::types::{BoundingBox, FrameMeta, MessageObject, MessageRecord, UNTRACKED_OBJECT_ID};
use chrono::Utc;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;

/// Everything an action may know about one match.
#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceInfo {
    pub trigger: Arc<str>,
    pub source_id: u32,
    pub source_name: Option<Arc<str>>,
    pub frame_number: u64,
    pub timestamp: Duration,
    /// Running match count of the trigger since its last reset, starting at 1.
    pub occurrence: u64,
    /// Object fields, `None` for frame-level matches.
    pub class_id: Option<u16>,
    pub track_id: Option<u64>,
    pub bbox: Option<BoundingBox>,
    pub confidence: Option<f32>,
    /// Objects passing the trigger's class filter in this frame.
    pub object_count: usize,
}

/// Runtime failure of one action invocation. Logged by the caller, never fatal.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("display resource '{0}' no longer exists")]
    ResourceGone(String),

    #[error("display resource '{0}' is not a color")]
    NotAColor(String),

    #[error("diagnostic write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// User callback for the monitor action.
pub type MonitorFn = Arc<dyn Fn(&OccurrenceInfo) + Send + Sync>;

/// Shared diagnostic writer for the print action.
pub type DiagnosticWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Non-owning reference to a color display resource.
#[derive(Debug, Clone)]
pub struct ColorRef {
    name: String,
    resource: Weak<DisplayResource>,
}

impl ColorRef {
    pub fn new(resource: &Arc<DisplayResource>) -> Self {
        Self {
            name: resource.name().to_string(),
            resource: Arc::downgrade(resource),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self) -> Result<crate::types::RgbaColor, ActionError> {
        let resource = self
            .resource
            .upgrade()
            .ok_or_else(|| ActionError::ResourceGone(self.name.clone()))?;
        resource
            .as_color()
            .ok_or_else(|| ActionError::NotAColor(self.name.clone()))
    }
}

/// Bounding-box formatting applied by the annotate action.
#[derive(Debug, Clone)]
pub struct BBoxFormat {
    pub border_width: u32,
    pub border_color: Option<ColorRef>,
    pub bg_color: Option<ColorRef>,
}

pub enum ActionKind {
    /// Rewrite the matched object's overlay attributes.
    FormatBBox(BBoxFormat),
    /// Write one line per event to a diagnostic writer.
    Print {
        force_flush: bool,
        writer: DiagnosticWriter,
    },
    /// Append a message record to the frame's outgoing accumulator.
    AddMessageMeta { dedupe_by_object: bool },
    /// Hand the occurrence to user code.
    Monitor(MonitorFn),
    /// Emit the occurrence through `tracing`.
    Log,
}

impl fmt::Debug for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::FormatBBox(format) => f.debug_tuple("FormatBBox").field(format).finish(),
            ActionKind::Print { force_flush, .. } => f
                .debug_struct("Print")
                .field("force_flush", force_flush)
                .finish_non_exhaustive(),
            ActionKind::AddMessageMeta { dedupe_by_object } => f
                .debug_struct("AddMessageMeta")
                .field("dedupe_by_object", dedupe_by_object)
                .finish(),
            ActionKind::Monitor(_) => f.write_str("Monitor(..)"),
            ActionKind::Log => f.write_str("Log"),
        }
    }
}

impl ActionKind {
    /// Print to stdout.
    pub fn print(force_flush: bool) -> Self {
        Self::print_with_writer(force_flush, Box::new(std::io::stdout()))
    }

    pub fn print_with_writer(force_flush: bool, writer: Box<dyn Write + Send>) -> Self {
        ActionKind::Print {
            force_flush,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::FormatBBox(_) => "format-bbox",
            ActionKind::Print { .. } => "print",
            ActionKind::AddMessageMeta { .. } => "add-message-meta",
            ActionKind::Monitor(_) => "monitor",
            ActionKind::Log => "log",
        }
    }
}

/// A named action.
#[derive(Debug)]
pub struct Action {
    name: String,
    kind: ActionKind,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// Names of the display resources this action refers to.
    pub fn display_refs(&self) -> Vec<&str> {
        match &self.kind {
            ActionKind::FormatBBox(format) => format
                .border_color
                .iter()
                .chain(format.bg_color.iter())
                .map(ColorRef::name)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Run the action for one occurrence.
    ///
    /// `object` indexes into `frame.objects` and is `None` for frame-level matches.
    pub fn invoke(
        &self,
        info: &OccurrenceInfo,
        frame: &mut FrameMeta,
        object: Option<usize>,
    ) -> Result<(), ActionError> {
        match &self.kind {
            ActionKind::FormatBBox(format) => {
                let Some(target) = object.and_then(|i| frame.objects.get_mut(i)) else {
                    return Ok(());
                };
                // Resolve both colors before touching the overlay so a failure leaves it intact.
                let border = format.border_color.as_ref().map(ColorRef::resolve).transpose()?;
                let bg = format.bg_color.as_ref().map(ColorRef::resolve).transpose()?;
                target.overlay.border_width = format.border_width;
                target.overlay.border_color = border;
                target.overlay.bg_color = bg;
                Ok(())
            }
            ActionKind::Print {
                force_flush,
                writer,
            } => {
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                writeln!(writer, "{}", format_event(info))?;
                if *force_flush {
                    writer.flush()?;
                }
                Ok(())
            }
            ActionKind::AddMessageMeta { dedupe_by_object } => {
                let record = MessageRecord {
                    trigger: info.trigger.to_string(),
                    source_id: info.source_id,
                    source_name: info.source_name.as_deref().map(str::to_string),
                    frame_number: info.frame_number,
                    timestamp_ms: info.timestamp.as_millis() as u64,
                    created_at: Utc::now(),
                    object: object
                        .and_then(|i| frame.objects.get(i))
                        .map(MessageObject::from),
                };
                // Untracked objects have no identity to merge on.
                let existing = match (&record.object, *dedupe_by_object) {
                    (Some(obj), true) if obj.track_id != UNTRACKED_OBJECT_ID => {
                        frame.messages.iter().position(|m| {
                            m.object.as_ref().map(|o| o.track_id) == Some(obj.track_id)
                        })
                    }
                    _ => None,
                };
                match existing {
                    Some(i) => frame.messages[i] = record,
                    None => frame.messages.push(record),
                }
                Ok(())
            }
            ActionKind::Monitor(callback) => {
                callback(info);
                Ok(())
            }
            ActionKind::Log => {
                tracing::info!(
                    "ODE '{}' source={} frame={} class={:?} track={:?} occurrence={}",
                    info.trigger,
                    info.source_name.as_deref().unwrap_or("-"),
                    info.frame_number,
                    info.class_id,
                    info.track_id,
                    info.occurrence
                );
                Ok(())
            }
        }
    }
}

fn format_event(info: &OccurrenceInfo) -> String {
    let mut line = format!(
        "trigger={} source={}({}) frame={} ts={}ms",
        info.trigger,
        info.source_name.as_deref().unwrap_or("-"),
        info.source_id,
        info.frame_number,
        info.timestamp.as_millis()
    );
    match (info.class_id, info.bbox) {
        (Some(class_id), Some(b)) => line.push_str(&format!(
            " class={} track={} box=({:.1},{:.1},{:.1},{:.1}) conf={:.2}",
            class_id,
            info.track_id.unwrap_or_default(),
            b.left,
            b.top,
            b.width,
            b.height,
            info.confidence.unwrap_or_default()
        )),
        _ => line.push_str(&format!(" objects={}", info.object_count)),
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayKind;
    use crate::types::{ObjectMeta, RgbaColor};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn occurrence_for(frame: &FrameMeta, object: Option<usize>) -> OccurrenceInfo {
        let obj = object.map(|i| &frame.objects[i]);
        OccurrenceInfo {
            trigger: Arc::from("person-trigger"),
            source_id: frame.source_id,
            source_name: frame.source_name.clone(),
            frame_number: frame.frame_number,
            timestamp: frame.timestamp,
            occurrence: 1,
            class_id: obj.map(|o| o.class_id),
            track_id: obj.map(|o| o.track_id),
            bbox: obj.map(|o| o.bbox),
            confidence: obj.map(|o| o.confidence),
            object_count: frame.objects.len(),
        }
    }

    fn person_frame() -> FrameMeta {
        FrameMeta::new(0, 7, Duration::from_millis(280)).with_object(ObjectMeta::new(
            11,
            2,
            BoundingBox::new(10.0, 20.0, 30.0, 40.0),
            0.8,
        ))
    }

    #[test]
    fn test_print_writes_one_line() {
        let buf = SharedBuf::default();
        let action = Action::new("print", ActionKind::print_with_writer(true, Box::new(buf.clone())));
        let mut frame = person_frame();
        let info = occurrence_for(&frame, Some(0));

        action.invoke(&info, &mut frame, Some(0)).unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("trigger=person-trigger"));
        assert!(text.contains("class=2"));
        assert!(text.contains("frame=7"));
    }

    #[test]
    fn test_format_bbox_sets_overlay() {
        let red = Arc::new(
            DisplayResource::new("red", DisplayKind::Color(RgbaColor::new(1.0, 0.0, 0.0, 1.0)))
                .unwrap(),
        );
        let action = Action::new(
            "fmt",
            ActionKind::FormatBBox(BBoxFormat {
                border_width: 5,
                border_color: Some(ColorRef::new(&red)),
                bg_color: None,
            }),
        );
        let mut frame = person_frame();
        let info = occurrence_for(&frame, Some(0));

        action.invoke(&info, &mut frame, Some(0)).unwrap();
        assert_eq!(frame.objects[0].overlay.border_width, 5);
        assert_eq!(frame.objects[0].overlay.border_color, red.as_color());
        assert_eq!(action.display_refs(), vec!["red"]);
    }

    #[test]
    fn test_format_bbox_fails_when_resource_gone() {
        let red = Arc::new(
            DisplayResource::new("red", DisplayKind::Color(RgbaColor::new(1.0, 0.0, 0.0, 1.0)))
                .unwrap(),
        );
        let action = Action::new(
            "fmt",
            ActionKind::FormatBBox(BBoxFormat {
                border_width: 5,
                border_color: Some(ColorRef::new(&red)),
                bg_color: None,
            }),
        );
        drop(red);
        let mut frame = person_frame();
        let info = occurrence_for(&frame, Some(0));

        let err = action.invoke(&info, &mut frame, Some(0)).unwrap_err();
        assert!(matches!(err, ActionError::ResourceGone(name) if name == "red"));
        assert_eq!(frame.objects[0].overlay.border_width, 0);
    }

    #[test]
    fn test_format_bbox_without_object_is_noop() {
        let action = Action::new(
            "fmt",
            ActionKind::FormatBBox(BBoxFormat {
                border_width: 1,
                border_color: None,
                bg_color: None,
            }),
        );
        let mut frame = FrameMeta::new(0, 1, Duration::ZERO);
        let info = occurrence_for(&frame, None);
        assert!(action.invoke(&info, &mut frame, None).is_ok());
    }

    #[test]
    fn test_message_meta_appends_without_dedupe() {
        let action = Action::new("msg", ActionKind::AddMessageMeta { dedupe_by_object: false });
        let mut frame = person_frame();
        let info = occurrence_for(&frame, Some(0));

        action.invoke(&info, &mut frame, Some(0)).unwrap();
        action.invoke(&info, &mut frame, Some(0)).unwrap();
        assert_eq!(frame.messages.len(), 2);
        assert_eq!(frame.messages[0].object.as_ref().unwrap().track_id, 11);
    }

    #[test]
    fn test_message_meta_dedupes_by_object() {
        let action = Action::new("msg", ActionKind::AddMessageMeta { dedupe_by_object: true });
        let mut frame = person_frame();
        let info = occurrence_for(&frame, Some(0));

        action.invoke(&info, &mut frame, Some(0)).unwrap();
        action.invoke(&info, &mut frame, Some(0)).unwrap();
        assert_eq!(frame.messages.len(), 1);
    }

    #[test]
    fn test_message_meta_keeps_untracked_objects_apart() {
        let action = Action::new("msg", ActionKind::AddMessageMeta { dedupe_by_object: true });
        let mut frame = FrameMeta::new(0, 3, Duration::from_millis(120))
            .with_object(ObjectMeta::new(
                UNTRACKED_OBJECT_ID,
                2,
                BoundingBox::new(10.0, 20.0, 30.0, 40.0),
                0.8,
            ))
            .with_object(ObjectMeta::new(
                UNTRACKED_OBJECT_ID,
                2,
                BoundingBox::new(300.0, 20.0, 30.0, 40.0),
                0.7,
            ));

        for index in 0..2 {
            let info = occurrence_for(&frame, Some(index));
            action.invoke(&info, &mut frame, Some(index)).unwrap();
        }
        assert_eq!(frame.messages.len(), 2);
        let xs: Vec<f32> = frame
            .messages
            .iter()
            .map(|m| m.object.as_ref().unwrap().bbox.left)
            .collect();
        assert_eq!(xs, vec![10.0, 300.0]);
    }

    #[test]
    fn test_monitor_receives_occurrence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let action = Action::new(
            "monitor",
            ActionKind::Monitor(Arc::new(move |info: &OccurrenceInfo| {
                sink.lock().unwrap().push(info.track_id);
            })),
        );
        let mut frame = person_frame();
        let info = occurrence_for(&frame, Some(0));

        action.invoke(&info, &mut frame, Some(0)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(11)]);
    }
}

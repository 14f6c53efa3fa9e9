//! Components: the named nodes of a pipeline graph.
//!
//! A component's configuration is opaque to the rule engine; the only
//! thing validated here is that it is usable (non-empty paths, non-zero
//! dimensions). Every component has a sink pad and a src pad, each hosting
//! an ordered list of probe handlers.

use crate::error::{OdeError, Result};
use crate::ode::ProbeHandler;
use crate::sink::MessageSinkAdapter;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

/// Attachment point on a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pad {
    /// Input side: handlers see the buffer before the component processes it.
    Sink,
    /// Output side: handlers see the buffer after the component processes it.
    Src,
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pad::Sink => f.write_str("sink"),
            Pad::Src => f.write_str("src"),
        }
    }
}

/// Linking stage. Components are linked in ascending stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Source,
    Preprocessor,
    PrimaryInference,
    SecondaryInference,
    Tracker,
    Tiler,
    OnScreenDisplay,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    Iou,
    Ktl,
    Dcf,
}

/// Kind-specific configuration.
pub enum ComponentKind {
    UriSource {
        uri: String,
        is_live: bool,
        intra_decode: bool,
        drop_frame_interval: u32,
    },
    FileSource {
        path: PathBuf,
        repeat_enabled: bool,
    },
    Preprocessor {
        config_file: PathBuf,
    },
    PrimaryInference {
        config_file: PathBuf,
        model_engine_file: Option<PathBuf>,
        interval: u32,
    },
    SecondaryInference {
        config_file: PathBuf,
        model_engine_file: Option<PathBuf>,
        infer_on: String,
        interval: u32,
    },
    Tracker {
        kind: TrackerKind,
        config_file: Option<PathBuf>,
        width: u32,
        height: u32,
    },
    Tiler {
        width: u32,
        height: u32,
    },
    OnScreenDisplay {
        text_enabled: bool,
        clock_enabled: bool,
        bbox_enabled: bool,
        mask_enabled: bool,
    },
    WindowSink {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    FakeSink,
    MessageSink(MessageSinkAdapter),
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::MessageSink(adapter) => {
                f.debug_tuple("MessageSink").field(adapter).finish()
            }
            other => f.write_str(other.type_name()),
        }
    }
}

impl ComponentKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ComponentKind::UriSource { .. } => "uri-source",
            ComponentKind::FileSource { .. } => "file-source",
            ComponentKind::Preprocessor { .. } => "preprocessor",
            ComponentKind::PrimaryInference { .. } => "primary-gie",
            ComponentKind::SecondaryInference { .. } => "secondary-gie",
            ComponentKind::Tracker { .. } => "tracker",
            ComponentKind::Tiler { .. } => "tiler",
            ComponentKind::OnScreenDisplay { .. } => "osd",
            ComponentKind::WindowSink { .. } => "window-sink",
            ComponentKind::FakeSink => "fake-sink",
            ComponentKind::MessageSink(_) => "message-sink",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ComponentKind::UriSource { .. } | ComponentKind::FileSource { .. } => Stage::Source,
            ComponentKind::Preprocessor { .. } => Stage::Preprocessor,
            ComponentKind::PrimaryInference { .. } => Stage::PrimaryInference,
            ComponentKind::SecondaryInference { .. } => Stage::SecondaryInference,
            ComponentKind::Tracker { .. } => Stage::Tracker,
            ComponentKind::Tiler { .. } => Stage::Tiler,
            ComponentKind::OnScreenDisplay { .. } => Stage::OnScreenDisplay,
            ComponentKind::WindowSink { .. }
            | ComponentKind::FakeSink
            | ComponentKind::MessageSink(_) => Stage::Sink,
        }
    }

    pub fn is_source(&self) -> bool {
        self.stage() == Stage::Source
    }

    fn validate(&self) -> Result<()> {
        fn require_path(what: &str, path: &std::path::Path) -> Result<()> {
            if path.as_os_str().is_empty() {
                return Err(OdeError::InvalidParameter(format!("{} must not be empty", what)));
            }
            Ok(())
        }
        fn require_dims(what: &str, width: u32, height: u32) -> Result<()> {
            if width == 0 || height == 0 {
                return Err(OdeError::InvalidParameter(format!(
                    "{} dimensions must be non-zero, got {}x{}",
                    what, width, height
                )));
            }
            Ok(())
        }

        match self {
            ComponentKind::UriSource { uri, .. } => {
                if uri.trim().is_empty() {
                    return Err(OdeError::InvalidParameter("source uri must not be empty".into()));
                }
                Ok(())
            }
            ComponentKind::FileSource { path, .. } => require_path("source file", path),
            ComponentKind::Preprocessor { config_file } => {
                require_path("preprocessor config", config_file)
            }
            ComponentKind::PrimaryInference { config_file, .. } => {
                require_path("inference config", config_file)
            }
            ComponentKind::SecondaryInference {
                config_file,
                infer_on,
                ..
            } => {
                require_path("inference config", config_file)?;
                if infer_on.trim().is_empty() {
                    return Err(OdeError::InvalidParameter(
                        "secondary inference needs a component to infer on".into(),
                    ));
                }
                Ok(())
            }
            ComponentKind::Tracker { width, height, .. } => require_dims("tracker", *width, *height),
            ComponentKind::Tiler { width, height } => require_dims("tiler", *width, *height),
            ComponentKind::WindowSink { width, height, .. } => {
                require_dims("window sink", *width, *height)
            }
            ComponentKind::OnScreenDisplay { .. }
            | ComponentKind::FakeSink
            | ComponentKind::MessageSink(_) => Ok(()),
        }
    }
}

/// A named graph node with two probe pads.
#[derive(Debug)]
pub struct Component {
    name: String,
    kind: ComponentKind,
    sink_pad: RwLock<Vec<Arc<ProbeHandler>>>,
    src_pad: RwLock<Vec<Arc<ProbeHandler>>>,
}

impl Component {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Result<Self> {
        let name = name.into();
        kind.validate()
            .map_err(|e| e.with_context(format!("component '{}'", name)))?;
        Ok(Self {
            name,
            kind,
            sink_pad: RwLock::new(Vec::new()),
            src_pad: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn stage(&self) -> Stage {
        self.kind.stage()
    }

    pub fn message_sink(&self) -> Option<&MessageSinkAdapter> {
        match &self.kind {
            ComponentKind::MessageSink(adapter) => Some(adapter),
            _ => None,
        }
    }

    fn pad(&self, pad: Pad) -> &RwLock<Vec<Arc<ProbeHandler>>> {
        match pad {
            Pad::Sink => &self.sink_pad,
            Pad::Src => &self.src_pad,
        }
    }

    pub(crate) fn attach(&self, pad: Pad, handler: Arc<ProbeHandler>) {
        self.pad(pad)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub(crate) fn detach(&self, pad: Pad, handler: &str) -> Option<Arc<ProbeHandler>> {
        let mut handlers = self.pad(pad).write().unwrap_or_else(PoisonError::into_inner);
        let index = handlers.iter().position(|h| h.name() == handler)?;
        Some(handlers.remove(index))
    }

    /// Handlers on `pad` in attachment order.
    pub fn handlers(&self, pad: Pad) -> Vec<Arc<ProbeHandler>> {
        self.pad(pad)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

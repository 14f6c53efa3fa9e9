//! # odeflow: Object Detection Event rules for streaming analytics pipelines
//!
//! odeflow wires media-processing components into pipelines and evaluates
//! ODE triggers and actions against the detection metadata of every frame
//! flowing through them.
//!
//! ## Architecture
//!
//! - **Registry**: one explicit object owning every named component, probe
//!   handler, trigger, action and display resource, plus the relations
//!   between them
//! - **ODE engine**: triggers with private match state, actions with
//!   side effects, probe handlers feeding buffers through trigger lists
//! - **Pipelines**: stage-ordered component graphs with a NULL/READY/PAUSED/
//!   PLAYING state machine, driven by a dedicated processing thread
//! - **Message sinks**: non-blocking hand-off of per-frame message records
//!   to a background publisher
//!
//! ## Configuration
//!
//! Runtime tunables live in `odeflow.toml` under the platform config
//! directory (see [`config::EngineConfig::default_path`]).
//!
//! ## Example
//!
//! ```no_run
//! use odeflow::pipeline::{ComponentKind, Pad, ScriptedEngine};
//! use odeflow::ode::{TriggerFilter, TriggerLimit};
//! use odeflow::Registry;
//!
//! fn main() -> odeflow::Result<()> {
//!     const PERSON: u16 = 2;
//!     let registry = Registry::new();
//!
//!     registry.action_print_new("print", false)?;
//!     registry.trigger_instance_new("person", TriggerFilter::class(PERSON), TriggerLimit::Count(2))?;
//!     registry.trigger_action_add("person", "print")?;
//!     registry.pph_ode_new("ode-handler")?;
//!     registry.pph_ode_trigger_add("ode-handler", "person")?;
//!
//!     registry.component_new(
//!         "camera",
//!         ComponentKind::FileSource { path: "sample_720p.mp4".into(), repeat_enabled: false },
//!     )?;
//!     registry.component_new("sink", ComponentKind::FakeSink)?;
//!     registry.component_pph_add("sink", "ode-handler", Pad::Sink)?;
//!
//!     registry.pipeline_new_with_engine("main", Box::new(ScriptedEngine::new(Vec::new())))?;
//!     registry.pipeline_component_add_many("main", &["camera", "sink"])?;
//!     registry.pipeline_play("main")?;
//!
//!     registry.delete_all()
//! }
//! ```

pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod ode;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{OdeError, Result, ResultCode, ResultExt};
pub use pipeline::{Pipeline, PipelineState};
pub use registry::{ObjectKind, ObjectSpec, Registry};
pub use types::{BatchMeta, BoundingBox, FrameMeta, MessageRecord, ObjectMeta, RgbaColor};

//! Pipelines: named component graphs with a four-state lifecycle.
//!
//! Components are placed by stage, linked source → processing chain → sinks,
//! and visited in topological order for every buffer the media engine
//! produces. The buffer loop runs on a dedicated thread per playing pipeline
//! and takes commands from the control handle over a crossbeam channel.
//!
//! ```text
//! [source-0] ─┐
//!             ├─► [pgie] ─► [tracker] ─► [tiler] ─► [osd] ─┬─► [window]
//! [source-1] ─┘                                            └─► [msg-sink]
//! ```
//!
//! Probe handlers attached to a component's sink pad run before the buffer
//! reaches it, src-pad handlers after.

pub mod bridge;
pub mod compiled_plan;
pub mod compiler;
pub mod component;
pub mod engine;
pub mod executor;
pub mod id;
pub mod state;

pub use bridge::{CommandInbox, PipelineBridge, PipelineCommand};
pub use compiled_plan::{CompiledGraph, GraphEdge, GraphNode, GraphStats};
pub use compiler::PipelineCompiler;
pub use component::{Component, ComponentKind, Pad, Stage, TrackerKind};
pub use engine::{EngineEvent, MediaEngine, ScriptStats, ScriptedEngine};
pub use executor::{Pipeline, ProcessingStats};
pub use id::{EdgeId, ListenerId, NodeId};
pub use state::{EosListener, ErrorListener, Listeners, PipelineState, StateChangeListener};

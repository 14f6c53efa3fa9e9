//! Object Detection Event rule engine.
//!
//! - [`trigger`] - match rules and their private match state
//! - [`action`] - side effects run on a match
//! - [`handler`] - probe handler that runs a trigger list over each buffer

pub mod action;
pub mod handler;
pub mod trigger;

pub use action::{Action, ActionError, ActionKind, BBoxFormat, ColorRef, MonitorFn, OccurrenceInfo};
pub use handler::{HandlerStats, ProbeHandler};
pub use trigger::{EvaluationScope, Evaluation, Trigger, TriggerFilter, TriggerKind, TriggerLimit};

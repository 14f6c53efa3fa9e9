//! Probe handler: feeds each buffer's metadata through an ordered trigger list.

use crate::error::{OdeError, Result};
use crate::ode::trigger::{EvaluationScope, Trigger};
use crate::types::BatchMeta;
use std::sync::{Arc, PoisonError, RwLock};

/// Per-buffer counters returned by [`ProbeHandler::handle_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    pub frames: usize,
    pub objects: usize,
    pub matches: usize,
    pub action_failures: usize,
}

impl HandlerStats {
    pub fn merge(&mut self, other: HandlerStats) {
        self.frames += other.frames;
        self.objects += other.objects;
        self.matches += other.matches;
        self.action_failures += other.action_failures;
    }
}

/// A named probe handler owning an ordered list of triggers.
#[derive(Debug)]
pub struct ProbeHandler {
    name: String,
    triggers: RwLock<Vec<Arc<Trigger>>>,
}

impl ProbeHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triggers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_trigger(&self, trigger: Arc<Trigger>) -> Result<()> {
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        if triggers.iter().any(|t| t.name() == trigger.name()) {
            return Err(OdeError::in_use(trigger.name(), &self.name));
        }
        triggers.push(trigger);
        Ok(())
    }

    pub fn remove_trigger(&self, trigger: &str) -> Result<Arc<Trigger>> {
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        let index = triggers
            .iter()
            .position(|t| t.name() == trigger)
            .ok_or_else(|| OdeError::not_found(trigger))?;
        Ok(triggers.remove(index))
    }

    pub fn remove_all_triggers(&self) -> Vec<Arc<Trigger>> {
        std::mem::take(&mut *self.triggers.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Trigger names in evaluation order.
    pub fn trigger_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|t| t.name().to_string()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<Trigger>> {
        self.triggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one buffer through the trigger list.
    ///
    /// For every frame: each object in metadata order against the per-object
    /// triggers in registration order, then the per-frame triggers in
    /// registration order. Never blocks on anything but the triggers' own locks.
    pub fn handle_batch(&self, batch: &mut BatchMeta) -> HandlerStats {
        let triggers = self.snapshot();
        let (per_object, per_frame): (Vec<_>, Vec<_>) = triggers
            .iter()
            .partition(|t| t.scope() == EvaluationScope::PerObject);

        let mut stats = HandlerStats::default();
        for frame in batch.frames.iter_mut() {
            stats.frames += 1;
            stats.objects += frame.objects.len();

            for index in 0..frame.objects.len() {
                for trigger in &per_object {
                    let eval = trigger.check_object(frame, index);
                    stats.matches += usize::from(eval.matched);
                    stats.action_failures += eval.action_failures;
                }
            }
            for trigger in &per_frame {
                let eval = trigger.check_frame(frame);
                stats.matches += usize::from(eval.matched);
                stats.action_failures += eval.action_failures;
            }
        }
        stats
    }
}

//! Triggers: match rules evaluated against frame metadata.
//!
//! A trigger runs a kind-independent prelude (enabled, remaining count,
//! source filter, class filter) and then its kind's predicate. Per-object
//! kinds are evaluated once for every object of a frame, per-frame kinds
//! once per frame.
//!
//! All mutable state lives behind one per-trigger mutex. Evaluation takes
//! the lock, decides, decrements and snapshots the action list, then
//! releases it before any action runs. A reset issued from the control
//! thread is therefore either fully before or fully after an evaluation.

use crate::error::{OdeError, Result};
use crate::ode::action::{Action, OccurrenceInfo};
use crate::types::FrameMeta;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How often a trigger kind is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationScope {
    /// Once for each object in the frame, in metadata order.
    PerObject,
    /// Once per frame, with no object attached to the occurrence.
    PerFrame,
}

/// The closed set of trigger kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Matches the first sighting of each tracked object per source.
    Instance,
    /// Matches every object that passes the filters.
    Occurrence,
    /// Matches a frame in which no object passes the filters.
    Absence,
    /// Matches a frame whose filtered object count lies in `minimum..=maximum`.
    Count { minimum: u32, maximum: Option<u32> },
    /// Matches every `period`-th frame of each source.
    Interval { period: u64 },
}

impl TriggerKind {
    pub fn scope(&self) -> EvaluationScope {
        match self {
            TriggerKind::Instance | TriggerKind::Occurrence => EvaluationScope::PerObject,
            TriggerKind::Absence | TriggerKind::Count { .. } | TriggerKind::Interval { .. } => {
                EvaluationScope::PerFrame
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TriggerKind::Instance => "instance",
            TriggerKind::Occurrence => "occurrence",
            TriggerKind::Absence => "absence",
            TriggerKind::Count { .. } => "count",
            TriggerKind::Interval { .. } => "interval",
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            TriggerKind::Count {
                minimum,
                maximum: Some(maximum),
            } if maximum < minimum => Err(OdeError::InvalidParameter(format!(
                "count maximum {} is below minimum {}",
                maximum, minimum
            ))),
            TriggerKind::Interval { period: 0 } => Err(OdeError::InvalidParameter(
                "interval period must be > 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Firing limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerLimit {
    #[default]
    None,
    Count(u64),
}

impl TriggerLimit {
    /// `0` means unlimited, as in the originating API.
    pub fn from_raw(limit: u64) -> Self {
        match limit {
            0 => TriggerLimit::None,
            n => TriggerLimit::Count(n),
        }
    }

    fn validate(self) -> Result<()> {
        match self {
            TriggerLimit::Count(0) => Err(OdeError::InvalidParameter(
                "trigger limit must be > 0 or unlimited".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn initial_remaining(self) -> Option<u64> {
        match self {
            TriggerLimit::None => None,
            TriggerLimit::Count(n) => Some(n),
        }
    }
}

/// Optional source and class filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerFilter {
    /// Source component name; `None` matches any source.
    pub source: Option<String>,
    /// Class id; `None` matches any class.
    pub class_id: Option<u16>,
}

impl TriggerFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn class(class_id: u16) -> Self {
        Self {
            source: None,
            class_id: Some(class_id),
        }
    }

    fn source_matches(&self, frame: &FrameMeta) -> bool {
        match &self.source {
            None => true,
            Some(source) => frame.source_name() == Some(source.as_str()),
        }
    }

    fn class_matches(&self, class_id: u16) -> bool {
        self.class_id.map_or(true, |c| c == class_id)
    }
}

/// Outcome of evaluating one trigger once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub matched: bool,
    pub actions_run: usize,
    pub action_failures: usize,
}

#[derive(Debug)]
struct TriggerState {
    enabled: bool,
    limit: TriggerLimit,
    remaining: Option<u64>,
    occurrences: u64,
    actions: Vec<Arc<Action>>,
    /// Instance history: track ids already matched, per source id.
    seen: HashMap<u32, HashSet<u64>>,
    /// Interval counters: frames since the last match, per source id.
    frames_since_match: HashMap<u32, u64>,
}

impl TriggerState {
    fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Record a match and hand back what the caller needs to run actions.
    fn fire(&mut self) -> (u64, Vec<Arc<Action>>) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        self.occurrences += 1;
        (self.occurrences, self.actions.clone())
    }
}

/// A named trigger.
#[derive(Debug)]
pub struct Trigger {
    name: Arc<str>,
    kind: TriggerKind,
    filter: TriggerFilter,
    state: Mutex<TriggerState>,
}

impl Trigger {
    pub fn new(
        name: impl Into<String>,
        kind: TriggerKind,
        filter: TriggerFilter,
        limit: TriggerLimit,
    ) -> Result<Self> {
        kind.validate()?;
        limit.validate()?;
        Ok(Self {
            name: Arc::from(name.into()),
            kind,
            filter,
            state: Mutex::new(TriggerState {
                enabled: true,
                limit,
                remaining: limit.initial_remaining(),
                occurrences: 0,
                actions: Vec::new(),
                seen: HashMap::new(),
                frames_since_match: HashMap::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn scope(&self) -> EvaluationScope {
        self.kind.scope()
    }

    pub fn filter(&self) -> &TriggerFilter {
        &self.filter
    }

    // ── Action list ─────────────────────────────────────────────────

    pub fn add_action(&self, action: Arc<Action>) -> Result<()> {
        let mut state = self.state();
        if state.actions.iter().any(|a| a.name() == action.name()) {
            return Err(OdeError::DuplicateAction {
                trigger: self.name.to_string(),
                action: action.name().to_string(),
            });
        }
        state.actions.push(action);
        Ok(())
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.state().actions.iter().any(|a| a.name() == action)
    }

    pub fn remove_action(&self, action: &str) -> Result<Arc<Action>> {
        let mut state = self.state();
        let index = state
            .actions
            .iter()
            .position(|a| a.name() == action)
            .ok_or_else(|| OdeError::not_found(action).with_context(format!("trigger '{}'", self.name)))?;
        Ok(state.actions.remove(index))
    }

    pub fn remove_all_actions(&self) -> Vec<Arc<Action>> {
        std::mem::take(&mut self.state().actions)
    }

    /// Action names in invocation order.
    pub fn action_names(&self) -> Vec<String> {
        self.state().actions.iter().map(|a| a.name().to_string()).collect()
    }

    // ── Control ─────────────────────────────────────────────────────

    /// Restore the remaining count and forget all match history.
    pub fn reset(&self) {
        let mut state = self.state();
        state.remaining = state.limit.initial_remaining();
        state.occurrences = 0;
        state.seen.clear();
        state.frames_since_match.clear();
        tracing::debug!("Trigger '{}' reset", self.name);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn limit(&self) -> TriggerLimit {
        self.state().limit
    }

    /// Replace the limit and restore the remaining count to it.
    pub fn set_limit(&self, limit: TriggerLimit) -> Result<()> {
        limit.validate()?;
        let mut state = self.state();
        state.limit = limit;
        state.remaining = limit.initial_remaining();
        Ok(())
    }

    /// Matches left before the limit is reached; `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        self.state().remaining
    }

    // ── Evaluation ──────────────────────────────────────────────────

    /// Evaluate this trigger for one object. Per-frame kinds never match here.
    pub fn check_object(&self, frame: &mut FrameMeta, index: usize) -> Evaluation {
        let Some(object) = frame.objects.get(index) else {
            return Evaluation::default();
        };
        let (class_id, track_id) = (object.class_id, object.track_id);

        let fired = {
            let mut state = self.state();
            if !state.enabled || state.exhausted() {
                return Evaluation::default();
            }
            if !self.filter.source_matches(frame) || !self.filter.class_matches(class_id) {
                return Evaluation::default();
            }
            let matched = match self.kind {
                TriggerKind::Instance => {
                    object.is_tracked()
                        && state
                            .seen
                            .entry(frame.source_id)
                            .or_default()
                            .insert(track_id)
                }
                TriggerKind::Occurrence => true,
                _ => false,
            };
            if !matched {
                return Evaluation::default();
            }
            state.fire()
        };

        let object_count = self.filtered_count(frame);
        let object = &frame.objects[index];
        let info = OccurrenceInfo {
            trigger: self.name.clone(),
            source_id: frame.source_id,
            source_name: frame.source_name.clone(),
            frame_number: frame.frame_number,
            timestamp: frame.timestamp,
            occurrence: fired.0,
            class_id: Some(object.class_id),
            track_id: Some(object.track_id),
            bbox: Some(object.bbox),
            confidence: Some(object.confidence),
            object_count,
        };
        self.run_actions(&fired.1, &info, frame, Some(index))
    }

    /// Evaluate this trigger once for a whole frame. Per-object kinds never match here.
    pub fn check_frame(&self, frame: &mut FrameMeta) -> Evaluation {
        let object_count = self.filtered_count(frame);

        let fired = {
            let mut state = self.state();
            if !state.enabled || state.exhausted() || !self.filter.source_matches(frame) {
                return Evaluation::default();
            }
            let matched = match self.kind {
                TriggerKind::Absence => object_count == 0,
                TriggerKind::Count { minimum, maximum } => {
                    let n = object_count as u64;
                    n >= u64::from(minimum) && maximum.map_or(true, |max| n <= u64::from(max))
                }
                TriggerKind::Interval { period } => {
                    let counter = state.frames_since_match.entry(frame.source_id).or_default();
                    *counter += 1;
                    if *counter >= period {
                        *counter = 0;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };
            if !matched {
                return Evaluation::default();
            }
            state.fire()
        };

        let info = OccurrenceInfo {
            trigger: self.name.clone(),
            source_id: frame.source_id,
            source_name: frame.source_name.clone(),
            frame_number: frame.frame_number,
            timestamp: frame.timestamp,
            occurrence: fired.0,
            class_id: self.filter.class_id,
            track_id: None,
            bbox: None,
            confidence: None,
            object_count,
        };
        self.run_actions(&fired.1, &info, frame, None)
    }

    fn filtered_count(&self, frame: &FrameMeta) -> usize {
        frame
            .objects
            .iter()
            .filter(|o| self.filter.class_matches(o.class_id))
            .count()
    }

    fn run_actions(
        &self,
        actions: &[Arc<Action>],
        info: &OccurrenceInfo,
        frame: &mut FrameMeta,
        object: Option<usize>,
    ) -> Evaluation {
        let mut evaluation = Evaluation {
            matched: true,
            ..Evaluation::default()
        };
        for action in actions {
            evaluation.actions_run += 1;
            if let Err(e) = action.invoke(info, frame, object) {
                evaluation.action_failures += 1;
                tracing::warn!(
                    "Action '{}' of trigger '{}' failed on frame {}: {}",
                    action.name(),
                    self.name,
                    info.frame_number,
                    e
                );
            }
        }
        tracing::trace!(
            "Trigger '{}' matched frame {} ({} actions)",
            self.name,
            info.frame_number,
            actions.len()
        );
        evaluation
    }
}

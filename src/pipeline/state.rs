//! Pipeline state machine values and listener lists.

use crate::error::{OdeError, Result};
use crate::pipeline::id::ListenerId;
use std::fmt;
use std::sync::Arc;

/// `NULL → READY → PAUSED ⇄ PLAYING`, with any state back to `NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    #[default]
    Null,
    Ready,
    Paused,
    Playing,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        }
    }

    /// Components may only be added or removed while no buffers flow.
    pub fn allows_graph_mutation(self) -> bool {
        matches!(self, PipelineState::Null | PipelineState::Ready)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called with `(old, new)` on every transition.
pub type StateChangeListener = Arc<dyn Fn(PipelineState, PipelineState) + Send + Sync>;

/// Called once when the engine reports end of stream.
pub type EosListener = Arc<dyn Fn() + Send + Sync>;

/// Called with the engine's message when a fatal engine error stops the pipeline.
pub type ErrorListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Ordered listener lists of one pipeline.
///
/// Callers take snapshots and invoke them after releasing whatever lock
/// guards this struct, so a listener may call back into the pipeline.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    state_change: Vec<(ListenerId, StateChangeListener)>,
    eos: Vec<(ListenerId, EosListener)>,
    error: Vec<(ListenerId, ErrorListener)>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("state_change", &self.state_change.len())
            .field("eos", &self.eos.len())
            .field("error", &self.error.len())
            .finish()
    }
}

fn remove_by_id<T>(list: &mut Vec<(ListenerId, T)>, id: ListenerId) -> Result<()> {
    let index = list
        .iter()
        .position(|(lid, _)| *lid == id)
        .ok_or_else(|| OdeError::not_found(id.to_string()))?;
    list.remove(index);
    Ok(())
}

impl Listeners {
    fn next(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub fn add_state_change(&mut self, listener: StateChangeListener) -> ListenerId {
        let id = self.next();
        self.state_change.push((id, listener));
        id
    }

    pub fn remove_state_change(&mut self, id: ListenerId) -> Result<()> {
        remove_by_id(&mut self.state_change, id)
    }

    pub fn add_eos(&mut self, listener: EosListener) -> ListenerId {
        let id = self.next();
        self.eos.push((id, listener));
        id
    }

    pub fn remove_eos(&mut self, id: ListenerId) -> Result<()> {
        remove_by_id(&mut self.eos, id)
    }

    pub fn add_error(&mut self, listener: ErrorListener) -> ListenerId {
        let id = self.next();
        self.error.push((id, listener));
        id
    }

    pub fn remove_error(&mut self, id: ListenerId) -> Result<()> {
        remove_by_id(&mut self.error, id)
    }

    pub fn state_change_snapshot(&self) -> Vec<StateChangeListener> {
        self.state_change.iter().map(|(_, l)| l.clone()).collect()
    }

    pub fn eos_snapshot(&self) -> Vec<EosListener> {
        self.eos.iter().map(|(_, l)| l.clone()).collect()
    }

    pub fn error_snapshot(&self) -> Vec<ErrorListener> {
        self.error.iter().map(|(_, l)| l.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_state_strings() {
        assert_eq!(PipelineState::Playing.to_string(), "PLAYING");
        assert_eq!(PipelineState::default(), PipelineState::Null);
        assert!(PipelineState::Ready.allows_graph_mutation());
        assert!(!PipelineState::Paused.allows_graph_mutation());
    }

    #[test]
    fn test_listeners_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = Listeners::default();
        for tag in ["first", "second", "third"] {
            let calls = calls.clone();
            listeners.add_state_change(Arc::new(move |old, new| {
                calls.lock().unwrap().push(format!("{}:{}->{}", tag, old, new));
            }));
        }

        for listener in listeners.state_change_snapshot() {
            listener(PipelineState::Null, PipelineState::Ready);
        }
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["first:NULL->READY", "second:NULL->READY", "third:NULL->READY"]
        );
    }

    #[test]
    fn test_remove_unknown_listener() {
        let mut listeners = Listeners::default();
        let id = listeners.add_eos(Arc::new(|| {}));
        listeners.remove_eos(id).unwrap();
        assert!(matches!(
            listeners.remove_eos(id),
            Err(OdeError::NotFound { .. })
        ));
    }
}

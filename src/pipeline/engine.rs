//! Media engine boundary.
//!
//! The engine does the decoding, inference and rendering; the pipeline only
//! asks it for the next event and hands every buffer's metadata to the
//! probe handlers. [`ScriptedEngine`] replays a fixed event list and is what
//! the tests and demos drive pipelines with.

use super::compiled_plan::CompiledGraph;
use crate::error::{OdeError, Result};
use crate::types::BatchMeta;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the engine produced since the last call.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// One buffer's worth of metadata.
    Buffer(BatchMeta),
    /// Nothing ready yet.
    Idle,
    /// Every source is exhausted.
    EndOfStream,
    /// Unrecoverable engine failure, such as device loss.
    Error(String),
}

/// The media engine backing a pipeline.
pub trait MediaEngine: Send {
    /// Claim devices and build the engine-side graph. `ResourceUnavailable` on failure.
    fn acquire(&mut self, graph: &CompiledGraph) -> Result<()>;

    /// Next event. Called from the processing thread only while PLAYING.
    fn next_event(&mut self) -> EngineEvent;

    /// Give everything back. Called once per successful `acquire`.
    fn release(&mut self);
}

/// Counters shared between a [`ScriptedEngine`] and the test that built it.
#[derive(Debug, Default)]
pub struct ScriptStats {
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    pub buffers: AtomicUsize,
}

impl ScriptStats {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn buffers(&self) -> usize {
        self.buffers.load(Ordering::SeqCst)
    }
}

/// Deterministic engine that replays a script, then whatever is fed to it.
#[derive(Debug)]
pub struct ScriptedEngine {
    script: Vec<EngineEvent>,
    pending: VecDeque<EngineEvent>,
    feed: Option<Receiver<EngineEvent>>,
    fail_acquire: bool,
    frame_interval: Option<Duration>,
    stats: Arc<ScriptStats>,
}

impl ScriptedEngine {
    /// Replays `script` from the start on every acquire, then reports idle.
    pub fn new(script: Vec<EngineEvent>) -> Self {
        Self {
            script,
            pending: VecDeque::new(),
            feed: None,
            fail_acquire: false,
            frame_interval: None,
            stats: Arc::new(ScriptStats::default()),
        }
    }

    /// Engine driven by the returned sender once its (empty) script is done.
    pub fn fed() -> (Self, Sender<EngineEvent>) {
        let (tx, rx) = unbounded();
        let mut engine = Self::new(Vec::new());
        engine.feed = Some(rx);
        (engine, tx)
    }

    /// Buffers from a list of batches followed by end of stream.
    pub fn from_batches(batches: impl IntoIterator<Item = BatchMeta>) -> Self {
        let mut script: Vec<EngineEvent> = batches.into_iter().map(EngineEvent::Buffer).collect();
        script.push(EngineEvent::EndOfStream);
        Self::new(script)
    }

    /// Make `acquire` fail with `ResourceUnavailable`.
    pub fn failing_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    /// Sleep this long before delivering each buffer.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn stats(&self) -> Arc<ScriptStats> {
        self.stats.clone()
    }
}

impl MediaEngine for ScriptedEngine {
    fn acquire(&mut self, graph: &CompiledGraph) -> Result<()> {
        if self.fail_acquire {
            return Err(OdeError::ResourceUnavailable(format!(
                "scripted engine refused pipeline '{}'",
                graph.pipeline
            )));
        }
        self.pending = self.script.iter().cloned().collect();
        self.stats.acquires.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "Scripted engine acquired for '{}' ({} events)",
            graph.pipeline,
            self.pending.len()
        );
        Ok(())
    }

    fn next_event(&mut self) -> EngineEvent {
        let event = self
            .pending
            .pop_front()
            .or_else(|| self.feed.as_ref().and_then(|rx| rx.try_recv().ok()))
            .unwrap_or(EngineEvent::Idle);
        if let EngineEvent::Buffer(_) = event {
            if let Some(interval) = self.frame_interval {
                std::thread::sleep(interval);
            }
            self.stats.buffers.fetch_add(1, Ordering::SeqCst);
        }
        event
    }

    fn release(&mut self) {
        self.pending.clear();
        self.stats.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameMeta;

    #[test]
    fn test_script_replays_on_acquire() {
        let mut engine =
            ScriptedEngine::from_batches(vec![BatchMeta::single(FrameMeta::new(0, 1, Duration::ZERO))]);
        let stats = engine.stats();
        let graph = CompiledGraph::default();

        for _ in 0..2 {
            engine.acquire(&graph).unwrap();
            assert!(matches!(engine.next_event(), EngineEvent::Buffer(_)));
            assert!(matches!(engine.next_event(), EngineEvent::EndOfStream));
            assert!(matches!(engine.next_event(), EngineEvent::Idle));
            engine.release();
        }
        assert_eq!(stats.acquires(), 2);
        assert_eq!(stats.releases(), 2);
        assert_eq!(stats.buffers(), 2);
    }

    #[test]
    fn test_failing_acquire() {
        let mut engine = ScriptedEngine::new(Vec::new()).failing_acquire();
        let err = engine.acquire(&CompiledGraph::default()).unwrap_err();
        assert_eq!(err.code(), crate::ResultCode::ResourceUnavailable);
    }

    #[test]
    fn test_fed_engine() {
        let (mut engine, feed) = ScriptedEngine::fed();
        engine.acquire(&CompiledGraph::default()).unwrap();
        assert!(matches!(engine.next_event(), EngineEvent::Idle));
        feed.send(EngineEvent::EndOfStream).unwrap();
        assert!(matches!(engine.next_event(), EngineEvent::EndOfStream));
    }
}

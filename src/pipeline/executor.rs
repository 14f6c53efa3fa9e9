//! Pipeline executor: the control handle and the processing loop.
//!
//! The control handle owns the state machine. Playing spawns a dedicated
//! processing thread which, per iteration:
//! 1. Drains commands from the control side.
//! 2. Asks the engine for the next event.
//! 3. For a buffer: stamps source names, then visits components in
//!    compiled order running sink-pad handlers, message sink hand-off and
//!    src-pad handlers.
//! 4. Sleeps briefly when the engine is idle.
//!
//! State transitions and the events they cause are queued under the
//! control lock and delivered to listeners after it is released, in order.
//! Listeners may therefore call back into the pipeline, including `stop()`.

use super::bridge::{CommandInbox, PipelineBridge};
use super::compiled_plan::CompiledGraph;
use super::compiler::PipelineCompiler;
use super::component::{Component, Pad};
use super::engine::{EngineEvent, MediaEngine};
use super::id::ListenerId;
use super::state::{Listeners, PipelineState};
use crate::config::PipelineSettings;
use crate::error::{OdeError, Result};
use crate::ode::HandlerStats;
use crate::types::BatchMeta;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

/// Running totals of the processing thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub buffers: u64,
    pub dropped_frames: usize,
    pub handlers: HandlerStats,
}

#[derive(Debug, Clone)]
enum PipelineEvent {
    StateChanged(PipelineState, PipelineState),
    EndOfStream,
    Error(String),
}

struct Worker {
    bridge: PipelineBridge,
    handle: JoinHandle<()>,
    thread: ThreadId,
}

struct Control {
    state: PipelineState,
    /// Members in insertion order.
    members: Vec<Arc<Component>>,
    /// Bumped on every membership change.
    generation: u64,
    compiled: Option<Arc<CompiledGraph>>,
    /// Generation the engine was acquired for, while READY or beyond.
    acquired_generation: Option<u64>,
    worker: Option<Worker>,
}

#[derive(Default)]
struct Dispatch {
    queue: VecDeque<PipelineEvent>,
    dispatching: bool,
}

struct Shared {
    name: String,
    settings: PipelineSettings,
    control: Mutex<Control>,
    /// Present unless the processing thread holds it.
    engine: Mutex<Option<Box<dyn MediaEngine>>>,
    listeners: Mutex<Listeners>,
    dispatch: Mutex<Dispatch>,
    stats: Mutex<ProcessingStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        lock(&self.control)
    }

    fn compile_locked(&self, control: &mut Control) -> Result<Arc<CompiledGraph>> {
        if let Some(graph) = &control.compiled {
            if graph.generation == control.generation {
                return Ok(graph.clone());
            }
        }
        let graph = Arc::new(PipelineCompiler::compile(
            &self.name,
            &control.members,
            control.generation,
        )?);
        tracing::info!(
            "Pipeline '{}' compiled: {} components, {} sources, {} handlers (gen {})",
            self.name,
            graph.stats.total_nodes,
            graph.stats.source_nodes,
            graph.stats.attached_handlers,
            graph.generation
        );
        control.compiled = Some(graph.clone());
        Ok(graph)
    }

    /// Compile and acquire the engine for the current membership.
    fn acquire_locked(&self, control: &mut Control) -> Result<Arc<CompiledGraph>> {
        let graph = self.compile_locked(control)?;
        if control.acquired_generation == Some(graph.generation) {
            return Ok(graph);
        }
        let mut slot = lock(&self.engine);
        let engine = slot.as_mut().ok_or_else(|| {
            OdeError::ResourceUnavailable(format!("pipeline '{}' has no media engine", self.name))
        })?;
        if control.acquired_generation.take().is_some() {
            engine.release();
        }
        engine.acquire(&graph)?;
        control.acquired_generation = Some(graph.generation);
        Ok(graph)
    }

    fn push_event(&self, event: PipelineEvent) {
        lock(&self.dispatch).queue.push_back(event);
    }

    /// Deliver queued events unless another call on the stack or another
    /// thread is already doing so; that call picks the new events up.
    fn dispatch_pending(&self) {
        {
            let mut dispatch = lock(&self.dispatch);
            if dispatch.dispatching {
                return;
            }
            dispatch.dispatching = true;
        }
        let _reset = DispatchReset(self);
        loop {
            let Some(event) = lock(&self.dispatch).queue.pop_front() else {
                return;
            };
            self.deliver(event);
        }
    }

    fn deliver(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::StateChanged(old, new) => {
                tracing::info!("Pipeline '{}' state {} -> {}", self.name, old, new);
                let listeners = lock(&self.listeners).state_change_snapshot();
                for listener in listeners {
                    listener(old, new);
                }
            }
            PipelineEvent::EndOfStream => {
                tracing::info!("Pipeline '{}' reached end of stream", self.name);
                let listeners = lock(&self.listeners).eos_snapshot();
                for listener in listeners {
                    listener();
                }
            }
            PipelineEvent::Error(message) => {
                tracing::error!("Pipeline '{}' engine error: {}", self.name, message);
                let listeners = lock(&self.listeners).error_snapshot();
                for listener in listeners {
                    listener(&message);
                }
            }
        }
    }

    /// Internal transition to NULL caused by the engine.
    fn finish(&self, cause: PipelineEvent) {
        let graph = {
            let mut control = self.control();
            let old = control.state;
            if !matches!(old, PipelineState::Playing | PipelineState::Paused) {
                return;
            }
            control.state = PipelineState::Null;
            control.acquired_generation = None;
            self.push_event(cause);
            self.push_event(PipelineEvent::StateChanged(old, PipelineState::Null));
            control.compiled.clone()
        };
        if let Some(graph) = graph {
            stop_message_sinks(&graph);
        }
        self.dispatch_pending();
    }
}

struct DispatchReset<'a>(&'a Shared);

impl Drop for DispatchReset<'_> {
    fn drop(&mut self) {
        lock(&self.0.dispatch).dispatching = false;
        // Events queued after the last pop but before the flag cleared.
        if !lock(&self.0.dispatch).queue.is_empty() && !std::thread::panicking() {
            self.0.dispatch_pending();
        }
    }
}

fn stop_message_sinks(graph: &CompiledGraph) {
    for node in &graph.nodes {
        if let Some(sink) = node.component.message_sink() {
            sink.stop();
        }
    }
}

// ── Control handle ──────────────────────────────────────────────────────

/// A named pipeline: member components, a state machine and listener lists.
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// A pipeline without a media engine; set one before `ready`/`play`.
    pub fn new(name: impl Into<String>, settings: PipelineSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                settings,
                control: Mutex::new(Control {
                    state: PipelineState::Null,
                    members: Vec::new(),
                    generation: 0,
                    compiled: None,
                    acquired_generation: None,
                    worker: None,
                }),
                engine: Mutex::new(None),
                listeners: Mutex::new(Listeners::default()),
                dispatch: Mutex::new(Dispatch::default()),
                stats: Mutex::new(ProcessingStats::default()),
            }),
        }
    }

    pub fn with_engine(
        name: impl Into<String>,
        settings: PipelineSettings,
        engine: Box<dyn MediaEngine>,
    ) -> Self {
        let pipeline = Self::new(name, settings);
        *lock(&pipeline.shared.engine) = Some(engine);
        pipeline
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> PipelineState {
        self.shared.control().state
    }

    pub fn stats(&self) -> ProcessingStats {
        *lock(&self.shared.stats)
    }

    /// Replace the media engine. Only legal in NULL.
    pub fn set_engine(&self, engine: Box<dyn MediaEngine>) -> Result<()> {
        self.reap()?;
        let control = self.shared.control();
        if control.state != PipelineState::Null {
            return Err(OdeError::InvalidState(format!(
                "pipeline '{}' is {}, the engine can only change in NULL",
                self.shared.name, control.state
            )));
        }
        *lock(&self.shared.engine) = Some(engine);
        Ok(())
    }

    // ── Graph membership ──

    pub fn add_component(&self, component: Arc<Component>) -> Result<()> {
        self.add_components(&[component])
    }

    /// Add several components, all or none.
    pub fn add_components(&self, components: &[Arc<Component>]) -> Result<()> {
        let mut control = self.shared.control();
        self.check_mutable(&control)?;
        for (i, component) in components.iter().enumerate() {
            let repeated = components[..i].iter().any(|c| c.name() == component.name());
            if repeated || control.members.iter().any(|c| c.name() == component.name()) {
                return Err(OdeError::in_use(component.name(), &self.shared.name));
            }
        }
        control.members.extend(components.iter().cloned());
        control.generation += 1;
        tracing::debug!(
            "Pipeline '{}' now has {} components",
            self.shared.name,
            control.members.len()
        );
        Ok(())
    }

    pub fn remove_component(&self, name: &str) -> Result<Arc<Component>> {
        let mut control = self.shared.control();
        self.check_mutable(&control)?;
        let index = control
            .members
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| OdeError::not_found(name))?;
        let component = control.members.remove(index);
        control.generation += 1;
        Ok(component)
    }

    pub fn contains_component(&self, name: &str) -> bool {
        self.shared.control().members.iter().any(|c| c.name() == name)
    }

    /// Members in insertion order.
    pub fn components(&self) -> Vec<Arc<Component>> {
        self.shared.control().members.clone()
    }

    fn check_mutable(&self, control: &Control) -> Result<()> {
        if control.state.allows_graph_mutation() {
            Ok(())
        } else {
            Err(OdeError::InvalidState(format!(
                "pipeline '{}' is {}, components can only change in NULL or READY",
                self.shared.name, control.state
            )))
        }
    }

    /// Compiled topology of the current membership.
    pub fn compiled_graph(&self) -> Result<Arc<CompiledGraph>> {
        let mut control = self.shared.control();
        self.shared.compile_locked(&mut control)
    }

    /// Graphviz DOT text of the current topology.
    pub fn dump_to_dot(&self) -> Result<String> {
        Ok(self.compiled_graph()?.to_dot())
    }

    // ── State machine ──

    /// NULL → READY: compile the graph and acquire the engine.
    pub fn ready(&self) -> Result<()> {
        self.reap()?;
        let result = {
            let mut control = self.shared.control();
            match control.state {
                PipelineState::Null => self.ready_locked(&mut control),
                PipelineState::Ready => Ok(()),
                other => Err(OdeError::InvalidState(format!(
                    "pipeline '{}' cannot go to READY from {}",
                    self.shared.name, other
                ))),
            }
        };
        self.shared.dispatch_pending();
        result
    }

    fn ready_locked(&self, control: &mut Control) -> Result<()> {
        self.shared
            .acquire_locked(control)
            .map_err(|e| e.with_context(format!("pipeline '{}' failed to get READY", self.shared.name)))?;
        control.state = PipelineState::Ready;
        self.shared
            .push_event(PipelineEvent::StateChanged(PipelineState::Null, PipelineState::Ready));
        Ok(())
    }

    /// NULL/READY/PAUSED → PLAYING.
    pub fn play(&self) -> Result<()> {
        self.reap()?;
        let result = {
            let mut control = self.shared.control();
            self.play_locked(&mut control)
        };
        self.shared.dispatch_pending();
        result
    }

    fn play_locked(&self, control: &mut Control) -> Result<()> {
        match control.state {
            PipelineState::Playing => {
                return Err(OdeError::InvalidState(format!(
                    "pipeline '{}' is already PLAYING",
                    self.shared.name
                )))
            }
            PipelineState::Paused => {
                if let Some(worker) = &control.worker {
                    worker.bridge.resume();
                }
                control.state = PipelineState::Playing;
                self.shared.push_event(PipelineEvent::StateChanged(
                    PipelineState::Paused,
                    PipelineState::Playing,
                ));
                return Ok(());
            }
            PipelineState::Null => self.ready_locked(control)?,
            PipelineState::Ready => {}
        }

        let graph = self
            .shared
            .acquire_locked(control)
            .map_err(|e| e.with_context(format!("pipeline '{}' failed to play", self.shared.name)))?;

        let sinks: Vec<_> = graph
            .nodes
            .iter()
            .filter_map(|n| n.component.message_sink())
            .collect();
        for (i, sink) in sinks.iter().enumerate() {
            if let Err(e) = sink.start() {
                sinks[..i].iter().for_each(|s| s.stop());
                return Err(e.with_context(format!("message sink '{}'", sink.name())));
            }
        }

        let (bridge, commands) = PipelineBridge::new(self.shared.settings.command_capacity);
        let processing = ProcessingLoop::new(self.shared.clone(), graph.clone(), commands);
        let spawned = std::thread::Builder::new()
            .name(format!("pipeline-{}", self.shared.name))
            .spawn(move || processing.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                sinks.iter().for_each(|s| s.stop());
                return Err(OdeError::ResourceUnavailable(format!(
                    "cannot spawn processing thread: {}",
                    e
                )));
            }
        };

        control.worker = Some(Worker {
            bridge,
            thread: handle.thread().id(),
            handle,
        });
        control.state = PipelineState::Playing;
        self.shared
            .push_event(PipelineEvent::StateChanged(PipelineState::Ready, PipelineState::Playing));
        Ok(())
    }

    /// PLAYING → PAUSED. Buffer flow halts; state is kept.
    pub fn pause(&self) -> Result<()> {
        let result = {
            let mut control = self.shared.control();
            if control.state != PipelineState::Playing {
                Err(OdeError::InvalidState(format!(
                    "pipeline '{}' can only pause while PLAYING, it is {}",
                    self.shared.name, control.state
                )))
            } else {
                if let Some(worker) = &control.worker {
                    worker.bridge.pause();
                }
                control.state = PipelineState::Paused;
                self.shared.push_event(PipelineEvent::StateChanged(
                    PipelineState::Playing,
                    PipelineState::Paused,
                ));
                Ok(())
            }
        };
        self.shared.dispatch_pending();
        result
    }

    /// Any state → NULL. Releases the engine. Idempotent.
    ///
    /// When called from the processing thread itself (a listener or an
    /// action), the thread is told to exit and is joined by the next
    /// lifecycle call from another thread.
    pub fn stop(&self) -> Result<()> {
        let (worker, graph) = {
            let mut control = self.shared.control();
            let old = control.state;
            let worker = control.worker.take();
            if let Some(worker) = &worker {
                worker.bridge.stop();
            }
            let graph = if old == PipelineState::Null {
                None
            } else {
                if old == PipelineState::Ready && control.acquired_generation.is_some() {
                    if let Some(engine) = lock(&self.shared.engine).as_mut() {
                        engine.release();
                    }
                }
                control.acquired_generation = None;
                control.state = PipelineState::Null;
                self.shared
                    .push_event(PipelineEvent::StateChanged(old, PipelineState::Null));
                control.compiled.clone()
            };
            (worker, graph)
        };

        if let Some(graph) = graph {
            stop_message_sinks(&graph);
        }
        self.shared.dispatch_pending();

        if let Some(worker) = worker {
            self.join(worker);
        }
        Ok(())
    }

    /// Join a finished processing thread left behind in NULL.
    fn reap(&self) -> Result<()> {
        let worker = {
            let mut control = self.shared.control();
            if control.state != PipelineState::Null {
                return Ok(());
            }
            match control.worker.take() {
                Some(worker) if worker.thread == std::thread::current().id() => {
                    control.worker = Some(worker);
                    return Err(OdeError::InvalidState(format!(
                        "pipeline '{}' cannot restart from its own processing thread",
                        self.shared.name
                    )));
                }
                other => other,
            }
        };
        if let Some(worker) = worker {
            self.join(worker);
        }
        Ok(())
    }

    fn join(&self, worker: Worker) {
        if worker.thread == std::thread::current().id() {
            // Exits on its own once the current callback returns.
            self.shared.control().worker = Some(worker);
            return;
        }
        if worker.handle.join().is_err() {
            tracing::error!("Pipeline '{}' processing thread panicked", self.shared.name);
        }
    }

    // ── Listeners ──

    pub fn add_state_change_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(PipelineState, PipelineState) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).add_state_change(Arc::new(listener))
    }

    pub fn remove_state_change_listener(&self, id: ListenerId) -> Result<()> {
        lock(&self.shared.listeners).remove_state_change(id)
    }

    pub fn add_eos_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).add_eos(Arc::new(listener))
    }

    pub fn remove_eos_listener(&self, id: ListenerId) -> Result<()> {
        lock(&self.shared.listeners).remove_eos(id)
    }

    pub fn add_error_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock(&self.shared.listeners).add_error(Arc::new(listener))
    }

    pub fn remove_error_listener(&self, id: ListenerId) -> Result<()> {
        lock(&self.shared.listeners).remove_error(id)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ── Processing loop ─────────────────────────────────────────────────────

struct ProcessingLoop {
    shared: Arc<Shared>,
    graph: Arc<CompiledGraph>,
    commands: CommandInbox,
    /// Source component names indexed by source id.
    source_names: Vec<Arc<str>>,
}

impl ProcessingLoop {
    fn new(shared: Arc<Shared>, graph: Arc<CompiledGraph>, commands: CommandInbox) -> Self {
        let mut sources = graph.sources();
        sources.sort_by_key(|(id, _)| *id);
        let source_names = sources.into_iter().map(|(_, name)| Arc::from(name)).collect();
        Self {
            shared,
            graph,
            commands,
            source_names,
        }
    }

    fn run(self) {
        let name = self.shared.name.clone();
        let Some(mut engine) = lock(&self.shared.engine).take() else {
            self.shared
                .finish(PipelineEvent::Error("media engine is unavailable".to_string()));
            return;
        };
        tracing::info!("Pipeline '{}' processing thread started", name);

        let idle = Duration::from_millis(self.shared.settings.idle_backoff_ms);

        while self.commands.proceed() {
            match engine.next_event() {
                EngineEvent::Buffer(batch) => self.process(batch),
                EngineEvent::Idle => std::thread::sleep(idle),
                EngineEvent::EndOfStream => {
                    self.shared.finish(PipelineEvent::EndOfStream);
                    break;
                }
                EngineEvent::Error(message) => {
                    self.shared.finish(PipelineEvent::Error(message));
                    break;
                }
            }
        }

        engine.release();
        *lock(&self.shared.engine) = Some(engine);
        tracing::info!("Pipeline '{}' processing thread exiting", name);
    }

    fn process(&self, mut batch: BatchMeta) {
        let max_frames = self.shared.settings.max_batch_frames;
        let mut dropped_frames = 0;
        if batch.frames.len() > max_frames {
            dropped_frames = batch.frames.len() - max_frames;
            tracing::warn!(
                "Pipeline '{}' truncating buffer of {} frames to {}",
                self.shared.name,
                batch.frames.len(),
                max_frames
            );
            batch.frames.truncate(max_frames);
        }

        for frame in batch.frames.iter_mut() {
            frame.source_name = self.source_names.get(frame.source_id as usize).cloned();
            if frame.source_name.is_none() {
                tracing::trace!("Frame {} has unknown source id {}", frame.frame_number, frame.source_id);
            }
        }

        let mut handled = HandlerStats::default();
        for id in &self.graph.execution_order {
            let Some(node) = self.graph.node(*id) else {
                continue;
            };
            for handler in node.component.handlers(Pad::Sink) {
                handled.merge(handler.handle_batch(&mut batch));
            }
            if let Some(sink) = node.component.message_sink() {
                sink.submit(batch.messages());
            }
            for handler in node.component.handlers(Pad::Src) {
                handled.merge(handler.handle_batch(&mut batch));
            }
        }

        let mut stats = lock(&self.shared.stats);
        stats.buffers += 1;
        stats.dropped_frames += dropped_frames;
        stats.handlers.merge(handled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ode::{Action, ActionKind, OccurrenceInfo, ProbeHandler, Trigger, TriggerFilter, TriggerKind, TriggerLimit};
    use crate::pipeline::component::ComponentKind;
    use crate::pipeline::engine::ScriptedEngine;
    use crate::types::{BoundingBox, FrameMeta, ObjectMeta};
    use std::time::Instant;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            idle_backoff_ms: 1,
            ..PipelineSettings::default()
        }
    }

    fn source(name: &str) -> Arc<Component> {
        Arc::new(
            Component::new(
                name,
                ComponentKind::UriSource {
                    uri: "file:///streams/sample_1080p_h265.mp4".into(),
                    is_live: false,
                    intra_decode: false,
                    drop_frame_interval: 0,
                },
            )
            .unwrap(),
        )
    }

    fn wait_for(pipeline: &Pipeline, state: PipelineState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.state() != state {
            assert!(Instant::now() < deadline, "timed out waiting for {}", state);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn person_batches(count: u64) -> Vec<BatchMeta> {
        (0..count)
            .map(|n| {
                BatchMeta::single(FrameMeta::new(0, n, Duration::from_millis(n * 33)).with_object(
                    ObjectMeta::new(n, 2, BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9),
                ))
            })
            .collect()
    }

    #[test]
    fn test_play_without_engine_is_resource_unavailable() {
        let pipeline = Pipeline::new("p", settings());
        pipeline.add_component(source("src")).unwrap();
        let err = pipeline.play().unwrap_err();
        assert_eq!(err.code(), crate::ResultCode::ResourceUnavailable);
        assert_eq!(pipeline.state(), PipelineState::Null);
    }

    #[test]
    fn test_ready_without_source_is_invalid_state() {
        let pipeline =
            Pipeline::with_engine("p", settings(), Box::new(ScriptedEngine::new(Vec::new())));
        pipeline
            .add_component(Arc::new(Component::new("sink", ComponentKind::FakeSink).unwrap()))
            .unwrap();
        let err = pipeline.ready().unwrap_err();
        assert_eq!(err.code(), crate::ResultCode::InvalidState);
    }

    #[test]
    fn test_eos_runs_handlers_and_returns_to_null() {
        let engine = ScriptedEngine::from_batches(person_batches(3));
        let engine_stats = engine.stats();
        let pipeline = Pipeline::with_engine("p", settings(), Box::new(engine));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let trigger = Arc::new(
            Trigger::new("t", TriggerKind::Occurrence, TriggerFilter::any(), TriggerLimit::None)
                .unwrap(),
        );
        trigger
            .add_action(Arc::new(Action::new(
                "monitor",
                ActionKind::Monitor(Arc::new(move |info: &OccurrenceInfo| {
                    sink.lock()
                        .unwrap()
                        .push((info.source_name.as_deref().map(str::to_string), info.frame_number));
                })),
            )))
            .unwrap();
        let handler = Arc::new(ProbeHandler::new("pph"));
        handler.add_trigger(trigger).unwrap();
        let src = source("camera-1");
        src.attach(Pad::Src, handler);
        pipeline.add_component(src).unwrap();

        let eos = Arc::new(Mutex::new(0));
        let eos_count = eos.clone();
        pipeline.add_eos_listener(move || *eos_count.lock().unwrap() += 1);

        pipeline.play().unwrap();
        wait_for(&pipeline, PipelineState::Null);
        pipeline.stop().unwrap();

        assert_eq!(*eos.lock().unwrap(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Some("camera-1".to_string()), 0),
                (Some("camera-1".to_string()), 1),
                (Some("camera-1".to_string()), 2)
            ]
        );
        assert_eq!(pipeline.stats().buffers, 3);
        assert_eq!(engine_stats.acquires(), 1);
        assert_eq!(engine_stats.releases(), 1);
    }

    #[test]
    fn test_state_transitions_are_reported_in_order() {
        let (engine, _feed) = ScriptedEngine::fed();
        let pipeline = Pipeline::with_engine("p", settings(), Box::new(engine));
        pipeline.add_component(source("src")).unwrap();

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let log = transitions.clone();
        pipeline.add_state_change_listener(move |old, new| log.lock().unwrap().push((old, new)));

        pipeline.play().unwrap();
        assert!(matches!(pipeline.play(), Err(OdeError::InvalidState(_))));
        pipeline.pause().unwrap();
        assert!(matches!(pipeline.pause(), Err(OdeError::InvalidState(_))));
        pipeline.play().unwrap();
        pipeline.stop().unwrap();
        pipeline.stop().unwrap();

        use PipelineState::*;
        assert_eq!(
            *transitions.lock().unwrap(),
            vec![
                (Null, Ready),
                (Ready, Playing),
                (Playing, Paused),
                (Paused, Playing),
                (Playing, Null)
            ]
        );
    }

    #[test]
    fn test_add_component_refused_while_playing() {
        let (engine, _feed) = ScriptedEngine::fed();
        let pipeline = Pipeline::with_engine("p", settings(), Box::new(engine));
        pipeline.add_component(source("src")).unwrap();
        pipeline.play().unwrap();

        let err = pipeline
            .add_components(&[source("late"), Arc::new(Component::new("sink", ComponentKind::FakeSink).unwrap())])
            .unwrap_err();
        assert_eq!(err.code(), crate::ResultCode::InvalidState);
        assert_eq!(pipeline.components().len(), 1);
        assert!(matches!(
            pipeline.remove_component("src"),
            Err(OdeError::InvalidState(_))
        ));

        pipeline.stop().unwrap();
        pipeline.remove_component("src").unwrap();
    }

    #[test]
    fn test_engine_error_notifies_error_listeners() {
        let engine = ScriptedEngine::new(vec![EngineEvent::Error("device lost".into())]);
        let pipeline = Pipeline::with_engine("p", settings(), Box::new(engine));
        pipeline.add_component(source("src")).unwrap();

        let errors = Arc::new(Mutex::new(Vec::new()));
        let log = errors.clone();
        pipeline.add_error_listener(move |message| log.lock().unwrap().push(message.to_string()));

        pipeline.play().unwrap();
        wait_for(&pipeline, PipelineState::Null);
        pipeline.stop().unwrap();
        assert_eq!(*errors.lock().unwrap(), vec!["device lost".to_string()]);
    }

    #[test]
    fn test_replay_after_eos() {
        let engine = ScriptedEngine::from_batches(person_batches(2));
        let stats = engine.stats();
        let pipeline = Pipeline::with_engine("p", settings(), Box::new(engine));
        pipeline.add_component(source("src")).unwrap();

        for _ in 0..2 {
            pipeline.play().unwrap();
            wait_for(&pipeline, PipelineState::Null);
        }
        pipeline.stop().unwrap();
        assert_eq!(stats.acquires(), 2);
        assert_eq!(stats.releases(), 2);
        assert_eq!(pipeline.stats().buffers, 4);
    }

    #[test]
    fn test_stop_from_eos_listener() {
        let engine = ScriptedEngine::from_batches(person_batches(1));
        let pipeline = Arc::new(Pipeline::with_engine("p", settings(), Box::new(engine)));
        pipeline.add_component(source("src")).unwrap();

        let weak = Arc::downgrade(&pipeline);
        pipeline.add_eos_listener(move || {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.stop().unwrap();
            }
        });

        pipeline.play().unwrap();
        wait_for(&pipeline, PipelineState::Null);
        pipeline.stop().unwrap();
        pipeline.play().unwrap();
        pipeline.stop().unwrap();
    }

    #[test]
    fn test_pause_and_resume_from_action_with_tiny_command_queue() {
        let engine = ScriptedEngine::from_batches(person_batches(3));
        let tight = PipelineSettings {
            command_capacity: 1,
            ..settings()
        };
        let pipeline = Arc::new(Pipeline::with_engine("p", tight, Box::new(engine)));

        let toggles = Arc::new(Mutex::new(0));
        let weak = Arc::downgrade(&pipeline);
        let counter = toggles.clone();
        let trigger = Arc::new(
            Trigger::new("t", TriggerKind::Occurrence, TriggerFilter::any(), TriggerLimit::Count(1))
                .unwrap(),
        );
        trigger
            .add_action(Arc::new(Action::new(
                "toggle",
                ActionKind::Monitor(Arc::new(move |_: &OccurrenceInfo| {
                    let Some(pipeline) = weak.upgrade() else {
                        return;
                    };
                    for _ in 0..4 {
                        pipeline.pause().unwrap();
                        pipeline.play().unwrap();
                        *counter.lock().unwrap() += 1;
                    }
                })),
            )))
            .unwrap();
        let handler = Arc::new(ProbeHandler::new("pph"));
        handler.add_trigger(trigger).unwrap();
        let src = source("camera-1");
        src.attach(Pad::Src, handler);
        pipeline.add_component(src).unwrap();

        pipeline.play().unwrap();
        wait_for(&pipeline, PipelineState::Null);
        pipeline.stop().unwrap();

        assert_eq!(*toggles.lock().unwrap(), 4);
        assert_eq!(pipeline.stats().buffers, 3);
    }

    #[test]
    fn test_control_commands_never_block_on_full_queue() {
        let (engine, _feed) = ScriptedEngine::fed();
        let tight = PipelineSettings {
            command_capacity: 1,
            ..settings()
        };
        let pipeline = Pipeline::with_engine("p", tight, Box::new(engine));
        pipeline.add_component(source("src")).unwrap();

        pipeline.play().unwrap();
        for _ in 0..50 {
            pipeline.pause().unwrap();
            pipeline.play().unwrap();
        }
        pipeline.pause().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Paused);
        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Null);
    }

    #[test]
    fn test_oversized_batch_is_truncated() {
        let frames = (0..4).map(|n| FrameMeta::new(0, n, Duration::ZERO)).collect();
        let engine = ScriptedEngine::from_batches(vec![BatchMeta::new(frames)]);
        let pipeline = Pipeline::with_engine(
            "p",
            PipelineSettings {
                max_batch_frames: 3,
                ..settings()
            },
            Box::new(engine),
        );
        pipeline.add_component(source("src")).unwrap();
        pipeline.play().unwrap();
        wait_for(&pipeline, PipelineState::Null);
        pipeline.stop().unwrap();
        assert_eq!(pipeline.stats().dropped_frames, 1);
    }
}

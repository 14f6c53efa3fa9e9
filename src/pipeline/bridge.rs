//! Thread boundary between the control handle and the processing thread.
//!
//! The control side only ever sends commands; everything the processing
//! thread reports back goes through the shared state and the listener lists.
//! Sends never block: the requested pause/stop state is latched before the
//! command is queued, so a full queue only means a wake-up is already pending.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Commands sent from the control context to the processing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Stop pulling buffers until `Resume` or `Stop`.
    Pause,
    /// Continue pulling buffers.
    Resume,
    /// Leave the run loop and release the engine.
    Stop,
}

#[derive(Debug, Default)]
struct Latch {
    paused: AtomicBool,
    stopped: AtomicBool,
}

/// Control-side handle for the processing thread's command queue.
#[derive(Debug, Clone)]
pub struct PipelineBridge {
    cmd_tx: Sender<PipelineCommand>,
    latch: Arc<Latch>,
}

/// Processing-side end of the bridge.
#[derive(Debug)]
pub struct CommandInbox {
    cmd_rx: Receiver<PipelineCommand>,
    latch: Arc<Latch>,
}

impl PipelineBridge {
    /// Create a bridge and the inbox the processing thread owns.
    pub fn new(capacity: usize) -> (Self, CommandInbox) {
        let (cmd_tx, cmd_rx) = bounded(capacity.max(1));
        let latch = Arc::new(Latch::default());
        (
            Self {
                cmd_tx,
                latch: latch.clone(),
            },
            CommandInbox { cmd_rx, latch },
        )
    }

    /// Returns false once the processing thread has gone away.
    pub fn send_command(&self, cmd: PipelineCommand) -> bool {
        match cmd {
            PipelineCommand::Pause => self.latch.paused.store(true, Ordering::Release),
            PipelineCommand::Resume => self.latch.paused.store(false, Ordering::Release),
            PipelineCommand::Stop => self.latch.stopped.store(true, Ordering::Release),
        }
        match self.cmd_tx.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(cmd)) => {
                tracing::debug!("Command queue full, {:?} latched for the processing thread", cmd);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn pause(&self) -> bool {
        self.send_command(PipelineCommand::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send_command(PipelineCommand::Resume)
    }

    pub fn stop(&self) -> bool {
        self.send_command(PipelineCommand::Stop)
    }
}

impl CommandInbox {
    /// Drain queued wake-ups and report whether the loop should keep
    /// pulling buffers. Blocks while paused. Returns false on stop or
    /// once the control side is gone.
    pub fn proceed(&self) -> bool {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return false,
            }
            if self.latch.stopped.load(Ordering::Acquire) {
                return false;
            }
            if !self.latch.paused.load(Ordering::Acquire) {
                return true;
            }
            if self.cmd_rx.recv().is_err() {
                return false;
            }
        }
    }

    /// Queued commands, for inspection.
    pub fn pending(&self) -> Vec<PipelineCommand> {
        self.cmd_rx.try_iter().collect()
    }
}

//! Message sink adapter: the boundary between the per-frame path and a
//! remote broker.
//!
//! The processing thread hands message records over with [`MessageSinkAdapter::submit`],
//! which never blocks. A background publisher thread owns the broker client,
//! converts records to payloads and publishes them with bounded retries.
//! Every outcome that is not a plain success on the first try is reported
//! on the channel returned by [`MessageSinkAdapter::reports`]; first-try
//! successes only bump [`MessageSinkAdapter::published_count`], so they can
//! never crowd failures out of the bounded report channel.

use crate::config::MessageSinkTuning;
use crate::error::{OdeError, Result, ResultCode};
use crate::types::MessageRecord;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

// ── Boundaries ──────────────────────────────────────────────────────────

/// Transport to a remote message broker.
#[cfg_attr(test, mockall::automock)]
pub trait BrokerClient: Send {
    /// Open the connection described by the sink settings.
    fn connect(&mut self, settings: &MessageSinkSettings) -> Result<()>;

    /// Publish one payload. Connection problems are `ConnectionFailure`.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    fn disconnect(&mut self) {}
}

/// Turns message records into broker payloads.
pub trait PayloadConverter: Send + Sync {
    fn convert(&self, record: &MessageRecord) -> Result<Vec<u8>>;
}

/// Payload layout produced by [`JsonPayloadConverter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSchema {
    /// Every record field.
    #[default]
    Full,
    /// Event identity only: trigger, source, frame, class and track.
    Minimal,
}

/// JSON payloads via `serde_json`.
#[derive(Debug, Clone, Default)]
pub struct JsonPayloadConverter {
    schema: PayloadSchema,
}

impl JsonPayloadConverter {
    pub fn new(schema: PayloadSchema) -> Self {
        Self { schema }
    }
}

impl PayloadConverter for JsonPayloadConverter {
    fn convert(&self, record: &MessageRecord) -> Result<Vec<u8>> {
        let bytes = match self.schema {
            PayloadSchema::Full => serde_json::to_vec(record),
            PayloadSchema::Minimal => serde_json::to_vec(&serde_json::json!({
                "trigger": record.trigger,
                "source": record.source_name,
                "frame": record.frame_number,
                "class_id": record.object.as_ref().map(|o| o.class_id),
                "track_id": record.object.as_ref().map(|o| o.track_id),
            })),
        };
        bytes.map_err(|e| OdeError::InvalidParameter(format!("payload conversion failed: {}", e)))
    }
}

// ── Settings and reports ────────────────────────────────────────────────

/// Per-sink broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSinkSettings {
    pub topic: String,
    pub connection_string: String,
    #[serde(default)]
    pub converter_config: Option<PathBuf>,
    #[serde(default)]
    pub broker_config: Option<PathBuf>,
    #[serde(default)]
    pub payload_schema: PayloadSchema,
}

impl MessageSinkSettings {
    pub fn new(topic: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            connection_string: connection_string.into(),
            converter_config: None,
            broker_config: None,
            payload_schema: PayloadSchema::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(OdeError::InvalidParameter(
                "message sink topic must not be empty".to_string(),
            ));
        }
        if self.connection_string.trim().is_empty() {
            return Err(OdeError::InvalidParameter(
                "message sink connection string must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why records were dropped before reaching the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    NotRunning,
}

/// Publisher outcome delivered on the report channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishReport {
    /// Published after at least one failed attempt.
    Published {
        sink: String,
        topic: String,
        bytes: usize,
        attempts: u32,
    },
    Failed {
        sink: String,
        trigger: String,
        attempts: u32,
        error: String,
    },
    Dropped {
        sink: String,
        records: usize,
        reason: DropReason,
    },
    ConnectionLost {
        sink: String,
        error: String,
    },
}

// ── Adapter ─────────────────────────────────────────────────────────────

struct Publisher {
    queue: Sender<Vec<MessageRecord>>,
    handle: JoinHandle<Box<dyn BrokerClient>>,
}

struct AdapterState {
    /// Present while the publisher is stopped.
    client: Option<Box<dyn BrokerClient>>,
    publisher: Option<Publisher>,
}

pub struct MessageSinkAdapter {
    name: String,
    settings: MessageSinkSettings,
    tuning: MessageSinkTuning,
    converter: Arc<dyn PayloadConverter>,
    /// Sender half of the running publisher's queue, cloned out for `submit`.
    queue: Mutex<Option<Sender<Vec<MessageRecord>>>>,
    state: Mutex<AdapterState>,
    report_tx: Sender<PublishReport>,
    report_rx: Receiver<PublishReport>,
    published: Arc<AtomicU64>,
}

impl fmt::Debug for MessageSinkAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSinkAdapter")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MessageSinkAdapter {
    pub fn new(
        name: impl Into<String>,
        settings: MessageSinkSettings,
        tuning: MessageSinkTuning,
        client: Box<dyn BrokerClient>,
        converter: Arc<dyn PayloadConverter>,
    ) -> Result<Self> {
        settings.validate()?;
        let (report_tx, report_rx) = bounded(tuning.report_capacity.max(1));
        Ok(Self {
            name: name.into(),
            settings,
            tuning,
            converter,
            queue: Mutex::new(None),
            state: Mutex::new(AdapterState {
                client: Some(client),
                publisher: None,
            }),
            report_tx,
            report_rx,
            published: Arc::new(AtomicU64::new(0)),
        })
    }

    /// JSON converter built from the settings' payload schema.
    pub fn with_json(
        name: impl Into<String>,
        settings: MessageSinkSettings,
        tuning: MessageSinkTuning,
        client: Box<dyn BrokerClient>,
    ) -> Result<Self> {
        let converter = Arc::new(JsonPayloadConverter::new(settings.payload_schema));
        Self::new(name, settings, tuning, client, converter)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &MessageSinkSettings {
        &self.settings
    }

    /// Receiver for publisher outcomes. Every clone shares the same queue.
    pub fn reports(&self) -> Receiver<PublishReport> {
        self.report_rx.clone()
    }

    /// Payloads the broker accepted, across restarts.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.queue_guard().is_some()
    }

    fn queue_guard(&self) -> MutexGuard<'_, Option<Sender<Vec<MessageRecord>>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_guard(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background publisher. A no-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state_guard();
        if state.publisher.is_some() {
            return Ok(());
        }
        let client = state.client.take().ok_or_else(|| {
            OdeError::ResourceUnavailable(format!("broker client of '{}' is unavailable", self.name))
        })?;

        let (queue_tx, queue_rx) = bounded(self.tuning.queue_capacity.max(1));
        let worker = PublisherWorker {
            sink: self.name.clone(),
            settings: self.settings.clone(),
            tuning: self.tuning.clone(),
            converter: self.converter.clone(),
            reports: self.report_tx.clone(),
            published: self.published.clone(),
            client,
            connected: false,
        };
        let handle = std::thread::Builder::new()
            .name(format!("msg-sink-{}", self.name))
            .spawn(move || worker.run(queue_rx))?;

        *self.queue_guard() = Some(queue_tx.clone());
        state.publisher = Some(Publisher {
            queue: queue_tx,
            handle,
        });
        tracing::info!("Message sink '{}' publisher started", self.name);
        Ok(())
    }

    /// Stop the publisher after it drains what is already queued. Idempotent.
    pub fn stop(&self) {
        self.queue_guard().take();
        let mut state = self.state_guard();
        let Some(publisher) = state.publisher.take() else {
            return;
        };
        drop(publisher.queue);
        match publisher.handle.join() {
            Ok(client) => state.client = Some(client),
            Err(_) => tracing::error!("Message sink '{}' publisher panicked", self.name),
        }
        tracing::info!("Message sink '{}' publisher stopped", self.name);
    }

    /// Hand records to the publisher without blocking.
    pub fn submit(&self, records: Vec<MessageRecord>) {
        if records.is_empty() {
            return;
        }
        let queue = self.queue_guard().clone();
        let count = records.len();
        let reason = match queue {
            None => DropReason::NotRunning,
            Some(queue) => match queue.try_send(records) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => DropReason::QueueFull,
                Err(TrySendError::Disconnected(_)) => DropReason::NotRunning,
            },
        };
        tracing::warn!(
            "Message sink '{}' dropped {} record(s): {:?}",
            self.name,
            count,
            reason
        );
        report(
            &self.report_tx,
            PublishReport::Dropped {
                sink: self.name.clone(),
                records: count,
                reason,
            },
        );
    }
}

impl Drop for MessageSinkAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn report(tx: &Sender<PublishReport>, report: PublishReport) {
    if let Err(TrySendError::Full(report)) = tx.try_send(report) {
        tracing::warn!("Report channel full, discarding {:?}", report);
    }
}

// ── Publisher thread ────────────────────────────────────────────────────

struct PublisherWorker {
    sink: String,
    settings: MessageSinkSettings,
    tuning: MessageSinkTuning,
    converter: Arc<dyn PayloadConverter>,
    reports: Sender<PublishReport>,
    published: Arc<AtomicU64>,
    client: Box<dyn BrokerClient>,
    connected: bool,
}

impl PublisherWorker {
    fn run(mut self, queue: Receiver<Vec<MessageRecord>>) -> Box<dyn BrokerClient> {
        tracing::debug!("Publisher for '{}' running", self.sink);
        for batch in queue.iter() {
            for record in &batch {
                self.publish_record(record);
            }
        }
        if self.connected {
            self.client.disconnect();
        }
        tracing::debug!("Publisher for '{}' exiting", self.sink);
        self.client
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if !self.connected {
            self.client.connect(&self.settings)?;
            self.connected = true;
            tracing::info!(
                "Message sink '{}' connected to '{}'",
                self.sink,
                self.settings.connection_string
            );
        }
        Ok(())
    }

    fn publish_record(&mut self, record: &MessageRecord) {
        let payload = match self.converter.convert(record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Message sink '{}' conversion failed: {}", self.sink, e);
                self.failed(record, 0, e.to_string());
                return;
            }
        };

        let max_attempts = self.tuning.max_publish_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            let outcome = self
                .ensure_connected()
                .and_then(|()| self.client.publish(&self.settings.topic, &payload));
            match outcome {
                Ok(()) => {
                    tracing::trace!(
                        "Message sink '{}' published {} bytes (attempt {})",
                        self.sink,
                        payload.len(),
                        attempt
                    );
                    self.published.fetch_add(1, Ordering::Relaxed);
                    if attempt > 1 {
                        report(
                            &self.reports,
                            PublishReport::Published {
                                sink: self.sink.clone(),
                                topic: self.settings.topic.clone(),
                                bytes: payload.len(),
                                attempts: attempt,
                            },
                        );
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Message sink '{}' publish attempt {}/{} failed: {}",
                        self.sink,
                        attempt,
                        max_attempts,
                        e
                    );
                    if e.code() == ResultCode::ConnectionFailure && self.connected {
                        self.connected = false;
                        report(
                            &self.reports,
                            PublishReport::ConnectionLost {
                                sink: self.sink.clone(),
                                error: e.to_string(),
                            },
                        );
                    }
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        std::thread::sleep(Duration::from_millis(self.tuning.retry_backoff_ms));
                    }
                }
            }
        }
        self.failed(record, max_attempts, last_error);
    }

    fn failed(&self, record: &MessageRecord, attempts: u32, error: String) {
        report(
            &self.reports,
            PublishReport::Failed {
                sink: self.sink.clone(),
                trigger: record.trigger.clone(),
                attempts,
                error,
            },
        );
    }
}

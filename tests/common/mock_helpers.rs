//! Recording doubles for the print writer and the broker client

use odeflow::sink::{BrokerClient, MessageSinkSettings};
use odeflow::{OdeError, Result};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// `Write` sink whose contents can be inspected after the writer is handed off
#[derive(Clone, Default)]
pub struct RecordingWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    /// Non-empty lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Everything a [`RecordingBroker`] saw
#[derive(Debug, Default)]
pub struct BrokerLog {
    pub connects: usize,
    pub published: Vec<(String, Vec<u8>)>,
    pub disconnects: usize,
}

/// Broker client that records publishes, optionally failing the first few
#[derive(Clone, Default)]
pub struct RecordingBroker {
    log: Arc<Mutex<BrokerLog>>,
    failures_left: Arc<Mutex<usize>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publish calls with `ConnectionFailure`
    pub fn failing(self, count: usize) -> Self {
        *self.failures_left.lock().unwrap() = count;
        self
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.log.lock().unwrap().published.clone()
    }

    pub fn connects(&self) -> usize {
        self.log.lock().unwrap().connects
    }
}

impl BrokerClient for RecordingBroker {
    fn connect(&mut self, _settings: &MessageSinkSettings) -> Result<()> {
        self.log.lock().unwrap().connects += 1;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut failures = self.failures_left.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(OdeError::ConnectionFailure("broker unreachable".to_string()));
        }
        self.log
            .lock()
            .unwrap()
            .published
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.log.lock().unwrap().disconnects += 1;
    }
}

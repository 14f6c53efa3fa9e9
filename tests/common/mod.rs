//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use odeflow::{Pipeline, PipelineState};
use std::time::{Duration, Instant};

pub const PERSON: u16 = 2;
pub const VEHICLE: u16 = 0;

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll until `condition` holds or the test timeout expires
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Wait for a pipeline to reach `state`, panicking on timeout
pub fn wait_for_state(pipeline: &Pipeline, state: PipelineState) {
    assert!(
        wait_until(|| pipeline.state() == state),
        "pipeline '{}' stayed {} instead of reaching {}",
        pipeline.name(),
        pipeline.state(),
        state
    );
}

//! Recording [`MediaHost`] for tests, available with the `test-utils` feature.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{MediaHost, SourceResponse};

#[derive(Debug, Default)]
struct Log {
    responses: Vec<SourceResponse>,
    errors: Vec<String>,
}

/// Keeps every response and error report, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingHost {
    log: Mutex<Log>,
    arrived: Condvar,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `done(responses, errors)` holds or `timeout` elapses.
    pub fn wait_until(
        &self,
        timeout: Duration,
        done: impl Fn(&[SourceResponse], &[String]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut log = self.log.lock();
        while !done(&log.responses, &log.errors) {
            if self.arrived.wait_until(&mut log, deadline).timed_out() {
                return done(&log.responses, &log.errors);
            }
        }
        true
    }

    /// Block until at least `count` responses arrived.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |responses, _| responses.len() >= count)
    }

    pub fn len(&self) -> usize {
        self.log.lock().responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the responses received so far.
    pub fn take(&self) -> Vec<SourceResponse> {
        std::mem::take(&mut self.log.lock().responses)
    }

    pub fn errors(&self) -> Vec<String> {
        self.log.lock().errors.clone()
    }
}

impl MediaHost for RecordingHost {
    fn deliver(&self, response: SourceResponse) {
        self.log.lock().responses.push(response);
        self.arrived.notify_all();
    }

    fn report_error(&self, error: &str) {
        self.log.lock().errors.push(error.to_owned());
        self.arrived.notify_all();
    }
}

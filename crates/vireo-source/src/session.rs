use std::{
    collections::HashSet,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use tracing::Span;

/// Per-controller logging context.
///
/// Carries the session id that tags every log line of the worker and the
/// set of messages that are only logged once per session.
#[derive(Debug)]
pub struct SessionContext {
    id: u64,
    logged: Mutex<HashSet<&'static str>>,
}

impl SessionContext {
    pub fn new() -> Self {
        let id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self::with_id(id)
    }

    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            logged: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `true` the first time `key` is seen in this session.
    pub fn log_once(&self, key: &'static str) -> bool {
        self.logged.lock().insert(key)
    }

    pub fn span(&self) -> Span {
        tracing::info_span!("source", session = self.id)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_once_fires_once() {
        let session = SessionContext::with_id(7);
        assert!(session.log_once("miss"));
        assert!(!session.log_once("miss"));
        assert!(session.log_once("parse"));
        assert_eq!(session.id(), 7);
    }
}

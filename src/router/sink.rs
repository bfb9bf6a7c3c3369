//! Error sinks for dropped events
//!
//! A bad event is reported here and dropped; routing carries on with the
//! next one.

use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use crate::types::SyncCacheError;

/// Receives every event the router refuses to apply
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &SyncCacheError, context: &str);
}

/// Logs bad inbound data at WARN and collaborator bugs at ERROR
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &SyncCacheError, context: &str) {
        if error.is_data_error() {
            warn!(context = context, error = %error, "Dropped inbound event");
        } else {
            error!(context = context, error = %error, "Dropped event after contract violation");
        }
    }
}

/// Keeps reported errors in memory, and logs them like [`TracingErrorSink`]
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    reports: Mutex<Vec<String>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far
    pub fn reports(&self) -> Vec<String> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, error: &SyncCacheError, context: &str) {
        TracingErrorSink.report(error, context);
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(format!("{}: {}", context, error));
        }
    }
}

impl<S: ErrorSink + ?Sized> ErrorSink for Arc<S> {
    fn report(&self, error: &SyncCacheError, context: &str) {
        (**self).report(error, context);
    }
}

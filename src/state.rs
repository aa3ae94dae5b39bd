//! Shared in-process state, passed by handle instead of living in module
//! globals. All mutation goes through the locks owned here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::fpl::client::FplError;

/// Process-wide upstream health marker. A transient upstream failure flips
/// the degraded flag and records the error; a later success clears it.
/// Degradation never interrupts scheduling — callers keep serving the last
/// good snapshot.
#[derive(Clone)]
pub struct UpstreamHealth {
    inner: Arc<RwLock<HealthInner>>,
}

#[derive(Debug, Clone, Default, Serialize)]
struct HealthInner {
    degraded: bool,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
}

/// Read-only view of the health state.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub degraded: bool,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl UpstreamHealth {
    pub fn new() -> Self {
        UpstreamHealth {
            inner: Arc::new(RwLock::new(HealthInner::default())),
        }
    }

    /// Pass a client result through, updating the degraded flag. `NotFound`
    /// is semantic absence, not degradation, and leaves the flag untouched.
    pub fn track<T>(&self, result: Result<T, FplError>) -> Result<T, FplError> {
        match &result {
            Ok(_) => self.mark_ok(),
            Err(e) if e.is_degraded() => self.mark_degraded(&e.to_string()),
            Err(_) => {}
        }
        result
    }

    pub fn mark_degraded(&self, error: &str) {
        let mut inner = self.inner.write().unwrap();
        if !inner.degraded {
            warn!("upstream degraded: {}", error);
        }
        inner.degraded = true;
        inner.last_error = Some(error.to_string());
        inner.last_error_at = Some(Utc::now());
    }

    pub fn mark_ok(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.degraded = false;
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.read().unwrap();
        HealthSnapshot {
            degraded: inner.degraded,
            last_error: inner.last_error.clone(),
            last_error_at: inner.last_error_at,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.read().unwrap().degraded
    }
}

impl Default for UpstreamHealth {
    fn default() -> Self {
        Self::new()
    }
}

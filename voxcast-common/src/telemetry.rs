//! Telemetry recorder
//!
//! Append-only bounded ring buffer of structured diagnostic events. Every
//! component above this one records into the same sink; the debug bundle
//! export serializes the whole ring.
//!
//! Recording never fails and never blocks on consumers: once the ring is at
//! capacity the oldest event is evicted.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default ring capacity
pub const DEFAULT_CAPACITY: usize = 500;

/// Severity of a telemetry event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for TelemetryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryLevel::Debug => write!(f, "debug"),
            TelemetryLevel::Info => write!(f, "info"),
            TelemetryLevel::Warn => write!(f, "warn"),
            TelemetryLevel::Error => write!(f, "error"),
        }
    }
}

/// One recorded diagnostic event, immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Monotonically increasing id (never reused, survives eviction)
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: TelemetryLevel,
    /// Component category, e.g. "focus", "scheduler", "synthesis"
    pub category: String,
    pub message: String,
    /// Optional structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

struct Inner {
    next_id: u64,
    events: VecDeque<TelemetryEvent>,
}

/// Bounded ring of telemetry events
///
/// Thread-safe; the lock is held only for the append/copy itself.
pub struct TelemetryRecorder {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl TelemetryRecorder {
    /// Create a recorder with the given ring capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                events: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Append one event, evicting the oldest if the ring is full
    ///
    /// Also mirrors the event to `tracing` at the matching level so that
    /// telemetry and log output stay in sync.
    pub fn record(
        &self,
        level: TelemetryLevel,
        category: &str,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> u64 {
        let message = message.into();

        match level {
            TelemetryLevel::Debug => tracing::debug!(category, "{message}"),
            TelemetryLevel::Info => tracing::info!(category, "{message}"),
            TelemetryLevel::Warn => tracing::warn!(category, "{message}"),
            TelemetryLevel::Error => tracing::error!(category, "{message}"),
        }

        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;

        if inner.events.len() >= self.capacity {
            inner.events.pop_front();
        }

        inner.events.push_back(TelemetryEvent {
            id,
            timestamp: Utc::now(),
            level,
            category: category.to_string(),
            message,
            payload,
        });

        id
    }

    /// Append at `info` level
    pub fn info(&self, category: &str, message: impl Into<String>) -> u64 {
        self.record(TelemetryLevel::Info, category, message, None)
    }

    /// Append at `warn` level
    pub fn warn(&self, category: &str, message: impl Into<String>) -> u64 {
        self.record(TelemetryLevel::Warn, category, message, None)
    }

    /// Append at `error` level
    pub fn error(&self, category: &str, message: impl Into<String>) -> u64 {
        self.record(TelemetryLevel::Error, category, message, None)
    }

    /// Append at `debug` level
    pub fn debug(&self, category: &str, message: impl Into<String>) -> u64 {
        self.record(TelemetryLevel::Debug, category, message, None)
    }

    /// Copy out the current ring contents, oldest first
    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        let inner = self.inner.lock().unwrap();
        inner.events.iter().cloned().collect()
    }

    /// Number of events currently held
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    /// True if nothing has been recorded (or everything evicted)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured ring capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialize the ring for the debug bundle export
    pub fn export(&self) -> serde_json::Value {
        let events = self.snapshot();
        serde_json::json!({
            "capacity": self.capacity,
            "count": events.len(),
            "events": events,
        })
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ========================================
// Tests
// ========================================

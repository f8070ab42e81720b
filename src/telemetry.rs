//! Telemetry port and a bounded in-memory buffer (§5 "Backpressure").

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::TelemetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Normal,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub name: String,
    pub priority: EventPriority,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait Telemetry: Send + Sync {
    fn record(&self, event: TelemetryEvent);
    fn pending(&self) -> usize;
    async fn flush(&self) -> Vec<TelemetryEvent>;
}

/// Bounded ring buffer: once `batch_size` events accumulate, the oldest
/// non-critical event is dropped to make room (§5).
pub struct BufferedTelemetry {
    config: TelemetryConfig,
    buffer: Mutex<VecDeque<TelemetryEvent>>,
}

impl BufferedTelemetry {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            buffer: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl Telemetry for BufferedTelemetry {
    fn record(&self, event: TelemetryEvent) {
        if !self.config.enabled {
            return;
        }
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.config.batch_size {
            let drop_at = buffer.iter().position(|e| e.priority != EventPriority::Critical);
            match drop_at {
                Some(idx) => {
                    buffer.remove(idx);
                }
                None => {
                    // everything queued is critical; drop the oldest anyway
                    // rather than grow unboundedly.
                    buffer.pop_front();
                }
            }
        }
        buffer.push_back(event);
    }

    fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    async fn flush(&self) -> Vec<TelemetryEvent> {
        let mut buffer = self.buffer.lock();
        buffer.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, priority: EventPriority) -> TelemetryEvent {
        TelemetryEvent {
            name: name.to_string(),
            priority,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn disabled_telemetry_records_nothing() {
        let telemetry = BufferedTelemetry::new(TelemetryConfig {
            enabled: false,
            ..TelemetryConfig::default()
        });
        telemetry.record(event("e1", EventPriority::Normal));
        assert_eq!(telemetry.pending(), 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_non_critical_event() {
        let telemetry = BufferedTelemetry::new(TelemetryConfig {
            enabled: true,
            batch_size: 2,
            ..TelemetryConfig::default()
        });
        telemetry.record(event("e1", EventPriority::Normal));
        telemetry.record(event("e2", EventPriority::Critical));
        telemetry.record(event("e3", EventPriority::Normal));
        let flushed = telemetry.flush().await;
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().any(|e| e.name == "e2"));
        assert!(flushed.iter().any(|e| e.name == "e3"));
    }
}

//! In-memory request telemetry.
//!
//! A bounded ring buffer of per-request usage records plus running totals,
//! backing the `/stats` snapshot. The snapshot is best-effort: it is not
//! linearizable with in-flight recordings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

const MAX_RECORDS: usize = 1000;
const SNAPSHOT_TAIL: usize = 10;

/// One completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub model: String,
    pub user: String,
    pub status: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TelemetryTotals {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Telemetry monitor with FIFO-evicting record storage.
pub struct TelemetryMonitor {
    enabled: AtomicBool,
    totals: RwLock<TelemetryTotals>,
    records: RwLock<VecDeque<UsageRecord>>,
}

impl TelemetryMonitor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            totals: RwLock::new(TelemetryTotals::default()),
            records: RwLock::new(VecDeque::with_capacity(MAX_RECORDS)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub async fn record(&self, record: UsageRecord) {
        if !self.is_enabled() {
            return;
        }

        {
            let mut totals = self.totals.write().await;
            totals.total_requests += 1;
            if record.status == "ok" {
                totals.success_count += 1;
            } else {
                totals.error_count += 1;
            }
            totals.total_input_tokens += u64::from(record.input_tokens);
            totals.total_output_tokens += u64::from(record.output_tokens);
            totals.total_duration_ms += record.duration_ms;
        }

        let mut records = self.records.write().await;
        while records.len() >= MAX_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Best-effort snapshot: totals, averages, and the last few records.
    pub async fn snapshot(&self) -> serde_json::Value {
        let totals = *self.totals.read().await;
        let records = self.records.read().await;

        let avg_input = if totals.total_requests > 0 {
            totals.total_input_tokens as f64 / totals.total_requests as f64
        } else {
            0.0
        };
        let avg_output = if totals.total_requests > 0 {
            totals.total_output_tokens as f64 / totals.total_requests as f64
        } else {
            0.0
        };
        let avg_duration_ms = if totals.total_requests > 0 {
            totals.total_duration_ms as f64 / totals.total_requests as f64
        } else {
            0.0
        };

        let recent: Vec<&UsageRecord> =
            records.iter().rev().take(SNAPSHOT_TAIL).collect();

        json!({
            "enabled": self.is_enabled(),
            "totals": totals,
            "averages": {
                "input_tokens": avg_input,
                "output_tokens": avg_output,
                "duration_ms": avg_duration_ms,
            },
            "recent": recent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str, input: u32, output: u32) -> UsageRecord {
        UsageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            endpoint: "/v1/messages".to_string(),
            model: "devstral-small".to_string(),
            user: "unknown".to_string(),
            status: status.to_string(),
            input_tokens: input,
            output_tokens: output,
            duration_ms: 100,
        }
    }

    #[tokio::test]
    async fn totals_accumulate() {
        let monitor = TelemetryMonitor::new(true);
        monitor.record(record("ok", 10, 5)).await;
        monitor.record(record("error", 3, 0)).await;

        let snap = monitor.snapshot().await;
        assert_eq!(snap["totals"]["total_requests"], 2);
        assert_eq!(snap["totals"]["success_count"], 1);
        assert_eq!(snap["totals"]["error_count"], 1);
        assert_eq!(snap["totals"]["total_input_tokens"], 13);
    }

    #[tokio::test]
    async fn ring_buffer_evicts_fifo() {
        let monitor = TelemetryMonitor::new(true);
        for i in 0..(MAX_RECORDS + 5) {
            monitor.record(record("ok", i as u32, 0)).await;
        }

        let records = monitor.records.read().await;
        assert_eq!(records.len(), MAX_RECORDS);
        // The five oldest records are gone.
        assert_eq!(records.front().unwrap().input_tokens, 5);
    }

    #[tokio::test]
    async fn snapshot_tail_is_most_recent_first() {
        let monitor = TelemetryMonitor::new(true);
        for i in 0..20u32 {
            monitor.record(record("ok", i, 0)).await;
        }

        let snap = monitor.snapshot().await;
        let recent = snap["recent"].as_array().unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0]["input_tokens"], 19);
    }

    #[tokio::test]
    async fn disabled_monitor_records_nothing() {
        let monitor = TelemetryMonitor::new(false);
        monitor.record(record("ok", 10, 5)).await;
        let snap = monitor.snapshot().await;
        assert_eq!(snap["totals"]["total_requests"], 0);
    }
}

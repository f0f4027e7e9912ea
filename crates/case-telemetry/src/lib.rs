// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-telemetry
//!
//! Structured metrics and tracing spans for the orchestrator's pipeline
//! stages. This is ambient observability, not the operator dashboard
//! (that rendering surface is out of scope) — it's what such a dashboard
//! would eventually read.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Metrics captured for a single pipeline stage run against one case
/// (extractor, committee, resolver, or submitter).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageMetrics {
    /// Which stage ran: `"extractor"`, `"committee"`, `"resolver"`, `"submitter"`.
    pub stage: String,
    /// The case this run belongs to.
    pub case_id: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// `true` if the stage completed without raising a blocking issue or error.
    pub succeeded: bool,
    /// Number of retry attempts consumed, if the stage retries (submitter).
    pub retry_attempts: u32,
    /// Number of issues raised by this stage run.
    pub issues_count: u64,
}

/// Aggregated statistics across multiple recorded stage runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSummary {
    /// Number of stage runs recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_duration_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_duration_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_duration_ms: f64,
    /// Failure rate (`!succeeded` / total runs).
    pub failure_rate: f64,
    /// Per-stage run counts (deterministic ordering).
    pub stage_counts: BTreeMap<String, usize>,
}

impl Default for MetricsSummary {
    fn default() -> Self {
        Self {
            count: 0,
            mean_duration_ms: 0.0,
            p50_duration_ms: 0.0,
            p99_duration_ms: 0.0,
            failure_rate: 0.0,
            stage_counts: BTreeMap::new(),
        }
    }
}

/// Computes a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

/// Thread-safe collector for [`StageMetrics`].
///
/// Wrap in an `Arc` to share across orchestrator workers (the inner
/// storage is already behind a `Mutex`).
#[derive(Debug, Clone)]
pub struct CaseMetrics {
    inner: Arc<Mutex<Vec<StageMetrics>>>,
}

impl Default for CaseMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CaseMetrics {
    /// Creates a new, empty collector.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Records a completed stage run.
    pub fn record(&self, metrics: StageMetrics) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.push(metrics);
    }

    /// Returns every recorded stage run.
    pub fn runs(&self) -> Vec<StageMetrics> {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.clone()
    }

    /// Number of stage runs recorded so far.
    pub fn len(&self) -> usize {
        let data = self.inner.lock().expect("metrics lock poisoned");
        data.len()
    }

    /// Whether the collector has no recorded runs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computes an aggregated summary of all recorded runs.
    pub fn summary(&self) -> MetricsSummary {
        let data = self.inner.lock().expect("metrics lock poisoned");
        if data.is_empty() {
            return MetricsSummary::default();
        }

        let count = data.len();
        let mut durations: Vec<u64> = data.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let total_duration: u64 = durations.iter().sum();
        let mean_duration_ms = total_duration as f64 / count as f64;
        let p50_duration_ms = percentile(&durations, 50.0);
        let p99_duration_ms = percentile(&durations, 99.0);

        let failures: usize = data.iter().filter(|r| !r.succeeded).count();
        let failure_rate = failures as f64 / count as f64;

        let mut stage_counts: BTreeMap<String, usize> = BTreeMap::new();
        for r in data.iter() {
            *stage_counts.entry(r.stage.clone()).or_insert(0) += 1;
        }

        MetricsSummary { count, mean_duration_ms, p50_duration_ms, p99_duration_ms, failure_rate, stage_counts }
    }

    /// Clears all recorded metrics.
    pub fn clear(&self) {
        let mut data = self.inner.lock().expect("metrics lock poisoned");
        data.clear();
    }
}

/// Point-in-time gauges for the durable queues the orchestrator depends
/// on: retry-queue depth and outbox backlog.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueGauges {
    /// Number of items currently in the retry queue.
    pub retry_queue_depth: u64,
    /// Number of outbox entries not yet marked `processed`.
    pub outbox_backlog: u64,
}

/// A structured span for tracing integration, carrying `case_id` as its
/// correlation identifier per the orchestrator's correlation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation, e.g. `"extractor.extract"`.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Creates a new span for `case_id`, pre-populated with the
    /// `case_id` attribute (the system's correlation id).
    pub fn new(name: impl Into<String>, case_id: impl Into<String>) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("case_id".to_string(), case_id.into());
        Self { name: name.into(), attributes }
    }

    /// Inserts an attribute, consuming and returning `self`.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emits the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(span_name = %self.name, attributes = ?self.attributes, "case_telemetry_span");
    }
}

/// Trait for exporting collected metrics.
pub trait TelemetryExporter: Send + Sync {
    /// Exports the given summary. Returns the serialized output on success.
    fn export(&self, summary: &MetricsSummary) -> Result<String, String>;
}

/// Exports metrics as pretty-printed JSON.
#[derive(Debug, Default)]
pub struct JsonExporter;

impl TelemetryExporter for JsonExporter {
    fn export(&self, summary: &MetricsSummary) -> Result<String, String> {
        serde_json::to_string_pretty(summary).map_err(|e| e.to_string())
    }
}

// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum number of latency samples kept for percentiles
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Per-endpoint metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub total_latency_ms: Arc<AtomicU64>,
    pub min_latency_ms: Arc<AtomicU64>,
    pub max_latency_ms: Arc<AtomicU64>,
    pub latency_samples: Arc<std::sync::Mutex<Vec<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn record_request(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.push(latency_ms);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> EndpointStats {
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if min == u64::MAX { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome counters for the teaching pipeline. Clones share the counters.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub streaming_completions: Arc<AtomicU64>,
    pub fallbacks: Arc<AtomicU64>,
    pub fallback_failures: Arc<AtomicU64>,
    pub context_failures: Arc<AtomicU64>,
    pub sentences_synthesized: Arc<AtomicU64>,
    pub synthesis_failures: Arc<AtomicU64>,
    pub persistence_failures: Arc<AtomicU64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_streaming_completion(&self) {
        self.streaming_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self, succeeded: bool) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.fallback_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_context_failure(&self) {
        self.context_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis(&self, succeeded: bool) {
        if succeeded {
            self.sentences_synthesized.fetch_add(1, Ordering::Relaxed);
        } else {
            self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineMetricsResponse {
        PipelineMetricsResponse {
            streaming_completions: self.streaming_completions.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            fallback_failures: self.fallback_failures.load(Ordering::Relaxed),
            context_failures: self.context_failures.load(Ordering::Relaxed),
            sentences_synthesized: self.sentences_synthesized.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

/// Comprehensive metrics structure
#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub teach: EndpointMetrics,
    pub pipeline: PipelineMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Serialize)]
pub struct DetailedMetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub pipeline: PipelineMetricsResponse,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Serialize)]
pub struct EndpointMetricsResponse {
    pub teach: EndpointStats,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineMetricsResponse {
    pub streaming_completions: u64,
    pub fallbacks: u64,
    pub fallback_failures: u64,
    pub context_failures: u64,
    pub sentences_synthesized: u64,
    pub synthesis_failures: u64,
    pub persistence_failures: u64,
}

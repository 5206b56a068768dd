//! Prometheus metrics collection for kickoff.
//!
//! Exposed on an HTTP endpoint (see `http.rs`). Tracks action throughput and
//! outcomes, store health and refresh traffic.
//!
//! - `kickoff_actions_total{kind, result}` - Actions processed by kind and result
//! - `kickoff_action_duration_seconds{kind}` - Action latency histogram
//! - `kickoff_refreshes_total{result}` - Refreshes emitted vs absorbed by the debouncer
//! - `kickoff_active_chats` - Live per-chat workers (gauge)

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{Once, OnceLock};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Actions processed, by kind and result code.
pub static ACTIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Actions refused by a cooldown, by kind.
pub static RATE_LIMITED: OnceLock<IntCounterVec> = OnceLock::new();

/// Store attempts that failed and were retried after backoff.
pub static STORE_RETRIES: OnceLock<IntCounter> = OnceLock::new();

/// Compare-and-swap writes that lost to a concurrent writer.
pub static VERSION_CONFLICTS: OnceLock<IntCounter> = OnceLock::new();

/// Rosters that filled and were split into teams.
pub static TEAMS_FORMED: OnceLock<IntCounter> = OnceLock::new();

/// Roster refreshes by result (emitted, absorbed).
pub static REFRESHES: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges and histograms
// ========================================================================

/// Per-chat workers currently running.
pub static ACTIVE_CHATS: OnceLock<IntGauge> = OnceLock::new();

/// Action processing latency by kind.
pub static ACTION_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

static INIT: Once = Once::new();

/// Initialize the Prometheus metrics registry.
///
/// Call at startup before any metrics are recorded; recording before `init`
/// is a no-op. Later calls do nothing.
pub fn init() {
    INIT.call_once(register_all);
}

fn register_all() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(ACTIONS, IntCounterVec::new(Opts::new("kickoff_actions_total", "Actions processed by kind and result"), &["kind", "result"]));
    register!(RATE_LIMITED, IntCounterVec::new(Opts::new("kickoff_rate_limited_total", "Actions refused by cooldown"), &["kind"]));
    register!(STORE_RETRIES, IntCounter::new("kickoff_store_retries_total", "Store attempts retried after backoff"));
    register!(VERSION_CONFLICTS, IntCounter::new("kickoff_version_conflicts_total", "Compare-and-swap version conflicts"));
    register!(TEAMS_FORMED, IntCounter::new("kickoff_teams_formed_total", "Rosters split into teams"));
    register!(REFRESHES, IntCounterVec::new(Opts::new("kickoff_refreshes_total", "Roster refreshes emitted or absorbed"), &["result"]));
    register!(ACTIVE_CHATS, IntGauge::new("kickoff_active_chats", "Per-chat workers running"));
    register!(ACTION_LATENCY, HistogramVec::new(
        HistogramOpts::new("kickoff_action_duration_seconds", "Action latency by kind")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["kind"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Record a processed action and its latency.
#[inline]
pub fn record_action(kind: &str, result: &str, duration_secs: f64) {
    if let Some(c) = ACTIONS.get() {
        c.with_label_values(&[kind, result]).inc();
    }
    if let Some(h) = ACTION_LATENCY.get() {
        h.with_label_values(&[kind]).observe(duration_secs);
    }
}

#[inline]
pub fn record_rate_limited(kind: &str) {
    if let Some(c) = RATE_LIMITED.get() {
        c.with_label_values(&[kind]).inc();
    }
}

#[inline]
pub fn record_store_retry() {
    if let Some(c) = STORE_RETRIES.get() {
        c.inc();
    }
}

#[inline]
pub fn record_version_conflict() {
    if let Some(c) = VERSION_CONFLICTS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_teams_formed() {
    if let Some(c) = TEAMS_FORMED.get() {
        c.inc();
    }
}

/// Record a refresh that reached the transport.
#[inline]
pub fn record_refresh_emitted() {
    if let Some(c) = REFRESHES.get() {
        c.with_label_values(&["emitted"]).inc();
    }
}

/// Record a refresh replaced by a newer one inside the debounce window.
#[inline]
pub fn record_refresh_absorbed() {
    if let Some(c) = REFRESHES.get() {
        c.with_label_values(&["absorbed"]).inc();
    }
}

#[inline]
pub fn chat_started() {
    if let Some(g) = ACTIVE_CHATS.get() {
        g.inc();
    }
}

#[inline]
pub fn chat_stopped() {
    if let Some(g) = ACTIVE_CHATS.get() {
        g.dec();
    }
}

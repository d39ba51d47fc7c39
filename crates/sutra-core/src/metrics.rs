use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Memory threshold above which the node reports itself degraded.
const DEGRADED_MEMORY_BYTES: i64 = 1024 * 1024 * 1024;
/// Uptime below which the node is still considered warming up.
const WARMUP_SECONDS: i64 = 30;
/// How long a source stays "active" after its last ingest.
const ACTIVE_SOURCE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Metrics tracks node throughput, health, and source activity.
#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,

    total_ingested: AtomicI64,
    total_accepted: AtomicI64,
    total_rejected: AtomicI64,
    total_queries: AtomicI64,

    ingest_rate: RateTracker,
    query_rate: RateTracker,

    active_sources: Mutex<HashMap<String, Instant>>,
}

/// RateTracker counts events inside a sliding window.
#[derive(Debug)]
pub struct RateTracker {
    events: Mutex<Vec<Instant>>,
    window: Duration,
}

impl RateTracker {
    pub fn new(window: Duration) -> Self {
        RateTracker {
            events: Mutex::new(Vec::new()),
            window,
        }
    }

    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    fn record_at(&self, at: Instant) {
        let mut events = self.events.lock();
        events.push(at);
        Self::drop_stale(&mut events, self.window);
    }

    pub fn rate(&self) -> i64 {
        let mut events = self.events.lock();
        Self::drop_stale(&mut events, self.window);
        events.len() as i64
    }

    fn drop_stale(events: &mut Vec<Instant>, window: Duration) {
        let now = Instant::now();
        events.retain(|event| now.duration_since(*event) < window);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub total_kpaks: i32,
    pub total_subjects: i32,
    pub ingest_rate_per_min: i64,
    pub query_rate_per_min: i64,
    pub uptime_seconds: i64,
    pub memory_usage_bytes: i64,
    pub cpu_usage_percent: f32,
    pub version: String,
    pub active_sources: Vec<String>,
    pub total_ingested: i64,
    pub total_accepted: i64,
    pub total_rejected: i64,
    pub total_queries: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub state: HealthState,
    pub message: String,
    pub kpak_count: i32,
    pub uptime_seconds: i64,
}

fn classify_health(uptime_seconds: i64, memory_bytes: i64) -> (HealthState, &'static str) {
    if uptime_seconds < WARMUP_SECONDS {
        return (HealthState::Degraded, "agent recently started");
    }
    if memory_bytes > DEGRADED_MEMORY_BYTES {
        return (HealthState::Degraded, "high memory usage detected");
    }
    (HealthState::Healthy, "agent is operating normally")
}

/// Resident set size of this process. Linux only; other platforms report 0
/// and the memory health check never trips there.
fn resident_memory_bytes() -> i64 {
    #[cfg(target_os = "linux")]
    {
        // Second field of /proc/self/statm is resident pages (4 KiB pages).
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<i64>().ok())
            {
                return pages * 4096;
            }
        }
    }
    0
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            started_at: Instant::now(),
            total_ingested: AtomicI64::new(0),
            total_accepted: AtomicI64::new(0),
            total_rejected: AtomicI64::new(0),
            total_queries: AtomicI64::new(0),
            ingest_rate: RateTracker::new(Duration::from_secs(60)),
            query_rate: RateTracker::new(Duration::from_secs(60)),
            active_sources: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_ingest(&self, source: &str, accepted: bool) {
        self.total_ingested.fetch_add(1, Ordering::Relaxed);
        self.ingest_rate.record();

        if accepted {
            self.total_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
        }

        self.active_sources
            .lock()
            .insert(source.to_string(), Instant::now());
    }

    pub fn record_query(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.query_rate.record();
    }

    pub fn uptime_seconds(&self) -> i64 {
        self.started_at.elapsed().as_secs() as i64
    }

    /// Sources that ingested within the last five minutes.
    pub fn active_sources(&self) -> Vec<String> {
        let now = Instant::now();
        let mut sources: Vec<String> = self
            .active_sources
            .lock()
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) < ACTIVE_SOURCE_WINDOW)
            .map(|(source, _)| source.clone())
            .collect();
        sources.sort();
        sources
    }

    pub fn snapshot(&self, total_kpaks: i32, total_subjects: i32) -> MetricsSnapshot {
        MetricsSnapshot {
            total_kpaks,
            total_subjects,
            ingest_rate_per_min: self.ingest_rate.rate(),
            query_rate_per_min: self.query_rate.rate(),
            uptime_seconds: self.uptime_seconds(),
            memory_usage_bytes: resident_memory_bytes(),
            cpu_usage_percent: 0.0,
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_sources: self.active_sources(),
            total_ingested: self.total_ingested.load(Ordering::Relaxed),
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_queries: self.total_queries.load(Ordering::Relaxed),
        }
    }

    pub fn health(&self, total_kpaks: i32) -> HealthStatus {
        let uptime = self.uptime_seconds();
        let (state, message) = classify_health(uptime, resident_memory_bytes());
        HealthStatus {
            state,
            message: message.to_string(),
            kpak_count: total_kpaks,
            uptime_seconds: uptime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_tracker_counts_recent_events() {
        let tracker = RateTracker::new(Duration::from_secs(60));
        tracker.record();
        tracker.record();
        tracker.record();
        assert_eq!(tracker.rate(), 3);
    }

    #[test]
    fn rate_tracker_drops_events_outside_the_window() {
        let tracker = RateTracker::new(Duration::from_secs(60));
        if let Some(old) = Instant::now().checked_sub(Duration::from_secs(120)) {
            tracker.record_at(old);
        }
        tracker.record();
        assert_eq!(tracker.rate(), 1);
    }

    #[test]
    fn ingest_updates_totals_and_sources() {
        let metrics = Metrics::new();
        metrics.record_ingest("scout-a", true);
        metrics.record_ingest("scout-a", false);
        metrics.record_ingest("scout-b", true);
        metrics.record_query();

        let snapshot = metrics.snapshot(2, 1);
        assert_eq!(snapshot.total_ingested, 3);
        assert_eq!(snapshot.total_accepted, 2);
        assert_eq!(snapshot.total_rejected, 1);
        assert_eq!(snapshot.total_queries, 1);
        assert_eq!(snapshot.ingest_rate_per_min, 3);
        assert_eq!(snapshot.query_rate_per_min, 1);
        assert_eq!(snapshot.active_sources, vec!["scout-a", "scout-b"]);
        assert_eq!(snapshot.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn stale_sources_are_not_active() {
        let metrics = Metrics::new();
        metrics.record_ingest("fresh", true);
        if let Some(old) = Instant::now().checked_sub(Duration::from_secs(10 * 60)) {
            metrics.active_sources.lock().insert("stale".to_string(), old);
        }
        assert_eq!(metrics.active_sources(), vec!["fresh"]);
    }

    #[test]
    fn health_is_degraded_while_warming_up() {
        let metrics = Metrics::new();
        let health = metrics.health(7);
        assert_eq!(health.state, HealthState::Degraded);
        assert_eq!(health.kpak_count, 7);
    }

    #[test]
    fn health_classification_rules() {
        assert_eq!(classify_health(5, 0).0, HealthState::Degraded);
        assert_eq!(classify_health(60, 0).0, HealthState::Healthy);
        assert_eq!(
            classify_health(60, 2 * 1024 * 1024 * 1024).0,
            HealthState::Degraded
        );
    }
}

// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - Because if you can't measure it, it didn't happen
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters for the whole pipeline, from "anchors seen" all the way to
// "phone actually buzzed". In watch mode a tiny HTTP server serves the
// snapshot as JSON so you can tell the difference between "nothing for sale"
// and "every site has blocked us".

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info};

use crate::circuit_breaker::{CircuitBreakerSnapshot, HostBreakers};
use crate::dedup::DedupSnapshot;
use crate::models::{ScanRun, ScanState};

/// The metrics snapshot - what gets serialized to JSON
#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub scans_completed: u64,
    pub scans_cancelled: u64,
    pub urls_scanned: u64,
    pub fetch_errors: u64,
    pub anchors_seen: u64,
    pub candidates: u64,
    pub matches: u64,
    pub excluded: u64,
    pub duplicates_suppressed: u64,
    pub notifications_queued: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notifications_dropped: u64,
    pub uptime_seconds: u64,
    pub matches_per_hour: f64,
    pub dedup: Option<DedupSnapshot>,
    pub last_scan_summary: Option<String>,
    pub status: String,
}

/// Thread-safe atomic metrics collector
pub struct MetricsCollector {
    scans_completed: AtomicU64,
    scans_cancelled: AtomicU64,
    urls_scanned: AtomicU64,
    fetch_errors: AtomicU64,
    anchors_seen: AtomicU64,
    candidates: AtomicU64,
    matches: AtomicU64,
    excluded: AtomicU64,
    duplicates: AtomicU64,
    notifications_queued: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    notifications_dropped: AtomicU64,
    dedup: Mutex<Option<DedupSnapshot>>,
    last_scan_summary: Mutex<Option<String>>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            scans_completed: AtomicU64::new(0),
            scans_cancelled: AtomicU64::new(0),
            urls_scanned: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            anchors_seen: AtomicU64::new(0),
            candidates: AtomicU64::new(0),
            matches: AtomicU64::new(0),
            excluded: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            notifications_queued: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            dedup: Mutex::new(None),
            last_scan_summary: Mutex::new(None),
            start_time: Instant::now(),
        }
    }

    pub fn increment_notifications_queued(&self) {
        self.notifications_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished scan run into the running totals.
    pub fn record_scan(&self, run: &ScanRun, dedup: DedupSnapshot) {
        match run.state {
            ScanState::Completed => {
                self.scans_completed.fetch_add(1, Ordering::Relaxed);
            }
            ScanState::Cancelled => {
                self.scans_cancelled.fetch_add(1, Ordering::Relaxed);
            }
            ScanState::Idle | ScanState::Running => {}
        }

        let s = &run.stats;
        self.urls_scanned.fetch_add(s.urls_scanned, Ordering::Relaxed);
        self.fetch_errors.fetch_add(run.errors.len() as u64, Ordering::Relaxed);
        self.anchors_seen.fetch_add(s.anchors_seen, Ordering::Relaxed);
        self.candidates.fetch_add(s.candidates, Ordering::Relaxed);
        self.matches.fetch_add(run.matches.len() as u64, Ordering::Relaxed);
        self.excluded.fetch_add(s.excluded, Ordering::Relaxed);
        self.duplicates.fetch_add(s.duplicates, Ordering::Relaxed);

        *self.dedup.lock() = Some(dedup);
        *self.last_scan_summary.lock() = Some(run.to_string());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        let matches = self.matches.load(Ordering::Relaxed);
        let matches_per_hour = if uptime > 0 {
            (matches as f64 / uptime as f64) * 3600.0
        } else {
            0.0
        };

        MetricsSnapshot {
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_cancelled: self.scans_cancelled.load(Ordering::Relaxed),
            urls_scanned: self.urls_scanned.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            anchors_seen: self.anchors_seen.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            matches,
            excluded: self.excluded.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates.load(Ordering::Relaxed),
            notifications_queued: self.notifications_queued.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            matches_per_hour,
            dedup: self.dedup.lock().clone(),
            last_scan_summary: self.last_scan_summary.lock().clone(),
            status: "operational".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MetricsDocument {
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    circuit_breakers: Vec<CircuitBreakerSnapshot>,
}

/// Serve the metrics snapshot as JSON on `port` until shutdown.
pub async fn run_metrics_server(
    port: u16,
    metrics: Arc<MetricsCollector>,
    breakers: Arc<HostBreakers>,
    shutdown: &mut watch::Receiver<bool>,
) {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on {}: {}", addr, e);
            return;
        }
    };

    info!("📊 Metrics server listening on http://{}", addr);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((mut stream, _addr)) => {
                        let document = MetricsDocument {
                            metrics: metrics.snapshot(),
                            circuit_breakers: breakers.snapshots(),
                        };
                        let json = serde_json::to_string_pretty(&document)
                            .unwrap_or_else(|_| "{}".to_string());

                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                            json.len(),
                            json,
                        );

                        let _ = stream.write_all(response.as_bytes()).await;
                    }
                    Err(e) => {
                        error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Metrics server: shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingCandidate, MatchResult};

    fn dedup_snapshot() -> DedupSnapshot {
        DedupSnapshot {
            total_checks: 3,
            unique_items: 2,
            duplicates_caught: 1,
            bloom_rotations: 0,
            bloom_false_positive_rescues: 0,
            lru_cache_size: 2,
        }
    }

    #[test]
    fn test_record_scan_accumulates() {
        let metrics = MetricsCollector::new();
        let mut run = ScanRun::start(vec!["https://hibid.com/lots".to_string()]);
        run.stats.anchors_seen = 10;
        run.stats.duplicates = 1;
        run.matches.push(MatchResult {
            candidate: ListingCandidate {
                normalized_text: "sony vcr".to_string(),
                canonical_url: Some("https://hibid.com/lot/1".to_string()),
                source_host: "hibid.com".to_string(),
                origin_url: "https://hibid.com/lots".to_string(),
            },
            category: "VCR".to_string(),
        });
        run.errors
            .insert("https://govdeals.com/x".to_string(), "blocked".to_string());
        let run = run.finish(ScanState::Completed);

        metrics.record_scan(&run, dedup_snapshot());
        metrics.record_scan(&run, dedup_snapshot());

        let snap = metrics.snapshot();
        assert_eq!(snap.scans_completed, 2);
        assert_eq!(snap.anchors_seen, 20);
        assert_eq!(snap.matches, 2);
        assert_eq!(snap.fetch_errors, 2);
        assert_eq!(snap.duplicates_suppressed, 2);
        assert_eq!(snap.dedup.unwrap().unique_items, 2);
        assert!(snap.last_scan_summary.unwrap().contains("COMPLETED"));
    }

    #[test]
    fn test_notification_counters() {
        let metrics = MetricsCollector::new();
        metrics.increment_notifications_queued();
        metrics.increment_notifications_sent();
        metrics.increment_notifications_failed();
        metrics.increment_notifications_dropped();
        let snap = metrics.snapshot();
        assert_eq!(
            (
                snap.notifications_queued,
                snap.notifications_sent,
                snap.notifications_failed,
                snap.notifications_dropped
            ),
            (1, 1, 1, 1)
        );
    }
}

// =============================================================================
// orchestrator.rs — THE SCAN CONDUCTOR
// =============================================================================
//
// One scan, start to finish:
//
//   for each URL, in order, one at a time:
//       cancelled?            → stop, keep what we have
//       host circuit open?    → write down an error, next URL
//       fetch anchors         → failure? write down an error, next URL
//       normalize → classify → dedup → notify → append to the run
//
// Sequential on purpose. The fetcher is a single shared resource and isn't
// built for concurrent reuse, and auction sites are quicker to block ten
// parallel requests than ten polite ones.
//
// State machine: Idle → Running → (Completed | Cancelled). The ScanRun that
// comes out the other end belongs to the caller. The orchestrator only
// keeps the dedup seen-set (and only across scans if retention says so).
// =============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::circuit_breaker::HostBreakers;
use crate::classifier::{evaluate_batch, Verdict};
use crate::dedup::Deduplicator;
use crate::error::FetchError;
use crate::fetcher::PageFetcher;
use crate::metrics::MetricsCollector;
use crate::models::{ListingCandidate, MatchResult, RawAnchor, ScanRun, ScanState};
use crate::normalizer::normalize;
use crate::notifier::{DispatchOutcome, NotificationDispatcher};
use crate::rules::KeywordRuleSet;

/// Everything a scan needs from the outside world. The rule set is shared
/// read-only for the whole scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub urls: Vec<String>,
    pub rules: Arc<KeywordRuleSet>,
    pub topic: String,
}

pub struct ScanOrchestrator<F: PageFetcher> {
    fetcher: F,
    dedup: Deduplicator,
    dispatcher: Option<NotificationDispatcher>,
    breakers: Arc<HostBreakers>,
    metrics: Arc<MetricsCollector>,
    fetch_timeout: Duration,
    state: ScanState,
}

impl<F: PageFetcher> ScanOrchestrator<F> {
    pub fn new(
        fetcher: F,
        dedup: Deduplicator,
        dispatcher: Option<NotificationDispatcher>,
        breakers: Arc<HostBreakers>,
        metrics: Arc<MetricsCollector>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            dedup,
            dispatcher,
            breakers,
            metrics,
            fetch_timeout,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Drop the notification dispatcher so the notifier worker can finish
    /// once its queue is drained.
    pub fn detach_dispatcher(&mut self) -> Option<NotificationDispatcher> {
        self.dispatcher.take()
    }

    /// Run one full scan. Cancellation is checked before every URL, never in
    /// the middle of a page.
    pub async fn run_scan(&mut self, request: &ScanRequest, cancel: &watch::Receiver<bool>) -> ScanRun {
        self.state = ScanState::Running;
        self.dedup.begin_scan();

        let urls: Vec<String> = request
            .urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();

        let mut run = ScanRun::start(urls.clone());
        info!(
            scan_id = %run.id,
            urls = urls.len(),
            categories = request.rules.categories().len(),
            exclusions = request.rules.exclusions().terms().len(),
            "🔎 Scan starting"
        );

        let mut final_state = ScanState::Completed;

        for url in &urls {
            if *cancel.borrow() {
                warn!(scan_id = %run.id, next_url = url.as_str(), "Scan cancelled — keeping matches collected so far");
                final_state = ScanState::Cancelled;
                break;
            }

            info!(url = url.as_str(), "Scanning");
            match self.fetch_page(url).await {
                Ok(anchors) => {
                    let before = run.matches.len();
                    self.process_page(&mut run, &anchors, request);
                    info!(
                        url = url.as_str(),
                        anchors = anchors.len(),
                        new_matches = run.matches.len() - before,
                        "Page processed"
                    );
                }
                Err(e) => {
                    warn!(url = url.as_str(), error = %e, "⚠️ Trouble reading page — moving on");
                    run.errors.insert(url.clone(), e.to_string());
                }
            }
            run.stats.urls_scanned += 1;
        }

        let run = run.finish(final_state);
        self.state = final_state;
        self.metrics.record_scan(&run, self.dedup.snapshot());

        info!(
            scan_id = %run.id,
            state = %run.state,
            matches = run.matches.len(),
            errors = run.errors.len(),
            duplicates = run.stats.duplicates,
            excluded = run.stats.excluded,
            "✅ Scan finished"
        );

        run
    }

    /// Scan, sleep `poll_interval`, repeat until shutdown. `on_run` sees every
    /// finished run.
    pub async fn watch<C>(
        &mut self,
        request: &ScanRequest,
        poll_interval: Duration,
        shutdown: &mut watch::Receiver<bool>,
        mut on_run: C,
    ) where
        C: FnMut(&ScanRun),
    {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let run = self.run_scan(request, shutdown).await;
            on_run(&run);
            if run.state == ScanState::Cancelled {
                break;
            }

            debug!(secs = poll_interval.as_secs(), "Sleeping until next scan");
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<Vec<RawAnchor>, FetchError> {
        let host = host_key(url);
        let breaker = self.breakers.for_host(&host);
        if !breaker.allow_request() {
            return Err(FetchError::CircuitOpen { host });
        }

        let result = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url, self.fetch_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                timeout_ms: self.fetch_timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => breaker.record_success(),
            // our typo, not the site's fault
            Err(FetchError::InvalidUrl { .. }) => {}
            Err(_) => breaker.record_failure(),
        }
        result
    }

    fn process_page(&mut self, run: &mut ScanRun, anchors: &[RawAnchor], request: &ScanRequest) {
        run.stats.anchors_seen += anchors.len() as u64;

        let candidates: Vec<ListingCandidate> = anchors.iter().filter_map(normalize).collect();
        run.stats.candidates += candidates.len() as u64;

        let verdicts = evaluate_batch(&candidates, &request.rules);

        for (candidate, verdict) in candidates.into_iter().zip(verdicts) {
            let category = match verdict {
                Verdict::Matched { category } => category,
                Verdict::Excluded { .. } => {
                    run.stats.excluded += 1;
                    continue;
                }
                Verdict::NoMatch => {
                    run.stats.unmatched += 1;
                    continue;
                }
            };

            let result = MatchResult { candidate, category };
            if !self.dedup.admit(&result) {
                run.stats.duplicates += 1;
                continue;
            }

            if let Some(dispatcher) = &self.dispatcher {
                match dispatcher.notify(&result, &request.topic) {
                    DispatchOutcome::Queued => run.stats.notifications_queued += 1,
                    DispatchOutcome::Dropped(_) => run.stats.notifications_dropped += 1,
                }
            }

            debug!(category = result.category.as_str(), item = %result, "Match admitted");
            run.matches.push(result);
        }
    }
}

/// Circuit breakers are keyed by host; unparsable URLs get their own key.
fn host_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerSettings;
    use crate::dedup::{DedupConfig, DedupRetention};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Clone)]
    enum Page {
        Anchors(Vec<(&'static str, Option<&'static str>)>),
        Fail,
        Hang,
    }

    /// Serves canned pages and remembers what was asked for.
    #[derive(Default)]
    struct ScriptedFetcher {
        pages: HashMap<String, Page>,
        calls: Mutex<Vec<String>>,
        cancel_after_first: Option<watch::Sender<bool>>,
    }

    impl ScriptedFetcher {
        fn with(mut self, url: &str, page: Page) -> Self {
            self.pages.insert(url.to_string(), page);
            self
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<RawAnchor>, FetchError> {
            self.calls.lock().push(url.to_string());
            if let Some(tx) = &self.cancel_after_first {
                let _ = tx.send(true);
            }
            match self.pages.get(url).cloned() {
                Some(Page::Anchors(anchors)) => Ok(anchors
                    .into_iter()
                    .map(|(text, href)| RawAnchor::new(text, href, url))
                    .collect()),
                Some(Page::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(vec![])
                }
                Some(Page::Fail) | None => Err(FetchError::Network("connection reset".to_string())),
            }
        }
    }

    const HIBID: &str = "https://hibid.com/lots?q=vcr&zip=40202&miles=100";
    const GOVDEALS: &str = "https://www.govdeals.com/search?kWord=vintage";

    fn vcr_page() -> Page {
        Page::Anchors(vec![
            ("Sony VCR Beta Deck", Some("/lot/1")),
            ("VCR Remote Control", Some("/lot/2")),
            ("Toaster", Some("/lot/3")),
        ])
    }

    fn rules() -> Arc<KeywordRuleSet> {
        Arc::new(KeywordRuleSet::from_raw(&[("VCR", "vcr, beta")], "remote").unwrap())
    }

    fn request(urls: &[&str]) -> ScanRequest {
        ScanRequest {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            rules: rules(),
            topic: "louisville_tech_hunter".to_string(),
        }
    }

    fn orchestrator(fetcher: ScriptedFetcher, retention: DedupRetention) -> ScanOrchestrator<ScriptedFetcher> {
        ScanOrchestrator::new(
            fetcher,
            Deduplicator::new(DedupConfig {
                retention,
                ..DedupConfig::default()
            }),
            None,
            Arc::new(HostBreakers::new(BreakerSettings::default())),
            Arc::new(MetricsCollector::new()),
            Duration::from_millis(200),
        )
    }

    fn not_cancelled() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_vcr_scenario_yields_exactly_one_match() {
        let fetcher = ScriptedFetcher::default().with(HIBID, vcr_page());
        let mut orch = orchestrator(fetcher, DedupRetention::Process);
        assert_eq!(orch.state(), ScanState::Idle);

        let run = orch.run_scan(&request(&[HIBID]), &not_cancelled()).await;

        assert_eq!(run.state, ScanState::Completed);
        assert_eq!(orch.state(), ScanState::Completed);
        assert_eq!(run.matches.len(), 1);
        assert_eq!(run.matches[0].category, "VCR");
        assert_eq!(run.matches[0].candidate.normalized_text, "sony vcr beta deck");
        assert_eq!(
            run.matches[0].candidate.canonical_url.as_deref(),
            Some("https://hibid.com/lot/1")
        );
        assert_eq!(run.stats.excluded, 1);
        assert_eq!(run.stats.unmatched, 1);
        assert!(run.errors.is_empty());

        let rows = run.rows();
        assert_eq!(rows[0].item_name, "SONY VCR BETA DECK");
        assert_eq!(rows[0].source, "hibid.com");
    }

    #[tokio::test]
    async fn test_failed_url_does_not_stop_later_urls() {
        let fetcher = ScriptedFetcher::default()
            .with(GOVDEALS, Page::Fail)
            .with(HIBID, vcr_page());
        let mut orch = orchestrator(fetcher, DedupRetention::Process);

        let run = orch.run_scan(&request(&[GOVDEALS, HIBID]), &not_cancelled()).await;

        assert_eq!(run.state, ScanState::Completed);
        assert_eq!(run.matches.len(), 1);
        assert!(run.errors[GOVDEALS].contains("connection reset"));
        assert_eq!(run.stats.urls_scanned, 2);
    }

    #[tokio::test]
    async fn test_duplicate_anchors_on_one_page_alert_once() {
        let page = Page::Anchors(vec![
            ("Sony VCR Beta Deck", Some("/lot/1")),
            ("Sony VCR Beta Deck - View Lot", Some("/lot/1")),
            ("Panasonic VCR", Some("https://hibid.com/lot/1")),
        ]);
        let fetcher = ScriptedFetcher::default().with(HIBID, page);
        let mut orch = orchestrator(fetcher, DedupRetention::PerScan);

        let run = orch.run_scan(&request(&[HIBID]), &not_cancelled()).await;
        assert_eq!(run.matches.len(), 1);
        assert_eq!(run.stats.duplicates, 2);
    }

    #[tokio::test]
    async fn test_process_retention_suppresses_across_scans() {
        let fetcher = ScriptedFetcher::default().with(HIBID, vcr_page());
        let mut orch = orchestrator(fetcher, DedupRetention::Process);
        let req = request(&[HIBID]);

        assert_eq!(orch.run_scan(&req, &not_cancelled()).await.matches.len(), 1);
        let second = orch.run_scan(&req, &not_cancelled()).await;
        assert_eq!(second.matches.len(), 0);
        assert_eq!(second.stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_per_scan_retention_realerts_each_scan() {
        let fetcher = ScriptedFetcher::default().with(HIBID, vcr_page());
        let mut orch = orchestrator(fetcher, DedupRetention::PerScan);
        let req = request(&[HIBID]);

        assert_eq!(orch.run_scan(&req, &not_cancelled()).await.matches.len(), 1);
        assert_eq!(orch.run_scan(&req, &not_cancelled()).await.matches.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_between_urls_keeps_earlier_matches() {
        let (tx, rx) = watch::channel(false);
        let fetcher = ScriptedFetcher {
            cancel_after_first: Some(tx),
            ..Default::default()
        }
        .with(HIBID, vcr_page())
        .with(GOVDEALS, vcr_page());
        let mut orch = orchestrator(fetcher, DedupRetention::Process);

        let run = orch.run_scan(&request(&[HIBID, GOVDEALS]), &rx).await;

        assert_eq!(run.state, ScanState::Cancelled);
        assert_eq!(orch.state(), ScanState::Cancelled);
        assert_eq!(run.matches.len(), 1);
        assert_eq!(run.stats.urls_scanned, 1);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_hanging_fetch_times_out() {
        let fetcher = ScriptedFetcher::default()
            .with(GOVDEALS, Page::Hang)
            .with(HIBID, vcr_page());
        let mut orch = orchestrator(fetcher, DedupRetention::Process);

        let run = orch.run_scan(&request(&[GOVDEALS, HIBID]), &not_cancelled()).await;
        assert!(run.errors[GOVDEALS].contains("timed out"));
        assert_eq!(run.matches.len(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_fetch() {
        let fetcher = ScriptedFetcher::default().with(GOVDEALS, Page::Fail);
        let mut orch = ScanOrchestrator::new(
            fetcher,
            Deduplicator::new(DedupConfig::default()),
            None,
            Arc::new(HostBreakers::new(BreakerSettings {
                failure_threshold: 1,
                reset_timeout: Duration::from_secs(600),
                success_threshold: 1,
            })),
            Arc::new(MetricsCollector::new()),
            Duration::from_millis(200),
        );
        let req = request(&[GOVDEALS]);

        orch.run_scan(&req, &not_cancelled()).await;
        let second = orch.run_scan(&req, &not_cancelled()).await;

        assert!(second.errors[GOVDEALS].contains("circuit breaker open"));
        assert_eq!(orch.fetcher.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_drop_does_not_change_results() {
        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, rx) = NotificationDispatcher::bounded(4, metrics.clone());
        drop(rx);

        let fetcher = ScriptedFetcher::default().with(HIBID, vcr_page());
        let mut orch = ScanOrchestrator::new(
            fetcher,
            Deduplicator::new(DedupConfig::default()),
            Some(dispatcher),
            Arc::new(HostBreakers::new(BreakerSettings::default())),
            metrics,
            Duration::from_millis(200),
        );

        let run = orch.run_scan(&request(&[HIBID]), &not_cancelled()).await;
        assert_eq!(run.matches.len(), 1);
        assert_eq!(run.stats.notifications_dropped, 1);
        assert!(orch.detach_dispatcher().is_some());
    }

    #[tokio::test]
    async fn test_admitted_matches_are_queued_for_notification() {
        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, rx) = NotificationDispatcher::bounded(4, metrics.clone());

        let fetcher = ScriptedFetcher::default().with(HIBID, vcr_page());
        let mut orch = ScanOrchestrator::new(
            fetcher,
            Deduplicator::new(DedupConfig::default()),
            Some(dispatcher),
            Arc::new(HostBreakers::new(BreakerSettings::default())),
            metrics,
            Duration::from_millis(200),
        );

        let run = orch.run_scan(&request(&[HIBID]), &not_cancelled()).await;
        assert_eq!(run.stats.notifications_queued, 1);

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.message, "Found: sony vcr beta deck");
        assert_eq!(queued.action_url, "https://hibid.com/lot/1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_blank_urls_are_skipped_and_order_is_kept() {
        let fetcher = ScriptedFetcher::default()
            .with(HIBID, vcr_page())
            .with(GOVDEALS, Page::Anchors(vec![("Commodore 64 with VCR cart", Some("/asset/9"))]));
        let mut orch = orchestrator(fetcher, DedupRetention::Process);

        let run = orch
            .run_scan(&request(&["", HIBID, "   ", GOVDEALS]), &not_cancelled())
            .await;

        assert_eq!(run.urls, vec![HIBID.to_string(), GOVDEALS.to_string()]);
        let links: Vec<_> = run
            .matches
            .iter()
            .map(|m| m.candidate.canonical_url.clone().unwrap())
            .collect();
        assert_eq!(
            links,
            vec!["https://hibid.com/lot/1", "https://www.govdeals.com/asset/9"]
        );
        assert_eq!(*orch.fetcher.calls.lock(), vec![HIBID.to_string(), GOVDEALS.to_string()]);
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown() {
        let fetcher = ScriptedFetcher::default().with(HIBID, vcr_page());
        let mut orch = orchestrator(fetcher, DedupRetention::Process);
        let (tx, mut rx) = watch::channel(false);

        let mut runs = 0;
        let req = request(&[HIBID]);
        let watching = orch.watch(&req, Duration::from_secs(3600), &mut rx, |_| runs += 1);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(watching, stopper);

        assert_eq!(runs, 1);
    }
}

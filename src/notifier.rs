// =============================================================================
// notifier.rs — THE POCKET BUZZER
// =============================================================================
//
// When a new listing matches, somebody's phone should buzz. But the phone
// buzz is strictly a courtesy: the scan's result table is the source of
// truth, and a slow or broken push service must never hold up the scan.
//
// Architecture:
// 1. The orchestrator calls `NotificationDispatcher::notify`, which does a
//    `try_send` onto a bounded crossbeam channel and returns immediately.
//    Queue full? The alert is dropped and counted. The scan doesn't wait.
// 2. A `NotifierWorker` on its own tokio task drains the channel and hands
//    each alert to a `NotificationTransport` under a timeout.
// 3. Every failure (network, non-2xx, timeout) is logged and counted, then
//    forgotten. No retries, no back-pressure.
//
// The shipped transport speaks ntfy: POST the message to /{topic} with a
// Click header pointing at the listing. Anyone subscribed to the topic gets
// it; topic names are not secrets.
// =============================================================================

use async_trait::async_trait;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::NotificationError;
use crate::metrics::MetricsCollector;
use crate::models::MatchResult;

/// One outbound alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub topic: String,
    pub message: String,
    pub action_url: String,
    pub category: String,
}

impl Notification {
    pub fn from_match(result: &MatchResult, topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            message: format!("Found: {}", result.candidate.normalized_text),
            action_url: result.candidate.canonical_url.clone().unwrap_or_default(),
            category: result.category.clone(),
        }
    }
}

/// Where alerts actually go.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// What happened to a `notify` call. Neither case is an error for the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    WorkerGone,
}

/// Non-blocking front door for alerts. Cheap to clone.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: Sender<Notification>,
    metrics: Arc<MetricsCollector>,
}

impl NotificationDispatcher {
    /// A dispatcher plus the receiving end for a `NotifierWorker`.
    pub fn bounded(
        capacity: usize,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, Receiver<Notification>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        (Self { sender, metrics }, receiver)
    }

    /// Queue an alert for `result`. Never blocks, never fails the caller.
    pub fn notify(&self, result: &MatchResult, topic: &str) -> DispatchOutcome {
        let notification = Notification::from_match(result, topic);

        match self.sender.try_send(notification) {
            Ok(()) => {
                self.metrics.increment_notifications_queued();
                DispatchOutcome::Queued
            }
            Err(TrySendError::Full(n)) => {
                self.metrics.increment_notifications_dropped();
                warn!(
                    url = n.action_url.as_str(),
                    "Notification queue full — alert dropped, scan carries on"
                );
                DispatchOutcome::Dropped(DropReason::QueueFull)
            }
            Err(TrySendError::Disconnected(n)) => {
                self.metrics.increment_notifications_dropped();
                warn!(
                    url = n.action_url.as_str(),
                    "Notifier worker is gone — alert dropped"
                );
                DispatchOutcome::Dropped(DropReason::WorkerGone)
            }
        }
    }
}

/// Drains the alert queue into a transport. Runs on its own task.
pub struct NotifierWorker<T: NotificationTransport> {
    transport: T,
    receiver: Receiver<Notification>,
    shutdown: watch::Receiver<bool>,
    send_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl<T: NotificationTransport> NotifierWorker<T> {
    pub fn new(
        transport: T,
        receiver: Receiver<Notification>,
        shutdown: watch::Receiver<bool>,
        send_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            transport,
            receiver,
            shutdown,
            send_timeout,
            metrics,
        }
    }

    /// Loop until shutdown (after draining what's queued) or until every
    /// dispatcher is dropped and the queue is empty.
    pub async fn run(self) {
        info!("Notifier worker online — phones on standby");

        loop {
            if *self.shutdown.borrow() {
                info!("Shutdown signal received — draining queued alerts");
                while let Ok(notification) = self.receiver.try_recv() {
                    self.deliver(&notification).await;
                }
                break;
            }

            match self.receiver.try_recv() {
                Ok(notification) => self.deliver(&notification).await,
                Err(crossbeam_channel::TryRecvError::Empty) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    debug!("All dispatchers dropped and queue empty");
                    break;
                }
            }
        }

        info!("Notifier worker offline");
    }

    async fn deliver(&self, notification: &Notification) {
        let result = match tokio::time::timeout(self.send_timeout, self.transport.send(notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout {
                timeout_secs: self.send_timeout.as_secs(),
            }),
        };

        match result {
            Ok(()) => {
                self.metrics.increment_notifications_sent();
                info!(
                    topic = notification.topic.as_str(),
                    category = notification.category.as_str(),
                    url = notification.action_url.as_str(),
                    "Alert delivered — somebody's phone just buzzed"
                );
            }
            Err(e) => {
                self.metrics.increment_notifications_failed();
                warn!(
                    error = %e,
                    topic = notification.topic.as_str(),
                    url = notification.action_url.as_str(),
                    "Alert delivery failed — swallowed, the result table still has it"
                );
            }
        }
    }
}

/// ntfy.sh (or self-hosted ntfy) transport.
pub struct NtfyTransport {
    client: reqwest::Client,
    base_url: String,
}

impl NtfyTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(topic.trim()))
    }
}

#[async_trait]
impl NotificationTransport for NtfyTransport {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(self.topic_url(&notification.topic))
            .header("Click", notification.action_url.as_str())
            .header("Title", format!("Vintage Hunter: {}", notification.category))
            .header("Tags", "mag")
            .body(notification.message.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingCandidate;
    use parking_lot::Mutex;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lot(n: u32) -> MatchResult {
        MatchResult {
            candidate: ListingCandidate {
                normalized_text: format!("sony vcr beta deck {}", n),
                canonical_url: Some(format!("https://hibid.com/lot/{}", n)),
                source_host: "hibid.com".to_string(),
                origin_url: "https://hibid.com/lots?q=vcr".to_string(),
            },
            category: "VCR".to_string(),
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationTransport for Arc<RecordingTransport> {
        async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
            if self.fail {
                return Err(NotificationError::Status { status: 500 });
            }
            self.sent.lock().push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn test_notification_message_and_link() {
        let n = Notification::from_match(&lot(1), "louisville_tech_hunter");
        assert_eq!(n.message, "Found: sony vcr beta deck 1");
        assert_eq!(n.action_url, "https://hibid.com/lot/1");
        assert_eq!(n.topic, "louisville_tech_hunter");
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, _rx) = NotificationDispatcher::bounded(1, metrics.clone());
        assert_eq!(dispatcher.notify(&lot(1), "t"), DispatchOutcome::Queued);
        assert_eq!(
            dispatcher.notify(&lot(2), "t"),
            DispatchOutcome::Dropped(DropReason::QueueFull)
        );
        assert_eq!(metrics.snapshot().notifications_dropped, 1);
    }

    #[test]
    fn test_missing_worker_drops() {
        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, rx) = NotificationDispatcher::bounded(4, metrics);
        drop(rx);
        assert_eq!(
            dispatcher.notify(&lot(1), "t"),
            DispatchOutcome::Dropped(DropReason::WorkerGone)
        );
    }

    #[tokio::test]
    async fn test_worker_delivers_then_exits_when_dispatchers_drop() {
        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, rx) = NotificationDispatcher::bounded(8, metrics.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = Arc::new(RecordingTransport::default());

        dispatcher.notify(&lot(1), "t");
        dispatcher.notify(&lot(2), "t");
        drop(dispatcher);

        NotifierWorker::new(transport.clone(), rx, shutdown_rx, Duration::from_secs(1), metrics.clone())
            .run()
            .await;

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].action_url, "https://hibid.com/lot/1");
        assert_eq!(metrics.snapshot().notifications_sent, 2);
    }

    #[tokio::test]
    async fn test_worker_swallows_failures() {
        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, rx) = NotificationDispatcher::bounded(8, metrics.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });

        dispatcher.notify(&lot(1), "t");
        drop(dispatcher);

        NotifierWorker::new(transport, rx, shutdown_rx, Duration::from_secs(1), metrics.clone())
            .run()
            .await;

        assert_eq!(metrics.snapshot().notifications_failed, 1);
    }

    #[tokio::test]
    async fn test_worker_drains_on_shutdown() {
        let metrics = Arc::new(MetricsCollector::new());
        let (dispatcher, rx) = NotificationDispatcher::bounded(8, metrics.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = Arc::new(RecordingTransport::default());

        dispatcher.notify(&lot(1), "t");
        dispatcher.notify(&lot(2), "t");
        shutdown_tx.send(true).unwrap();

        // dispatcher still alive: only the shutdown flag ends the loop
        NotifierWorker::new(transport.clone(), rx, shutdown_rx, Duration::from_secs(1), metrics)
            .run()
            .await;

        assert_eq!(transport.sent.lock().len(), 2);
        drop(dispatcher);
    }

    #[tokio::test]
    async fn test_ntfy_posts_message_with_click_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/louisville_tech_hunter"))
            .and(header("Click", "https://hibid.com/lot/1"))
            .and(body_string("Found: sony vcr beta deck 1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = NtfyTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let n = Notification::from_match(&lot(1), "louisville_tech_hunter");
        transport.send(&n).await.unwrap();
    }

    #[tokio::test]
    async fn test_ntfy_non_success_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let transport = NtfyTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = transport
            .send(&Notification::from_match(&lot(1), "busy topic"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Status { status: 429 }));
    }

    #[test]
    fn test_topic_is_url_encoded() {
        let transport = NtfyTransport::new("https://ntfy.sh/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.topic_url(" my topic "), "https://ntfy.sh/my%20topic");
    }
}

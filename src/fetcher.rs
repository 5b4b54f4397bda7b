// =============================================================================
// fetcher.rs — THE PAGE SNATCHER
// =============================================================================
//
// The pipeline doesn't care how a page gets fetched. It wants a list of
// anchors (text + href + the page they came from) or a FetchError saying
// why not. That contract is the `PageFetcher` trait.
//
// The implementation shipped here is the honest one: a plain HTTP GET and an
// HTML parse. No JavaScript, no headless browser, no scrolling to trigger
// lazy loading. Sites that render listings client-side will come back with
// zero anchors; sites that put up a bot wall come back as `Blocked`. Both are
// visible in the scan's error list / stats rather than silently "finding
// nothing".
// =============================================================================

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::models::RawAnchor;

/// Desktop Chrome. Some auction sites serve an empty shell to anything that
/// looks like a script.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Snippets that only show up on bot-check interstitials.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "/cdn-cgi/challenge-platform",
    "px-captcha",
    "_Incapsula_Resource",
    "<title>Just a moment...</title>",
];

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("'a' is a valid CSS selector"));

/// Yields the raw anchors of one listing page.
///
/// Implementations are not expected to be safe for concurrent reuse; the
/// orchestrator never has more than one fetch in flight.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<RawAnchor>, FetchError>;
}

/// reqwest + scraper page fetcher.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<RawAnchor>, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, timeout))?;

        let status = response.status();
        if matches!(status.as_u16(), 403 | 429 | 503) {
            return Err(FetchError::Blocked {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        // Redirects happen; relative links resolve against where we landed.
        let page_url = response.url().to_string();

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                FetchError::Body(e.to_string())
            }
        })?;

        if looks_like_challenge(&body) {
            return Err(FetchError::Blocked {
                status: status.as_u16(),
            });
        }

        let anchors = extract_anchors(&body, &page_url);
        debug!(
            url = url,
            anchors = anchors.len(),
            bytes = body.len(),
            "Page fetched and parsed"
        );
        Ok(anchors)
    }
}

fn classify_reqwest_error(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        FetchError::Network(e.to_string())
    }
}

fn looks_like_challenge(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Every `<a>` on the page, in document order.
pub fn extract_anchors(html: &str, page_url: &str) -> Vec<RawAnchor> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .map(|element| RawAnchor {
            display_text: element.text().collect::<String>(),
            href: element.value().attr("href").map(str::to_string),
            page_url: page_url.to_string(),
        })
        .collect()
}

// =============================================================================
// normalizer.rs — THE ANCHOR LAUNDROMAT
// =============================================================================
//
// Auction pages are a mess. The same lot shows up as an image link, a title
// link, a "View Details" button, and sometimes a "Watch" link that goes to
// javascript:void(0). Titles span three lines because somebody put a <br>
// between the brand and the model number.
//
// This module takes a RawAnchor and either produces a clean ListingCandidate
// or quietly drops it. Dropping is not an error: an anchor without an
// openable link is not something anybody can act on.
// =============================================================================

use tracing::debug;
use url::Url;

use crate::models::{ListingCandidate, RawAnchor};

/// Anything shorter than this (after trimming) is "Bid", "Go", "Next" and
/// friends, not a listing title.
pub const MIN_TEXT_CHARS: usize = 4;

/// Turn a raw anchor into a listing candidate, or `None` when the text is
/// too short or no openable link can be built.
pub fn normalize(anchor: &RawAnchor) -> Option<ListingCandidate> {
    let trimmed = anchor.display_text.trim();
    if trimmed.chars().count() < MIN_TEXT_CHARS {
        return None;
    }

    let normalized_text = normalize_text(trimmed);
    let page_host = page_host(&anchor.page_url);

    let canonical_url = match anchor.href.as_deref() {
        Some(href) => resolve_href(href, &anchor.page_url),
        None => None,
    };

    let Some(canonical_url) = canonical_url else {
        debug!(
            text = normalized_text.as_str(),
            page = anchor.page_url.as_str(),
            "Dropping anchor without an openable link"
        );
        return None;
    };

    let source_host = page_host
        .or_else(|| host_of(&canonical_url))
        .unwrap_or_default();

    Some(ListingCandidate {
        normalized_text,
        canonical_url: Some(canonical_url),
        source_host,
        origin_url: anchor.page_url.clone(),
    })
}

/// Lowercase and squash every whitespace run (line breaks included) down to
/// a single space. Running it twice changes nothing.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Resolve an href into an absolute http(s) link.
///
/// Absolute http/https hrefs are kept verbatim. Anything else is joined onto
/// the page URL, which therefore has to be a proper absolute URL with a host.
pub fn resolve_href(href: &str, page_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    if has_http_scheme(href) {
        return Some(href.to_string());
    }

    let base = Url::parse(page_url.trim()).ok()?;
    base.host_str()?;

    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        // javascript:, mailto:, tel: and friends can't be opened from a phone alert
        _ => None,
    }
}

fn has_http_scheme(href: &str) -> bool {
    let lower = href.get(..8).unwrap_or(href).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn page_host(page_url: &str) -> Option<String> {
    host_of(page_url.trim())
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

// =============================================================================
// error.rs — THE TAXONOMY OF THINGS GOING WRONG
// =============================================================================
//
// Four kinds of failure, and only one of them is allowed to stop the show:
//
// - FetchError: one URL misbehaved. Write it down, move on to the next one.
// - NotificationError: ntfy didn't answer. Shrug. The result table is the
//   source of truth, the phone buzz is a courtesy.
// - RuleError: the keyword lists don't make sense. This one fails BEFORE
//   any scan starts, so nothing is half-done.
// - ConfigError: we couldn't even read the URL list.
// =============================================================================

use thiserror::Error;

/// Everything that can go wrong while fetching a single listing page.
/// Recorded against that URL in the scan run; never fatal to the scan.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("navigation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("network failure: {0}")]
    Network(String),

    /// 403/429/503 or a bot-challenge page. We don't solve these.
    #[error("blocked by the site (HTTP {status}): probably a bot check")]
    Blocked { status: u16 },

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("invalid page URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("circuit breaker open for host '{host}', skipped")]
    CircuitOpen { host: String },

    #[error("failed to read page body: {0}")]
    Body(String),
}

/// Push notification delivery failures. Swallowed by the notifier worker
/// after logging; they exist so the worker can count and describe them.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push endpoint answered HTTP {status}")]
    Status { status: u16 },

    #[error("push request timed out after {timeout_secs} s")]
    Timeout { timeout_secs: u64 },
}

/// Problems compiling the user's keyword lists into a rule set.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("category name must not be empty")]
    EmptyCategoryName,

    #[error("category '{0}' is declared more than once")]
    DuplicateCategory(String),

    #[error("malformed category spec '{0}', expected Name=term, term, ...")]
    MalformedCategorySpec(String),

    #[error("failed to build keyword matcher: {0}")]
    Automaton(#[from] aho_corasick::BuildError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read URL list from '{path}': {source}")]
    UrlFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_messages_are_operator_friendly() {
        let err = FetchError::Timeout { timeout_ms: 45_000 };
        assert_eq!(err.to_string(), "navigation timed out after 45000 ms");

        let err = FetchError::Blocked { status: 403 };
        assert!(err.to_string().contains("HTTP 403"));
    }

    #[test]
    fn test_rule_error_names_the_category() {
        let err = RuleError::DuplicateCategory("VCR".to_string());
        assert_eq!(err.to_string(), "category 'VCR' is declared more than once");
    }
}

// =============================================================================
// config.rs — THE CONTROL PANEL
// =============================================================================
//
// Every knob lives here. All values can be overridden via HUNTER_*
// environment variables (or a .env file), and the CLI can override the
// handful you actually change day to day: topic, URLs, keywords.
//
// Defaults reproduce the original dashboard: a Louisville topic, a GovDeals
// and a HiBid search within 100 miles of 40202, and the classic
// "sony, vcr, beta, broadcast..." keyword list with the usual suspects
// (remotes, cables, manuals) excluded.
// =============================================================================

use std::env;
use std::time::Duration;

use crate::circuit_breaker::BreakerSettings;
use crate::dedup::{DedupConfig, DedupRetention};
use crate::error::ConfigError;
use crate::fetcher::DEFAULT_USER_AGENT;

pub const DEFAULT_URLS: &str = "https://www.govdeals.com/search?kWord=vintage&miles=100&zipCode=40202\nhttps://hibid.com/lots?q=vcr&zip=40202&miles=100";
pub const DEFAULT_CATEGORIES: &str = "Vintage=sony, vcr, beta, broadcast, pallet, vintage, console";
pub const DEFAULT_EXCLUSIONS: &str = "remote, cable, manual, parts only, cracked";

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // WHAT TO HUNT
    // =========================================================================
    /// ntfy topic. Anyone subscribed to this string gets the alerts.
    pub topic: String,

    /// Target search pages, in scan order.
    pub urls: Vec<String>,

    /// `Name=term, term; Name=term` — see `KeywordRuleSet::parse_category_specs`.
    pub categories: String,

    /// Comma-separated global exclusions.
    pub exclusions: String,

    // =========================================================================
    // FETCHING
    // =========================================================================
    /// Per-page budget. Default 45 s, same as the old browser goto timeout.
    pub fetch_timeout: Duration,

    pub user_agent: String,

    /// Delay between scans in watch mode. Default 15 minutes.
    pub poll_interval: Duration,

    // =========================================================================
    // NOTIFICATIONS
    // =========================================================================
    pub ntfy_base_url: String,
    pub notify_enabled: bool,
    /// Bounded queue between the scan loop and the notifier task.
    pub notify_queue_capacity: usize,
    pub notify_timeout: Duration,

    // =========================================================================
    // DEDUP + RESILIENCE
    // =========================================================================
    pub dedup: DedupConfig,
    pub breakers: BreakerSettings,

    // =========================================================================
    // OBSERVABILITY
    // =========================================================================
    pub metrics_port: u16,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let urls = match env::var("HUNTER_URLS_FILE") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::UrlFile { path, source })?;
                parse_url_list(&text)
            }
            Err(_) => parse_url_list(&env_or_default("HUNTER_URLS", DEFAULT_URLS)),
        };

        let retention = DedupRetention::parse(&env_or_default("HUNTER_DEDUP_RETENTION", "process"))
            .unwrap_or(DedupRetention::Process);

        Ok(Config {
            topic: env_or_default("HUNTER_TOPIC", "louisville_tech_hunter"),
            urls,
            categories: env_or_default("HUNTER_CATEGORIES", DEFAULT_CATEGORIES),
            exclusions: env_or_default("HUNTER_EXCLUDE", DEFAULT_EXCLUSIONS),

            fetch_timeout: Duration::from_millis(env_parse("HUNTER_FETCH_TIMEOUT_MS", 45_000)),
            user_agent: env_or_default("HUNTER_USER_AGENT", DEFAULT_USER_AGENT),
            poll_interval: Duration::from_secs(env_parse("HUNTER_POLL_SECS", 900)),

            ntfy_base_url: env_or_default("HUNTER_NTFY_BASE_URL", "https://ntfy.sh"),
            notify_enabled: env_flag("HUNTER_NOTIFY_ENABLED", true),
            notify_queue_capacity: env_parse("HUNTER_NOTIFY_QUEUE", 256),
            notify_timeout: Duration::from_secs(env_parse("HUNTER_NOTIFY_TIMEOUT_SECS", 10)),

            dedup: DedupConfig {
                expected_items: env_parse("HUNTER_BLOOM_ITEMS", 100_000),
                fp_rate: env_parse("HUNTER_BLOOM_FP_RATE", 0.01),
                lru_capacity: env_parse("HUNTER_LRU_CACHE_SIZE", 50_000),
                rotation_interval: Duration::from_secs(env_parse("HUNTER_BLOOM_ROTATION_SECS", 86_400)),
                retention,
            },
            breakers: BreakerSettings {
                failure_threshold: env_parse("HUNTER_CB_FAILURE_THRESHOLD", 3),
                reset_timeout: Duration::from_secs(env_parse("HUNTER_CB_RESET_TIMEOUT_SECS", 600)),
                success_threshold: env_parse("HUNTER_CB_SUCCESS_THRESHOLD", 1),
            },

            metrics_port: env_parse("HUNTER_METRICS_PORT", 9090),
            log_json: env_flag("HUNTER_LOG_JSON", false),
        })
    }
}

/// One URL per line; blank lines and surrounding whitespace ignored.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var, falling back to `default` when unset or unparsable.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_list_skips_blank_lines() {
        let urls = parse_url_list("https://a.com/x\n\n   \n  https://b.com/y  \r\n");
        assert_eq!(urls, vec!["https://a.com/x", "https://b.com/y"]);
    }

    #[test]
    fn test_default_urls_parse_to_two_targets() {
        let urls = parse_url_list(DEFAULT_URLS);
        assert_eq!(urls.len(), 2);
        assert!(urls[1].starts_with("https://hibid.com/"));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        // key intentionally never set by anything else
        assert_eq!(env_parse("HUNTER_TEST_NEVER_SET_42", 7u64), 7);
    }
}

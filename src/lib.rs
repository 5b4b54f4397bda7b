// =============================================================================
// VINTAGE HUNTER
// =============================================================================
//
// Scrapes auction search pages, keeps the listings whose titles match your
// keyword categories, throws out the remotes and the cables, remembers what
// it already told you about, and buzzes your phone through ntfy.
//
// The binary in main.rs is the CLI; everything it drives lives here.
// =============================================================================

pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod notifier;
pub mod orchestrator;
pub mod rules;

pub use error::{ConfigError, FetchError, NotificationError, RuleError};
pub use models::{DedupKey, ListingCandidate, MatchResult, RawAnchor, ResultRow, ScanRun, ScanState};
pub use orchestrator::{ScanOrchestrator, ScanRequest};
pub use rules::KeywordRuleSet;

// =============================================================================
// models.rs — THE SACRED DATA STRUCTURES OF THE HUNT
// =============================================================================
//
// Every listing starts life as a RawAnchor: whatever text and href the page
// happened to have on an <a> tag. It gets scrubbed into a ListingCandidate,
// judged by the keyword rules, and if it survives it becomes a MatchResult
// inside a ScanRun.
//
// The ScanRun is the whole story of one pass over the URL list. It is a
// plain value handed back to the caller. No global state, no shared result
// cache, nothing hiding in a static somewhere.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One anchor element as handed over by a page fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnchor {
    /// The visible text of the link, exactly as rendered.
    pub display_text: String,
    /// The raw href attribute. Absent for anchors that are really buttons.
    pub href: Option<String>,
    /// The page the anchor was found on. Relative hrefs resolve against it.
    pub page_url: String,
}

impl RawAnchor {
    pub fn new(display_text: impl Into<String>, href: Option<&str>, page_url: impl Into<String>) -> Self {
        Self {
            display_text: display_text.into(),
            href: href.map(str::to_string),
            page_url: page_url.into(),
        }
    }
}

/// A scrubbed listing ready for classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCandidate {
    /// Lowercased, trimmed, every whitespace run collapsed to one space.
    pub normalized_text: String,
    /// The link a human can open. Candidates without one never reach the
    /// classifier, but the type keeps the option so the dedup key can fall
    /// back to host + text.
    pub canonical_url: Option<String>,
    /// Host of the page the listing was found on.
    pub source_host: String,
    /// The search page URL that produced this candidate.
    pub origin_url: String,
}

impl ListingCandidate {
    pub fn dedup_key(&self) -> DedupKey {
        match &self.canonical_url {
            Some(url) => DedupKey::Url(url.clone()),
            None => DedupKey::Text {
                source_host: self.source_host.clone(),
                normalized_text: self.normalized_text.clone(),
            },
        }
    }
}

/// A candidate that passed classification, tagged with its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate: ListingCandidate,
    pub category: String,
}

impl MatchResult {
    pub fn dedup_key(&self) -> DedupKey {
        self.candidate.dedup_key()
    }

    /// One display row for the result table.
    pub fn to_row(&self) -> ResultRow {
        ResultRow {
            category: self.category.clone(),
            item_name: self.candidate.normalized_text.to_uppercase(),
            source: self.candidate.source_host.clone(),
            link: self.candidate.canonical_url.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({})",
            self.category,
            self.candidate.normalized_text,
            self.candidate.canonical_url.as_deref().unwrap_or("no link")
        )
    }
}

/// The identity of a physical listing for "have we already yelled about
/// this one" purposes. The URL wins when we have it; host + text otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DedupKey {
    Url(String),
    Text {
        source_host: String,
        normalized_text: String,
    },
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKey::Url(url) => write!(f, "url:{}", url),
            DedupKey::Text {
                source_host,
                normalized_text,
            } => write!(f, "text:{}:{}", source_host, normalized_text),
        }
    }
}

/// Lifecycle of a scan: Idle → Running → (Completed | Cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl ScanState {
    pub fn is_finished(self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Cancelled)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "IDLE"),
            ScanState::Running => write!(f, "RUNNING"),
            ScanState::Completed => write!(f, "COMPLETED"),
            ScanState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Per-run counters. Handy for the log line at the end of a scan and for
/// figuring out why a page "found nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub urls_scanned: u64,
    pub anchors_seen: u64,
    pub candidates: u64,
    pub excluded: u64,
    pub unmatched: u64,
    pub duplicates: u64,
    pub notifications_queued: u64,
    pub notifications_dropped: u64,
}

/// The complete record of one pass over every configured URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: ScanState,
    pub urls: Vec<String>,
    /// In URL order, then in anchor order within a page.
    pub matches: Vec<MatchResult>,
    /// URL → human-readable failure description.
    pub errors: BTreeMap<String, String>,
    pub stats: ScanStats,
}

impl ScanRun {
    /// A fresh run in the Running state.
    pub fn start(urls: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            state: ScanState::Running,
            urls,
            matches: Vec::new(),
            errors: BTreeMap::new(),
            stats: ScanStats::default(),
        }
    }

    pub(crate) fn finish(mut self, state: ScanState) -> Self {
        self.state = state;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn rows(&self) -> Vec<ResultRow> {
        self.matches.iter().map(MatchResult::to_row).collect()
    }

    /// Rows grouped by category, categories in order of first appearance.
    pub fn rows_by_category(&self) -> Vec<(String, Vec<ResultRow>)> {
        let mut groups: Vec<(String, Vec<ResultRow>)> = Vec::new();
        for m in &self.matches {
            match groups.iter_mut().find(|(name, _)| *name == m.category) {
                Some((_, rows)) => rows.push(m.to_row()),
                None => groups.push((m.category.clone(), vec![m.to_row()])),
            }
        }
        groups
    }
}

impl fmt::Display for ScanRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scan {} {}: {} matches across {} URLs, {} errors",
            self.id,
            self.state,
            self.matches.len(),
            self.urls.len(),
            self.errors.len()
        )
    }
}

/// A single line of the scan output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub category: String,
    pub item_name: String,
    pub source: String,
    pub link: String,
}

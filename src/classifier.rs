// =============================================================================
// classifier.rs — THE JUDGE, JURY, AND KEYWORD EXECUTIONER
// =============================================================================
//
// Given a candidate and a compiled rule set, decide: which category, if any?
//
// The rules of the court:
//
// 1. Exclusions first. If "remote" appears anywhere in "vcr remote control",
//    the listing is out, no matter how many positive keywords it also hits.
// 2. Categories in declared order. The first category with any hit wins and
//    the listing is never filed under two categories.
// 3. Nothing hit? Not our kind of listing.
//
// Every check is an Aho-Corasick pass over text that's already lowercase,
// and a full page of candidates gets farmed out across cores with rayon,
// because a search page with 400 links deserves all 8 of them.
// =============================================================================

use rayon::prelude::*;
use tracing::debug;

use crate::models::{ListingCandidate, MatchResult};
use crate::rules::KeywordRuleSet;

/// The full reasoning behind a classification, for logs and counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// An exclusion term was found. Blocks every category.
    Excluded { term: String },
    /// First category in declared order with a hit.
    Matched { category: String },
    NoMatch,
}

/// Evaluate a candidate against the rule set.
pub fn evaluate(candidate: &ListingCandidate, rules: &KeywordRuleSet) -> Verdict {
    let text = candidate.normalized_text.as_str();

    if let Some(term) = rules.exclusions().find(text) {
        debug!(text = text, term = term, "Excluded by keyword");
        return Verdict::Excluded {
            term: term.to_string(),
        };
    }

    match rules.categories().iter().find(|rule| rule.matches(text)) {
        Some(rule) => Verdict::Matched {
            category: rule.name().to_string(),
        },
        None => Verdict::NoMatch,
    }
}

/// Classify a candidate: `Some(MatchResult)` for the winning category,
/// `None` when excluded or unmatched.
pub fn classify(candidate: &ListingCandidate, rules: &KeywordRuleSet) -> Option<MatchResult> {
    match evaluate(candidate, rules) {
        Verdict::Matched { category } => Some(MatchResult {
            candidate: candidate.clone(),
            category,
        }),
        Verdict::Excluded { .. } | Verdict::NoMatch => None,
    }
}

/// Evaluate a whole page of candidates in parallel. Output order matches
/// input order, so anchor order on the page is preserved.
pub fn evaluate_batch(candidates: &[ListingCandidate], rules: &KeywordRuleSet) -> Vec<Verdict> {
    candidates
        .par_iter()
        .map(|candidate| evaluate(candidate, rules))
        .collect()
}

/// Parallel `classify` over a slice; keeps input order, drops non-matches.
pub fn classify_batch(candidates: &[ListingCandidate], rules: &KeywordRuleSet) -> Vec<MatchResult> {
    candidates
        .par_iter()
        .filter_map(|candidate| classify(candidate, rules))
        .collect()
}

// =============================================================================
// rules.rs — THE KEYWORD RULEBOOK
// =============================================================================
//
// Users type keywords the way users type keywords: "sony, vcr,, Beta ,".
// This module turns that into something the classifier can run fast:
// one Aho-Corasick automaton per category, one for the global exclusions,
// all built exactly once before a scan starts.
//
// Building is its own step with its own errors. A duplicate category name
// is reported before we touch a single web page, not discovered halfway
// through classifying listing number 400.
//
// Matching is plain substring containment on lowercased text. "cable"
// excludes "cablevision tv stand". That is a known, accepted limitation.
// =============================================================================

use aho_corasick::{AhoCorasick, MatchKind};
use tracing::{debug, warn};

use crate::error::RuleError;

/// Split a comma-separated keyword list: trim, lowercase, drop empties,
/// collapse repeats keeping the first occurrence.
pub fn parse_terms(raw: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in raw.split(',') {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// A compiled set of terms. `None` matcher means the set is empty and
/// nothing can ever match.
#[derive(Debug, Clone)]
struct TermMatcher {
    terms: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl TermMatcher {
    fn compile(terms: Vec<String>) -> Result<Self, RuleError> {
        let automaton = if terms.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .match_kind(MatchKind::LeftmostFirst)
                    .build(&terms)?,
            )
        };
        Ok(Self { terms, automaton })
    }

    /// The first term (leftmost in the text) contained in `text`, if any.
    fn find<'a>(&'a self, text: &str) -> Option<&'a str> {
        let automaton = self.automaton.as_ref()?;
        automaton
            .find(text)
            .map(|m| self.terms[m.pattern().as_usize()].as_str())
    }

    fn is_match(&self, text: &str) -> bool {
        self.automaton
            .as_ref()
            .map(|a| a.is_match(text))
            .unwrap_or(false)
    }
}

/// One named category of positive keywords.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    name: String,
    matcher: TermMatcher,
}

impl KeywordRule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn terms(&self) -> &[String] {
        &self.matcher.terms
    }

    /// Does any of this category's terms appear in `text`?
    pub fn matches(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// The global list of deal-breakers. Applies to every category.
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    matcher: TermMatcher,
}

impl ExclusionSet {
    pub fn terms(&self) -> &[String] {
        &self.matcher.terms
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.terms.is_empty()
    }

    /// The exclusion term found in `text`, if any.
    pub fn find<'a>(&'a self, text: &str) -> Option<&'a str> {
        self.matcher.find(text)
    }
}

/// Categories in precedence order plus the global exclusions.
/// Read-only once built; share it behind an `Arc` for the length of a scan.
#[derive(Debug, Clone)]
pub struct KeywordRuleSet {
    categories: Vec<KeywordRule>,
    exclusions: ExclusionSet,
}

impl KeywordRuleSet {
    pub fn builder() -> KeywordRuleSetBuilder {
        KeywordRuleSetBuilder::default()
    }

    /// Build from raw user text: `(category name, "term, term, ...")` pairs
    /// in precedence order, plus one comma-separated exclusion list.
    pub fn from_raw<N, T>(categories: &[(N, T)], exclusions: &str) -> Result<Self, RuleError>
    where
        N: AsRef<str>,
        T: AsRef<str>,
    {
        categories
            .iter()
            .fold(Self::builder(), |b, (name, terms)| {
                b.category(name.as_ref(), terms.as_ref())
            })
            .exclusions(exclusions)
            .build()
    }

    /// Parse the compact one-line form used by the environment config:
    /// `VCR=vcr, beta; Computers=commodore, apple ii`.
    /// A spec with no `=` anywhere is one plain keyword list and becomes a
    /// single category called "Match"; `;` then separates terms like `,`.
    pub fn parse_category_specs(spec: &str) -> Result<Vec<(String, String)>, RuleError> {
        let named = spec.contains('=');
        if !named {
            if spec.trim().is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![("Match".to_string(), spec.replace(';', ","))]);
        }

        let mut out = Vec::new();
        for part in spec.split(';') {
            if part.trim().is_empty() {
                continue;
            }
            match part.split_once('=') {
                Some((name, terms)) => out.push((name.trim().to_string(), terms.to_string())),
                None => return Err(RuleError::MalformedCategorySpec(part.trim().to_string())),
            }
        }
        Ok(out)
    }

    pub fn categories(&self) -> &[KeywordRule] {
        &self.categories
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(KeywordRule::name)
    }
}

#[derive(Debug, Default)]
pub struct KeywordRuleSetBuilder {
    categories: Vec<(String, String)>,
    exclusions: String,
}

impl KeywordRuleSetBuilder {
    pub fn category(mut self, name: &str, raw_terms: &str) -> Self {
        self.categories.push((name.to_string(), raw_terms.to_string()));
        self
    }

    pub fn exclusions(mut self, raw_terms: &str) -> Self {
        self.exclusions = raw_terms.to_string();
        self
    }

    pub fn build(self) -> Result<KeywordRuleSet, RuleError> {
        let mut categories: Vec<KeywordRule> = Vec::with_capacity(self.categories.len());

        for (name, raw_terms) in self.categories {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(RuleError::EmptyCategoryName);
            }
            if categories.iter().any(|c| c.name == name) {
                return Err(RuleError::DuplicateCategory(name));
            }

            let terms = parse_terms(&raw_terms);
            if terms.is_empty() {
                warn!(category = name.as_str(), "Category has no usable terms — it will never match");
            }

            categories.push(KeywordRule {
                name,
                matcher: TermMatcher::compile(terms)?,
            });
        }

        let exclusions = ExclusionSet {
            matcher: TermMatcher::compile(parse_terms(&self.exclusions))?,
        };

        debug!(
            categories = categories.len(),
            exclusions = exclusions.terms().len(),
            "Keyword rule set compiled"
        );

        Ok(KeywordRuleSet {
            categories,
            exclusions,
        })
    }
}

//! Boolean keyword filter for paper records.
//!
//! A paper passes when (no include groups are configured OR every token of
//! at least one group occurs in its text) AND no exclude token occurs.
//! Matching runs over the configured fields joined into one string, so a
//! group's tokens may be spread across title and abstract.
//!
//! The filter is pure: the same paper and config always give the same answer.

mod stats;
mod synonyms;

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, instrument};

use paperagent_shared::{FilterConfig, MatchField, Paper, PaperAgentError, Result};

pub use stats::FilterStatistics;

// ---------------------------------------------------------------------------
// Match results
// ---------------------------------------------------------------------------

/// One include group that was fully satisfied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMatch {
    pub group_index: usize,
    pub group: Vec<String>,
    /// Tokens that matched, as `alternate(token)` when a synonym was used.
    pub matched_keywords: Vec<String>,
}

/// Why a paper passed or failed.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MatchInfo {
    pub relevant: bool,
    pub matched_groups: Vec<GroupMatch>,
    /// Sorted, deduplicated union over `matched_groups`.
    pub matched_keywords: Vec<String>,
    /// The exclude token (or its alternate) that suppressed the paper.
    pub excluded_by: Option<String>,
}

/// Papers that passed plus the run statistics.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub kept: Vec<Paper>,
    pub statistics: FilterStatistics,
}

// ---------------------------------------------------------------------------
// Compiled filter
// ---------------------------------------------------------------------------

/// A token and the compiled patterns that satisfy it (itself first, then synonyms).
#[derive(Debug)]
struct Term {
    token: String,
    alternates: Vec<(String, Regex)>,
}

impl Term {
    /// First alternate found in `text`, formatted for reporting.
    fn find(&self, text: &str) -> Option<String> {
        self.alternates.iter().find_map(|(alt, re)| {
            re.is_match(text).then(|| {
                if *alt == self.token {
                    alt.clone()
                } else {
                    format!("{alt}({})", self.token)
                }
            })
        })
    }
}

/// Compiled form of a [`FilterConfig`]. Build once, evaluate many papers.
#[derive(Debug)]
pub struct KeywordFilter {
    groups: Vec<Vec<Term>>,
    exclude: Vec<Term>,
    fields: Vec<MatchField>,
}

impl KeywordFilter {
    /// Compile `config`. Fails with a config error on an empty `match_fields`.
    pub fn new(config: &FilterConfig) -> Result<Self> {
        if config.match_fields.is_empty() {
            return Err(PaperAgentError::config("`filter.match_fields` must not be empty"));
        }

        let synonyms = if config.builtin_synonyms {
            synonyms::merged_with_builtin(&config.synonyms)
        } else {
            config.synonyms.clone()
        };

        let compile_terms = |tokens: &[String]| -> Result<Vec<Term>> {
            let mut seen: Vec<&str> = Vec::new();
            let mut terms = Vec::new();
            for token in tokens.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
                if seen.contains(&token) {
                    continue;
                }
                seen.push(token);
                terms.push(compile_term(token, &synonyms, config)?);
            }
            Ok(terms)
        };

        let groups = config
            .include_groups
            .iter()
            .map(|g| compile_terms(g.as_slice()))
            .collect::<Result<Vec<_>>>()?;
        if groups.iter().any(Vec::is_empty) {
            return Err(PaperAgentError::config(
                "`filter.include_groups` contains a group with no keywords",
            ));
        }
        let exclude = compile_terms(config.exclude.as_slice())?;

        let mut fields = Vec::new();
        for field in &config.match_fields {
            if !fields.contains(field) {
                fields.push(*field);
            }
        }

        Ok(Self {
            groups,
            exclude,
            fields,
        })
    }

    /// The searchable text: configured fields joined by one space, whitespace collapsed.
    pub fn text_of(&self, paper: &Paper) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for field in &self.fields {
            match field {
                MatchField::Title => parts.push(&paper.title),
                MatchField::Abstract => parts.push(&paper.abstract_text),
                MatchField::Keywords => parts.extend(paper.keywords.iter().map(String::as_str)),
            }
        }
        parts
            .iter()
            .flat_map(|p| p.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Pass/fail for one paper.
    pub fn evaluate(&self, paper: &Paper) -> bool {
        let text = self.text_of(paper);
        let excluded = self.exclude.iter().any(|t| t.find(&text).is_some());
        !excluded
            && (self.groups.is_empty()
                || self
                    .groups
                    .iter()
                    .any(|group| group.iter().all(|t| t.find(&text).is_some())))
    }

    /// Pass/fail with the matched groups and exclusion reason.
    pub fn check(&self, paper: &Paper) -> MatchInfo {
        let text = self.text_of(paper);
        let mut info = MatchInfo::default();

        if let Some(hit) = self.exclude.iter().find_map(|t| t.find(&text)) {
            info.excluded_by = Some(hit);
            return info;
        }

        if self.groups.is_empty() {
            info.relevant = true;
            return info;
        }

        for (group_index, group) in self.groups.iter().enumerate() {
            let hits: Option<Vec<String>> = group.iter().map(|t| t.find(&text)).collect();
            if let Some(matched_keywords) = hits {
                info.matched_groups.push(GroupMatch {
                    group_index,
                    group: group.iter().map(|t| t.token.clone()).collect(),
                    matched_keywords,
                });
            }
        }
        info.relevant = !info.matched_groups.is_empty();

        let mut all: Vec<String> = info
            .matched_groups
            .iter()
            .flat_map(|g| g.matched_keywords.iter().cloned())
            .collect();
        all.sort();
        all.dedup();
        info.matched_keywords = all;
        info
    }
}

fn compile_term(
    token: &str,
    synonyms: &BTreeMap<String, Vec<String>>,
    config: &FilterConfig,
) -> Result<Term> {
    let alts = synonyms.get(token).or_else(|| {
        if config.case_sensitive {
            None
        } else {
            synonyms
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(token))
                .map(|(_, v)| v)
        }
    });

    let mut words = vec![token.to_string()];
    for alt in alts.into_iter().flatten() {
        let alt = alt.trim();
        if !alt.is_empty() && !words.iter().any(|w| w == alt) {
            words.push(alt.to_string());
        }
    }

    let alternates = words
        .into_iter()
        .map(|word| {
            let re = token_pattern(&word, config.case_sensitive, config.whole_word)?;
            Ok((word, re))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Term {
        token: token.to_string(),
        alternates,
    })
}

/// Literal pattern for `word`. Whole-word mode anchors `\b` only on edges that
/// are word characters, so tokens like `c++` still match.
fn token_pattern(word: &str, case_sensitive: bool, whole_word: bool) -> Result<Regex> {
    let collapsed = word.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut pattern = regex::escape(&collapsed);
    if whole_word {
        let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
        if is_word(collapsed.chars().next()) {
            pattern = format!(r"\b{pattern}");
        }
        if is_word(collapsed.chars().last()) {
            pattern = format!(r"{pattern}\b");
        }
    }
    RegexBuilder::new(&pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| PaperAgentError::config(format!("keyword '{word}': {e}")))
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// One-shot evaluation. Prefer [`KeywordFilter`] for batches.
pub fn evaluate(paper: &Paper, config: &FilterConfig) -> Result<bool> {
    Ok(KeywordFilter::new(config)?.evaluate(paper))
}

/// Filter a batch, keeping input order.
#[instrument(skip_all, fields(papers = papers.len()))]
pub fn filter_papers(papers: Vec<Paper>, config: &FilterConfig) -> Result<FilterOutcome> {
    let filter = KeywordFilter::new(config)?;
    let mut statistics = FilterStatistics::default();
    let mut kept = Vec::new();

    for paper in papers {
        let info = filter.check(&paper);
        statistics.record(&paper, &info);
        if info.relevant {
            debug!(id = %paper.id, matched = ?info.matched_keywords, "paper kept");
            kept.push(paper);
        }
    }
    statistics.finish();

    Ok(FilterOutcome { kept, statistics })
}

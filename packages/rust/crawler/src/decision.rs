//! Venue decision strings → [`Decision`].
//!
//! Venues publish free-text outcomes ("ICLR 2024 poster", "Submitted to
//! ICLR 2024", "Desk Rejected"). Reject patterns are checked first so that
//! "Rejected (poster session cancelled)" is never read as accepted.

use regex::{Regex, RegexBuilder};

use paperagent_shared::{Decision, DecisionPatterns, PaperAgentError, Result};

/// Result of classifying one decision string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    /// A non-empty string that matched no pattern.
    pub unmatched: bool,
}

#[derive(Debug)]
pub struct DecisionClassifier {
    accept: Vec<Regex>,
    reject: Vec<Regex>,
}

impl DecisionClassifier {
    pub fn new(patterns: &DecisionPatterns) -> Result<Self> {
        let compile = |list: &[String]| -> Result<Vec<Regex>> {
            list.iter()
                .map(|p| {
                    RegexBuilder::new(p)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            PaperAgentError::config(format!("invalid decision pattern '{p}': {e}"))
                        })
                })
                .collect()
        };
        Ok(Self {
            accept: compile(patterns.accept.as_slice())?,
            reject: compile(patterns.reject.as_slice())?,
        })
    }

    pub fn classify(&self, raw: Option<&str>) -> Classification {
        let text = raw.map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Classification {
                decision: Decision::Unknown,
                unmatched: false,
            };
        }
        let decision = if self.reject.iter().any(|re| re.is_match(text)) {
            Decision::Rejected
        } else if self.accept.iter().any(|re| re.is_match(text)) {
            Decision::Accepted
        } else {
            Decision::Unknown
        };
        Classification {
            decision,
            unmatched: decision == Decision::Unknown,
        }
    }
}

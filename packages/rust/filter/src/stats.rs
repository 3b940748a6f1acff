//! Aggregate statistics for one filter run.

use std::collections::BTreeMap;

use serde::Serialize;

use paperagent_shared::Paper;

use crate::MatchInfo;

/// Rejected titles kept for operator review.
const REJECTED_SAMPLE: usize = 10;

const NO_GROUP_MATCHED: &str = "no include group matched";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterStatistics {
    pub total: usize,
    pub kept: usize,
    pub discarded: usize,
    /// Percentage of papers kept, 0 when there were none.
    pub pass_rate: f64,
    /// Group (tokens joined by ` AND `) → papers satisfying it.
    pub group_hits: BTreeMap<String, usize>,
    /// Reason → papers discarded for it.
    pub exclusion_reasons: BTreeMap<String, usize>,
    pub rejected_sample: Vec<String>,
}

impl FilterStatistics {
    pub(crate) fn record(&mut self, paper: &Paper, info: &MatchInfo) {
        self.total += 1;
        if info.relevant {
            self.kept += 1;
            for group in &info.matched_groups {
                *self
                    .group_hits
                    .entry(group.group.join(" AND "))
                    .or_default() += 1;
            }
            return;
        }

        self.discarded += 1;
        let reason = match &info.excluded_by {
            Some(token) => format!("excluded: {token}"),
            None => NO_GROUP_MATCHED.to_string(),
        };
        *self.exclusion_reasons.entry(reason).or_default() += 1;
        if self.rejected_sample.len() < REJECTED_SAMPLE {
            self.rejected_sample.push(paper.title.clone());
        }
    }

    pub(crate) fn finish(&mut self) {
        self.pass_rate = if self.total == 0 {
            0.0
        } else {
            self.kept as f64 / self.total as f64 * 100.0
        };
    }
}

//! Candidate claiming-unit labelings, the population snapshots they are
//! evaluated on, and the choice between them.

use crate::compute::column::Column;
use crate::compute::population::Population;
use crate::config::EngineConfig;
use crate::error::Result;

/// Names of the grouping columns injected into snapshots.
#[derive(Debug, Clone)]
pub(crate) struct GroupColumns {
    pub fg: String,
    pub bg: String,
    pub wthh: String,
}

impl GroupColumns {
    pub fn from_config(config: &EngineConfig) -> Self {
        let column = |suffix: &str| config.group_column(suffix).map_or_else(|| format!("{}_id", suffix), str::to_string);
        Self { fg: column("fg"), bg: column("bg"), wthh: column("wthh") }
    }

    /// A private copy of the whole population carrying the given grouping.
    /// Every person stays in, so person links keep their targets. Columns the
    /// grouping does not touch stay shared with `population`.
    pub fn snapshot(&self, population: &Population, fg: &[i64], bg: &[i64], wthh: &[i64]) -> Result<Population> {
        population
            .clone()
            .with_column(self.fg.as_str(), Column::Int(fg.to_vec()))?
            .with_column(self.bg.as_str(), Column::Int(bg.to_vec()))?
            .with_column(self.wthh.as_str(), Column::Int(wthh.to_vec()))
    }
}

/// Hands out ids no person or existing group uses.
#[derive(Debug, Clone)]
pub(crate) struct FreshIds {
    next: i64,
}

impl FreshIds {
    pub fn after(taken: impl IntoIterator<Item = i64>) -> Self {
        Self { next: taken.into_iter().max().map_or(0, |m| m + 1) }
    }

    pub fn next_id(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Candidate B: every flagged row gets a unit of its own, the rest keep the
/// family group.
pub(crate) fn split_off(fg_id: &[i64], split: &[bool], fresh: &mut FreshIds) -> Vec<i64> {
    fg_id
        .iter()
        .zip(split)
        .map(|(&fg, &own)| if own { fresh.next_id() } else { fg })
        .collect()
}

/// Per-row results of one candidate evaluation.
pub(crate) struct CandidateResult<'a> {
    pub outcome: &'a [f64],
    pub admissible: &'a [bool],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Choice {
    /// Candidate A for every member.
    WholeGroup,
    /// Candidate B for the listed rows, A for the other self-covering children.
    Split(Vec<usize>),
}

/// Picks the labeling for one family group.
///
/// `members` are the group's rows and `self_covering` its children who can
/// cover their own need. A wins when every member is admissible under it and
/// the self-covering children fare no worse than under B. Otherwise each
/// self-covering child takes the better admissible option, A on ties, and B
/// when neither is admissible.
pub(crate) fn choose(members: &[usize], self_covering: &[usize], a: &CandidateResult<'_>, b: &CandidateResult<'_>) -> Choice {
    let all_admissible = members.iter().all(|&r| a.admissible[r]);
    let total = |c: &CandidateResult<'_>| self_covering.iter().map(|&r| c.outcome[r]).sum::<f64>();
    if all_admissible && total(a) >= total(b) {
        return Choice::WholeGroup;
    }

    let split = self_covering
        .iter()
        .copied()
        .filter(|&r| match (a.admissible[r], b.admissible[r]) {
            (true, true) => b.outcome[r] > a.outcome[r],
            (true, false) => false,
            (false, _) => true,
        })
        .collect();
    Choice::Split(split)
}

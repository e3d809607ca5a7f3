//! Benefit-unit resolver.
//!
//! Assigns every person a claiming unit (`bg_id`) and a housing-benefit
//! sub-household (`wthh_id`). The assignment depends on rule results that in
//! turn depend on the assignment, so the resolver evaluates a small number of
//! candidate groupings with the engine and picks between them.

mod candidates;
mod family;

use crate::compute::engine::{Engine, Evaluation, EvaluationOptions};
use crate::compute::population::Population;
use crate::error::{EngineError, Result};
use candidates::{choose, split_off, CandidateResult, Choice, FreshIds, GroupColumns};
use family::{check_single_family_per_household, child_flags, family_groups, Household};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolverState {
    NoGroupingYet,
    FamilyGroupsComputed,
    OwnNeedsChecked,
    CandidatesGenerated,
    Resolved,
}

impl fmt::Display for ResolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a family group got its final grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// The caller supplied `bg_id` and `wthh_id`.
    Supplied,
    /// The whole group covers its basic need.
    NeedCovered,
    /// No child of the group covers their own need, so both candidates coincide.
    NoSelfCoveringChild,
    /// Decided by comparing the candidates. Lists the persons split off.
    CandidateSelection { split_off: Vec<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverReport {
    pub state: ResolverState,
    /// Engine evaluations made for this request.
    pub engine_calls: usize,
    /// Keyed by family-group id.
    pub groups: BTreeMap<i64, GroupOutcome>,
}

/// Grouping columns, row-aligned to `person_ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    pub person_ids: Vec<i64>,
    pub fg_id: Vec<i64>,
    pub bg_id: Vec<i64>,
    pub wthh_id: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub grouping: Grouping,
    pub report: ResolverReport,
}

impl Resolution {
    /// `population` with the resolved grouping columns added.
    pub fn apply(&self, population: &Population, engine: &Engine<'_>) -> Result<Population> {
        if population.person_ids() != self.grouping.person_ids.as_slice() {
            return Err(EngineError::InvalidPopulation("grouping was resolved for other persons".into()));
        }
        GroupColumns::from_config(engine.config()).snapshot(
            population,
            &self.grouping.fg_id,
            &self.grouping.bg_id,
            &self.grouping.wthh_id,
        )
    }
}

pub struct BenefitUnitResolver<'e, 'a> {
    engine: &'e Engine<'a>,
    options: EvaluationOptions,
    calls: AtomicUsize,
}

/// A family group still open after the need check.
struct OpenGroup {
    fg_id: i64,
    rows: Vec<usize>,
}

impl<'e, 'a> BenefitUnitResolver<'e, 'a> {
    pub fn new(engine: &'e Engine<'a>) -> Self {
        Self { engine, options: EvaluationOptions::default(), calls: AtomicUsize::new(0) }
    }

    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    /// Engine evaluations made over the lifetime of this resolver.
    pub fn engine_calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn resolve(&self, population: &Population) -> Result<Resolution> {
        let config = self.engine.config();
        let rc = &config.resolver;
        let columns = GroupColumns::from_config(config);
        let calls_before = self.engine_calls();
        let mut state = ResolverState::NoGroupingYet;

        if let (Some(bg), Some(wthh)) = (population.column(&columns.bg), population.column(&columns.wthh)) {
            let bg_id = bg.as_int(&columns.bg)?.to_vec();
            let fg_id = match population.column(&columns.fg) {
                Some(fg) => fg.as_int(&columns.fg)?.to_vec(),
                None => bg_id.clone(),
            };
            let groups = fg_id.iter().map(|&fg| (fg, GroupOutcome::Supplied)).collect();
            let grouping = Grouping {
                person_ids: population.person_ids().to_vec(),
                fg_id,
                bg_id,
                wthh_id: wthh.as_int(&columns.wthh)?.to_vec(),
            };
            advance(&mut state, ResolverState::Resolved);
            return Ok(self.finish(grouping, state, groups, calls_before));
        }

        // Step 1: family groups, unless supplied.
        let household = Household::read(population, rc, config.no_link_sentinel)?;
        let fg_id = match population.column(&columns.fg) {
            Some(fg) => fg.as_int(&columns.fg)?.to_vec(),
            None => {
                let fg_id = family_groups(&household, rc);
                check_single_family_per_household(household.household, &fg_id)?;
                fg_id
            }
        };
        let is_child = child_flags(&household, &fg_id, rc);
        advance(&mut state, ResolverState::FamilyGroupsComputed);

        let mut members: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row, &fg) in fg_id.iter().enumerate() {
            members.entry(fg).or_default().push(row);
        }
        let family: Vec<OpenGroup> = members.into_iter().map(|(fg_id, rows)| OpenGroup { fg_id, rows }).collect();

        let mut bg_id = fg_id.clone();
        let mut wthh_id = fg_id.clone();
        let mut outcomes = BTreeMap::new();

        // Step 2: whole-group need check, one evaluation per group.
        let grouped = columns.snapshot(population, &fg_id, &fg_id, &fg_id)?;
        let covered = family
            .par_iter()
            .map(|g| self.group_need_covered(&grouped, g))
            .collect::<Result<Vec<bool>>>()?;
        let mut open = Vec::new();
        for (group, covered) in family.into_iter().zip(covered) {
            if covered {
                outcomes.insert(group.fg_id, GroupOutcome::NeedCovered);
            } else {
                open.push(group);
            }
        }
        if open.is_empty() {
            advance(&mut state, ResolverState::Resolved);
            return Ok(self.finish(self.grouping(population, fg_id, bg_id, wthh_id), state, outcomes, calls_before));
        }

        // Step 3: own-need check, one evaluation per person of the open groups.
        let taken = || population.person_ids().iter().chain(&fg_id).copied();
        let alone = FreshIds::after(taken()).next_id();
        let open_rows: Vec<usize> = open.iter().flat_map(|g| g.rows.iter().copied()).collect();
        let own_covered = open_rows
            .par_iter()
            .map(|&row| self.own_need_covered(population, &columns, &fg_id, row, alone))
            .collect::<Result<Vec<bool>>>()?;
        let self_covering: BTreeMap<usize, bool> = open_rows.iter().copied().zip(own_covered).collect();
        advance(&mut state, ResolverState::OwnNeedsChecked);

        // Only rows of open groups are in `self_covering`.
        let split: Vec<bool> = (0..population.len())
            .map(|r| is_child[r] && self_covering.get(&r).copied().unwrap_or(false))
            .collect();
        let (contested, coinciding): (Vec<OpenGroup>, Vec<OpenGroup>) =
            open.into_iter().partition(|g| g.rows.iter().any(|&r| split[r]));
        for group in coinciding {
            outcomes.insert(group.fg_id, GroupOutcome::NoSelfCoveringChild);
        }
        if contested.is_empty() {
            advance(&mut state, ResolverState::Resolved);
            return Ok(self.finish(self.grouping(population, fg_id, bg_id, wthh_id), state, outcomes, calls_before));
        }

        // Step 4: candidates A (whole group) and B (self-covering children split off).
        // Rows outside the contested groups keep their family group in both.
        let mut fresh = FreshIds::after(taken());
        let candidate_a = fg_id.clone();
        let candidate_b = split_off(&fg_id, &split, &mut fresh);
        advance(&mut state, ResolverState::CandidatesGenerated);

        // Step 5: evaluate both candidates and choose per group.
        let (eval_a, eval_b) = rayon::join(
            || self.evaluate_candidate(population, &columns, &fg_id, &candidate_a),
            || self.evaluate_candidate(population, &columns, &fg_id, &candidate_b),
        );
        let (eval_a, eval_b) = (eval_a?, eval_b?);
        let a = CandidateResult { outcome: eval_a.float(&rc.outcome_target)?, admissible: eval_a.bool(&rc.priority_check_target)? };
        let b = CandidateResult { outcome: eval_b.float(&rc.outcome_target)?, admissible: eval_b.bool(&rc.priority_check_target)? };

        for group in &contested {
            let children: Vec<usize> = group.rows.iter().copied().filter(|&r| split[r]).collect();
            let choice = choose(&group.rows, &children, &a, &b);

            let takes_b: Vec<usize> = match &choice {
                Choice::WholeGroup => Vec::new(),
                Choice::Split(rows) => rows.clone(),
            };
            let mut wthh_fresh = None;
            for &row in &group.rows {
                let on_b = takes_b.contains(&row);
                // Members outside the self-covering children follow the group's candidate.
                let admissible = match (&choice, on_b) {
                    (Choice::WholeGroup, _) => a.admissible[row],
                    (Choice::Split(_), true) => b.admissible[row],
                    (Choice::Split(_), false) if split[row] => a.admissible[row],
                    (Choice::Split(_), false) => b.admissible[row],
                };
                bg_id[row] = if on_b { candidate_b[row] } else { candidate_a[row] };
                wthh_id[row] = if admissible { group.fg_id } else { *wthh_fresh.get_or_insert_with(|| fresh.next_id()) };
            }

            let persons = takes_b.iter().map(|&r| population.person_ids()[r]).collect();
            debug!(fg = group.fg_id, ?choice, "candidate selected");
            outcomes.insert(group.fg_id, GroupOutcome::CandidateSelection { split_off: persons });
        }

        advance(&mut state, ResolverState::Resolved);
        Ok(self.finish(self.grouping(population, fg_id, bg_id, wthh_id), state, outcomes, calls_before))
    }

    fn group_need_covered(&self, grouped: &Population, group: &OpenGroup) -> Result<bool> {
        let target = self.engine.config().resolver.need_covered_target.as_str();
        let covered = self.evaluate(grouped, target)?;
        let covered = covered.bool(target)?;
        Ok(group.rows.iter().all(|&r| covered[r]))
    }

    /// Evaluates `row` as a unit of its own, labeled `alone`, with everyone
    /// else in their family group.
    fn own_need_covered(
        &self,
        population: &Population,
        columns: &GroupColumns,
        fg_id: &[i64],
        row: usize,
        alone: i64,
    ) -> Result<bool> {
        let mut ids = fg_id.to_vec();
        ids[row] = alone;
        let snapshot = columns.snapshot(population, &ids, &ids, &ids)?;
        let target = self.engine.config().resolver.own_need_covered_target.as_str();
        Ok(self.evaluate(&snapshot, target)?.bool(target)?[row])
    }

    fn evaluate_candidate(&self, population: &Population, columns: &GroupColumns, fg: &[i64], bg: &[i64]) -> Result<Evaluation> {
        let rc = &self.engine.config().resolver;
        let snapshot = columns.snapshot(population, fg, bg, bg)?;
        self.count_call();
        self.engine
            .evaluate(&snapshot, &[rc.outcome_target.as_str(), rc.priority_check_target.as_str()], &self.options)
    }

    fn evaluate(&self, snapshot: &Population, target: &str) -> Result<Evaluation> {
        self.count_call();
        self.engine.evaluate(snapshot, &[target], &self.options)
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn grouping(&self, population: &Population, fg_id: Vec<i64>, bg_id: Vec<i64>, wthh_id: Vec<i64>) -> Grouping {
        Grouping { person_ids: population.person_ids().to_vec(), fg_id, bg_id, wthh_id }
    }

    fn finish(
        &self,
        grouping: Grouping,
        state: ResolverState,
        groups: BTreeMap<i64, GroupOutcome>,
        calls_before: usize,
    ) -> Resolution {
        let engine_calls = self.engine_calls() - calls_before;
        info!(persons = grouping.person_ids.len(), groups = groups.len(), engine_calls, "benefit units resolved");
        Resolution { grouping, report: ResolverReport { state, engine_calls, groups } }
    }
}

fn advance(state: &mut ResolverState, next: ResolverState) {
    debug!(from = %state, to = %next, "resolver state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::aggregation::{AggregationSpec, Reduction};
    use crate::compute::column::{Column, Scalar};
    use crate::config::EngineConfig;
    use crate::fixtures::{self, Person};
    use crate::params::PolicyParams;
    use crate::store::tree::RuleTree;
    use crate::store::types::RuleDefinition;

    struct Setup {
        tree: RuleTree,
        params: PolicyParams,
        config: EngineConfig,
    }

    impl Setup {
        fn new(single_adult_bonus: f64) -> Self {
            Self { tree: fixtures::tree(), params: fixtures::params(single_adult_bonus), config: EngineConfig::default() }
        }

        fn engine(&self) -> Engine<'_> {
            Engine::new(&self.tree, &self.params, &self.config).unwrap()
        }
    }

    fn resolve(persons: &[Person], single_adult_bonus: f64) -> Resolution {
        let setup = Setup::new(single_adult_bonus);
        let engine = setup.engine();
        BenefitUnitResolver::new(&engine).resolve(&fixtures::population(persons)).unwrap()
    }

    const ZERO_INCOME_FAMILY: &[Person] = &[(1, 1, 40, 2, -1, 0.0), (2, 1, 38, 1, -1, 0.0), (3, 1, 8, -1, 1, 0.0)];

    const SELF_SUFFICIENT_CHILDREN: &[Person] = &[
        (1, 1, 50, 2, -1, 0.0),
        (2, 1, 48, 1, -1, 0.0),
        (3, 1, 20, -1, 1, 800.0),
        (4, 1, 22, -1, 1, 800.0),
    ];

    #[test]
    fn test_family_without_income_is_one_claiming_unit() {
        let res = resolve(ZERO_INCOME_FAMILY, 0.0);
        assert_eq!(res.grouping.bg_id, vec![1, 1, 1]);
        assert_eq!(res.grouping.wthh_id, vec![1, 1, 1]);
        assert_eq!(res.report.state, ResolverState::Resolved);
        assert_eq!(res.report.groups[&1], GroupOutcome::NoSelfCoveringChild);
        // One group check and one check per person, no candidate evaluations.
        assert_eq!(res.report.engine_calls, 4);
    }

    #[test]
    fn test_self_sufficient_adult_children_are_split_off() {
        let res = resolve(SELF_SUFFICIENT_CHILDREN, 0.0);
        assert_eq!(res.grouping.fg_id, vec![1, 1, 1, 1]);
        assert_eq!(res.grouping.bg_id, vec![1, 1, 5, 6]);
        assert_eq!(res.grouping.wthh_id, vec![1, 1, 1, 1]);
        assert_eq!(res.report.groups[&1], GroupOutcome::CandidateSelection { split_off: vec![3, 4] });
        assert_eq!(res.report.engine_calls, 1 + 4 + 2);
    }

    #[test]
    fn test_unrelated_persons_in_one_household_fail_before_any_evaluation() {
        let setup = Setup::new(0.0);
        let engine = setup.engine();
        let resolver = BenefitUnitResolver::new(&engine);
        let pop = fixtures::population(&[(1, 1, 30, -1, -1, 0.0), (2, 1, 31, -1, -1, 0.0)]);

        let err = resolver.resolve(&pop).unwrap_err();
        assert_eq!(err, EngineError::MultipleFamilyGroupsInHousehold { household: 1, family_groups: vec![1, 2] });
        assert_eq!(resolver.engine_calls(), 0);
    }

    #[test]
    fn test_covered_groups_finish_after_the_need_check() {
        let res = resolve(&[(1, 1, 40, -1, -1, 2000.0), (2, 2, 40, -1, -1, 0.0)], 0.0);
        assert_eq!(res.report.groups[&1], GroupOutcome::NeedCovered);
        assert_eq!(res.report.groups[&2], GroupOutcome::NoSelfCoveringChild);
        assert_eq!(res.grouping.bg_id, vec![1, 2]);
        assert_eq!(res.report.engine_calls, 3);
    }

    #[test]
    fn test_favorable_whole_group_keeps_family_together() {
        let res = resolve(&[(1, 1, 50, 2, -1, 0.0), (2, 1, 48, 1, -1, 0.0), (3, 1, 20, -1, 1, 550.0)], 0.0);
        assert_eq!(res.grouping.bg_id, vec![1, 1, 1]);
        assert_eq!(res.report.groups[&1], GroupOutcome::CandidateSelection { split_off: vec![] });
    }

    #[test]
    fn test_better_own_unit_splits_the_child() {
        let res = resolve(&[(1, 1, 50, 2, -1, 0.0), (2, 1, 48, 1, -1, 0.0), (3, 1, 20, -1, 1, 550.0)], 400.0);
        assert_eq!(res.grouping.bg_id, vec![1, 1, 4]);
        assert_eq!(res.grouping.wthh_id, vec![1, 1, 1]);
    }

    #[test]
    fn test_equal_outcomes_favor_the_whole_group() {
        // Whole group: (1500 - 600) / 3 = 300 each. Own unit: 300 bonus.
        let res = resolve(&[(1, 1, 50, 2, -1, 50.0), (2, 1, 48, 1, -1, 0.0), (3, 1, 20, -1, 1, 550.0)], 300.0);
        assert_eq!(res.grouping.bg_id, vec![1, 1, 1]);
    }

    #[test]
    fn test_members_failing_the_priority_check_get_their_own_sub_household() {
        let res = resolve(&[(1, 1, 50, 2, -1, 650.0), (2, 1, 48, 1, -1, 0.0), (3, 1, 20, -1, 1, 800.0)], 0.0);
        assert_eq!(res.grouping.bg_id, vec![1, 1, 4]);
        assert_eq!(res.grouping.wthh_id, vec![5, 1, 1]);
    }

    #[test]
    fn test_resolving_its_own_family_groups_again_is_idempotent() {
        let setup = Setup::new(0.0);
        let engine = setup.engine();
        let resolver = BenefitUnitResolver::new(&engine);
        let pop = fixtures::population(SELF_SUFFICIENT_CHILDREN);

        let first = resolver.resolve(&pop).unwrap();
        let again = pop.clone().with_column("fg_id", Column::Int(first.grouping.fg_id.clone())).unwrap();
        let second = resolver.resolve(&again).unwrap();
        assert_eq!(second.grouping, first.grouping);

        let supplied = first.apply(&pop, &engine).unwrap();
        let third = resolver.resolve(&supplied).unwrap();
        assert_eq!(third.grouping, first.grouping);
        assert_eq!(third.report.engine_calls, 0);
        assert_eq!(third.report.groups[&1], GroupOutcome::Supplied);
    }

    #[test]
    fn test_resolution_feeds_the_final_evaluation() {
        let setup = Setup::new(0.0);
        let engine = setup.engine();
        let pop = fixtures::population(SELF_SUFFICIENT_CHILDREN);
        let res = BenefitUnitResolver::new(&engine).resolve(&pop).unwrap();

        let grouped = res.apply(&pop, &engine).unwrap();
        let out = engine.evaluate(&grouped, &["benefit_outcome"], &EvaluationOptions::default()).unwrap();
        // Parents share a 1000 shortfall; the split-off children need nothing.
        assert_eq!(out.float("benefit_outcome").unwrap(), &[500.0, 500.0, 0.0, 0.0]);
    }

    #[test]
    fn test_person_link_aggregations_see_every_person() {
        // Own need counts what a person's children earn.
        let own_need = RuleDefinition::vectorized("own_need_covered", &["income", "children_income", "need"], |args, _| {
            let (income, children, need) = (args.float(0)?, args.float(1)?, args.float(2)?);
            Ok(Column::Bool((0..need.len()).map(|r| income[r] + children[r] >= need[r]).collect()))
        });
        let rules = fixtures::benefit_rules_with(own_need).aggregation(
            "children_income",
            AggregationSpec::by_person_link("income", "p_id_parent_1", Reduction::Sum, Scalar::Float(0.0)),
        );
        let setup = Setup { tree: fixtures::tree_of(rules), params: fixtures::params(0.0), config: EngineConfig::default() };
        let engine = setup.engine();
        let pop = fixtures::population(&[(1, 1, 50, 2, -1, 0.0), (2, 1, 48, 1, -1, 0.0), (3, 1, 20, -1, 1, 800.0)]);

        let res = BenefitUnitResolver::new(&engine).resolve(&pop).unwrap();
        assert_eq!(res.grouping.bg_id, vec![1, 1, 4]);
        assert_eq!(res.grouping.wthh_id, vec![1, 1, 1]);
        assert_eq!(res.report.groups[&1], GroupOutcome::CandidateSelection { split_off: vec![3] });
        assert_eq!(res.report.engine_calls, 1 + 3 + 2);
    }

    #[test]
    fn test_repeated_resolution_is_deterministic() {
        let first = resolve(SELF_SUFFICIENT_CHILDREN, 0.0);
        for _ in 0..5 {
            assert_eq!(resolve(SELF_SUFFICIENT_CHILDREN, 0.0), first);
        }
    }
}

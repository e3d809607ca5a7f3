//! synthesizer.rs
//! Builds executable rules for names nothing defines: declared aggregation
//! specs first, then the `<name>_<group suffix>` convention.

use super::aggregation::{link_targets, reduce_by_group, reduce_by_link, AggregationSpec, Reduction};
use super::column::{Column, ColumnKind};
use super::population::Population;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::params::PolicyParams;
use crate::store::tree::{scope_candidates, AggregationLeaf, RuleTree, TreeNode};
use crate::store::types::{Inputs, Rule, RuleArgs, RuleFn, Validity};
use smallvec::smallvec;
use std::sync::Arc;
use tracing::debug;

/// A rule for `name` as seen from `scope`, or `None` if neither a declared
/// spec nor the naming convention applies.
pub fn resolve_missing(
    name: &str,
    scope: &[String],
    tree: &RuleTree,
    population: &Population,
    config: &EngineConfig,
) -> Option<Rule> {
    let declared = tree.resolve(scope, name).and_then(|(_, node)| match node {
        TreeNode::Aggregation(leaf) => Some(Arc::clone(leaf)),
        _ => None,
    });
    if let Some(leaf) = declared {
        debug!(name = %leaf.name, "synthesizing declared aggregation");
        return Some(from_spec(&leaf, config));
    }
    by_convention(name, scope, tree, population, config)
}

/// Turns a declared spec into a rule living in the spec's namespace, so its
/// source and key names resolve the way a rule's inputs would there.
pub fn from_spec(leaf: &AggregationLeaf, config: &EngineConfig) -> Rule {
    match &leaf.spec {
        AggregationSpec::ByGroup { source, group, reduction } => {
            let reduction = *reduction;
            let func = move |args: &RuleArgs<'_>, _: &PolicyParams| -> Result<Column> {
                Ok(reduce_by_group(args.column(0), args.int(1)?, reduction))
            };
            synthesized(&leaf.name, leaf.namespace.clone(), smallvec![source.clone(), group.clone()], func)
        }
        AggregationSpec::ByPersonLink { source, foreign_key, reduction, default } => {
            let (reduction, default) = (*reduction, *default);
            let sentinel = config.no_link_sentinel;
            let fk_name = foreign_key.clone();
            let name = leaf.name.clone();
            let func = move |args: &RuleArgs<'_>, _: &PolicyParams| -> Result<Column> {
                let targets = link_targets(&fk_name, args.int(1)?, args.int(2)?, sentinel)?;
                reduce_by_link(&name, args.column(0), &targets, reduction, default)
            };
            let inputs = smallvec![source.clone(), foreign_key.clone(), config.person_id.clone()];
            synthesized(&leaf.name, leaf.namespace.clone(), inputs, func)
        }
    }
}

/// `income_hh` becomes "sum `income` over `hh_id`", or "any" when the
/// source turns out to be boolean.
fn by_convention(
    name: &str,
    scope: &[String],
    tree: &RuleTree,
    population: &Population,
    config: &EngineConfig,
) -> Option<Rule> {
    config.groups.iter().find_map(|level| {
        let prefix = name.strip_suffix(level.suffix.as_str())?.strip_suffix('_')?;
        if prefix.is_empty() {
            return None;
        }
        let source = find_source(prefix, scope, tree, population)?;
        let key = format!("{}_{}", source, level.suffix);
        debug!(%name, %key, group = %level.id_column, "synthesizing group aggregation");

        let func = |args: &RuleArgs<'_>, _: &PolicyParams| -> Result<Column> {
            let source = args.column(0);
            let reduction = match source.kind() {
                ColumnKind::Bool => Reduction::Any,
                _ => Reduction::Sum,
            };
            Ok(reduce_by_group(source, args.int(1)?, reduction))
        };
        Some(synthesized(&key, Vec::new(), smallvec![source, level.id_column.clone()], func))
    })
}

/// Qualified name `prefix` refers to from `scope`, if anything defines it.
fn find_source(prefix: &str, scope: &[String], tree: &RuleTree, population: &Population) -> Option<String> {
    scope_candidates(scope, prefix).find(|qualified| {
        population.has_column(qualified)
            || matches!(tree.get(qualified), Some(TreeNode::Rule(_) | TreeNode::Aggregation(_)))
    })
}

fn synthesized<F>(name: &str, namespace: Vec<String>, inputs: Inputs, func: F) -> Rule
where
    F: Fn(&RuleArgs<'_>, &PolicyParams) -> Result<Column> + Send + Sync + 'static,
{
    Rule {
        id: name.to_string(),
        name: name.to_string(),
        namespace,
        validity: Validity::ALWAYS,
        inputs,
        rounding_key: None,
        func: RuleFn::Vectorized(Arc::new(func)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::column::Scalar;
    use crate::store::registry::RuleRegistry;
    use crate::store::types::{split_path, Namespace, RuleDefinition};
    use chrono::NaiveDate;

    fn population() -> Population {
        Population::new("p_id", vec![1, 2, 3])
            .unwrap()
            .with_column("hh_id", Column::Int(vec![1, 1, 2]))
            .unwrap()
            .with_column("income", Column::Float(vec![100.0, 50.0, 10.0]))
            .unwrap()
            .with_column("is_child", Column::Bool(vec![false, true, false]))
            .unwrap()
            .with_column("p_id_parent_1", Column::Int(vec![-1, 1, -1]))
            .unwrap()
    }

    fn tree(namespaces: Vec<Namespace>) -> RuleTree {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        RuleRegistry::new(namespaces).unwrap().load(date).unwrap()
    }

    fn run(rule: &Rule, pop: &Population) -> Column {
        let columns = rule.inputs.iter().map(|i| Arc::clone(pop.column(i).unwrap())).collect();
        let args = RuleArgs::new(&rule.name, &rule.inputs, columns, pop.len());
        match &rule.func {
            RuleFn::Vectorized(f) => f(&args, &PolicyParams::empty()).unwrap(),
            RuleFn::RowWise { .. } => panic!("synthesized rules are vectorized"),
        }
    }

    #[test]
    fn test_suffix_convention_sums_numeric_sources() {
        let pop = population();
        let rule = resolve_missing("income_hh", &[], &RuleTree::new(), &pop, &EngineConfig::default()).unwrap();
        assert_eq!(rule.name, "income_hh");
        assert_eq!(rule.inputs.as_slice(), ["income", "hh_id"]);
        assert_eq!(run(&rule, &pop), Column::Float(vec![150.0, 150.0, 10.0]));
    }

    #[test]
    fn test_suffix_convention_uses_any_for_booleans() {
        let pop = population();
        let rule = resolve_missing("is_child_hh", &[], &RuleTree::new(), &pop, &EngineConfig::default()).unwrap();
        assert_eq!(run(&rule, &pop), Column::Bool(vec![true, true, false]));
    }

    #[test]
    fn test_convention_key_follows_the_resolved_source() {
        let ns = Namespace::new("taxes").rule(RuleDefinition::vectorized("tax", &[], |a, _| {
            Ok(Column::Float(vec![1.0; a.rows()]))
        }));
        let rule = resolve_missing("tax_hh", &split_path("taxes"), &tree(vec![ns]), &population(), &EngineConfig::default())
            .unwrap();
        assert_eq!(rule.name, "taxes.tax_hh");
        assert_eq!(rule.inputs.as_slice(), ["taxes.tax", "hh_id"]);
    }

    #[test]
    fn test_unknown_prefix_or_suffix_is_not_synthesized() {
        let config = EngineConfig::default();
        let pop = population();
        assert!(resolve_missing("wealth_hh", &[], &RuleTree::new(), &pop, &config).is_none());
        assert!(resolve_missing("income_xx", &[], &RuleTree::new(), &pop, &config).is_none());
        assert!(resolve_missing("_hh", &[], &RuleTree::new(), &pop, &config).is_none());
    }

    #[test]
    fn test_declared_spec_beats_the_convention() {
        let ns = Namespace::new("").aggregation("income_hh", AggregationSpec::by_group("income", "hh_id", Reduction::Max));
        let pop = population();
        let rule = resolve_missing("income_hh", &[], &tree(vec![ns]), &pop, &EngineConfig::default()).unwrap();
        assert_eq!(run(&rule, &pop), Column::Float(vec![100.0, 100.0, 10.0]));
    }

    #[test]
    fn test_person_link_spec_collects_linking_rows() {
        let ns = Namespace::new("").aggregation(
            "children_income",
            AggregationSpec::by_person_link("income", "p_id_parent_1", Reduction::Sum, Scalar::Float(0.0)),
        );
        let pop = population();
        let rule = resolve_missing("children_income", &[], &tree(vec![ns]), &pop, &EngineConfig::default()).unwrap();
        assert_eq!(rule.inputs.as_slice(), ["income", "p_id_parent_1", "p_id"]);
        assert_eq!(run(&rule, &pop), Column::Float(vec![50.0, 0.0, 0.0]));
    }
}

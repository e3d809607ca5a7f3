use super::tree::{AggregationLeaf, RuleTree, TreeNode};
use super::types::{qualify, split_path, Namespace, Rule, RuleSource};
use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Every rule variant reachable from the configured namespace roots.
///
/// Construction validates the whole set for temporal conflicts, so a
/// registry that exists can answer `load(date)` for any date.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Arc<Rule>>,
    aggregations: Vec<Arc<AggregationLeaf>>,
}

impl RuleRegistry {
    pub fn new(namespaces: impl IntoIterator<Item = Namespace>) -> Result<Self> {
        let mut rules = Vec::new();
        let mut aggregations = Vec::new();

        for ns in namespaces {
            for def in &ns.rules {
                rules.push(Arc::new(Rule::from_definition(&ns.path, def)));
            }
            for (name, spec) in &ns.aggregations {
                aggregations.push(Arc::new(AggregationLeaf {
                    name: qualify(&ns.path, name),
                    namespace: ns.path.clone(),
                    spec: spec.clone(),
                }));
            }
        }

        check_validities(&rules)?;
        check_conflicts(&rules)?;

        info!(rules = rules.len(), aggregations = aggregations.len(), "rule registry built");
        Ok(Self { rules, aggregations })
    }

    /// Collects the namespaces of several statically declared rule modules.
    pub fn from_sources(sources: &[&dyn RuleSource]) -> Result<Self> {
        Self::new(sources.iter().flat_map(|s| s.namespaces()))
    }

    /// The rule tree active at `date`. Inactive variants are left out entirely.
    pub fn load(&self, date: NaiveDate) -> Result<RuleTree> {
        let mut tree = RuleTree::new();
        let mut active = 0usize;

        for rule in self.rules.iter().filter(|r| r.validity.contains(date)) {
            tree.insert(&split_path(&rule.name), TreeNode::Rule(Arc::clone(rule)))?;
            active += 1;
        }
        for agg in &self.aggregations {
            tree.insert(&split_path(&agg.name), TreeNode::Aggregation(Arc::clone(agg)))?;
        }

        debug!(%date, active, total = self.rules.len(), "rule tree loaded");
        Ok(tree)
    }

    /// All variants publishing `qualified`, regardless of date.
    pub fn variants(&self, qualified: &str) -> Vec<&Arc<Rule>> {
        self.rules.iter().filter(|r| r.name == qualified).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

fn check_validities(rules: &[Arc<Rule>]) -> Result<()> {
    match rules.iter().find(|r| r.validity.is_empty()) {
        Some(rule) => Err(EngineError::InvalidValidity { rule: rule.id.clone(), validity: rule.validity }),
        None => Ok(()),
    }
}

/// Every pair of variants sharing a qualified name must have disjoint validity.
fn check_conflicts(rules: &[Arc<Rule>]) -> Result<()> {
    let mut by_name: BTreeMap<&str, Vec<&Arc<Rule>>> = BTreeMap::new();
    for rule in rules {
        by_name.entry(rule.name.as_str()).or_default().push(rule);
    }

    for (name, variants) in by_name {
        for (i, a) in variants.iter().enumerate() {
            for b in &variants[i + 1..] {
                if let Some(overlap) = a.validity.intersection(&b.validity) {
                    return Err(EngineError::ConflictingRule {
                        name: name.to_string(),
                        rules: vec![a.id.clone(), b.id.clone()],
                        overlap,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::aggregation::{AggregationSpec, Reduction};
    use crate::compute::column::Column;
    use crate::store::types::{RuleDefinition, Validity};
    use rstest::rstest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn constant(id: &str, value: f64) -> RuleDefinition {
        RuleDefinition::vectorized(id, &[], move |args, _| Ok(Column::Float(vec![value; args.rows()])))
    }

    /// The law changed on 2003-04-01: two variants publish `taxes.tax`.
    fn reformed() -> Namespace {
        Namespace::new("taxes")
            .rule(constant("tax_until_2003", 1.0).published_as("tax").valid(Validity::until(d(2003, 3, 31))))
            .rule(constant("tax_since_2003", 2.0).published_as("tax").valid(Validity::since(d(2003, 4, 1))))
    }

    #[rstest]
    #[case(d(2003, 3, 30), "tax_until_2003")]
    #[case(d(2003, 3, 31), "tax_until_2003")]
    #[case(d(2003, 4, 1), "tax_since_2003")]
    #[case(d(2003, 4, 2), "tax_since_2003")]
    #[case(d(1990, 1, 1), "tax_until_2003")]
    #[case(d(2030, 1, 1), "tax_since_2003")]
    fn test_exactly_one_variant_is_active_around_the_boundary(#[case] date: NaiveDate, #[case] expected: &str) {
        let registry = RuleRegistry::new([reformed()]).unwrap();
        let tree = registry.load(date).unwrap();
        assert_eq!(tree.rule("taxes.tax").unwrap().id, expected);

        let active: Vec<_> = registry.variants("taxes.tax").into_iter().filter(|r| r.validity.contains(date)).collect();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn test_overlapping_variants_fail_at_construction() {
        let ns = Namespace::new("taxes")
            .rule(constant("tax_old", 1.0).published_as("tax").valid(Validity::until(d(2003, 4, 1))))
            .rule(constant("tax_new", 2.0).published_as("tax").valid(Validity::since(d(2003, 4, 1))));

        let err = RuleRegistry::new([ns]).unwrap_err();
        assert_eq!(
            err,
            EngineError::ConflictingRule {
                name: "taxes.tax".into(),
                rules: vec!["tax_old".into(), "tax_new".into()],
                overlap: Validity::between(d(2003, 4, 1), d(2003, 4, 1)),
            }
        );
    }

    #[test]
    fn test_conflicts_are_detected_across_roots() {
        let a = Namespace::new("taxes").rule(constant("tax", 1.0));
        let b = Namespace::new("taxes").rule(constant("tax", 2.0).valid(Validity::since(d(2020, 1, 1))));
        assert!(matches!(RuleRegistry::new([a, b]), Err(EngineError::ConflictingRule { .. })));
    }

    #[test]
    fn test_same_leaf_in_different_namespaces_is_not_a_conflict() {
        let a = Namespace::new("taxes").rule(constant("rate", 0.1));
        let b = Namespace::new("benefits").rule(constant("rate", 0.5));
        let tree = RuleRegistry::new([a, b]).unwrap().load(d(2024, 1, 1)).unwrap();
        assert!(tree.rule("taxes.rate").is_some());
        assert!(tree.rule("benefits.rate").is_some());
    }

    #[test]
    fn test_empty_validity_is_rejected() {
        let ns = Namespace::new("").rule(constant("odd", 0.0).valid(Validity::between(d(2010, 1, 1), d(2009, 1, 1))));
        assert!(matches!(RuleRegistry::new([ns]), Err(EngineError::InvalidValidity { .. })));
    }

    #[test]
    fn test_aggregation_colliding_with_rule_is_duplicate_definition() {
        let ns = Namespace::new("")
            .rule(constant("income_hh", 0.0))
            .aggregation("income_hh", AggregationSpec::by_group("income", "hh_id", Reduction::Sum));
        let registry = RuleRegistry::new([ns]).unwrap();
        let err = registry.load(d(2024, 1, 1)).unwrap_err();
        assert_eq!(err, EngineError::DuplicateDefinition { path: "income_hh".into() });
    }

    #[test]
    fn test_load_is_idempotent() {
        let registry = RuleRegistry::new([reformed()]).unwrap();
        let first = registry.load(d(2010, 6, 1)).unwrap();
        let second = registry.load(d(2010, 6, 1)).unwrap();
        let ids = |t: &RuleTree| t.rule("taxes.tax").map(|r| r.id.clone());
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_from_sources_collects_all_modules() {
        struct Taxes;
        impl RuleSource for Taxes {
            fn namespaces(&self) -> Vec<Namespace> {
                vec![Namespace::new("taxes").rule(constant("tax", 1.0))]
            }
        }
        let benefits = Namespace::new("benefits").rule(constant("housing", 1.0));
        let registry = RuleRegistry::from_sources(&[&Taxes, &benefits]).unwrap();
        assert_eq!(registry.rule_count(), 2);
    }
}

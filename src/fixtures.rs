//! A toy benefit rule set and population builder shared by tests.

use crate::compute::aggregation::{AggregationSpec, Reduction};
use crate::compute::column::{Column, ColumnKind, Scalar};
use crate::compute::population::Population;
use crate::params::PolicyParams;
use crate::store::registry::RuleRegistry;
use crate::store::tree::RuleTree;
use crate::store::types::{Namespace, RuleDefinition};
use chrono::NaiveDate;
use serde_json::json;

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
}

/// Need 500 per adult and 300 per minor. A person who covers their own need
/// with income above the shared-unit limit is inadmissible in a shared unit.
pub fn params(single_adult_bonus: f64) -> PolicyParams {
    PolicyParams::new(json!({
        "need": { "adult": 500.0, "child": 300.0 },
        "priority": { "shared_unit_income_limit": 600.0 },
        "outcome": { "single_adult_bonus": single_adult_bonus },
    }))
}

pub fn benefit_rules() -> Namespace {
    benefit_rules_with(RuleDefinition::vectorized("own_need_covered", &["income", "need"], |args, _| {
        let (income, need) = (args.float(0)?, args.float(1)?);
        Ok(Column::Bool(income.iter().zip(need).map(|(i, n)| i >= n).collect()))
    }))
}

/// The toy rule set with `own_need` as the own-need-covered rule.
pub fn benefit_rules_with(own_need: RuleDefinition) -> Namespace {
    Namespace::new("")
        .rule(RuleDefinition::row_wise("need", &["age"], ColumnKind::Float, |row, p| {
            let key = if row[0].as_f64() >= 18.0 { "need.adult" } else { "need.child" };
            Ok(Scalar::Float(p.lookup_f64(key)?))
        }))
        .aggregation("members_bg", AggregationSpec::by_group("need", "bg_id", Reduction::Count))
        .rule(RuleDefinition::vectorized("basic_need_covered", &["income_bg", "need_bg"], |args, _| {
            let (income, need) = (args.float(0)?, args.float(1)?);
            Ok(Column::Bool(income.iter().zip(need).map(|(i, n)| i >= n).collect()))
        }))
        .rule(own_need)
        .rule(RuleDefinition::row_wise(
            "benefit_outcome",
            &["need_bg", "income_bg", "members_bg", "age"],
            ColumnKind::Float,
            |row, p| {
                let members = row[2].as_f64();
                let shortfall = (row[0].as_f64() - row[1].as_f64()).max(0.0) / members;
                let bonus = if members == 1.0 && row[3].as_f64() >= 18.0 {
                    p.lookup_f64("outcome.single_adult_bonus")?
                } else {
                    0.0
                };
                Ok(Scalar::Float(shortfall + bonus))
            },
        ))
        .rule(RuleDefinition::row_wise(
            "priority_check",
            &["income", "need", "members_bg"],
            ColumnKind::Bool,
            |row, p| {
                let limit = p.lookup_f64("priority.shared_unit_income_limit")?;
                let (income, need, members) = (row[0].as_f64(), row[1].as_f64(), row[2].as_f64());
                Ok(Scalar::Bool(!(income >= need && income > limit && members > 1.0)))
            },
        ))
}

pub fn tree() -> RuleTree {
    tree_of(benefit_rules())
}

pub fn tree_of(rules: Namespace) -> RuleTree {
    RuleRegistry::new([rules]).unwrap().load(date()).unwrap()
}

/// A person: id, household, age, partner, parent, income. `-1` means no link.
pub type Person = (i64, i64, i64, i64, i64, f64);

pub fn population(persons: &[Person]) -> Population {
    let int = |f: fn(&Person) -> i64| Column::Int(persons.iter().map(f).collect());
    Population::new("p_id", persons.iter().map(|p| p.0).collect())
        .unwrap()
        .with_column("hh_id", int(|p| p.1))
        .unwrap()
        .with_column("age", int(|p| p.2))
        .unwrap()
        .with_column("p_id_partner", int(|p| p.3))
        .unwrap()
        .with_column("p_id_parent_1", int(|p| p.4))
        .unwrap()
        .with_column("p_id_parent_2", int(|_| -1))
        .unwrap()
        .with_column("income", Column::Float(persons.iter().map(|p| p.5).collect()))
        .unwrap()
}

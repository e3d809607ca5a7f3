//! Defines the error taxonomy shared by the registry, the engine and the resolver.
//!
//! Every variant is fatal: errors propagate to the caller at the point of
//! detection and there is no partial-result mode.

use crate::compute::column::ColumnKind;
use crate::store::types::Validity;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Two variants publishing the same qualified name are active on a common date.
    #[error("Conflicting rules for '{name}': {rules:?} are all active during {overlap}")]
    ConflictingRule {
        name: String,
        rules: Vec<String>,
        overlap: Validity,
    },

    /// Two leaves were inserted at the same namespace path.
    #[error("Duplicate definition at '{path}'")]
    DuplicateDefinition { path: String },

    /// `chain` runs from the requested target down to `name` itself.
    #[error("Cannot resolve '{name}' (dependency chain: {})", chain.join(" -> "))]
    MissingDependency { name: String, chain: Vec<String> },

    #[error("Circular dependency between {members:?}")]
    CircularDependency { members: Vec<String> },

    /// A person-link column names a person id that is not in the population.
    #[error("Column '{column}' of person {person} points to unknown person {target}")]
    InvalidForeignKey {
        column: String,
        person: i64,
        target: i64,
    },

    #[error("Household {household} contains several family groups {family_groups:?}; supply the grouping columns explicitly")]
    MultipleFamilyGroupsInHousehold {
        household: i64,
        family_groups: Vec<i64>,
    },

    #[error("Rule '{rule}' has an empty validity interval {validity}")]
    InvalidValidity { rule: String, validity: Validity },

    #[error("Column '{name}' has type {found:?}, expected {expected:?}")]
    ColumnType {
        name: String,
        expected: ColumnKind,
        found: ColumnKind,
    },

    #[error("Column '{name}' has {found} rows, expected {expected}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Rule '{rule}' requests rounding key '{key}' which the policy does not define")]
    MissingRoundingSpec { rule: String, key: String },

    #[error("Policy parameter '{path}': {msg}")]
    Parameter { path: String, msg: String },

    #[error("Rule '{rule}' failed: {msg}")]
    RuleFailed { rule: String, msg: String },

    /// A result was read for a name the evaluation did not produce.
    #[error("'{name}' is not among the evaluated columns")]
    NotEvaluated { name: String },

    #[error("Invalid population: {0}")]
    InvalidPopulation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn rule_failed(rule: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RuleFailed { rule: rule.into(), msg: msg.into() }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

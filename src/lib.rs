// Core of a date-versioned tax and benefit rule engine.
//
// `store` holds rule definitions and assembles the rule tree active on a date,
// `compute` plans and evaluates requested columns over a population, and
// `resolver` assigns persons to claiming units by evaluating candidate
// groupings with the engine.

pub mod analysis;
pub mod compute;
pub mod config;
pub mod error;
pub mod params;
pub mod resolver;
pub mod store;

#[cfg(test)]
pub(crate) mod fixtures;

pub use compute::{Column, ColumnKind, Engine, Evaluation, EvaluationOptions, Population, Scalar};
pub use config::{EngineConfig, ResolverConfig};
pub use error::{EngineError, Result};
pub use params::PolicyParams;
pub use resolver::{BenefitUnitResolver, Grouping, Resolution, ResolverState};
pub use store::{Namespace, RuleDefinition, RuleRegistry, RuleSource, RuleTree, TreeCache, Validity};

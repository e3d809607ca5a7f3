//! Columns, the population table and the execution engine.

pub mod aggregation;
pub mod column;
pub mod engine;
pub mod planner;
pub mod population;
pub mod rounding;
pub mod synthesizer;

pub use aggregation::{AggregationSpec, Reduction};
pub use column::{Column, ColumnKind, Scalar};
pub use engine::{Engine, Evaluation, EvaluationOptions};
pub use planner::Plan;
pub use population::Population;
pub use rounding::{RoundingDirection, RoundingPolicy, RoundingSpec};

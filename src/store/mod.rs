//! Rule definitions, the date-versioned registry and the namespace tree.

pub mod cache;
pub mod registry;
pub mod tree;
pub mod types;

pub use cache::TreeCache;
pub use registry::RuleRegistry;
pub use tree::{AggregationLeaf, RuleTree, TreeNode};
pub use types::{Namespace, Rule, RuleArgs, RuleDefinition, RuleFn, RuleSource, Validity};

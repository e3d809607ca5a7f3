//! tree.rs
//! The namespace tree: qualified names nested by their dotted path, so that
//! `taxes.income.tax` lives at `tree["taxes"]["income"]["tax"]`.

use super::types::{qualify, split_path, Rule};
use crate::compute::aggregation::AggregationSpec;
use crate::error::{EngineError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An aggregation declared in a namespace, consulted only when its name is
/// needed and nothing else defines it.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationLeaf {
    pub name: String,
    pub namespace: Vec<String>,
    pub spec: AggregationSpec,
}

#[derive(Debug, Clone)]
pub enum TreeNode {
    Namespace(RuleTree),
    Rule(Arc<Rule>),
    Aggregation(Arc<AggregationLeaf>),
}

impl TreeNode {
    fn is_same_leaf(&self, other: &TreeNode) -> bool {
        match (self, other) {
            (TreeNode::Rule(a), TreeNode::Rule(b)) => Arc::ptr_eq(a, b),
            (TreeNode::Aggregation(a), TreeNode::Aggregation(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleTree {
    children: BTreeMap<String, TreeNode>,
}

impl RuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Inserts a leaf at `path`, creating intermediate namespaces.
    pub fn insert(&mut self, path: &[String], leaf: TreeNode) -> Result<()> {
        let Some((last, parents)) = path.split_last() else {
            return Err(EngineError::Config("cannot insert a leaf at the root path".into()));
        };
        let mut level = self;
        for (depth, segment) in parents.iter().enumerate() {
            let node = level
                .children
                .entry(segment.clone())
                .or_insert_with(|| TreeNode::Namespace(RuleTree::new()));
            level = match node {
                TreeNode::Namespace(sub) => sub,
                _ => {
                    return Err(EngineError::DuplicateDefinition { path: path[..=depth].join(".") });
                }
            };
        }
        if level.children.contains_key(last) {
            return Err(EngineError::DuplicateDefinition { path: path.join(".") });
        }
        level.children.insert(last.clone(), leaf);
        Ok(())
    }

    /// Deep union of two trees. Leaves may only coincide if they are the same object.
    pub fn merge(mut self, other: RuleTree) -> Result<RuleTree> {
        self.merge_at(&mut Vec::new(), other)?;
        Ok(self)
    }

    fn merge_at(&mut self, prefix: &mut Vec<String>, other: RuleTree) -> Result<()> {
        for (key, incoming) in other.children {
            prefix.push(key.clone());
            match self.children.get_mut(&key) {
                None => {
                    self.children.insert(key, incoming);
                }
                Some(existing) => match (existing, incoming) {
                    (TreeNode::Namespace(mine), TreeNode::Namespace(theirs)) => {
                        mine.merge_at(prefix, theirs)?;
                    }
                    (existing, node) if existing.is_same_leaf(&node) => {}
                    _ => {
                        return Err(EngineError::DuplicateDefinition { path: prefix.join(".") });
                    }
                },
            }
            prefix.pop();
        }
        Ok(())
    }

    pub fn get(&self, qualified: &str) -> Option<&TreeNode> {
        self.get_path(&split_path(qualified))
    }

    pub fn get_path(&self, path: &[String]) -> Option<&TreeNode> {
        let (last, parents) = path.split_last()?;
        let mut level = self;
        for segment in parents {
            match level.children.get(segment)? {
                TreeNode::Namespace(sub) => level = sub,
                _ => return None,
            }
        }
        level.children.get(last)
    }

    pub fn rule(&self, qualified: &str) -> Option<&Arc<Rule>> {
        match self.get(qualified)? {
            TreeNode::Rule(rule) => Some(rule),
            _ => None,
        }
    }

    /// Finds `name` as seen from `scope`: the scope itself first, then each
    /// enclosing namespace, ending at the root where a dotted name is absolute.
    pub fn resolve(&self, scope: &[String], name: &str) -> Option<(String, &TreeNode)> {
        scope_candidates(scope, name).find_map(|qualified| match self.get(&qualified)? {
            TreeNode::Namespace(_) => None,
            leaf => Some((qualified, leaf)),
        })
    }

    /// Every leaf with its qualified name, in name order.
    pub fn leaves(&self) -> Vec<(String, &TreeNode)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &mut Vec<String>, out: &mut Vec<(String, &'a TreeNode)>) {
        for (key, node) in &self.children {
            match node {
                TreeNode::Namespace(sub) => {
                    prefix.push(key.clone());
                    sub.collect_leaves(prefix, out);
                    prefix.pop();
                }
                leaf => out.push((qualify(prefix, key), leaf)),
            }
        }
    }
}

/// Qualified names `name` could refer to from `scope`, innermost first.
pub fn scope_candidates<'a>(scope: &'a [String], name: &'a str) -> impl Iterator<Item = String> + 'a {
    (0..=scope.len()).rev().map(move |depth| qualify(&scope[..depth], name))
}

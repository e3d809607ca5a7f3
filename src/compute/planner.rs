//! planner.rs
//! Builds the dependency closure of a set of targets.
//!
//! Each name is looked up from the scope of the rule that declares it: at
//! every level from the innermost namespace outwards, a population column
//! wins over a rule of the same qualified name. Names found nowhere go to
//! the synthesizer.

use super::population::Population;
use super::synthesizer;
use crate::analysis::topology;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::store::tree::{scope_candidates, RuleTree, TreeNode};
use crate::store::types::Rule;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum PlanNodeKind {
    /// Read straight from the population.
    Input,
    Rule { rule: Arc<Rule>, synthesized: bool },
}

#[derive(Debug, Clone)]
pub struct PlanNode {
    pub key: String,
    pub kind: PlanNodeKind,
    /// Plan indices of the rule's inputs, in declaration order.
    pub deps: Vec<usize>,
}

/// The closure of a request in evaluation order.
#[derive(Debug, Clone)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
    /// Node indices in an order where every node follows its inputs.
    pub order: Vec<usize>,
    /// Each requested name with the node that answers it.
    pub targets: Vec<(String, usize)>,
}

impl Plan {
    pub fn build(tree: &RuleTree, population: &Population, config: &EngineConfig, targets: &[&str]) -> Result<Plan> {
        let mut planner = Planner { tree, population, config, nodes: Vec::new(), index: HashMap::new() };
        let mut resolved = Vec::with_capacity(targets.len());
        for &target in targets {
            let mut chain = Vec::new();
            resolved.push((target.to_string(), planner.require(&[], target, &mut chain)?));
        }

        let names: Vec<String> = planner.nodes.iter().map(|n| n.key.clone()).collect();
        let deps: Vec<Vec<usize>> = planner.nodes.iter().map(|n| n.deps.clone()).collect();
        let order = topology::evaluation_order(&names, &deps)?;

        debug!(targets = targets.len(), nodes = planner.nodes.len(), "evaluation planned");
        Ok(Plan { nodes: planner.nodes, order, targets: resolved })
    }

    /// Qualified names of the rules the plan executes, in evaluation order.
    pub fn rule_names(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|&&i| matches!(self.nodes[i].kind, PlanNodeKind::Rule { .. }))
            .map(|&i| self.nodes[i].key.clone())
            .collect()
    }
}

struct Planner<'a> {
    tree: &'a RuleTree,
    population: &'a Population,
    config: &'a EngineConfig,
    nodes: Vec<PlanNode>,
    index: HashMap<String, usize>,
}

impl Planner<'_> {
    /// Returns the node for `name` seen from `scope`, planning it and its
    /// inputs on first use. `chain` holds the names that led here.
    fn require(&mut self, scope: &[String], name: &str, chain: &mut Vec<String>) -> Result<usize> {
        let (key, kind) = match self.locate(scope, name) {
            Some(found) => found,
            None => {
                let rule = synthesizer::resolve_missing(name, scope, self.tree, self.population, self.config)
                    .ok_or_else(|| {
                        let mut chain = chain.clone();
                        chain.push(name.to_string());
                        EngineError::MissingDependency { name: name.to_string(), chain }
                    })?;
                (rule.name.clone(), PlanNodeKind::Rule { rule: Arc::new(rule), synthesized: true })
            }
        };

        if let Some(&existing) = self.index.get(&key) {
            return Ok(existing);
        }

        // Registered before its inputs so that a cycle finds it again instead of recursing forever.
        let id = self.nodes.len();
        self.nodes.push(PlanNode { key: key.clone(), kind: kind.clone(), deps: Vec::new() });
        self.index.insert(key.clone(), id);

        if let PlanNodeKind::Rule { rule, .. } = kind {
            chain.push(key);
            let mut deps = Vec::with_capacity(rule.inputs.len());
            for input in &rule.inputs {
                deps.push(self.require(&rule.namespace, input, chain)?);
            }
            chain.pop();
            self.nodes[id].deps = deps;
        }
        Ok(id)
    }

    fn locate(&self, scope: &[String], name: &str) -> Option<(String, PlanNodeKind)> {
        scope_candidates(scope, name).find_map(|qualified| {
            let node = self.tree.get(&qualified);
            if self.population.has_column(&qualified) {
                if let Some(TreeNode::Rule(rule)) = node {
                    if !self.index.contains_key(&qualified) {
                        warn!(name = %qualified, rule = %rule.id, "population column overrides rule");
                    }
                }
                return Some((qualified, PlanNodeKind::Input));
            }
            match node {
                Some(TreeNode::Rule(rule)) => {
                    Some((qualified, PlanNodeKind::Rule { rule: Arc::clone(rule), synthesized: false }))
                }
                _ => None,
            }
        })
    }
}

use super::column::{Column, ColumnKind, Scalar};
use super::planner::{Plan, PlanNodeKind};
use super::population::Population;
use super::rounding::RoundingPolicy;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::params::PolicyParams;
use crate::store::tree::RuleTree;
use crate::store::types::{Rule, RuleArgs, RuleFn, RowFn};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Per-request switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationOptions {
    /// Apply rounding specs. Also needs `EngineConfig::rounding`.
    pub rounding: bool,
    /// Return every column of the closure, not only the targets.
    pub keep_intermediates: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self { rounding: true, keep_intermediates: false }
    }
}

/// Result columns of one request, row-aligned to `person_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub person_ids: Vec<i64>,
    pub columns: BTreeMap<String, Column>,
    /// Qualified names of the rules executed, in execution order.
    pub invoked: Vec<String>,
}

impl Evaluation {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn float(&self, name: &str) -> Result<&[f64]> {
        self.required(name)?.as_float(name)
    }

    pub fn bool(&self, name: &str) -> Result<&[bool]> {
        self.required(name)?.as_bool(name)
    }

    fn required(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| EngineError::NotEvaluated { name: name.to_string() })
    }
}

/// Evaluates requested names over a population with the rules of one tree.
///
/// The engine holds no state between calls; every `evaluate` builds its own
/// plan, so one engine can serve concurrent requests.
pub struct Engine<'a> {
    tree: &'a RuleTree,
    params: &'a PolicyParams,
    config: &'a EngineConfig,
    rounding: RoundingPolicy,
}

impl<'a> Engine<'a> {
    pub fn new(tree: &'a RuleTree, params: &'a PolicyParams, config: &'a EngineConfig) -> Result<Self> {
        let rounding = params.rounding_policy()?;
        Ok(Self { tree, params, config, rounding })
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub fn plan(&self, population: &Population, targets: &[&str]) -> Result<Plan> {
        Plan::build(self.tree, population, self.config, targets)
    }

    pub fn evaluate(&self, population: &Population, targets: &[&str], options: &EvaluationOptions) -> Result<Evaluation> {
        let plan = self.plan(population, targets)?;
        let mut values: Vec<Option<Arc<Column>>> = vec![None; plan.nodes.len()];
        let mut invoked = Vec::new();

        for &id in &plan.order {
            let node = &plan.nodes[id];
            let column = match &node.kind {
                PlanNodeKind::Input => population
                    .column(&node.key)
                    .cloned()
                    .ok_or_else(|| EngineError::InvalidPopulation(format!("column '{}' disappeared", node.key)))?,
                PlanNodeKind::Rule { rule, .. } => {
                    // The topological order guarantees every input is already computed.
                    let inputs = node
                        .deps
                        .iter()
                        .map(|&dep| values[dep].clone())
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| EngineError::rule_failed(&rule.name, "input evaluated out of order"))?;
                    invoked.push(rule.name.clone());
                    Arc::new(self.run_rule(rule, inputs, population.len(), options)?)
                }
            };
            values[id] = Some(column);
        }

        let mut columns = BTreeMap::new();
        if options.keep_intermediates {
            for (node, value) in plan.nodes.iter().zip(&values) {
                if let Some(col) = value {
                    columns.insert(node.key.clone(), col.as_ref().clone());
                }
            }
        }
        for (name, id) in &plan.targets {
            if let Some(col) = &values[*id] {
                columns.insert(name.clone(), col.as_ref().clone());
            }
        }

        debug!(rows = population.len(), targets = targets.len(), rules = invoked.len(), "evaluation finished");
        Ok(Evaluation { person_ids: population.person_ids().to_vec(), columns, invoked })
    }

    fn run_rule(&self, rule: &Rule, inputs: Vec<Arc<Column>>, rows: usize, options: &EvaluationOptions) -> Result<Column> {
        let output = match &rule.func {
            RuleFn::Vectorized(func) => {
                let args = RuleArgs::new(&rule.name, &rule.inputs, inputs, rows);
                func(&args, self.params)?
            }
            RuleFn::RowWise { output, func } => self.lift(rule, func.as_ref(), *output, &inputs, rows)?,
        };

        if output.len() != rows {
            return Err(EngineError::ShapeMismatch { name: rule.name.clone(), expected: rows, found: output.len() });
        }

        match &rule.rounding_key {
            Some(key) if options.rounding && self.config.rounding => self.rounding.round_column(&rule.name, key, output),
            _ => Ok(output),
        }
    }

    /// Applies a per-person rule to every row. Rows are independent, so they
    /// run in parallel and are collected back in row order.
    fn lift(&self, rule: &Rule, func: &RowFn, kind: ColumnKind, inputs: &[Arc<Column>], rows: usize) -> Result<Column> {
        let params = self.params;
        let scalars = (0..rows)
            .into_par_iter()
            .map(|row| {
                let cells: SmallVec<[Scalar; 4]> = inputs.iter().map(|c| c.get(row)).collect();
                func(cells.as_slice(), params)
            })
            .collect::<Result<Vec<Scalar>>>()?;
        Column::from_scalars(&rule.name, kind, scalars)
    }
}

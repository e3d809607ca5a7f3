use crate::compute::aggregation::AggregationSpec;
use crate::compute::column::{Column, ColumnKind, Scalar};
use crate::error::{EngineError, Result};
use crate::params::PolicyParams;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Inclusive date interval. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validity {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl Validity {
    pub const ALWAYS: Validity = Validity { start: None, end: None };

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start: Some(start), end: Some(end) }
    }

    pub fn since(start: NaiveDate) -> Self {
        Self { start: Some(start), end: None }
    }

    pub fn until(end: NaiveDate) -> Self {
        Self { start: None, end: Some(end) }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| s <= date) && self.end.map_or(true, |e| date <= e)
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s > e)
    }

    /// The common sub-interval, if the two intervals share at least one day.
    pub fn intersection(&self, other: &Validity) -> Option<Validity> {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let overlap = Validity { start, end };
        (!overlap.is_empty()).then_some(overlap)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.start.map_or_else(|| "-inf".to_string(), |d| d.to_string());
        let end = self.end.map_or_else(|| "+inf".to_string(), |d| d.to_string());
        write!(f, "[{}, {}]", start, end)
    }
}

/// Declared input names of a rule. Most rules take a handful.
pub type Inputs = SmallVec<[String; 4]>;

/// The columns a vectorized rule receives, in declaration order.
pub struct RuleArgs<'a> {
    rule: &'a str,
    names: &'a [String],
    columns: Vec<Arc<Column>>,
    rows: usize,
}

impl<'a> RuleArgs<'a> {
    pub(crate) fn new(rule: &'a str, names: &'a [String], columns: Vec<Arc<Column>>, rows: usize) -> Self {
        Self { rule, names, columns, rows }
    }

    pub fn rule(&self) -> &str {
        self.rule
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    pub fn float(&self, i: usize) -> Result<&[f64]> {
        self.columns[i].as_float(&self.names[i])
    }

    pub fn int(&self, i: usize) -> Result<&[i64]> {
        self.columns[i].as_int(&self.names[i])
    }

    pub fn bool(&self, i: usize) -> Result<&[bool]> {
        self.columns[i].as_bool(&self.names[i])
    }

    /// Looks an input up by the name the rule declared it under.
    pub fn named(&self, name: &str) -> Result<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_ref())
            .ok_or_else(|| EngineError::rule_failed(self.rule, format!("no declared input '{}'", name)))
    }
}

pub type VectorFn = dyn Fn(&RuleArgs<'_>, &PolicyParams) -> Result<Column> + Send + Sync;
pub type RowFn = dyn Fn(&[Scalar], &PolicyParams) -> Result<Scalar> + Send + Sync;

/// A rule body. Row-wise bodies are lifted over the population by the engine.
#[derive(Clone)]
pub enum RuleFn {
    Vectorized(Arc<VectorFn>),
    RowWise { output: ColumnKind, func: Arc<RowFn> },
}

impl fmt::Debug for RuleFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleFn::Vectorized(_) => f.write_str("Vectorized"),
            RuleFn::RowWise { output, .. } => write!(f, "RowWise({:?})", output),
        }
    }
}

/// A rule as authored, before the registry places it in a namespace.
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    /// Identifier of this variant, e.g. `tax_until_2002`.
    pub id: String,
    /// External leaf name; defaults to `id`. Lets dated variants share a name.
    pub published_as: Option<String>,
    pub validity: Validity,
    pub inputs: Inputs,
    pub rounding_key: Option<String>,
    pub func: RuleFn,
}

impl RuleDefinition {
    pub fn vectorized<F>(id: &str, inputs: &[&str], func: F) -> Self
    where
        F: Fn(&RuleArgs<'_>, &PolicyParams) -> Result<Column> + Send + Sync + 'static,
    {
        Self::with_fn(id, inputs, RuleFn::Vectorized(Arc::new(func)))
    }

    pub fn row_wise<F>(id: &str, inputs: &[&str], output: ColumnKind, func: F) -> Self
    where
        F: Fn(&[Scalar], &PolicyParams) -> Result<Scalar> + Send + Sync + 'static,
    {
        Self::with_fn(id, inputs, RuleFn::RowWise { output, func: Arc::new(func) })
    }

    fn with_fn(id: &str, inputs: &[&str], func: RuleFn) -> Self {
        Self {
            id: id.to_string(),
            published_as: None,
            validity: Validity::ALWAYS,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            rounding_key: None,
            func,
        }
    }

    pub fn published_as(mut self, name: &str) -> Self {
        self.published_as = Some(name.to_string());
        self
    }

    pub fn valid(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn rounding(mut self, key: &str) -> Self {
        self.rounding_key = Some(key.to_string());
        self
    }

    pub fn leaf_name(&self) -> &str {
        self.published_as.as_deref().unwrap_or(&self.id)
    }
}

/// A rule placed in the namespace tree. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub namespace: Vec<String>,
    pub validity: Validity,
    pub inputs: Inputs,
    pub rounding_key: Option<String>,
    pub func: RuleFn,
}

impl Rule {
    pub(crate) fn from_definition(namespace: &[String], def: &RuleDefinition) -> Self {
        Self {
            id: def.id.clone(),
            name: qualify(namespace, def.leaf_name()),
            namespace: namespace.to_vec(),
            validity: def.validity,
            inputs: def.inputs.clone(),
            rounding_key: def.rounding_key.clone(),
            func: def.func.clone(),
        }
    }
}

/// Joins a namespace path and a (possibly dotted) name into a qualified name.
pub fn qualify(namespace: &[String], name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace.join("."), name)
    }
}

pub fn split_path(qualified: &str) -> Vec<String> {
    qualified.split('.').map(str::to_string).collect()
}

/// Rules and aggregation specs declared under one namespace path.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    pub path: Vec<String>,
    pub rules: Vec<RuleDefinition>,
    pub aggregations: Vec<(String, AggregationSpec)>,
}

impl Namespace {
    /// `path` is dotted, e.g. `"taxes.income"`; the empty string is the root.
    pub fn new(path: &str) -> Self {
        let path = if path.is_empty() { Vec::new() } else { split_path(path) };
        Self { path, ..Default::default() }
    }

    pub fn rule(mut self, def: RuleDefinition) -> Self {
        self.rules.push(def);
        self
    }

    pub fn aggregation(mut self, name: &str, spec: AggregationSpec) -> Self {
        self.aggregations.push((name.to_string(), spec));
        self
    }
}

/// A statically known module of rules, e.g. one per area of law.
pub trait RuleSource {
    fn namespaces(&self) -> Vec<Namespace>;
}

impl RuleSource for Namespace {
    fn namespaces(&self) -> Vec<Namespace> {
        vec![self.clone()]
    }
}

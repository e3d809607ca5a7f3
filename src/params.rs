//! Policy parameters: rates, thresholds and rounding rules for one date.
//!
//! The engine does not interpret the contents. Rules read them by dotted path,
//! and the rounding policy is taken from the `rounding` subtree.

use crate::compute::rounding::RoundingPolicy;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyParams(Value);

impl PolicyParams {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(Value::Object(Default::default()))
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map(Self)
            .map_err(|e| EngineError::Parameter { path: String::new(), msg: e.to_string() })
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Walks a dotted path such as `unemployment.need.adult`.
    pub fn lookup(&self, path: &str) -> Result<&Value> {
        path.split('.').try_fold(&self.0, |node, segment| {
            node.get(segment).ok_or_else(|| EngineError::Parameter {
                path: path.to_string(),
                msg: format!("no entry '{}'", segment),
            })
        })
    }

    pub fn lookup_f64(&self, path: &str) -> Result<f64> {
        self.lookup(path)?.as_f64().ok_or_else(|| EngineError::Parameter {
            path: path.to_string(),
            msg: "not a number".into(),
        })
    }

    /// The rounding policy, or an empty one when the parameters define none.
    pub fn rounding_policy(&self) -> Result<RoundingPolicy> {
        match self.0.get("rounding") {
            None => Ok(RoundingPolicy::default()),
            Some(v) => RoundingPolicy::deserialize(v)
                .map_err(|e| EngineError::Parameter { path: "rounding".into(), msg: e.to_string() }),
        }
    }
}

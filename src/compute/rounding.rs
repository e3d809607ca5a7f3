//! rounding.rs
//! Post-processing of rule results to the precision the law prescribes.

use super::column::{Column, ColumnKind};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative distance from a whole step below which a quotient counts as on it.
const SNAP_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingDirection {
    Up,
    Down,
    Nearest,
}

/// Rounds to a multiple of `base`, then adds `to_add_after_rounding`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundingSpec {
    pub base: f64,
    pub direction: RoundingDirection,
    #[serde(default)]
    pub to_add_after_rounding: f64,
}

impl RoundingSpec {
    pub fn new(base: f64, direction: RoundingDirection) -> Self {
        Self { base, direction, to_add_after_rounding: 0.0 }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.to_add_after_rounding = offset;
        self
    }

    #[inline(always)]
    pub fn apply(&self, value: f64) -> f64 {
        // Division error is a few ulps of the quotient, so only a quotient that
        // close to a whole step snaps to it. 10.3 / 0.1 must not floor to 102.
        let raw = value / self.base;
        let nearest = raw.round();
        let quotient = if (raw - nearest).abs() <= nearest.abs().max(1.0) * SNAP_TOLERANCE { nearest } else { raw };
        let steps = match self.direction {
            RoundingDirection::Up => quotient.ceil(),
            RoundingDirection::Down => quotient.floor(),
            RoundingDirection::Nearest => quotient.round(),
        };
        steps * self.base + self.to_add_after_rounding
    }
}

/// Rounding specs keyed by the rounding key rules declare.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundingPolicy(BTreeMap<String, RoundingSpec>);

impl RoundingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, spec: RoundingSpec) {
        self.0.insert(key.into(), spec);
    }

    pub fn get(&self, key: &str) -> Option<&RoundingSpec> {
        self.0.get(key)
    }

    /// Rounds the output of `rule` according to the spec registered under `key`.
    pub fn round_column(&self, rule: &str, key: &str, column: Column) -> Result<Column> {
        let spec = self.get(key).ok_or_else(|| EngineError::MissingRoundingSpec {
            rule: rule.to_string(),
            key: key.to_string(),
        })?;
        if !(spec.base > 0.0) {
            return Err(EngineError::Parameter {
                path: format!("rounding.{}.base", key),
                msg: format!("base must be positive, got {}", spec.base),
            });
        }
        match column {
            Column::Float(values) => Ok(Column::Float(values.into_iter().map(|v| spec.apply(v)).collect())),
            other => Err(EngineError::ColumnType {
                name: rule.to_string(),
                expected: ColumnKind::Float,
                found: other.kind(),
            }),
        }
    }
}

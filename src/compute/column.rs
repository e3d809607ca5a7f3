//! column.rs
//! Typed columns over the population and the per-row scalar view used when
//! lifting row-wise rules.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Float,
    Int,
    Bool,
}

/// A single cell. Row-wise rules receive one of these per declared input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Scalar::Float(_) => ColumnKind::Float,
            Scalar::Int(_) => ColumnKind::Int,
            Scalar::Bool(_) => ColumnKind::Bool,
        }
    }

    /// Numeric view. Integers widen, booleans count as 0/1.
    #[inline(always)]
    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Float(v) => *v,
            Scalar::Int(v) => *v as f64,
            Scalar::Bool(b) => f64::from(u8::from(*b)),
        }
    }

    #[inline(always)]
    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Float(v) => *v != 0.0,
            Scalar::Int(v) => *v != 0,
            Scalar::Bool(b) => *b,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Bool(b) => Some(i64::from(*b)),
            Scalar::Float(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Float(_) => ColumnKind::Float,
            Column::Int(_) => ColumnKind::Int,
            Column::Bool(_) => ColumnKind::Bool,
        }
    }

    #[inline(always)]
    pub fn get(&self, row: usize) -> Scalar {
        match self {
            Column::Float(v) => Scalar::Float(v[row]),
            Column::Int(v) => Scalar::Int(v[row]),
            Column::Bool(v) => Scalar::Bool(v[row]),
        }
    }

    pub fn as_float(&self, name: &str) -> Result<&[f64]> {
        match self {
            Column::Float(v) => Ok(v),
            other => Err(type_error(name, ColumnKind::Float, other.kind())),
        }
    }

    pub fn as_int(&self, name: &str) -> Result<&[i64]> {
        match self {
            Column::Int(v) => Ok(v),
            other => Err(type_error(name, ColumnKind::Int, other.kind())),
        }
    }

    pub fn as_bool(&self, name: &str) -> Result<&[bool]> {
        match self {
            Column::Bool(v) => Ok(v),
            other => Err(type_error(name, ColumnKind::Bool, other.kind())),
        }
    }

    /// Builds a column of `kind` from lifted row results.
    pub fn from_scalars(name: &str, kind: ColumnKind, values: Vec<Scalar>) -> Result<Column> {
        let mismatch = |s: &Scalar| type_error(name, kind, s.kind());
        match kind {
            ColumnKind::Float => values
                .iter()
                .map(|s| match s {
                    Scalar::Float(v) => Ok(*v),
                    Scalar::Int(v) => Ok(*v as f64),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Column::Float),
            ColumnKind::Int => values
                .iter()
                .map(|s| match s {
                    Scalar::Int(v) => Ok(*v),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Column::Int),
            ColumnKind::Bool => values
                .iter()
                .map(|s| match s {
                    Scalar::Bool(v) => Ok(*v),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Column::Bool),
        }
    }
}

fn type_error(name: &str, expected: ColumnKind, found: ColumnKind) -> EngineError {
    EngineError::ColumnType { name: name.to_string(), expected, found }
}

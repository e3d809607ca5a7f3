//! aggregation.rs
//! Declared aggregations and the reduction kernels behind synthesized
//! group-level and person-link columns.

use super::column::{Column, ColumnKind, Scalar};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    Sum,
    Count,
    Any,
    Min,
    Max,
}

/// How a missing name is produced from other columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationSpec {
    /// Reduce `source` over all rows sharing the same `group` id and
    /// broadcast the result back to every member row.
    ByGroup {
        source: String,
        group: String,
        reduction: Reduction,
    },
    /// For every row, reduce `source` over the rows whose `foreign_key`
    /// names that row's person id. Rows nobody links to get `default`.
    ByPersonLink {
        source: String,
        foreign_key: String,
        reduction: Reduction,
        default: Scalar,
    },
}

impl AggregationSpec {
    pub fn by_group(source: &str, group: &str, reduction: Reduction) -> Self {
        Self::ByGroup { source: source.to_string(), group: group.to_string(), reduction }
    }

    pub fn by_person_link(source: &str, foreign_key: &str, reduction: Reduction, default: Scalar) -> Self {
        Self::ByPersonLink {
            source: source.to_string(),
            foreign_key: foreign_key.to_string(),
            reduction,
            default,
        }
    }
}

/// Folds `values` per group key and hands every row its group's result.
fn broadcast<T: Copy, A: Copy>(
    values: &[T],
    keys: &[i64],
    first: impl Fn(T) -> A,
    step: impl Fn(A, T) -> A,
) -> Vec<A> {
    let mut acc: HashMap<i64, A> = HashMap::new();
    for (&key, &v) in keys.iter().zip(values) {
        acc.entry(key).and_modify(|a| *a = step(*a, v)).or_insert_with(|| first(v));
    }
    keys.iter().map(|k| acc[k]).collect()
}

pub fn reduce_by_group(source: &Column, groups: &[i64], reduction: Reduction) -> Column {
    match (reduction, source) {
        (Reduction::Count, _) => Column::Int(broadcast(groups, groups, |_| 1, |a, _| a + 1)),
        (Reduction::Any, col) => {
            let flags: Vec<bool> = (0..col.len()).map(|i| col.get(i).as_bool()).collect();
            Column::Bool(broadcast(&flags, groups, |b| b, |a, b| a || b))
        }
        (Reduction::Sum, Column::Float(v)) => Column::Float(broadcast(v, groups, |x| x, |a, x| a + x)),
        (Reduction::Sum, Column::Int(v)) => Column::Int(broadcast(v, groups, |x| x, |a, x| a + x)),
        (Reduction::Sum, Column::Bool(v)) => {
            Column::Int(broadcast(v, groups, i64::from, |a, b| a + i64::from(b)))
        }
        (Reduction::Min, Column::Float(v)) => Column::Float(broadcast(v, groups, |x| x, f64::min)),
        (Reduction::Min, Column::Int(v)) => Column::Int(broadcast(v, groups, |x| x, i64::min)),
        (Reduction::Min, Column::Bool(v)) => Column::Bool(broadcast(v, groups, |b| b, |a, b| a && b)),
        (Reduction::Max, Column::Float(v)) => Column::Float(broadcast(v, groups, |x| x, f64::max)),
        (Reduction::Max, Column::Int(v)) => Column::Int(broadcast(v, groups, |x| x, i64::max)),
        (Reduction::Max, Column::Bool(v)) => Column::Bool(broadcast(v, groups, |b| b, |a, b| a || b)),
    }
}

/// Folds `values` of linking rows into their target rows.
fn fold_links<T: Copy, A: Copy>(
    values: &[T],
    targets: &[Option<usize>],
    first: impl Fn(T) -> A,
    step: impl Fn(A, T) -> A,
) -> Vec<Option<A>> {
    let mut acc: Vec<Option<A>> = vec![None; values.len()];
    for (&target, &v) in targets.iter().zip(values) {
        if let Some(t) = target {
            acc[t] = Some(match acc[t] {
                Some(a) => step(a, v),
                None => first(v),
            });
        }
    }
    acc
}

fn fill<A: Copy>(acc: Vec<Option<A>>, default: A) -> Vec<A> {
    acc.into_iter().map(|a| a.unwrap_or(default)).collect()
}

/// Column kind a reduction produces from a source of kind `source`.
pub fn output_kind(reduction: Reduction, source: ColumnKind) -> ColumnKind {
    match (reduction, source) {
        (Reduction::Count, _) => ColumnKind::Int,
        (Reduction::Any, _) => ColumnKind::Bool,
        (Reduction::Sum, ColumnKind::Bool) => ColumnKind::Int,
        (_, kind) => kind,
    }
}

/// Resolves each row's foreign key to a row index. `sentinel` means "no link".
pub fn link_targets(
    foreign_key: &str,
    keys: &[i64],
    person_ids: &[i64],
    sentinel: i64,
) -> Result<Vec<Option<usize>>> {
    let index: HashMap<i64, usize> = person_ids.iter().enumerate().map(|(row, &id)| (id, row)).collect();
    keys.iter()
        .zip(person_ids)
        .map(|(&key, &person)| {
            if key == sentinel {
                return Ok(None);
            }
            index.get(&key).copied().map(Some).ok_or_else(|| EngineError::InvalidForeignKey {
                column: foreign_key.to_string(),
                person,
                target: key,
            })
        })
        .collect()
}

pub fn reduce_by_link(
    name: &str,
    source: &Column,
    targets: &[Option<usize>],
    reduction: Reduction,
    default: Scalar,
) -> Result<Column> {
    let kind = output_kind(reduction, source.kind());
    let default_f = default.as_f64();
    let default_b = default.as_bool();
    let default_i = || {
        default.as_i64().ok_or(EngineError::ColumnType {
            name: name.to_string(),
            expected: ColumnKind::Int,
            found: default.kind(),
        })
    };

    let column = match (reduction, source) {
        (Reduction::Count, _) => {
            let ones = vec![1i64; source.len()];
            Column::Int(fill(fold_links(&ones, targets, |x| x, |a, x| a + x), default_i()?))
        }
        (Reduction::Any, col) => {
            let flags: Vec<bool> = (0..col.len()).map(|i| col.get(i).as_bool()).collect();
            Column::Bool(fill(fold_links(&flags, targets, |b| b, |a, b| a || b), default_b))
        }
        (Reduction::Sum, Column::Float(v)) => Column::Float(fill(fold_links(v, targets, |x| x, |a, x| a + x), default_f)),
        (Reduction::Sum, Column::Int(v)) => Column::Int(fill(fold_links(v, targets, |x| x, |a, x| a + x), default_i()?)),
        (Reduction::Sum, Column::Bool(v)) => Column::Int(fill(
            fold_links(v, targets, i64::from, |a, b| a + i64::from(b)),
            default_i()?,
        )),
        (Reduction::Min, Column::Float(v)) => Column::Float(fill(fold_links(v, targets, |x| x, f64::min), default_f)),
        (Reduction::Min, Column::Int(v)) => Column::Int(fill(fold_links(v, targets, |x| x, i64::min), default_i()?)),
        (Reduction::Min, Column::Bool(v)) => Column::Bool(fill(fold_links(v, targets, |b| b, |a, b| a && b), default_b)),
        (Reduction::Max, Column::Float(v)) => Column::Float(fill(fold_links(v, targets, |x| x, f64::max), default_f)),
        (Reduction::Max, Column::Int(v)) => Column::Int(fill(fold_links(v, targets, |x| x, i64::max), default_i()?)),
        (Reduction::Max, Column::Bool(v)) => Column::Bool(fill(fold_links(v, targets, |b| b, |a, b| a || b), default_b)),
    };
    debug_assert_eq!(column.kind(), kind);
    Ok(column)
}

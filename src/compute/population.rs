//! population.rs
//! The input table: one row per person, keyed by a stable person id.
//!
//! Columns are shared behind `Arc`, so deriving a snapshot with a few
//! replaced grouping columns copies only those columns.

use super::column::Column;
use crate::error::{EngineError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Population {
    id_column: String,
    ids: Arc<Vec<i64>>,
    index: Arc<HashMap<i64, usize>>,
    columns: BTreeMap<String, Arc<Column>>,
}

impl Population {
    /// Creates a population from its person ids. Ids must be unique.
    pub fn new(id_column: impl Into<String>, ids: Vec<i64>) -> Result<Self> {
        let id_column = id_column.into();
        let mut index = HashMap::with_capacity(ids.len());
        for (row, &id) in ids.iter().enumerate() {
            if index.insert(id, row).is_some() {
                return Err(EngineError::InvalidPopulation(format!("duplicate person id {}", id)));
            }
        }
        let mut columns = BTreeMap::new();
        columns.insert(id_column.clone(), Arc::new(Column::Int(ids.clone())));
        Ok(Self {
            id_column,
            ids: Arc::new(ids),
            index: Arc::new(index),
            columns,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn person_ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn row_of(&self, person: i64) -> Option<usize> {
        self.index.get(&person).copied()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Arc<Column>> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Adds or replaces a column. The person-id column cannot be replaced.
    pub fn insert_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if name == self.id_column {
            return Err(EngineError::InvalidPopulation(format!(
                "the person-id column '{}' is fixed at construction",
                name
            )));
        }
        if column.len() != self.len() {
            return Err(EngineError::ShapeMismatch { name, expected: self.len(), found: column.len() });
        }
        self.columns.insert(name, Arc::new(column));
        Ok(())
    }

    /// Builder-style variant of [`Population::insert_column`].
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Result<Self> {
        self.insert_column(name, column)?;
        Ok(self)
    }
}

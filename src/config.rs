//! Engine and resolver configuration.
//!
//! Everything here names columns or targets; numeric policy lives in
//! [`PolicyParams`](crate::params::PolicyParams).

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::debug;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV_VAR: &str = "TAXBEN_CONFIG";

/// A grouping level: names ending in `_{suffix}` aggregate over `id_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLevel {
    pub suffix: String,
    pub id_column: String,
}

impl GroupLevel {
    pub fn new(suffix: &str, id_column: &str) -> Self {
        Self { suffix: suffix.to_string(), id_column: id_column.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub person_id: String,
    pub groups: Vec<GroupLevel>,
    /// Foreign-key value meaning "links to nobody".
    pub no_link_sentinel: i64,
    pub rounding: bool,
    /// Dates kept by a [`TreeCache`](crate::store::TreeCache) built from this config.
    pub tree_cache_capacity: usize,
    pub resolver: ResolverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            person_id: "p_id".into(),
            groups: vec![
                GroupLevel::new("hh", "hh_id"),
                GroupLevel::new("tu", "tu_id"),
                GroupLevel::new("fg", "fg_id"),
                GroupLevel::new("bg", "bg_id"),
                GroupLevel::new("wthh", "wthh_id"),
            ],
            no_link_sentinel: -1,
            rounding: true,
            tree_cache_capacity: 16,
            resolver: ResolverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub household_id: String,
    pub partner: String,
    pub parents: [String; 2],
    pub age: String,
    /// Children at or above this age never join their parents' family group.
    pub child_age_ceiling: i64,
    /// Bool target: the group's basic need is covered without priority benefits.
    pub need_covered_target: String,
    /// Bool target: a person alone covers their own need.
    pub own_need_covered_target: String,
    /// Float target: money value of a candidate's outcome per person.
    pub outcome_target: String,
    /// Bool target: the candidate is admissible for that person.
    pub priority_check_target: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            household_id: "hh_id".into(),
            partner: "p_id_partner".into(),
            parents: ["p_id_parent_1".into(), "p_id_parent_2".into()],
            age: "age".into(),
            child_age_ceiling: 25,
            need_covered_target: "basic_need_covered".into(),
            own_need_covered_target: "own_need_covered".into(),
            outcome_target: "benefit_outcome".into(),
            priority_check_target: "priority_check".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Reads `.env` if present, then loads the file named by `TAXBEN_CONFIG`.
    /// Without that variable the defaults apply.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        match env::var(CONFIG_ENV_VAR).ok().filter(|s| !s.is_empty()) {
            Some(path) => {
                debug!(%path, "loading engine config");
                Self::from_path(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// The id column for a group suffix such as `hh`.
    pub fn group_column(&self, suffix: &str) -> Option<&str> {
        self.groups.iter().find(|g| g.suffix == suffix).map(|g| g.id_column.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.person_id.is_empty() {
            return Err(EngineError::Config("person_id must not be empty".into()));
        }
        if let Some(g) = self.groups.iter().find(|g| g.suffix.is_empty() || g.id_column.is_empty()) {
            return Err(EngineError::Config(format!("incomplete group level {:?}", g)));
        }
        if self.tree_cache_capacity == 0 {
            return Err(EngineError::Config("tree_cache_capacity must be at least 1".into()));
        }
        if self.resolver.child_age_ceiling < 0 {
            return Err(EngineError::Config("child_age_ceiling must not be negative".into()));
        }
        Ok(())
    }
}

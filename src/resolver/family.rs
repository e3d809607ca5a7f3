//! Family groups: partners plus the unmarried children under the age
//! ceiling who live with them.

use crate::compute::aggregation::link_targets;
use crate::compute::population::Population;
use crate::config::ResolverConfig;
use crate::error::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Disjoint sets with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Row-resolved links and attributes the family pass reads.
pub(crate) struct Household<'p> {
    pub person_ids: &'p [i64],
    pub household: &'p [i64],
    pub age: &'p [i64],
    pub partner: Vec<Option<usize>>,
    pub parents: [Vec<Option<usize>>; 2],
    /// Someone names this row as a parent.
    pub has_children: Vec<bool>,
}

impl<'p> Household<'p> {
    pub fn read(population: &'p Population, config: &ResolverConfig, sentinel: i64) -> Result<Self> {
        let ids = population.person_ids();
        let link = |name: &str| -> Result<Vec<Option<usize>>> {
            match population.column(name) {
                Some(col) => link_targets(name, col.as_int(name)?, ids, sentinel),
                None => Ok(vec![None; ids.len()]),
            }
        };
        let partner = link(&config.partner)?;
        let parents = [link(&config.parents[0])?, link(&config.parents[1])?];

        let mut has_children = vec![false; ids.len()];
        for parent in parents.iter().flatten().flatten() {
            has_children[*parent] = true;
        }

        Ok(Self {
            person_ids: ids,
            household: int_column(population, &config.household_id)?,
            age: int_column(population, &config.age)?,
            partner,
            parents,
            has_children,
        })
    }

    /// Whether `child` may join the family group of `parent`.
    fn joins_parent(&self, child: usize, parent: usize, ceiling: i64) -> bool {
        self.age[child] < ceiling && self.household[child] == self.household[parent] && !self.has_children[child]
    }

    fn parent_rows(&self, row: usize) -> impl Iterator<Item = usize> + '_ {
        self.parents.iter().filter_map(move |p| p[row])
    }
}

fn int_column<'p>(population: &'p Population, name: &str) -> Result<&'p [i64]> {
    population
        .column(name)
        .ok_or_else(|| EngineError::InvalidPopulation(format!("missing column '{}'", name)))?
        .as_int(name)
}

/// Family-group id per row: the smallest person id in the group.
pub(crate) fn family_groups(household: &Household<'_>, config: &ResolverConfig) -> Vec<i64> {
    let n = household.person_ids.len();
    let mut uf = UnionFind::new(n);

    for row in 0..n {
        if let Some(partner) = household.partner[row] {
            if household.household[row] == household.household[partner] {
                uf.union(row, partner);
            }
        }
        for parent in household.parent_rows(row) {
            if household.joins_parent(row, parent, config.child_age_ceiling) {
                uf.union(row, parent);
            }
        }
    }

    let mut smallest: BTreeMap<usize, i64> = BTreeMap::new();
    for row in 0..n {
        let root = uf.find(row);
        let id = household.person_ids[row];
        smallest.entry(root).and_modify(|m| *m = (*m).min(id)).or_insert(id);
    }
    (0..n).map(|row| smallest[&uf.find(row)]).collect()
}

/// Rows that are children within their family group.
pub(crate) fn child_flags(household: &Household<'_>, fg_id: &[i64], config: &ResolverConfig) -> Vec<bool> {
    (0..fg_id.len())
        .map(|row| {
            household
                .parent_rows(row)
                .any(|p| fg_id[p] == fg_id[row] && household.joins_parent(row, p, config.child_age_ceiling))
        })
        .collect()
}

/// Fails on the first household (by id) that holds more than one family group.
pub(crate) fn check_single_family_per_household(household: &[i64], fg_id: &[i64]) -> Result<()> {
    let mut groups: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
    for (&hh, &fg) in household.iter().zip(fg_id) {
        groups.entry(hh).or_default().insert(fg);
    }
    match groups.into_iter().find(|(_, fgs)| fgs.len() > 1) {
        Some((household, fgs)) => Err(EngineError::MultipleFamilyGroupsInHousehold {
            household,
            family_groups: fgs.into_iter().collect(),
        }),
        None => Ok(()),
    }
}

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::warn;

use crate::error::{Error, Result};
use crate::package::Package;

/// Dependency graph over workspace packages.
///
/// Nodes keep the declaration order of the packages they were built from.
/// An edge `a -> b` exists when `a` declares a dependency on `b` and `b` is a
/// workspace package; external dependencies are not nodes.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    packages: Vec<Package>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn build(packages: Vec<Package>) -> Result<Self> {
        let mut index: HashMap<String, usize> = HashMap::new();

        for (i, package) in packages.iter().enumerate() {
            if let Some(&existing) = index.get(&package.name) {
                return Err(Error::DuplicatePackage {
                    name: package.name.clone(),
                    first: packages[existing].location.clone(),
                    second: package.location.clone(),
                });
            }
            index.insert(package.name.clone(), i);
        }

        let mut dependencies = vec![Vec::new(); packages.len()];
        let mut dependents = vec![Vec::new(); packages.len()];

        for (i, package) in packages.iter().enumerate() {
            let mut deps: Vec<usize> = package
                .dependencies
                .iter()
                .filter_map(|name| index.get(name).copied())
                .filter(|&dep| dep != i)
                .collect();
            deps.sort_unstable();

            for &dep in &deps {
                dependents[dep].push(i);
            }
            dependencies[i] = deps;
        }

        Ok(Self {
            packages,
            index,
            dependencies,
            dependents,
        })
    }

    /// Packages in declaration order
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.index.get(name).map(|&i| &self.packages[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Direct workspace dependencies of `name`, in declaration order
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.dependencies)
    }

    /// Packages that directly depend on `name`, in declaration order
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, &self.dependents)
    }

    /// Everything reachable from `names` along dependency edges, seeds excluded
    /// unless they are reachable from another seed.
    pub fn transitive_dependencies<'a, I>(&self, names: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.reachable(names, &self.dependencies)
    }

    /// Everything that depends on `names`, directly or indirectly
    pub fn transitive_dependents<'a, I>(&self, names: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.reachable(names, &self.dependents)
    }

    /// Order `subset` so that dependencies come before their dependents.
    ///
    /// Only edges between members of the subset are considered. Ready packages
    /// are emitted in declaration order. A cycle is broken by emitting the
    /// earliest-declared remaining package with the fewest unresolved
    /// dependencies, so the sort always terminates.
    pub fn topological_sort(&self, subset: &[&str]) -> Vec<String> {
        let members: BTreeSet<usize> = subset
            .iter()
            .filter_map(|name| self.index.get(*name).copied())
            .collect();

        let mut in_degree: HashMap<usize, usize> = members
            .iter()
            .map(|&i| {
                let degree = self.dependencies[i]
                    .iter()
                    .filter(|dep| members.contains(dep))
                    .count();
                (i, degree)
            })
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&i, _)| i)
            .collect();

        let mut remaining = members.clone();
        let mut result = Vec::with_capacity(members.len());

        while !remaining.is_empty() {
            let current = match ready.pop_first() {
                Some(i) => i,
                None => {
                    // Only cyclic packages are left
                    let breaker = remaining
                        .iter()
                        .copied()
                        .min_by_key(|i| (in_degree[i], *i))
                        .unwrap_or_default();
                    warn!(
                        package = %self.packages[breaker].name,
                        "Dependency cycle detected, running package before its dependencies"
                    );
                    breaker
                }
            };

            remaining.remove(&current);
            in_degree.remove(&current);
            result.push(self.packages[current].name.clone());

            for dependent in &self.dependents[current] {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        result
    }

    /// Names of packages that take part in at least one dependency cycle
    pub fn cyclic_packages(&self) -> Vec<String> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..self.packages.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        while let Some(current) = queue.pop_front() {
            for &dependent in &self.dependents[current] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        // Nodes left with unresolved edges are in a cycle or downstream of one
        let leftover: HashSet<usize> = (0..self.packages.len())
            .filter(|&i| in_degree[i] > 0)
            .collect();

        leftover
            .iter()
            .copied()
            .filter(|&i| {
                let reach = self.reachable_indices(&[i], &self.dependencies);
                reach.contains(&i)
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|i| self.packages[i].name.clone())
            .collect()
    }

    fn neighbours(&self, name: &str, edges: &[Vec<usize>]) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                edges[i]
                    .iter()
                    .map(|&j| self.packages[j].name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn reachable<'a, I>(&self, names: I, edges: &[Vec<usize>]) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let seeds: Vec<usize> = names
            .into_iter()
            .filter_map(|name| self.index.get(name).copied())
            .collect();

        self.reachable_indices(&seeds, edges)
            .into_iter()
            .map(|i| self.packages[i].name.clone())
            .collect()
    }

    fn reachable_indices(&self, seeds: &[usize], edges: &[Vec<usize>]) -> HashSet<usize> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = seeds.iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            for &next in &edges[current] {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        seen
    }
}

//! Package selection: privacy, change, scope and dependency filters

use std::collections::HashSet;
use tracing::info;

use crate::error::{Error, Result};
use crate::graph::{ChangeSet, DependencyGraph};
use crate::package::Package;

/// Which packages a command operates on
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    /// Keep only packages whose name matches one of these globs
    pub scope: Vec<String>,
    /// Drop packages whose name matches one of these globs
    pub ignore: Vec<String>,
    /// Keep private packages
    pub private: bool,
    /// Restrict to changed packages. `Some("")` means "since the latest tag".
    pub since: Option<String>,
    pub include_dependencies: bool,
    /// With `since`, keep only directly-changed packages
    pub exclude_dependents: bool,
    /// With `since`, search tags on merged branches for the baseline
    pub include_merged_tags: bool,
}

impl FilterSpec {
    /// Log the active filters the way the selection will be narrowed
    pub fn log_notices(&self) {
        for pattern in &self.scope {
            info!("filter including {:?}", pattern);
        }
        for pattern in &self.ignore {
            info!("filter excluding {:?}", pattern);
        }
        if let Some(ref since) = self.since {
            info!("filter changed since {:?}", since);
            if self.exclude_dependents {
                info!("filter excluding dependents");
            }
        }
        if self.include_dependencies {
            info!("filter including dependencies");
        }
    }

    /// Select packages from `graph`, in declaration order.
    ///
    /// `changes` must be provided when `since` is set; it is the
    /// directly-changed set, dependents are added here.
    pub fn apply<'g>(
        &self,
        graph: &'g DependencyGraph,
        changes: Option<&ChangeSet>,
    ) -> Result<Vec<&'g Package>> {
        let scope = compile(&self.scope)?;
        let ignore = compile(&self.ignore)?;

        let mut retained: Vec<&Package> = graph
            .packages()
            .iter()
            .filter(|pkg| self.private || !pkg.private)
            .collect();

        if self.since.is_some() {
            let changes = changes.ok_or_else(|| {
                Error::Configuration("change filter requested without a change set".to_string())
            })?;
            let affected = self.affected(graph, changes);
            retained.retain(|pkg| affected.contains(pkg.name.as_str()));
        }

        if !scope.is_empty() {
            retained.retain(|pkg| scope.iter().any(|p| p.matches(&pkg.name)));
        }

        retained.retain(|pkg| !ignore.iter().any(|p| p.matches(&pkg.name)));

        if !self.include_dependencies {
            return Ok(retained);
        }

        let mut selected: HashSet<&str> = retained.iter().map(|pkg| pkg.name.as_str()).collect();
        let dependencies = graph.transitive_dependencies(selected.iter().copied());
        selected.extend(dependencies.iter().map(String::as_str));

        Ok(graph
            .packages()
            .iter()
            .filter(|pkg| selected.contains(pkg.name.as_str()))
            .collect())
    }

    /// Directly-changed packages plus, unless excluded, everything that
    /// depends on them. A directly-changed package is always kept.
    fn affected(&self, graph: &DependencyGraph, changes: &ChangeSet) -> HashSet<String> {
        let direct: HashSet<String> = graph
            .packages()
            .iter()
            .filter(|pkg| changes.is_directly_changed(pkg))
            .map(|pkg| pkg.name.clone())
            .collect();

        if self.exclude_dependents {
            return direct;
        }

        let mut affected = graph.transitive_dependents(direct.iter().map(String::as_str));
        affected.extend(direct);
        affected
    }
}

fn compile(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| glob::Pattern::new(p).map_err(|e| Error::glob(p, e)))
        .collect()
}

//! Workspace/monorepo package discovery

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::package::{Package, MANIFEST_FILE};

use super::DependencyGraph;

/// A workspace containing multiple packages
#[derive(Debug)]
pub struct Workspace {
    pub root_dir: PathBuf,
    pub packages: Vec<Package>,
}

impl Workspace {
    /// Discover packages in a workspace based on glob patterns.
    ///
    /// Packages are returned in declaration order: pattern by pattern, and
    /// sorted by path within a pattern. A directory matched by several
    /// patterns is only loaded once.
    pub fn discover(root_dir: &Path, patterns: &[String]) -> Result<Self> {
        let mut packages = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for pattern in patterns {
            let full_pattern = root_dir.join(pattern);
            let full_pattern_str = full_pattern.to_string_lossy();

            let mut dirs: Vec<PathBuf> = glob::glob(&full_pattern_str)
                .map_err(|e| Error::glob(pattern, e))?
                .filter_map(|entry| entry.ok())
                .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).is_file())
                .collect();
            dirs.sort();

            for path in dirs {
                if !seen.insert(path.clone()) {
                    continue;
                }
                let package = Package::load(&path)?;
                debug!(name = %package.name, location = %path.display(), "Found package");
                packages.push(package);
            }
        }

        Ok(Workspace {
            root_dir: root_dir.to_path_buf(),
            packages,
        })
    }

    /// Get package names
    pub fn package_names(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.name.as_str()).collect()
    }

    /// Build the dependency graph, consuming the workspace packages
    pub fn into_graph(self) -> Result<DependencyGraph> {
        DependencyGraph::build(self.packages)
    }
}

//! Detection of changed packages based on git history

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::git::GitRepository;
use crate::package::Package;

use super::DependencyGraph;

/// How the baseline is searched for and which changes count
#[derive(Debug, Clone, Default)]
pub struct ChangeOptions {
    /// Consider tags reachable through merged branches, not only first-parent history
    pub include_merged_tags: bool,
    /// Only tags matching this glob are release tags
    pub tag_pattern: Option<String>,
    /// Changed paths matching these globs are ignored
    pub ignore_changes: Vec<String>,
}

/// The git reference changes are measured against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeBaseline {
    /// No prior release tag exists
    None,
    Ref {
        /// What the user or the tag search named
        name: String,
        /// Commit the diff starts from
        commit: String,
    },
}

/// Packages whose tree differs from the baseline, before any dependent expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSet {
    /// No baseline: every package is treated as changed
    AllAssumed,
    Since {
        baseline: String,
        directly_changed: BTreeSet<String>,
    },
}

impl ChangeSet {
    pub fn is_directly_changed(&self, package: &Package) -> bool {
        match self {
            ChangeSet::AllAssumed => true,
            ChangeSet::Since {
                directly_changed, ..
            } => directly_changed.contains(&package.name),
        }
    }

    /// Changed package names in declaration order. When all packages are
    /// assumed changed, only public packages are reported.
    pub fn changed_names(&self, graph: &DependencyGraph) -> Vec<String> {
        graph
            .packages()
            .iter()
            .filter(|pkg| match self {
                ChangeSet::AllAssumed => !pkg.private,
                ChangeSet::Since { .. } => self.is_directly_changed(pkg),
            })
            .map(|pkg| pkg.name.clone())
            .collect()
    }
}

/// Computes the directly-changed packages of a workspace
pub struct ChangeDetector<'a, G: GitRepository + ?Sized> {
    git: &'a G,
    graph: &'a DependencyGraph,
    options: &'a ChangeOptions,
    ignore: Vec<glob::Pattern>,
}

impl<'a, G: GitRepository + ?Sized> ChangeDetector<'a, G> {
    pub fn new(git: &'a G, graph: &'a DependencyGraph, options: &'a ChangeOptions) -> Result<Self> {
        let ignore = options
            .ignore_changes
            .iter()
            .map(|p| glob::Pattern::new(p).map_err(|e| Error::glob(p, e)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            git,
            graph,
            options,
            ignore,
        })
    }

    /// Resolve the baseline: an explicit ref, or the most recent release tag.
    ///
    /// A tag is used as is. Any other ref (branch, commit) is diffed from its
    /// merge base with `HEAD`, so changes made on the other side are not
    /// attributed to this branch.
    pub fn resolve_baseline(&self, since: Option<&str>) -> Result<ChangeBaseline> {
        if let Some(reference) = since.filter(|s| !s.is_empty()) {
            self.git
                .resolve_ref(reference)
                .map_err(|_| Error::UnresolvableRef(reference.to_string()))?;

            let commit = if self.git.is_tag(reference) {
                self.git.resolve_ref(reference)
            } else {
                self.git.merge_base(reference, "HEAD")
            }
            .map_err(|e| Error::ChangeDetection {
                baseline: reference.to_string(),
                source: e,
            })?;

            return Ok(ChangeBaseline::Ref {
                name: reference.to_string(),
                commit,
            });
        }

        let tag = self
            .git
            .describe_tag(
                "HEAD",
                self.options.include_merged_tags,
                self.options.tag_pattern.as_deref(),
            )
            .map_err(|e| Error::ChangeDetection {
                baseline: "latest tag".to_string(),
                source: e,
            })?;

        match tag {
            Some(name) => {
                let commit = self.git.resolve_ref(&name).map_err(|e| Error::ChangeDetection {
                    baseline: name.clone(),
                    source: e,
                })?;
                Ok(ChangeBaseline::Ref { name, commit })
            }
            None => Ok(ChangeBaseline::None),
        }
    }

    /// Resolve the baseline and collect the directly-changed packages
    pub fn detect(&self, since: Option<&str>) -> Result<ChangeSet> {
        match self.resolve_baseline(since)? {
            ChangeBaseline::None => {
                info!("Assuming all packages changed");
                Ok(ChangeSet::AllAssumed)
            }
            ChangeBaseline::Ref { name, commit } => {
                info!("Looking for changed packages since {}", name);
                let directly_changed = self.changed_since(&name, &commit)?;
                Ok(ChangeSet::Since {
                    baseline: name,
                    directly_changed,
                })
            }
        }
    }

    fn changed_since(&self, name: &str, commit: &str) -> Result<BTreeSet<String>> {
        let workdir = self.git.workdir().ok_or_else(|| {
            Error::Configuration("git repository has no working tree".to_string())
        })?;

        let paths = self
            .git
            .diff_paths(commit, "HEAD")
            .map_err(|e| Error::ChangeDetection {
                baseline: name.to_string(),
                source: e,
            })?;

        let mut changed = BTreeSet::new();

        for package in self.graph.packages() {
            let Some(location) = relative_to(&package.location, workdir) else {
                debug!(package = %package.name, "Package lies outside the repository, skipping");
                continue;
            };

            if paths.iter().any(|p| self.counts_for(Path::new(p), &location)) {
                debug!(package = %package.name, "Package changed");
                changed.insert(package.name.clone());
            }
        }

        Ok(changed)
    }

    /// A changed path counts for a package when it lies inside the package
    /// and no ignore pattern matches it. Patterns without a `/` match the file
    /// name, others the path relative to the package.
    fn counts_for(&self, path: &Path, location: &Path) -> bool {
        let Ok(inner) = path.strip_prefix(location) else {
            return false;
        };

        let file_name = inner.file_name().map(|n| n.to_string_lossy().to_string());

        !self.ignore.iter().any(|pattern| {
            if pattern.as_str().contains('/') {
                pattern.matches_path(inner)
            } else {
                file_name.as_deref().is_some_and(|n| pattern.matches(n))
            }
        })
    }
}

fn relative_to(location: &Path, workdir: &Path) -> Option<PathBuf> {
    let location = location
        .canonicalize()
        .unwrap_or_else(|_| location.to_path_buf());
    location.strip_prefix(workdir).ok().map(Path::to_path_buf)
}

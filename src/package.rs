//! Package model read from `package.json` manifests

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const MANIFEST_FILE: &str = "package.json";

/// One workspace member. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub location: PathBuf,
    pub private: bool,
    /// Every declared dependency name, workspace-local or not.
    pub dependencies: BTreeSet<String>,
    /// Script names defined by the manifest.
    pub scripts: BTreeSet<String>,
}

/// The subset of `package.json` the workspace core cares about
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    scripts: BTreeMap<String, serde_json::Value>,
}

impl Package {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            location: location.into(),
            private: false,
            dependencies: BTreeSet::new(),
            scripts: BTreeSet::new(),
        }
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_scripts<I, S>(mut self, scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts.extend(scripts.into_iter().map(Into::into));
        self
    }

    /// Load a package from the manifest in `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&manifest_path).map_err(|e| Error::Manifest {
            path: manifest_path.clone(),
            message: e.to_string(),
        })?;

        let manifest: Manifest = serde_json::from_str(&content).map_err(|e| Error::Manifest {
            path: manifest_path.clone(),
            message: e.to_string(),
        })?;

        let name = manifest.name.filter(|n| !n.is_empty()).ok_or_else(|| Error::Manifest {
            path: manifest_path.clone(),
            message: "missing \"name\"".to_string(),
        })?;

        let dependencies = manifest
            .dependencies
            .into_keys()
            .chain(manifest.dev_dependencies.into_keys())
            .chain(manifest.optional_dependencies.into_keys())
            .collect();

        Ok(Self {
            name,
            version: manifest.version.unwrap_or_else(|| "0.0.0".to_string()),
            location: dir.to_path_buf(),
            private: manifest.private,
            dependencies,
            scripts: manifest.scripts.into_keys().collect(),
        })
    }

    pub fn has_script(&self, script: &str) -> bool {
        self.scripts.contains(script)
    }

    /// Location relative to `root`, falling back to the absolute location
    pub fn relative_location(&self, root: &Path) -> PathBuf {
        self.location
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.location.clone())
    }

    pub fn summary(&self) -> PackageSummary {
        PackageSummary {
            name: self.name.clone(),
            version: self.version.clone(),
            private: self.private,
            location: self.location.to_string_lossy().to_string(),
        }
    }
}

/// Serializable view used by the JSON renderers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageSummary {
    pub name: String,
    pub version: String,
    pub private: bool,
    pub location: String,
}

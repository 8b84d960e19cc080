use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "monorail.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub changes: ChangesConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceConfig {
    /// Globs locating package directories, in declaration order
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    #[serde(default = "default_npm_client")]
    pub npm_client: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangesConfig {
    /// Changed paths matching these globs don't mark a package as changed
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub include_merged_tags: bool,
    #[serde(default)]
    pub tag_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub bail: bool,
    #[serde(default = "default_true")]
    pub prefix: bool,
    #[serde(default)]
    pub profile_location: Option<String>,
}

fn default_packages() -> Vec<String> {
    vec!["packages/*".to_string()]
}

fn default_npm_client() -> String {
    "npm".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            npm_client: default_npm_client(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            stream: false,
            bail: true,
            prefix: true,
            profile_location: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", CONFIG_FILE))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workspace.packages.is_empty() {
            anyhow::bail!("[workspace] packages must list at least one glob");
        }

        for pattern in self.workspace.packages.iter().chain(&self.changes.ignore) {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid glob '{}' in {}", pattern, CONFIG_FILE))?;
        }

        if let Some(ref pattern) = self.changes.tag_pattern {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid tag_pattern '{}'", pattern))?;
        }

        if self.run.concurrency == Some(0) {
            anyhow::bail!("[run] concurrency must be at least 1");
        }

        if self.workspace.npm_client.trim().is_empty() {
            anyhow::bail!("[workspace] npm_client must not be empty");
        }

        Ok(())
    }

    /// Resolve the profile directory against the workspace root, expanding `~` and env vars
    pub fn profile_dir(&self, root: &Path, cli_location: Option<&str>) -> Result<PathBuf> {
        match cli_location.or(self.run.profile_location.as_deref()) {
            Some(location) => {
                let expanded = shellexpand::full(location)
                    .with_context(|| format!("Could not expand profile location '{}'", location))?;
                Ok(root.join(expanded.as_ref()))
            }
            None => Ok(root.to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[workspace]
packages = ["modules/*", "packages/*"]
npm_client = "yarn"

[changes]
ignore = ["*.md"]
include_merged_tags = true

[run]
concurrency = 2
bail = false
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.workspace.packages, vec!["modules/*", "packages/*"]);
        assert_eq!(config.workspace.npm_client, "yarn");
        assert_eq!(config.changes.ignore, vec!["*.md"]);
        assert!(config.changes.include_merged_tags);
        assert_eq!(config.run.concurrency, Some(2));
        assert!(!config.run.bail);
        assert!(config.run.prefix);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.workspace.packages, vec!["packages/*"]);
        assert_eq!(config.workspace.npm_client, "npm");
        assert!(config.run.bail);
        assert!(!config.changes.include_merged_tags);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config: Config = toml::from_str("[run]\nconcurrency = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_dir() {
        let config = Config::default();
        let root = Path::new("/repo");
        assert_eq!(config.profile_dir(root, None).unwrap(), PathBuf::from("/repo"));
        assert_eq!(
            config.profile_dir(root, Some("profiles")).unwrap(),
            PathBuf::from("/repo/profiles")
        );
    }
}

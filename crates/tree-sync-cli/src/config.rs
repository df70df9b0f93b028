use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tree_sync::fetch::DEFAULT_CONCURRENCY;
use tree_sync::{MirrorOverride, Scale};

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub source: InstanceConfig,
    pub destination: InstanceConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Connection details for one instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub url: String,
    pub token: Option<String>,
    /// Environment variable holding the token, read when `token` is unset.
    pub token_env: Option<String>,
    /// Walk the instance per mapped path instead of listing everything.
    #[serde(default)]
    pub big: bool,
}

impl InstanceConfig {
    pub fn scale(&self) -> Scale {
        if self.big { Scale::Big } else { Scale::Small }
    }

    /// The access token, from the file or from `token_env`.
    pub fn token(&self) -> Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let var = self
            .token_env
            .as_deref()
            .with_context(|| format!("no token or token_env configured for {}", self.url))?;
        std::env::var(var)
            .with_context(|| format!("environment variable {var} is not set (token for {})", self.url))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub pull_mirror: PullMirror,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            pull_mirror: PullMirror::default(),
            scratch_dir: None,
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// How to decide between native pull mirroring and a git-level copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullMirror {
    #[default]
    Auto,
    ForceAvailable,
    ForceUnavailable,
}

impl From<PullMirror> for MirrorOverride {
    fn from(setting: PullMirror) -> Self {
        match setting {
            PullMirror::Auto => MirrorOverride::Auto,
            PullMirror::ForceAvailable => MirrorOverride::ForceAvailable,
            PullMirror::ForceUnavailable => MirrorOverride::ForceUnavailable,
        }
    }
}

/// Command-line settings that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub big_source: bool,
    pub big_destination: bool,
    pub pull_mirror: Option<PullMirror>,
    pub concurrency: Option<usize>,
}

impl AppConfig {
    pub fn apply(&mut self, overrides: &Overrides) {
        self.source.big |= overrides.big_source;
        self.destination.big |= overrides.big_destination;
        if let Some(pull_mirror) = overrides.pull_mirror {
            self.run.pull_mirror = pull_mirror;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.run.concurrency = concurrency;
        }
        self.run.concurrency = self.run.concurrency.max(1);
    }
}

/// Config file path: `~/.config/tree-sync/instances.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tree-sync").join("instances.toml"))
}

/// Load config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_path().context("could not determine config directory")?,
    };
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse config at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[source]
url = "https://old.example.com"
token = "src-token"

[destination]
url = "https://new.example.com"
token_env = "TREE_SYNC_TEST_UNSET_VARIABLE"
big = true
"#;

    #[test]
    fn parse_minimal_config_uses_run_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();

        assert_eq!(config.source.url, "https://old.example.com");
        assert_eq!(config.source.scale(), Scale::Small);
        assert_eq!(config.destination.scale(), Scale::Big);
        assert_eq!(config.run.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.run.pull_mirror, PullMirror::Auto);
        assert!(config.run.scratch_dir.is_none());
    }

    #[test]
    fn parse_run_table() {
        let toml_str = format!(
            "{MINIMAL}\n[run]\nconcurrency = 4\npull_mirror = \"force-unavailable\"\nscratch_dir = \"/tmp/scratch\"\n"
        );
        let config: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.run.concurrency, 4);
        assert_eq!(
            MirrorOverride::from(config.run.pull_mirror),
            MirrorOverride::ForceUnavailable
        );
        assert_eq!(config.run.scratch_dir, Some(PathBuf::from("/tmp/scratch")));
    }

    #[test]
    fn inline_token_wins() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.source.token().unwrap(), "src-token");
    }

    #[test]
    fn unset_token_env_names_the_variable() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        let err = config.destination.token().unwrap_err();
        assert!(err.to_string().contains("TREE_SYNC_TEST_UNSET_VARIABLE"));
    }

    #[test]
    fn missing_token_is_an_error() {
        let instance = InstanceConfig {
            url: "https://x".into(),
            token: None,
            token_env: None,
            big: false,
        };
        assert!(instance.token().is_err());
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config: AppConfig = toml::from_str(MINIMAL).unwrap();
        config.apply(&Overrides {
            big_source: true,
            big_destination: false,
            pull_mirror: Some(PullMirror::ForceAvailable),
            concurrency: Some(0),
        });

        assert_eq!(config.source.scale(), Scale::Big);
        // A flag cannot shrink a scale hint from the file.
        assert_eq!(config.destination.scale(), Scale::Big);
        assert_eq!(config.run.pull_mirror, PullMirror::ForceAvailable);
        assert_eq!(config.run.concurrency, 1);
    }

    #[test]
    fn load_config_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.destination.url, "https://new.example.com");
    }

    #[test]
    fn load_config_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}

//! Settings loading: cache root, ledger location, and the target table.
pub mod category;
pub mod targets;
pub mod toml_loader;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::InstallError;
use category::Category;
use targets::LinkTarget;

/// Default bound on a single git invocation.
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;

/// Ledger file name inside the cache root.
const LEDGER_FILE_NAME: &str = ".install-ledger.json";

/// Raw `config.toml` contents. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Settings {
    cache_root: Option<String>,
    ledger: Option<String>,
    fetch_timeout_secs: Option<u64>,
    patch_agent_tools: Option<bool>,
    parallel: Option<bool>,
    targets: Option<Vec<TargetSettings>>,
}

/// One `[[targets]]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetSettings {
    name: String,
    root: String,
    categories: Vec<String>,
    #[serde(default = "default_true")]
    create_root: bool,
}

const fn default_true() -> bool {
    true
}

/// Command-line overrides applied on top of the settings file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// `--cache-root`.
    pub cache_root: Option<PathBuf>,
    /// `--ledger`.
    pub ledger: Option<PathBuf>,
    /// `--no-parallel` (when `Some(false)`).
    pub parallel: Option<bool>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// User home directory used for `~` expansion and defaults.
    pub home: PathBuf,
    /// Directory holding one working copy per installed source.
    pub cache_root: PathBuf,
    /// Installation ledger file.
    pub ledger_path: PathBuf,
    /// Bound on each git invocation.
    pub fetch_timeout: Duration,
    /// Rewrite list-style `tools` declarations in agent files.
    pub patch_agent_tools: bool,
    /// Update independent sources concurrently.
    pub parallel: bool,
    /// Destination environments, in resolution order.
    pub targets: Vec<LinkTarget>,
}

impl Config {
    /// Built-in defaults for `home`.
    #[must_use]
    pub fn defaults(home: &Path) -> Self {
        let cache_root = home.join(".config").join("opencode").join("tools");
        Self {
            home: home.to_path_buf(),
            ledger_path: cache_root.join(LEDGER_FILE_NAME),
            cache_root,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            patch_agent_tools: true,
            parallel: true,
            targets: targets::default_targets(home),
        }
    }

    /// Load settings from `path` (missing file means defaults) and apply
    /// command-line overrides. Relative paths are resolved against the
    /// current directory.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::Config`] if the file cannot be parsed, names an
    /// unknown category, or defines no targets, or an error if the current
    /// directory is needed and cannot be read.
    pub fn load(path: &Path, home: &Path, overrides: &Overrides) -> Result<Self> {
        let settings: Settings =
            toml_loader::load_config(path).map_err(|e| InstallError::Config {
                path: path.to_path_buf(),
                reason: format!("{e:#}"),
            })?;
        let mut config = Self::defaults(home);
        let expand = |raw: &str| toml_loader::expand_home(raw, home);

        if let Some(cache_root) = settings.cache_root.as_deref() {
            config.cache_root = expand(cache_root);
            config.ledger_path = config.cache_root.join(LEDGER_FILE_NAME);
        }
        if let Some(ledger) = settings.ledger.as_deref() {
            config.ledger_path = expand(ledger);
        }
        if let Some(secs) = settings.fetch_timeout_secs {
            config.fetch_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(patch) = settings.patch_agent_tools {
            config.patch_agent_tools = patch;
        }
        if let Some(parallel) = settings.parallel {
            config.parallel = parallel;
        }
        if let Some(raw_targets) = settings.targets {
            config.targets = raw_targets
                .into_iter()
                .map(|t| {
                    let categories = t
                        .categories
                        .iter()
                        .map(|c| c.parse::<Category>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|reason| InstallError::Config {
                            path: path.to_path_buf(),
                            reason: format!("target '{}': {reason}", t.name),
                        })?;
                    Ok(LinkTarget {
                        root: expand(&t.root),
                        name: t.name,
                        categories,
                        create_root: t.create_root,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if config.targets.is_empty() {
                return Err(InstallError::Config {
                    path: path.to_path_buf(),
                    reason: "at least one target is required".to_string(),
                }
                .into());
            }
        }

        if let Some(cache_root) = &overrides.cache_root {
            if settings.ledger.is_none() {
                config.ledger_path = cache_root.join(LEDGER_FILE_NAME);
            }
            config.cache_root.clone_from(cache_root);
        }
        if let Some(ledger) = &overrides.ledger {
            config.ledger_path.clone_from(ledger);
        }
        if let Some(parallel) = overrides.parallel {
            config.parallel = parallel;
        }

        config.cache_root = absolute(&config.cache_root)?;
        config.ledger_path = absolute(&config.ledger_path)?;
        for target in &mut config.targets {
            target.root = absolute(&target.root)?;
        }
        Ok(config)
    }

    /// Working copy location for a source with short name `name`.
    #[must_use]
    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.cache_root.join(name)
    }
}

/// Anchor a relative path at the current directory. Symlinks into the cache
/// must not be relative to wherever the link happens to live.
fn absolute(path: &Path) -> Result<PathBuf> {
    let resolved = std::path::absolute(path)
        .with_context(|| format!("resolving {}", path.display()))?;
    Ok(dunce::simplified(&resolved).to_path_buf())
}

/// Resolve the user's home directory from the environment.
///
/// # Errors
///
/// Returns an error if neither `HOME` nor `USERPROFILE` is set.
pub fn home_dir() -> Result<PathBuf> {
    let home = if cfg!(target_os = "windows") {
        std::env::var("USERPROFILE")
            .or_else(|_| std::env::var("HOME"))
            .map_err(|_| anyhow::anyhow!("neither USERPROFILE nor HOME environment variable is set"))?
    } else {
        std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME environment variable is not set"))?
    };
    Ok(PathBuf::from(home))
}

/// Default settings file: `$XDG_CONFIG_HOME/aitools/config.toml`, falling
/// back to `~/.config/aitools/config.toml`.
#[must_use]
pub fn default_config_path(home: &Path) -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map_or_else(|_| home.join(".config"), PathBuf::from)
        .join("aitools")
        .join("config.toml")
}

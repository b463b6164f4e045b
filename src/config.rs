use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_CACHE_NAME: &str = "omr-test-v6.15-github-pages";

const DEFAULT_SEED_ASSETS: &[&str] = &["./", "./index.html", "./manifest.json", "./sw.js"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Registration scope; seed assets and fallbacks resolve against it
  pub scope: String,
  /// Name of the current cache generation. Bump it to invalidate old caches.
  #[serde(default = "default_cache_name")]
  pub cache_name: String,
  #[serde(default = "default_seed_assets")]
  pub seed_assets: Vec<String>,
  /// Document served to navigations when the network is unreachable
  #[serde(default = "default_offline_fallback")]
  pub offline_fallback: String,
  /// Fail installation when seeding fails instead of logging and carrying on
  #[serde(default)]
  pub strict_install: bool,
  /// SQLite cache database (defaults to $XDG_DATA_HOME/offline-agent/cache.db)
  pub cache_db: Option<PathBuf>,
  #[serde(default)]
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_icon")]
  pub badge: String,
  /// Vibration pattern in milliseconds
  #[serde(default = "default_vibrate")]
  pub vibrate: Vec<u32>,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      icon: default_icon(),
      badge: default_icon(),
      vibrate: default_vibrate(),
    }
  }
}

fn default_cache_name() -> String {
  DEFAULT_CACHE_NAME.to_string()
}

fn default_seed_assets() -> Vec<String> {
  DEFAULT_SEED_ASSETS.iter().map(|s| s.to_string()).collect()
}

fn default_offline_fallback() -> String {
  "./".to_string()
}

fn default_icon() -> String {
  "./icon-192.png".to_string()
}

fn default_vibrate() -> Vec<u32> {
  vec![100, 50, 100]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-agent/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-agent/config.yaml\n\
                 with at least a `scope:` URL."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-agent").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Resolve every path against the scope into the agent's runtime settings.
  pub fn agent_config(&self) -> Result<AgentConfig> {
    let scope = parse_scope(&self.scope)?;
    let resolve = |path: &str| {
      scope
        .join(path)
        .map_err(|e| eyre!("Invalid path '{}' relative to {}: {}", path, scope, e))
    };

    if self.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }

    let seed_assets = self
      .seed_assets
      .iter()
      .map(|p| resolve(p.as_str()))
      .collect::<Result<Vec<_>>>()?;

    Ok(AgentConfig {
      cache_name: self.cache_name.clone(),
      seed_assets,
      offline_fallback: resolve(self.offline_fallback.as_str())?,
      strict_install: self.strict_install,
      icon: resolve(self.notifications.icon.as_str())?,
      badge: resolve(self.notifications.badge.as_str())?,
      vibrate: self.notifications.vibrate.clone(),
      scope,
    })
  }
}

fn parse_scope(scope: &str) -> Result<Url> {
  let url = Url::parse(scope).map_err(|e| eyre!("Invalid scope URL '{}': {}", scope, e))?;
  if url.cannot_be_a_base() {
    return Err(eyre!("Scope URL '{}' cannot be used as a base", scope));
  }
  Ok(url)
}

/// Immutable settings injected into the agent at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
  pub scope: Url,
  /// Current cache generation
  pub cache_name: String,
  pub seed_assets: Vec<Url>,
  pub offline_fallback: Url,
  pub strict_install: bool,
  pub icon: Url,
  pub badge: Url,
  pub vibrate: Vec<u32>,
}

impl AgentConfig {
  /// Defaults for the given scope, matching a config file that only sets `scope`.
  pub fn new(scope: Url) -> Self {
    let resolve = |path: &str| scope.join(path).unwrap_or_else(|_| scope.clone());
    Self {
      cache_name: DEFAULT_CACHE_NAME.to_string(),
      seed_assets: DEFAULT_SEED_ASSETS.iter().map(|p| resolve(*p)).collect(),
      offline_fallback: resolve("./"),
      strict_install: false,
      icon: resolve("./icon-192.png"),
      badge: resolve("./icon-192.png"),
      vibrate: default_vibrate(),
      scope,
    }
  }

  #[cfg(test)]
  pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
    self.cache_name = cache_name.into();
    self
  }

  #[cfg(test)]
  pub fn with_seed_assets(mut self, seed_assets: Vec<Url>) -> Self {
    self.seed_assets = seed_assets;
    self
  }

  #[cfg(test)]
  pub fn with_strict_install(mut self, strict_install: bool) -> Self {
    self.strict_install = strict_install;
    self
  }

  /// The scope root, opened when a notification's "explore" action is chosen.
  pub fn root(&self) -> Url {
    self.scope.join("./").unwrap_or_else(|_| self.scope.clone())
  }
}

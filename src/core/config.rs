use crate::core::error::{ConfigError, RelayError, RelayResult, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config files searched in order before falling back to the `relay` key of package.json
const CONFIG_FILES: [&str; 2] = [".relayrc.json", ".relayrc"];

/// Key inside the root package.json that may hold the configuration
const PACKAGE_JSON_KEY: &str = "relay";

/// How a dependent's declared range is rewritten when a local dependency changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BumpStrategy {
  /// Replace the range with `prefix + version`
  #[default]
  Override,
  /// Keep the range if it still matches, otherwise override
  Satisfy,
  /// Keep the range if it still matches, otherwise rewrite its numbers in place
  Inherit,
}

/// Release type given to a dependent when one of its local dependencies changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStrategy {
  #[default]
  Patch,
  Minor,
  Major,
  /// Take the highest release type among the changed dependencies
  Inherit,
}

/// Dependency rewriting policy (`deps` section)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BumpPolicy {
  pub bump: BumpStrategy,
  pub release: ReleaseStrategy,
  pub prefix: String,
}

/// A branch releases are allowed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSpec {
  pub name: String,
  /// `true` uses the branch name as the prerelease identifier
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub prerelease: Option<Prerelease>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prerelease {
  Flag(bool),
  Id(String),
}

impl BranchSpec {
  pub fn stable(name: &str) -> Self {
    Self {
      name: name.to_string(),
      prerelease: None,
    }
  }

  /// Prerelease identifier for versions cut from this branch
  pub fn prerelease_id(&self) -> Option<String> {
    match &self.prerelease {
      Some(Prerelease::Flag(true)) => Some(self.name.clone()),
      Some(Prerelease::Id(id)) if !id.is_empty() => Some(id.clone()),
      _ => None,
    }
  }
}

/// Fully resolved configuration for one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
  pub sequential_init: bool,
  pub sequential_prepare: bool,
  pub first_parent: bool,
  pub debug: bool,
  pub dry_run: bool,
  pub ignore_private: bool,
  pub ignore_packages: Vec<String>,
  pub tag_format: String,
  pub deps: BumpPolicy,
  pub branches: Vec<BranchSpec>,
}

fn default_tag_format() -> String {
  "${name}@${version}".to_string()
}

fn default_branches() -> Vec<BranchSpec> {
  vec![BranchSpec::stable("main"), BranchSpec::stable("master")]
}

impl Default for RelayConfig {
  fn default() -> Self {
    ConfigLayer::default().resolve()
  }
}

impl RelayConfig {
  /// Load the config for a workspace root and apply CLI overrides on top
  ///
  /// Layers, later wins field by field: defaults, `extends` files, config file, CLI.
  pub fn load(root: &Path, cli: ConfigLayer) -> RelayResult<Self> {
    let mut layer = ConfigLayer::default();

    if let Some((path, file_layer)) = find_config_layer(root)? {
      tracing::debug!(path = %path.display(), "loaded configuration");
      for extended in file_layer.extends_paths() {
        let extended_path = root.join(&extended);
        let extended_layer = read_layer(&extended_path)?;
        layer = layer.merge(extended_layer);
      }
      layer = layer.merge(file_layer);
    }

    Ok(layer.merge(cli).resolve())
  }
}

/// `extends` accepts a single path or a list of paths
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Extends {
  One(String),
  Many(Vec<String>),
}

/// One partial source of configuration (file, extended file, CLI)
///
/// Unset and `null` fields leave lower layers untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
  pub extends: Option<Extends>,
  pub sequential_init: Option<bool>,
  pub sequential_prepare: Option<bool>,
  pub first_parent: Option<bool>,
  pub debug: Option<bool>,
  pub dry_run: Option<bool>,
  pub ignore_private: Option<bool>,
  pub ignore_packages: Option<Vec<String>>,
  pub tag_format: Option<String>,
  pub deps: Option<DepsLayer>,
  pub branches: Option<Vec<BranchSpec>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepsLayer {
  pub bump: Option<BumpStrategy>,
  pub release: Option<ReleaseStrategy>,
  pub prefix: Option<String>,
}

impl DepsLayer {
  fn merge(self, over: DepsLayer) -> DepsLayer {
    DepsLayer {
      bump: over.bump.or(self.bump),
      release: over.release.or(self.release),
      prefix: over.prefix.or(self.prefix),
    }
  }
}

impl ConfigLayer {
  /// Overlay `over` on top of `self`; ignore lists are unioned
  pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
    let ignore_packages = match (self.ignore_packages, over.ignore_packages) {
      (Some(mut base), Some(extra)) => {
        for pattern in extra {
          if !base.contains(&pattern) {
            base.push(pattern);
          }
        }
        Some(base)
      }
      (base, extra) => extra.or(base),
    };

    let deps = match (self.deps, over.deps) {
      (Some(base), Some(extra)) => Some(base.merge(extra)),
      (base, extra) => extra.or(base),
    };

    ConfigLayer {
      extends: None,
      sequential_init: over.sequential_init.or(self.sequential_init),
      sequential_prepare: over.sequential_prepare.or(self.sequential_prepare),
      first_parent: over.first_parent.or(self.first_parent),
      debug: over.debug.or(self.debug),
      dry_run: over.dry_run.or(self.dry_run),
      ignore_private: over.ignore_private.or(self.ignore_private),
      ignore_packages,
      tag_format: over.tag_format.or(self.tag_format),
      deps,
      branches: over.branches.or(self.branches),
    }
  }

  /// Fill every unset field with its default
  pub fn resolve(self) -> RelayConfig {
    let deps = self.deps.unwrap_or_default();
    RelayConfig {
      sequential_init: self.sequential_init.unwrap_or(false),
      sequential_prepare: self.sequential_prepare.unwrap_or(true),
      first_parent: self.first_parent.unwrap_or(false),
      debug: self.debug.unwrap_or(false),
      dry_run: self.dry_run.unwrap_or(false),
      ignore_private: self.ignore_private.unwrap_or(true),
      ignore_packages: self.ignore_packages.unwrap_or_default(),
      tag_format: self.tag_format.unwrap_or_else(default_tag_format),
      deps: BumpPolicy {
        bump: deps.bump.unwrap_or_default(),
        release: deps.release.unwrap_or_default(),
        prefix: deps.prefix.unwrap_or_default(),
      },
      branches: self.branches.filter(|b| !b.is_empty()).unwrap_or_else(default_branches),
    }
  }

  fn extends_paths(&self) -> Vec<String> {
    match &self.extends {
      Some(Extends::One(path)) => vec![path.clone()],
      Some(Extends::Many(paths)) => paths.clone(),
      None => Vec::new(),
    }
  }
}

fn read_layer(path: &Path) -> RelayResult<ConfigLayer> {
  let content = fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
  serde_json::from_str(&content).map_err(|e| {
    RelayError::Config(ConfigError::Invalid {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })
  })
}

/// Find the first config source under `root`
fn find_config_layer(root: &Path) -> RelayResult<Option<(PathBuf, ConfigLayer)>> {
  for name in CONFIG_FILES {
    let path = root.join(name);
    if path.is_file() {
      return Ok(Some((path.clone(), read_layer(&path)?)));
    }
  }

  let manifest_path = root.join("package.json");
  if !manifest_path.is_file() {
    return Ok(None);
  }

  let content = fs::read_to_string(&manifest_path)?;
  let manifest: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
    RelayError::Config(ConfigError::Invalid {
      path: manifest_path.clone(),
      reason: e.to_string(),
    })
  })?;

  match manifest.get(PACKAGE_JSON_KEY) {
    Some(section) if !section.is_null() => {
      let layer = ConfigLayer::deserialize(section).map_err(|e| {
        RelayError::Config(ConfigError::Invalid {
          path: manifest_path.clone(),
          reason: e.to_string(),
        })
      })?;
      Ok(Some((manifest_path, layer)))
    }
    _ => Ok(None),
  }
}

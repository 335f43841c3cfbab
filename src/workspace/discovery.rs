//! Workspace member discovery from the root package.json
//!
//! Supports npm and yarn style `workspaces` declarations, either a plain array of
//! globs or `{ "packages": [...] }`. Globs prefixed with `!` exclude matches.
//! Without a `workspaces` field, an Nx `workspace.json` project map is used instead.

use crate::core::error::{ConfigError, RelayError, RelayResult, ResultExt};
use glob::Pattern;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Root package.json fields relevant to discovery
#[derive(Debug, Deserialize)]
struct RootManifest {
  #[serde(default)]
  workspaces: Option<WorkspaceSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WorkspaceSpec {
  Array(Vec<String>),
  Object { packages: Vec<String> },
}

impl WorkspaceSpec {
  fn patterns(&self) -> &[String] {
    match self {
      WorkspaceSpec::Array(patterns) => patterns,
      WorkspaceSpec::Object { packages } => packages,
    }
  }
}

/// Nx `workspace.json`, only the project roots matter
#[derive(Debug, Deserialize)]
struct NxWorkspace {
  #[serde(default)]
  projects: BTreeMap<String, NxProject>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NxProject {
  Path(String),
  Config { root: String },
}

impl NxProject {
  fn root(&self) -> &str {
    match self {
      NxProject::Path(root) => root,
      NxProject::Config { root } => root,
    }
  }
}

/// Member package.json flags that affect discovery
#[derive(Debug, Default, Deserialize)]
struct MemberFlags {
  #[serde(default)]
  private: bool,
}

/// Find the manifest path of every releasable workspace member under `root`
///
/// `ignore_packages` globs may be given with or without a leading `!`. With
/// `ignore_private`, members marked `"private": true` are left out.
pub fn discover_manifests(root: &Path, ignore_packages: &[String], ignore_private: bool) -> RelayResult<Vec<PathBuf>> {
  let root_manifest_path = root.join("package.json");
  let content = std::fs::read_to_string(&root_manifest_path)
    .with_context(|| format!("Failed to read {}", root_manifest_path.display()))?;
  let root_manifest: RootManifest = serde_json::from_str(&content).map_err(|e| {
    RelayError::Config(ConfigError::Invalid {
      path: root_manifest_path.clone(),
      reason: e.to_string(),
    })
  })?;

  let patterns = root_manifest
    .workspaces
    .as_ref()
    .map(|spec| spec.patterns().to_vec())
    .filter(|patterns| !patterns.is_empty());

  let mut excludes = vec![Pattern::new("**/node_modules/**")?];
  for pattern in ignore_packages {
    let pattern = pattern.trim_start_matches('!').trim_start_matches("./");
    excludes.push(Pattern::new(pattern)?);
  }

  let candidates = match patterns {
    Some(patterns) => glob_manifests(root, &patterns, &mut excludes)?,
    None if root.join("workspace.json").is_file() => nx_manifests(root)?,
    None => {
      return Err(RelayError::Config(ConfigError::NoWorkspaces {
        root: root.to_path_buf(),
      }))
    }
  };

  let mut manifests = Vec::new();
  for manifest_path in candidates {
    let Ok(relative_manifest) = manifest_path.strip_prefix(root) else {
      continue;
    };
    let relative_dir = relative_manifest.parent().unwrap_or_else(|| Path::new(""));
    let excluded = excludes
      .iter()
      .any(|pattern| pattern.matches_path(relative_dir) || pattern.matches_path(relative_manifest));
    if excluded {
      tracing::debug!(path = %relative_manifest.display(), "ignoring workspace package");
      continue;
    }
    if ignore_private && is_private(&manifest_path) {
      tracing::debug!(path = %relative_manifest.display(), "ignoring private package");
      continue;
    }
    manifests.push(manifest_path);
  }

  manifests.sort();
  manifests.dedup();

  if manifests.is_empty() {
    return Err(RelayError::Config(ConfigError::NoPackages {
      root: root.to_path_buf(),
    }));
  }
  Ok(manifests)
}

/// Expand `workspaces` globs; negated globs are added to `excludes`
fn glob_manifests(root: &Path, patterns: &[String], excludes: &mut Vec<Pattern>) -> RelayResult<Vec<PathBuf>> {
  let mut includes = Vec::new();
  for pattern in patterns {
    match pattern.strip_prefix('!') {
      Some(negated) => excludes.push(Pattern::new(negated.trim_start_matches("./"))?),
      None => includes.push(pattern.trim_start_matches("./").to_string()),
    }
  }

  let mut found = Vec::new();
  for include in &includes {
    let full = root.join(include).join("package.json");
    let full = full.to_string_lossy();
    for entry in glob::glob(&full)? {
      found.push(entry.map_err(|e| RelayError::message(format!("Failed to read workspace entry: {}", e)))?);
    }
  }
  Ok(found)
}

/// Project roots from an Nx `workspace.json`
///
/// End-to-end test projects and projects without a package.json are skipped.
fn nx_manifests(root: &Path) -> RelayResult<Vec<PathBuf>> {
  let path = root.join("workspace.json");
  let content = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
  let workspace: NxWorkspace = serde_json::from_str(&content).map_err(|e| {
    RelayError::Config(ConfigError::Invalid {
      path: path.clone(),
      reason: e.to_string(),
    })
  })?;

  let mut found = Vec::new();
  for (name, project) in &workspace.projects {
    if name.contains("e2e") {
      continue;
    }
    let manifest_path = root.join(project.root().trim_start_matches("./")).join("package.json");
    if manifest_path.is_file() {
      found.push(manifest_path);
    } else {
      tracing::debug!(project = %name, "nx project has no package.json");
    }
  }
  Ok(found)
}

/// Unreadable manifests count as public; loading reports them properly later
fn is_private(manifest_path: &Path) -> bool {
  std::fs::read_to_string(manifest_path)
    .ok()
    .and_then(|content| serde_json::from_str::<MemberFlags>(&content).ok())
    .is_some_and(|flags| flags.private)
}

//! package.json loading, validation and format-preserving rewrite
//!
//! Manifests are kept as an ordered JSON map so a rewrite only touches the
//! fields that changed. The detected indentation and trailing whitespace are
//! reused on write.

use crate::core::error::{RelayResult, ResultExt, SchemaError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// The four dependency sections of a package.json
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyScope {
  Dependencies,
  DevDependencies,
  PeerDependencies,
  OptionalDependencies,
}

impl DependencyScope {
  pub const ALL: [DependencyScope; 4] = [
    DependencyScope::Dependencies,
    DependencyScope::DevDependencies,
    DependencyScope::PeerDependencies,
    DependencyScope::OptionalDependencies,
  ];

  /// JSON key of the section
  pub fn key(self) -> &'static str {
    match self {
      DependencyScope::Dependencies => "dependencies",
      DependencyScope::DevDependencies => "devDependencies",
      DependencyScope::PeerDependencies => "peerDependencies",
      DependencyScope::OptionalDependencies => "optionalDependencies",
    }
  }
}

/// Whitespace layout of the file as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestFormat {
  indent: String,
  trailing: String,
}

impl ManifestFormat {
  fn detect(contents: &str) -> Self {
    let indent = contents
      .lines()
      .skip(1)
      .find_map(|line| {
        let width = line.len() - line.trim_start_matches([' ', '\t']).len();
        (width > 0 && width < line.len()).then(|| line[..width].to_string())
      })
      .unwrap_or_else(|| "  ".to_string());
    let trailing = contents[contents.trim_end().len()..].to_string();
    Self { indent, trailing }
  }
}

/// One field that differs between the in-memory manifest and the file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestChange {
  /// `version` or a dependency scope key
  pub field: String,
  pub dependency: Option<String>,
  pub before: Option<String>,
  pub after: Option<String>,
}

/// A parsed package.json
#[derive(Debug, Clone)]
pub struct Manifest {
  path: PathBuf,
  fields: Map<String, Value>,
  format: ManifestFormat,
}

impl Manifest {
  /// Read and validate a manifest from disk
  pub fn load(path: &Path) -> RelayResult<Self> {
    if !path.is_file() {
      return Err(SchemaError::NotFound {
        path: path.to_path_buf(),
      }
      .into());
    }
    let contents =
      fs::read_to_string(path).with_context(|| format!("Failed to read package manifest {}", path.display()))?;
    Self::parse(path, &contents)
  }

  /// Parse and validate manifest contents
  pub fn parse(path: &Path, contents: &str) -> RelayResult<Self> {
    let value: Value = serde_json::from_str(contents).map_err(|e| SchemaError::Parse {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })?;

    let Value::Object(fields) = value else {
      return Err(
        SchemaError::NotAnObject {
          path: path.to_path_buf(),
        }
        .into(),
      );
    };

    let has_name = matches!(fields.get("name"), Some(Value::String(name)) if !name.trim().is_empty());
    if !has_name {
      return Err(
        SchemaError::MissingName {
          path: path.to_path_buf(),
        }
        .into(),
      );
    }

    for scope in DependencyScope::ALL {
      match fields.get(scope.key()) {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => {
          return Err(
            SchemaError::InvalidScope {
              path: path.to_path_buf(),
              scope: scope.key().to_string(),
            }
            .into(),
          );
        }
      }
    }

    Ok(Self {
      path: path.to_path_buf(),
      fields,
      format: ManifestFormat::detect(contents),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Directory containing the manifest
  pub fn dir(&self) -> &Path {
    self.path.parent().unwrap_or_else(|| Path::new("."))
  }

  pub fn name(&self) -> &str {
    self.fields.get("name").and_then(Value::as_str).unwrap_or_default()
  }

  pub fn version(&self) -> Option<&str> {
    self.fields.get("version").and_then(Value::as_str)
  }

  pub fn set_version(&mut self, version: &str) {
    self.fields.insert("version".to_string(), Value::String(version.to_string()));
  }

  pub fn is_private(&self) -> bool {
    matches!(self.fields.get("private"), Some(Value::Bool(true)))
  }

  /// Dependency names across all scopes, first-seen order, no duplicates
  pub fn dependency_names(&self) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for scope in DependencyScope::ALL {
      if let Some(Value::Object(deps)) = self.fields.get(scope.key()) {
        for name in deps.keys() {
          if !names.contains(name) {
            names.push(name.clone());
          }
        }
      }
    }
    names
  }

  pub fn dependency_range(&self, scope: DependencyScope, name: &str) -> Option<&str> {
    self
      .fields
      .get(scope.key())
      .and_then(|deps| deps.get(name))
      .and_then(Value::as_str)
  }

  /// Overwrite an existing declared range; absent entries are left alone
  pub fn set_dependency_range(&mut self, scope: DependencyScope, name: &str, range: &str) {
    if let Some(Value::Object(deps)) = self.fields.get_mut(scope.key())
      && let Some(entry) = deps.get_mut(name)
    {
      *entry = Value::String(range.to_string());
    }
  }

  /// Render with the original indentation and trailing whitespace
  pub fn to_json_string(&self) -> RelayResult<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(self.format.indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    self.fields.serialize(&mut serializer)?;
    let mut rendered = String::from_utf8(buf)?;
    rendered.push_str(&self.format.trailing);
    Ok(rendered)
  }

  /// Differences in `version` and the dependency scopes against the file on disk
  pub fn audit_changes(&self) -> RelayResult<Vec<ManifestChange>> {
    let on_disk = Manifest::load(&self.path)?;
    let mut changes = Vec::new();

    let before = on_disk.version();
    let after = self.version();
    if before != after {
      changes.push(ManifestChange {
        field: "version".to_string(),
        dependency: None,
        before: before.map(str::to_string),
        after: after.map(str::to_string),
      });
    }

    for scope in DependencyScope::ALL {
      let before = on_disk.fields.get(scope.key()).and_then(Value::as_object);
      let after = self.fields.get(scope.key()).and_then(Value::as_object);
      let mut names: Vec<&String> = before.into_iter().flat_map(|deps| deps.keys()).collect();
      for name in after.into_iter().flat_map(|deps| deps.keys()) {
        if !names.contains(&name) {
          names.push(name);
        }
      }

      for name in names {
        let old = before.and_then(|deps| deps.get(name)).and_then(Value::as_str);
        let new = after.and_then(|deps| deps.get(name)).and_then(Value::as_str);
        if old != new {
          changes.push(ManifestChange {
            field: scope.key().to_string(),
            dependency: Some(name.clone()),
            before: old.map(str::to_string),
            after: new.map(str::to_string),
          });
        }
      }
    }

    Ok(changes)
  }

  /// Write the manifest back only if `audit_changes` finds a difference
  pub fn write_if_changed(&self) -> RelayResult<Vec<ManifestChange>> {
    let changes = self.audit_changes()?;
    if changes.is_empty() {
      return Ok(changes);
    }

    for change in &changes {
      tracing::info!(
        package = self.name(),
        field = %change.field,
        dependency = change.dependency.as_deref().unwrap_or("-"),
        before = change.before.as_deref().unwrap_or("-"),
        after = change.after.as_deref().unwrap_or("-"),
        "manifest updated"
      );
    }

    fs::write(&self.path, self.to_json_string()?)
      .with_context(|| format!("Failed to write package manifest {}", self.path.display()))?;
    Ok(changes)
  }
}

//! Per-run package records
//!
//! The controller owns every `Package` for the run. Cross-references between
//! packages are `PackageId` indices into that list.

use crate::release::version::{Cascade, ReleaseType};
use crate::workspace::Manifest;
use semver::Version;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Index of a package in the run's package list
pub type PackageId = usize;

/// What a previous release left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRelease {
  pub version: Version,
  pub git_tag: String,
  pub git_head: String,
}

/// The release being cut in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextRelease {
  pub release_type: ReleaseType,
  pub version: Version,
  pub git_tag: String,
  pub git_head: String,
  pub notes: String,
}

/// One publish destination reported by the publish step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRecord {
  pub name: Option<String>,
  pub url: Option<String>,
  pub channel: Option<String>,
}

impl PublishRecord {
  pub fn is_empty(&self) -> bool {
    self.name.is_none() && self.url.is_none() && self.channel.is_none()
  }
}

/// Final record of a package that released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseResult {
  pub last_release: Option<LastRelease>,
  pub next_release: NextRelease,
  pub published: Option<PublishRecord>,
}

/// How a package's run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
  Released(ReleaseResult),
  /// No relevant changes
  Skipped,
}

impl PackageOutcome {
  pub fn is_released(&self) -> bool {
    matches!(self, PackageOutcome::Released(_))
  }

  pub fn release(&self) -> Option<&ReleaseResult> {
    match self {
      PackageOutcome::Released(result) => Some(result),
      PackageOutcome::Skipped => None,
    }
  }
}

/// A workspace member and its release state for this run
#[derive(Debug, Clone)]
pub struct Package {
  pub id: PackageId,
  pub name: String,
  pub dir: PathBuf,
  pub manifest: Manifest,
  /// Dependency names from every scope, first-seen order
  pub declared_deps: Vec<String>,
  /// Declared dependencies that are packages of this run
  pub local_deps: Vec<PackageId>,

  pub pre_release: Option<String>,
  pub branch: Option<String>,
  pub last_release: Option<LastRelease>,
  /// Versions of this package's own tags on its prerelease channel
  pub tag_versions: Vec<Version>,
  pub next_type: Option<ReleaseType>,
  pub next_release: Option<NextRelease>,
  pub published: bool,
  pub result: Option<PackageOutcome>,
}

impl Package {
  pub fn new(id: PackageId, manifest: Manifest) -> Self {
    Self {
      id,
      name: manifest.name().to_string(),
      dir: manifest.dir().to_path_buf(),
      declared_deps: manifest.dependency_names(),
      manifest,
      local_deps: Vec::new(),
      pre_release: None,
      branch: None,
      last_release: None,
      tag_versions: Vec::new(),
      next_type: None,
      next_release: None,
      published: false,
      result: None,
    }
  }

  /// Version dependents should pin: the one being released, else the last one
  pub fn resolved_version(&self) -> Option<&Version> {
    self
      .next_release
      .as_ref()
      .map(|next| &next.version)
      .or_else(|| self.last_release.as_ref().map(|last| &last.version))
  }
}

impl fmt::Display for Package {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name)
  }
}

/// Every package of a run, shared between the release tasks
///
/// Locked only for short synchronous sections, never across an await.
#[derive(Debug, Default)]
pub struct ReleaseState {
  pub packages: Vec<Package>,
  pub cascade: Cascade,
}

impl ReleaseState {
  pub fn new(packages: Vec<Package>) -> Self {
    Self {
      packages,
      cascade: Cascade::default(),
    }
  }

  /// Lock, recovering the data if another task panicked while holding it
  pub fn lock(state: &Mutex<Self>) -> MutexGuard<'_, Self> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

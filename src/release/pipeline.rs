//! Boundary to the single-package release pipeline
//!
//! The engine drives one package through its lifecycle and calls back into a
//! `LifecycleHooks` implementation at each step. The orchestrator is that
//! implementation; it delegates the package's own work to `Plugins`.

use crate::core::config::BranchSpec;
use crate::core::error::RelayResult;
use crate::core::vcs::Commit;
use crate::release::package::{LastRelease, NextRelease, PublishRecord, ReleaseResult};
use crate::release::version::ReleaseType;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Branch the release is cut from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchInfo {
  pub name: String,
  /// Prerelease identifier, if the branch publishes prereleases
  pub prerelease: Option<String>,
}

/// Options the engine runs a package with
#[derive(Debug, Clone)]
pub struct EngineOptions {
  /// Tag template with the package name already filled in, e.g. `pkg@${version}`
  pub tag_format: String,
  pub dry_run: bool,
  pub debug: bool,
  pub branches: Vec<BranchSpec>,
}

/// What the engine is asked to release
#[derive(Debug, Clone)]
pub struct EngineRequest {
  pub package: String,
  pub cwd: PathBuf,
  pub options: EngineOptions,
}

/// State handed to every lifecycle step
#[derive(Debug, Clone)]
pub struct StepContext {
  pub package: String,
  pub cwd: PathBuf,
  pub branch: BranchInfo,
  pub last_release: Option<LastRelease>,
  pub next_release: Option<NextRelease>,
  pub commits: Vec<Commit>,
  pub options: EngineOptions,
}

impl StepContext {
  pub fn new(request: &EngineRequest, branch: BranchInfo) -> Self {
    Self {
      package: request.package.clone(),
      cwd: request.cwd.clone(),
      branch,
      last_release: None,
      next_release: None,
      commits: Vec::new(),
      options: request.options.clone(),
    }
  }
}

/// A single-package release pipeline
#[async_trait]
pub trait ReleaseEngine: Send + Sync {
  /// Release one package; `None` means there was nothing to release
  async fn run(&self, request: EngineRequest, hooks: &dyn LifecycleHooks) -> RelayResult<Option<ReleaseResult>>;
}

/// The five lifecycle steps, in call order
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
  async fn verify_conditions(&self, ctx: &mut StepContext) -> RelayResult<()>;

  async fn analyze_commits(&self, ctx: &mut StepContext) -> RelayResult<Option<ReleaseType>>;

  async fn generate_notes(&self, ctx: &mut StepContext) -> RelayResult<String>;

  async fn prepare(&self, ctx: &mut StepContext) -> RelayResult<()>;

  async fn publish(&self, ctx: &mut StepContext) -> RelayResult<PublishRecord>;
}

/// A package's own release steps, wrapped by the orchestrator
#[async_trait]
pub trait Plugins: Send + Sync {
  async fn verify_conditions(&self, _ctx: &StepContext) -> RelayResult<()> {
    Ok(())
  }

  async fn analyze_commits(&self, ctx: &StepContext) -> RelayResult<Option<ReleaseType>>;

  async fn generate_notes(&self, ctx: &StepContext) -> RelayResult<Option<String>>;

  async fn prepare(&self, _ctx: &StepContext) -> RelayResult<()> {
    Ok(())
  }

  async fn publish(&self, _ctx: &StepContext) -> RelayResult<Vec<PublishRecord>> {
    Ok(Vec::new())
  }
}

/// Commits relevant to one package directory
pub trait CommitSource: Send + Sync {
  /// Commits touching `dir` after `since`, newest first
  fn commits_since(&self, dir: &Path, since: Option<&str>, first_parent_branch: Option<&str>) -> RelayResult<Vec<Commit>>;
}

/// Tag listing for prerelease sequencing
pub trait TagSource: Send + Sync {
  /// Tags merged into `branch` that contain every filter as a substring
  fn tags(&self, branch: &str, filters: &[&str]) -> RelayResult<Vec<String>>;
}

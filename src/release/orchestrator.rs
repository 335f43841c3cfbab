//! Graph-aware lifecycle hooks for one package
//!
//! The engine runs every package concurrently. Each hook here adds the
//! coordination a monorepo needs on top of the package's own plugins: barriers
//! so cascades read settled state, waits on local dependencies, and the
//! dependency-aware manifest and notes rewrites.

use crate::core::config::{BumpPolicy, RelayConfig};
use crate::core::error::{GraphError, RelayError, RelayResult};
use crate::release::package::{PackageId, PublishRecord, ReleaseState};
use crate::release::pipeline::{CommitSource, LifecycleHooks, Plugins, StepContext, TagSource};
use crate::release::sync::{ANALYZED, NEXT_RELEASE, PREPARED, PUBLISHED, READY, READY_FOR_VERIFY, Synchronizer};
use crate::release::version::{ReleaseType, resolve_release_type, tag_pattern, version_from_tag};
use async_trait::async_trait;
use regex::{Captures, Regex};
use semver::Version;
use std::sync::{Arc, Mutex, OnceLock};

/// Run-wide flags the hooks consult
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
  pub sequential_init: bool,
  pub sequential_prepare: bool,
  pub first_parent: bool,
  pub deps: BumpPolicy,
}

impl From<&RelayConfig> for OrchestratorOptions {
  fn from(config: &RelayConfig) -> Self {
    Self {
      sequential_init: config.sequential_init,
      sequential_prepare: config.sequential_prepare,
      first_parent: config.first_parent,
      deps: config.deps.clone(),
    }
  }
}

/// Everything the release tasks of one run share
pub struct RunContext {
  pub state: Mutex<ReleaseState>,
  pub sync: Synchronizer,
  pub plugins: Arc<dyn Plugins>,
  pub commits: Arc<dyn CommitSource>,
  pub tags: Arc<dyn TagSource>,
  pub options: OrchestratorOptions,
}

/// Lifecycle hooks for the package `id`
pub struct ReleaseOrchestrator {
  id: PackageId,
  run: Arc<RunContext>,
}

impl ReleaseOrchestrator {
  pub fn new(id: PackageId, run: Arc<RunContext>) -> Self {
    Self { id, run }
  }

  fn package_name(&self) -> String {
    ReleaseState::lock(&self.run.state).packages[self.id].name.clone()
  }

  /// Versions of this package's tags on the prerelease channel
  ///
  /// Only tags rendered from the package's own tag format count. A failing
  /// query degrades to no tags.
  async fn channel_tag_versions(&self, ctx: &StepContext) -> RelayResult<Vec<Version>> {
    let Some(pre_release) = ctx.branch.prerelease.clone() else {
      return Ok(Vec::new());
    };
    let pattern = tag_pattern(&ctx.options.tag_format)?;
    let source = Arc::clone(&self.run.tags);
    let branch = ctx.branch.name.clone();
    let package = ctx.package.clone();
    let tags =
      tokio::task::spawn_blocking(move || source.tags(&branch, &[pre_release.as_str(), package.as_str()])).await?;

    Ok(match tags {
      Ok(tags) => tags.iter().filter_map(|tag| version_from_tag(tag, &pattern)).collect(),
      Err(err) => {
        tracing::warn!(
          package = %ctx.package,
          branch = %ctx.branch.name,
          error = %err,
          "failed to list tags, try `git pull`"
        );
        Vec::new()
      }
    })
  }
}

/// Pass the `readyForVerify` baton on from `from`
fn hand_off_verify(sync: &Synchronizer, from: PackageId) {
  if let Some(next) = sync.hand_off(READY_FOR_VERIFY, READY, from) {
    tracing::debug!(from, to = next, "handing over verification");
  }
}

#[async_trait]
impl LifecycleHooks for ReleaseOrchestrator {
  async fn verify_conditions(&self, ctx: &mut StepContext) -> RelayResult<()> {
    let sync = &self.run.sync;
    if self.run.options.sequential_init {
      if sync.get_lucky(READY_FOR_VERIFY, self.id).is_some() {
        tracing::debug!(package = %ctx.package, "verifying first");
      }
      sync.wait_for(READY_FOR_VERIFY, self.id).await;
    }

    tracing::debug!(package = %ctx.package, "verify conditions");
    let result = self.run.plugins.verify_conditions(ctx).await;
    sync.emit(READY, Some(self.id));

    if self.run.options.sequential_init {
      hand_off_verify(sync, self.id);
    }
    result
  }

  async fn analyze_commits(&self, ctx: &mut StepContext) -> RelayResult<Option<ReleaseType>> {
    let dir = {
      let mut state = ReleaseState::lock(&self.run.state);
      let package = &mut state.packages[self.id];
      package.pre_release = ctx.branch.prerelease.clone();
      package.branch = Some(ctx.branch.name.clone());
      package.last_release = ctx.last_release.clone();
      package.dir.clone()
    };

    let source = Arc::clone(&self.run.commits);
    let since = ctx.last_release.as_ref().map(|last| last.git_head.clone());
    let branch = self.run.options.first_parent.then(|| ctx.branch.name.clone());
    let commits =
      tokio::task::spawn_blocking(move || source.commits_since(&dir, since.as_deref(), branch.as_deref())).await??;
    tracing::debug!(package = %ctx.package, commits = commits.len(), "filtered commits");
    ctx.commits = commits;

    let own = self.run.plugins.analyze_commits(ctx).await?;
    let tag_versions = self.channel_tag_versions(ctx).await?;
    {
      let mut state = ReleaseState::lock(&self.run.state);
      let package = &mut state.packages[self.id];
      package.next_type = own;
      package.tag_versions = tag_versions;
    }

    // Cascades read other packages' analysis, so wait until everyone is done
    self.run.sync.emit(ANALYZED, Some(self.id));
    self.run.sync.wait_for_all(ANALYZED, |_| true).await;

    // Settled in id order whichever task gets here first; later calls are lookups
    let release_type = {
      let mut guard = ReleaseState::lock(&self.run.state);
      let ReleaseState { packages, cascade } = &mut *guard;
      for id in 0..packages.len() {
        resolve_release_type(packages, id, &self.run.options.deps, cascade);
      }
      packages[self.id].next_type
    };
    tracing::debug!(
      package = %ctx.package,
      own = own.map(ReleaseType::as_str).unwrap_or("none"),
      resolved = release_type.map(ReleaseType::as_str).unwrap_or("none"),
      "analyzed"
    );

    if release_type.is_none() {
      // the engine stops here; unblock dependents now
      self.run.sync.emit(NEXT_RELEASE, Some(self.id));
      self.run.sync.emit(PREPARED, Some(self.id));
    }
    Ok(release_type)
  }

  async fn generate_notes(&self, ctx: &mut StepContext) -> RelayResult<String> {
    ReleaseState::lock(&self.run.state).packages[self.id].next_release = ctx.next_release.clone();
    self.run.sync.emit(NEXT_RELEASE, Some(self.id));
    self.run.sync.wait_local_deps(NEXT_RELEASE, self.id).await;

    let notes = self.run.plugins.generate_notes(ctx).await?;

    let (name, upgrades) = {
      let state = ReleaseState::lock(&self.run.state);
      let package = &state.packages[self.id];
      let upgrades: Vec<String> = package
        .local_deps
        .iter()
        .filter_map(|dep| {
          let dep = &state.packages[*dep];
          dep
            .next_release
            .as_ref()
            .map(|next| format!("* **{}:** upgraded to {}", dep.name, next.version))
        })
        .collect();
      (package.name.clone(), upgrades)
    };

    let mut sections = Vec::new();
    if let Some(notes) = notes.filter(|notes| !notes.trim().is_empty()) {
      sections.push(inject_package_name(&notes, &name));
    }
    if !upgrades.is_empty() {
      sections.push(format!("### Dependencies\n\n{}", upgrades.join("\n")));
    }
    tracing::debug!(package = %name, sections = sections.len(), "generated notes");
    Ok(sections.join("\n\n"))
  }

  async fn prepare(&self, ctx: &mut StepContext) -> RelayResult<()> {
    if self.run.options.sequential_prepare {
      self.run.sync.wait_local_deps(PREPARED, self.id).await;
    }

    let next = ctx
      .next_release
      .as_ref()
      .ok_or_else(|| RelayError::message(format!("No next release computed for {}", ctx.package)))?;
    let manifest = {
      let mut state = ReleaseState::lock(&self.run.state);
      let unreleased = state.packages[self.id]
        .local_deps
        .iter()
        .map(|dep| &state.packages[*dep])
        .find(|dep| dep.resolved_version().is_none())
        .map(|dep| dep.name.clone());
      if let Some(dependency) = unreleased {
        return Err(RelayError::Graph(GraphError::UnreleasedDependency {
          package: state.packages[self.id].name.clone(),
          dependency,
        }));
      }

      let package = &mut state.packages[self.id];
      package.manifest.set_version(&next.version.to_string());
      package.manifest.clone()
    };
    tokio::task::spawn_blocking(move || manifest.write_if_changed()).await??;

    tracing::debug!(package = %ctx.package, version = %next.version, "prepare");
    self.run.plugins.prepare(ctx).await?;
    self.run.sync.emit(PREPARED, Some(self.id));
    Ok(())
  }

  async fn publish(&self, ctx: &mut StepContext) -> RelayResult<PublishRecord> {
    let records = self.run.plugins.publish(ctx).await?;
    ReleaseState::lock(&self.run.state).packages[self.id].published = true;
    self.run.sync.emit(PUBLISHED, Some(self.id));
    tracing::debug!(package = %self.package_name(), records = records.len(), "published");
    Ok(records.into_iter().next().unwrap_or_default())
  }
}

/// `## [1.2.0] (date)` becomes `## name [1.2.0] (date)`
///
/// Only a heading at the very start of the notes is rewritten.
pub fn inject_package_name(notes: &str, name: &str) -> String {
  static HEADING: OnceLock<Option<Regex>> = OnceLock::new();
  let Some(heading) = HEADING
    .get_or_init(|| Regex::new(r"^(#+) (\[?\d+\.\d+\.\d+\]?)").ok())
    .as_ref()
  else {
    return notes.to_string();
  };
  heading
    .replacen(notes, 1, |caps: &Captures| format!("{} {} {}", &caps[1], name, &caps[2]))
    .into_owned()
}

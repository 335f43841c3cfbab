//! Git-backed single-package release engine
//!
//! Drives one package through verify, analyze, notes, prepare and publish,
//! calling the lifecycle hooks at each step. Versions come from the package's
//! tags; a release ends in a lightweight tag at HEAD. Tags are not pushed.

use crate::core::error::RelayResult;
use crate::core::vcs::SystemGit;
use crate::release::package::{LastRelease, NextRelease, ReleaseResult};
use crate::release::pipeline::{BranchInfo, EngineRequest, LifecycleHooks, ReleaseEngine, StepContext, TagSource};
use crate::release::version::{
  ReleaseType, VERSION_PLACEHOLDER, next_pre_version, next_version, pre_release_identifier, tag_pattern,
  version_from_tag,
};
use async_trait::async_trait;
use semver::Version;
use std::sync::Arc;

/// Release engine over a local git repository
pub struct GitReleaseEngine {
  git: Arc<SystemGit>,
}

impl GitReleaseEngine {
  pub fn new(git: Arc<SystemGit>) -> Self {
    Self { git }
  }

  /// Highest release tag of this package reachable from the branch
  ///
  /// Stable branches only see stable versions. Prerelease branches also see
  /// prereleases on their own channel.
  fn last_release(&self, tag_format: &str, branch: &BranchInfo) -> RelayResult<Option<LastRelease>> {
    let pattern = tag_pattern(tag_format)?;
    let tags = self.git.merged_tags(&branch.name)?;

    let latest = tags
      .into_iter()
      .filter_map(|tag| {
        let version = version_from_tag(&tag, &pattern)?;
        let visible = match pre_release_identifier(&version) {
          None => true,
          Some(id) => branch.prerelease.as_deref() == Some(id),
        };
        visible.then_some((version, tag))
      })
      .max_by(|(a, _), (b, _)| a.cmp_precedence(b));

    let Some((version, git_tag)) = latest else {
      return Ok(None);
    };
    let git_head = self.git.tag_commit(&git_tag)?;
    Ok(Some(LastRelease {
      version,
      git_tag,
      git_head,
    }))
  }

  fn next_version(&self, ctx: &StepContext, release_type: ReleaseType) -> RelayResult<Version> {
    let last = ctx.last_release.as_ref().map(|last| &last.version);
    let Some(pre_release) = ctx.branch.prerelease.as_deref() else {
      return Ok(next_version(last, Some(release_type)));
    };
    let pattern = tag_pattern(&ctx.options.tag_format)?;
    let tag_versions: Vec<Version> = match self.git.tags(&ctx.branch.name, &[pre_release, ctx.package.as_str()]) {
      Ok(tags) => tags.iter().filter_map(|tag| version_from_tag(tag, &pattern)).collect(),
      Err(err) => {
        tracing::warn!(package = %ctx.package, error = %err, "failed to list tags, try `git pull`");
        Vec::new()
      }
    };
    Ok(next_pre_version(last, Some(release_type), pre_release, &tag_versions))
  }
}

#[async_trait]
impl ReleaseEngine for GitReleaseEngine {
  async fn run(&self, request: EngineRequest, hooks: &dyn LifecycleHooks) -> RelayResult<Option<ReleaseResult>> {
    let branch_name = self.git.current_branch()?;
    let Some(spec) = request.options.branches.iter().find(|spec| spec.name == branch_name) else {
      let allowed: Vec<&str> = request.options.branches.iter().map(|spec| spec.name.as_str()).collect();
      tracing::info!(
        package = %request.package,
        "This run was triggered on the branch {}, while releases are configured only for {}, so no new version is released",
        branch_name,
        allowed.join(", ")
      );
      return Ok(None);
    };
    let branch = BranchInfo {
      name: branch_name.clone(),
      prerelease: spec.prerelease_id(),
    };

    let mut ctx = StepContext::new(&request, branch);
    ctx.last_release = self.last_release(&request.options.tag_format, &ctx.branch)?;
    match &ctx.last_release {
      Some(last) => tracing::debug!(package = %ctx.package, tag = %last.git_tag, "found last release"),
      None => tracing::debug!(package = %ctx.package, "no previous release found"),
    }

    hooks.verify_conditions(&mut ctx).await?;

    let Some(release_type) = hooks.analyze_commits(&mut ctx).await? else {
      tracing::info!(package = %ctx.package, "There are no relevant changes, so no new version is released");
      return Ok(None);
    };

    let version = self.next_version(&ctx, release_type)?;
    let git_tag = request.options.tag_format.replace(VERSION_PLACEHOLDER, &version.to_string());
    ctx.next_release = Some(NextRelease {
      release_type,
      version: version.clone(),
      git_tag: git_tag.clone(),
      git_head: self.git.head_commit()?,
      notes: String::new(),
    });
    tracing::info!(package = %ctx.package, release_type = %release_type, "The next release version is {}", version);

    let notes = hooks.generate_notes(&mut ctx).await?;
    if let Some(next) = ctx.next_release.as_mut() {
      next.notes = notes;
    }

    let mut published = None;
    if request.options.dry_run {
      tracing::info!(package = %ctx.package, "Skip {} tag creation in dry-run mode", git_tag);
      if let Some(next) = &ctx.next_release {
        tracing::info!(package = %ctx.package, "Release note for version {}:\n{}", version, next.notes);
      }
    } else {
      hooks.prepare(&mut ctx).await?;
      let head = ctx.next_release.as_ref().map(|next| next.git_head.clone()).unwrap_or_default();
      self.git.create_tag(&git_tag, &head)?;
      tracing::info!(package = %ctx.package, "Created tag {}", git_tag);
      let record = hooks.publish(&mut ctx).await?;
      published = Some(record).filter(|record| !record.is_empty());
      tracing::info!(package = %ctx.package, "Published release {}", version);
    }

    let StepContext {
      last_release,
      next_release,
      ..
    } = ctx;
    Ok(next_release.map(|next_release| ReleaseResult {
      last_release,
      next_release,
      published,
    }))
  }
}

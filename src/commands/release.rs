//! Release command implementation
//!
//! Loads the layered configuration, discovers the workspace packages and hands
//! them to the controller with the built-in git pipeline.

use crate::core::config::{ConfigLayer, RelayConfig};
use crate::core::error::RelayResult;
use crate::core::vcs::SystemGit;
use crate::release::pipeline::{CommitSource, TagSource};
use crate::release::{ConventionalPlugins, GitReleaseEngine, MultiReleaseController, Package, PackageOutcome};
use crate::workspace::discover_manifests;
use std::path::PathBuf;
use std::sync::Arc;

/// Inputs of one `relay` invocation
#[derive(Debug, Clone)]
pub struct ReleaseArgs {
  /// Workspace root holding the root package.json
  pub cwd: PathBuf,
  /// Options given on the command line
  pub cli: ConfigLayer,
}

/// Run the release command
pub async fn run_release(args: ReleaseArgs) -> RelayResult<Vec<Package>> {
  let config = RelayConfig::load(&args.cwd, args.cli)?;
  tracing::debug!(config = ?config, "resolved configuration");

  let manifests = discover_manifests(&args.cwd, &config.ignore_packages, config.ignore_private)?;
  let git = Arc::new(SystemGit::open(&args.cwd)?);
  let commits: Arc<dyn CommitSource> = Arc::clone(&git) as Arc<dyn CommitSource>;
  let tags: Arc<dyn TagSource> = Arc::clone(&git) as Arc<dyn TagSource>;
  let dry_run = config.dry_run;

  let controller = MultiReleaseController::new(
    config,
    Arc::new(GitReleaseEngine::new(Arc::clone(&git))),
    Arc::new(ConventionalPlugins::new()),
    commits,
    tags,
  );
  let packages = controller.release(&manifests).await?;
  print_summary(&packages, dry_run);
  Ok(packages)
}

fn print_summary(packages: &[Package], dry_run: bool) {
  println!("📋 Release Summary");
  println!();

  for package in packages {
    match package.result.as_ref().and_then(PackageOutcome::release) {
      Some(result) => {
        let from = result
          .last_release
          .as_ref()
          .map(|last| last.version.to_string())
          .unwrap_or_else(|| "-".to_string());
        println!(
          "🚀 {}  {} → {} ({})",
          package.name, from, result.next_release.version, result.next_release.release_type
        );
        println!("   Tag: {}", result.next_release.git_tag);
      }
      None => println!("⚪ {}  no release", package.name),
    }
  }

  if dry_run {
    println!();
    println!("🔍 Dry-run mode (no manifests written, no tags created)");
  }
}

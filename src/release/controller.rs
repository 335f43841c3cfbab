//! Multi-package release run
//!
//! Loads every package, wires the dependency graph and the synchronizer, then
//! starts one release task per package. All tasks run at once; ordering comes
//! only from the probes the hooks wait on.

use crate::core::config::RelayConfig;
use crate::core::error::{GraphError, RelayError, RelayResult};
use crate::graph::DependencyGraph;
use crate::release::orchestrator::{OrchestratorOptions, ReleaseOrchestrator, RunContext};
use crate::release::package::{Package, PackageOutcome, ReleaseState};
use crate::release::pipeline::{CommitSource, EngineOptions, EngineRequest, Plugins, ReleaseEngine, TagSource};
use crate::release::sync::{READY, READY_FOR_VERIFY, Synchronizer};
use crate::workspace::Manifest;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

/// Coordinates one release run over a set of packages
pub struct MultiReleaseController {
  config: RelayConfig,
  engine: Arc<dyn ReleaseEngine>,
  plugins: Arc<dyn Plugins>,
  commits: Arc<dyn CommitSource>,
  tags: Arc<dyn TagSource>,
}

impl MultiReleaseController {
  pub fn new(
    config: RelayConfig,
    engine: Arc<dyn ReleaseEngine>,
    plugins: Arc<dyn Plugins>,
    commits: Arc<dyn CommitSource>,
    tags: Arc<dyn TagSource>,
  ) -> Self {
    Self {
      config,
      engine,
      plugins,
      commits,
      tags,
    }
  }

  /// Release every package in `manifest_paths`
  ///
  /// Returns the packages in load order, each with its outcome. The first
  /// failing package aborts the others and its error is returned as is.
  pub async fn release(&self, manifest_paths: &[PathBuf]) -> RelayResult<Vec<Package>> {
    tracing::info!("Started multirelease! Loading {} packages...", manifest_paths.len());

    let mut packages = Vec::with_capacity(manifest_paths.len());
    for (id, path) in manifest_paths.iter().enumerate() {
      let manifest = Manifest::load(path)?;
      packages.push(Package::new(id, manifest));
    }
    let graph = DependencyGraph::build(&mut packages);
    for package in &packages {
      tracing::info!("Loaded package {}", package.name);
    }

    if self.config.sequential_prepare && graph.is_cyclic() {
      return Err(RelayError::Graph(GraphError::CycleDeadlock {
        cycles: graph.cycles(),
      }));
    }

    tracing::info!("Queued {} packages! Starting release...", packages.len());
    tracing::debug!(order = ?graph.topological_order(), "dependency order");

    let run = Arc::new(RunContext {
      state: Mutex::new(ReleaseState::new(packages)),
      sync: Synchronizer::new(graph.local_deps()),
      plugins: Arc::clone(&self.plugins),
      commits: Arc::clone(&self.commits),
      tags: Arc::clone(&self.tags),
      options: OrchestratorOptions::from(&self.config),
    });

    let mut tasks = JoinSet::new();
    for id in 0..graph.package_count() {
      let request = self.request_for(&run, id);
      let run = Arc::clone(&run);
      let engine = Arc::clone(&self.engine);
      let sequential_init = self.config.sequential_init;
      tasks.spawn(async move {
        let hooks = ReleaseOrchestrator::new(id, Arc::clone(&run));
        let outcome = engine.run(request, &hooks).await?;

        ReleaseState::lock(&run.state).packages[id].result = Some(match outcome {
          Some(result) => PackageOutcome::Released(result),
          None => PackageOutcome::Skipped,
        });
        if !sequential_init {
          run.sync.finish(id);
        } else if let Some(next) = run.sync.finish_holding(id, READY_FOR_VERIFY, READY) {
          // skipped before verifying while holding the baton
          tracing::debug!(from = id, to = next, "handing over verification");
        }
        Ok::<(), RelayError>(())
      });
    }

    while let Some(joined) = tasks.join_next().await {
      let failure = match joined {
        Ok(Ok(())) => continue,
        Ok(Err(err)) => err,
        Err(err) => RelayError::from(err),
      };
      tracing::debug!(unfinished = ?run.sync.todo(), "aborting remaining releases");
      tasks.abort_all();
      return Err(failure);
    }

    let packages = ReleaseState::lock(&run.state).packages.clone();
    let released = packages
      .iter()
      .filter(|package| package.result.as_ref().is_some_and(PackageOutcome::is_released))
      .count();
    tracing::info!("Released {} of {} packages, semantically!", released, packages.len());
    Ok(packages)
  }

  fn request_for(&self, run: &RunContext, id: usize) -> EngineRequest {
    let state = ReleaseState::lock(&run.state);
    let package = &state.packages[id];
    EngineRequest {
      package: package.name.clone(),
      cwd: package.dir.clone(),
      options: EngineOptions {
        tag_format: package_tag_format(&self.config.tag_format, &package.name),
        dry_run: self.config.dry_run,
        debug: self.config.debug,
        branches: self.config.branches.clone(),
      },
    }
  }
}

/// Fill the package name into a tag template, leaving `${version}` in place
///
/// Accepts `${name}` or `{name}`, and `{version}` as a short form of `${version}`.
pub fn package_tag_format(template: &str, name: &str) -> String {
  template
    .replace("${name}", name)
    .replace("{name}", name)
    .replace("${version}", "{version}")
    .replace("{version}", "${version}")
}

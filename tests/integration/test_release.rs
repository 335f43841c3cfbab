//! Controller runs driven by a scripted in-memory pipeline

use crate::helpers::TestWorkspace;
use anyhow::Result;
use async_trait::async_trait;
use relay::core::config::{ConfigLayer, RelayConfig};
use relay::core::error::{GitError, GraphError, RelayError, RelayResult};
use relay::core::vcs::Commit;
use relay::release::conventional::ConventionalPlugins;
use relay::release::package::{LastRelease, NextRelease, Package, PackageOutcome, PublishRecord, ReleaseResult};
use relay::release::pipeline::{
  BranchInfo, CommitSource, EngineRequest, LifecycleHooks, Plugins, ReleaseEngine, StepContext, TagSource,
};
use relay::release::version::{ReleaseType, next_version};
use relay::release::MultiReleaseController;
use semver::Version;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runs the five hooks in order, without git
struct ScriptedEngine {
  /// Last released version per package name
  last: HashMap<String, Version>,
}

#[async_trait]
impl ReleaseEngine for ScriptedEngine {
  async fn run(&self, request: EngineRequest, hooks: &dyn LifecycleHooks) -> RelayResult<Option<ReleaseResult>> {
    let branch = BranchInfo {
      name: "main".to_string(),
      prerelease: None,
    };
    let mut ctx = StepContext::new(&request, branch);
    ctx.last_release = self.last.get(&request.package).map(|version| LastRelease {
      version: version.clone(),
      git_tag: format!("{}@{}", request.package, version),
      git_head: "base".to_string(),
    });

    hooks.verify_conditions(&mut ctx).await?;
    let Some(release_type) = hooks.analyze_commits(&mut ctx).await? else {
      return Ok(None);
    };

    let version = next_version(ctx.last_release.as_ref().map(|last| &last.version), Some(release_type));
    ctx.next_release = Some(NextRelease {
      release_type,
      version: version.clone(),
      git_tag: format!("{}@{}", request.package, version),
      git_head: "head".to_string(),
      notes: String::new(),
    });
    let notes = hooks.generate_notes(&mut ctx).await?;
    hooks.prepare(&mut ctx).await?;
    let published = hooks.publish(&mut ctx).await?;

    let Some(mut next_release) = ctx.next_release else {
      return Ok(None);
    };
    next_release.notes = notes;
    Ok(Some(ReleaseResult {
      last_release: ctx.last_release,
      next_release,
      published: Some(published).filter(|record| !record.is_empty()),
    }))
  }
}

/// Commit messages per package directory
#[derive(Default)]
struct FakeCommits {
  by_dir: HashMap<PathBuf, Vec<Commit>>,
}

impl CommitSource for FakeCommits {
  fn commits_since(&self, dir: &Path, _since: Option<&str>, _branch: Option<&str>) -> RelayResult<Vec<Commit>> {
    Ok(self.by_dir.get(dir).cloned().unwrap_or_default())
  }
}

struct NoTags;

impl TagSource for NoTags {
  fn tags(&self, _branch: &str, _filters: &[&str]) -> RelayResult<Vec<String>> {
    Ok(Vec::new())
  }
}

/// Conventional plugins that log when verify and prepare start and end
struct RecordingPlugins {
  inner: ConventionalPlugins,
  events: Arc<Mutex<Vec<String>>>,
  /// (step, package) whose delegate fails
  fail_on: Option<(&'static str, String)>,
}

impl RecordingPlugins {
  fn record(&self, event: String) {
    self.events.lock().unwrap().push(event);
  }

  fn check(&self, step: &str, ctx: &StepContext) -> RelayResult<()> {
    match &self.fail_on {
      Some((fail_step, package)) if *fail_step == step && *package == ctx.package => {
        Err(RelayError::Git(GitError::CommandFailed {
          command: format!("npm {} {}", step, package),
          stderr: "E403 forbidden".to_string(),
        }))
      }
      _ => Ok(()),
    }
  }
}

#[async_trait]
impl Plugins for RecordingPlugins {
  async fn verify_conditions(&self, ctx: &StepContext) -> RelayResult<()> {
    self.record(format!("verify:start:{}", ctx.package));
    tokio::time::sleep(Duration::from_millis(20)).await;
    self.check("verify", ctx)?;
    self.record(format!("verify:end:{}", ctx.package));
    Ok(())
  }

  async fn analyze_commits(&self, ctx: &StepContext) -> RelayResult<Option<ReleaseType>> {
    self.inner.analyze_commits(ctx).await
  }

  async fn generate_notes(&self, ctx: &StepContext) -> RelayResult<Option<String>> {
    self.inner.generate_notes(ctx).await
  }

  async fn prepare(&self, ctx: &StepContext) -> RelayResult<()> {
    self.record(format!("prepare:start:{}", ctx.package));
    tokio::time::sleep(Duration::from_millis(20)).await;
    self.check("prepare", ctx)?;
    self.record(format!("prepare:end:{}", ctx.package));
    Ok(())
  }

  async fn publish(&self, ctx: &StepContext) -> RelayResult<Vec<PublishRecord>> {
    Ok(vec![PublishRecord {
      name: Some("scripted".to_string()),
      url: None,
      channel: Some(ctx.branch.name.clone()),
    }])
  }
}

/// One scripted run over a temp workspace
struct Scenario {
  ws: TestWorkspace,
  manifests: Vec<PathBuf>,
  commits: FakeCommits,
  last: HashMap<String, Version>,
  events: Arc<Mutex<Vec<String>>>,
  fail_on: Option<(&'static str, String)>,
}

impl Scenario {
  fn new() -> Result<Self> {
    Ok(Self {
      ws: TestWorkspace::new()?,
      manifests: Vec::new(),
      commits: FakeCommits::default(),
      last: HashMap::new(),
      events: Arc::new(Mutex::new(Vec::new())),
      fail_on: None,
    })
  }

  /// Make the plugins fail `step` for `package`
  fn fail(&mut self, step: &'static str, package: &str) {
    self.fail_on = Some((step, package.to_string()));
  }

  /// Add a package released before as `version`
  fn released(&mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Result<()> {
    self.add(name, version, deps)?;
    self.last.insert(name.to_string(), Version::parse(version)?);
    Ok(())
  }

  fn add(&mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Result<()> {
    self.ws.add_package(name, version, deps)?;
    self.manifests.push(self.ws.manifest_path(name));
    Ok(())
  }

  fn commit(&mut self, name: &str, message: &str) {
    let dir = self.ws.path.join("packages").join(name);
    self.commits.by_dir.entry(dir).or_default().push(Commit::new("abc123", message));
  }

  async fn run(self, cli: ConfigLayer) -> (TestWorkspace, Arc<Mutex<Vec<String>>>, RelayResult<Vec<Package>>) {
    let config = match RelayConfig::load(&self.ws.path, cli) {
      Ok(config) => config,
      Err(err) => return (self.ws, self.events, Err(err)),
    };
    let controller = MultiReleaseController::new(
      config,
      Arc::new(ScriptedEngine { last: self.last }),
      Arc::new(RecordingPlugins {
        inner: ConventionalPlugins::new(),
        events: Arc::clone(&self.events),
        fail_on: self.fail_on,
      }),
      Arc::new(self.commits),
      Arc::new(NoTags),
    );
    let result = controller.release(&self.manifests).await;
    (self.ws, self.events, result)
  }
}

fn outcome<'a>(packages: &'a [Package], name: &str) -> &'a PackageOutcome {
  packages
    .iter()
    .find(|package| package.name == name)
    .and_then(|package| package.result.as_ref())
    .unwrap()
}

fn released_as(packages: &[Package], name: &str) -> Option<(ReleaseType, String)> {
  outcome(packages, name)
    .release()
    .map(|result| (result.next_release.release_type, result.next_release.version.to_string()))
}

/// a, b -> a, c -> b, d; only a has a feature commit
fn chain_scenario() -> Result<Scenario> {
  let mut scenario = Scenario::new()?;
  scenario.released("a", "1.0.0", &[])?;
  scenario.released("b", "1.0.0", &[("a", "1.0.0")])?;
  scenario.released("c", "1.0.0", &[("b", "1.0.0")])?;
  scenario.released("d", "1.0.0", &[])?;
  scenario.commit("a", "feat: add api");
  scenario.commit("d", "docs: readme");
  Ok(scenario)
}

fn assert_chain_released(ws: &TestWorkspace, packages: &[Package]) -> Result<()> {
  assert_eq!(released_as(packages, "a"), Some((ReleaseType::Minor, "1.1.0".to_string())));
  assert_eq!(released_as(packages, "b"), Some((ReleaseType::Patch, "1.0.1".to_string())));
  assert_eq!(released_as(packages, "c"), Some((ReleaseType::Patch, "1.0.1".to_string())));
  assert_eq!(outcome(packages, "d"), &PackageOutcome::Skipped);

  let b = ws.read_manifest("b")?;
  assert_eq!(b["version"], "1.0.1");
  assert_eq!(b["dependencies"]["a"], "1.1.0");
  let c = ws.read_manifest("c")?;
  assert_eq!(c["version"], "1.0.1");
  assert_eq!(c["dependencies"]["b"], "1.0.1");
  assert_eq!(ws.read_manifest("d")?["version"], "1.0.0");
  Ok(())
}

#[tokio::test]
async fn test_cascade_through_chain() -> Result<()> {
  let (ws, _, result) = chain_scenario()?.run(ConfigLayer::default()).await;
  let packages = result?;
  assert_eq!(
    packages.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
    vec!["a", "b", "c", "d"]
  );
  assert_chain_released(&ws, &packages)
}

#[tokio::test]
async fn test_cascade_without_sequential_prepare() -> Result<()> {
  let cli = ConfigLayer {
    sequential_prepare: Some(false),
    ..ConfigLayer::default()
  };
  let (ws, _, result) = chain_scenario()?.run(cli).await;
  assert_chain_released(&ws, &result?)
}

#[tokio::test]
async fn test_notes_mention_upgraded_dependencies() -> Result<()> {
  let (_ws, _, result) = chain_scenario()?.run(ConfigLayer::default()).await;
  let packages = result?;
  let b = outcome(&packages, "b").release().unwrap();
  assert!(b.next_release.notes.starts_with("## b [1.0.1]"), "{}", b.next_release.notes);
  assert!(b.next_release.notes.ends_with("### Dependencies\n\n* **a:** upgraded to 1.1.0"));
  assert_eq!(b.published.as_ref().and_then(|p| p.name.as_deref()), Some("scripted"));
  Ok(())
}

#[tokio::test]
async fn test_cycle_with_sequential_prepare_fails_before_release() -> Result<()> {
  let mut scenario = Scenario::new()?;
  scenario.released("d", "1.0.0", &[("e", "1.0.0")])?;
  scenario.released("e", "1.0.0", &[("d", "1.0.0")])?;
  scenario.commit("d", "fix: bug");

  let (_ws, events, result) = scenario.run(ConfigLayer::default()).await;
  match result {
    Err(RelayError::Graph(GraphError::CycleDeadlock { cycles })) => {
      assert_eq!(cycles, vec![vec!["d".to_string(), "e".to_string()]]);
    }
    other => panic!("expected a cycle error, got {:?}", other.map(|p| p.len())),
  }
  assert!(events.lock().unwrap().is_empty());
  Ok(())
}

#[tokio::test]
async fn test_cycle_releases_without_sequential_prepare() -> Result<()> {
  let mut scenario = Scenario::new()?;
  scenario.released("d", "1.0.0", &[("e", "1.0.0")])?;
  scenario.released("e", "1.0.0", &[("d", "1.0.0")])?;
  scenario.commit("d", "feat: thing");

  let cli = ConfigLayer {
    sequential_prepare: Some(false),
    ..ConfigLayer::default()
  };
  let (ws, _, result) = scenario.run(cli).await;
  let packages = result?;
  assert_eq!(released_as(&packages, "d"), Some((ReleaseType::Minor, "1.1.0".to_string())));
  assert_eq!(released_as(&packages, "e"), Some((ReleaseType::Patch, "1.0.1".to_string())));
  assert_eq!(ws.read_manifest("e")?["dependencies"]["d"], "1.1.0");
  assert_eq!(ws.read_manifest("d")?["dependencies"]["e"], "1.0.1");
  Ok(())
}

#[tokio::test]
async fn test_unreleased_dependency_is_fatal() -> Result<()> {
  let mut scenario = Scenario::new()?;
  scenario.add("a", "0.0.0", &[])?;
  scenario.released("b", "1.0.0", &[("a", "*")])?;
  scenario.commit("b", "feat: thing");

  let (ws, _, result) = scenario.run(ConfigLayer::default()).await;
  let err = result.unwrap_err();
  assert_eq!(
    err.to_string(),
    "Cannot release b because dependency a has not been released yet"
  );
  assert_eq!(ws.read_manifest("b")?["version"], "1.0.0");
  Ok(())
}

#[tokio::test]
async fn test_sequential_init_never_overlaps() -> Result<()> {
  let mut scenario = Scenario::new()?;
  for name in ["x", "y", "z"] {
    scenario.released(name, "1.0.0", &[])?;
    scenario.commit(name, "fix: bug");
  }
  let cli = ConfigLayer {
    sequential_init: Some(true),
    ..ConfigLayer::default()
  };

  let (_ws, events, result) = scenario.run(cli).await;
  assert_eq!(result?.len(), 3);

  let verify: Vec<String> = events
    .lock()
    .unwrap()
    .iter()
    .filter(|event| event.starts_with("verify:"))
    .cloned()
    .collect();
  assert_eq!(verify.len(), 6);
  for pair in verify.chunks(2) {
    let started = pair[0].strip_prefix("verify:start:").unwrap();
    assert_eq!(pair[1], format!("verify:end:{}", started));
  }
  Ok(())
}

#[tokio::test]
async fn test_sequential_prepare_orders_dependencies_first() -> Result<()> {
  let mut scenario = Scenario::new()?;
  scenario.released("app", "1.0.0", &[("lib", "1.0.0")])?;
  scenario.released("lib", "1.0.0", &[])?;
  scenario.commit("app", "fix: bug");
  scenario.commit("lib", "fix: bug");

  let (_ws, events, result) = scenario.run(ConfigLayer::default()).await;
  result?;

  let events = events.lock().unwrap();
  let position = |event: &str| events.iter().position(|e| e == event).unwrap();
  assert!(position("prepare:end:lib") < position("prepare:start:app"));
  Ok(())
}

#[tokio::test]
async fn test_no_changes_anywhere_skips_everything() -> Result<()> {
  let mut scenario = Scenario::new()?;
  scenario.released("a", "1.0.0", &[])?;
  scenario.released("b", "1.0.0", &[("a", "1.0.0")])?;

  let (ws, events, result) = scenario.run(ConfigLayer::default()).await;
  let packages = result?;
  assert!(packages.iter().all(|p| p.result == Some(PackageOutcome::Skipped)));
  assert!(!events.lock().unwrap().iter().any(|e| e.starts_with("prepare:")));
  assert_eq!(ws.read_manifest("b")?["dependencies"]["a"], "1.0.0");
  Ok(())
}

fn assert_plugin_failure(result: RelayResult<Vec<Package>>, step: &str, package: &str) {
  match result {
    Err(RelayError::Git(GitError::CommandFailed { command, stderr })) => {
      assert_eq!(command, format!("npm {} {}", step, package));
      assert_eq!(stderr, "E403 forbidden");
    }
    other => panic!("expected the plugin error, got {:?}", other.map(|p| p.len())),
  }
}

#[tokio::test]
async fn test_verify_failure_propagates_and_stops_everyone() -> Result<()> {
  let mut scenario = chain_scenario()?;
  scenario.fail("verify", "b");

  let (ws, events, result) = scenario.run(ConfigLayer::default()).await;
  assert_plugin_failure(result, "verify", "b");
  assert!(!events.lock().unwrap().iter().any(|e| e.starts_with("prepare:")));
  assert_eq!(ws.read_manifest("a")?["version"], "1.0.0");
  Ok(())
}

#[tokio::test]
async fn test_prepare_failure_propagates_and_stops_dependents() -> Result<()> {
  let mut scenario = chain_scenario()?;
  scenario.fail("prepare", "a");

  let (_ws, events, result) = scenario.run(ConfigLayer::default()).await;
  assert_plugin_failure(result, "prepare", "a");
  let events = events.lock().unwrap();
  let prepared: Vec<&String> = events.iter().filter(|e| e.starts_with("prepare:")).collect();
  assert_eq!(prepared, vec!["prepare:start:a"]);
  Ok(())
}

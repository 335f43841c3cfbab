//! End-to-end runs of the `relay` binary against real git repositories

use crate::helpers::{TestWorkspace, run_relay, run_relay_unchecked};
use anyhow::Result;

/// a and b -> a, both tagged at 1.0.0, then a feature lands in a
fn released_workspace() -> Result<TestWorkspace> {
  let ws = TestWorkspace::new()?;
  ws.add_package("a", "1.0.0", &[])?;
  ws.add_package("b", "1.0.0", &[("a", "1.0.0")])?;
  ws.commit("chore: initial packages")?;
  ws.tag("a@1.0.0")?;
  ws.tag("b@1.0.0")?;

  ws.modify_file("a", "index.js", "module.exports = () => 'a';\n")?;
  ws.commit("feat(a): export a function")?;
  Ok(ws)
}

#[test]
fn test_dry_run_reports_without_side_effects() -> Result<()> {
  let ws = released_workspace()?;

  let output = run_relay(&ws.path, &["--dry-run"])?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("a  1.0.0 → 1.1.0 (minor)"), "stdout: {}", stdout);
  assert!(stdout.contains("b  1.0.0 → 1.0.1 (patch)"), "stdout: {}", stdout);
  assert!(stdout.contains("Dry-run mode"));

  assert_eq!(ws.tags()?, vec!["a@1.0.0", "b@1.0.0"]);
  assert_eq!(ws.read_manifest("a")?["version"], "1.0.0");
  assert_eq!(ws.read_manifest("b")?["dependencies"]["a"], "1.0.0");
  Ok(())
}

#[test]
fn test_release_tags_and_rewrites_manifests() -> Result<()> {
  let ws = released_workspace()?;

  let output = run_relay(&ws.path, &[])?;
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("Started multirelease! Loading 2 packages..."), "stderr: {}", stderr);
  assert!(stderr.contains("Released 2 of 2 packages, semantically!"), "stderr: {}", stderr);

  assert_eq!(ws.tags()?, vec!["a@1.0.0", "a@1.1.0", "b@1.0.0", "b@1.0.1"]);
  assert_eq!(ws.read_manifest("a")?["version"], "1.1.0");
  let b = ws.read_manifest("b")?;
  assert_eq!(b["version"], "1.0.1");
  assert_eq!(b["dependencies"]["a"], "1.1.0");
  Ok(())
}

#[test]
fn test_dependency_prefix_from_cli() -> Result<()> {
  let ws = released_workspace()?;

  run_relay(&ws.path, &["--deps.prefix=^"])?;
  assert_eq!(ws.read_manifest("b")?["dependencies"]["a"], "^1.1.0");
  Ok(())
}

#[test]
fn test_satisfied_range_is_kept() -> Result<()> {
  let ws = TestWorkspace::new()?;
  ws.add_package("a", "1.0.0", &[])?;
  ws.add_package("b", "1.0.0", &[("a", "^1.0.0")])?;
  ws.commit("chore: initial packages")?;
  ws.tag("a@1.0.0")?;
  ws.tag("b@1.0.0")?;
  ws.modify_file("a", "index.js", "module.exports = 'fixed';\n")?;
  ws.commit("fix(a): typo")?;

  let output = run_relay(&ws.path, &["--dry-run", "--deps.bump=satisfy"])?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("a  1.0.0 → 1.0.1 (patch)"), "stdout: {}", stdout);
  assert!(stdout.contains("⚪ b  no release"), "stdout: {}", stdout);
  Ok(())
}

#[test]
fn test_ignored_packages_are_left_out() -> Result<()> {
  let ws = released_workspace()?;

  let output = run_relay(&ws.path, &["--dry-run", "--ignore-packages=packages/b"])?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("a  1.0.0 → 1.1.0 (minor)"), "stdout: {}", stdout);
  assert!(!stdout.contains("b  "), "stdout: {}", stdout);
  Ok(())
}

#[test]
fn test_cycle_with_sequential_prepare_exits_with_error() -> Result<()> {
  let ws = TestWorkspace::new()?;
  ws.add_package("d", "1.0.0", &[("e", "1.0.0")])?;
  ws.add_package("e", "1.0.0", &[("d", "1.0.0")])?;
  ws.commit("feat: cyclic packages")?;

  let output = run_relay_unchecked(&ws.path, &["--sequential-prepare"])?;
  assert_eq!(output.status.code(), Some(1));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("cyclic dependency"), "stderr: {}", stderr);
  assert!(stderr.contains("d -> e"), "stderr: {}", stderr);
  assert!(ws.tags()?.is_empty());
  Ok(())
}

#[test]
fn test_missing_workspaces_exits_with_error() -> Result<()> {
  let ws = TestWorkspace::new()?;
  std::fs::write(ws.path.join("package.json"), r#"{ "name": "not-a-monorepo" }"#)?;
  ws.commit("chore: init")?;

  let output = run_relay_unchecked(&ws.path, &[])?;
  assert_eq!(output.status.code(), Some(1));
  Ok(())
}

//! Test helpers for integration tests

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A test monorepo with git history
pub struct TestWorkspace {
  _root: TempDir,
  pub path: PathBuf,
}

impl TestWorkspace {
  /// Create a git repository with a root package.json declaring `packages/*`
  pub fn new() -> Result<Self> {
    let root = TempDir::new()?;
    let path = root.path().to_path_buf();

    // Initialize git repo with main as default branch
    git(&path, &["init", "--initial-branch=main"])?;
    git(&path, &["config", "user.name", "Test User"])?;
    git(&path, &["config", "user.email", "test@example.com"])?;
    git(&path, &["config", "commit.gpgsign", "false"])?;
    git(&path, &["config", "tag.gpgsign", "false"])?;

    std::fs::write(
      path.join("package.json"),
      r#"{
  "name": "monorepo",
  "private": true,
  "workspaces": ["packages/*"]
}
"#,
    )?;

    Ok(Self { _root: root, path })
  }

  /// Add a package under `packages/<name>` with the given local dependencies
  pub fn add_package(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> Result<PathBuf> {
    let dir = self.path.join("packages").join(name);
    std::fs::create_dir_all(&dir)?;

    let mut manifest = serde_json::json!({ "name": name, "version": version });
    if !deps.is_empty() {
      let deps: serde_json::Map<String, Value> = deps
        .iter()
        .map(|(dep, range)| (dep.to_string(), Value::String(range.to_string())))
        .collect();
      manifest["dependencies"] = Value::Object(deps);
    }
    std::fs::write(dir.join("package.json"), serde_json::to_string_pretty(&manifest)? + "\n")?;
    std::fs::write(dir.join("index.js"), format!("module.exports = '{}';\n", name))?;

    Ok(dir)
  }

  /// Overwrite a file inside a package
  pub fn modify_file(&self, package: &str, file: &str, content: &str) -> Result<()> {
    std::fs::write(self.path.join("packages").join(package).join(file), content)?;
    Ok(())
  }

  /// Commit current changes
  pub fn commit(&self, message: &str) -> Result<String> {
    git(&self.path, &["add", "."])?;
    git(&self.path, &["commit", "-m", message])?;

    let output = git(&self.path, &["rev-parse", "HEAD"])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// Create a lightweight tag at HEAD
  pub fn tag(&self, name: &str) -> Result<()> {
    git(&self.path, &["tag", name])?;
    Ok(())
  }

  /// Every tag in the repository, sorted
  pub fn tags(&self) -> Result<Vec<String>> {
    let output = git(&self.path, &["tag", "--list"])?;
    let mut tags: Vec<String> = String::from_utf8_lossy(&output.stdout)
      .lines()
      .map(|line| line.trim().to_string())
      .filter(|line| !line.is_empty())
      .collect();
    tags.sort();
    Ok(tags)
  }

  /// Parse a package's package.json
  pub fn read_manifest(&self, package: &str) -> Result<Value> {
    let path = self.path.join("packages").join(package).join("package.json");
    let content = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
  }

  pub fn manifest_path(&self, package: &str) -> PathBuf {
    self.path.join("packages").join(package).join("package.json")
  }
}

/// Run git command in a directory
pub fn git(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .output()
    .context("Failed to run git command")?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("Git command failed: git {}\n{}", args.join(" "), stderr);
  }

  Ok(output)
}

/// Run the relay binary, failing on a non-zero exit
pub fn run_relay(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = run_relay_unchecked(cwd, args)?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    anyhow::bail!(
      "relay command failed: relay {}\nstdout: {}\nstderr: {}",
      args.join(" "),
      stdout,
      stderr
    );
  }

  Ok(output)
}

/// Run the relay binary and return its output whatever the exit status
pub fn run_relay_unchecked(cwd: &Path, args: &[&str]) -> Result<Output> {
  let relay_bin = env!("CARGO_BIN_EXE_relay");

  Command::new(relay_bin)
    .current_dir(cwd)
    .args(args)
    .env_remove("RUST_LOG")
    .output()
    .context("Failed to run relay")
}

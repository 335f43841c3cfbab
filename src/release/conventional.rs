//! Conventional-commit analysis and release notes
//!
//! The package's own plugins for the built-in pipeline. Prepare and publish keep
//! the no-op defaults.

use crate::core::error::RelayResult;
use crate::core::vcs::Commit;
use crate::release::pipeline::{Plugins, StepContext};
use crate::release::version::ReleaseType;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

/// `type(scope)!: subject`, compiled once
fn header_regex() -> Option<&'static Regex> {
  static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
  REGEX
    .get_or_init(|| Regex::new(r"^(?P<type>\w+)(?:\((?P<scope>[^)]*)\))?(?P<bang>!)?: (?P<subject>.+)$").ok())
    .as_ref()
}

/// Conventional commit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitType {
  Feat,
  Fix,
  Perf,
  Other,
}

impl CommitType {
  fn parse(kind: &str) -> Self {
    match kind.to_lowercase().as_str() {
      "feat" => CommitType::Feat,
      "fix" => CommitType::Fix,
      "perf" => CommitType::Perf,
      _ => CommitType::Other,
    }
  }
}

/// A commit message read as a conventional commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalCommit {
  pub commit_type: CommitType,
  pub scope: Option<String>,
  pub subject: String,
  pub is_breaking: bool,
}

impl ConventionalCommit {
  /// `None` for messages without a `type(scope): subject` header
  pub fn parse(commit: &Commit) -> Option<Self> {
    let captures = header_regex()?.captures(&commit.subject)?;
    let body = commit.body();
    Some(Self {
      commit_type: CommitType::parse(&captures["type"]),
      scope: captures
        .name("scope")
        .map(|scope| scope.as_str().trim().to_string())
        .filter(|scope| !scope.is_empty()),
      subject: captures["subject"].trim().to_string(),
      is_breaking: captures.name("bang").is_some()
        || body.contains("BREAKING CHANGE")
        || body.contains("BREAKING-CHANGE"),
    })
  }

  pub fn release_type(&self) -> Option<ReleaseType> {
    if self.is_breaking {
      return Some(ReleaseType::Major);
    }
    match self.commit_type {
      CommitType::Feat => Some(ReleaseType::Minor),
      CommitType::Fix | CommitType::Perf => Some(ReleaseType::Patch),
      CommitType::Other => None,
    }
  }

  fn bullet(&self) -> String {
    match &self.scope {
      Some(scope) => format!("* **{}:** {}", scope, self.subject),
      None => format!("* {}", self.subject),
    }
  }
}

/// Highest release type implied by a set of commits
pub fn analyze(commits: &[Commit]) -> Option<ReleaseType> {
  commits
    .iter()
    .filter_map(ConventionalCommit::parse)
    .filter_map(|commit| commit.release_type())
    .max()
}

/// Conventional-commit plugins for the built-in pipeline
#[derive(Debug, Clone, Default)]
pub struct ConventionalPlugins {
  /// Date printed in note headings, today when unset
  date: Option<NaiveDate>,
}

impl ConventionalPlugins {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_date(date: NaiveDate) -> Self {
    Self { date: Some(date) }
  }

  fn notes(&self, ctx: &StepContext) -> Option<String> {
    let next = ctx.next_release.as_ref()?;
    let date = self.date.unwrap_or_else(|| Local::now().date_naive());
    let version = &next.version;
    let heading = if version.minor == 0 && version.patch == 0 && version.pre.is_empty() {
      format!("# {} ({})", version, date.format("%Y-%m-%d"))
    } else {
      format!("## [{}] ({})", version, date.format("%Y-%m-%d"))
    };

    let parsed: Vec<ConventionalCommit> = ctx.commits.iter().filter_map(ConventionalCommit::parse).collect();
    let mut sections = vec![heading];
    for (title, kinds) in [
      ("### Features", &[CommitType::Feat][..]),
      ("### Bug Fixes", &[CommitType::Fix, CommitType::Perf][..]),
    ] {
      let bullets: Vec<String> = parsed
        .iter()
        .filter(|commit| kinds.contains(&commit.commit_type))
        .map(ConventionalCommit::bullet)
        .collect();
      if !bullets.is_empty() {
        sections.push(format!("{}\n\n{}", title, bullets.join("\n")));
      }
    }
    Some(sections.join("\n\n"))
  }
}

#[async_trait]
impl Plugins for ConventionalPlugins {
  async fn analyze_commits(&self, ctx: &StepContext) -> RelayResult<Option<ReleaseType>> {
    let release_type = analyze(&ctx.commits);
    tracing::debug!(
      package = %ctx.package,
      commits = ctx.commits.len(),
      release_type = release_type.map(ReleaseType::as_str).unwrap_or("none"),
      "analyzed commits"
    );
    Ok(release_type)
  }

  async fn generate_notes(&self, ctx: &StepContext) -> RelayResult<Option<String>> {
    Ok(self.notes(ctx))
  }
}

//! Release-facing operations for SystemGit (commit walking, tags)

use super::Commit;
use super::system_git::SystemGit;
use crate::core::error::RelayResult;
use crate::release::pipeline::{CommitSource, TagSource};
use std::path::Path;

/// Separates fields inside one `git log` record
const FIELD_SEP: char = '\u{1f}';
/// Separates `git log` records
const RECORD_SEP: char = '\u{1e}';

impl SystemGit {
  /// Commits touching `dir`, newest first
  ///
  /// `since` excludes that commit and its ancestors. With `first_parent_branch` the
  /// walk starts at that branch and follows first parents only.
  pub fn commits_touching(
    &self,
    dir: &Path,
    since: Option<&str>,
    first_parent_branch: Option<&str>,
  ) -> RelayResult<Vec<Commit>> {
    let tip = first_parent_branch.unwrap_or("HEAD");
    let range = match since {
      Some(sha) => format!("{}..{}", sha, tip),
      None => tip.to_string(),
    };
    let format = format!("--format=%H{}%B{}", FIELD_SEP, RECORD_SEP);
    let pathspec = self.pathspec(dir).to_string_lossy().into_owned();

    let mut args = vec!["log", format.as_str()];
    if first_parent_branch.is_some() {
      args.push("--first-parent");
    }
    args.push(range.as_str());
    args.push("--");
    args.push(pathspec.as_str());

    let stdout = self.run(&args)?;
    Ok(parse_log(&stdout))
  }

  /// Tags reachable from `branch`
  pub fn merged_tags(&self, branch: &str) -> RelayResult<Vec<String>> {
    let stdout = self.run(&["tag", "--merged", branch])?;
    Ok(
      stdout
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect(),
    )
  }

  /// Commit a tag points at
  pub fn tag_commit(&self, tag: &str) -> RelayResult<String> {
    self.run(&["rev-list", "-1", tag])
  }

  /// Create a lightweight tag at `sha`
  pub fn create_tag(&self, tag: &str, sha: &str) -> RelayResult<()> {
    self.run(&["tag", tag, sha])?;
    Ok(())
  }
}

impl CommitSource for SystemGit {
  fn commits_since(&self, dir: &Path, since: Option<&str>, first_parent_branch: Option<&str>) -> RelayResult<Vec<Commit>> {
    self.commits_touching(dir, since, first_parent_branch)
  }
}

impl TagSource for SystemGit {
  fn tags(&self, branch: &str, filters: &[&str]) -> RelayResult<Vec<String>> {
    let tags = self.merged_tags(branch)?;
    Ok(
      tags
        .into_iter()
        .filter(|tag| filters.iter().all(|filter| tag.contains(filter)))
        .collect(),
    )
  }
}

/// Parse `git log --format=%H<US>%B<RS>` output
fn parse_log(output: &str) -> Vec<Commit> {
  output
    .split(RECORD_SEP)
    .filter_map(|record| {
      let record = record.trim_start_matches(['\n', '\r']);
      let (hash, message) = record.split_once(FIELD_SEP)?;
      let hash = hash.trim();
      if hash.is_empty() {
        return None;
      }
      Some(Commit::new(hash, message.trim_end()))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_log_records() {
    let output = "aaa\u{1f}feat: one\n\nbody line\n\u{1e}\nbbb\u{1f}fix(core): two\n\u{1e}";
    let commits = parse_log(output);
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].hash, "aaa");
    assert_eq!(commits[0].subject, "feat: one");
    assert_eq!(commits[0].body(), "body line");
    assert_eq!(commits[1].hash, "bbb");
    assert_eq!(commits[1].message, "fix(core): two");
  }

  #[test]
  fn test_parse_log_empty() {
    assert!(parse_log("").is_empty());
  }
}

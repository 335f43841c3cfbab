//! Version arithmetic and cascading release-type resolution
//!
//! Range matching and increments follow npm semantics, since the ranges being
//! rewritten live in package.json files.

use crate::core::config::{BumpPolicy, BumpStrategy, ReleaseStrategy};
use crate::core::error::RelayResult;
use crate::release::package::{Package, PackageId};
use crate::workspace::DependencyScope;
use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version, VersionReq};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Placeholder a tag format leaves for the version
pub const VERSION_PLACEHOLDER: &str = "${version}";

/// Release severity, ordered patch < minor < major
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReleaseType {
  /// Bug fixes
  Patch,
  /// New features
  Minor,
  /// Breaking changes
  Major,
}

impl ReleaseType {
  /// Increment `version` the way `npm version <type>` does
  ///
  /// A prerelease is promoted to its release when the bump would not move past it,
  /// so `1.0.0-dev.3` patch-bumps to `1.0.0`.
  pub fn apply(self, version: &Version) -> Version {
    let is_pre = !version.pre.is_empty();
    let mut next = Version::new(version.major, version.minor, version.patch);
    match self {
      ReleaseType::Major => {
        if version.minor != 0 || version.patch != 0 || !is_pre {
          next.major += 1;
        }
        next.minor = 0;
        next.patch = 0;
      }
      ReleaseType::Minor => {
        if version.patch != 0 || !is_pre {
          next.minor += 1;
        }
        next.patch = 0;
      }
      ReleaseType::Patch => {
        if !is_pre {
          next.patch += 1;
        }
      }
    }
    next
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ReleaseType::Patch => "patch",
      ReleaseType::Minor => "minor",
      ReleaseType::Major => "major",
    }
  }
}

impl fmt::Display for ReleaseType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ReleaseType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "patch" => Ok(ReleaseType::Patch),
      "minor" => Ok(ReleaseType::Minor),
      "major" => Ok(ReleaseType::Major),
      other => Err(format!("Unknown release type '{}'", other)),
    }
  }
}

/// First prerelease identifier (`dev` in `1.0.0-dev.3`)
pub fn pre_release_identifier(version: &Version) -> Option<&str> {
  if version.pre.is_empty() {
    return None;
  }
  version.pre.as_str().split('.').next()
}

/// `npm version prerelease --preid <id>`
pub fn inc_prerelease(version: &Version, id: &str) -> Version {
  let (core, mut idents) = if version.pre.is_empty() {
    (
      Version::new(version.major, version.minor, version.patch + 1),
      vec!["0".to_string()],
    )
  } else {
    let mut idents: Vec<String> = version.pre.as_str().split('.').map(str::to_string).collect();
    let bumped = idents
      .iter()
      .rposition(|ident| ident.parse::<u64>().is_ok())
      .and_then(|i| Some((i, idents[i].parse::<u64>().ok()?.checked_add(1)?)));
    match bumped {
      Some((i, n)) => idents[i] = n.to_string(),
      None => idents.push("0".to_string()),
    }
    (Version::new(version.major, version.minor, version.patch), idents)
  };

  if !id.is_empty() {
    let same_id = idents.first().is_some_and(|first| first == id);
    let numbered = idents.get(1).is_some_and(|second| second.parse::<u64>().is_ok());
    if !same_id || !numbered {
      idents = vec![id.to_string(), "0".to_string()];
    }
  }

  with_prerelease(core, &idents.join("."))
}

fn with_prerelease(mut version: Version, pre: &str) -> Version {
  version.pre = Prerelease::new(pre).unwrap_or(Prerelease::EMPTY);
  version.build = BuildMetadata::EMPTY;
  version
}

/// Regex matching tags rendered from `tag_format`, capturing `version`
pub fn tag_pattern(tag_format: &str) -> RelayResult<Regex> {
  let escaped = regex::escape(tag_format).replace(&regex::escape(VERSION_PLACEHOLDER), r"(?P<version>.+)");
  Ok(Regex::new(&format!("^{}$", escaped))?)
}

/// Version a release tag was cut for, if `pattern` recognizes the tag
///
/// `core@1.0.0` matches `core@${version}`; `core-utils@1.0.0` does not.
pub fn version_from_tag(tag: &str, pattern: &Regex) -> Option<Version> {
  Version::parse(pattern.captures(tag)?.name("version")?.as_str()).ok()
}

/// Highest version, optionally ignoring prereleases
pub fn latest_version(versions: &[Version], with_prerelease: bool) -> Option<&Version> {
  versions
    .iter()
    .filter(|v| with_prerelease || v.pre.is_empty())
    .max_by(|a, b| a.cmp_precedence(b))
}

pub fn highest<'a>(a: &'a Version, b: &'a Version) -> &'a Version {
  if b.cmp_precedence(a).is_gt() { b } else { a }
}

/// Next stable version: bump the last one, keep it, or start at 1.0.0
pub fn next_version(last: Option<&Version>, next_type: Option<ReleaseType>) -> Version {
  match (last, next_type) {
    (Some(last), Some(release_type)) => release_type.apply(last),
    (Some(last), None) => last.clone(),
    (None, _) => Version::new(1, 0, 0),
  }
}

/// Next prerelease version for the `pre_release` channel
///
/// `tag_versions` are the versions of the package's historical tags on that
/// channel; the higher of the two candidate increments wins so a tag cut by an
/// earlier, unrecorded run is never reused.
pub fn next_pre_version(
  last: Option<&Version>,
  next_type: Option<ReleaseType>,
  pre_release: &str,
  tag_versions: &[Version],
) -> Version {
  let first = || with_prerelease(Version::new(1, 0, 0), &format!("{}.1", pre_release));

  let Some(last) = last else {
    return first();
  };
  match pre_release_identifier(last) {
    Some(id) if id != pre_release => first(),
    None => {
      let core = next_type.unwrap_or(ReleaseType::Patch).apply(last);
      with_prerelease(core, &format!("{}.1", pre_release))
    }
    Some(_) => {
      let from_last = inc_prerelease(last, pre_release);
      match latest_version(tag_versions, true) {
        Some(tagged) => highest(&from_last, &inc_prerelease(tagged, pre_release)).clone(),
        None => from_last,
      }
    }
  }
}

/// Does `version` satisfy the npm range `range`?
///
/// Unsupported protocols (`workspace:`, `file:`, dist-tags) never match.
pub fn satisfies(version: &Version, range: &str) -> bool {
  range
    .split("||")
    .any(|alternative| npm_comparator_set(alternative.trim()).is_some_and(|req| req.matches(version)))
}

fn npm_comparator_set(range: &str) -> Option<VersionReq> {
  if range.is_empty() {
    return VersionReq::parse("*").ok();
  }

  if let Some((low, high)) = range.split_once(" - ") {
    let low = npm_comparator(&format!(">={}", low.trim()))?;
    let high = npm_comparator(&format!("<={}", high.trim()))?;
    return VersionReq::parse(&format!("{}, {}", low, high)).ok();
  }

  let tokens: Vec<&str> = range.split_whitespace().collect();
  let mut comparators = Vec::new();
  let mut i = 0;
  while i < tokens.len() {
    let mut token = tokens[i].to_string();
    // `>= 1.2.0` is one comparator
    if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) && i + 1 < tokens.len() {
      token.push_str(tokens[i + 1]);
      i += 1;
    }
    comparators.push(npm_comparator(&token)?);
    i += 1;
  }

  VersionReq::parse(&comparators.join(", ")).ok()
}

/// Translate one npm comparator into semver crate syntax
fn npm_comparator(token: &str) -> Option<String> {
  let op_end = token
    .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
    .unwrap_or(token.len());
  let (op, rest) = token.split_at(op_end);
  let rest = rest.trim_start_matches('v');
  let (core, suffix) = match rest.find(['-', '+']) {
    Some(i) => rest.split_at(i),
    None => (rest, ""),
  };

  let concrete: Vec<&str> = core
    .split('.')
    .take_while(|chunk| !matches!(*chunk, "x" | "X" | "*" | ""))
    .collect();
  if concrete.len() > 3 || concrete.iter().any(|chunk| !chunk.chars().all(|c| c.is_ascii_digit())) {
    return None;
  }

  match concrete.len() {
    // npm treats a bare version as an exact match; the semver crate would read it as caret
    3 => Some(format!("{}{}{}", if op.is_empty() { "=" } else { op }, core, suffix)),
    0 => Some("*".to_string()),
    _ if op.is_empty() || op == "=" => Some(format!("{}.*", concrete.join("."))),
    _ => Some(format!("{}{}", op, concrete.join("."))),
  }
}

/// Rewrite a declared range for a dependency that will be released as `next_version`
pub fn resolve_next_version(current_range: &str, next_version: &str, strategy: BumpStrategy, prefix: &str) -> String {
  if matches!(strategy, BumpStrategy::Satisfy | BumpStrategy::Inherit)
    && Version::parse(next_version).is_ok_and(|next| satisfies(&next, current_range))
  {
    return current_range.to_string();
  }

  if strategy == BumpStrategy::Inherit {
    let next_chunks: Vec<&str> = next_version.split('.').collect();
    return current_range
      .split('.')
      .enumerate()
      .map(|(i, chunk)| match next_chunks.get(i) {
        Some(next_chunk) if !next_chunk.is_empty() => replace_first_number(chunk, next_chunk),
        _ => chunk.to_string(),
      })
      .collect::<Vec<_>>()
      .join(".");
  }

  format!("{}{}", prefix, next_version)
}

fn replace_first_number(chunk: &str, with: &str) -> String {
  let Some(start) = chunk.find(|c: char| c.is_ascii_digit()) else {
    return chunk.to_string();
  };
  let end = chunk[start..]
    .find(|c: char| !c.is_ascii_digit())
    .map_or(chunk.len(), |offset| start + offset);
  format!("{}{}{}", &chunk[..start], with, &chunk[end..])
}

/// Version the package will be released as, given its resolved type
///
/// Prerelease channels also consult `tag_versions`, the package's own
/// historical tags collected during analysis.
pub fn package_next_version(package: &Package) -> Version {
  let last = package.last_release.as_ref().map(|last| &last.version);
  match package.pre_release.as_deref() {
    Some(pre_release) => next_pre_version(last, package.next_type, pre_release, &package.tag_versions),
    None => next_version(last, package.next_type),
  }
}

/// Cascade bookkeeping shared by every resolution of one run
///
/// A package is settled once its walk finished without reaching back into a
/// package still being walked. Settled packages report their type and are
/// never walked again. Packages in a cycle stay unsettled until their own
/// top-level call.
#[derive(Debug, Default)]
pub struct Cascade {
  settled: HashSet<PackageId>,
  /// Type from the package's own analysis, captured on first visit
  own: HashMap<PackageId, Option<ReleaseType>>,
  /// Packages on the current recursion path
  path: Vec<PackageId>,
  /// Unsettled packages walked during the current top-level call, with the
  /// shallowest path depth they reached back to
  tentative: HashMap<PackageId, usize>,
  /// Ranges as loaded, keyed by (dependent, scope, dependency name)
  original_ranges: HashMap<(PackageId, DependencyScope, String), String>,
  /// (dependent, dependency) pairs rewritten while the dependency was unsettled
  stale: Vec<(PackageId, PackageId)>,
}

/// Settle the release type of `id`, cascading through its local dependencies
///
/// Rewrites the in-memory dependency ranges of every package it settles. Ranges
/// are always computed from the loaded manifest, so walking a package again
/// yields the same result. Ranges that pointed at a cycle member before it
/// settled are rewritten again once it has.
pub fn resolve_release_type(
  packages: &mut [Package],
  id: PackageId,
  policy: &BumpPolicy,
  cascade: &mut Cascade,
) -> Option<ReleaseType> {
  let top_level = cascade.path.is_empty();
  visit(packages, id, policy, cascade);
  if top_level {
    cascade.tentative.clear();
    refresh_stale_ranges(packages, policy, cascade);
  }
  packages[id].next_type
}

/// Walk `id`; returns the shallowest path depth the walk reached back to
fn visit(packages: &mut [Package], id: PackageId, policy: &BumpPolicy, cascade: &mut Cascade) -> usize {
  if cascade.settled.contains(&id) {
    return usize::MAX;
  }
  if let Some(depth) = cascade.path.iter().position(|on_path| *on_path == id) {
    return depth;
  }
  if let Some(low) = cascade.tentative.get(&id) {
    return *low;
  }

  let depth = cascade.path.len();
  let own = *cascade.own.entry(id).or_insert(packages[id].next_type);
  let never_released = packages[id].last_release.is_none();
  let local_deps = packages[id].local_deps.clone();
  cascade.path.push(id);

  let mut low = usize::MAX;
  let mut dependent_type: Option<ReleaseType> = None;
  for dep in local_deps {
    if dep == id {
      continue;
    }
    low = low.min(visit(packages, dep, policy, cascade));
    if !cascade.settled.contains(&dep) {
      cascade.stale.push((id, dep));
    }

    let dep_type = packages[dep].next_type;
    let changed = rewrite_dependency_ranges(packages, id, dep, policy, cascade);
    if (never_released || changed) && dep_type > dependent_type {
      dependent_type = dep_type;
    }
  }
  cascade.path.pop();

  packages[id].next_type = own.or_else(|| {
    dependent_type.map(|dependent_type| match policy.release {
      ReleaseStrategy::Inherit => dependent_type,
      ReleaseStrategy::Patch => ReleaseType::Patch,
      ReleaseStrategy::Minor => ReleaseType::Minor,
      ReleaseStrategy::Major => ReleaseType::Major,
    })
  });

  if low >= depth {
    cascade.settled.insert(id);
  } else {
    cascade.tentative.insert(id, low);
  }
  low
}

/// Point every range `id` declares on `dep` at the version `dep` resolves to
///
/// Returns true when any range differs from the one loaded from disk.
fn rewrite_dependency_ranges(
  packages: &mut [Package],
  id: PackageId,
  dep: PackageId,
  policy: &BumpPolicy,
  cascade: &mut Cascade,
) -> bool {
  let dep_version = match packages[dep].next_type {
    Some(_) => Some(package_next_version(&packages[dep])),
    None => packages[dep].last_release.as_ref().map(|last| last.version.clone()),
  };
  let Some(dep_version) = dep_version else {
    return false;
  };

  let dep_name = packages[dep].name.clone();
  let rendered = dep_version.to_string();
  let mut changed = false;
  for scope in DependencyScope::ALL {
    let Some(current) = packages[id]
      .manifest
      .dependency_range(scope, &dep_name)
      .map(str::to_string)
    else {
      continue;
    };
    let original = cascade
      .original_ranges
      .entry((id, scope, dep_name.clone()))
      .or_insert(current.clone())
      .clone();
    let resolved = resolve_next_version(&original, &rendered, policy.bump, &policy.prefix);
    if resolved != original {
      changed = true;
    }
    if resolved != current {
      tracing::debug!(
        package = %packages[id].name,
        dependency = %dep_name,
        scope = scope.key(),
        from = %current,
        to = %resolved,
        "bumping dependency range"
      );
      packages[id].manifest.set_dependency_range(scope, &dep_name, &resolved);
    }
  }
  changed
}

/// Rewrite ranges that were computed against a dependency before it settled
fn refresh_stale_ranges(packages: &mut [Package], policy: &BumpPolicy, cascade: &mut Cascade) {
  let stale = std::mem::take(&mut cascade.stale);
  for (dependent, dep) in stale {
    if !cascade.settled.contains(&dep) {
      cascade.stale.push((dependent, dep));
    } else if packages[dependent].next_type.is_some() {
      rewrite_dependency_ranges(packages, dependent, dep, policy, cascade);
    }
  }
}

//! Error types for relay with contextual messages and exit codes
//!
//! One enum covers the whole run. Manifest, graph, config and git failures get
//! their own categories so the CLI can print a targeted hint next to the message.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Exit codes for relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
  /// Any unrecovered error
  Failure = 1,
}

impl ExitCode {
  /// Convert to i32 for process exit
  pub fn as_i32(self) -> i32 {
    self as i32
  }
}

/// Main error type for relay
#[derive(Debug)]
pub enum RelayError {
  /// Malformed package manifest
  Schema(SchemaError),

  /// Dependency graph cannot be released as requested
  Graph(GraphError),

  /// Configuration errors
  Config(ConfigError),

  /// Git operation errors
  Git(GitError),

  /// I/O errors
  Io(io::Error),

  /// Generic error with message and optional context
  Message {
    message: String,
    context: Option<String>,
    help: Option<String>,
  },
}

impl RelayError {
  /// Create a simple error message
  pub fn message(msg: impl Into<String>) -> Self {
    RelayError::Message {
      message: msg.into(),
      context: None,
      help: None,
    }
  }

  /// Add context to an existing error
  pub fn context(self, ctx: impl Into<String>) -> Self {
    let ctx_str = ctx.into();
    match self {
      RelayError::Message { message, context, help } => RelayError::Message {
        message,
        context: Some(context.map(|c| format!("{}\n{}", ctx_str, c)).unwrap_or(ctx_str)),
        help,
      },
      RelayError::Io(err) => RelayError::Message {
        message: format!("{}: {}", ctx_str, err),
        context: None,
        help: None,
      },
      _ => self,
    }
  }

  /// Get the appropriate exit code for this error
  pub fn exit_code(&self) -> ExitCode {
    ExitCode::Failure
  }

  /// Get contextual help message for this error
  pub fn help_message(&self) -> Option<String> {
    match self {
      RelayError::Schema(e) => e.help_message(),
      RelayError::Graph(e) => e.help_message(),
      RelayError::Config(e) => e.help_message(),
      RelayError::Git(e) => e.help_message(),
      RelayError::Message { help, .. } => help.clone(),
      RelayError::Io(_) => None,
    }
  }
}

impl fmt::Display for RelayError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RelayError::Schema(e) => write!(f, "{}", e),
      RelayError::Graph(e) => write!(f, "{}", e),
      RelayError::Config(e) => write!(f, "{}", e),
      RelayError::Git(e) => write!(f, "{}", e),
      RelayError::Io(e) => write!(f, "I/O error: {}", e),
      RelayError::Message { message, context, .. } => {
        write!(f, "{}", message)?;
        if let Some(ctx) = context {
          write!(f, "\n{}", ctx)?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for RelayError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      RelayError::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for RelayError {
  fn from(err: io::Error) -> Self {
    RelayError::Io(err)
  }
}

impl From<String> for RelayError {
  fn from(msg: String) -> Self {
    RelayError::message(msg)
  }
}

impl From<&str> for RelayError {
  fn from(msg: &str) -> Self {
    RelayError::message(msg)
  }
}

impl From<SchemaError> for RelayError {
  fn from(err: SchemaError) -> Self {
    RelayError::Schema(err)
  }
}

impl From<GraphError> for RelayError {
  fn from(err: GraphError) -> Self {
    RelayError::Graph(err)
  }
}

impl From<ConfigError> for RelayError {
  fn from(err: ConfigError) -> Self {
    RelayError::Config(err)
  }
}

impl From<GitError> for RelayError {
  fn from(err: GitError) -> Self {
    RelayError::Git(err)
  }
}

impl From<serde_json::Error> for RelayError {
  fn from(err: serde_json::Error) -> Self {
    RelayError::message(format!("JSON error: {}", err))
  }
}

impl From<semver::Error> for RelayError {
  fn from(err: semver::Error) -> Self {
    RelayError::message(format!("Invalid semver version: {}", err))
  }
}

impl From<glob::PatternError> for RelayError {
  fn from(err: glob::PatternError) -> Self {
    RelayError::message(format!("Invalid glob pattern: {}", err))
  }
}

impl From<regex::Error> for RelayError {
  fn from(err: regex::Error) -> Self {
    RelayError::message(format!("Invalid pattern: {}", err))
  }
}

impl From<tokio::task::JoinError> for RelayError {
  fn from(err: tokio::task::JoinError) -> Self {
    RelayError::message(format!("Release task failed: {}", err))
  }
}

impl From<std::string::FromUtf8Error> for RelayError {
  fn from(err: std::string::FromUtf8Error) -> Self {
    RelayError::message(format!("UTF-8 conversion error: {}", err))
  }
}

/// Manifest validation errors
#[derive(Debug)]
pub enum SchemaError {
  /// Manifest file does not exist
  NotFound { path: PathBuf },

  /// Manifest is not valid JSON
  Parse { path: PathBuf, reason: String },

  /// Top-level value is not an object
  NotAnObject { path: PathBuf },

  /// `name` missing, empty or not a string
  MissingName { path: PathBuf },

  /// A dependency scope is present but not an object
  InvalidScope { path: PathBuf, scope: String },
}

impl SchemaError {
  fn help_message(&self) -> Option<String> {
    match self {
      SchemaError::NotFound { .. } => Some("Check the workspaces globs in the root package.json.".to_string()),
      SchemaError::MissingName { .. } => Some("Every workspace package needs a non-empty \"name\" field.".to_string()),
      SchemaError::InvalidScope { scope, .. } => Some(format!(
        "\"{}\" must map package names to version ranges, e.g. {{ \"left-pad\": \"^1.0.0\" }}",
        scope
      )),
      _ => None,
    }
  }
}

impl fmt::Display for SchemaError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SchemaError::NotFound { path } => write!(f, "Package manifest not found: {}", path.display()),
      SchemaError::Parse { path, reason } => {
        write!(f, "Package manifest {} is not valid JSON: {}", path.display(), reason)
      }
      SchemaError::NotAnObject { path } => write!(f, "Package manifest {} must be object", path.display()),
      SchemaError::MissingName { path } => write!(f, "Package name must be non-empty string ({})", path.display()),
      SchemaError::InvalidScope { path, scope } => {
        write!(f, "Package {} must be object ({})", scope, path.display())
      }
    }
  }
}

/// Dependency graph errors
#[derive(Debug)]
pub enum GraphError {
  /// A local dependency has no version to pin at prepare time
  UnreleasedDependency { package: String, dependency: String },

  /// Sequential prepare would wait forever on a dependency cycle
  CycleDeadlock { cycles: Vec<Vec<String>> },
}

impl GraphError {
  fn help_message(&self) -> Option<String> {
    match self {
      GraphError::UnreleasedDependency { dependency, .. } => Some(format!(
        "Release '{}' first, or tag its current version so it counts as released.",
        dependency
      )),
      GraphError::CycleDeadlock { .. } => {
        Some("Break the cycle, or run with --sequential-prepare=false.".to_string())
      }
    }
  }
}

impl fmt::Display for GraphError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphError::UnreleasedDependency { package, dependency } => write!(
        f,
        "Cannot release {} because dependency {} has not been released yet",
        package, dependency
      ),
      GraphError::CycleDeadlock { cycles } => {
        let rendered: Vec<String> = cycles.iter().map(|cycle| cycle.join(" -> ")).collect();
        write!(
          f,
          "There is a cyclic dependency in packages while sequentialPrepare is enabled: {}",
          rendered.join("; ")
        )
      }
    }
  }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
  /// Root manifest has no usable `workspaces` declaration
  NoWorkspaces { root: PathBuf },

  /// Workspace globs matched nothing
  NoPackages { root: PathBuf },

  /// Config file could not be parsed
  Invalid { path: PathBuf, reason: String },
}

impl ConfigError {
  fn help_message(&self) -> Option<String> {
    match self {
      ConfigError::NoWorkspaces { .. } => {
        Some("Add \"workspaces\": [\"packages/*\"] to the root package.json.".to_string())
      }
      ConfigError::NoPackages { .. } => {
        Some("Check the workspaces globs and --ignore-packages patterns.".to_string())
      }
      ConfigError::Invalid { .. } => None,
    }
  }
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::NoWorkspaces { root } => write!(
        f,
        "No workspaces declared in {}",
        root.join("package.json").display()
      ),
      ConfigError::NoPackages { root } => {
        write!(f, "Workspace at {} contains no packages to release", root.display())
      }
      ConfigError::Invalid { path, reason } => write!(f, "Invalid configuration in {}: {}", path.display(), reason),
    }
  }
}

/// Git operation errors
#[derive(Debug)]
pub enum GitError {
  /// Git command failed
  CommandFailed { command: String, stderr: String },

  /// Repository not found
  RepoNotFound { path: PathBuf },
}

impl GitError {
  fn help_message(&self) -> Option<String> {
    match self {
      GitError::RepoNotFound { path } => Some(format!(
        "Initialize the repository first or check the path: {}",
        path.display()
      )),
      _ => None,
    }
  }
}

impl fmt::Display for GitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GitError::CommandFailed { command, stderr } => {
        write!(f, "Git command failed: {}\n{}", command, stderr)
      }
      GitError::RepoNotFound { path } => {
        write!(f, "Git repository not found at: {}", path.display())
      }
    }
  }
}

/// Result type alias for relay
pub type RelayResult<T> = Result<T, RelayError>;

/// Helper trait to add context to Results
pub trait ResultExt<T> {
  /// Add context to an error result
  fn context(self, ctx: impl Into<String>) -> RelayResult<T>;

  /// Add context using a closure (lazy evaluation)
  fn with_context<F>(self, f: F) -> RelayResult<T>
  where
    F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
  E: Into<RelayError>,
{
  fn context(self, ctx: impl Into<String>) -> RelayResult<T> {
    self.map_err(|e| e.into().context(ctx))
  }

  fn with_context<F>(self, f: F) -> RelayResult<T>
  where
    F: FnOnce() -> String,
  {
    self.map_err(|e| e.into().context(f()))
  }
}

/// Pretty-print an error to stderr with help text
pub fn print_error(error: &RelayError) {
  eprintln!("\n❌ {}\n", error);

  if let Some(help) = error.help_message() {
    eprintln!("💡 Help: {}\n", help);
  }
}

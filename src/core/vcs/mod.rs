pub mod system_git;
mod system_git_ops;

pub use system_git::SystemGit;

/// A commit as seen by the release pipeline
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Commit {
  pub hash: String,
  /// First line of the message
  pub subject: String,
  /// Full raw message
  pub message: String,
}

impl Commit {
  pub fn new(hash: impl Into<String>, message: impl Into<String>) -> Self {
    let message = message.into();
    let subject = message.lines().next().unwrap_or("").trim().to_string();
    Self {
      hash: hash.into(),
      subject,
      message,
    }
  }

  /// Message without the subject line
  pub fn body(&self) -> &str {
    match self.message.split_once('\n') {
      Some((_, body)) => body.trim(),
      None => "",
    }
  }
}

//! Core building blocks shared by every relay operation
//!
//! - **config**: layered configuration (rc file, package.json, CLI)
//! - **error**: error types with contextual help messages
//! - **vcs**: git operations abstraction (SystemGit)

pub mod config;
pub mod error;
pub mod vcs;

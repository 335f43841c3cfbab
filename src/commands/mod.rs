//! CLI commands for relay
//!
//! - **release**: discover the workspace and release every package

pub mod release;

pub use release::{ReleaseArgs, run_release};

//! relay: coordinated semantic releases for JavaScript monorepos
//!
//! Releases every workspace package with its own semantic-release style pipeline,
//! while bumping dependents whenever a local dependency changes.

pub mod commands;
pub mod core;
pub mod graph;
pub mod release;
pub mod workspace;

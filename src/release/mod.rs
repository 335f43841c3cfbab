//! Multi-package release coordination
//!
//! # Architecture
//!
//! - **controller**: loads packages, builds the graph, runs one task per package
//! - **orchestrator**: the graph-aware lifecycle hooks of one package
//! - **sync**: named one-shot probes the tasks wait on
//! - **version**: release-type cascade and next-version arithmetic
//! - **pipeline**: traits at the boundary to the single-package pipeline
//! - **engine** / **conventional**: the built-in git pipeline and its plugins
//!
//! # Core Invariants
//!
//! 1. **A package's own changes win.** A cascaded release type never overrides
//!    the type found by the package's own analysis.
//! 2. **Cascades read settled state.** Nobody resolves a cascade until every
//!    package finished its own analysis.
//! 3. **Dependents pin released versions.** A manifest is only written when
//!    every local dependency has a version to pin.

pub mod controller;
pub mod conventional;
pub mod engine;
pub mod orchestrator;
pub mod package;
pub mod pipeline;
pub mod sync;
pub mod version;

pub use controller::MultiReleaseController;
pub use conventional::ConventionalPlugins;
pub use engine::GitReleaseEngine;
pub use package::{Package, PackageId, PackageOutcome, ReleaseResult};
pub use sync::Synchronizer;
pub use version::ReleaseType;

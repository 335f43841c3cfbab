//! Workspace members: discovery and package.json handling

pub mod discovery;
pub mod manifest;

pub use discovery::discover_manifests;
pub use manifest::{DependencyScope, Manifest, ManifestChange};

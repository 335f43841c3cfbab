//! Local dependency graph of the packages in a release run
//!
//! Built on petgraph. Package ids double as node indices.

pub mod dependency_graph;

pub use dependency_graph::DependencyGraph;

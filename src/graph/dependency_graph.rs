//! Local dependency graph over the packages of one run
//!
//! ## Graph Structure
//!
//! - **Directed Graph**: `A → B` means "A depends on B"
//! - **Nodes**: package ids, in load order
//! - **Edges**: declared dependencies that resolve to another package of the run
//! - **Index**: package name → node index

use crate::release::package::{Package, PackageId};
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Dependency graph of the packages being released
pub struct DependencyGraph {
  graph: DiGraph<String, ()>,
  /// Node index `i` is package id `i`
  nodes: Vec<NodeIndex>,
  local_deps: Vec<Vec<PackageId>>,
}

impl DependencyGraph {
  /// Resolve every package's declared dependencies into `local_deps`
  ///
  /// Names that match no package of the run are external and dropped. A package
  /// naming itself is ignored.
  pub fn build(packages: &mut [Package]) -> Self {
    let mut graph = DiGraph::new();
    let mut name_to_node = HashMap::new();
    let nodes: Vec<NodeIndex> = packages
      .iter()
      .map(|package| {
        let node = graph.add_node(package.name.clone());
        name_to_node.entry(package.name.clone()).or_insert(node);
        node
      })
      .collect();

    let mut local_deps = Vec::with_capacity(packages.len());
    for package in packages.iter_mut() {
      let mut seen = HashSet::new();
      package.local_deps = package
        .declared_deps
        .iter()
        .filter_map(|name| name_to_node.get(name))
        .map(|node| node.index())
        .filter(|dep| *dep != package.id && seen.insert(*dep))
        .collect();

      local_deps.push(package.local_deps.clone());
      for dep in &package.local_deps {
        graph.add_edge(nodes[package.id], nodes[*dep], ());
      }
      tracing::debug!(
        package = %package.name,
        local_deps = package.local_deps.len(),
        "resolved local dependencies"
      );
    }

    Self {
      graph,
      nodes,
      local_deps,
    }
  }

  pub fn package_count(&self) -> usize {
    self.nodes.len()
  }

  /// `local_deps` of every package, indexed by package id
  pub fn local_deps(&self) -> Vec<Vec<PackageId>> {
    self.local_deps.clone()
  }

  pub fn is_cyclic(&self) -> bool {
    algo::is_cyclic_directed(&self.graph)
  }

  /// Does `id` reach itself through its local dependencies?
  pub fn in_cycle(&self, id: PackageId) -> bool {
    let Some(start) = self.nodes.get(id).copied() else {
      return false;
    };
    let mut visited = HashSet::new();
    let mut stack: Vec<NodeIndex> = self.graph.neighbors(start).collect();
    while let Some(node) = stack.pop() {
      if node == start {
        return true;
      }
      if visited.insert(node) {
        stack.extend(self.graph.neighbors(node));
      }
    }
    false
  }

  /// Dependency cycles as package name lists, using Tarjan's SCC algorithm
  pub fn cycles(&self) -> Vec<Vec<String>> {
    algo::tarjan_scc(&self.graph)
      .into_iter()
      .filter(|component| component.len() > 1 || self.graph.contains_edge(component[0], component[0]))
      .map(|mut component| {
        component.sort();
        component.into_iter().map(|node| self.graph[node].clone()).collect()
      })
      .collect()
  }

  /// Package names with dependencies first
  ///
  /// Cyclic graphs have no such order; load order is returned instead.
  pub fn topological_order(&self) -> Vec<String> {
    match algo::toposort(&self.graph, None) {
      Ok(order) => order.into_iter().rev().map(|node| self.graph[node].clone()).collect(),
      Err(cycle) => {
        tracing::debug!(package = %self.graph[cycle.node_id()], "dependency cycle, keeping load order");
        self.nodes.iter().map(|node| self.graph[*node].clone()).collect()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::workspace::Manifest;
  use std::path::PathBuf;

  fn package(id: PackageId, name: &str, deps: &[&str]) -> Package {
    let deps: Vec<String> = deps.iter().map(|d| format!(r#""{}": "1.0.0""#, d)).collect();
    let json = format!(r#"{{ "name": "{}", "dependencies": {{ {} }} }}"#, name, deps.join(", "));
    let path = PathBuf::from(format!("/ws/{}/package.json", name));
    Package::new(id, Manifest::parse(&path, &json).unwrap())
  }

  #[test]
  fn test_resolves_local_deps_and_drops_external() {
    let mut packages = vec![
      package(0, "a", &["b", "left-pad", "b"]),
      package(1, "b", &["c"]),
      package(2, "c", &[]),
    ];
    let graph = DependencyGraph::build(&mut packages);
    assert_eq!(packages[0].local_deps, vec![1]);
    assert_eq!(packages[1].local_deps, vec![2]);
    assert!(packages[2].local_deps.is_empty());
    assert!(!graph.is_cyclic());
    assert!(graph.cycles().is_empty());
    assert_eq!(graph.topological_order(), vec!["c", "b", "a"]);
  }

  #[test]
  fn test_detects_cycles() {
    let mut packages = vec![
      package(0, "d", &["e"]),
      package(1, "e", &["d"]),
      package(2, "f", &["d"]),
    ];
    let graph = DependencyGraph::build(&mut packages);
    assert!(graph.is_cyclic());
    assert!(graph.in_cycle(0));
    assert!(graph.in_cycle(1));
    assert!(!graph.in_cycle(2));
    assert_eq!(graph.cycles(), vec![vec!["d".to_string(), "e".to_string()]]);
    assert_eq!(graph.topological_order().len(), 3);
  }

  #[test]
  fn test_self_dependency_ignored() {
    let mut packages = vec![package(0, "solo", &["solo"])];
    let graph = DependencyGraph::build(&mut packages);
    assert!(packages[0].local_deps.is_empty());
    assert!(!graph.is_cyclic());
    assert_eq!(graph.local_deps(), vec![Vec::<PackageId>::new()]);
  }
}

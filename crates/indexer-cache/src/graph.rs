//! Key dependency graph.
//!
//! `forward[k]` holds the keys `k` depends on; `reverse[d]` holds the keys
//! that depend on `d`. Both maps are kept symmetric: every mutation updates
//! both sides, and empty sets are dropped.

use std::collections::{HashMap, HashSet};

/// Symmetric dependency edges between cache keys.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    forward: HashMap<String, HashSet<String>>,
    reverse: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dependencies of `key`.
    pub fn set_dependencies(&mut self, key: &str, deps: &[String]) {
        self.clear_forward(key);
        let deps: HashSet<String> = deps
            .iter()
            .filter(|d| d.as_str() != key)
            .cloned()
            .collect();
        if deps.is_empty() {
            return;
        }
        for dep in &deps {
            self.reverse
                .entry(dep.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.forward.insert(key.to_string(), deps);
    }

    /// Keys that `key` depends on.
    pub fn dependencies(&self, key: &str) -> Vec<String> {
        self.forward
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys that depend directly on `key`.
    pub fn dependents(&self, key: &str) -> Vec<String> {
        self.reverse
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every edge touching `key`.
    pub fn remove_node(&mut self, key: &str) {
        self.clear_forward(key);
        if let Some(dependents) = self.reverse.remove(key) {
            for dependent in dependents {
                if let Some(deps) = self.forward.get_mut(&dependent) {
                    deps.remove(key);
                    if deps.is_empty() {
                        self.forward.remove(&dependent);
                    }
                }
            }
        }
    }

    /// Collect `seeds` plus every transitive dependent within `max_depth` hops.
    ///
    /// Walks the reverse edges breadth-first with an explicit frontier.
    pub fn collect_dependents(&self, seeds: &[String], max_depth: usize) -> HashSet<String> {
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut frontier: Vec<String> = seeds.to_vec();

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for key in &frontier {
                if let Some(dependents) = self.reverse.get(key) {
                    for dependent in dependents {
                        if visited.insert(dependent.clone()) {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        visited
    }

    /// Every key that appears as a dependency target.
    pub fn dependency_targets(&self) -> impl Iterator<Item = &String> {
        self.reverse.keys()
    }

    /// Number of forward edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(HashSet::len).sum()
    }

    /// Whether the forward and reverse maps mirror each other.
    pub fn is_symmetric(&self) -> bool {
        let forward_ok = self.forward.iter().all(|(k, deps)| {
            deps.iter()
                .all(|d| self.reverse.get(d).is_some_and(|r| r.contains(k)))
        });
        let reverse_ok = self.reverse.iter().all(|(d, dependents)| {
            dependents
                .iter()
                .all(|k| self.forward.get(k).is_some_and(|f| f.contains(d)))
        });
        forward_ok && reverse_ok
    }

    /// Drop all edges.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    fn clear_forward(&mut self, key: &str) {
        if let Some(old) = self.forward.remove(key) {
            for dep in old {
                if let Some(dependents) = self.reverse.get_mut(&dep) {
                    dependents.remove(key);
                    if dependents.is_empty() {
                        self.reverse.remove(&dep);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_edges_are_symmetric() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("k1", &deps(&["a", "b"]));
        graph.set_dependencies("k2", &deps(&["a"]));

        assert_eq!(graph.edge_count(), 3);
        let mut dependents = graph.dependents("a");
        dependents.sort();
        assert_eq!(dependents, vec!["k1", "k2"]);
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_replacing_dependencies_prunes_old_edges() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("k1", &deps(&["a"]));
        graph.set_dependencies("k1", &deps(&["b"]));

        assert!(graph.dependents("a").is_empty());
        assert_eq!(graph.dependents("b"), vec!["k1"]);
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_remove_node_prunes_both_directions() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("k1", &deps(&["a"]));
        graph.set_dependencies("a", &deps(&["root"]));

        graph.remove_node("a");
        assert!(graph.dependencies("k1").is_empty());
        assert!(graph.dependents("root").is_empty());
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_cascade_respects_depth() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("l1", &deps(&["root"]));
        graph.set_dependencies("l2", &deps(&["l1"]));
        graph.set_dependencies("l3", &deps(&["l2"]));

        let seeds = deps(&["root"]);
        assert_eq!(graph.collect_dependents(&seeds, 0).len(), 1);
        assert_eq!(graph.collect_dependents(&seeds, 1).len(), 2);
        let all = graph.collect_dependents(&seeds, 5);
        assert_eq!(all.len(), 4);
        assert!(all.contains("l3"));
    }

    #[test]
    fn test_cascade_handles_cycles() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("a", &deps(&["b"]));
        graph.set_dependencies("b", &deps(&["a"]));

        let collected = graph.collect_dependents(&deps(&["a"]), 10);
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn test_self_dependency_ignored() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies("a", &deps(&["a"]));
        assert_eq!(graph.edge_count(), 0);
    }
}

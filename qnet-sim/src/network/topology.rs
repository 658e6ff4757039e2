//! Reachability graphs, routing and topology generation.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// Directed reachability graph over host ids. An edge `a -> b` means `a` can
/// reach `b` in one hop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Graph {
    adjacency: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        self.adjacency.entry(id.to_owned()).or_default();
    }

    pub fn remove_node(&mut self, id: &str) {
        self.adjacency.remove(id);
        for targets in self.adjacency.values_mut() {
            targets.remove(id);
        }
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(to);
        self.adjacency
            .entry(from.to_owned())
            .or_default()
            .insert(to.to_owned());
    }

    pub fn remove_edge(&mut self, from: &str, to: &str) {
        if let Some(targets) = self.adjacency.get_mut(from) {
            targets.remove(to);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adjacency.contains_key(id)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.adjacency
            .get(from)
            .is_some_and(|targets| targets.contains(to))
    }

    pub fn neighbors(&self, id: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(id)
            .into_iter()
            .flat_map(|targets| targets.iter().map(String::as_str))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum()
    }

    /// Breadth-first shortest path, both endpoints included. Ties resolve to
    /// the lexicographically smallest neighbor, so routes are deterministic.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_owned()]);
        }
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for next in self.neighbors(current) {
                if next == from || parents.contains_key(next) {
                    continue;
                }
                parents.insert(next, current);
                if next == to {
                    let mut path = vec![to.to_owned()];
                    let mut cursor = to;
                    while let Some(&parent) = parents.get(cursor) {
                        path.push(parent.to_owned());
                        cursor = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

/// Pluggable routing function: `(graph, source, destination) -> route`.
pub type RouteFn = Arc<dyn Fn(&Graph, &str, &str) -> Option<Vec<String>> + Send + Sync>;

pub fn shortest_path_routing() -> RouteFn {
    Arc::new(|graph: &Graph, from: &str, to: &str| graph.shortest_path(from, to))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyShape {
    Mesh,
    /// First host is the hub.
    Star,
    Ring,
    Linear,
    /// Binary tree rooted at the first host.
    Tree,
}

impl TopologyShape {
    /// Undirected links between host indices for `count` hosts.
    pub fn links(&self, count: usize) -> Vec<(usize, usize)> {
        match self {
            TopologyShape::Mesh => (0..count)
                .flat_map(|a| (a + 1..count).map(move |b| (a, b)))
                .collect(),
            TopologyShape::Star => (1..count).map(|leaf| (0, leaf)).collect(),
            TopologyShape::Linear => (1..count).map(|b| (b - 1, b)).collect(),
            TopologyShape::Ring => {
                let mut links: Vec<_> = (1..count).map(|b| (b - 1, b)).collect();
                if count > 2 {
                    links.push((count - 1, 0));
                }
                links
            }
            TopologyShape::Tree => (1..count).map(|child| ((child - 1) / 2, child)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn linear(ids: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for pair in ids.windows(2) {
            graph.add_edge(pair[0], pair[1]);
            graph.add_edge(pair[1], pair[0]);
        }
        graph
    }

    #[test]
    fn shortest_path_over_chain() {
        let graph = linear(&["a", "b", "c", "d"]);
        assert_eq!(
            graph.shortest_path("a", "d").unwrap(),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(graph.shortest_path("c", "a").unwrap(), vec!["c", "b", "a"]);
        assert_eq!(graph.shortest_path("a", "a").unwrap(), vec!["a"]);
    }

    #[test]
    fn respects_edge_direction() {
        let mut graph = Graph::new();
        graph.add_edge("a", "b");
        assert!(graph.shortest_path("a", "b").is_some());
        assert!(graph.shortest_path("b", "a").is_none());
        assert!(graph.shortest_path("a", "zed").is_none());
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut graph = linear(&["a", "b", "c"]);
        graph.remove_node("b");
        assert!(!graph.contains("b"));
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.shortest_path("a", "c").is_none());
    }

    #[test]
    fn shapes_produce_expected_links() {
        assert_eq!(TopologyShape::Mesh.links(4).len(), 6);
        assert_eq!(TopologyShape::Star.links(4), vec![(0, 1), (0, 2), (0, 3)]);
        assert_eq!(TopologyShape::Linear.links(3), vec![(0, 1), (1, 2)]);
        assert_eq!(
            TopologyShape::Ring.links(4),
            vec![(0, 1), (1, 2), (2, 3), (3, 0)]
        );
        assert_eq!(TopologyShape::Ring.links(2), vec![(0, 1)]);
        assert_eq!(
            TopologyShape::Tree.links(5),
            vec![(0, 1), (0, 2), (1, 3), (1, 4)]
        );
    }
}

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// A directed graph over vertex IDs.
///
/// Edges point from child to parent: an edge `a -> b` records that `a` is a
/// member of `b`. The graph makes no acyclicity guarantee; reachability
/// expansion carries a visited set and terminates on cyclic input.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize + Eq + Hash",
    deserialize = "T: Deserialize<'de> + Eq + Hash"
))]
pub struct Graph<T> {
    edges: HashMap<T, HashSet<T>>,
}

impl<T: Eq + Hash> PartialEq for Graph<T> {
    fn eq(&self, other: &Self) -> bool {
        self.edges == other.edges
    }
}

impl<T: Eq + Hash> Eq for Graph<T> {}

impl<T> Graph<T>
where
    T: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            edges: HashMap::new(),
        }
    }

    /// Inserts a vertex with no edges. A no-op if the vertex exists.
    pub fn add_vertex(&mut self, vertex: T) {
        let _ = self.edges.entry(vertex).or_default();
    }

    pub fn has_vertex(&self, vertex: T) -> bool {
        self.edges.contains_key(&vertex)
    }

    /// Adds a directed edge. Both endpoints are inserted if absent.
    pub fn add_edge(&mut self, from: T, to: T) {
        let _ = self.edges.entry(from).or_default().insert(to);
        self.add_vertex(to);
    }

    /// Removes a directed edge. The endpoints remain as vertices.
    pub fn delete_edge(&mut self, from: T, to: T) {
        if let Some(targets) = self.edges.get_mut(&from) {
            let _ = targets.remove(&to);
        }
    }

    /// Returns every vertex reachable from any seed by following edges
    /// forward, the seeds themselves included.
    pub fn expand_from_set(&self, seeds: &HashSet<T>) -> HashSet<T> {
        let mut visited: HashSet<T> = seeds.iter().copied().collect();
        let mut queue: VecDeque<T> = seeds.iter().copied().collect();

        while let Some(vertex) = queue.pop_front() {
            if let Some(targets) = self.edges.get(&vertex) {
                for &target in targets {
                    if visited.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }

        visited
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

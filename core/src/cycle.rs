//! Incremental cycle detection over a "who includes whom" graph.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;

use crate::util::lock;

/// A cycle found while adding an edge, starting and ending at the same node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle<N> {
    nodes: Vec<N>,
}

impl<N> Cycle<N> {
    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    /// Renders the cycle as `A -> B -> A`.
    pub fn render(&self, display: impl Fn(&N) -> String) -> String {
        self.nodes
            .iter()
            .map(display)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

struct Graph<N> {
    /// node -> nodes that have an edge to it
    referrers: HashMap<N, Vec<N>>,
    acyclic: HashSet<N>,
}

/// Records edges one at a time and refuses the edge that would close a
/// cycle.
///
/// Nodes registered with [`add_acyclic_node`](Self::add_acyclic_node) are
/// known not to take part in cycles; searches stop there instead of walking
/// their referrers.
pub struct CycleDetector<N> {
    graph: Mutex<Graph<N>>,
}

impl<N> Default for CycleDetector<N>
where
    N: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<N> CycleDetector<N>
where
    N: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(Graph {
                referrers: HashMap::new(),
                acyclic: HashSet::new(),
            }),
        }
    }

    /// Adds `from -> to` unless it closes a cycle.
    ///
    /// Returns the cycle `[from, to, ..., from]` when `to` already reaches
    /// `from`; the edge is not recorded in that case. A self edge returns
    /// `[from, from]`.
    pub fn add_edge(&self, from: N, to: N) -> Option<Cycle<N>> {
        if from == to {
            return Some(Cycle {
                nodes: vec![from.clone(), from],
            });
        }

        let mut graph = lock(&self.graph);
        if let Some(path) = find_referrer_path(&graph, &from, &to) {
            // path runs from `from` back to `to` along referrer edges
            let mut nodes = Vec::with_capacity(path.len() + 1);
            nodes.push(from);
            nodes.extend(path.into_iter().rev());
            return Some(Cycle { nodes });
        }

        let referrers = graph.referrers.entry(to).or_default();
        if !referrers.contains(&from) {
            referrers.push(from);
        }
        None
    }

    pub fn add_acyclic_node(&self, node: N) {
        lock(&self.graph).acyclic.insert(node);
    }

    pub fn contains_edge(&self, from: &N, to: &N) -> bool {
        lock(&self.graph)
            .referrers
            .get(to)
            .map(|r| r.contains(from))
            .unwrap_or(false)
    }

    pub fn referrers(&self, node: &N) -> Vec<N> {
        lock(&self.graph)
            .referrers
            .get(node)
            .cloned()
            .unwrap_or_default()
    }
}

/// Depth-first walk over referrer edges from `start`, looking for `target`.
fn find_referrer_path<N>(graph: &Graph<N>, start: &N, target: &N) -> Option<Vec<N>>
where
    N: Clone + Eq + Hash,
{
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    if walk(graph, start, target, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn walk<N>(
    graph: &Graph<N>,
    node: &N,
    target: &N,
    visited: &mut HashSet<N>,
    path: &mut Vec<N>,
) -> bool
where
    N: Clone + Eq + Hash,
{
    path.push(node.clone());
    if node == target {
        return true;
    }
    if visited.insert(node.clone()) && !graph.acyclic.contains(node) {
        if let Some(referrers) = graph.referrers.get(node) {
            for referrer in referrers {
                if walk(graph, referrer, target, visited, path) {
                    return true;
                }
            }
        }
    }
    path.pop();
    false
}

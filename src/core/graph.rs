//! Generic dependency graph for execution ordering.
//!
//! `DependencyGraph` provides cycle detection and deterministic topological
//! ordering over any identifier type. Epic-level and task-level scheduling
//! both run through this one structure.

use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

/// A directed graph of dependency edges over identifiers.
///
/// Nodes are identifiers, and an edge `from -> to` records that `to`
/// depends on `from`. The underlying storage is petgraph's DiGraph with
/// an index map for id lookups.
pub struct DependencyGraph<I> {
    graph: DiGraph<I, ()>,
    index: HashMap<I, NodeIndex>,
}

impl<I> DependencyGraph<I>
where
    I: Clone + Eq + Hash + Ord + Display,
{
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    ///
    /// Adding the same identifier twice is a no-op returning the existing
    /// node.
    pub fn add_node(&mut self, id: I) -> NodeIndex {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id, idx);
        idx
    }

    /// Add a dependency edge: `to` depends on `from`.
    ///
    /// Endpoints not yet in the graph are registered automatically.
    /// Duplicate edges are collapsed.
    pub fn add_edge(&mut self, from: I, to: I) {
        let from_idx = self.add_node(from);
        let to_idx = self.add_node(to);
        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Check if the graph contains an identifier.
    pub fn contains(&self, id: &I) -> bool {
        self.index.contains_key(id)
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Direct dependencies of an identifier (what it waits on).
    pub fn dependencies_of(&self, id: &I) -> Vec<I> {
        match self.index.get(id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Deterministic topological order.
    ///
    /// Kahn's algorithm, always selecting the smallest identifier among
    /// the ready set so the same graph yields the same order on every
    /// build. A cycle is a hard error naming every participating node.
    pub fn topological_order(&self) -> Result<Vec<I>> {
        self.topological_order_by_key(|id| id.clone())
    }

    /// Topological order with ties broken by a caller-supplied key.
    ///
    /// Used for task ordering, where ties break by (priority, id) rather
    /// than by identifier alone.
    pub fn topological_order_by_key<K, F>(&self, key: F) -> Result<Vec<I>>
    where
        K: Ord,
        F: Fn(&I) -> K,
    {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph
                        .neighbors_directed(idx, Direction::Incoming)
                        .count(),
                )
            })
            .collect();

        // Ready set ordered by (key, id) so ties are deterministic even
        // when the caller's key collides.
        let mut ready: BTreeSet<(K, I)> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| {
                let id = &self.graph[idx];
                (key(id), id.clone())
            })
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some((_, id)) = ready.pop_first() {
            let idx = self.index[&id];
            order.push(id);

            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        let succ_id = &self.graph[succ];
                        ready.insert((key(succ_id), succ_id.clone()));
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let ordered: HashSet<&I> = order.iter().collect();
            return Err(Error::PlanningCycle {
                nodes: self.cycle_members(&ordered),
            });
        }

        Ok(order)
    }

    /// Longest-path dependency level for every node.
    ///
    /// A node with no dependencies is level 0; otherwise its level is
    /// 1 + the maximum level of its direct dependencies. Nodes at the
    /// same level with no edge between them may execute together, and
    /// chains A -> B -> C land on levels 0, 1, 2 rather than collapsing
    /// onto one level.
    pub fn dependency_levels(&self) -> Result<BTreeMap<I, usize>> {
        let order = self.topological_order()?;
        let mut levels: BTreeMap<I, usize> = BTreeMap::new();
        for id in order {
            let level = self
                .dependencies_of(&id)
                .iter()
                .map(|dep| levels.get(dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            levels.insert(id, level);
        }
        Ok(levels)
    }

    /// Reduce the unordered remainder of a failed sort to the nodes that
    /// actually sit on a cycle.
    ///
    /// The leftover set after Kahn's algorithm also contains nodes that
    /// merely depend on a cycle; stripping nodes with no remaining
    /// successors until a fixpoint leaves exactly the cycle members.
    fn cycle_members(&self, ordered: &HashSet<&I>) -> Vec<String> {
        let mut remaining: HashSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| !ordered.contains(&self.graph[*idx]))
            .collect();

        loop {
            let removable: Vec<NodeIndex> = remaining
                .iter()
                .filter(|&&idx| {
                    !self
                        .graph
                        .neighbors_directed(idx, Direction::Outgoing)
                        .any(|succ| remaining.contains(&succ))
                })
                .copied()
                .collect();
            if removable.is_empty() {
                break;
            }
            for idx in removable {
                remaining.remove(&idx);
            }
        }

        let mut members: Vec<String> = remaining
            .into_iter()
            .map(|idx| self.graph[idx].to_string())
            .collect();
        members.sort();
        members
    }
}

impl<I> Default for DependencyGraph<I>
where
    I: Clone + Eq + Hash + Ord + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I> std::fmt::Debug for DependencyGraph<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

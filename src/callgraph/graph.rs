//! Call graph storage.
//!
//! Edges are kept as a list ordered by call-site id, which is what gets
//! serialized and compared. Resolved edges are mirrored into a petgraph
//! `DiGraph` whose node indices equal callable indices, for traversal.

use std::collections::BTreeSet;
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::Direction;
use serde::Serialize;

use crate::model::{CallSiteId, CallableId};

/// Where a call site points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "status", content = "callable", rename_all = "snake_case")]
pub enum CallTarget {
    Resolved(CallableId),
    /// No candidate callable could be determined.
    Unresolved,
}

impl CallTarget {
    pub fn callable(&self) -> Option<CallableId> {
        match self {
            CallTarget::Resolved(id) => Some(*id),
            CallTarget::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CallTarget::Resolved(_))
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Resolved(id) => id.fmt(f),
            CallTarget::Unresolved => write!(f, "UNRESOLVED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Static,
    VirtualDispatch,
    Constructor,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Static => "static",
            EdgeKind::VirtualDispatch => "virtual-dispatch",
            EdgeKind::Constructor => "constructor",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One call site's edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallEdge {
    pub call_site: CallSiteId,
    pub source: CallableId,
    pub target: CallTarget,
    pub kind: EdgeKind,
}

/// Counters reported after resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Sites where more than one candidate survived to the tie-break.
    pub ambiguous: usize,
}

/// Directed multigraph over the callables of one generation.
#[derive(Debug, Clone, Serialize)]
pub struct CallGraph {
    edges: Vec<CallEdge>,
    stats: ResolutionStats,
    #[serde(skip)]
    graph: DiGraph<CallableId, CallSiteId>,
}

impl CallGraph {
    /// Build from edges and the number of callables in the generation.
    ///
    /// Edges must be ordered by call site and reference callables below
    /// `callable_count`.
    pub(crate) fn new(callable_count: usize, edges: Vec<CallEdge>, stats: ResolutionStats) -> Self {
        let mut graph = DiGraph::with_capacity(callable_count, edges.len());
        for i in 0..callable_count {
            graph.add_node(CallableId(i as u32));
        }
        for edge in &edges {
            if let CallTarget::Resolved(target) = edge.target {
                graph.add_edge(node(edge.source), node(target), edge.call_site);
            }
        }
        Self { edges, stats, graph }
    }

    /// All edges, one per call site, ordered by call site.
    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    pub fn stats(&self) -> ResolutionStats {
        self.stats
    }

    /// The edge recorded for a call site.
    pub fn edge_for(&self, site: CallSiteId) -> Option<&CallEdge> {
        self.edges
            .binary_search_by_key(&site, |e| e.call_site)
            .ok()
            .map(|i| &self.edges[i])
    }

    /// Outgoing edges of a callable, resolved or not.
    pub fn edges_from(&self, source: CallableId) -> impl Iterator<Item = &CallEdge> + '_ {
        self.edges.iter().filter(move |e| e.source == source)
    }

    /// Edges resolved to `target`.
    pub fn edges_to(&self, target: CallableId) -> impl Iterator<Item = &CallEdge> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.target == CallTarget::Resolved(target))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &CallEdge> + '_ {
        self.edges.iter().filter(|e| !e.target.is_resolved())
    }

    /// Distinct callables with a resolved edge into `target`, ascending.
    pub fn callers_of(&self, target: CallableId) -> Vec<CallableId> {
        self.neighbors(target, Direction::Incoming)
    }

    /// Distinct callables `source` has a resolved edge to, ascending.
    pub fn callees_of(&self, source: CallableId) -> Vec<CallableId> {
        self.neighbors(source, Direction::Outgoing)
    }

    fn neighbors(&self, id: CallableId, direction: Direction) -> Vec<CallableId> {
        if id.index() >= self.graph.node_count() {
            return Vec::new();
        }
        let set: BTreeSet<CallableId> = self
            .graph
            .edges_directed(node(id), direction)
            .map(|e| match direction {
                Direction::Incoming => e.source(),
                Direction::Outgoing => e.target(),
            })
            .filter_map(|n| self.graph.node_weight(n).copied())
            .collect();
        set.into_iter().collect()
    }

    /// Callables transitively reachable from `start`, excluding it unless
    /// it lies on a cycle.
    pub fn reachable_from(&self, start: CallableId) -> Vec<CallableId> {
        if start.index() >= self.graph.node_count() {
            return Vec::new();
        }
        let mut reached = BTreeSet::new();
        let mut bfs = Bfs::new(&self.graph, node(start));
        while let Some(n) = bfs.next(&self.graph) {
            if n != node(start) {
                reached.insert(CallableId(n.index() as u32));
            }
        }
        if self.callers_of(start).into_iter().any(|c| c == start || reached.contains(&c)) {
            reached.insert(start);
        }
        reached.into_iter().collect()
    }

    /// Number of resolved edges.
    pub fn resolved_edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl PartialEq for CallGraph {
    fn eq(&self, other: &Self) -> bool {
        self.edges == other.edges && self.stats == other.stats
    }
}

impl Eq for CallGraph {}

fn node(id: CallableId) -> NodeIndex {
    NodeIndex::new(id.index())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(site: u32, source: u32, target: Option<u32>) -> CallEdge {
        CallEdge {
            call_site: CallSiteId(site),
            source: CallableId(source),
            target: target.map_or(CallTarget::Unresolved, |t| CallTarget::Resolved(CallableId(t))),
            kind: EdgeKind::Static,
        }
    }

    fn sample() -> CallGraph {
        // 0 -> 1 (twice), 1 -> 2, 2 -> 1, 3 -> ?
        CallGraph::new(
            4,
            vec![
                edge(0, 0, Some(1)),
                edge(1, 0, Some(1)),
                edge(2, 1, Some(2)),
                edge(3, 2, Some(1)),
                edge(4, 3, None),
            ],
            ResolutionStats::default(),
        )
    }

    #[test]
    fn test_callers_and_callees_are_distinct() {
        let graph = sample();
        assert_eq!(graph.callees_of(CallableId(0)), vec![CallableId(1)]);
        assert_eq!(graph.callers_of(CallableId(1)), vec![CallableId(0), CallableId(2)]);
        assert!(graph.callees_of(CallableId(3)).is_empty());
        assert!(graph.callers_of(CallableId(99)).is_empty());
        assert_eq!(graph.resolved_edge_count(), 4);
        assert_eq!(graph.unresolved().count(), 1);
    }

    #[test]
    fn test_reachable_from() {
        let graph = sample();
        assert_eq!(
            graph.reachable_from(CallableId(0)),
            vec![CallableId(1), CallableId(2)]
        );
        // 1 sits on the 1 -> 2 -> 1 cycle.
        assert_eq!(
            graph.reachable_from(CallableId(1)),
            vec![CallableId(1), CallableId(2)]
        );
    }

    #[test]
    fn test_edge_for_site() {
        let graph = sample();
        assert_eq!(graph.edge_for(CallSiteId(4)).map(|e| e.target), Some(CallTarget::Unresolved));
        assert!(graph.edge_for(CallSiteId(5)).is_none());
    }
}

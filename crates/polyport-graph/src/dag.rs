//! Dependency Graph Builder
//!
//! Builds a deterministic translation order from a dependency relation:
//! 1. Strongly-connected components are found with Tarjan's algorithm
//! 2. The condensation is ordered with Kahn's algorithm, ties broken by the
//!    lexically smallest member of each component
//! 3. Members of a multi-file component are ordered lexically and flagged
//!    `circular`
//!
//! Every dependency outside a file's own component is scheduled before it.

use crate::error::GraphError;
use crate::types::{DependencyEdge, DependencyRelation, FileId};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A strongly-connected component of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Members, lexically ordered
    pub members: Vec<FileId>,
    /// Whether the members form a dependency cycle
    pub circular: bool,
    /// Topological layer (0 = depends on nothing outside itself)
    pub layer: usize,
}

/// Read-only, cycle-aware dependency graph over project files
///
/// Edges point from a dependency to its dependent. Construction is the only
/// mutation; afterwards the graph is shared read-only by the scheduler.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<FileId, ()>,
    index: BTreeMap<FileId, NodeIndex>,
    components: Vec<Component>,
    component_of: BTreeMap<FileId, usize>,
    order: Vec<FileId>,
    prerequisites: BTreeMap<FileId, Vec<FileId>>,
}

impl DependencyGraph {
    /// Build the graph for `files` from `relation`
    ///
    /// Self-edges are dropped. Cycles are broken deterministically rather than
    /// rejected.
    ///
    /// # Errors
    /// - `GraphError::UnknownFile` if the relation mentions a file outside
    ///   `files`
    pub fn build(
        files: impl IntoIterator<Item = FileId>,
        relation: &DependencyRelation,
    ) -> Result<Self, GraphError> {
        let known: BTreeSet<FileId> = files.into_iter().collect();

        let mut graph = DiGraph::with_capacity(known.len(), 0);
        let mut index = BTreeMap::new();
        for file in &known {
            index.insert(file.clone(), graph.add_node(file.clone()));
        }

        for (file, deps) in relation {
            let Some(&to) = index.get(file) else {
                return Err(GraphError::UnknownFile {
                    file: file.clone(),
                    referenced_by: None,
                });
            };
            for dep in deps {
                let Some(&from) = index.get(dep) else {
                    return Err(GraphError::UnknownFile {
                        file: dep.clone(),
                        referenced_by: Some(file.clone()),
                    });
                };
                if from == to {
                    tracing::warn!(file = %file, "dropping self-dependency");
                    continue;
                }
                graph.update_edge(from, to, ());
            }
        }

        let (components, component_of) = Self::condense(&graph);
        let order: Vec<FileId> = components
            .iter()
            .flat_map(|c| c.members.iter().cloned())
            .collect();

        let mut built = Self {
            graph,
            index,
            components,
            component_of,
            order,
            prerequisites: BTreeMap::new(),
        };
        built.prerequisites = built.compute_prerequisites();

        for cycle in built.cycles() {
            tracing::warn!(members = ?cycle, "dependency cycle detected, ordering lexically");
        }
        tracing::debug!(
            files = built.len(),
            edges = built.edge_count(),
            layers = built.layer_count(),
            "dependency graph built"
        );

        Ok(built)
    }

    /// Find SCCs and order them topologically
    fn condense(graph: &DiGraph<FileId, ()>) -> (Vec<Component>, BTreeMap<FileId, usize>) {
        let sccs = tarjan_scc(graph);

        // Raw component id per node
        let mut raw_of = vec![0usize; graph.node_count()];
        let mut raw_members: Vec<Vec<FileId>> = Vec::with_capacity(sccs.len());
        for (cid, scc) in sccs.iter().enumerate() {
            let mut members: Vec<FileId> = scc.iter().map(|n| graph[*n].clone()).collect();
            members.sort();
            for n in scc {
                raw_of[n.index()] = cid;
            }
            raw_members.push(members);
        }

        // Condensed edges and in-degrees
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); raw_members.len()];
        let mut in_degree = vec![0usize; raw_members.len()];
        for edge in graph.raw_edges() {
            let from = raw_of[edge.source().index()];
            let to = raw_of[edge.target().index()];
            if from != to && successors[from].insert(to) {
                in_degree[to] += 1;
            }
        }

        // Kahn with a lexically ordered ready set
        let mut ready: BTreeSet<(FileId, usize)> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(cid, _)| (raw_members[cid][0].clone(), cid))
            .collect();
        let mut layer = vec![0usize; raw_members.len()];
        let mut components = Vec::with_capacity(raw_members.len());
        let mut component_of = BTreeMap::new();

        while let Some((_, cid)) = ready.pop_first() {
            let position = components.len();
            for member in &raw_members[cid] {
                component_of.insert(member.clone(), position);
            }
            components.push(Component {
                members: raw_members[cid].clone(),
                circular: raw_members[cid].len() > 1,
                layer: layer[cid],
            });
            for &next in &successors[cid] {
                layer[next] = layer[next].max(layer[cid] + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert((raw_members[next][0].clone(), next));
                }
            }
        }

        (components, component_of)
    }

    /// For each file: dependencies outside its component plus the component
    /// members ordered before it
    fn compute_prerequisites(&self) -> BTreeMap<FileId, Vec<FileId>> {
        let mut out = BTreeMap::new();
        for component in &self.components {
            for (pos, file) in component.members.iter().enumerate() {
                let own = &self.component_of[file];
                let mut prereqs: BTreeSet<FileId> = self
                    .dependencies(file)
                    .into_iter()
                    .filter(|dep| &self.component_of[dep] != own)
                    .collect();
                prereqs.extend(component.members[..pos].iter().cloned());
                out.insert(file.clone(), prereqs.into_iter().collect());
            }
        }
        out
    }

    /// Total translation order
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[FileId] {
        &self.order
    }

    /// Components in schedule order
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Topological layers; files in one layer share no dependency edge
    /// except within a cycle
    #[must_use]
    pub fn layers(&self) -> Vec<Vec<FileId>> {
        let mut layers: Vec<Vec<FileId>> = vec![Vec::new(); self.layer_count()];
        for component in &self.components {
            layers[component.layer].extend(component.members.iter().cloned());
        }
        layers
    }

    /// Number of layers
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.components.iter().map(|c| c.layer + 1).max().unwrap_or(0)
    }

    /// Dependency cycles (components with more than one member)
    pub fn cycles(&self) -> impl Iterator<Item = &[FileId]> {
        self.components
            .iter()
            .filter(|c| c.circular)
            .map(|c| c.members.as_slice())
    }

    /// Whether `file` is part of a dependency cycle
    #[must_use]
    pub fn is_circular(&self, file: &FileId) -> bool {
        self.component_of
            .get(file)
            .is_some_and(|&c| self.components[c].circular)
    }

    /// Other members of `file`'s cycle (empty when not circular)
    #[must_use]
    pub fn cycle_peers(&self, file: &FileId) -> Vec<FileId> {
        self.component_of
            .get(file)
            .map(|&c| {
                self.components[c]
                    .members
                    .iter()
                    .filter(|m| *m != file)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Files that must be terminal before `file` may start
    #[must_use]
    pub fn prerequisites(&self, file: &FileId) -> &[FileId] {
        self.prerequisites.get(file).map_or(&[], Vec::as_slice)
    }

    /// Direct dependencies of `file`, ordered
    #[must_use]
    pub fn dependencies(&self, file: &FileId) -> Vec<FileId> {
        self.neighbors(file, Direction::Incoming)
    }

    /// Direct dependents of `file`, ordered
    #[must_use]
    pub fn dependents(&self, file: &FileId) -> Vec<FileId> {
        self.neighbors(file, Direction::Outgoing)
    }

    fn neighbors(&self, file: &FileId, direction: Direction) -> Vec<FileId> {
        let Some(&node) = self.index.get(file) else {
            return Vec::new();
        };
        let mut out: Vec<FileId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }

    /// All files `file` depends on, directly or transitively (excluding itself)
    #[must_use]
    pub fn transitive_dependencies(&self, file: &FileId) -> BTreeSet<FileId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<FileId> = self.dependencies(file).into();
        while let Some(next) = queue.pop_front() {
            if &next == file || !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.dependencies(&next));
        }
        seen
    }

    /// Position of `file` in [`order`](Self::order)
    #[must_use]
    pub fn position(&self, file: &FileId) -> Option<usize> {
        self.order.iter().position(|f| f == file)
    }

    /// Whether `file` is part of the graph
    #[inline]
    #[must_use]
    pub fn contains(&self, file: &FileId) -> bool {
        self.index.contains_key(file)
    }

    /// All edges, ordered
    #[must_use]
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .raw_edges()
            .iter()
            .map(|e| DependencyEdge {
                file: self.graph[e.target()].clone(),
                depends_on: self.graph[e.source()].clone(),
            })
            .collect();
        edges.sort();
        edges
    }

    /// Number of files
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no files
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> FileId {
        FileId::new(s)
    }

    fn relation(edges: &[(&str, &str)]) -> DependencyRelation {
        let mut rel = DependencyRelation::new();
        for (file, dep) in edges {
            rel.entry(id(file)).or_default().insert(id(dep));
        }
        rel
    }

    fn ids(names: &[&str]) -> Vec<FileId> {
        names.iter().map(|n| id(n)).collect()
    }

    #[test]
    fn chain_orders_dependencies_first() {
        let graph = DependencyGraph::build(
            ids(&["c", "b", "a"]),
            &relation(&[("b", "a"), ("c", "b")]),
        )
        .unwrap();

        assert_eq!(graph.order(), ids(&["a", "b", "c"]).as_slice());
        assert_eq!(graph.layers(), vec![ids(&["a"]), ids(&["b"]), ids(&["c"])]);
        assert!(graph.cycles().next().is_none());
    }

    #[test]
    fn independent_files_share_a_layer() {
        let graph = DependencyGraph::build(
            ids(&["main", "x", "y"]),
            &relation(&[("main", "x"), ("main", "y")]),
        )
        .unwrap();

        assert_eq!(graph.layers(), vec![ids(&["x", "y"]), ids(&["main"])]);
        assert_eq!(graph.dependencies(&id("main")), ids(&["x", "y"]));
        assert_eq!(graph.dependents(&id("x")), ids(&["main"]));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = DependencyGraph::build(ids(&["a"]), &relation(&[("a", "ghost")])).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownFile {
                file: id("ghost"),
                referenced_by: Some(id("a")),
            }
        );
    }

    #[test]
    fn unknown_dependent_is_rejected() {
        let err = DependencyGraph::build(ids(&["a"]), &relation(&[("ghost", "a")])).unwrap_err();
        assert!(matches!(err, GraphError::UnknownFile { referenced_by: None, .. }));
    }

    #[test]
    fn self_edges_are_dropped() {
        let graph = DependencyGraph::build(ids(&["a"]), &relation(&[("a", "a")])).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.is_circular(&id("a")));
    }

    #[test]
    fn two_file_cycle_is_lexical_and_flagged() {
        let graph = DependencyGraph::build(
            ids(&["b", "a"]),
            &relation(&[("a", "b"), ("b", "a")]),
        )
        .unwrap();

        assert_eq!(graph.order(), ids(&["a", "b"]).as_slice());
        assert!(graph.is_circular(&id("a")));
        assert!(graph.is_circular(&id("b")));
        assert_eq!(graph.cycle_peers(&id("a")), ids(&["b"]));

        // Inside a cycle, only earlier members gate later ones
        assert!(graph.prerequisites(&id("a")).is_empty());
        assert_eq!(graph.prerequisites(&id("b")), ids(&["a"]).as_slice());
    }

    #[test]
    fn cycle_with_outside_dependency() {
        // util <- {a <-> b} <- main
        let graph = DependencyGraph::build(
            ids(&["main", "a", "b", "util"]),
            &relation(&[("a", "b"), ("b", "a"), ("a", "util"), ("main", "b")]),
        )
        .unwrap();

        assert_eq!(graph.order(), ids(&["util", "a", "b", "main"]).as_slice());
        assert_eq!(graph.prerequisites(&id("a")), ids(&["util"]).as_slice());
        assert_eq!(graph.prerequisites(&id("b")), ids(&["a"]).as_slice());
        assert_eq!(graph.prerequisites(&id("main")), ids(&["b"]).as_slice());
        assert_eq!(graph.cycles().count(), 1);
        assert!(!graph.is_circular(&id("main")));
    }

    #[test]
    fn build_is_deterministic() {
        let rel = relation(&[("d", "a"), ("c", "a"), ("b", "a"), ("e", "c"), ("e", "b")]);
        let first = DependencyGraph::build(ids(&["e", "d", "c", "b", "a"]), &rel).unwrap();
        let second = DependencyGraph::build(ids(&["a", "b", "c", "d", "e"]), &rel).unwrap();
        assert_eq!(first.order(), second.order());
        assert_eq!(first.order(), ids(&["a", "b", "c", "d", "e"]).as_slice());
    }

    #[test]
    fn transitive_dependencies_follow_chain() {
        let graph = DependencyGraph::build(
            ids(&["a", "b", "c", "d"]),
            &relation(&[("b", "a"), ("c", "b")]),
        )
        .unwrap();
        assert_eq!(
            graph.transitive_dependencies(&id("c")),
            BTreeSet::from([id("a"), id("b")])
        );
        assert!(graph.transitive_dependencies(&id("d")).is_empty());
    }

    #[test]
    fn edges_report_dependency_direction() {
        let graph = DependencyGraph::build(ids(&["a", "b"]), &relation(&[("b", "a")])).unwrap();
        assert_eq!(graph.edges(), vec![DependencyEdge::new("b", "a")]);
    }
}

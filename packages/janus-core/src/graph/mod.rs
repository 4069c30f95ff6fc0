//! Dependency graph (spec.md §4.6, C6).
//!
//! Nodes are compilation units; edges split into interface edges (rebuild-
//! propagating, must stay acyclic) and implementation edges (never
//! propagate, may cycle). Hand-rolled Kahn's topological sort and Tarjan SCC
//! detection over plain `Vec`/`HashMap` adjacency rather than petgraph — this
//! module owns its adjacency lists directly so `NodeId` stability and the
//! binary serialization format stay simple.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;

use crate::error::{JanusError, JanusResult};
use crate::unit::CompilationUnit;

/// Stable integer id into the graph's append-only node array (spec.md §9
/// Design Notes: avoids aliased pointers, makes serialization trivial).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Import,
    Call,
    Inherit,
    Reexport,
    Reference,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub source_file: String,
    /// Direct interface dependencies (rebuild-propagating edges): this
    /// node's targets.
    pub interface_deps: Vec<NodeId>,
    /// Direct implementation dependencies (non-propagating, may cycle).
    pub impl_deps: Vec<NodeId>,
    /// Transpose of all incoming interface edges — the nodes that directly
    /// depend on this one through an interface edge.
    pub dependents: Vec<NodeId>,
    pub cached_topo_order: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphStatistics {
    pub node_count: u32,
    pub interface_edge_count: u32,
    pub implementation_edge_count: u32,
    pub cycle_count: u32,
    pub max_depth: u32,
    pub avg_dependencies_per_node: f32,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    units: Vec<CompilationUnit>,
    by_file: FxHashMap<String, NodeId>,
    edge_kinds: FxHashMap<(NodeId, NodeId), DependencyKind>,
    topo_cache: Option<Vec<NodeId>>,
    scc_cache: Option<Vec<Vec<NodeId>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, unit: CompilationUnit) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.by_file.insert(unit.source_file.clone(), id);
        self.nodes.push(GraphNode {
            id,
            source_file: unit.source_file.clone(),
            interface_deps: Vec::new(),
            impl_deps: Vec::new(),
            dependents: Vec::new(),
            cached_topo_order: None,
        });
        self.units.push(unit);
        self.invalidate_caches();
        id
    }

    pub fn get_node(&self, unit: &CompilationUnit) -> Option<NodeId> {
        self.by_file.get(&unit.source_file).copied()
    }

    pub fn get_node_by_file(&self, path: &str) -> Option<NodeId> {
        self.by_file.get(path).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn unit(&self, id: NodeId) -> Option<&CompilationUnit> {
        self.units.get(id.0 as usize)
    }

    pub fn unit_mut(&mut self, id: NodeId) -> Option<&mut CompilationUnit> {
        self.units.get_mut(id.0 as usize)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn invalidate_caches(&mut self) {
        self.topo_cache = None;
        self.scc_cache = None;
        for node in &mut self.nodes {
            node.cached_topo_order = None;
        }
    }

    pub fn add_dependency(
        &mut self,
        src: NodeId,
        dst: NodeId,
        kind: DependencyKind,
        is_interface_edge: bool,
    ) -> JanusResult<()> {
        if self.node(src).is_none() {
            return Err(JanusError::NodeNotFoundInGraph(src));
        }
        if self.node(dst).is_none() {
            return Err(JanusError::NodeNotFoundInGraph(dst));
        }

        self.edge_kinds.insert((src, dst), kind);
        if is_interface_edge {
            self.nodes[src.0 as usize].interface_deps.push(dst);
            self.nodes[dst.0 as usize].dependents.push(src);
        } else {
            self.nodes[src.0 as usize].impl_deps.push(dst);
        }
        self.invalidate_caches();
        Ok(())
    }

    pub fn edge_kind(&self, src: NodeId, dst: NodeId) -> Option<DependencyKind> {
        self.edge_kinds.get(&(src, dst)).copied()
    }

    /// Kahn's algorithm over interface edges only. Ties broken by `NodeId`
    /// ascending so builds are deterministic. Cached until the next edge
    /// insertion.
    pub fn topological_order(&mut self) -> JanusResult<Vec<NodeId>> {
        if let Some(cached) = &self.topo_cache {
            return Ok(cached.clone());
        }
        let order = self.compute_topological_order()?;
        self.topo_cache = Some(order.clone());
        Ok(order)
    }

    fn compute_topological_order(&self) -> JanusResult<Vec<NodeId>> {
        let n = self.nodes.len();
        let mut remaining: Vec<u32> = self
            .nodes
            .iter()
            .map(|node| node.interface_deps.len() as u32)
            .collect();

        // Deterministic ready set: a sorted Vec acting as a min-heap by
        // NodeId, matching spec.md §4.6's "ambiguity resolved by NodeId
        // ascending" tie-break.
        let mut ready: Vec<u32> = (0..n as u32).filter(|&i| remaining[i as usize] == 0).collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.first().copied() {
            ready.remove(0);
            order.push(NodeId(next));
            for &dependent in &self.nodes[next as usize].dependents {
                let idx = dependent.0 as usize;
                remaining[idx] -= 1;
                if remaining[idx] == 0 {
                    let pos = ready.binary_search(&dependent.0).unwrap_or_else(|e| e);
                    ready.insert(pos, dependent.0);
                }
            }
        }

        if order.len() != n {
            let cycle = self
                .detect_sccs_over(|node| &node.interface_deps)
                .into_iter()
                .find(|scc| scc.len() > 1 || self.has_self_loop(scc))
                .unwrap_or_default();
            return Err(JanusError::CircularDependency { cycle });
        }
        Ok(order)
    }

    fn has_self_loop(&self, scc: &[NodeId]) -> bool {
        scc.len() == 1 && {
            let n = scc[0];
            self.nodes[n.0 as usize].interface_deps.contains(&n)
        }
    }

    /// Tarjan SCC detection over interface edges. Any component of size > 1,
    /// or a size-1 component with a self-loop, is an interface cycle.
    pub fn detect_sccs(&mut self) -> Vec<Vec<NodeId>> {
        if let Some(cached) = &self.scc_cache {
            return cached.clone();
        }
        let sccs = self.detect_sccs_over(|node| &node.interface_deps);
        self.scc_cache = Some(sccs.clone());
        sccs
    }

    fn detect_sccs_over<'a, F>(&'a self, edges_of: F) -> Vec<Vec<NodeId>>
    where
        F: Fn(&'a GraphNode) -> &'a Vec<NodeId>,
    {
        struct TarjanState {
            index: Vec<Option<u32>>,
            lowlink: Vec<u32>,
            on_stack: Vec<bool>,
            stack: Vec<u32>,
            next_index: u32,
            sccs: Vec<Vec<NodeId>>,
        }

        fn dfs<'a, F>(
            v: u32,
            nodes: &'a [GraphNode],
            edges_of: &F,
            state: &mut TarjanState,
        ) where
            F: Fn(&'a GraphNode) -> &'a Vec<NodeId>,
        {
            state.index[v as usize] = Some(state.next_index);
            state.lowlink[v as usize] = state.next_index;
            state.next_index += 1;
            state.stack.push(v);
            state.on_stack[v as usize] = true;

            for target in edges_of(&nodes[v as usize]) {
                let w = target.0;
                if state.index[w as usize].is_none() {
                    dfs(w, nodes, edges_of, state);
                    state.lowlink[v as usize] = state.lowlink[v as usize].min(state.lowlink[w as usize]);
                } else if state.on_stack[w as usize] {
                    state.lowlink[v as usize] =
                        state.lowlink[v as usize].min(state.index[w as usize].unwrap());
                }
            }

            if state.lowlink[v as usize] == state.index[v as usize].unwrap() {
                let mut component = Vec::new();
                loop {
                    let w = state.stack.pop().unwrap();
                    state.on_stack[w as usize] = false;
                    component.push(NodeId(w));
                    if w == v {
                        break;
                    }
                }
                state.sccs.push(component);
            }
        }

        let n = self.nodes.len();
        let mut state = TarjanState {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            sccs: Vec::new(),
        };
        for v in 0..n as u32 {
            if state.index[v as usize].is_none() {
                dfs(v, &self.nodes, &edges_of, &mut state);
            }
        }
        state.sccs
    }

    /// DFS over the dependents relation starting at `node_id`, inclusive of
    /// the starting node. Only follows `u -> v` when `v`'s `interface_deps`
    /// actually contains `u` (defensive re-check of what `dependents`
    /// already guarantees by construction).
    pub fn rebuild_set(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![node_id];
        visited[node_id.0 as usize] = true;
        let mut out = Vec::new();

        while let Some(u) = stack.pop() {
            out.push(u);
            let Some(node) = self.node(u) else { continue };
            for &v in &node.dependents {
                if visited[v.0 as usize] {
                    continue;
                }
                let Some(v_node) = self.node(v) else { continue };
                if v_node.interface_deps.contains(&u) {
                    visited[v.0 as usize] = true;
                    stack.push(v);
                }
            }
        }

        out.sort_unstable();
        out
    }

    /// Pure derived view of the graph's shape (spec.md §5 supplement):
    /// independently callable, not just embedded in the serialized form.
    pub fn statistics(&mut self) -> GraphStatistics {
        let node_count = self.nodes.len() as u32;
        let interface_edge_count: u32 = self
            .nodes
            .iter()
            .map(|n| n.interface_deps.len() as u32)
            .sum();
        let implementation_edge_count: u32 =
            self.nodes.iter().map(|n| n.impl_deps.len() as u32).sum();

        let sccs = self.detect_sccs();
        let cycle_count = sccs
            .iter()
            .filter(|scc| scc.len() > 1 || self.has_self_loop(scc))
            .count() as u32;

        let max_depth = match self.topological_order() {
            Ok(order) => self.longest_path(&order),
            Err(_) => 0,
        };

        let avg_dependencies_per_node = if node_count == 0 {
            0.0
        } else {
            interface_edge_count as f32 / node_count as f32
        };

        GraphStatistics {
            node_count,
            interface_edge_count,
            implementation_edge_count,
            cycle_count,
            max_depth,
            avg_dependencies_per_node,
        }
    }

    /// Longest chain of interface dependencies, given a valid topological
    /// order (dependencies before dependents).
    fn longest_path(&self, order: &[NodeId]) -> u32 {
        let mut depth = vec![0u32; self.nodes.len()];
        for &n in order {
            let deps = &self.nodes[n.0 as usize].interface_deps;
            let d = deps.iter().map(|dep| depth[dep.0 as usize] + 1).max().unwrap_or(0);
            depth[n.0 as usize] = d;
        }
        depth.into_iter().max().unwrap_or(0)
    }

    /// Append-only little-endian binary format (spec.md §6 On-disk formats).
    pub fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.nodes.len() as u32)?;
        for node in &self.nodes {
            let path = node.source_file.as_bytes();
            writer.write_u32::<LittleEndian>(path.len() as u32)?;
            writer.write_all(path)?;

            writer.write_u32::<LittleEndian>(node.interface_deps.len() as u32)?;
            for target in &node.interface_deps {
                writer.write_u32::<LittleEndian>(target.0)?;
            }

            writer.write_u32::<LittleEndian>(node.impl_deps.len() as u32)?;
            for target in &node.impl_deps {
                writer.write_u32::<LittleEndian>(target.0)?;
            }
        }

        // Stats are a point-in-time snapshot; safe to compute on a clone
        // since `statistics()` needs `&mut self` only to refresh its cache.
        let mut scratch = DependencyGraph {
            nodes: self.nodes.clone(),
            units: Vec::new(),
            by_file: FxHashMap::default(),
            edge_kinds: FxHashMap::default(),
            topo_cache: None,
            scc_cache: None,
        };
        let stats = scratch.statistics();
        writer.write_u32::<LittleEndian>(stats.node_count)?;
        writer.write_u32::<LittleEndian>(stats.interface_edge_count)?;
        writer.write_u32::<LittleEndian>(stats.implementation_edge_count)?;
        writer.write_u32::<LittleEndian>(stats.cycle_count)?;
        writer.write_u32::<LittleEndian>(stats.max_depth)?;
        writer.write_u32::<LittleEndian>(stats.avg_dependencies_per_node.to_bits())?;
        Ok(())
    }

    /// Reads back a graph with empty `units`/`dependents` repopulated by
    /// transposing `interface_deps` (spec.md §9: back-references are
    /// "rebuilt on load", never serialized directly). The trailing
    /// statistics block is validated for shape but not trusted — callers
    /// should call `statistics()` fresh if they need current numbers.
    pub fn deserialize<R: Read>(reader: &mut R) -> JanusResult<Self> {
        let node_count = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| JanusError::InvalidLayout(e.to_string()))?;

        let mut nodes = Vec::with_capacity(node_count as usize);
        let mut by_file = FxHashMap::default();

        for i in 0..node_count {
            let path_len = read_u32(reader)?;
            let mut path_bytes = vec![0u8; path_len as usize];
            reader
                .read_exact(&mut path_bytes)
                .map_err(|e| JanusError::InvalidLayout(e.to_string()))?;
            let source_file = String::from_utf8(path_bytes)
                .map_err(|e| JanusError::InvalidLayout(e.to_string()))?;

            let n_iface = read_u32(reader)?;
            let mut interface_deps = Vec::with_capacity(n_iface as usize);
            for _ in 0..n_iface {
                interface_deps.push(NodeId(read_u32(reader)?));
            }

            let n_impl = read_u32(reader)?;
            let mut impl_deps = Vec::with_capacity(n_impl as usize);
            for _ in 0..n_impl {
                impl_deps.push(NodeId(read_u32(reader)?));
            }

            let id = NodeId(i);
            by_file.insert(source_file.clone(), id);
            nodes.push(GraphNode {
                id,
                source_file,
                interface_deps,
                impl_deps,
                dependents: Vec::new(),
                cached_topo_order: None,
            });
        }

        // Trailing GraphStatistics block: six u32 fields, read and discarded
        // (structure validated, values not trusted — see doc comment).
        for _ in 0..6 {
            read_u32(reader)?;
        }

        for i in 0..nodes.len() {
            let targets = nodes[i].interface_deps.clone();
            for target in targets {
                nodes[target.0 as usize].dependents.push(NodeId(i as u32));
            }
        }

        Ok(DependencyGraph {
            nodes,
            units: Vec::new(),
            by_file,
            edge_kinds: FxHashMap::default(),
            topo_cache: None,
            scc_cache: None,
        })
    }
}

fn read_u32<R: Read>(reader: &mut R) -> JanusResult<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| JanusError::InvalidLayout(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::{empty_cid, DependencyCid, InterfaceCid, SemanticCid};

    fn unit(path: &str) -> CompilationUnit {
        CompilationUnit::new(
            path,
            crate::snapshot::NodeId(0),
            InterfaceCid(empty_cid()),
            SemanticCid(empty_cid()),
            DependencyCid(empty_cid()),
            0,
        )
    }

    #[test]
    fn single_node_no_edges() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a.rs"));
        assert_eq!(g.topological_order().unwrap(), vec![a]);
        assert_eq!(g.rebuild_set(a), vec![a]);
    }

    #[test]
    fn topological_order_respects_interface_edges_and_is_deterministic() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a.rs"));
        let b = g.add_node(unit("b.rs"));
        let c = g.add_node(unit("c.rs"));
        // b depends on a, c depends on b.
        g.add_dependency(b, a, DependencyKind::Import, true).unwrap();
        g.add_dependency(c, b, DependencyKind::Import, true).unwrap();

        let order = g.topological_order().unwrap();
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn interface_cycle_is_detected_and_rejected() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a.rs"));
        let b = g.add_node(unit("b.rs"));
        g.add_dependency(a, b, DependencyKind::Import, true).unwrap();
        g.add_dependency(b, a, DependencyKind::Import, true).unwrap();

        assert!(g.topological_order().is_err());
        let sccs = g.detect_sccs();
        assert!(sccs.iter().any(|scc| scc.len() == 2));
    }

    #[test]
    fn implementation_edges_may_cycle_without_error() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a.rs"));
        let b = g.add_node(unit("b.rs"));
        g.add_dependency(a, b, DependencyKind::Call, false).unwrap();
        g.add_dependency(b, a, DependencyKind::Call, false).unwrap();

        assert!(g.topological_order().is_ok());
    }

    #[test]
    fn rebuild_set_is_transitive_interface_dependent_closure() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a.rs"));
        let b = g.add_node(unit("b.rs"));
        let c = g.add_node(unit("c.rs"));
        let unrelated = g.add_node(unit("d.rs"));
        g.add_dependency(b, a, DependencyKind::Import, true).unwrap();
        g.add_dependency(c, b, DependencyKind::Import, true).unwrap();

        let mut set = g.rebuild_set(a);
        set.sort_unstable();
        let mut expected = vec![a, b, c];
        expected.sort_unstable();
        assert_eq!(set, expected);
        assert!(!set.contains(&unrelated));
    }

    #[test]
    fn add_dependency_with_unknown_endpoint_fails() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a.rs"));
        let bogus = NodeId(99);
        assert!(g.add_dependency(a, bogus, DependencyKind::Import, true).is_err());
    }

    #[test]
    fn serialize_deserialize_round_trip_preserves_edges() {
        let mut g = DependencyGraph::new();
        let a = g.add_node(unit("a.rs"));
        let b = g.add_node(unit("b.rs"));
        g.add_dependency(b, a, DependencyKind::Import, true).unwrap();
        g.add_dependency(b, a, DependencyKind::Call, false).unwrap();

        let mut buf = Vec::new();
        g.serialize(&mut buf).unwrap();
        let mut loaded = DependencyGraph::deserialize(&mut &buf[..]).unwrap();

        assert_eq!(loaded.node_count(), g.node_count());
        assert_eq!(
            loaded.node(a).unwrap().source_file,
            g.node(a).unwrap().source_file
        );
        assert_eq!(loaded.node(b).unwrap().interface_deps, vec![a]);
        assert_eq!(loaded.node(b).unwrap().impl_deps, vec![a]);
        // dependents rebuilt on load
        assert_eq!(loaded.node(a).unwrap().dependents, vec![b]);
        assert_eq!(loaded.topological_order().unwrap(), g.topological_order().unwrap());
    }
}

//! Compilation unit model (spec.md §3/§4, C4).
//!
//! A `CompilationUnit` binds a source file to its root node and dual CIDs,
//! plus metadata. Lifecycle per spec.md §3: created once after the initial
//! parse + CID computation, updated atomically via `update_cids` after each
//! recompilation, dropped when the source file is removed.

use serde::{Deserialize, Serialize};

use crate::cid::{compute_dependency_cid, DependencyCid, InterfaceCid, SemanticCid};
use crate::snapshot::NodeId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub compilations: u64,
    pub interface_element_count: u32,
    pub node_count: u32,
    pub cumulative_time_ns: u64,
    pub last_time_ns: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub source_file: String,
    pub root_node: NodeId,
    pub interface_cid: InterfaceCid,
    pub semantic_cid: SemanticCid,
    pub dependency_cid: DependencyCid,
    /// Monotonic nanosecond timestamp from the time-source collaborator
    /// (spec.md §6); the core never reads a wall clock itself.
    pub last_modified: u64,
    pub metadata: UnitMetadata,
}

impl CompilationUnit {
    /// `new_compilation_unit(source, root, interface, semantic, dependency)`
    /// from spec.md §6's exposed interface.
    pub fn new(
        source_file: impl Into<String>,
        root_node: NodeId,
        interface_cid: InterfaceCid,
        semantic_cid: SemanticCid,
        dependency_cid: DependencyCid,
        now_ns: u64,
    ) -> Self {
        CompilationUnit {
            source_file: source_file.into(),
            root_node,
            interface_cid,
            semantic_cid,
            dependency_cid,
            last_modified: now_ns,
            metadata: UnitMetadata::default(),
        }
    }

    /// True iff `new_interface_cid` differs from the cached one. An
    /// interface change is the only axis that propagates through the
    /// dependency graph (spec.md §3 invariants).
    pub fn interface_changed(&self, new_interface_cid: InterfaceCid) -> bool {
        self.interface_cid != new_interface_cid
    }

    /// True iff `new_semantic_cid` differs from the cached one, regardless
    /// of whether the interface also changed.
    pub fn implementation_changed(&self, new_semantic_cid: SemanticCid) -> bool {
        self.semantic_cid != new_semantic_cid
    }

    /// A unit must be recompiled iff its own semantic content is stale, or
    /// its dependency CID no longer matches the cached one (spec.md §3).
    pub fn needs_rebuild(
        &self,
        new_semantic_cid: SemanticCid,
        new_dependency_cid: DependencyCid,
    ) -> bool {
        self.semantic_cid != new_semantic_cid || self.dependency_cid != new_dependency_cid
    }

    /// Atomically update CIDs and metadata after a recompilation.
    pub fn update_cids(
        &mut self,
        interface_cid: InterfaceCid,
        semantic_cid: SemanticCid,
        dependency_cid: DependencyCid,
        now_ns: u64,
        elapsed_ns: u64,
        interface_element_count: u32,
        node_count: u32,
    ) {
        self.interface_cid = interface_cid;
        self.semantic_cid = semantic_cid;
        self.dependency_cid = dependency_cid;
        self.last_modified = now_ns;
        self.metadata.compilations += 1;
        self.metadata.cumulative_time_ns += elapsed_ns;
        self.metadata.last_time_ns = elapsed_ns;
        self.metadata.interface_element_count = interface_element_count;
        self.metadata.node_count = node_count;
    }

    /// Recompute `dependency_cid` from the current interface CIDs of this
    /// unit's direct interface-dependencies. Per the Open Question decision
    /// (SPEC_FULL.md §6.1), the change-detection engine calls this before
    /// evaluating `dependency_change`, since only it holds both the old and
    /// new CID sets.
    pub fn recompute_dependency_cid(&mut self, direct_dep_interface_cids: &[InterfaceCid]) {
        self.dependency_cid = compute_dependency_cid(direct_dep_interface_cids);
    }

    pub fn record_cache_hit(&mut self) {
        self.metadata.cache_hits += 1;
    }

    pub fn record_cache_miss(&mut self) {
        self.metadata.cache_misses += 1;
    }
}

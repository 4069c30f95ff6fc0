//! Incremental compilation core: dual-CID compilation units, an interface/
//! implementation dependency graph, change detection, and rebuild
//! optimization (spec.md §1-§5). The build cache lives in the separate
//! `janus-cache` crate (spec.md §4.9).

pub mod change;
pub mod cid;
pub mod error;
pub mod graph;
pub mod interface;
pub mod optimize;
pub mod snapshot;
pub mod unit;
pub mod validator;

pub use change::{ChangeDetectionEngine, ChangeKind, ChangeResult, ChangeSet};
pub use cid::{Cid, DependencyCid, InterfaceCid, SemanticCid};
pub use error::{JanusError, JanusResult};
pub use graph::{DependencyGraph, DependencyKind, NodeId as GraphNodeId};
pub use interface::{extract_interface, InterfaceElement};
pub use optimize::{OptimizationResult, OptimizationStrategy, RebuildOptimizer};
pub use snapshot::{NodeId as SnapshotNodeId, Snapshot};
pub use unit::CompilationUnit;
pub use validator::{compare_compilation_unit, generate_diagnostics, verify_integrity};

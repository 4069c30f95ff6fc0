//! Change-detection engine (spec.md §4.7, C7).
//!
//! Joins current vs. cached compilation-unit sets and classifies each unit;
//! `propagate_changes` then walks the dependency graph to expand interface
//! changes into their transitive dependent closure via BFS over the
//! reverse-dependency (`dependents`) index.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::cid::{DependencyCid, InterfaceCid, SemanticCid};
use crate::graph::DependencyGraph;
use crate::unit::CompilationUnit;
use crate::validator::ImpactClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    InterfaceChange,
    ImplementationChange,
    DependencyChange,
    NewFile,
    DeletedFile,
    NoChange,
}

/// The implementation-scope ladder from spec.md §9 Design Notes. Derived
/// from a BLAKE3 byte-diff count, which is explicitly **not** a sound
/// classifier — a one-bit source edit can flip most of the digest. Kept as
/// a diagnostic/heuristic input only; see `optimize` for where it's (by
/// default, not) acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplementationScope {
    Cosmetic,
    LocalScope,
    PrivateMembers,
    FunctionBodies,
    Algorithms,
    Mixed,
}

pub fn classify_scope(hash_diff_bytes: u32) -> ImplementationScope {
    match hash_diff_bytes {
        0..=4 => ImplementationScope::Cosmetic,
        5..=8 => ImplementationScope::LocalScope,
        9..=12 => ImplementationScope::PrivateMembers,
        13..=18 => ImplementationScope::FunctionBodies,
        19..=24 => ImplementationScope::Algorithms,
        _ => ImplementationScope::Mixed,
    }
}

#[derive(Debug, Clone)]
pub enum ChangeDetails {
    InterfaceChange {
        previous_interface_cid: InterfaceCid,
        current_interface_cid: InterfaceCid,
        impact: ImpactClass,
    },
    ImplementationChange {
        previous_semantic_cid: SemanticCid,
        current_semantic_cid: SemanticCid,
        scope: ImplementationScope,
        impact: ImpactClass,
    },
    DependencyChange {
        previous_dependency_cid: DependencyCid,
        current_dependency_cid: DependencyCid,
    },
    NewFile,
    DeletedFile,
    NoChange,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeMetrics {
    pub hash_diff_bytes: u32,
    pub timing_ns: u64,
}

#[derive(Debug, Clone)]
pub struct ChangeResult {
    pub source_file: String,
    pub kind: ChangeKind,
    pub details: ChangeDetails,
    pub needs_recompile: bool,
    pub affects_dependents: bool,
    pub metrics: ChangeMetrics,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeSetStatistics {
    pub total: u32,
    pub interface_changes: u32,
    pub implementation_changes: u32,
    pub dependency_changes: u32,
    pub new_files: u32,
    pub deleted_files: u32,
    pub no_change: u32,
    pub units_to_recompile: u32,
    pub has_interface_changes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub results: Vec<ChangeResult>,
    pub to_recompile: Vec<String>,
    pub affected_by_deps: Vec<String>,
    pub new_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub statistics: ChangeSetStatistics,
}

impl ChangeSet {
    fn add_to_recompile(&mut self, source_file: &str) {
        if !self.to_recompile.iter().any(|f| f == source_file) {
            self.to_recompile.push(source_file.to_string());
        }
    }

    fn add_affected_by_deps(&mut self, source_file: &str) {
        if !self.affected_by_deps.iter().any(|f| f == source_file) {
            self.affected_by_deps.push(source_file.to_string());
        }
    }
}

fn impact_of(hash_diff_bytes: u32) -> ImpactClass {
    match hash_diff_bytes {
        0..=8 => ImpactClass::Minor,
        9..=16 => ImpactClass::Moderate,
        17..=24 => ImpactClass::Major,
        _ => ImpactClass::Critical,
    }
}

fn diff_bytes32(a: &[u8; 32], b: &[u8; 32]) -> u32 {
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() as u32
}

pub struct ChangeDetectionEngine;

impl ChangeDetectionEngine {
    /// Classifies every current unit against the cached set, first-mismatch-
    /// wins on interface > implementation > dependency > no_change.
    pub fn detect_changes(current: &[CompilationUnit], cached: &[CompilationUnit]) -> ChangeSet {
        let cached_by_file: HashMap<&str, &CompilationUnit> = cached
            .iter()
            .map(|u| (u.source_file.as_str(), u))
            .collect();
        let current_files: std::collections::HashSet<&str> =
            current.iter().map(|u| u.source_file.as_str()).collect();

        let mut set = ChangeSet::default();

        for unit in current {
            let result = match cached_by_file.get(unit.source_file.as_str()) {
                None => ChangeResult {
                    source_file: unit.source_file.clone(),
                    kind: ChangeKind::NewFile,
                    details: ChangeDetails::NewFile,
                    needs_recompile: true,
                    affects_dependents: true,
                    metrics: ChangeMetrics::default(),
                },
                Some(prior) => classify_one(unit, prior),
            };
            record(&mut set, result);
        }

        for prior in cached {
            if !current_files.contains(prior.source_file.as_str()) {
                record(
                    &mut set,
                    ChangeResult {
                        source_file: prior.source_file.clone(),
                        kind: ChangeKind::DeletedFile,
                        details: ChangeDetails::DeletedFile,
                        needs_recompile: false,
                        affects_dependents: false,
                        metrics: ChangeMetrics::default(),
                    },
                );
            }
        }

        set.statistics.units_to_recompile = set.to_recompile.len() as u32;
        info!(
            total = set.statistics.total,
            to_recompile = set.statistics.units_to_recompile,
            "change detection complete"
        );
        set
    }

    /// For every unit with an interface change or that's new, walks the
    /// graph's rebuild set and unions each affected unit into
    /// `to_recompile`/`affected_by_deps`. Also recomputes `dependency_cid`
    /// for true dependents (excluding the origin unit itself) from their
    /// direct interface dependencies' *current* interface CIDs, per the
    /// Open Question decision on recomputation ownership (SPEC_FULL.md
    /// §6.1) — this is what makes `dependency_change` reachable on the next
    /// `detect_changes` call.
    pub fn propagate_changes(change_set: &mut ChangeSet, graph: &mut DependencyGraph) {
        let origins: Vec<String> = change_set
            .results
            .iter()
            .filter(|r| matches!(r.kind, ChangeKind::InterfaceChange | ChangeKind::NewFile))
            .map(|r| r.source_file.clone())
            .collect();

        for origin_file in origins {
            let Some(origin_id) = graph.get_node_by_file(&origin_file) else {
                continue;
            };
            let affected = graph.rebuild_set(origin_id);
            debug!(origin = %origin_file, affected = affected.len(), "propagating interface change");

            for node_id in affected {
                let Some(source_file) = graph.node(node_id).map(|n| n.source_file.clone()) else {
                    continue;
                };
                change_set.add_to_recompile(&source_file);
                change_set.add_affected_by_deps(&source_file);

                if node_id == origin_id {
                    continue;
                }
                let direct_dep_cids: Vec<InterfaceCid> = graph
                    .node(node_id)
                    .map(|n| n.interface_deps.clone())
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|dep_id| graph.unit(dep_id).map(|u| u.interface_cid))
                    .collect();
                if let Some(unit) = graph.unit_mut(node_id) {
                    unit.recompute_dependency_cid(&direct_dep_cids);
                }
            }
        }

        change_set.statistics.units_to_recompile = change_set.to_recompile.len() as u32;
    }
}

fn classify_one(current: &CompilationUnit, cached: &CompilationUnit) -> ChangeResult {
    if current.interface_cid != cached.interface_cid {
        let hash_diff_bytes = diff_bytes32(
            current.interface_cid.0.as_bytes(),
            cached.interface_cid.0.as_bytes(),
        );
        return ChangeResult {
            source_file: current.source_file.clone(),
            kind: ChangeKind::InterfaceChange,
            details: ChangeDetails::InterfaceChange {
                previous_interface_cid: cached.interface_cid,
                current_interface_cid: current.interface_cid,
                impact: impact_of(hash_diff_bytes),
            },
            needs_recompile: true,
            affects_dependents: true,
            metrics: ChangeMetrics {
                hash_diff_bytes,
                timing_ns: 0,
            },
        };
    }

    if current.semantic_cid != cached.semantic_cid {
        let hash_diff_bytes = diff_bytes32(
            current.semantic_cid.0.as_bytes(),
            cached.semantic_cid.0.as_bytes(),
        );
        return ChangeResult {
            source_file: current.source_file.clone(),
            kind: ChangeKind::ImplementationChange,
            details: ChangeDetails::ImplementationChange {
                previous_semantic_cid: cached.semantic_cid,
                current_semantic_cid: current.semantic_cid,
                scope: classify_scope(hash_diff_bytes),
                impact: impact_of(hash_diff_bytes),
            },
            // The safest rule (spec.md §9): every implementation_change
            // requires recompiling exactly this unit, by default. Heuristic
            // relaxation is the optimizer's job, not this engine's.
            needs_recompile: true,
            affects_dependents: false,
            metrics: ChangeMetrics {
                hash_diff_bytes,
                timing_ns: 0,
            },
        };
    }

    if current.dependency_cid != cached.dependency_cid {
        return ChangeResult {
            source_file: current.source_file.clone(),
            kind: ChangeKind::DependencyChange,
            details: ChangeDetails::DependencyChange {
                previous_dependency_cid: cached.dependency_cid,
                current_dependency_cid: current.dependency_cid,
            },
            needs_recompile: true,
            affects_dependents: false,
            metrics: ChangeMetrics::default(),
        };
    }

    ChangeResult {
        source_file: current.source_file.clone(),
        kind: ChangeKind::NoChange,
        details: ChangeDetails::NoChange,
        needs_recompile: false,
        affects_dependents: false,
        metrics: ChangeMetrics::default(),
    }
}

fn record(set: &mut ChangeSet, result: ChangeResult) {
    set.statistics.total += 1;
    match result.kind {
        ChangeKind::InterfaceChange => {
            set.statistics.interface_changes += 1;
            set.statistics.has_interface_changes = true;
            set.add_to_recompile(&result.source_file);
        }
        ChangeKind::ImplementationChange => {
            set.statistics.implementation_changes += 1;
            if result.needs_recompile {
                set.add_to_recompile(&result.source_file);
            }
        }
        ChangeKind::DependencyChange => {
            set.statistics.dependency_changes += 1;
            set.add_affected_by_deps(&result.source_file);
            set.add_to_recompile(&result.source_file);
        }
        ChangeKind::NewFile => {
            set.statistics.new_files += 1;
            set.new_files.push(result.source_file.clone());
            set.add_to_recompile(&result.source_file);
        }
        ChangeKind::DeletedFile => {
            set.statistics.deleted_files += 1;
            set.deleted_files.push(result.source_file.clone());
        }
        ChangeKind::NoChange => {
            set.statistics.no_change += 1;
        }
    }
    set.results.push(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::{Cid, DependencyCid, InterfaceCid, SemanticCid};
    use crate::graph::DependencyGraph;

    fn unit_with(path: &str, iface: u8, sem: u8, dep: u8) -> CompilationUnit {
        let mk = |tag: u8| {
            let mut bytes = [0u8; 32];
            bytes[0] = tag;
            Cid::from_hash(blake3::hash(&bytes))
        };
        CompilationUnit::new(
            path,
            crate::snapshot::NodeId(0),
            InterfaceCid(mk(iface)),
            SemanticCid(mk(sem)),
            DependencyCid(mk(dep)),
            0,
        )
    }

    #[test]
    fn pure_no_op_yields_zero_to_recompile() {
        let cached = vec![unit_with("a.rs", 1, 1, 1), unit_with("b.rs", 2, 2, 2)];
        let current = cached.clone();
        let set = ChangeDetectionEngine::detect_changes(&current, &cached);
        assert_eq!(set.to_recompile.len(), 0);
        assert_eq!(set.statistics.total, 2);
        assert!(!set.statistics.has_interface_changes);
        assert_eq!(set.statistics.units_to_recompile, 0);
    }

    #[test]
    fn implementation_only_change_affects_only_that_unit() {
        let cached = vec![unit_with("a.rs", 1, 1, 1)];
        let current = vec![unit_with("a.rs", 1, 9, 1)];
        let set = ChangeDetectionEngine::detect_changes(&current, &cached);
        assert_eq!(set.results[0].kind, ChangeKind::ImplementationChange);
        assert!(set.to_recompile.contains(&"a.rs".to_string()));
        assert_eq!(set.to_recompile.len(), 1);
    }

    #[test]
    fn new_file_is_classified_and_recompiled() {
        let cached: Vec<CompilationUnit> = vec![];
        let current = vec![unit_with("new.rs", 1, 1, 1)];
        let set = ChangeDetectionEngine::detect_changes(&current, &cached);
        assert_eq!(set.results[0].kind, ChangeKind::NewFile);
        assert!(set.new_files.contains(&"new.rs".to_string()));
        assert!(set.to_recompile.contains(&"new.rs".to_string()));
    }

    #[test]
    fn deleted_file_does_not_need_recompile() {
        let cached = vec![unit_with("gone.rs", 1, 1, 1)];
        let current: Vec<CompilationUnit> = vec![];
        let set = ChangeDetectionEngine::detect_changes(&current, &cached);
        assert_eq!(set.results[0].kind, ChangeKind::DeletedFile);
        assert!(!set.results[0].needs_recompile);
        assert!(set.deleted_files.contains(&"gone.rs".to_string()));
        assert!(set.to_recompile.is_empty());
    }

    #[test]
    fn interface_change_propagates_to_transitive_dependents() {
        let cached = vec![
            unit_with("a.rs", 1, 1, 1),
            unit_with("b.rs", 2, 2, 2),
            unit_with("c.rs", 3, 3, 3),
        ];
        let current = vec![
            unit_with("a.rs", 9, 9, 1), // a's interface changed
            unit_with("b.rs", 2, 2, 2),
            unit_with("c.rs", 3, 3, 3),
        ];

        let mut graph = DependencyGraph::new();
        let a = graph.add_node(current[0].clone());
        let b = graph.add_node(current[1].clone());
        let c = graph.add_node(current[2].clone());
        graph
            .add_dependency(b, a, crate::graph::DependencyKind::Import, true)
            .unwrap();
        graph
            .add_dependency(c, b, crate::graph::DependencyKind::Import, true)
            .unwrap();

        let mut set = ChangeDetectionEngine::detect_changes(&current, &cached);
        ChangeDetectionEngine::propagate_changes(&mut set, &mut graph);

        assert!(set.to_recompile.contains(&"a.rs".to_string()));
        assert!(set.to_recompile.contains(&"b.rs".to_string()));
        assert!(set.to_recompile.contains(&"c.rs".to_string()));
        let _ = (a, b, c);
    }
}

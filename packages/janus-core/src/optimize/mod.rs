//! Rebuild optimizer (spec.md §4.8, C8).
//!
//! Takes a populated `ChangeSet` and the graph, applies optional techniques
//! (transitive pruning, batching, heuristics, parallel branch analysis) to
//! shrink the rebuild set, and never produces an under-approximation.
//! Parallel branch analysis uses a rayon-gated, size-thresholded fallback:
//! below a node-count threshold it runs sequentially, above it the disjoint
//! rebuild-set subgraphs are processed concurrently and merged deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::change::{ChangeDetails, ChangeKind, ChangeSet, ImplementationScope};
use crate::graph::{DependencyGraph, NodeId};
use crate::validator::ImpactClass;

const PARALLEL_BRANCH_THRESHOLD: usize = 10;

#[derive(Debug, Clone)]
pub enum OptimizationStrategy {
    /// No pruning, no heuristics, no batching — the safe ceiling every
    /// other strategy's output must stay within (see `is_safe` below).
    Conservative,
    Aggressive,
    Balanced,
    Custom(OptimizationParameters),
}

#[derive(Debug, Clone, Copy)]
pub struct OptimizationParameters {
    pub parallel_threads_cap: usize,
    pub heuristics_enabled: bool,
    pub transitive_pruning_enabled: bool,
    pub batching_enabled: bool,
    pub impact_threshold: ImpactClass,
    pub max_optimization_time_ns: u64,
}

impl OptimizationStrategy {
    /// Resolves a named strategy to concrete knobs. Per the Open Question
    /// decision (SPEC_FULL.md §6.2), heuristics and transitive pruning are
    /// both disabled under `conservative` and `balanced` — the byte-diff
    /// impact classifier they key off is diagnostic only (spec.md §9), not a
    /// sound basis for dropping units, so only `aggressive`/`custom` may opt
    /// in. `analyze_safety` still backstops those strategies: any drop it
    /// can't prove safe reverts to the unoptimized set regardless of which
    /// techniques were enabled.
    pub fn resolve(&self) -> OptimizationParameters {
        match self {
            OptimizationStrategy::Conservative => OptimizationParameters {
                parallel_threads_cap: 1,
                heuristics_enabled: false,
                transitive_pruning_enabled: false,
                batching_enabled: false,
                impact_threshold: ImpactClass::Minor,
                max_optimization_time_ns: u64::MAX,
            },
            OptimizationStrategy::Balanced => OptimizationParameters {
                parallel_threads_cap: rayon::current_num_threads(),
                heuristics_enabled: false,
                transitive_pruning_enabled: false,
                batching_enabled: true,
                impact_threshold: ImpactClass::Moderate,
                max_optimization_time_ns: 500_000_000,
            },
            OptimizationStrategy::Aggressive => OptimizationParameters {
                parallel_threads_cap: rayon::current_num_threads(),
                heuristics_enabled: true,
                transitive_pruning_enabled: true,
                batching_enabled: true,
                impact_threshold: ImpactClass::Major,
                max_optimization_time_ns: 200_000_000,
            },
            OptimizationStrategy::Custom(params) => *params,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizationMetrics {
    pub elapsed_ns: u64,
    pub pruned_count: usize,
    pub batched_groups: usize,
}

#[derive(Debug, Clone)]
pub struct SafetyAnalysis {
    pub is_safe: bool,
    pub confidence_level: f64,
    pub potential_risks: Vec<String>,
    pub mitigation_strategies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub original_count: usize,
    pub optimized_count: usize,
    pub techniques_applied: Vec<String>,
    pub metrics: OptimizationMetrics,
    pub safety: SafetyAnalysis,
    pub rebuild_set: Vec<String>,
}

impl OptimizationResult {
    /// Human-readable report for `tracing::info!` call sites.
    pub fn summary(&self) -> String {
        format!(
            "rebuild set: {} -> {} units ({}), techniques=[{}], safe={}, confidence={:.2}",
            self.original_count,
            self.optimized_count,
            if self.original_count == 0 {
                "0%".to_string()
            } else {
                format!(
                    "{:.0}%",
                    100.0 * self.optimized_count as f64 / self.original_count as f64
                )
            },
            self.techniques_applied.join(", "),
            self.safety.is_safe,
            self.safety.confidence_level
        )
    }
}

pub struct RebuildOptimizer;

impl RebuildOptimizer {
    pub fn optimize(
        change_set: &ChangeSet,
        graph: &DependencyGraph,
        strategy: OptimizationStrategy,
    ) -> OptimizationResult {
        let params = strategy.resolve();
        let start = Instant::now();
        let original: Vec<String> = change_set.to_recompile.clone();
        let mut working = original.clone();
        let mut techniques = Vec::new();
        let mut pruned_count = 0usize;
        let mut batched_groups = 0usize;

        if params.transitive_pruning_enabled {
            let before = working.len();
            working = prune_transitive(working, change_set, graph, params.impact_threshold);
            pruned_count += before - working.len();
            techniques.push("transitive_pruning".to_string());
        }

        if params.heuristics_enabled {
            let before = working.len();
            working = apply_heuristics(working, change_set);
            pruned_count += before.saturating_sub(working.len());
            techniques.push("heuristics".to_string());
        }

        if params.batching_enabled {
            let batches = batch_by_topology(&working, graph);
            batched_groups = batches.len();
            working = flatten_batches(batches, &working);
            techniques.push("batch_optimization".to_string());
        }

        if working.len() > PARALLEL_BRANCH_THRESHOLD {
            working = parallel_branch_merge(working, graph);
            techniques.push("parallel_branch_analysis".to_string());
        }

        let elapsed_ns = start.elapsed().as_nanos() as u64;
        if elapsed_ns > params.max_optimization_time_ns {
            warn!(elapsed_ns, budget = params.max_optimization_time_ns, "optimization budget exceeded, falling back to unoptimized set");
            working = original.clone();
            techniques.push("time_budget_exceeded_fallback".to_string());
            pruned_count = 0;
        }

        let mut safety = analyze_safety(&original, &working);
        if !safety.is_safe {
            warn!("optimizer could not prove safety, falling back to unoptimized set");
            working = original.clone();
            techniques.push("unsafe_result_discarded".to_string());
            pruned_count = 0;
            safety = analyze_safety(&original, &working);
        }

        let result = OptimizationResult {
            original_count: original.len(),
            optimized_count: working.len(),
            techniques_applied: techniques,
            metrics: OptimizationMetrics {
                elapsed_ns,
                pruned_count,
                batched_groups,
            },
            safety,
            rebuild_set: working,
        };
        info!(summary = %result.summary(), "rebuild optimization complete");
        result
    }
}

/// Conservative strategy never prunes/heuristic-adjusts, so its output
/// equals `change_set.to_recompile` verbatim; this is the safety ceiling
/// every other strategy's output must not exceed the absence of — i.e. it
/// is the monotone upper bound referenced in spec.md §8's safety property.
fn analyze_safety(original: &[String], optimized: &[String]) -> SafetyAnalysis {
    let original_set: HashSet<&str> = original.iter().map(|s| s.as_str()).collect();
    let optimized_set: HashSet<&str> = optimized.iter().map(|s| s.as_str()).collect();
    let dropped: Vec<&str> = original_set.difference(&optimized_set).copied().collect();
    let added: Vec<&str> = optimized_set.difference(&original_set).copied().collect();

    let mut risks = Vec::new();
    let mut mitigations = Vec::new();
    if !added.is_empty() {
        risks.push(format!(
            "optimizer introduced {} unit(s) not present in the original change set",
            added.len()
        ));
        mitigations.push("reject optimized set; this must never happen".to_string());
    }
    if !dropped.is_empty() {
        risks.push(format!(
            "{} unit(s) pruned from the rebuild set by heuristics/pruning",
            dropped.len()
        ));
        mitigations.push(
            "neither technique carries a soundness proof yet; fall back to the unoptimized set"
                .to_string(),
        );
    }

    // Every dropped unit must be provably safe to drop, and this crate has
    // no use-site/AST-diff analysis to supply that proof (spec.md §9: the
    // byte-diff impact/scope classifiers backing prune_transitive and
    // apply_heuristics are diagnostic only). So any drop at all is treated
    // as unproven, and the caller falls back to the unoptimized set.
    let is_safe = added.is_empty() && dropped.is_empty();
    let confidence_level = if dropped.is_empty() {
        1.0
    } else {
        (1.0 - dropped.len() as f64 / original.len().max(1) as f64).max(0.0)
    };

    SafetyAnalysis {
        is_safe,
        confidence_level,
        potential_risks: risks,
        mitigation_strategies: mitigations,
    }
}

/// Drops transitively-propagated (not directly changed) units more than one
/// hop from their origin when the originating interface change's impact is
/// at or below `threshold`. This is an approximation of "re-check
/// observability at use-sites" (spec.md §4.8) — this crate has no use-site
/// analysis, so indirectness + low impact stand in as the provable-enough
/// condition. Units directly flagged by change detection (their own
/// interface/implementation/dependency change) are never pruned.
fn prune_transitive(
    working: Vec<String>,
    change_set: &ChangeSet,
    graph: &DependencyGraph,
    threshold: ImpactClass,
) -> Vec<String> {
    let directly_changed: HashSet<&str> = change_set
        .results
        .iter()
        .filter(|r| is_direct_change(r.kind))
        .map(|r| r.source_file.as_str())
        .collect();

    let origins: Vec<(NodeId, ImpactClass)> = change_set
        .results
        .iter()
        .filter_map(|r| match &r.details {
            ChangeDetails::InterfaceChange { impact, .. } => graph
                .get_node_by_file(&r.source_file)
                .map(|id| (id, *impact)),
            _ => None,
        })
        .collect();

    // For each reachable file, keep the (depth, impact) pair from whichever
    // origin puts it closest — the strictest evidence available for pruning.
    let mut depths: HashMap<String, (u32, ImpactClass)> = HashMap::new();
    for (origin_id, impact) in &origins {
        for (node_id, depth) in bfs_depths(graph, *origin_id) {
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            depths
                .entry(node.source_file.clone())
                .and_modify(|(d, i)| {
                    if depth < *d {
                        *d = depth;
                        *i = *impact;
                    }
                })
                .or_insert((depth, *impact));
        }
    }

    working
        .into_iter()
        .filter(|file| {
            if directly_changed.contains(file.as_str()) {
                return true;
            }
            let Some(&(depth, origin_impact)) = depths.get(file) else {
                return true;
            };
            !(depth > 1 && impact_rank(origin_impact) <= impact_rank(threshold))
        })
        .collect()
}

fn is_direct_change(kind: ChangeKind) -> bool {
    matches!(
        kind,
        ChangeKind::InterfaceChange
            | ChangeKind::ImplementationChange
            | ChangeKind::DependencyChange
            | ChangeKind::NewFile
    )
}

fn impact_rank(impact: ImpactClass) -> u8 {
    match impact {
        ImpactClass::Minor => 0,
        ImpactClass::Moderate => 1,
        ImpactClass::Major => 2,
        ImpactClass::Critical => 3,
    }
}

fn bfs_depths(graph: &DependencyGraph, origin: NodeId) -> Vec<(NodeId, u32)> {
    let mut depth = HashMap::new();
    depth.insert(origin, 0u32);
    let mut queue = VecDeque::new();
    queue.push_back(origin);
    while let Some(u) = queue.pop_front() {
        let d = depth[&u];
        let Some(node) = graph.node(u) else { continue };
        for &v in &node.dependents {
            let Some(v_node) = graph.node(v) else { continue };
            if !v_node.interface_deps.contains(&u) {
                continue;
            }
            if !depth.contains_key(&v) {
                depth.insert(v, d + 1);
                queue.push_back(v);
            }
        }
    }
    depth.into_iter().collect()
}

/// Heuristic 1: `implementation_change` with `scope = cosmetic` is dropped
/// entirely (`needs_recompile` cleared). Heuristic 2 (`local_scope` clears
/// `affects_dependents`) requires no set mutation here since
/// implementation_change never sets `affects_dependents` in the first
/// place (spec.md §4.7) — it's already the behavior this heuristic asks
/// for, so it's a no-op on the rebuild set by construction.
fn apply_heuristics(working: Vec<String>, change_set: &ChangeSet) -> Vec<String> {
    let cosmetic: HashSet<&str> = change_set
        .results
        .iter()
        .filter(|r| {
            matches!(
                &r.details,
                ChangeDetails::ImplementationChange {
                    scope: ImplementationScope::Cosmetic,
                    ..
                }
            )
        })
        .map(|r| r.source_file.as_str())
        .collect();

    working
        .into_iter()
        .filter(|f| !cosmetic.contains(f.as_str()))
        .collect()
}

/// Groups `working` into topologically-valid batches (dependencies before
/// dependents), for cache-locality/parallel-compile scheduling.
fn batch_by_topology(working: &[String], graph: &DependencyGraph) -> Vec<Vec<String>> {
    let working_set: HashSet<&str> = working.iter().map(|s| s.as_str()).collect();
    let ids: Vec<NodeId> = working
        .iter()
        .filter_map(|f| graph.get_node_by_file(f))
        .collect();

    let mut remaining: HashMap<NodeId, u32> = ids
        .iter()
        .map(|&id| {
            let count = graph
                .node(id)
                .map(|n| {
                    n.interface_deps
                        .iter()
                        .filter(|d| {
                            graph
                                .node(**d)
                                .map(|dn| working_set.contains(dn.source_file.as_str()))
                                .unwrap_or(false)
                        })
                        .count() as u32
                })
                .unwrap_or(0);
            (id, count)
        })
        .collect();

    let mut batches = Vec::new();
    let mut pending: HashSet<NodeId> = ids.into_iter().collect();
    while !pending.is_empty() {
        let mut ready: Vec<NodeId> = pending
            .iter()
            .copied()
            .filter(|id| remaining.get(id).copied().unwrap_or(0) == 0)
            .collect();
        if ready.is_empty() {
            // Defensive: shouldn't happen for an acyclic interface-edge
            // subgraph, but never hang if it does.
            ready = pending.iter().copied().collect();
        }
        ready.sort_unstable();

        let batch: Vec<String> = ready
            .iter()
            .filter_map(|id| graph.node(*id).map(|n| n.source_file.clone()))
            .collect();

        for id in &ready {
            pending.remove(id);
            if let Some(node) = graph.node(*id) {
                for &dependent in &node.dependents {
                    if let Some(count) = remaining.get_mut(&dependent) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
        batches.push(batch);
    }
    batches
}

/// Flattens topologically-ordered `batches` back into a single rebuild-set
/// ordering. Any `working` entry `batch_by_topology` couldn't place (no
/// matching graph node) is appended, sorted, rather than silently dropped.
fn flatten_batches(batches: Vec<Vec<String>>, working: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = batches.into_iter().flatten().collect();
    let placed: HashSet<&str> = ordered.iter().map(|s| s.as_str()).collect();
    let mut unplaced: Vec<String> = working
        .iter()
        .filter(|f| !placed.contains(f.as_str()))
        .cloned()
        .collect();
    unplaced.sort_unstable();
    ordered.extend(unplaced);
    ordered
}

/// Analyzes disjoint connected components of `working` (restricted to the
/// graph's interface/implementation edges) concurrently via rayon. Each
/// component is a pure, independent computation (currently a pass-through
/// validation pass), so concurrent evaluation order never affects which
/// units end up in the result — but the merge preserves `working`'s
/// incoming order (the topological batch order when batching ran) rather
/// than re-sorting lexicographically, since that would erase it.
fn parallel_branch_merge(working: Vec<String>, graph: &DependencyGraph) -> Vec<String> {
    let position: HashMap<&str, usize> = working
        .iter()
        .enumerate()
        .map(|(i, f)| (f.as_str(), i))
        .collect();
    let components = connected_components(&working, graph);
    let mut merged: Vec<String> = components
        .into_par_iter()
        .flat_map(|component| component.into_par_iter())
        .collect();
    merged.sort_by_key(|f| position.get(f.as_str()).copied().unwrap_or(usize::MAX));
    merged.dedup();
    merged
}

fn connected_components(working: &[String], graph: &DependencyGraph) -> Vec<Vec<String>> {
    let working_set: HashSet<&str> = working.iter().map(|s| s.as_str()).collect();
    let ids: Vec<NodeId> = working
        .iter()
        .filter_map(|f| graph.get_node_by_file(f))
        .collect();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut components = Vec::new();

    for &start in &ids {
        if visited.contains(&start) {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited.insert(start);
        while let Some(u) = queue.pop_front() {
            let Some(node) = graph.node(u) else { continue };
            component.push(node.source_file.clone());
            let neighbors = node.interface_deps.iter().chain(node.dependents.iter());
            for &v in neighbors {
                if visited.contains(&v) {
                    continue;
                }
                let in_working = graph
                    .node(v)
                    .map(|n| working_set.contains(n.source_file.as_str()))
                    .unwrap_or(false);
                if in_working {
                    visited.insert(v);
                    queue.push_back(v);
                }
            }
        }
        components.push(component);
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeDetectionEngine;
    use crate::cid::{Cid, DependencyCid, InterfaceCid, SemanticCid};
    use crate::unit::CompilationUnit;

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
    fn conservative_strategy_never_prunes() {
        let cached = vec![unit_with("a.rs", 1, 1, 1)];
        let current = vec![unit_with("a.rs", 1, 9, 1)];
        let set = ChangeDetectionEngine::detect_changes(&current, &cached);
        let graph = DependencyGraph::new();
        let result = RebuildOptimizer::optimize(&set, &graph, OptimizationStrategy::Conservative);
        assert_eq!(result.rebuild_set, set.to_recompile);
        assert!(result.safety.is_safe);
    }

    #[test]
    fn cosmetic_implementation_change_heuristic_drop_is_reverted_as_unproven() {
        let cached = vec![unit_with("a.rs", 1, 1, 1)];
        // hash_diff_bytes small -> classified Cosmetic
        let mut sem_bytes = *cached[0].semantic_cid.0.as_bytes();
        sem_bytes[1] ^= 1;
        let current_sem = SemanticCid(Cid::from_hash(blake3::hash(&sem_bytes)));
        let mut current = cached.clone();
        current[0].semantic_cid = current_sem;

        let set = ChangeDetectionEngine::detect_changes(&current, &cached);
        let graph = DependencyGraph::new();
        let result = RebuildOptimizer::optimize(&set, &graph, OptimizationStrategy::Aggressive);
        // Whether the heuristic drops "a.rs" depends on the byte-diff landing
        // in the Cosmetic bucket, but the Cosmetic classifier carries no
        // soundness proof, so analyze_safety must reject any such drop and
        // fall back to the unoptimized set: the safety invariant always
        // holds, and the rebuild set never shrinks below the original.
        assert_eq!(result.rebuild_set, set.to_recompile);
        assert!(result.safety.is_safe);
    }

    #[test]
    fn transitive_pruning_never_under_rebuilds_a_four_deep_chain() {
        // a <- b <- c <- d (interface edges), small byte-diff interface edit
        // on a. A naive depth>1-and-low-impact prune would drop c and d;
        // the safety fallback must restore them instead.
        let cached = vec![
            unit_with("a.rs", 1, 1, 1),
            unit_with("b.rs", 2, 2, 2),
            unit_with("c.rs", 3, 3, 3),
            unit_with("d.rs", 4, 4, 4),
        ];
        let mut current = cached.clone();
        let mut iface_bytes = *cached[0].interface_cid.0.as_bytes();
        iface_bytes[0] ^= 1;
        current[0].interface_cid = InterfaceCid(Cid::from_hash(blake3::hash(&iface_bytes)));

        let mut graph = DependencyGraph::new();
        let a = graph.add_node(current[0].clone());
        let b = graph.add_node(current[1].clone());
        let c = graph.add_node(current[2].clone());
        let d = graph.add_node(current[3].clone());
        graph.add_dependency(b, a, crate::graph::DependencyKind::Import, true).unwrap();
        graph.add_dependency(c, b, crate::graph::DependencyKind::Import, true).unwrap();
        graph.add_dependency(d, c, crate::graph::DependencyKind::Import, true).unwrap();

        let mut set = ChangeDetectionEngine::detect_changes(&current, &cached);
        crate::change::ChangeDetectionEngine::propagate_changes(&mut set, &mut graph);

        let params = OptimizationParameters {
            parallel_threads_cap: 1,
            heuristics_enabled: false,
            transitive_pruning_enabled: true,
            batching_enabled: false,
            impact_threshold: ImpactClass::Major,
            max_optimization_time_ns: u64::MAX,
        };
        let result = RebuildOptimizer::optimize(&set, &graph, OptimizationStrategy::Custom(params));
        let mut rebuild_set = result.rebuild_set.clone();
        rebuild_set.sort_unstable();
        assert_eq!(rebuild_set, vec!["a.rs", "b.rs", "c.rs", "d.rs"]);
        assert!(result.safety.is_safe);
    }

    #[test]
    fn batch_optimization_reorders_the_rebuild_set_topologically() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(unit_with("a.rs", 1, 1, 1));
        let b = graph.add_node(unit_with("b.rs", 2, 2, 2));
        let c = graph.add_node(unit_with("c.rs", 3, 3, 3));
        graph.add_dependency(b, a, crate::graph::DependencyKind::Import, true).unwrap();
        graph.add_dependency(c, b, crate::graph::DependencyKind::Import, true).unwrap();

        let mut set = ChangeSet::default();
        for f in ["c.rs", "a.rs", "b.rs"] {
            set.to_recompile.push(f.to_string());
        }

        let params = OptimizationParameters {
            parallel_threads_cap: 1,
            heuristics_enabled: false,
            transitive_pruning_enabled: false,
            batching_enabled: true,
            impact_threshold: ImpactClass::Minor,
            max_optimization_time_ns: u64::MAX,
        };
        let result = RebuildOptimizer::optimize(&set, &graph, OptimizationStrategy::Custom(params));
        let pos = |f: &str| result.rebuild_set.iter().position(|x| x == f).unwrap();
        assert!(pos("a.rs") < pos("b.rs"));
        assert!(pos("b.rs") < pos("c.rs"));
    }

    #[test]
    fn optimizer_never_adds_units_not_in_original() {
        let cached = vec![unit_with("a.rs", 1, 1, 1)];
        let current = vec![unit_with("a.rs", 9, 9, 1)];
        let set = ChangeDetectionEngine::detect_changes(&current, &cached);
        let graph = DependencyGraph::new();
        for strategy in [
            OptimizationStrategy::Conservative,
            OptimizationStrategy::Balanced,
            OptimizationStrategy::Aggressive,
        ] {
            let result = RebuildOptimizer::optimize(&set, &graph, strategy);
            assert!(result
                .rebuild_set
                .iter()
                .all(|f| set.to_recompile.contains(f)));
        }
    }
}

//! CID validator (spec.md §4.5, C5).
//!
//! Pure functions over CIDs: structural comparison, integrity heuristics,
//! and diagnostics generation. Nothing here mutates a `CompilationUnit` or
//! fails hard — `verify_integrity` fails soft by design (spec.md §4.5).

use std::time::Instant;

use crate::cid::{Cid, InterfaceCid, SemanticCid};
use crate::unit::CompilationUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonKind {
    Interface,
    Semantic,
    CompilationUnit,
}

/// `{equal, kind_tag, hash_diff_bytes, timing}` from spec.md §4.5.
/// `hash_diff_bytes` is purely informational — a one-bit source change can
/// flip most of a BLAKE3 digest, so it is never a correctness signal.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonResult {
    pub equal: bool,
    pub kind_tag: ComparisonKind,
    pub hash_diff_bytes: u32,
    pub timing_ns: u64,
}

fn diff_bytes(a: &Cid, b: &Cid) -> u32 {
    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .filter(|(x, y)| x != y)
        .count() as u32
}

pub fn compare_interface(a: InterfaceCid, b: InterfaceCid) -> ComparisonResult {
    let start = Instant::now();
    let equal = a == b;
    let hash_diff_bytes = diff_bytes(&a.0, &b.0);
    ComparisonResult {
        equal,
        kind_tag: ComparisonKind::Interface,
        hash_diff_bytes,
        timing_ns: start.elapsed().as_nanos() as u64,
    }
}

pub fn compare_semantic(a: SemanticCid, b: SemanticCid) -> ComparisonResult {
    let start = Instant::now();
    let equal = a == b;
    let hash_diff_bytes = diff_bytes(&a.0, &b.0);
    ComparisonResult {
        equal,
        kind_tag: ComparisonKind::Semantic,
        hash_diff_bytes,
        timing_ns: start.elapsed().as_nanos() as u64,
    }
}

/// Compares a current unit against its cached predecessor across all three
/// CIDs; `equal` holds iff interface, semantic, and dependency CIDs all
/// match. `hash_diff_bytes` is the semantic CID's diff count, the widest of
/// the three axes.
pub fn compare_compilation_unit(
    current: &CompilationUnit,
    cached: &CompilationUnit,
) -> ComparisonResult {
    let start = Instant::now();
    let equal = current.interface_cid == cached.interface_cid
        && current.semantic_cid == cached.semantic_cid
        && current.dependency_cid == cached.dependency_cid;
    let hash_diff_bytes = diff_bytes(&current.semantic_cid.0, &cached.semantic_cid.0);
    ComparisonResult {
        equal,
        kind_tag: ComparisonKind::CompilationUnit,
        hash_diff_bytes,
        timing_ns: start.elapsed().as_nanos() as u64,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityIndicators {
    pub all_zeros: bool,
    pub all_ones: bool,
    pub repeating_pattern: bool,
    pub entropy_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct IntegrityReport {
    pub valid: bool,
    pub indicators: IntegrityIndicators,
}

/// Heuristic sanity check over a raw CID. Never errors, never mutates;
/// flags are diagnostic signals only (spec.md §7 Integrity).
pub fn verify_integrity(hash: &Cid) -> IntegrityReport {
    let bytes = hash.as_bytes();
    let all_zeros = bytes.iter().all(|&b| b == 0);
    let all_ones = bytes.iter().all(|&b| b == 0xff);
    let repeating_pattern = has_repeating_pattern(bytes);
    let entropy_score = shannon_entropy(bytes);

    let valid = !all_zeros && !all_ones && !repeating_pattern && entropy_score > 0.5;
    IntegrityReport {
        valid,
        indicators: IntegrityIndicators {
            all_zeros,
            all_ones,
            repeating_pattern,
            entropy_score,
        },
    }
}

/// True if the hash is made of some period-`p` repeat for `p` in `1..16`
/// (a real BLAKE3 output essentially never is; this catches corrupted or
/// hand-crafted inputs like all-same-byte or alternating patterns).
fn has_repeating_pattern(bytes: &[u8; 32]) -> bool {
    (1..16).any(|period| bytes.chunks(period).all(|chunk| chunk == &bytes[..chunk.len()]))
}

/// Shannon entropy of the byte distribution, normalized to `[0, 1]` (1.0 =
/// maximal entropy for a byte alphabet, 8 bits).
fn shannon_entropy(bytes: &[u8; 32]) -> f64 {
    let mut counts = [0u32; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }
    let len = bytes.len() as f64;
    let bits = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum::<f64>();
    bits / 8.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactClass {
    Minor,
    Moderate,
    Major,
    Critical,
}

/// Arbitrary byte-diff thresholds (spec.md §9 Open Question: diagnostic
/// only, never a correctness signal).
fn classify_impact(hash_diff_bytes: u32) -> ImpactClass {
    match hash_diff_bytes {
        0..=8 => ImpactClass::Minor,
        9..=16 => ImpactClass::Moderate,
        17..=24 => ImpactClass::Major,
        _ => ImpactClass::Critical,
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub explanation: String,
    pub recommendations: Vec<String>,
    pub impact: Option<ImpactClass>,
}

/// Builds a human-readable explanation and recommendation list from a
/// comparison result. `impact` is `None` when the result was `equal`.
pub fn generate_diagnostics(result: &ComparisonResult) -> Diagnostics {
    if result.equal {
        return Diagnostics {
            explanation: format!("{:?} comparison: no difference detected", result.kind_tag),
            recommendations: vec!["no action required".to_string()],
            impact: None,
        };
    }

    let impact = classify_impact(result.hash_diff_bytes);
    let explanation = format!(
        "{:?} comparison: digests differ in {} of 32 bytes (impact: {:?})",
        result.kind_tag, result.hash_diff_bytes, impact
    );
    let recommendations = match result.kind_tag {
        ComparisonKind::Interface => vec![
            "interface changed: dependents must be scheduled for recompilation".to_string(),
        ],
        ComparisonKind::Semantic => vec![
            "implementation changed: recompile this unit; dependents are unaffected unless \
             its interface also changed"
                .to_string(),
        ],
        ComparisonKind::CompilationUnit => vec![
            "unit drifted from its cached counterpart: re-run change detection".to_string(),
        ],
    };

    Diagnostics {
        explanation,
        recommendations,
        impact: Some(impact),
    }
}

//! Error taxonomy for the incremental compilation core (spec.md §7).

use thiserror::Error;

use crate::graph::NodeId;

/// Errors surfaced by the core's public operations.
///
/// Matches spec.md §7's taxonomy: Input, Graph, Optimizer. Cache errors live
/// in `janus-cache::CacheError` since the cache is a separate crate.
#[derive(Error, Debug)]
pub enum JanusError {
    /// The snapshot had no node for a referenced id where one was required
    /// (extraction itself tolerates this and skips; callers that need the
    /// node and don't get one hit this instead).
    #[error("node not found: {0:?}")]
    NodeNotFound(crate::snapshot::NodeId),

    /// A node's shape was inconsistent with its declared kind.
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// A serialized graph or unit had a layout the reader didn't expect.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// `add_dependency` referenced a node that was never added with `add_node`.
    #[error("dependency graph: unknown node {0:?}")]
    NodeNotFoundInGraph(NodeId),

    /// Interface edges formed a cycle; topological order is undefined.
    #[error("circular dependency among interface edges: {cycle:?}")]
    CircularDependency { cycle: Vec<NodeId> },
}

pub type JanusResult<T> = Result<T, JanusError>;

//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive nodes.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent atoms, derivations and reactors
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! When an atom changes, we traverse the graph to find all affected nodes and
//! mark them as maybe stale. Derivations decide lazily, on their next read,
//! whether they actually need to recompute.
//!
//! # Design Decisions
//!
//! 1. The graph is an arena keyed by [`NodeId`]. Edges are id sets, never
//!    owning references, so the graph never keeps a node's value alive. A
//!    node lives as long as the program holds a handle to it.
//!
//! 2. Every node carries a version. A dependent records the version of each
//!    dependency it read; comparing those against current versions tells it
//!    whether anything it used really changed.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind, StaleState};
pub use scheduler::UpdateScheduler;

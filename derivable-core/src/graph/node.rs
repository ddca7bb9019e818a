//! Graph Nodes
//!
//! This module defines the node metadata that lives in the dependency graph.
//! Values never live here: a node only carries what propagation needs to know
//! (version, staleness, edges) plus a weak hook back to the typed owner.

use std::fmt;
use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use crate::reactive::Reactive;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// A mutable leaf. Has dependents, never dependencies.
    Atom,

    /// A lazily recomputed function of other nodes.
    Derivation,

    /// An observer. Has dependencies but no dependents.
    Reactor,
}

/// Whether a node's cached result can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StaleState {
    /// Up to date with every dependency.
    Fresh,

    /// An ancestor changed. The node must compare its dependencies' versions
    /// before deciding whether to recompute.
    MaybeStale,

    /// Never evaluated; must compute on next read.
    Stale,
}

/// A node in the dependency graph.
pub struct Node {
    id: NodeId,

    kind: NodeKind,

    /// Bumped whenever the node's state materially changes.
    version: u64,

    stale: StaleState,

    /// Nodes this node read during its last evaluation, in read order, with
    /// the version each had at that time.
    dependencies: IndexMap<NodeId, u64>,

    /// Nodes that read this node. Ids only: a dependent never keeps its
    /// dependency's owner alive through the graph.
    dependents: IndexSet<NodeId>,

    /// Refresh hook for derivations, so a dependent can bring it up to date
    /// without knowing its value type.
    hook: Option<Weak<dyn Reactive>>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            version: 0,
            stale: match kind {
                NodeKind::Atom => StaleState::Fresh,
                NodeKind::Derivation => StaleState::Stale,
                NodeKind::Reactor => StaleState::Stale,
            },
            dependencies: IndexMap::new(),
            dependents: IndexSet::new(),
            hook: None,
        }
    }

    /// Attach the refresh hook used by dependents.
    pub fn with_hook(mut self, hook: Weak<dyn Reactive>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record a material change.
    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn stale_state(&self) -> StaleState {
        self.stale
    }

    pub fn is_fresh(&self) -> bool {
        self.stale == StaleState::Fresh
    }

    pub fn mark_fresh(&mut self) {
        self.stale = StaleState::Fresh;
    }

    /// Mark the node as possibly stale. A never-evaluated node stays `Stale`.
    pub fn mark_maybe_stale(&mut self) {
        if self.stale == StaleState::Fresh {
            self.stale = StaleState::MaybeStale;
        }
    }

    /// The refresh hook, if the owner is still alive.
    pub fn hook(&self) -> Option<std::rc::Rc<dyn Reactive>> {
        self.hook.as_ref().and_then(Weak::upgrade)
    }

    /// Add a dependency observed at `version`.
    pub fn add_dependency(&mut self, node_id: NodeId, version: u64) {
        self.dependencies.insert(node_id, version);
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    pub fn dependencies(&self) -> &IndexMap<NodeId, u64> {
        &self.dependencies
    }

    /// Replace the whole dependency map, returning the previous one.
    pub fn set_dependencies(
        &mut self,
        dependencies: IndexMap<NodeId, u64>,
    ) -> IndexMap<NodeId, u64> {
        std::mem::replace(&mut self.dependencies, dependencies)
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("stale", &self.stale)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish()
    }
}

//! Update Scheduler
//!
//! The scheduler owns the node arena and decides the order in which reactors
//! re-evaluate after a mutation.
//!
//! # Algorithm
//!
//! 1. The mutated atom bumps its version.
//! 2. A breadth-first walk marks every transitive dependent "maybe stale",
//!    visiting each node once even when it is reachable along several paths.
//! 3. The marked set is sorted topologically (dependencies before dependents).
//! 4. Reactors in the sorted set are appended to the pending queue.
//!
//! Nothing is recomputed here. Derivations pull on read: a "maybe stale"
//! derivation compares the versions it observed against its dependencies'
//! current versions and recomputes only if one of them moved.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind, StaleState};
use crate::reactive::Reactive;

/// The update scheduler manages the dependency graph and the reactor queue.
#[derive(Default)]
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,

    /// Reactors that have not stopped. The graph owns them: an active
    /// reactor stays alive until it stops.
    reactors: HashMap<NodeId, Rc<dyn Reactive>>,

    /// Reactors waiting to re-evaluate, in firing order. May hold ids that
    /// were removed after being queued; `queued` is authoritative.
    pending: VecDeque<NodeId>,

    /// Members of `pending` that are still waiting.
    queued: HashSet<NodeId>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Register a reactor node and take ownership of its evaluator.
    pub fn add_reactor(&mut self, node: Node, reactor: Rc<dyn Reactive>) -> NodeId {
        let id = self.add_node(node);
        self.reactors.insert(id, reactor);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node. If the node was a reactor,
    /// its evaluator is handed back so the caller can drop it outside any
    /// borrow of the scheduler.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Rc<dyn Reactive>> {
        self.queued.remove(&node_id);

        if let Some(node) = self.nodes.remove(&node_id) {
            // Remove this node from its dependencies' dependent lists
            for dep_id in node.dependencies().keys() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                }
            }

            // Remove this node from its dependents' dependency lists
            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }

        self.reactors.remove(&node_id)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Current version of a node, if it is registered.
    pub fn version(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::version)
    }

    /// Staleness of a node. Unknown nodes are treated as never computed.
    pub fn stale_state(&self, node_id: NodeId) -> StaleState {
        self.nodes
            .get(&node_id)
            .map_or(StaleState::Stale, Node::stale_state)
    }

    /// Refresh hook of a node, if it has one and its owner is alive.
    pub fn hook(&self, node_id: NodeId) -> Option<Rc<dyn Reactive>> {
        self.nodes.get(&node_id).and_then(Node::hook)
    }

    /// Dependencies of a node with the versions observed at its last evaluation.
    pub fn observed_versions(&self, node_id: NodeId) -> SmallVec<[(NodeId, u64); 8]> {
        self.nodes
            .get(&node_id)
            .map(|node| {
                node.dependencies()
                    .iter()
                    .map(|(id, version)| (*id, *version))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// This means when `dependency` changes, `dependent` may need to update.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        let version = match self.nodes.get_mut(&dependency) {
            Some(dep_node) => {
                dep_node.add_dependent(dependent);
                dep_node.version()
            }
            None => 0,
        };
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency, version);
        }
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace a node's dependency set with the one captured by its latest
    /// evaluation.
    ///
    /// Edges to nodes no longer read are removed, edges to newly read nodes
    /// are added, and every dependency's current version is recorded as the
    /// observed version. Reads of unregistered nodes (constants) are kept with
    /// version 0. Does nothing if `node_id` is not registered.
    pub fn replace_dependencies(&mut self, node_id: NodeId, captured: &IndexSet<NodeId>) {
        if !self.nodes.contains_key(&node_id) {
            return;
        }

        let observed: IndexMap<NodeId, u64> = captured
            .iter()
            .map(|dep| (*dep, self.version(*dep).unwrap_or(0)))
            .collect();

        let previous = match self.nodes.get_mut(&node_id) {
            Some(node) => node.set_dependencies(observed),
            None => return,
        };

        for removed in previous.keys().filter(|dep| !captured.contains(*dep)) {
            self.remove_edge(*removed, node_id);
        }
        for added in captured.iter().filter(|dep| !previous.contains_key(*dep)) {
            self.add_edge(*added, node_id);
        }
    }

    /// Mark a source node as changed and propagate staleness.
    ///
    /// Bumps the source's version, marks every transitive dependent "maybe
    /// stale" and queues the reactors among them in topological order.
    /// Returns the marked nodes, sorted.
    pub fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the source node's direct dependents
        if let Some(source) = self.nodes.get_mut(&source_id) {
            source.bump_version();
            queue.extend(source.dependents().iter().copied());
        }

        // BFS to propagate maybe-stale status
        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }

            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_stale();
                to_process.push(node_id);

                // Propagate to dependents
                queue.extend(node.dependents().iter().copied());
            }
        }

        // Sort topologically so dependencies are processed first
        let sorted = self.topological_sort(to_process);

        for node_id in &sorted {
            let is_reactor = self
                .nodes
                .get(node_id)
                .is_some_and(|node| node.kind() == NodeKind::Reactor);
            if is_reactor && self.queued.insert(*node_id) {
                self.pending.push_back(*node_id);
            }
        }

        sorted
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .keys()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Take the next queued reactor that is still registered.
    pub fn next_pending_reactor(&mut self) -> Option<(NodeId, Rc<dyn Reactive>)> {
        while let Some(node_id) = self.pending.pop_front() {
            if !self.queued.remove(&node_id) {
                continue;
            }
            if let Some(reactor) = self.reactors.get(&node_id) {
                return Some((node_id, Rc::clone(reactor)));
            }
        }
        None
    }

    /// Drop every queued reactor without running it.
    pub fn clear_pending(&mut self) -> usize {
        let cleared = self.queued.len();
        self.pending.clear();
        self.queued.clear();
        cleared
    }

    pub fn pending_count(&self) -> usize {
        self.queued.len()
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of reactors that have not stopped.
    pub fn reactor_count(&self) -> usize {
        self.reactors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingReactor {
        runs: Cell<u32>,
    }

    impl Reactive for CountingReactor {
        fn update(&self) {
            self.runs.set(self.runs.get() + 1);
        }
    }

    fn fresh(kind: NodeKind) -> Node {
        let mut node = Node::new(NodeId::new(), kind);
        node.mark_fresh();
        node
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let id1 = scheduler.add_node(fresh(NodeKind::Atom));
        let id2 = scheduler.add_node(fresh(NodeKind::Derivation));

        assert_eq!(scheduler.node_count(), 2);

        scheduler.remove_node(id1);
        assert_eq!(scheduler.node_count(), 1);
        assert!(scheduler.get_node(id1).is_none());
        assert!(scheduler.get_node(id2).is_some());
    }

    #[test]
    fn add_and_remove_edges() {
        let mut scheduler = UpdateScheduler::new();

        let source_id = scheduler.add_node(fresh(NodeKind::Atom));
        let derived_id = scheduler.add_node(fresh(NodeKind::Derivation));

        scheduler.add_edge(source_id, derived_id);

        assert!(scheduler
            .get_node(source_id)
            .unwrap()
            .dependents()
            .contains(&derived_id));
        assert!(scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .contains_key(&source_id));

        scheduler.remove_edge(source_id, derived_id);

        assert!(scheduler.get_node(source_id).unwrap().dependents().is_empty());
        assert!(scheduler
            .get_node(derived_id)
            .unwrap()
            .dependencies()
            .is_empty());
    }

    #[test]
    fn removing_a_node_removes_its_edges() {
        let mut scheduler = UpdateScheduler::new();

        let source_id = scheduler.add_node(fresh(NodeKind::Atom));
        let derived_id = scheduler.add_node(fresh(NodeKind::Derivation));
        scheduler.add_edge(source_id, derived_id);

        scheduler.remove_node(derived_id);
        assert!(scheduler.get_node(source_id).unwrap().dependents().is_empty());
    }

    #[test]
    fn replace_dependencies_diffs_edges() {
        let mut scheduler = UpdateScheduler::new();

        let a = scheduler.add_node(fresh(NodeKind::Atom));
        let b = scheduler.add_node(fresh(NodeKind::Atom));
        let c = scheduler.add_node(fresh(NodeKind::Atom));
        let derived = scheduler.add_node(fresh(NodeKind::Derivation));

        scheduler.replace_dependencies(derived, &IndexSet::from([a, b]));
        assert!(scheduler.get_node(a).unwrap().dependents().contains(&derived));
        assert!(scheduler.get_node(b).unwrap().dependents().contains(&derived));

        scheduler.mark_changed(c);
        scheduler.replace_dependencies(derived, &IndexSet::from([b, c]));

        assert!(!scheduler.get_node(a).unwrap().dependents().contains(&derived));
        assert!(scheduler.get_node(c).unwrap().dependents().contains(&derived));

        let observed = scheduler.observed_versions(derived);
        assert_eq!(observed.as_slice(), &[(b, 0), (c, 1)]);
    }

    #[test]
    fn mark_changed_propagates() {
        let mut scheduler = UpdateScheduler::new();

        // Create a chain: source -> derived1 -> derived2
        let source_id = scheduler.add_node(fresh(NodeKind::Atom));
        let derived1_id = scheduler.add_node(fresh(NodeKind::Derivation));
        let derived2_id = scheduler.add_node(fresh(NodeKind::Derivation));

        scheduler.add_edge(source_id, derived1_id);
        scheduler.add_edge(derived1_id, derived2_id);

        let to_process = scheduler.mark_changed(source_id);

        // Both derived nodes should be marked
        assert_eq!(to_process, vec![derived1_id, derived2_id]);
        assert_eq!(scheduler.version(source_id), Some(1));
        assert_eq!(
            scheduler.stale_state(derived2_id),
            StaleState::MaybeStale
        );
    }

    #[test]
    fn diamond_is_marked_once_in_dependency_order() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(fresh(NodeKind::Atom));
        let left = scheduler.add_node(fresh(NodeKind::Derivation));
        let right = scheduler.add_node(fresh(NodeKind::Derivation));
        let join = scheduler.add_node(fresh(NodeKind::Derivation));

        scheduler.add_edge(source, left);
        scheduler.add_edge(source, right);
        scheduler.add_edge(left, join);
        scheduler.add_edge(right, join);

        let to_process = scheduler.mark_changed(source);
        assert_eq!(to_process.len(), 3);
        assert_eq!(to_process.last(), Some(&join));
    }

    #[test]
    fn reactors_are_queued_once() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(fresh(NodeKind::Atom));
        let derived = scheduler.add_node(fresh(NodeKind::Derivation));
        let reactor = Rc::new(CountingReactor { runs: Cell::new(0) });
        let reactor_id = scheduler.add_reactor(fresh(NodeKind::Reactor), reactor.clone());

        scheduler.add_edge(source, derived);
        scheduler.add_edge(source, reactor_id);
        scheduler.add_edge(derived, reactor_id);

        scheduler.mark_changed(source);
        scheduler.mark_changed(source);
        assert_eq!(scheduler.pending_count(), 1);

        let (next_id, next) = scheduler.next_pending_reactor().expect("queued reactor");
        assert_eq!(next_id, reactor_id);
        next.update();
        assert_eq!(reactor.runs.get(), 1);
        assert!(scheduler.next_pending_reactor().is_none());
    }

    #[test]
    fn removed_reactors_leave_the_queue() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(fresh(NodeKind::Atom));
        let reactor = Rc::new(CountingReactor { runs: Cell::new(0) });
        let reactor_id = scheduler.add_reactor(fresh(NodeKind::Reactor), reactor);
        scheduler.add_edge(source, reactor_id);

        scheduler.mark_changed(source);
        assert!(scheduler.remove_node(reactor_id).is_some());
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.reactor_count(), 0);
        assert!(scheduler.get_node(source).unwrap().dependents().is_empty());
        assert!(scheduler.next_pending_reactor().is_none());
    }

    #[test]
    fn queue_keeps_marking_order_and_can_requeue() {
        let mut scheduler = UpdateScheduler::new();

        let source = scheduler.add_node(fresh(NodeKind::Atom));
        let ids: Vec<_> = (0..3)
            .map(|_| {
                let reactor = Rc::new(CountingReactor { runs: Cell::new(0) });
                let id = scheduler.add_reactor(fresh(NodeKind::Reactor), reactor);
                scheduler.add_edge(source, id);
                id
            })
            .collect();

        scheduler.mark_changed(source);
        scheduler.remove_node(ids[1]);
        assert_eq!(scheduler.pending_count(), 2);

        let (first, _) = scheduler.next_pending_reactor().expect("first reactor");
        assert_eq!(first, ids[0]);

        // A reactor that already ran in this pass can be queued again.
        scheduler.mark_changed(source);
        let order: Vec<_> = std::iter::from_fn(|| scheduler.next_pending_reactor())
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, vec![ids[2], ids[0]]);
    }
}

//! # Chains and Anchors
//!
//! The ordered-list primitive every kernel queue is built from.
//!
//! ## Design
//!
//! Entities live in an [`Arena`] and are addressed by stable [`NodeId`]s.
//! Each node carries its own `prev`/`next` links, so one entity can move
//! between queues without reallocating. An [`Anchor`] only marks the first
//! and last node of one chain; it never owns the entities.
//!
//! Several anchors may share one arena (the ready chain and every semaphore
//! wait chain share the process-link arena). A node belongs to at most one
//! chain at a time. The arena tracks whether a node is linked, but not
//! *which* chain it is on: unchaining a node through the wrong anchor is a
//! caller error.
//!
//! All operations are O(1) except iteration.

use serde::{Deserialize, Serialize};

/// Stable index of a node inside an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the raw arena index
    pub fn index(self) -> usize {
        self.0
    }
}

/// First and last node of one chain
///
/// `first` is `None` exactly when the chain is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Anchor {
    first: Option<NodeId>,
    last: Option<NodeId>,
}

impl Anchor {
    /// Creates an empty anchor
    pub const fn new() -> Self {
        Self {
            first: None,
            last: None,
        }
    }

    /// Returns the head of the chain
    pub fn first(&self) -> Option<NodeId> {
        self.first
    }

    /// Returns the tail of the chain
    pub fn last(&self) -> Option<NodeId> {
        self.last
    }

    /// Returns whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

#[derive(Debug)]
struct Node<T> {
    prev: Option<NodeId>,
    next: Option<NodeId>,
    linked: bool,
    value: Option<T>,
}

/// Storage for chainable entities
#[derive(Debug)]
pub struct Arena<T> {
    nodes: Vec<Node<T>>,
    vacant: Vec<usize>,
}

impl<T> Arena<T> {
    /// Creates an empty arena
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
        }
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.nodes.len() - self.vacant.len()
    }

    /// Returns whether the arena holds no entities
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a value in a new, unchained node
    pub fn insert(&mut self, value: T) -> NodeId {
        let node = Node {
            prev: None,
            next: None,
            linked: false,
            value: Some(value),
        };
        match self.vacant.pop() {
            Some(index) => {
                self.nodes[index] = node;
                NodeId(index)
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Removes a node and returns its value
    ///
    /// The node must already be unchained; a linked node is left in place
    /// and `None` is returned.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        let node = self.nodes.get_mut(id.0)?;
        if node.linked {
            return None;
        }
        let value = node.value.take()?;
        self.vacant.push(id.0);
        Some(value)
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.nodes.get(id.0).and_then(|node| node.value.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes.get_mut(id.0).and_then(|node| node.value.as_mut())
    }

    /// Returns whether the node is currently on some chain
    pub fn is_linked(&self, id: NodeId) -> bool {
        self.nodes.get(id.0).map(|node| node.linked).unwrap_or(false)
    }

    /// Links `id` immediately after `after`, or at the head when `after` is `None`
    ///
    /// Linking a node that is already on a chain is ignored.
    pub fn chain(&mut self, anchor: &mut Anchor, after: Option<NodeId>, id: NodeId) {
        if self.nodes.get(id.0).map_or(true, |node| node.linked || node.value.is_none()) {
            return;
        }

        let next = match after {
            Some(prev) => self.nodes[prev.0].next,
            None => anchor.first,
        };

        {
            let node = &mut self.nodes[id.0];
            node.prev = after;
            node.next = next;
            node.linked = true;
        }

        match after {
            Some(prev) => self.nodes[prev.0].next = Some(id),
            None => anchor.first = Some(id),
        }
        match next {
            Some(next) => self.nodes[next.0].prev = Some(id),
            None => anchor.last = Some(id),
        }
    }

    /// Removes `id` from the chain rooted at `anchor` and returns its payload
    ///
    /// Returns `None` without touching the anchor when the node is not linked.
    pub fn unchain(&mut self, anchor: &mut Anchor, id: NodeId) -> Option<&T> {
        let (prev, next) = match self.nodes.get(id.0) {
            Some(node) if node.linked => (node.prev, node.next),
            _ => return None,
        };

        match prev {
            Some(prev) => self.nodes[prev.0].next = next,
            None => anchor.first = next,
        }
        match next {
            Some(next) => self.nodes[next.0].prev = prev,
            None => anchor.last = prev,
        }

        let node = &mut self.nodes[id.0];
        node.prev = None;
        node.next = None;
        node.linked = false;
        node.value.as_ref()
    }

    /// Links at the head
    pub fn push(&mut self, anchor: &mut Anchor, id: NodeId) {
        self.chain(anchor, None, id);
    }

    /// Links at the tail
    pub fn queue(&mut self, anchor: &mut Anchor, id: NodeId) {
        let last = anchor.last;
        self.chain(anchor, last, id);
    }

    /// Unlinks the head
    pub fn pop(&mut self, anchor: &mut Anchor) -> Option<NodeId> {
        let first = anchor.first?;
        self.unchain(anchor, first);
        Some(first)
    }

    /// Successor of a linked node
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.next)
    }

    /// Predecessor of a linked node
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.prev)
    }

    /// Walks a chain from head to tail
    pub fn iter<'a>(&'a self, anchor: &Anchor) -> ChainIter<'a, T> {
        ChainIter {
            arena: self,
            cursor: anchor.first,
        }
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over `(NodeId, &T)` pairs of one chain
pub struct ChainIter<'a, T> {
    arena: &'a Arena<T>,
    cursor: Option<NodeId>,
}

impl<'a, T> Iterator for ChainIter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.arena.nodes.get(id.0)?;
        self.cursor = node.next;
        node.value.as_ref().map(|value| (id, value))
    }
}

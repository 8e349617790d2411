//! # Ordered List
//!
//! A circular, doubly-linked list kept sorted ascending by an unsigned key,
//! with a sentinel (`end`) and a movable iterator. The kernel uses one list
//! type for three jobs:
//!
//! | Use | Key | Behaviour |
//! |-----|-----|-----------|
//! | Ready ring (one per priority) | task priority | all keys equal, so the list is a FIFO ring rotated by the iterator |
//! | Delay queue | absolute wake tick | earliest deadline at the minimum |
//! | Semaphore wait queue | waiter priority | highest-priority waiter at the maximum |
//!
//! ## Arena-indexed links
//!
//! Nodes are not owned by the list. They live in a [`NodeStore`] (the task
//! table in the kernel, a plain `[Node; N]` in tests) and are addressed by
//! [`NodeId`]. The list header stores only its length, the links of its
//! sentinel and the iterator position; every operation borrows the store.
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!   ┌─────────────┐    ┌──────┐    ┌──────┐    ┌──────┐ │
//!   │ end (MAX)   │───►│ k=1  │───►│ k=1  │───►│ k=3  │─┘
//!   │ first/last  │◄───│      │◄───│      │◄───│      │
//!   └─────────────┘    └──────┘    └──────┘    └──────┘
//!                         min                    max
//! ```
//!
//! Each list draws a [`ListId`] the first time a node is linked into it and
//! stamps it on its members. Membership is decided by that id, so lists of
//! the same kind sharing one store cannot claim each other's nodes.

use core::sync::atomic::{AtomicU32, Ordering};

/// Key carried by the sentinel. Inserting with this key appends at the
/// very end of the list.
pub const END_KEY: u32 = u32::MAX;

/// Index of a node inside a [`NodeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u16);

impl NodeId {
    pub const fn new(index: usize) -> Self {
        Self(index as u16)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of one [`OrderedList`]. Zero means no id drawn yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListId(u32);

impl ListId {
    pub const NONE: ListId = ListId(0);

    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies which kind of list a node is linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTag {
    /// Ready ring of the given priority.
    Ready(u8),
    /// The kernel delay queue.
    Delayed,
    /// A semaphore wait queue.
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// The sentinel of the list the node is linked into.
    End,
    Node(NodeId),
}

/// Link state embedded in the entity that owns it.
#[derive(Debug, Clone, Copy)]
pub struct Node {
    key: u32,
    list: Option<ListTag>,
    owner: ListId,
    prev: Link,
    next: Link,
}

impl Node {
    /// A node that is not part of any list.
    pub const UNLINKED: Node = Node {
        key: 0,
        list: None,
        owner: ListId::NONE,
        prev: Link::End,
        next: Link::End,
    };

    /// Key the node was last inserted with.
    #[inline]
    pub fn key(&self) -> u32 {
        self.key
    }

    /// The list this node is currently linked into, if any.
    #[inline]
    pub fn list(&self) -> Option<ListTag> {
        self.list
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.list.is_some()
    }
}

/// Storage that resolves a [`NodeId`] to its link state.
pub trait NodeStore {
    fn node(&self, id: NodeId) -> &Node;
    fn node_mut(&mut self, id: NodeId) -> &mut Node;
}

impl<const N: usize> NodeStore for [Node; N] {
    fn node(&self, id: NodeId) -> &Node {
        &self[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self[id.index()]
    }
}

/// Sentinel-based sorted list header.
///
/// Invariants:
/// - real nodes are sorted ascending by key; equal keys keep insertion order
/// - `iterator` is `Some` exactly when `len > 0`
/// - every linked node carries this list's tag and id
#[derive(Debug)]
pub struct OrderedList {
    tag: ListTag,
    id: ListId,
    len: u32,
    /// `end.next`
    first: Link,
    /// `end.prev`
    last: Link,
    iterator: Option<NodeId>,
}

impl OrderedList {
    pub const fn new(tag: ListTag) -> Self {
        Self {
            tag,
            id: ListId::NONE,
            len: 0,
            first: Link::End,
            last: Link::End,
            iterator: None,
        }
    }

    /// Reset to empty. Nodes still pointing at this list are not touched;
    /// the list draws a fresh id on its next insert, so they no longer
    /// count as members.
    pub fn init(&mut self) {
        self.id = ListId::NONE;
        self.len = 0;
        self.first = Link::End;
        self.last = Link::End;
        self.iterator = None;
    }

    #[inline]
    pub fn tag(&self) -> ListTag {
        self.tag
    }

    /// Id stamped on this list's members, [`ListId::NONE`] until the first
    /// insert.
    #[inline]
    pub fn id(&self) -> ListId {
        self.id
    }

    /// Whether `node` is linked into this list.
    #[inline]
    pub fn contains<S: NodeStore>(&self, store: &S, node: NodeId) -> bool {
        let n = store.node(node);
        n.is_linked() && self.id != ListId::NONE && n.owner == self.id
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Node with the smallest key (oldest among equals).
    #[inline]
    pub fn min(&self) -> Option<NodeId> {
        Self::as_node(self.first)
    }

    /// Node with the largest key (newest among equals).
    #[inline]
    pub fn max(&self) -> Option<NodeId> {
        Self::as_node(self.last)
    }

    pub fn min_key<S: NodeStore>(&self, store: &S) -> Option<u32> {
        self.min().map(|id| store.node(id).key)
    }

    pub fn max_key<S: NodeStore>(&self, store: &S) -> Option<u32> {
        self.max().map(|id| store.node(id).key)
    }

    /// Node the iterator currently references.
    #[inline]
    pub fn iterator(&self) -> Option<NodeId> {
        self.iterator
    }

    /// Link `node` after the last node whose key is `<= key`.
    ///
    /// Inserting with [`END_KEY`] appends at the absolute end. The first
    /// node inserted into an empty list becomes the iterator target.
    /// Returns the new length.
    pub fn insert<S: NodeStore>(&mut self, store: &mut S, node: NodeId, key: u32) -> u32 {
        debug_assert!(!store.node(node).is_linked(), "node already linked");
        store.node_mut(node).key = key;

        let at = if key == END_KEY {
            self.last
        } else {
            let mut at = Link::End;
            loop {
                let next = self.next_link(store, at);
                if Self::key_of(store, next) <= key {
                    at = next;
                } else {
                    break at;
                }
            }
        };

        self.splice_after(store, at, node);
        if self.len == 1 {
            self.iterator = Some(node);
        }
        self.len
    }

    /// Link `node` directly after the iterator and move the iterator to it.
    ///
    /// No key scan is done: the caller guarantees `key` keeps the list
    /// sorted at that position (in practice: equal to its neighbours' key).
    /// Falls back to [`insert`](Self::insert) on an empty list.
    pub fn iter_insert<S: NodeStore>(&mut self, store: &mut S, node: NodeId, key: u32) -> u32 {
        let Some(at) = self.iterator else {
            return self.insert(store, node, key);
        };
        debug_assert!(!store.node(node).is_linked(), "node already linked");
        store.node_mut(node).key = key;

        self.splice_after(store, Link::Node(at), node);
        self.iterator = Some(node);
        self.len
    }

    /// Unlink `node` in O(1). Returns the remaining length.
    ///
    /// A node that is not linked into this list, including one linked
    /// into another list of the same kind, is left alone. If the iterator
    /// referenced `node` it moves on to the next logical node, or is
    /// cleared when the list becomes empty.
    pub fn remove<S: NodeStore>(&mut self, store: &mut S, node: NodeId) -> u32 {
        if !self.contains(store, node) {
            return self.len;
        }

        if self.iterator == Some(node) {
            self.iterator = if self.len == 1 {
                None
            } else {
                Some(self.next_logical(store, node))
            };
        }

        let Node { prev, next, .. } = *store.node(node);
        self.set_next(store, prev, next);
        self.set_prev(store, next, prev);

        let n = store.node_mut(node);
        n.list = None;
        n.owner = ListId::NONE;
        n.prev = Link::End;
        n.next = Link::End;

        self.len -= 1;
        self.len
    }

    /// Next node in traversal order, wrapping past the sentinel.
    ///
    /// `node` must be linked into this list. A lone node is its own
    /// successor.
    pub fn next_logical<S: NodeStore>(&self, store: &S, node: NodeId) -> NodeId {
        match store.node(node).next {
            Link::Node(next) => next,
            Link::End => Self::as_node(self.first).unwrap_or(node),
        }
    }

    /// Return the iterator target and advance the iterator one step.
    pub fn take_iterator<S: NodeStore>(&mut self, store: &S) -> Option<NodeId> {
        let current = self.iterator?;
        self.iterator = Some(self.next_logical(store, current));
        Some(current)
    }

    /// Walk the list from minimum to maximum.
    pub fn iter<'a, S: NodeStore>(&self, store: &'a S) -> Iter<'a, S> {
        Iter {
            store,
            next: self.first,
        }
    }

    /// Check the structural invariants against the store: link symmetry,
    /// tags, sort order, length and iterator membership.
    pub fn is_consistent<S: NodeStore>(&self, store: &S) -> bool {
        let mut count = 0u32;
        let mut prev = Link::End;
        let mut prev_key = 0u32;
        let mut at = self.first;
        let mut iterator_seen = self.iterator.is_none();

        while let Link::Node(id) = at {
            let node = store.node(id);
            let owned = node.list == Some(self.tag) && node.owner == self.id;
            if !owned || node.prev != prev || node.key < prev_key {
                return false;
            }
            if self.iterator == Some(id) {
                iterator_seen = true;
            }
            count += 1;
            if count > self.len {
                return false;
            }
            prev = at;
            prev_key = node.key;
            at = node.next;
        }

        prev == self.last
            && count == self.len
            && iterator_seen
            && (self.len == 0) == self.iterator.is_none()
    }

    fn as_node(link: Link) -> Option<NodeId> {
        match link {
            Link::Node(id) => Some(id),
            Link::End => None,
        }
    }

    fn key_of<S: NodeStore>(store: &S, link: Link) -> u32 {
        match link {
            Link::End => END_KEY,
            Link::Node(id) => store.node(id).key,
        }
    }

    fn next_link<S: NodeStore>(&self, store: &S, at: Link) -> Link {
        match at {
            Link::End => self.first,
            Link::Node(id) => store.node(id).next,
        }
    }

    fn set_next<S: NodeStore>(&mut self, store: &mut S, at: Link, to: Link) {
        match at {
            Link::End => self.first = to,
            Link::Node(id) => store.node_mut(id).next = to,
        }
    }

    fn set_prev<S: NodeStore>(&mut self, store: &mut S, at: Link, to: Link) {
        match at {
            Link::End => self.last = to,
            Link::Node(id) => store.node_mut(id).prev = to,
        }
    }

    fn splice_after<S: NodeStore>(&mut self, store: &mut S, at: Link, node: NodeId) {
        if self.id == ListId::NONE {
            self.id = ListId::next();
        }
        let next = self.next_link(store, at);
        {
            let n = store.node_mut(node);
            n.list = Some(self.tag);
            n.owner = self.id;
            n.prev = at;
            n.next = next;
        }
        self.set_next(store, at, Link::Node(node));
        self.set_prev(store, next, Link::Node(node));
        self.len += 1;
    }
}

/// Iterator over the node ids of an [`OrderedList`], minimum first.
pub struct Iter<'a, S> {
    store: &'a S,
    next: Link,
}

impl<S: NodeStore> Iterator for Iter<'_, S> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        match self.next {
            Link::End => None,
            Link::Node(id) => {
                self.next = self.store.node(id).next;
                Some(id)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

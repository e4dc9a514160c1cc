use core::fmt;
use core::ops::{Index, IndexMut};
use std::collections::TryReserveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
    Red,
    Black,
}

impl Color {
    /// Returns `true` if the color is [`Red`].
    ///
    /// [`Red`]: Color::Red
    #[must_use]
    pub(crate) fn is_red(self) -> bool {
        matches!(self, Self::Red)
    }

    /// Returns `true` if the color is [`Black`].
    ///
    /// [`Black`]: Color::Black
    #[must_use]
    pub(crate) fn is_black(self) -> bool {
        matches!(self, Self::Black)
    }
}

/// Handle to a node slot. Stays valid until the node is released back to the
/// arena, at which point the slot may be handed out again.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) color: Color,
    pub(crate) parent: Option<NodeId>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
}

impl<K, V> Node<K, V> {
    /// A freshly inserted node: red, no children.
    pub(crate) fn leaf(key: K, value: V, parent: Option<NodeId>) -> Self {
        Self {
            key,
            value,
            color: Color::Red,
            parent,
            left: None,
            right: None,
        }
    }
}

/// Slot storage for tree nodes.
///
/// INVARIANTS:
///  * every `NodeId` handed out by `try_insert` points at an occupied slot
///    until it is passed to `release`
///  * `free` holds exactly the vacant slot indices
pub(crate) struct Arena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
}

impl<K, V> Arena<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `node` and returns its handle. On allocation failure the node
    /// is handed back and the arena is unchanged.
    pub(crate) fn try_insert(
        &mut self,
        node: Node<K, V>,
    ) -> Result<NodeId, (Node<K, V>, TryReserveError)> {
        match self.free.pop() {
            Some(id) => {
                debug_assert!(self.slots[id.index()].is_none());
                self.slots[id.index()] = Some(node);
                Ok(id)
            }
            None => {
                if let Err(err) = self.slots.try_reserve(1) {
                    return Err((node, err));
                }
                debug_assert!(self.slots.len() < u32::MAX as usize);
                let id = NodeId(self.slots.len() as u32);
                self.slots.push(Some(node));
                Ok(id)
            }
        }
    }

    /// Vacates the slot behind `id` and returns the node. The handle is
    /// invalid afterwards.
    pub(crate) fn release(&mut self, id: NodeId) -> Node<K, V> {
        let node = self.slots[id.index()].take();
        self.free.push(id);
        node.unwrap()
    }

    /// Drops all bookkeeping. Callers are expected to have released every
    /// occupied slot first; any stragglers are dropped without ceremony.
    pub(crate) fn reset(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

impl<K, V> Index<NodeId> for Arena<K, V> {
    type Output = Node<K, V>;

    #[inline]
    fn index(&self, id: NodeId) -> &Node<K, V> {
        self.slots[id.index()].as_ref().unwrap()
    }
}

impl<K, V> IndexMut<NodeId> for Arena<K, V> {
    #[inline]
    fn index_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        self.slots[id.index()].as_mut().unwrap()
    }
}

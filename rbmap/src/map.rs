use core::cmp::Ordering;
use core::fmt;
use core::mem;
use std::collections::TryReserveError;

use crate::arena::{Arena, Color, Node, NodeId};

/// Total order over keys, used both for ordering and for equality.
///
/// Implementations must be consistent: `compare(a, b)` is `Less` exactly when
/// `compare(b, a)` is `Greater`, and the order is transitive.
pub trait Compare<K> {
    fn compare(&self, probe: &K, stored: &K) -> Ordering;
}

impl<K, F> Compare<K> for F
where
    F: Fn(&K, &K) -> Ordering,
{
    fn compare(&self, probe: &K, stored: &K) -> Ordering {
        self(probe, stored)
    }
}

/// Orders keys by their `Ord` instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrder;

impl<K: Ord> Compare<K> for NaturalOrder {
    fn compare(&self, probe: &K, stored: &K) -> Ordering {
        probe.cmp(stored)
    }
}

/// Why an insert did not happen. Both variants hand the rejected pair back,
/// so the caller keeps ownership; release hooks never run on it.
pub enum InsertError<K, V> {
    /// The key is already present. The stored entry is untouched.
    Duplicate { key: K, value: V },
    /// Node storage could not grow. The tree and its length are exactly as
    /// they were before the call.
    Alloc {
        key: K,
        value: V,
        source: TryReserveError,
    },
}

impl<K, V> InsertError<K, V> {
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Recovers the key/value pair that was not inserted.
    pub fn into_pair(self) -> (K, V) {
        match self {
            Self::Duplicate { key, value } | Self::Alloc { key, value, .. } => (key, value),
        }
    }
}

// Manual impl so the error type stays usable for `K`/`V` without `Debug`.
impl<K, V> fmt::Debug for InsertError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { .. } => f.write_str("Duplicate"),
            Self::Alloc { source, .. } => f.debug_tuple("Alloc").field(source).finish(),
        }
    }
}

impl<K, V> fmt::Display for InsertError<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate { .. } => f.write_str("key is already present in the map"),
            Self::Alloc { source, .. } => write!(f, "failed to allocate a node: {source}"),
        }
    }
}

impl<K, V> std::error::Error for InsertError<K, V> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Alloc { source, .. } => Some(source),
            Self::Duplicate { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePos {
    Root,
    Left,
    Right,
}

/// A map from keys to values kept sorted by a caller-supplied comparator,
/// backed by a red-black tree.
///
/// Nodes live in an arena and refer to each other through handles, so the
/// arena is the single owner of every node and parent back-links are cheap.
///
/// INVARIANTS (hold between public calls, never mid-mutation):
///  * binary-search order per the comparator
///  * the root, when present, is black
///  * a red node never has a red child
///  * every path from a node down to a vacant position crosses the same
///    number of black nodes
///  * `len` equals the number of nodes reachable from `root`
pub struct RbMap<K, V, C = NaturalOrder> {
    arena: Arena<K, V>,
    root: Option<NodeId>,
    len: usize,
    cmp: C,
    key_release: Option<Box<dyn FnMut(K)>>,
    value_release: Option<Box<dyn FnMut(V)>>,
}

impl<K: Ord, V> RbMap<K, V> {
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<K: Ord, V> Default for RbMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> Drop for RbMap<K, V, C> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K, V, C> RbMap<K, V, C> {
    /// Hook that takes ownership of every removed key. Without it removed
    /// keys are simply dropped.
    pub fn with_key_release(mut self, hook: impl FnMut(K) + 'static) -> Self {
        self.key_release = Some(Box::new(hook));
        self
    }

    /// Hook that takes ownership of every removed value.
    pub fn with_value_release(mut self, hook: impl FnMut(V) + 'static) -> Self {
        self.value_release = Some(Box::new(hook));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every entry, routing keys and values through their release
    /// hooks exactly once each. The map is reusable afterwards; clearing an
    /// already-empty map does nothing.
    pub fn clear(&mut self) {
        // Post-order with an explicit stack: both children are released
        // before their parent, and the call stack stays flat.
        let mut stack = Vec::new();
        if let Some(root) = self.root.take() {
            stack.push((root, false));
        }
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                let Node { key, value, .. } = self.arena.release(id);
                if let Some(hook) = self.key_release.as_mut() {
                    hook(key);
                }
                if let Some(hook) = self.value_release.as_mut() {
                    hook(value);
                }
            } else {
                stack.push((id, true));
                if let Some(right) = self.arena[id].right {
                    stack.push((right, false));
                }
                if let Some(left) = self.arena[id].left {
                    stack.push((left, false));
                }
            }
        }
        self.len = 0;
        self.arena.reset();
    }

    #[inline]
    fn color_of(&self, node: Option<NodeId>) -> Color {
        // Vacant positions count as black.
        node.map_or(Color::Black, |id| self.arena[id].color)
    }

    fn pos(&self, id: NodeId) -> NodePos {
        match self.arena[id].parent {
            None => NodePos::Root,
            Some(p) => {
                if self.arena[p].left == Some(id) {
                    NodePos::Left
                } else {
                    debug_assert_eq!(self.arena[p].right, Some(id));
                    NodePos::Right
                }
            }
        }
    }

    /// Leftmost node of the subtree rooted at `node`.
    fn min_of(&self, mut node: NodeId) -> NodeId {
        while let Some(left) = self.arena[node].left {
            node = left;
        }
        node
    }

    fn rotate_left(&mut self, node: NodeId) {
        //    p                       p
        //    |                       |
        // +-node-+               +-right-+
        // |      |      -->      |       |
        // a  +-right-+       +-node-+    c
        //    |       |       |      |
        //    b       c       a      b
        // where a, b, c can be any subtrees
        let right = self.arena[node].right.unwrap();

        // attach b to node
        let b = self.arena[right].left;
        self.arena[node].right = b;
        if let Some(b) = b {
            self.arena[b].parent = Some(node);
        }

        // attach right to parent
        let parent = self.arena[node].parent;
        match self.pos(node) {
            NodePos::Root => self.root = Some(right),
            NodePos::Left => self.arena[parent.unwrap()].left = Some(right),
            NodePos::Right => self.arena[parent.unwrap()].right = Some(right),
        }
        self.arena[right].parent = parent;

        // attach node to right
        self.arena[right].left = Some(node);
        self.arena[node].parent = Some(right);
    }

    fn rotate_right(&mut self, node: NodeId) {
        //         p              p
        //         |              |
        //     +-node-+       +-left-+
        //     |      |       |      |
        // +-left-+   c  -->  a  +-node-+
        // |      |              |      |
        // a      b              b      c
        // where a, b, c can be any subtrees
        let left = self.arena[node].left.unwrap();

        // attach b to node
        let b = self.arena[left].right;
        self.arena[node].left = b;
        if let Some(b) = b {
            self.arena[b].parent = Some(node);
        }

        // attach left to parent
        let parent = self.arena[node].parent;
        match self.pos(node) {
            NodePos::Root => self.root = Some(left),
            NodePos::Left => self.arena[parent.unwrap()].left = Some(left),
            NodePos::Right => self.arena[parent.unwrap()].right = Some(left),
        }
        self.arena[left].parent = parent;

        // attach node to left
        self.arena[left].right = Some(node);
        self.arena[node].parent = Some(left);
    }

    /// Replaces the subtree rooted at `old` with the one rooted at `new` in
    /// `old`'s parent. `old`'s own links are left untouched.
    fn replace_subtree(&mut self, old: NodeId, new: Option<NodeId>) {
        let parent = self.arena[old].parent;
        match self.pos(old) {
            NodePos::Root => self.root = new,
            NodePos::Left => self.arena[parent.unwrap()].left = new,
            NodePos::Right => self.arena[parent.unwrap()].right = new,
        }
        if let Some(new) = new {
            self.arena[new].parent = parent;
        }
    }
}

impl<K, V, C> RbMap<K, V, C>
where
    C: Compare<K>,
{
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            arena: Arena::new(),
            root: None,
            len: 0,
            cmp,
            key_release: None,
            value_release: None,
        }
    }

    fn find_node(&self, key: &K) -> Option<NodeId> {
        let mut cur = self.root;
        while let Some(id) = cur {
            let node = &self.arena[id];
            cur = match self.cmp.compare(key, &node.key) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Some(id),
            };
        }
        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_node(key).map(|id| &self.arena[id].value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.find_node(key).map(|id| &mut self.arena[id].value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_node(key).is_some()
    }

    /// Inserts `key`/`value`. A duplicate key or an allocation failure hands
    /// the pair back through [`InsertError`] and leaves the map untouched.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), InsertError<K, V>> {
        // Move left/right down the tree until we find an empty slot,
        // remembering the node it hangs off.
        let mut parent = None;
        let mut cur = self.root;
        while let Some(id) = cur {
            parent = Some(id);
            let node = &self.arena[id];
            cur = match self.cmp.compare(&key, &node.key) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Err(InsertError::Duplicate { key, value }),
            };
        }

        let id = match self.arena.try_insert(Node::leaf(key, value, parent)) {
            Ok(id) => id,
            Err((node, source)) => {
                return Err(InsertError::Alloc {
                    key: node.key,
                    value: node.value,
                    source,
                })
            }
        };

        match parent {
            Some(p) => {
                let ord = self.cmp.compare(&self.arena[id].key, &self.arena[p].key);
                match ord {
                    Ordering::Less => self.arena[p].left = Some(id),
                    _ => self.arena[p].right = Some(id),
                }
            }
            None => self.root = Some(id),
        }

        self.len += 1;
        self.insert_fixup(id);
        Ok(())
    }

    fn insert_fixup(&mut self, mut node: NodeId) {
        // The new node is red, so the only possible violation is a red
        // parent. There is at most one such violation at any point in the
        // loop; the "red uncle" branch moves it two levels up, the other
        // branch clears it and terminates.
        loop {
            let parent = match self.arena[node].parent {
                Some(p) if self.arena[p].color.is_red() => p,
                _ => break,
            };
            debug_assert!(self.arena[node].color.is_red());

            // A red parent is never the root, so the grandparent exists.
            let grand = self.arena[parent].parent.unwrap();
            debug_assert!(self.arena[grand].color.is_black());

            match self.pos(parent) {
                NodePos::Root => unreachable!(),
                NodePos::Left => {
                    let uncle = self.arena[grand].right;
                    match uncle {
                        Some(uncle) if self.arena[uncle].color.is_red() => {
                            //     +--- g:b ---+              +--- g:r ---+
                            //     |           |              |           |
                            //  + p:r +     + u:r +   -->  + p:b +     + u:b +
                            //  |     |     |     |        |     |     |     |
                            // n:r    a     b     c       n:r    a     b     c
                            //
                            // Black heights are unchanged; the grandparent
                            // may now clash with its own parent, so continue
                            // from there.
                            self.arena[parent].color = Color::Black;
                            self.arena[uncle].color = Color::Black;
                            self.arena[grand].color = Color::Red;
                            node = grand;
                        }
                        _ => {
                            let mut parent = parent;
                            if self.pos(node) == NodePos::Right {
                                //      +-- g:b --+             +-- g:b --+
                                //      |         |             |         |
                                //  +- p:r -+    u:b  -->   +- n:r -+    u:b
                                //  |       |               |       |
                                //  a  +- n:r -+        +- p:r -+   c
                                //     |       |        |       |
                                //     b       c        a       b
                                //
                                // Straighten the zig-zag so the case below
                                // applies, swapping the two pointers.
                                self.rotate_left(parent);
                                mem::swap(&mut parent, &mut node);
                            }

                            //          +-- g:b --+            +---- p:b ----+
                            //          |         |            |             |
                            //      +- p:r -+    u:b  -->  +- n:r -+    +- g:r -+
                            //      |       |              |       |    |       |
                            //  +- n:r -+   c              a       b    c      u:b
                            //  |       |
                            //  a       b
                            //
                            // This clears the only violation; the loop ends
                            // because the new parent is black.
                            self.arena[parent].color = Color::Black;
                            self.arena[grand].color = Color::Red;
                            self.rotate_right(grand);
                        }
                    }
                }
                NodePos::Right => {
                    // mirror of the Left branch
                    let uncle = self.arena[grand].left;
                    match uncle {
                        Some(uncle) if self.arena[uncle].color.is_red() => {
                            self.arena[parent].color = Color::Black;
                            self.arena[uncle].color = Color::Black;
                            self.arena[grand].color = Color::Red;
                            node = grand;
                        }
                        _ => {
                            let mut parent = parent;
                            if self.pos(node) == NodePos::Left {
                                self.rotate_right(parent);
                                mem::swap(&mut parent, &mut node);
                            }
                            self.arena[parent].color = Color::Black;
                            self.arena[grand].color = Color::Red;
                            self.rotate_left(grand);
                        }
                    }
                }
            }
        }

        if let Some(root) = self.root {
            self.arena[root].color = Color::Black;
        }
    }

    /// Removes `key` if present, routing the removed key and value through
    /// their release hooks. Returns whether an entry was removed.
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(node) = self.find_node(key) else {
            return false;
        };
        self.remove_node(node);
        true
    }

    fn remove_node(&mut self, node: NodeId) {
        // The color that disappears from its structural position, and the
        // position (child handle, possibly vacant, plus its parent) the
        // fixup starts from. A vacant position has no back-link, hence the
        // explicit parent.
        let mut removed_color = self.arena[node].color;
        let fix_node: Option<NodeId>;
        let fix_parent: Option<NodeId>;

        match (self.arena[node].left, self.arena[node].right) {
            (None, child) | (child @ Some(_), None) => {
                // Zero or one child: splice the child into node's position.
                fix_parent = self.arena[node].parent;
                self.replace_subtree(node, child);
                fix_node = child;
            }
            (Some(left), Some(right)) => {
                // Replace node with its in-order successor, the leftmost
                // node of the right subtree. The successor has no left
                // child, so detaching it means relinking its right child
                // into its place.
                let successor = self.min_of(right);
                removed_color = self.arena[successor].color;
                fix_node = self.arena[successor].right;

                if successor == right {
                    // Successor is node's own right child; it stays put and
                    // the vacated position sits directly under it.
                    fix_parent = Some(successor);
                } else {
                    fix_parent = self.arena[successor].parent;
                    self.replace_subtree(successor, fix_node);
                    self.arena[successor].right = Some(right);
                    self.arena[right].parent = Some(successor);
                }

                // Transplant the successor into node's position, taking
                // over its links and color. The node keeps its identity;
                // no payload is copied.
                self.replace_subtree(node, Some(successor));
                self.arena[successor].left = Some(left);
                self.arena[left].parent = Some(successor);
                let color = self.arena[node].color;
                self.arena[successor].color = color;
            }
        }

        // Removing a red node leaves every black height intact.
        if removed_color.is_black() {
            self.remove_fixup(fix_node, fix_parent);
        }

        let Node { key, value, .. } = self.arena.release(node);
        self.len -= 1;
        if let Some(hook) = self.key_release.as_mut() {
            hook(key);
        }
        if let Some(hook) = self.value_release.as_mut() {
            hook(value);
        }
    }

    fn remove_fixup(&mut self, mut node: Option<NodeId>, mut parent: Option<NodeId>) {
        // `node` occupies the position that lost a black node; it carries an
        // extra black that has to be put somewhere. It may be vacant (the
        // removed node had no child there), in which case `parent` is the
        // only way to address the position.
        while node != self.root && self.color_of(node).is_black() {
            let p = parent.unwrap();

            // The position's sibling is always a live node: before the
            // removal both sides of `p` had equal black height >= 1.
            if self.arena[p].left == node {
                let mut sibling = self.arena[p].right.unwrap();

                if self.arena[sibling].color.is_red() {
                    //     +--- p:b ---+              +--- s:b ---+
                    //     |           |              |           |
                    //    n:b      +- s:r -+  -->  +- p:r -+      d
                    //             |       |       |       |
                    //             c       d      n:b      c
                    //
                    // Pull the red sibling up; the new sibling `c` is black,
                    // so one of the cases below applies next.
                    self.arena[sibling].color = Color::Black;
                    self.arena[p].color = Color::Red;
                    self.rotate_left(p);
                    sibling = self.arena[p].right.unwrap();
                }
                debug_assert!(self.arena[sibling].color.is_black());

                let near = self.color_of(self.arena[sibling].left);
                let far = self.color_of(self.arena[sibling].right);

                if near.is_black() && far.is_black() {
                    // Both sibling children black: take one black off both
                    // sides and push the deficiency up to the parent. If the
                    // parent is red the loop ends and it is recolored black
                    // below, absorbing the deficiency.
                    self.arena[sibling].color = Color::Red;
                    node = Some(p);
                    parent = self.arena[p].parent;
                } else {
                    if far.is_black() {
                        //     +- s:b -+            +- c:b -+
                        //     |       |    -->     |       |
                        //  +- c:r -+  d:b          e   +- s:r -+
                        //  |       |                   |       |
                        //  e       f                   f      d:b
                        //
                        // Near child red, far child black: rotate the red
                        // over to the far side so the final case applies.
                        let near_id = self.arena[sibling].left.unwrap();
                        self.arena[near_id].color = Color::Black;
                        self.arena[sibling].color = Color::Red;
                        self.rotate_right(sibling);
                        sibling = self.arena[p].right.unwrap();
                    }

                    //     +--- p:c ---+               +--- s:c ---+
                    //     |           |               |           |
                    //    n:b      +- s:b -+  -->  +- p:b -+      d:b
                    //             |       |       |       |
                    //             c      d:r     n:b      c
                    //
                    // Far child red: the rotation gives every path through
                    // `n` one extra black ancestor, absorbing the
                    // deficiency. Done.
                    let parent_color = self.arena[p].color;
                    self.arena[sibling].color = parent_color;
                    self.arena[p].color = Color::Black;
                    let far_id = self.arena[sibling].right.unwrap();
                    self.arena[far_id].color = Color::Black;
                    self.rotate_left(p);
                    break;
                }
            } else {
                // mirror of the branch above
                let mut sibling = self.arena[p].left.unwrap();

                if self.arena[sibling].color.is_red() {
                    self.arena[sibling].color = Color::Black;
                    self.arena[p].color = Color::Red;
                    self.rotate_right(p);
                    sibling = self.arena[p].left.unwrap();
                }
                debug_assert!(self.arena[sibling].color.is_black());

                let near = self.color_of(self.arena[sibling].right);
                let far = self.color_of(self.arena[sibling].left);

                if near.is_black() && far.is_black() {
                    self.arena[sibling].color = Color::Red;
                    node = Some(p);
                    parent = self.arena[p].parent;
                } else {
                    if far.is_black() {
                        let near_id = self.arena[sibling].right.unwrap();
                        self.arena[near_id].color = Color::Black;
                        self.arena[sibling].color = Color::Red;
                        self.rotate_left(sibling);
                        sibling = self.arena[p].left.unwrap();
                    }

                    let parent_color = self.arena[p].color;
                    self.arena[sibling].color = parent_color;
                    self.arena[p].color = Color::Black;
                    let far_id = self.arena[sibling].left.unwrap();
                    self.arena[far_id].color = Color::Black;
                    self.rotate_right(p);
                    break;
                }
            }
        }

        // A red position absorbs the extra black by turning black; the root
        // swallows it outright.
        if let Some(id) = node {
            self.arena[id].color = Color::Black;
        }
    }
}

impl<K, V, C> fmt::Debug for RbMap<K, V, C>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Entries<'a, K, V, C>(&'a RbMap<K, V, C>);

        impl<K, V, C> fmt::Debug for Entries<'_, K, V, C>
        where
            K: fmt::Debug,
            V: fmt::Debug,
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut list = f.debug_list();
                let mut stack = Vec::new();
                let mut cur = self.0.root;
                while cur.is_some() || !stack.is_empty() {
                    while let Some(id) = cur {
                        stack.push(id);
                        cur = self.0.arena[id].left;
                    }
                    let id = stack.pop().unwrap();
                    let node = &self.0.arena[id];
                    list.entry(&(&node.key, &node.value, node.color));
                    cur = node.right;
                }
                list.finish()
            }
        }

        f.debug_struct("RbMap")
            .field("len", &self.len)
            .field("entries", &Entries(self))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use core::cmp::Ordering;
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Walks the whole tree checking every red-black map invariant:
    /// parent back-links, root blackness, no red-red edge, uniform black
    /// height, strict comparator order, and the length counter.
    fn check_invariants<K, V, C: Compare<K>>(map: &RbMap<K, V, C>) {
        let Some(root) = map.root else {
            assert_eq!(map.len, 0);
            return;
        };
        assert_eq!(map.arena[root].parent, None);
        assert!(map.arena[root].color.is_black(), "root must be black");

        let mut count = 0;
        check_subtree(map, root, &mut count);
        assert_eq!(map.len, count, "len must equal the reachable node count");

        let ids = in_order_ids(map);
        for pair in ids.windows(2) {
            let a = &map.arena[pair[0]].key;
            let b = &map.arena[pair[1]].key;
            assert_eq!(
                map.cmp.compare(a, b),
                Ordering::Less,
                "in-order keys must be strictly increasing"
            );
        }
    }

    /// Returns the black height of the subtree, asserting structure on the
    /// way down.
    fn check_subtree<K, V, C>(map: &RbMap<K, V, C>, id: NodeId, count: &mut usize) -> u32 {
        *count += 1;
        let node = &map.arena[id];
        if node.color.is_red() {
            assert!(
                map.color_of(node.left).is_black() && map.color_of(node.right).is_black(),
                "red node must not have a red child"
            );
        }

        let left_height = match node.left {
            Some(left) => {
                assert_eq!(map.arena[left].parent, Some(id), "broken parent link");
                check_subtree(map, left, count)
            }
            None => 0,
        };
        let right_height = match node.right {
            Some(right) => {
                assert_eq!(map.arena[right].parent, Some(id), "broken parent link");
                check_subtree(map, right, count)
            }
            None => 0,
        };
        assert_eq!(left_height, right_height, "black height mismatch");

        left_height + node.color.is_black() as u32
    }

    fn in_order_ids<K, V, C>(map: &RbMap<K, V, C>) -> Vec<NodeId> {
        fn walk<K, V, C>(map: &RbMap<K, V, C>, node: Option<NodeId>, out: &mut Vec<NodeId>) {
            if let Some(id) = node {
                walk(map, map.arena[id].left, out);
                out.push(id);
                walk(map, map.arena[id].right, out);
            }
        }
        let mut out = Vec::with_capacity(map.len());
        walk(map, map.root, &mut out);
        out
    }

    fn in_order_keys<K: Clone, V, C>(map: &RbMap<K, V, C>) -> Vec<K> {
        in_order_ids(map)
            .into_iter()
            .map(|id| map.arena[id].key.clone())
            .collect()
    }

    fn height<K, V, C>(map: &RbMap<K, V, C>) -> u32 {
        fn walk<K, V, C>(map: &RbMap<K, V, C>, node: Option<NodeId>) -> u32 {
            match node {
                None => 0,
                Some(id) => {
                    1 + walk(map, map.arena[id].left).max(walk(map, map.arena[id].right))
                }
            }
        }
        walk(map, map.root)
    }

    #[test]
    fn insert_and_find() {
        let mut map = RbMap::new();
        assert!(map.insert(10, 100).is_ok());
        assert!(map.insert(20, 200).is_ok());
        assert!(map.insert(30, 300).is_ok());

        assert_eq!(map.get(&10), Some(&100));
        assert_eq!(map.get(&20), Some(&200));
        assert_eq!(map.get(&30), Some(&300));
        assert_eq!(map.get(&40), None);
        assert!(map.contains_key(&10));
        assert!(!map.contains_key(&40));

        assert_eq!(map.len(), 3);
        check_invariants(&map);
    }

    #[test]
    fn insert_duplicate_rejected() {
        let mut map = RbMap::new();
        map.insert(10, 100).unwrap();

        let err = map.insert(10, 200).unwrap_err();
        assert!(err.is_duplicate());
        // the rejected pair comes back to the caller
        assert_eq!(err.into_pair(), (10, 200));

        // the stored entry is untouched
        assert_eq!(map.get(&10), Some(&100));
        assert_eq!(map.len(), 1);
        check_invariants(&map);
    }

    #[test]
    fn remove_middle_then_rest() {
        let mut map = RbMap::new();
        map.insert(10, 100).unwrap();
        map.insert(20, 200).unwrap();
        map.insert(30, 300).unwrap();

        assert!(map.remove(&20));
        assert_eq!(map.get(&20), None);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&10), Some(&100));
        assert_eq!(map.get(&30), Some(&300));
        check_invariants(&map);

        assert!(map.remove(&10));
        assert!(map.remove(&30));
        assert!(map.is_empty());
        check_invariants(&map);
    }

    #[test]
    fn remove_absent_key() {
        let mut map = RbMap::new();
        map.insert(10, 100).unwrap();

        assert!(!map.remove(&20));
        assert_eq!(map.len(), 1);
        check_invariants(&map);
    }

    #[test]
    fn ops_on_empty_map() {
        let mut map = RbMap::<i32, i32>::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.get(&1), None);
        assert!(!map.remove(&1));

        // clearing an empty map is a no-op, twice over
        map.clear();
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn get_mut_updates_value() {
        let mut map = RbMap::new();
        map.insert("a", 1).unwrap();
        map.insert("b", 2).unwrap();

        *map.get_mut(&"a").unwrap() += 10;
        assert_eq!(map.get(&"a"), Some(&11));
        assert_eq!(map.get(&"b"), Some(&2));
        assert_eq!(map.get_mut(&"c"), None);
    }

    #[test]
    fn stepwise_inserts_keep_tree_valid() {
        let mut map = RbMap::new();
        for (i, key) in [12, 5, 9, 2, 18, 15, 13, 17, 19].into_iter().enumerate() {
            map.insert(key, key).unwrap();
            assert_eq!(map.len(), i + 1);
            check_invariants(&map);
        }
        assert_eq!(in_order_keys(&map), vec![2, 5, 9, 12, 13, 15, 17, 18, 19]);
    }

    #[test]
    fn remove_awkward_sequences() {
        // Orders that exercise every delete-fixup case, removal checked
        // step by step.
        let sequences: &[&[i32]] = &[
            &[12, 5, 9, 2, 18, 15, 13, 17, 19],
            &[26, 81, 303, 0],
            &[3836, 3865, 4173, 1635, 4585, 8422, 4412, 2624, 2138, 128],
        ];
        for seq in sequences {
            let mut map = RbMap::new();
            for &key in *seq {
                map.insert(key, key).unwrap();
            }
            check_invariants(&map);

            for &key in *seq {
                assert!(map.remove(&key));
                assert!(!map.contains_key(&key));
                check_invariants(&map);
            }
            assert!(map.is_empty());
        }
    }

    #[test]
    fn string_keys_release_hook_on_teardown() {
        let released = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&released);
        let mut map = RbMap::new().with_key_release(move |key: String| sink.borrow_mut().push(key));

        for key in ["apple", "banana", "cherry"] {
            map.insert(key.to_owned(), key.len()).unwrap();
        }
        assert_eq!(map.len(), 3);

        map.clear();
        assert!(map.is_empty());
        let mut got = released.borrow().clone();
        got.sort();
        assert_eq!(got, ["apple", "banana", "cherry"]);

        // the map is reusable after teardown
        map.insert("date".to_owned(), 4).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"date".to_owned()), Some(&4));
    }

    #[test]
    fn hooks_fire_on_remove_but_not_on_duplicate() {
        let keys = Rc::new(Cell::new(0));
        let values = Rc::new(Cell::new(0));
        let (kc, vc) = (Rc::clone(&keys), Rc::clone(&values));
        let mut map = RbMap::new()
            .with_key_release(move |_k: i32| kc.set(kc.get() + 1))
            .with_value_release(move |_v: i32| vc.set(vc.get() + 1));

        for key in [1, 2, 3, 4, 5] {
            map.insert(key, key * 10).unwrap();
        }
        assert_eq!((keys.get(), values.get()), (0, 0));

        assert!(map.remove(&3));
        assert_eq!((keys.get(), values.get()), (1, 1));

        assert!(!map.remove(&3));
        assert_eq!((keys.get(), values.get()), (1, 1));

        // a rejected pair belongs to the caller, the hooks must not see it
        assert!(map.insert(1, 999).is_err());
        assert_eq!((keys.get(), values.get()), (1, 1));

        map.clear();
        assert_eq!((keys.get(), values.get()), (5, 5));
    }

    #[test]
    fn hooks_fire_on_drop() {
        let released = Rc::new(Cell::new(0));
        {
            let sink = Rc::clone(&released);
            let mut map = RbMap::new().with_value_release(move |_v: i32| sink.set(sink.get() + 1));
            for key in [7, 3, 11] {
                map.insert(key, key).unwrap();
            }
        }
        assert_eq!(released.get(), 3);
    }

    #[test]
    fn custom_comparator_reverses_order() {
        let mut map = RbMap::with_comparator(|a: &i32, b: &i32| b.cmp(a));
        for key in [1, 2, 3, 4, 5] {
            map.insert(key, key * 10).unwrap();
        }
        check_invariants(&map);
        assert_eq!(in_order_keys(&map), vec![5, 4, 3, 2, 1]);

        assert_eq!(map.get(&3), Some(&30));
        assert!(map.remove(&3));
        assert_eq!(in_order_keys(&map), vec![5, 4, 2, 1]);
        check_invariants(&map);
    }

    #[test]
    fn insert_error_reporting() {
        let dup = InsertError::Duplicate { key: 1, value: 2 };
        assert!(dup.is_duplicate());
        assert!(std::error::Error::source(&dup).is_none());
        assert_eq!(dup.to_string(), "key is already present in the map");
        assert_eq!(dup.into_pair(), (1, 2));

        // a real TryReserveError, obtained the only portable way
        let source = Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err();
        let alloc = InsertError::Alloc {
            key: 1,
            value: 2,
            source,
        };
        assert!(!alloc.is_duplicate());
        assert!(std::error::Error::source(&alloc).is_some());
        assert!(alloc.to_string().starts_with("failed to allocate a node"));
        assert_eq!(alloc.into_pair(), (1, 2));
    }

    #[test]
    fn debug_lists_entries_in_order() {
        let mut map = RbMap::new();
        map.insert(2, "b").unwrap();
        map.insert(1, "a").unwrap();
        map.insert(3, "c").unwrap();

        let dbg = format!("{map:?}");
        assert!(dbg.contains("len: 3"), "{dbg}");
        let (a, b, c) = (
            dbg.find("\"a\"").unwrap(),
            dbg.find("\"b\"").unwrap(),
            dbg.find("\"c\"").unwrap(),
        );
        assert!(a < b && b < c, "{dbg}");
    }

    mod proptests {
        use std::collections::hash_map::RandomState;
        use std::collections::{BTreeMap, HashMap};

        use proptest::prelude::*;
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        use super::*;

        #[cfg(not(miri))]
        const MAP_SIZE: usize = 1000;
        #[cfg(miri)]
        const MAP_SIZE: usize = 50;

        #[cfg(not(miri))]
        const PROPTEST_CASES: u32 = 256;
        #[cfg(miri)]
        const PROPTEST_CASES: u32 = 10;

        proptest!(
            #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

            #[test]
            fn insert_get(
                mut inserts in proptest::collection::vec(0..10000i32, 0..MAP_SIZE),
                access in proptest::collection::vec(0..10000i32, 0..10)
            ) {
                let oracle = HashMap::<i32, i32, RandomState>::from_iter(inserts.iter().map(|v| (*v, *v)));
                let mut map = RbMap::new();
                for v in &inserts {
                    // duplicates are rejected, the oracle keeps one copy too
                    let _ = map.insert(*v, *v);
                }
                check_invariants(&map);
                prop_assert_eq!(map.len(), oracle.len());

                inserts.shuffle(&mut thread_rng());
                for key in inserts.iter().chain(access.iter()) {
                    prop_assert_eq!(oracle.get(key), map.get(key));
                }
            }

            #[test]
            fn remove_matches_oracle(
                inserts in proptest::collection::hash_set(0..10000i32, 0..MAP_SIZE),
                access in proptest::collection::vec(0..10000i32, 0..10)
            ) {
                let mut oracle = HashMap::<i32, i32, RandomState>::from_iter(inserts.iter().map(|v| (*v, *v)));
                let mut map = RbMap::new();
                for v in &inserts {
                    map.insert(*v, *v).unwrap();
                }

                let mut inserts: Vec<_> = inserts.into_iter().collect();
                inserts.shuffle(&mut thread_rng());
                for key in inserts.iter().chain(access.iter()) {
                    prop_assert_eq!(oracle.remove(key).is_some(), map.remove(key));
                    check_invariants(&map);
                }
                prop_assert!(map.is_empty());
            }

            #[test]
            fn interleaved_ops_match_oracle(
                ops in proptest::collection::vec((any::<bool>(), 0..500i32), 0..MAP_SIZE)
            ) {
                let mut oracle = BTreeMap::new();
                let mut map = RbMap::new();

                for (is_insert, key) in ops {
                    if is_insert {
                        let expect_new = !oracle.contains_key(&key);
                        oracle.entry(key).or_insert(key.wrapping_mul(3));
                        prop_assert_eq!(map.insert(key, key.wrapping_mul(3)).is_ok(), expect_new);
                    } else {
                        prop_assert_eq!(map.remove(&key), oracle.remove(&key).is_some());
                    }

                    check_invariants(&map);
                    prop_assert_eq!(map.len(), oracle.len());

                    let n = map.len() as f64;
                    prop_assert!(f64::from(height(&map)) <= 2.0 * (n + 1.0).log2() + 1e-9);
                }

                let keys = in_order_keys(&map);
                let expected: Vec<i32> = oracle.keys().copied().collect();
                prop_assert_eq!(keys, expected);
                for (key, value) in &oracle {
                    prop_assert_eq!(map.get(key), Some(value));
                }
            }
        );
    }
}

//! Augmented red-black tree over free disk extents ("holes")
//!
//! The tree is keyed by hole offset. Every node additionally carries the
//! maximum *effective* hole size of its left and right subtrees (effective =
//! what survives rounding the hole's start up to the allocator alignment).
//! These labels let a first-fit search descend in O(log n) instead of
//! scanning holes in offset order.
//!
//! Nodes live in an index-based arena (`Vec<Node>` plus `u32` ids), so the
//! parent/child graph needs no `unsafe` and whole-tree invariant checks are
//! plain functions over the arena.
//!
//! Invariant violations here (overlapping holes, stale labels) mean the
//! allocator has already lost track of disk space, so they panic rather than
//! surface as recoverable errors.

use serde::{Deserialize, Serialize};

/// Index of a node in the tree arena.
pub type NodeId = u32;

/// A maximal contiguous free byte range `[offset, offset + size)`.
///
/// Holes in the tree never overlap and never abut exactly: adjacent holes are
/// merged on insert, so each hole is maximal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hole {
    pub offset: u64,
    pub size: u64,
}

impl Hole {
    pub fn new(offset: u64, size: u64) -> Self {
        Hole { offset, size }
    }

    /// One past the last byte of the hole.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct Node {
    hole: Hole,
    color: Color,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    /// Max effective hole size anywhere in the left subtree.
    left_mhs: u64,
    /// Max effective hole size anywhere in the right subtree.
    right_mhs: u64,
}

/// Round `value` up to the next multiple of `alignment`.
fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// The hole tree. One per [`crate::allocator::BlockAllocator`].
#[derive(Debug, Clone)]
pub struct HoleTree {
    nodes: Vec<Node>,
    /// Recycled arena slots, reused before the arena grows.
    free_slots: Vec<NodeId>,
    root: Option<NodeId>,
    alignment: u64,
    len: usize,
}

impl HoleTree {
    pub fn new(alignment: u64) -> Self {
        assert!(alignment > 0, "alignment must be non-zero");
        HoleTree {
            nodes: Vec::new(),
            free_slots: Vec::new(),
            root: None,
            alignment,
            len: 0,
        }
    }

    /// Number of holes currently tracked.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ---- arena plumbing ----

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    fn new_node(&mut self, hole: Hole, color: Color) -> NodeId {
        let node = Node {
            hole,
            color,
            parent: None,
            left: None,
            right: None,
            left_mhs: 0,
            right_mhs: 0,
        };
        self.len += 1;
        match self.free_slots.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn release_node(&mut self, id: NodeId) {
        self.len -= 1;
        self.free_slots.push(id);
    }

    // ---- augmentation ----

    /// Usable bytes of the hole once its start is rounded up to the
    /// alignment. Zero when the aligned start falls past the hole's end.
    pub fn effective_size(&self, id: NodeId) -> u64 {
        let hole = self.node(id).hole;
        let aligned = align_up(hole.offset, self.alignment);
        if aligned > hole.end() {
            0
        } else {
            hole.end() - aligned
        }
    }

    /// Max effective hole size of the whole subtree rooted at `id`.
    fn mhs_of_subtree(&self, id: NodeId) -> u64 {
        let n = self.node(id);
        self.effective_size(id).max(n.left_mhs).max(n.right_mhs)
    }

    /// Walk from `id` toward the root, refreshing the parent label that
    /// covers `id`'s subtree. Stops as soon as a label is already correct.
    /// Prerequisite: `id`'s own labels are up to date.
    fn recalculate_mhs(&mut self, id: NodeId) {
        let mut child = id;
        while let Some(parent) = self.node(child).parent {
            let subtree = self.mhs_of_subtree(child);
            let p = self.node_mut(parent);
            let slot = if p.left == Some(child) {
                &mut p.left_mhs
            } else if p.right == Some(child) {
                &mut p.right_mhs
            } else {
                return;
            };
            if *slot == subtree {
                return;
            }
            *slot = subtree;
            child = parent;
        }
    }

    // ---- rotations ----
    //
    // Label updates are local: the rotated-down node inherits the pivot's
    // inner label, and the pivot's new child label is recomputed from the
    // (already correct) subtree it now covers.

    fn left_rotate(&mut self, x: NodeId) {
        let y = self.node(x).right.expect("left_rotate requires right child");

        let y_left = self.node(y).left;
        let y_left_mhs = self.node(y).left_mhs;
        self.node_mut(x).right = y_left;
        self.node_mut(x).right_mhs = y_left_mhs;
        if let Some(yl) = y_left {
            self.node_mut(yl).parent = Some(x);
        }

        let x_parent = self.node(x).parent;
        self.node_mut(y).parent = x_parent;
        match x_parent {
            None => self.root = Some(y),
            Some(p) => {
                if self.node(p).left == Some(x) {
                    self.node_mut(p).left = Some(y);
                } else {
                    self.node_mut(p).right = Some(y);
                }
            }
        }

        self.node_mut(y).left = Some(x);
        let x_subtree = self.mhs_of_subtree(x);
        self.node_mut(y).left_mhs = x_subtree;
        self.node_mut(x).parent = Some(y);
    }

    fn right_rotate(&mut self, y: NodeId) {
        let x = self.node(y).left.expect("right_rotate requires left child");

        let x_right = self.node(x).right;
        let x_right_mhs = self.node(x).right_mhs;
        self.node_mut(y).left = x_right;
        self.node_mut(y).left_mhs = x_right_mhs;
        if let Some(xr) = x_right {
            self.node_mut(xr).parent = Some(y);
        }

        let y_parent = self.node(y).parent;
        self.node_mut(x).parent = y_parent;
        match y_parent {
            None => self.root = Some(x),
            Some(p) => {
                if self.node(p).right == Some(y) {
                    self.node_mut(p).right = Some(x);
                } else {
                    self.node_mut(p).left = Some(x);
                }
            }
        }

        self.node_mut(x).right = Some(y);
        let y_subtree = self.mhs_of_subtree(y);
        self.node_mut(x).right_mhs = y_subtree;
        self.node_mut(y).parent = Some(x);
    }

    // ---- search ----

    pub fn search_by_offset(&self, offset: u64) -> Option<NodeId> {
        let mut x = self.root;
        while let Some(id) = x {
            let node_offset = self.node(id).hole.offset;
            if node_offset == offset {
                return Some(id);
            }
            x = if offset < node_offset {
                self.node(id).left
            } else {
                self.node(id).right
            };
        }
        None
    }

    /// First-fit search: the lowest-offset hole whose effective size can
    /// satisfy `size`. Returns `None` (without mutation) when no hole fits.
    pub fn search_first_fit(&self, size: u64) -> Option<NodeId> {
        let root = self.root?;
        let r = self.node(root);
        if self.effective_size(root) < size && r.left_mhs < size && r.right_mhs < size {
            return None;
        }
        Some(self.search_first_fit_from(root, size))
    }

    fn search_first_fit_from(&self, id: NodeId, size: u64) -> NodeId {
        let n = self.node(id);
        if self.effective_size(id) >= size {
            // this node qualifies; anything further left wins only if it
            // also qualifies
            if n.left_mhs >= size {
                return self.search_first_fit_from(n.left.unwrap(), size);
            }
            return id;
        }
        if n.left_mhs >= size {
            return self.search_first_fit_from(n.left.unwrap(), size);
        }
        if n.right_mhs >= size {
            return self.search_first_fit_from(n.right.unwrap(), size);
        }
        // the caller checked the root labels, so a dead end means the labels
        // are stale
        panic!("hole tree mhs labels are stale: no fit below a qualifying subtree");
    }

    // ---- order ----

    pub fn min_node(&self) -> Option<NodeId> {
        self.min_in(self.root?)
    }

    fn min_in(&self, mut id: NodeId) -> Option<NodeId> {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        Some(id)
    }

    pub fn max_node(&self) -> Option<NodeId> {
        let mut id = self.root?;
        while let Some(right) = self.node(id).right {
            id = right;
        }
        Some(id)
    }

    pub fn successor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(right) = self.node(id).right {
            return self.min_in(right);
        }
        let mut x = id;
        let mut y = self.node(id).parent;
        while let Some(p) = y {
            if self.node(p).right != Some(x) {
                break;
            }
            x = p;
            y = self.node(p).parent;
        }
        y
    }

    pub fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(left) = self.node(id).left {
            let mut id = left;
            while let Some(right) = self.node(id).right {
                id = right;
            }
            return Some(id);
        }
        let mut x = id;
        let mut y = self.node(id).parent;
        while let Some(p) = y {
            if self.node(p).left != Some(x) {
                break;
            }
            x = p;
            y = self.node(p).parent;
        }
        y
    }

    pub fn hole(&self, id: NodeId) -> Hole {
        self.node(id).hole
    }

    /// In-order traversal, visiting `(hole, depth)` in ascending offset order.
    pub fn in_order_visit<F: FnMut(Hole, u64)>(&self, mut f: F) {
        self.in_order_from(self.root, 0, &mut f);
    }

    fn in_order_from<F: FnMut(Hole, u64)>(&self, id: Option<NodeId>, depth: u64, f: &mut F) {
        if let Some(id) = id {
            let n = self.node(id);
            self.in_order_from(n.left, depth + 1, f);
            f(n.hole, depth);
            self.in_order_from(self.node(id).right, depth + 1, f);
        }
    }

    /// All holes in ascending offset order.
    pub fn holes_in_order(&self) -> Vec<Hole> {
        let mut out = Vec::with_capacity(self.len);
        self.in_order_visit(|hole, _| out.push(hole));
        out
    }

    // ---- insert ----

    /// Insert a free interval, merging with an exactly-abutting predecessor
    /// and/or successor hole.
    ///
    /// Panics if the interval overlaps an existing hole: that is a double
    /// free and continuing would corrupt the allocator.
    pub fn insert(&mut self, hole: Hole) {
        debug_assert!(hole.size > 0, "zero-sized holes are never stored");

        // standard BST descent to the attachment leaf
        let mut x = self.root;
        let mut y = None;
        while let Some(id) = x {
            y = Some(id);
            x = if hole.offset < self.node(id).hole.offset {
                self.node(id).left
            } else {
                self.node(id).right
            };
        }

        let Some(y) = y else {
            let id = self.new_node(hole, Color::Black);
            self.root = Some(id);
            return;
        };

        let as_left_child = hole.offset < self.node(y).hole.offset;
        let (pred, succ) = if as_left_child {
            (self.predecessor(y), Some(y))
        } else {
            (Some(y), self.successor(y))
        };

        let left_merge = match pred {
            Some(p) => {
                let end_of_pred = self.node(p).hole.end();
                assert!(
                    end_of_pred <= hole.offset,
                    "inserted hole [{}, {}) overlaps predecessor hole ending at {}",
                    hole.offset,
                    hole.end(),
                    end_of_pred
                );
                end_of_pred == hole.offset
            }
            None => false,
        };
        let right_merge = match succ {
            Some(s) => {
                let begin_of_succ = self.node(s).hole.offset;
                assert!(
                    hole.end() <= begin_of_succ,
                    "inserted hole [{}, {}) overlaps successor hole at {}",
                    hole.offset,
                    hole.end(),
                    begin_of_succ
                );
                hole.end() == begin_of_succ
            }
            None => false,
        };

        if left_merge || right_merge {
            self.absorb(pred, succ, hole, left_merge, right_merge);
            return;
        }

        let id = self.new_node(hole, Color::Red);
        self.node_mut(id).parent = Some(y);
        if as_left_child {
            self.node_mut(y).left = Some(id);
        } else {
            self.node_mut(y).right = Some(id);
        }
        self.recalculate_mhs(id);
        self.insert_fixup(id);
    }

    /// Grow an abutting neighbor instead of adding a node. When both sides
    /// abut, the predecessor absorbs everything and the successor node is
    /// spliced out.
    fn absorb(
        &mut self,
        pred: Option<NodeId>,
        succ: Option<NodeId>,
        hole: Hole,
        left_merge: bool,
        right_merge: bool,
    ) {
        match (left_merge, right_merge) {
            (true, true) => {
                let pred = pred.unwrap();
                let succ = succ.unwrap();
                let succ_size = self.node(succ).hole.size;
                self.node_mut(pred).hole.size += hole.size + succ_size;
                self.recalculate_mhs(pred);
                self.raw_remove(succ);
            }
            (true, false) => {
                let pred = pred.unwrap();
                self.node_mut(pred).hole.size += hole.size;
                self.recalculate_mhs(pred);
            }
            (false, true) => {
                let succ = succ.unwrap();
                let s = self.node_mut(succ);
                s.hole.offset -= hole.size;
                s.hole.size += hole.size;
                self.recalculate_mhs(succ);
            }
            (false, false) => unreachable!(),
        }
    }

    fn insert_fixup(&mut self, mut node: NodeId) {
        while let Some(parent) = self.node(node).parent {
            if self.node(parent).color != Color::Red {
                break;
            }
            // a red parent is never the root, so the grandparent exists
            let gparent = self.node(parent).parent.expect("red node has a grandparent");
            if self.node(gparent).left == Some(parent) {
                let uncle = self.node(gparent).right;
                if let Some(u) = uncle {
                    if self.node(u).color == Color::Red {
                        self.node_mut(u).color = Color::Black;
                        self.node_mut(parent).color = Color::Black;
                        self.node_mut(gparent).color = Color::Red;
                        node = gparent;
                        continue;
                    }
                }
                if self.node(parent).right == Some(node) {
                    self.left_rotate(parent);
                    node = parent;
                }
                let parent = self.node(node).parent.unwrap();
                self.node_mut(parent).color = Color::Black;
                self.node_mut(gparent).color = Color::Red;
                self.right_rotate(gparent);
            } else {
                let uncle = self.node(gparent).left;
                if let Some(u) = uncle {
                    if self.node(u).color == Color::Red {
                        self.node_mut(u).color = Color::Black;
                        self.node_mut(parent).color = Color::Black;
                        self.node_mut(gparent).color = Color::Red;
                        node = gparent;
                        continue;
                    }
                }
                if self.node(parent).left == Some(node) {
                    self.right_rotate(parent);
                    node = parent;
                }
                let parent = self.node(node).parent.unwrap();
                self.node_mut(parent).color = Color::Black;
                self.node_mut(gparent).color = Color::Red;
                self.left_rotate(gparent);
            }
        }
        let root = self.root.unwrap();
        self.node_mut(root).color = Color::Black;
    }

    // ---- remove ----

    /// First-fit removal of `size` bytes: shrinks (or splits) the leftmost
    /// hole whose aligned effective size can hold the request and returns the
    /// aligned offset carved out of it. Returns `None` and leaves the tree
    /// untouched when no hole fits.
    pub fn remove(&mut self, size: u64) -> Option<u64> {
        let node = self.search_first_fit(size)?;
        Some(self.remove_from_node(node, size))
    }

    fn remove_from_node(&mut self, id: NodeId, size: u64) -> u64 {
        let hole = self.node(id).hole;
        let answer_offset = align_up(hole.offset, self.alignment);
        assert!(
            answer_offset + size <= hole.end(),
            "first-fit candidate cannot hold the request"
        );

        if answer_offset == hole.offset {
            // shrink from the front
            let n = self.node_mut(id);
            n.hole.offset += size;
            n.hole.size -= size;
            self.recalculate_mhs(id);
            if self.node(id).hole.size == 0 {
                self.raw_remove(id);
            }
        } else if answer_offset + size == hole.end() {
            // shrink from the back
            self.node_mut(id).hole.size -= size;
            self.recalculate_mhs(id);
        } else {
            // cut in the middle: keep the front stub, re-insert the tail
            self.node_mut(id).hole.size = answer_offset - hole.offset;
            self.recalculate_mhs(id);
            self.insert(Hole::new(
                answer_offset + size,
                hole.end() - (answer_offset + size),
            ));
        }
        answer_offset
    }

    /// Unconditionally delete the hole starting at `offset`.
    ///
    /// Panics when no hole starts there.
    pub fn raw_remove_offset(&mut self, offset: u64) {
        let node = self
            .search_by_offset(offset)
            .unwrap_or_else(|| panic!("no hole at offset {offset}"));
        self.raw_remove(node);
    }

    /// Standard red-black delete with successor splice, relabeling every
    /// ancestor of the physically removed position.
    fn raw_remove(&mut self, node: NodeId) {
        let (n_left, n_right) = {
            let n = self.node(node);
            (n.left, n.right)
        };

        if let (Some(left), Some(right)) = (n_left, n_right) {
            // two children: splice in the successor (min of right subtree)
            let replace = self.min_in(right).unwrap();

            match self.node(node).parent {
                Some(p) => {
                    if self.node(p).left == Some(node) {
                        self.node_mut(p).left = Some(replace);
                    } else {
                        self.node_mut(p).right = Some(replace);
                    }
                }
                None => self.root = Some(replace),
            }

            let child = self.node(replace).right;
            let mut parent = self.node(replace).parent.unwrap();
            let color = self.node(replace).color;

            if parent == node {
                parent = replace;
            } else {
                if let Some(c) = child {
                    self.node_mut(c).parent = Some(parent);
                }
                self.node_mut(parent).left = child;
                let replace_right_mhs = self.node(replace).right_mhs;
                self.node_mut(parent).left_mhs = replace_right_mhs;
                self.recalculate_mhs(parent);

                self.node_mut(replace).right = Some(right);
                self.node_mut(right).parent = Some(replace);
                let node_right_mhs = self.node(node).right_mhs;
                self.node_mut(replace).right_mhs = node_right_mhs;
            }

            let (node_parent, node_color, node_left_mhs) = {
                let n = self.node(node);
                (n.parent, n.color, n.left_mhs)
            };
            self.node_mut(replace).parent = node_parent;
            self.node_mut(replace).color = node_color;
            self.node_mut(replace).left = Some(left);
            self.node_mut(replace).left_mhs = node_left_mhs;
            self.node_mut(left).parent = Some(replace);
            self.recalculate_mhs(replace);

            if color == Color::Black {
                self.raw_remove_fixup(child, Some(parent));
            }
            self.release_node(node);
            return;
        }

        let child = n_left.or(n_right);
        let parent = self.node(node).parent;
        let color = self.node(node).color;

        if let Some(c) = child {
            self.node_mut(c).parent = parent;
        }
        match parent {
            Some(p) => {
                let child_mhs = child.map_or(0, |c| self.mhs_of_subtree(c));
                if self.node(p).left == Some(node) {
                    self.node_mut(p).left = child;
                    self.node_mut(p).left_mhs = child_mhs;
                } else {
                    self.node_mut(p).right = child;
                    self.node_mut(p).right_mhs = child_mhs;
                }
                self.recalculate_mhs(p);
            }
            None => self.root = child,
        }
        if color == Color::Black {
            self.raw_remove_fixup(child, parent);
        }
        self.release_node(node);
    }

    fn is_black(&self, id: Option<NodeId>) -> bool {
        id.map_or(true, |n| self.node(n).color == Color::Black)
    }

    fn raw_remove_fixup(&mut self, mut node: Option<NodeId>, mut parent: Option<NodeId>) {
        while self.is_black(node) && node != self.root {
            let p = match parent {
                Some(p) => p,
                None => break,
            };
            if self.node(p).left == node {
                let mut other = self.node(p).right.expect("sibling exists in rb delete");
                if self.node(other).color == Color::Red {
                    // case 1: red sibling
                    self.node_mut(other).color = Color::Black;
                    self.node_mut(p).color = Color::Red;
                    self.left_rotate(p);
                    other = self.node(p).right.unwrap();
                }
                let other_left = self.node(other).left;
                let other_right = self.node(other).right;
                if self.is_black(other_left) && self.is_black(other_right) {
                    // case 2: sibling and both its children black
                    self.node_mut(other).color = Color::Red;
                    node = Some(p);
                    parent = self.node(p).parent;
                } else {
                    if self.is_black(other_right) {
                        // case 3: sibling black, near child red, far child black
                        self.node_mut(other_left.unwrap()).color = Color::Black;
                        self.node_mut(other).color = Color::Red;
                        self.right_rotate(other);
                        other = self.node(p).right.unwrap();
                    }
                    // case 4: far child red
                    let p_color = self.node(p).color;
                    self.node_mut(other).color = p_color;
                    self.node_mut(p).color = Color::Black;
                    let far = self.node(other).right.unwrap();
                    self.node_mut(far).color = Color::Black;
                    self.left_rotate(p);
                    node = self.root;
                    break;
                }
            } else {
                let mut other = self.node(p).left.expect("sibling exists in rb delete");
                if self.node(other).color == Color::Red {
                    self.node_mut(other).color = Color::Black;
                    self.node_mut(p).color = Color::Red;
                    self.right_rotate(p);
                    other = self.node(p).left.unwrap();
                }
                let other_left = self.node(other).left;
                let other_right = self.node(other).right;
                if self.is_black(other_left) && self.is_black(other_right) {
                    self.node_mut(other).color = Color::Red;
                    node = Some(p);
                    parent = self.node(p).parent;
                } else {
                    if self.is_black(other_left) {
                        self.node_mut(other_right.unwrap()).color = Color::Black;
                        self.node_mut(other).color = Color::Red;
                        self.left_rotate(other);
                        other = self.node(p).left.unwrap();
                    }
                    let p_color = self.node(p).color;
                    self.node_mut(other).color = p_color;
                    self.node_mut(p).color = Color::Black;
                    let far = self.node(other).left.unwrap();
                    self.node_mut(far).color = Color::Black;
                    self.right_rotate(p);
                    node = self.root;
                    break;
                }
            }
        }
        if let Some(n) = node {
            self.node_mut(n).color = Color::Black;
        }
    }

    // ---- validation ----
    //
    // Label staleness is silent and catastrophic, so the checks below are
    // exercised after every mutation in the test suite.

    /// Assert the red-black balance bound: `(min_leaf_depth + 1) * 2 >=
    /// max_leaf_depth + 1`, and that parent links are consistent.
    pub fn validate_balance(&self) {
        let Some(root) = self.root else { return };
        let mut min_depth = u64::MAX;
        let mut max_depth = 0u64;
        self.validate_links_from(root, None, 0, &mut min_depth, &mut max_depth);
        assert!(
            (min_depth + 1) * 2 >= max_depth + 1,
            "tree out of balance: min leaf depth {min_depth}, max leaf depth {max_depth}"
        );
    }

    fn validate_links_from(
        &self,
        id: NodeId,
        parent: Option<NodeId>,
        depth: u64,
        min_depth: &mut u64,
        max_depth: &mut u64,
    ) {
        let n = self.node(id);
        assert_eq!(n.parent, parent, "parent link mismatch at node {id}");
        if n.left.is_none() || n.right.is_none() {
            *min_depth = (*min_depth).min(depth);
            *max_depth = (*max_depth).max(depth);
        }
        if let Some(l) = n.left {
            self.validate_links_from(l, Some(id), depth + 1, min_depth, max_depth);
        }
        if let Some(r) = n.right {
            self.validate_links_from(r, Some(id), depth + 1, min_depth, max_depth);
        }
    }

    /// Recompute every mhs label bottom-up and assert it matches the stored
    /// label.
    pub fn validate_mhs(&self) {
        if let Some(root) = self.root {
            self.validate_mhs_from(root);
        }
    }

    fn validate_mhs_from(&self, id: NodeId) -> u64 {
        let n = self.node(id);
        let left = n.left.map_or(0, |l| self.validate_mhs_from(l));
        let right = n.right.map_or(0, |r| self.validate_mhs_from(r));
        assert_eq!(
            left, n.left_mhs,
            "stale left_mhs at hole offset {}",
            n.hole.offset
        );
        assert_eq!(
            right, n.right_mhs,
            "stale right_mhs at hole offset {}",
            n.hole.offset
        );
        self.effective_size(id).max(left).max(right)
    }

    /// Assert the in-order hole sequence equals `expected` (offset and size).
    pub fn validate_in_order(&self, expected: &[Hole]) {
        let holes = self.holes_in_order();
        assert_eq!(holes, expected, "in-order hole dump mismatch");
    }

    /// Full check: structure, labels, and hole disjointness.
    pub fn validate(&self) {
        self.validate_balance();
        self.validate_mhs();
        let holes = self.holes_in_order();
        for pair in holes.windows(2) {
            assert!(
                pair[0].end() < pair[1].offset,
                "holes [{}, {}) and [{}, {}) overlap or abut",
                pair[0].offset,
                pair[0].end(),
                pair[1].offset,
                pair[1].end()
            );
        }
    }

    /// Sum of all free bytes tracked by the tree.
    pub fn total_free(&self) -> u64 {
        let mut total = 0u64;
        self.in_order_visit(|hole, _| total += hole.size);
        total
    }
}

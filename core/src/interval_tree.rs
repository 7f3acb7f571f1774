//! Augmented red-black interval tree.
//!
//! Closed intervals `[low, high]` are kept in a red-black tree ordered by
//! `low`. Every node caches `max_high`, the largest `high` in its subtree,
//! which lets overlap queries skip whole subtrees.
//!
//! Nodes live in a `Vec` arena and link to each other by index. Two slots
//! are reserved: index 0 is the black `nil` leaf (boundary = `B::MIN`) and
//! index 1 is a black header whose left child is the real root (boundary =
//! `B::MAX`). The header means every real node has a parent, so rotations
//! and transplants never special-case the root.
//!
//! Equal `low` keys descend to the right, and rotations preserve in-order
//! position, so traversal and query results enumerate ties in insertion
//! order.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, SimError};

/// Totally ordered endpoint type with sentinel extremes.
pub trait Boundary: Copy + PartialOrd + Debug {
    const MIN: Self;
    const MAX: Self;
}

impl Boundary for f64 {
    const MIN: Self = f64::NEG_INFINITY;
    const MAX: Self = f64::INFINITY;
}

impl Boundary for u64 {
    const MIN: Self = u64::MIN;
    const MAX: Self = u64::MAX;
}

impl Boundary for i64 {
    const MIN: Self = i64::MIN;
    const MAX: Self = i64::MAX;
}

const NIL: usize = 0;
const HEADER: usize = 1;

static NEXT_TREE_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// Stable reference to an inserted interval.
///
/// A handle outlives its node: once the node is deleted the slot generation
/// moves on and the handle resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalHandle {
    tree: u32,
    index: u32,
    generation: u32,
}

/// Borrowed view of one stored interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalRef<'a, B, V> {
    pub handle: IntervalHandle,
    pub low: B,
    pub high: B,
    pub payload: &'a V,
}

#[derive(Debug, Clone)]
struct Node<B, V> {
    low: B,
    high: B,
    max_high: B,
    color: Color,
    parent: usize,
    left: usize,
    right: usize,
    generation: u32,
    payload: Option<V>,
}

impl<B: Boundary, V> Node<B, V> {
    fn sentinel(bound: B) -> Self {
        Self {
            low: bound,
            high: bound,
            max_high: bound,
            color: Color::Black,
            parent: NIL,
            left: NIL,
            right: NIL,
            generation: 0,
            payload: None,
        }
    }
}

fn max_of<B: Boundary>(a: B, b: B) -> B {
    if b > a {
        b
    } else {
        a
    }
}

pub struct IntervalTree<B: Boundary, V> {
    id: u32,
    nodes: Vec<Node<B, V>>,
    free: Vec<usize>,
    len: usize,
    limit: Option<usize>,
}

impl<B: Boundary, V> Default for IntervalTree<B, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Boundary, V> IntervalTree<B, V> {
    pub fn new() -> Self {
        let mut nodes = Vec::with_capacity(16);
        nodes.push(Node::sentinel(B::MIN));
        nodes.push(Node::sentinel(B::MAX));
        Self {
            id: NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed),
            nodes,
            free: Vec::new(),
            len: 0,
            limit: None,
        }
    }

    /// A tree that holds at most `limit` intervals; further inserts fail
    /// with [`SimError::Exhausted`].
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn root(&self) -> usize {
        self.nodes[HEADER].left
    }

    /// Inserts `[low, high]` and returns its handle. O(log n).
    ///
    /// Panics if `low > high` or either bound is unordered (NaN).
    pub fn insert(&mut self, low: B, high: B, payload: V) -> Result<IntervalHandle> {
        assert!(low <= high, "inverted interval [{low:?}, {high:?}]");

        let z = self.alloc(low, high, payload)?;

        let mut y = HEADER;
        let mut x = self.root();
        while x != NIL {
            y = x;
            x = if low < self.nodes[x].low {
                self.nodes[x].left
            } else {
                self.nodes[x].right
            };
        }
        self.nodes[z].parent = y;
        if y == HEADER || low < self.nodes[y].low {
            self.nodes[y].left = z;
        } else {
            self.nodes[y].right = z;
        }

        self.refresh_upward(y);
        self.insert_fixup(z);
        self.len += 1;

        Ok(self.handle_of(z))
    }

    /// Removes the interval behind `handle`. O(log n).
    ///
    /// Stale handles are a no-op and return `None`. A handle minted by a
    /// different tree panics.
    pub fn delete(&mut self, handle: IntervalHandle) -> Option<V> {
        assert_eq!(handle.tree, self.id, "handle belongs to another interval tree");
        let z = self.resolve(handle)?;

        let mut y = z;
        let mut removed_color = self.nodes[y].color;
        let x;
        let x_parent;

        if self.nodes[z].left == NIL {
            x = self.nodes[z].right;
            x_parent = self.nodes[z].parent;
            self.transplant(z, x);
        } else if self.nodes[z].right == NIL {
            x = self.nodes[z].left;
            x_parent = self.nodes[z].parent;
            self.transplant(z, x);
        } else {
            y = self.minimum(self.nodes[z].right);
            removed_color = self.nodes[y].color;
            x = self.nodes[y].right;
            if self.nodes[y].parent == z {
                x_parent = y;
            } else {
                x_parent = self.nodes[y].parent;
                self.transplant(y, x);
                let zr = self.nodes[z].right;
                self.nodes[y].right = zr;
                self.nodes[zr].parent = y;
            }
            self.transplant(z, y);
            let zl = self.nodes[z].left;
            self.nodes[y].left = zl;
            self.nodes[zl].parent = y;
            self.nodes[y].color = self.nodes[z].color;
        }

        self.refresh_upward(x_parent);
        if removed_color == Color::Black {
            self.delete_fixup(x, x_parent);
        }

        self.len -= 1;
        self.release(z)
    }

    pub fn contains(&self, handle: IntervalHandle) -> bool {
        handle.tree == self.id && self.resolve(handle).is_some()
    }

    pub fn get(&self, handle: IntervalHandle) -> Option<IntervalRef<'_, B, V>> {
        if handle.tree != self.id {
            return None;
        }
        self.resolve(handle).map(|x| self.view(x))
    }

    /// Every stored interval overlapping the closed range `[low, high]`,
    /// in ascending `low` order (ties in insertion order).
    pub fn find_all_intersections(&self, low: B, high: B) -> Vec<IntervalRef<'_, B, V>> {
        assert!(low <= high, "inverted query [{low:?}, {high:?}]");
        let mut out = Vec::new();
        self.collect(self.root(), low, high, &mut out);
        out
    }

    /// In-order traversal.
    pub fn iter(&self) -> Iter<'_, B, V> {
        let root = self.root();
        Iter {
            tree: self,
            next: if root == NIL { NIL } else { self.minimum(root) },
        }
    }

    /// Checks the red-black and augmentation invariants, returning the first
    /// violation found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.nodes[NIL].color != Color::Black || self.nodes[HEADER].color != Color::Black {
            return Err("sentinel recolored".into());
        }
        let root = self.root();
        if self.nodes[root].color != Color::Black {
            return Err("root is red".into());
        }
        if root != NIL && self.nodes[root].parent != HEADER {
            return Err("root is not attached to the header".into());
        }
        let mut count = 0;
        self.validate_subtree(root, &mut count)?;
        if count != self.len {
            return Err(format!("reachable nodes {count} != len {}", self.len));
        }
        let mut prev: Option<B> = None;
        for entry in self.iter() {
            if let Some(p) = prev {
                if entry.low < p {
                    return Err(format!("in-order keys out of order at {:?}", entry.low));
                }
            }
            prev = Some(entry.low);
        }
        Ok(())
    }

    fn validate_subtree(&self, x: usize, count: &mut usize) -> std::result::Result<usize, String> {
        if x == NIL {
            return Ok(1);
        }
        *count += 1;
        let n = &self.nodes[x];
        for child in [n.left, n.right] {
            if child != NIL && self.nodes[child].parent != x {
                return Err(format!("broken parent link below node {x}"));
            }
        }
        if n.color == Color::Red
            && (self.nodes[n.left].color == Color::Red || self.nodes[n.right].color == Color::Red)
        {
            return Err(format!("red node {x} has a red child"));
        }
        let expected = max_of(
            n.high,
            max_of(self.nodes[n.left].max_high, self.nodes[n.right].max_high),
        );
        if expected != n.max_high {
            return Err(format!(
                "node {x} caches max_high {:?}, subtree max is {expected:?}",
                n.max_high
            ));
        }
        let left = self.validate_subtree(n.left, count)?;
        let right = self.validate_subtree(n.right, count)?;
        if left != right {
            return Err(format!("black height differs below node {x}: {left} vs {right}"));
        }
        Ok(left + usize::from(n.color == Color::Black))
    }

    fn collect<'a>(&'a self, x: usize, low: B, high: B, out: &mut Vec<IntervalRef<'a, B, V>>) {
        if x == NIL || self.nodes[x].max_high < low {
            return;
        }
        let n = &self.nodes[x];
        self.collect(n.left, low, high, out);
        if n.low <= high {
            if low <= n.high {
                out.push(self.view(x));
            }
            self.collect(n.right, low, high, out);
        }
    }

    fn view(&self, x: usize) -> IntervalRef<'_, B, V> {
        let n = &self.nodes[x];
        IntervalRef {
            handle: self.handle_of(x),
            low: n.low,
            high: n.high,
            // resolve() and reachable nodes always carry a payload
            payload: n.payload.as_ref().unwrap_or_else(|| unreachable!("sentinel in view")),
        }
    }

    fn handle_of(&self, x: usize) -> IntervalHandle {
        IntervalHandle {
            tree: self.id,
            index: x as u32,
            generation: self.nodes[x].generation,
        }
    }

    fn resolve(&self, handle: IntervalHandle) -> Option<usize> {
        let x = handle.index as usize;
        let node = self.nodes.get(x)?;
        (x > HEADER && node.generation == handle.generation && node.payload.is_some()).then_some(x)
    }

    fn alloc(&mut self, low: B, high: B, payload: V) -> Result<usize> {
        if let Some(limit) = self.limit {
            if self.len >= limit {
                return Err(SimError::Exhausted {
                    what: "interval tree nodes",
                    capacity: limit,
                });
            }
        }
        let node = |generation| Node {
            low,
            high,
            max_high: high,
            color: Color::Red,
            parent: NIL,
            left: NIL,
            right: NIL,
            generation,
            payload: Some(payload),
        };
        if let Some(x) = self.free.pop() {
            let generation = self.nodes[x].generation;
            self.nodes[x] = node(generation);
            return Ok(x);
        }
        self.nodes.try_reserve(1).map_err(|_| SimError::Exhausted {
            what: "interval tree nodes",
            capacity: self.nodes.len(),
        })?;
        self.nodes.push(node(0));
        Ok(self.nodes.len() - 1)
    }

    fn release(&mut self, x: usize) -> Option<V> {
        let node = &mut self.nodes[x];
        node.generation = node.generation.wrapping_add(1);
        node.parent = NIL;
        node.left = NIL;
        node.right = NIL;
        self.free.push(x);
        node.payload.take()
    }

    fn minimum(&self, mut x: usize) -> usize {
        while self.nodes[x].left != NIL {
            x = self.nodes[x].left;
        }
        x
    }

    fn successor(&self, mut x: usize) -> usize {
        if self.nodes[x].right != NIL {
            return self.minimum(self.nodes[x].right);
        }
        let mut p = self.nodes[x].parent;
        while p != HEADER && x == self.nodes[p].right {
            x = p;
            p = self.nodes[p].parent;
        }
        if p == HEADER {
            NIL
        } else {
            p
        }
    }

    fn refresh(&mut self, x: usize) {
        if x == NIL || x == HEADER {
            return;
        }
        let n = &self.nodes[x];
        let max_high = max_of(
            n.high,
            max_of(self.nodes[n.left].max_high, self.nodes[n.right].max_high),
        );
        self.nodes[x].max_high = max_high;
    }

    fn refresh_upward(&mut self, mut x: usize) {
        while x != HEADER && x != NIL {
            self.refresh(x);
            x = self.nodes[x].parent;
        }
    }

    /// Replaces the subtree rooted at `u` with the one rooted at `v`.
    fn transplant(&mut self, u: usize, v: usize) {
        let p = self.nodes[u].parent;
        if u == self.nodes[p].left {
            self.nodes[p].left = v;
        } else {
            self.nodes[p].right = v;
        }
        if v != NIL {
            self.nodes[v].parent = p;
        }
    }

    fn rotate_left(&mut self, x: usize) {
        let y = self.nodes[x].right;
        let yl = self.nodes[y].left;
        self.nodes[x].right = yl;
        if yl != NIL {
            self.nodes[yl].parent = x;
        }
        let p = self.nodes[x].parent;
        self.nodes[y].parent = p;
        if x == self.nodes[p].left {
            self.nodes[p].left = y;
        } else {
            self.nodes[p].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
        self.refresh(x);
        self.refresh(y);
    }

    fn rotate_right(&mut self, x: usize) {
        let y = self.nodes[x].left;
        let yr = self.nodes[y].right;
        self.nodes[x].left = yr;
        if yr != NIL {
            self.nodes[yr].parent = x;
        }
        let p = self.nodes[x].parent;
        self.nodes[y].parent = p;
        if x == self.nodes[p].left {
            self.nodes[p].left = y;
        } else {
            self.nodes[p].right = y;
        }
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
        self.refresh(x);
        self.refresh(y);
    }

    fn color(&self, x: usize) -> Color {
        self.nodes[x].color
    }

    fn set_color(&mut self, x: usize, color: Color) {
        if x != NIL {
            self.nodes[x].color = color;
        }
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.color(self.nodes[z].parent) == Color::Red {
            let p = self.nodes[z].parent;
            let g = self.nodes[p].parent;
            if p == self.nodes[g].left {
                let uncle = self.nodes[g].right;
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.nodes[p].right {
                        z = p;
                        self.rotate_left(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.nodes[g].left;
                if self.color(uncle) == Color::Red {
                    self.set_color(p, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(g, Color::Red);
                    z = g;
                } else {
                    if z == self.nodes[p].left {
                        z = p;
                        self.rotate_right(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.set_color(p, Color::Black);
                    self.set_color(g, Color::Red);
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root();
        self.set_color(root, Color::Black);
    }

    /// `x` may be `nil`, so its parent travels alongside it.
    fn delete_fixup(&mut self, mut x: usize, mut parent: usize) {
        while x != self.root() && self.color(x) == Color::Black {
            if x == self.nodes[parent].left {
                let mut w = self.nodes[parent].right;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_left(parent);
                    w = self.nodes[parent].right;
                }
                let (wl, wr) = (self.nodes[w].left, self.nodes[w].right);
                if self.color(wl) == Color::Black && self.color(wr) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = parent;
                    parent = self.nodes[x].parent;
                } else {
                    if self.color(wr) == Color::Black {
                        self.set_color(wl, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_right(w);
                        w = self.nodes[parent].right;
                    }
                    self.set_color(w, self.color(parent));
                    self.set_color(parent, Color::Black);
                    let wr = self.nodes[w].right;
                    self.set_color(wr, Color::Black);
                    self.rotate_left(parent);
                    x = self.root();
                    parent = HEADER;
                }
            } else {
                let mut w = self.nodes[parent].left;
                if self.color(w) == Color::Red {
                    self.set_color(w, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_right(parent);
                    w = self.nodes[parent].left;
                }
                let (wl, wr) = (self.nodes[w].left, self.nodes[w].right);
                if self.color(wl) == Color::Black && self.color(wr) == Color::Black {
                    self.set_color(w, Color::Red);
                    x = parent;
                    parent = self.nodes[x].parent;
                } else {
                    if self.color(wl) == Color::Black {
                        self.set_color(wr, Color::Black);
                        self.set_color(w, Color::Red);
                        self.rotate_left(w);
                        w = self.nodes[parent].left;
                    }
                    self.set_color(w, self.color(parent));
                    self.set_color(parent, Color::Black);
                    let wl = self.nodes[w].left;
                    self.set_color(wl, Color::Black);
                    self.rotate_right(parent);
                    x = self.root();
                    parent = HEADER;
                }
            }
        }
        self.set_color(x, Color::Black);
    }
}

pub struct Iter<'a, B: Boundary, V> {
    tree: &'a IntervalTree<B, V>,
    next: usize,
}

impl<'a, B: Boundary, V> Iterator for Iter<'a, B, V> {
    type Item = IntervalRef<'a, B, V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let current = self.next;
        self.next = self.tree.successor(current);
        Some(self.tree.view(current))
    }
}

// ========================================================================================
//
//                               Arena-backed pairing heap
//
// ========================================================================================
//
// ### Purpose ###
//
// A min-ordered pairing heap whose nodes live in a single `Vec`. Tree links are indices
// into that arena, and callers hold generation-checked `Handle`s instead of pointers, so
// `decrease_key` and `delete` can reach an arbitrary entry without aliasing. Freed slots
// are recycled and their generation bumped, which turns any outstanding handle to them
// into a `StaleHandle` error instead of a silent hit on an unrelated entry.

use thiserror::Error;

const NIL: usize = usize::MAX;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeapError {
    #[error("handle does not refer to a live heap entry")]
    StaleHandle,
    #[error("decrease_key was given a key larger than the current one")]
    KeyIncrease,
}

/// Stable reference to one heap entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: u32,
}

/// Translates handles issued by the heap that was consumed by [`PairingHeap::union`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rebase {
    offset: usize,
}

impl Rebase {
    pub fn handle(&self, handle: Handle) -> Handle {
        Handle {
            index: handle.index + self.offset,
            generation: handle.generation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Links {
    child: usize,
    sibling: usize,
    // Parent when this node is the leftmost child, left sibling otherwise.
    prev: usize,
}

impl Links {
    const DETACHED: Links = Links {
        child: NIL,
        sibling: NIL,
        prev: NIL,
    };
}

#[derive(Debug)]
struct Slot<K, V> {
    generation: u32,
    links: Links,
    entry: Option<(K, V)>,
}

#[derive(Debug)]
pub struct PairingHeap<K, V> {
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    root: usize,
    len: usize,
    scratch: Vec<usize>,
}

impl<K: Ord, V> Default for PairingHeap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> PairingHeap<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            root: NIL,
            len: 0,
            scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, key: K, value: V) -> Handle {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.links = Links::DETACHED;
                slot.entry = Some((key, value));
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    links: Links::DETACHED,
                    entry: Some((key, value)),
                });
                self.slots.len() - 1
            }
        };
        self.root = self.meld(self.root, index);
        self.len += 1;
        Handle {
            index,
            generation: self.slots[index].generation,
        }
    }

    pub fn peek_min(&self) -> Option<(&K, &V)> {
        self.entry(self.root)
    }

    pub fn extract_min(&mut self) -> Option<(K, V)> {
        if self.root == NIL {
            return None;
        }
        let root = self.root;
        self.root = self.combine_children(root);
        self.release(root)
    }

    pub fn get(&self, handle: Handle) -> Option<(&K, &V)> {
        let index = self.resolve(handle).ok()?;
        self.entry(index)
    }

    /// Lowers the key of an entry. An equal key is accepted and leaves the heap as is.
    pub fn decrease_key(&mut self, handle: Handle, key: K) -> Result<(), HeapError> {
        let index = self.resolve(handle)?;
        if let Some((current, _)) = self.slots[index].entry.as_mut() {
            if key > *current {
                return Err(HeapError::KeyIncrease);
            }
            *current = key;
        }
        if index != self.root {
            self.cut(index);
            self.root = self.meld(self.root, index);
        }
        Ok(())
    }

    /// Removes an arbitrary entry and returns it.
    pub fn delete(&mut self, handle: Handle) -> Result<(K, V), HeapError> {
        let index = self.resolve(handle)?;
        if index == self.root {
            self.root = self.combine_children(index);
        } else {
            self.cut(index);
            let subtree = self.combine_children(index);
            self.root = self.meld(self.root, subtree);
        }
        self.release(index).ok_or(HeapError::StaleHandle)
    }

    /// Moves every entry of `other` into `self`, leaving `other` empty.
    ///
    /// The two roots are melded in constant time, but `other`'s arena is appended to
    /// this one, so the call is linear in `other.len()`. Handles previously issued by
    /// `other` stay usable after passing them through the returned [`Rebase`].
    pub fn union(&mut self, other: &mut Self) -> Rebase {
        let offset = self.slots.len();
        let shift = |index: usize| if index == NIL { NIL } else { index + offset };

        self.slots.reserve(other.slots.len());
        for mut slot in other.slots.drain(..) {
            slot.links = Links {
                child: shift(slot.links.child),
                sibling: shift(slot.links.sibling),
                prev: shift(slot.links.prev),
            };
            self.slots.push(slot);
        }
        self.free.extend(other.free.drain(..).map(shift));

        let other_root = shift(other.root);
        self.root = self.meld(self.root, other_root);
        self.len += other.len;
        other.root = NIL;
        other.len = 0;
        Rebase { offset }
    }

    /// Drains the heap in ascending key order.
    pub fn into_sorted_vec(mut self) -> Vec<(K, V)> {
        let mut sorted = Vec::with_capacity(self.len);
        while let Some(entry) = self.extract_min() {
            sorted.push(entry);
        }
        sorted
    }

    fn entry(&self, index: usize) -> Option<(&K, &V)> {
        self.slots
            .get(index)?
            .entry
            .as_ref()
            .map(|(k, v)| (k, v))
    }

    fn resolve(&self, handle: Handle) -> Result<usize, HeapError> {
        match self.slots.get(handle.index) {
            Some(slot) if slot.generation == handle.generation && slot.entry.is_some() => {
                Ok(handle.index)
            }
            _ => Err(HeapError::StaleHandle),
        }
    }

    // Vacant slots are never linked into the tree, so a missing key cannot be reached
    // from `meld`.
    fn is_less(&self, a: usize, b: usize) -> bool {
        match (&self.slots[a].entry, &self.slots[b].entry) {
            (Some((ka, _)), Some((kb, _))) => ka < kb,
            _ => false,
        }
    }

    // Both arguments must be detached roots (no sibling, no prev).
    fn meld(&mut self, a: usize, b: usize) -> usize {
        if a == NIL {
            return b;
        }
        if b == NIL {
            return a;
        }
        let (parent, child) = if self.is_less(b, a) { (b, a) } else { (a, b) };
        let first = self.slots[parent].links.child;
        self.slots[child].links.sibling = first;
        self.slots[child].links.prev = parent;
        if first != NIL {
            self.slots[first].links.prev = child;
        }
        self.slots[parent].links.child = child;
        parent
    }

    fn cut(&mut self, index: usize) {
        let Links { sibling, prev, .. } = self.slots[index].links;
        if prev != NIL {
            if self.slots[prev].links.child == index {
                self.slots[prev].links.child = sibling;
            } else {
                self.slots[prev].links.sibling = sibling;
            }
        }
        if sibling != NIL {
            self.slots[sibling].links.prev = prev;
        }
        self.slots[index].links.sibling = NIL;
        self.slots[index].links.prev = NIL;
    }

    // Standard two-pass pairing: meld neighbours left to right, then fold the pairs
    // right to left into a single tree.
    fn combine_children(&mut self, parent: usize) -> usize {
        let mut pending = std::mem::take(&mut self.scratch);
        pending.clear();

        let mut child = self.slots[parent].links.child;
        self.slots[parent].links.child = NIL;
        while child != NIL {
            let next = self.slots[child].links.sibling;
            self.slots[child].links.sibling = NIL;
            self.slots[child].links.prev = NIL;
            pending.push(child);
            child = next;
        }

        let mut paired = 0;
        let mut i = 0;
        while i + 1 < pending.len() {
            pending[paired] = self.meld(pending[i], pending[i + 1]);
            paired += 1;
            i += 2;
        }
        if i < pending.len() {
            pending[paired] = pending[i];
            paired += 1;
        }

        let mut merged = NIL;
        for &tree in pending[..paired].iter().rev() {
            merged = self.meld(tree, merged);
        }

        self.scratch = pending;
        merged
    }

    fn release(&mut self, index: usize) -> Option<(K, V)> {
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.links = Links::DETACHED;
        let entry = slot.entry.take();
        self.free.push(index);
        self.len -= 1;
        entry
    }
}

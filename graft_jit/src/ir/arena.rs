//! Index-based storage for graph nodes and analysis side tables.
//!
//! Nodes live in a flat [`Arena`] and are addressed by typed [`Id`]s. Ids are
//! never reused: removing a node only flags it dead, so an id captured before a
//! splice stays meaningful after it. This is what lets the inliner keep call
//! sites in a worklist while the caller graph grows underneath it.
//!
//! Per-node analysis results (use lists, block assignment, visit marks) go in
//! [`SecondaryMap`] or [`BitSet`] instead of on the node itself.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A typed index into an [`Arena`].
///
/// The marker keeps ids from different arenas (nodes, blocks) apart at compile
/// time. Trait impls are written by hand so they hold for any `T`.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Sentinel for "no node", e.g. the predecessor of a merge.
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#INVALID")
        }
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only storage. Items are never freed individually.
#[derive(Debug, Clone, PartialEq)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    #[inline]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Store `item` and return its id.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Id::new(index)
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    /// Number of slots ever allocated, dead or alive.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all items with their ids, in allocation order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Dense side table keyed by arena ids. Grows on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    /// Make sure every id below `len` has a slot.
    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    /// Mutable access, growing the table when `id` is past the end.
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        &mut self.values[idx]
    }

    pub fn set(&mut self, id: Id<K>, value: V) {
        *self.entry(id) = value;
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Default + Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, id: Id<K>) -> &Self::Output {
        &self.values[id.as_usize()]
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Compact set of small indices, used for visit marks during traversals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    fn ensure_capacity(&mut self, n: usize) {
        let words = n.div_ceil(64);
        if words > self.bits.len() {
            self.bits.resize(words, 0);
        }
    }

    /// Insert `index`; returns `true` if it was not already present.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        self.ensure_capacity(index + 1);
        let (word, bit) = (index / 64, index % 64);
        let fresh = self.bits[word] & (1 << bit) == 0;
        self.bits[word] |= 1 << bit;
        fresh
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        let (word, bit) = (index / 64, index % 64);
        if word < self.bits.len() {
            self.bits[word] &= !(1 << bit);
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        let (word, bit) = (index / 64, index % 64);
        word < self.bits.len() && (self.bits[word] & (1 << bit)) != 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot {
        value: i32,
    }

    #[test]
    fn test_arena_ids_are_dense_and_stable() {
        let mut arena: Arena<Slot> = Arena::new();
        let a = arena.alloc(Slot { value: 10 });
        let b = arena.alloc(Slot { value: 20 });

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.len(), 2);

        arena[b].value = 200;
        assert_eq!(arena[a].value, 10);
        assert_eq!(arena[b].value, 200);
        assert_eq!(arena.get(Id::new(2)).map(|s| s.value), None);
    }

    #[test]
    fn test_secondary_map_grows_on_demand() {
        let mut map: SecondaryMap<Slot, u32> = SecondaryMap::new();
        map.set(Id::new(5), 7);
        assert_eq!(map[Id::new(5)], 7);
        assert_eq!(map[Id::new(0)], 0);
        *map.entry(Id::new(9)) += 3;
        assert_eq!(map.get(Id::new(9)), Some(&3));
    }

    #[test]
    fn test_bit_set_insert_reports_freshness() {
        let mut set = BitSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(64));
        assert!(set.insert(130));
        assert!(set.contains(130));
        set.remove(64);
        assert!(!set.contains(64));
        assert!(set.contains(3));
        assert!(!set.contains(1000));
    }

    #[test]
    fn test_id_invalid() {
        let id: Id<Slot> = Id::INVALID;
        assert!(!id.is_valid());
        assert!(Id::<Slot>::new(0).is_valid());
        assert_eq!(format!("{:?}", id), "#INVALID");
    }
}

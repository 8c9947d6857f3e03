//! Generational handles and handle-indexed tables
//!
//! A [`Handle`] pairs a slot index with a generation counter. The slot index is
//! assigned by whoever owns the slot (for the physics crate, the simulation
//! backend), so a [`HandleTable`] never allocates indices itself: it only mirrors
//! them and uses the generation to reject stale lookups after a slot is recycled.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use alloc::vec::Vec;

/// A type-safe handle to a slot holding a `T`
#[repr(transparent)]
pub struct Handle<T> {
    /// Lower 32 bits: index, upper 32 bits: generation
    bits: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const NULL_BITS: u64 = u64::MAX;

    /// Create a new handle from index and generation
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            bits: (generation as u64) << 32 | index as u64,
            _marker: PhantomData,
        }
    }

    /// Create an invalid/null handle
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: Self::NULL_BITS,
            _marker: PhantomData,
        }
    }

    /// Check if this handle is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.bits == Self::NULL_BITS
    }

    /// Get the index portion
    #[inline]
    pub const fn index(&self) -> u32 {
        self.bits as u32
    }

    /// Get the generation portion
    #[inline]
    pub const fn generation(&self) -> u32 {
        (self.bits >> 32) as u32
    }

    /// Convert to raw bits
    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.bits
    }

    /// Create from raw bits
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle<{}>(null)", core::any::type_name::<T>())
        } else {
            write!(
                f,
                "Handle<{}>({}v{})",
                core::any::type_name::<T>(),
                self.index(),
                self.generation()
            )
        }
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

struct Slot<V> {
    generation: u32,
    value: V,
}

/// Growable table mapping handle indices to values
///
/// Capacity doubles whenever an inserted index falls outside the current range.
/// Removing an entry nulls its slot; a later insert at the same index with a new
/// generation makes the old handle permanently stale.
pub struct HandleTable<T, V = T> {
    slots: Vec<Option<Slot<V>>>,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T, V> HandleTable<T, V> {
    /// Initial number of slots allocated on first insert
    pub const INITIAL_CAPACITY: usize = 16;

    /// Create an empty table
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Create a table with room for `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            len: 0,
            _marker: PhantomData,
        }
    }

    fn grow_to_fit(&mut self, index: usize) {
        if index < self.slots.len() {
            return;
        }
        let mut capacity = self.slots.len().max(Self::INITIAL_CAPACITY);
        while capacity <= index {
            capacity *= 2;
        }
        self.slots.resize_with(capacity, || None);
    }

    /// Store `value` at the slot named by `handle`
    ///
    /// Returns the value previously occupying the slot, if any.
    pub fn insert(&mut self, handle: Handle<T>, value: V) -> Option<V> {
        if handle.is_null() {
            return None;
        }
        let index = handle.index() as usize;
        self.grow_to_fit(index);

        let previous = self.slots[index].replace(Slot {
            generation: handle.generation(),
            value,
        });
        if previous.is_none() {
            self.len += 1;
        }
        previous.map(|slot| slot.value)
    }

    /// Null the slot for `handle` if the generation still matches
    pub fn remove(&mut self, handle: Handle<T>) -> Option<V> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        match slot {
            Some(s) if s.generation == handle.generation() => {
                self.len -= 1;
                slot.take().map(|s| s.value)
            }
            _ => None,
        }
    }

    /// Look up a live entry
    pub fn get(&self, handle: Handle<T>) -> Option<&V> {
        match self.slots.get(handle.index() as usize)? {
            Some(s) if s.generation == handle.generation() => Some(&s.value),
            _ => None,
        }
    }

    /// Look up a live entry mutably
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut V> {
        match self.slots.get_mut(handle.index() as usize)? {
            Some(s) if s.generation == handle.generation() => Some(&mut s.value),
            _ => None,
        }
    }

    /// Check if a handle names a live entry
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the table has no live entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots currently allocated
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Null every slot, keeping the allocated capacity
    pub fn clear(&mut self) -> usize {
        let removed = self.len;
        for slot in &mut self.slots {
            *slot = None;
        }
        self.len = 0;
        removed
    }

    /// Remove and yield every live entry
    pub fn drain(&mut self) -> impl Iterator<Item = (Handle<T>, V)> + '_ {
        self.len = 0;
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            slot.take()
                .map(|s| (Handle::new(i as u32, s.generation), s.value))
        })
    }

    /// Iterate over live handles and values
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &V)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref()
                .map(|s| (Handle::new(i as u32, s.generation), &s.value))
        })
    }
}

impl<T, V> Default for HandleTable<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

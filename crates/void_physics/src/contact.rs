//! Contact records and bounded per-body contact buffers
//!
//! Buffers are written from inside the narrow phase. A writer claims a slot with a
//! single atomic increment of the cursor; claims past the capacity are dropped.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::math::{add, neg, sub};
use crate::registry::Collidable;

/// One contact between `a` and `b`, seen from `a`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactRecord {
    pub a: Collidable,
    pub b: Collidable,
    pub a_position: [f32; 3],
    pub b_position: [f32; 3],
    /// Contact normal, pointing away from `a`
    pub normal: [f32; 3],
    /// Contact point relative to `a_position`
    pub offset: [f32; 3],
}

impl ContactRecord {
    /// The collidable on the far side of the contact
    pub fn other(&self) -> Collidable {
        self.b
    }

    /// Contact point in world space
    pub fn point(&self) -> [f32; 3] {
        add(self.a_position, self.offset)
    }

    /// The same contact seen from `b`
    ///
    /// Swapping twice yields the original record.
    pub fn swap(&self) -> Self {
        Self {
            a: self.b,
            b: self.a,
            a_position: self.b_position,
            b_position: self.a_position,
            normal: neg(self.normal),
            offset: sub(self.point(), self.b_position),
        }
    }

    /// Swap so that `me` is side `a`
    pub fn swap_if_needed(&self, me: Collidable) -> Self {
        if self.a != me && self.b == me {
            self.swap()
        } else {
            *self
        }
    }
}

/// Fixed-capacity contact storage for one body
pub struct ContactBuffer {
    slots: Box<[Mutex<Option<ContactRecord>>]>,
    cursor: AtomicUsize,
}

impl ContactBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the next slot and write `record` into it
    ///
    /// Returns false when the buffer is full; the record is dropped.
    pub fn push(&self, record: ContactRecord) -> bool {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel);
        match self.slots.get(index) {
            Some(slot) => {
                *slot.lock() = Some(record);
                true
            }
            None => false,
        }
    }

    /// Records retained since the last reset
    pub fn count(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.slots.len())
    }

    /// Records offered since the last reset, including dropped ones
    pub fn attempted(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        for slot in self.slots.iter() {
            *slot.lock() = None;
        }
        self.cursor.store(0, Ordering::Release);
    }

    /// Copy out the retained records
    pub fn snapshot(&self) -> Vec<ContactRecord> {
        self.slots[..self.count()]
            .iter()
            .filter_map(|slot| *slot.lock())
            .collect()
    }
}

impl std::fmt::Debug for ContactBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactBuffer")
            .field("capacity", &self.capacity())
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{BodyHandle, StaticHandle};
    use std::sync::Arc;

    fn record() -> ContactRecord {
        ContactRecord {
            a: Collidable::Body(BodyHandle::new(3, 1)),
            b: Collidable::Static(StaticHandle::new(0, 0)),
            a_position: [1.0, 4.0, 0.0],
            b_position: [0.0, 0.0, 2.0],
            normal: [0.0, -1.0, 0.0],
            offset: [0.0, -0.5, 0.25],
        }
    }

    #[test]
    fn test_swap_is_involution() {
        let c = record();
        assert_eq!(c.swap().swap(), c);
    }

    #[test]
    fn test_swap_preserves_contact_point() {
        let c = record();
        let s = c.swap();
        assert_eq!(s.a, c.b);
        assert_eq!(s.b, c.a);
        assert_eq!(s.normal, [0.0, 1.0, 0.0]);
        assert_eq!(s.point(), c.point());
        assert_eq!(s.offset, [1.0, 3.5, -1.75]);
    }

    #[test]
    fn test_swap_if_needed() {
        let c = record();
        assert_eq!(c.swap_if_needed(c.a), c);
        assert_eq!(c.swap_if_needed(c.b).a, c.b);
    }

    #[test]
    fn test_overflow_is_dropped() {
        let buffer = ContactBuffer::new(2);
        assert!(buffer.push(record()));
        assert!(buffer.push(record()));
        assert!(!buffer.push(record()));
        assert_eq!(buffer.count(), 2);
        assert_eq!(buffer.attempted(), 3);
        assert_eq!(buffer.snapshot().len(), 2);

        buffer.reset();
        assert_eq!(buffer.count(), 0);
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_push_respects_capacity() {
        let buffer = Arc::new(ContactBuffer::new(16));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        buffer.push(record());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(buffer.attempted(), 80);
        assert_eq!(buffer.snapshot().len(), 16);
    }

    #[test]
    fn test_zero_capacity() {
        let buffer = ContactBuffer::new(0);
        assert!(!buffer.push(record()));
        assert!(buffer.snapshot().is_empty());
    }
}

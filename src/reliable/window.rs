//! Fixed-capacity slot arena indexed by sequence number.
//!
//! Both Selective Repeat windows hold at most `capacity` live entries whose
//! sequence numbers are consecutive modulo 2^16, so `seq % capacity` never
//! collides for two live entries. Each slot remembers the full sequence
//! number it holds so stale lookups miss instead of aliasing.

use crate::core::SeqNum;

#[derive(Debug, Clone)]
struct Slot<T> {
    seq: SeqNum,
    value: T,
}

/// Ring of optional slots bounded to the window capacity.
#[derive(Debug, Clone)]
pub struct SlotRing<T> {
    slots: Vec<Option<Slot<T>>>,
    len: usize,
}

impl<T> SlotRing<T> {
    /// Create an empty ring with `capacity` slots.
    pub fn new(capacity: u16) -> Self {
        let capacity = usize::from(capacity.max(1));
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            len: 0,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn index(&self, seq: SeqNum) -> usize {
        usize::from(seq.get()) % self.slots.len()
    }

    /// Store `value` under `seq`, returning whatever occupied its slot.
    pub fn insert(&mut self, seq: SeqNum, value: T) -> Option<(SeqNum, T)> {
        let idx = self.index(seq);
        let old = self.slots[idx].replace(Slot { seq, value });
        match old {
            Some(slot) => Some((slot.seq, slot.value)),
            None => {
                self.len += 1;
                None
            }
        }
    }

    /// Whether `seq` is stored.
    pub fn contains(&self, seq: SeqNum) -> bool {
        self.get(seq).is_some()
    }

    /// Entry stored under exactly `seq`.
    pub fn get(&self, seq: SeqNum) -> Option<&T> {
        match &self.slots[self.index(seq)] {
            Some(slot) if slot.seq == seq => Some(&slot.value),
            _ => None,
        }
    }

    /// Mutable entry stored under exactly `seq`.
    pub fn get_mut(&mut self, seq: SeqNum) -> Option<&mut T> {
        let idx = self.index(seq);
        match &mut self.slots[idx] {
            Some(slot) if slot.seq == seq => Some(&mut slot.value),
            _ => None,
        }
    }

    /// Remove and return the entry stored under exactly `seq`.
    pub fn remove(&mut self, seq: SeqNum) -> Option<T> {
        let idx = self.index(seq);
        if self.slots[idx].as_ref().is_some_and(|slot| slot.seq == seq) {
            self.len -= 1;
            self.slots[idx].take().map(|slot| slot.value)
        } else {
            None
        }
    }

    /// Iterate over occupied slots in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (SeqNum, &T)> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| (slot.seq, &slot.value))
    }

    /// Mutably iterate over occupied slots in storage order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SeqNum, &mut T)> {
        self.slots
            .iter_mut()
            .flatten()
            .map(|slot| (slot.seq, &mut slot.value))
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut ring = SlotRing::new(4);
        assert!(ring.is_empty());

        assert!(ring.insert(SeqNum::new(10), "a").is_none());
        assert!(ring.insert(SeqNum::new(11), "b").is_none());
        assert_eq!(ring.len(), 2);

        assert_eq!(ring.get(SeqNum::new(10)), Some(&"a"));
        assert!(ring.contains(SeqNum::new(11)));
        assert_eq!(ring.remove(SeqNum::new(10)), Some("a"));
        assert_eq!(ring.remove(SeqNum::new(10)), None);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_aliased_lookup_misses() {
        let mut ring = SlotRing::new(4);
        ring.insert(SeqNum::new(2), 1);

        // 6 maps to the same slot as 2 but is a different sequence number
        assert_eq!(ring.get(SeqNum::new(6)), None);
        assert_eq!(ring.remove(SeqNum::new(6)), None);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_insert_replaces_occupant() {
        let mut ring = SlotRing::new(4);
        ring.insert(SeqNum::new(1), 'x');
        assert_eq!(ring.insert(SeqNum::new(5), 'y'), Some((SeqNum::new(1), 'x')));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_wraparound_indices() {
        let mut ring = SlotRing::new(32);
        for raw in 65530u16..=65535 {
            ring.insert(SeqNum::new(raw), raw);
        }
        for raw in 0u16..4 {
            ring.insert(SeqNum::new(raw), raw);
        }
        assert_eq!(ring.len(), 10);
        assert_eq!(ring.get(SeqNum::new(65535)), Some(&65535));
        assert_eq!(ring.get(SeqNum::new(3)), Some(&3));
    }

    #[test]
    fn test_iter_and_clear() {
        let mut ring = SlotRing::new(8);
        ring.insert(SeqNum::new(3), 30);
        ring.insert(SeqNum::new(4), 40);

        for (_, v) in ring.iter_mut() {
            *v += 1;
        }
        let mut values: Vec<_> = ring.iter().map(|(s, v)| (s.get(), *v)).collect();
        values.sort();
        assert_eq!(values, vec![(3, 31), (4, 41)]);

        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.iter().count(), 0);
    }
}

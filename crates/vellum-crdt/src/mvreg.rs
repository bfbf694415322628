//! Multi-value register.
//!
//! One register per metadata key / block content slot. A `set` supersedes
//! the stored entry, but the *newest write by `OpId` order* survives
//! regardless of the order writes were applied in — two replicas that have
//! seen the same set of writes always resolve to the same value, even when
//! concurrent changes were delivered in different (causally valid) orders.
//!
//! Superseded op ids are retained on the surviving entry as its
//! predecessors, for future merge policies that may want to surface
//! conflicting values instead of resolving them.

use crate::opid::OpId;

/// The surviving entry of a register.
#[derive(Clone, Debug)]
pub struct MvEntry<V> {
    pub value: V,
    /// Op ids this write superseded (directly or transitively observed).
    pub preds: Vec<OpId>,
}

/// A per-key register resolving concurrent writes by greatest `OpId`.
#[derive(Clone, Debug)]
pub struct MvReg<V> {
    entry: Option<(OpId, MvEntry<V>)>,
}

impl<V> Default for MvReg<V> {
    fn default() -> Self {
        Self { entry: None }
    }
}

impl<V> MvReg<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write.
    ///
    /// If the register already holds a write with a greater id, the incoming
    /// one is absorbed as a predecessor instead of replacing the value —
    /// this is what makes resolution independent of delivery order.
    pub fn set(&mut self, id: OpId, value: V) {
        match self.entry.take() {
            None => {
                self.entry = Some((id, MvEntry { value, preds: Vec::new() }));
            }
            Some((cur_id, cur)) if cur_id > id => {
                // Late-arriving older write: keep the current value.
                let mut preds = cur.preds;
                preds.push(id);
                self.entry = Some((cur_id, MvEntry { value: cur.value, preds }));
            }
            Some((cur_id, cur)) => {
                let mut preds = cur.preds;
                preds.push(cur_id);
                self.entry = Some((id, MvEntry { value, preds }));
            }
        }
    }

    /// The surviving entry, if any write has been recorded.
    pub fn latest(&self) -> Option<(OpId, &V)> {
        self.entry.as_ref().map(|(id, e)| (*id, &e.value))
    }

    /// The surviving value, ignoring its id.
    pub fn value(&self) -> Option<&V> {
        self.entry.as_ref().map(|(_, e)| &e.value)
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    /// Op ids superseded by the surviving write.
    pub fn superseded(&self) -> &[OpId] {
        self.entry.as_ref().map(|(_, e)| e.preds.as_slice()).unwrap_or(&[])
    }
}

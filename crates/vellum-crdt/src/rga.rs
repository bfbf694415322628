//! Replicated ordered list (RGA).
//!
//! An insert-after list CRDT: each element names the element it was
//! inserted after, and concurrent inserts at the same spot are ordered by
//! comparing position ids — the classic RGA "skip right past greater ids"
//! rule, which is what makes the final order independent of delivery order.
//!
//! Elements live in an ordered map keyed by base-62 fractional-index
//! strings, with a side index from position id to key, so integrating an
//! insert is O(log n) plus the skip scan. Deletion tombstones the slot;
//! the key is never reused.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::error::CrdtError;
use crate::opid::Position;
use crate::Result;

/// Base-62 charset for fractional indexing (0-9, A-Z, a-z).
/// Lexicographically ordered: '0' < '9' < 'A' < 'Z' < 'a' < 'z'.
pub(crate) const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Get the index of a character in the BASE62 charset.
fn base62_index(c: u8) -> usize {
    BASE62.iter().position(|&b| b == c).unwrap_or(0)
}

/// Compute a lexicographic midpoint between two base-62 strings.
///
/// Empty string `""` sorts before everything. Both `a` and `b` must satisfy
/// `a < b` lexicographically. The result satisfies `a < result < b`.
pub(crate) fn order_midpoint(a: &str, b: &str) -> String {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let max_len = a_bytes.len().max(b_bytes.len());

    let mut result = Vec::new();

    for i in 0..=max_len {
        let a_val = if i < a_bytes.len() { base62_index(a_bytes[i]) } else { 0 };
        let b_val = if i < b_bytes.len() { base62_index(b_bytes[i]) } else { 62 };

        if a_val + 1 < b_val {
            // There's room between a and b at this position
            let mid = (a_val + b_val) / 2;
            result.push(BASE62[mid]);
            return String::from_utf8(result).unwrap_or_else(|_| "V".to_string());
        } else if a_val == b_val {
            // Same character — carry it and continue to next position
            result.push(BASE62[a_val]);
        } else {
            // Adjacent: carry a_val, then extend along a's tail until a
            // position with room opens up (a run of trailing 'z's has no
            // room and must be carried too)
            result.push(BASE62[a_val]);
            let mut j = i + 1;
            loop {
                let a_next = if j < a_bytes.len() { base62_index(a_bytes[j]) } else { 0 };
                if a_next + 1 < 62 {
                    let mid = (a_next + 62) / 2;
                    result.push(BASE62[mid]);
                    return String::from_utf8(result).unwrap_or_else(|_| "V".to_string());
                }
                result.push(BASE62[a_next]);
                j += 1;
            }
        }
    }

    // Fallback: append midpoint character
    result.push(BASE62[31]); // 'V'
    String::from_utf8(result).unwrap_or_else(|_| "V".to_string())
}

/// Allocate a key strictly between two neighbors (either may be absent).
pub(crate) fn key_between(left: Option<&str>, right: Option<&str>) -> String {
    match (left, right) {
        (None, None) => "V".to_string(),
        (None, Some(r)) => order_midpoint("", r),
        (Some(l), None) => format!("{l}V"),
        (Some(l), Some(r)) => order_midpoint(l, r),
    }
}

/// One list slot.
#[derive(Clone, Debug)]
pub struct RgaItem<T> {
    pub pos: Position,
    pub value: T,
    pub deleted: bool,
}

/// An insert-after list with tombstone deletion.
#[derive(Clone, Debug)]
pub struct Rga<T> {
    /// Slots ordered by fractional-index key.
    items: BTreeMap<String, RgaItem<T>>,
    /// Position id → fractional-index key.
    index: HashMap<Position, String>,
}

impl<T> Default for Rga<T> {
    fn default() -> Self {
        Self { items: BTreeMap::new(), index: HashMap::new() }
    }
}

impl<T> Rga<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrate an insert of `value` at position `pos`, after `ref_pos`
    /// (`None` = leftmost).
    ///
    /// Fails with `DuplicateOperation` if `pos` was already integrated, and
    /// with `CausalityViolation` if the ref has not been integrated yet.
    /// Both failures leave the list untouched. A duplicate or dangling
    /// *pending* position is a caller bug inside a single mutation and
    /// panics.
    pub fn integrate(&mut self, pos: Position, ref_pos: Option<Position>, value: T) -> Result<()> {
        if self.index.contains_key(&pos) {
            match pos {
                Position::Committed(id) => return Err(CrdtError::DuplicateOperation(id)),
                Position::Pending(n) => panic!("pending slot {n} integrated twice"),
            }
        }

        let mut left_key: Option<String> = match ref_pos {
            None => None,
            Some(r) => match self.index.get(&r) {
                Some(k) => Some(k.clone()),
                None => match r {
                    Position::Committed(id) => return Err(CrdtError::CausalityViolation(id)),
                    Position::Pending(n) => panic!("pending ref {n} was never integrated"),
                },
            },
        };

        // RGA skip rule: advance past successors whose id compares greater,
        // so concurrent inserts after the same ref converge.
        loop {
            let skip = match self.next_after(left_key.as_deref()) {
                Some((k, item)) if item.pos > pos => Some(k.to_string()),
                _ => None,
            };
            match skip {
                Some(k) => left_key = Some(k),
                None => break,
            }
        }

        let right_key = self.next_after(left_key.as_deref()).map(|(k, _)| k.to_string());
        let key = key_between(left_key.as_deref(), right_key.as_deref());

        debug_assert!(!self.items.contains_key(&key), "fractional key collision");
        self.items.insert(key.clone(), RgaItem { pos, value, deleted: false });
        self.index.insert(pos, key);
        Ok(())
    }

    /// First slot strictly after `key` (or the first slot overall).
    fn next_after(&self, key: Option<&str>) -> Option<(&str, &RgaItem<T>)> {
        let mut range = match key {
            Some(k) => self.items.range::<str, _>((Bound::Excluded(k), Bound::Unbounded)),
            None => self.items.range::<str, _>(..),
        };
        range.next().map(|(k, item)| (k.as_str(), item))
    }

    /// Tombstone the slot at `pos`. Returns false if the position is unknown.
    pub fn tombstone(&mut self, pos: Position) -> bool {
        let Some(key) = self.index.get(&pos) else {
            return false;
        };
        if let Some(item) = self.items.get_mut(key) {
            item.deleted = true;
        }
        true
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.index.contains_key(&pos)
    }

    /// All slots in list order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = &RgaItem<T>> {
        self.items.values()
    }

    /// Live values in list order. Fresh iterator on every call.
    pub fn values_alive(&self) -> impl Iterator<Item = &T> {
        self.items.values().filter(|i| !i.deleted).map(|i| &i.value)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

//! Logical operation identifiers.
//!
//! Every CRDT in this crate breaks ties with the same primitive: an `OpId`
//! ordered by (timestamp, per-change index, actor). Uniqueness within one
//! entity's applied history is an invariant the change DAG enforces by
//! assigning ids itself — ops on the wire never carry their own ids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum logical timestamp (48 bits).
pub const MAX_TS: u64 = (1 << 48) - 1;

/// Maximum per-change operation index (24 bits).
pub const MAX_IDX: u32 = (1 << 24) - 1;

/// A totally-ordered operation identifier.
///
/// Field order matters: the derived `Ord` compares `ts`, then `idx`, then
/// `actor`, which is the tie-break order every CRDT here depends on.
#[derive(
    Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct OpId {
    /// Logical millisecond timestamp of the enclosing change (≤ 48 bits).
    pub ts: u64,
    /// Index of this op within the enclosing change (≤ 24 bits).
    pub idx: u32,
    /// Small-integer actor id of the signer (caller-injected mapping).
    pub actor: u64,
}

impl OpId {
    /// The "undefined" sentinel. Used as the ref of a leftmost insert.
    pub const ZERO: OpId = OpId { ts: 0, idx: 0, actor: 0 };

    pub fn new(ts: u64, idx: u32, actor: u64) -> Self {
        debug_assert!(ts <= MAX_TS, "OpId ts exceeds 48 bits");
        debug_assert!(idx <= MAX_IDX, "OpId idx exceeds 24 bits");
        Self { ts, idx, actor }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "op(∅)")
        } else {
            write!(f, "op({}.{}.{})", self.ts, self.idx, self.actor)
        }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A list position: either a committed `OpId` or a slot created inside an
/// in-flight mutation that has not been assigned a real id yet.
///
/// Modeled as an explicit enum rather than a reserved max-timestamp `OpId`
/// encoding, so a pending position can never be confused with a committed
/// one. Pending slots are remapped to real ids at commit time.
///
/// Ordering: every committed position sorts before every pending one, and
/// pending positions sort in *reverse* creation order. Both halves of that
/// rule feed the RGA skip scan: a staged insert never skips past committed
/// siblings (it lands right after its ref), while repeated staged inserts
/// after the same ref stack left-to-right in the order they were issued.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub enum Position {
    Committed(OpId),
    Pending(u64),
}

impl Position {
    pub fn opid(&self) -> Option<OpId> {
        match self {
            Position::Committed(id) => Some(*id),
            Position::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Position::Pending(_))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use Position::*;
        match (self, other) {
            (Committed(a), Committed(b)) => a.cmp(b),
            (Committed(_), Pending(_)) => std::cmp::Ordering::Less,
            (Pending(_), Committed(_)) => std::cmp::Ordering::Greater,
            // Reverse: the earlier a pending slot was created, the greater
            // it compares, so a later re-insert after the same ref scans
            // past it and lands to its right.
            (Pending(a), Pending(b)) => b.cmp(a),
        }
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Committed(id) => write!(f, "{id:?}"),
            Position::Pending(n) => write!(f, "pending({n})"),
        }
    }
}

impl From<OpId> for Position {
    fn from(id: OpId) -> Self {
        Position::Committed(id)
    }
}

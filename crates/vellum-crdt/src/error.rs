//! Error types for CRDT operations.
//!
//! Every variant here is a *recoverable* validation failure: the offending
//! change or op is rejected atomically and the entity stays usable. Bugs in
//! the caller's use of the API (reusing a committed mutation, colliding
//! local op ids) are programmer-invariant violations and panic instead —
//! where possible they are made unrepresentable by consuming-`self` APIs.

use thiserror::Error;

use vellum_types::BlockId;

use crate::change::ChangeHash;
use crate::opid::OpId;

/// Errors that can occur while applying changes or staging edits.
#[derive(Error, Debug)]
pub enum CrdtError {
    /// A change arrived out of causal order: its timestamp regresses the
    /// actor's high-water mark, or does not dominate a dependency.
    #[error("causal order violation: {0}")]
    CausalOrderViolation(String),

    /// A change names a dependency that has not been applied yet.
    #[error("missing dependency: {0}")]
    MissingDependency(ChangeHash),

    /// An op with this id was already integrated.
    #[error("duplicate operation: {0}")]
    DuplicateOperation(OpId),

    /// An op references a position that has not been integrated yet.
    #[error("causality violation: reference {0} not integrated")]
    CausalityViolation(OpId),

    /// Applying the move would make a block its own ancestor.
    #[error("cycle detected: block {0:?} would become its own ancestor")]
    CycleDetected(BlockId),

    /// The target parent does not exist in the tree.
    #[error("unknown parent: {0:?}")]
    UnknownParent(BlockId),

    /// The change violates genesis invariants (first change must have no
    /// deps and depth 0; later changes must name the entity's genesis).
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// A structurally invalid move request (empty block id, block moved
    /// relative to itself, reserved id misuse, left sibling not under the
    /// target parent).
    #[error("invalid move: {0}")]
    InvalidMove(String),

    /// The supplied content address does not match the change body.
    #[error("hash mismatch: change body hashes to {actual}, expected {expected}")]
    HashMismatch {
        expected: ChangeHash,
        actual: ChangeHash,
    },

    /// Canonical encoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

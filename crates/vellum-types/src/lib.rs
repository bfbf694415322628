//! Shared identity and block types for Vellum.
//!
//! Everything here is plain data: typed ids wrapping UUIDv7, and the
//! block value types that travel inside change bodies. The CRDT
//! semantics live in `vellum-crdt`; this crate only defines what the
//! data *is*, never how it merges.

mod block;
mod ids;

pub use block::{BlockId, BlockState};
pub use ids::{EntityId, PrincipalId};

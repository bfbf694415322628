//! Change records: the signed, content-addressed unit of replication.
//!
//! A change carries an ordered op list plus causal metadata (genesis ref,
//! deps, depth, author, timestamp). Its hash is blake3 over the canonical
//! postcard encoding of everything except the signature, so two replicas
//! that independently derive the same logical edit produce the same hash.
//! Signing and verification themselves live outside this crate, behind the
//! [`Signer`] seam.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use vellum_types::{BlockId, BlockState, PrincipalId};

use crate::error::CrdtError;
use crate::opid::OpId;
use crate::Result;

/// Content address of a change: blake3 of its signing payload.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ChangeHash([u8; 32]);

impl ChangeHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for logging.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "change({})", self.short())
    }
}

impl FromStr for ChangeHash {
    type Err = CrdtError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CrdtError::Serialization(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CrdtError::Serialization("change hash must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

/// One operation inside a change body.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Set one document metadata key ('/'-separated path).
    SetMetadata { key: String, value: serde_json::Value },
    /// Set one attribute on a block (document-level when the block id is
    /// empty).
    SetAttribute {
        block: BlockId,
        key: String,
        value: serde_json::Value,
    },
    /// Replace the full content of one block.
    ReplaceBlock { state: BlockState },
    /// Move a chained run of blocks under `parent`, the first one to the
    /// right of `ref_id` and each following one to the right of its
    /// predecessor in the run.
    MoveBlocks {
        parent: BlockId,
        blocks: Vec<BlockId>,
        ref_id: OpId,
    },
    /// Delete a chained run of blocks (move them under trash).
    DeleteBlocks { blocks: Vec<BlockId> },
}

impl Op {
    /// How many op ids this op consumes when applied. Multi-block moves
    /// and deletes take one id per block.
    pub fn opid_count(&self) -> u32 {
        match self {
            Op::MoveBlocks { blocks, .. } | Op::DeleteBlocks { blocks } => blocks.len() as u32,
            _ => 1,
        }
    }
}

/// The part of a change that is hashed and signed. Field order is the wire
/// order; changing it changes every hash.
#[derive(Serialize)]
struct SigningPayload<'a> {
    genesis: &'a Option<ChangeHash>,
    deps: &'a [ChangeHash],
    depth: u32,
    ops: &'a [Op],
    author: &'a PrincipalId,
    ts: u64,
}

/// One decoded change record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Hash of the entity's first change; `None` iff this *is* the first
    /// change.
    pub genesis: Option<ChangeHash>,
    /// Direct causal dependencies. Empty iff genesis.
    pub deps: Vec<ChangeHash>,
    /// Strictly greater than the depth of every dep; 0 for genesis.
    pub depth: u32,
    pub ops: Vec<Op>,
    pub author: PrincipalId,
    /// Logical millisecond timestamp (≤ 48 bits).
    pub ts: u64,
    /// Detached signature over the signing payload. Not part of the hash.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature: Vec<u8>,
}

impl Change {
    /// Whether this change claims to be an entity's first.
    pub fn is_genesis(&self) -> bool {
        self.genesis.is_none() && self.deps.is_empty()
    }

    /// Canonical bytes that get hashed and signed.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let payload = SigningPayload {
            genesis: &self.genesis,
            deps: &self.deps,
            depth: self.depth,
            ops: &self.ops,
            author: &self.author,
            ts: self.ts,
        };
        postcard::to_stdvec(&payload).map_err(|e| CrdtError::Serialization(e.to_string()))
    }

    /// Content address of this change.
    pub fn hash(&self) -> Result<ChangeHash> {
        Ok(ChangeHash(*blake3::hash(&self.signing_payload()?).as_bytes()))
    }
}

/// Signing seam. The core builds the payload; whoever holds keys produces
/// the signature bytes.
pub trait Signer {
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

impl<F> Signer for F
where
    F: Fn(&[u8]) -> Vec<u8>,
{
    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self(payload)
    }
}

/// Signer that attaches no signature. For tests and local-only entities.
pub struct NoSigner;

impl Signer for NoSigner {
    fn sign(&self, _payload: &[u8]) -> Vec<u8> {
        Vec::new()
    }
}

//! Block identifiers and block value state.
//!
//! Block ids are caller-supplied short strings, unique within one entity.
//! Two ids are reserved: the empty string is the document root, and
//! `$trash` is the tombstone parent that deleted blocks are moved under.
//! Neither may be used as a regular block id.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;

/// Reserved parent id for deleted blocks.
const TRASH: &str = "$trash";

/// A block identifier within one entity.
///
/// Short caller-supplied string (typically a random base58 nonce a few bytes
/// long), stored inline via small-string optimization.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(SmartString);

impl BlockId {
    /// Wrap a caller-supplied id.
    pub fn new(id: impl Into<SmartString>) -> Self {
        Self(id.into())
    }

    /// The document root — the reserved empty id.
    pub fn root() -> Self {
        Self(SmartString::new())
    }

    /// The reserved trash parent for deleted blocks.
    pub fn trash() -> Self {
        Self(TRASH.into())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_trash(&self) -> bool {
        self.0 == TRASH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl Borrow<str> for BlockId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The full value of one block, as carried in a `ReplaceBlock` op.
///
/// This is plain content — position in the document comes from move ops,
/// never from the block state itself.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockState {
    /// Block id, unique within the entity.
    pub id: BlockId,

    /// Block kind tag ("paragraph", "heading", "code", ...). Opaque to the
    /// CRDT core; the presentation layer interprets it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Text payload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    /// Structured attributes. Sorted map so the canonical encoding is
    /// deterministic across replicas.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl BlockState {
    /// Create a text block with the given id and payload.
    pub fn text(id: impl Into<BlockId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "paragraph".into(),
            text: text.into(),
            attributes: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids() {
        assert!(BlockId::root().is_root());
        assert!(BlockId::trash().is_trash());
        assert!(!BlockId::from("b1").is_root());
        assert!(!BlockId::from("b1").is_trash());
    }

    #[test]
    fn test_block_id_ordering_matches_str() {
        let mut ids = vec![BlockId::from("b2"), BlockId::from("b1"), BlockId::root()];
        ids.sort();
        assert_eq!(ids[0], BlockId::root());
        assert_eq!(ids[1].as_str(), "b1");
    }

    #[test]
    fn test_block_state_equality_is_deep() {
        let mut a = BlockState::text("b1", "hello");
        let b = BlockState::text("b1", "hello");
        assert_eq!(a, b);
        a.attributes.insert("lang".into(), serde_json::json!("en"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_serde_transparent_id() {
        let id = BlockId::from("b1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"b1\"");
    }
}

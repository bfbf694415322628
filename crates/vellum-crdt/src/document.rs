//! Edit sessions and document hydration.
//!
//! A [`Session`] aggregates one batch of edits — dirty metadata, dirty
//! block content, staged tree moves — and turns them into a single
//! canonical, content-addressed [`Change`] on [`Session::sign`]. Signing
//! consumes the session and applies the change back into the entity, so
//! reads through the same dag immediately reflect the edit.
//!
//! Canonical op order is fixed: tree moves first, then metadata sets by
//! key, then attribute sets, then block replacements by id. Two replicas
//! that independently derive the same logical edit therefore produce
//! byte-identical op lists, which is what makes deduplication by hash
//! meaningful.

use std::collections::{BTreeMap, HashSet};

use vellum_types::{BlockId, BlockState, PrincipalId};

use crate::change::{Change, ChangeHash, Op, Signer};
use crate::dag::ChangeDag;
use crate::mutation::{MoveEffect, TreeMutation};
use crate::opid::{OpId, MAX_TS};
use crate::tree::MoveRecord;
use crate::Result;

/// One edit batch over one entity.
pub struct Session<'a> {
    dag: &'a mut ChangeDag,
    metadata: BTreeMap<String, serde_json::Value>,
    attrs: BTreeMap<(BlockId, String), serde_json::Value>,
    blocks: BTreeMap<BlockId, BlockState>,
    created: HashSet<BlockId>,
    deleted: HashSet<BlockId>,
    mutation: Option<TreeMutation>,
}

impl ChangeDag {
    /// Start an edit session. The dag is borrowed mutably for the
    /// session's lifetime, so edits on one entity are serialized by
    /// construction.
    pub fn begin(&mut self) -> Session<'_> {
        Session {
            dag: self,
            metadata: BTreeMap::new(),
            attrs: BTreeMap::new(),
            blocks: BTreeMap::new(),
            created: HashSet::new(),
            deleted: HashSet::new(),
            mutation: None,
        }
    }
}

impl Session<'_> {
    /// Stage one metadata write. Writing the value the entity already
    /// holds drops any pending write for the key instead of staging a
    /// no-op.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let key = key.into();
        if self.dag.metadata_latest(&key).map(|(_, v)| v) == Some(&value) {
            self.metadata.remove(&key);
            return;
        }
        self.metadata.insert(key, value);
    }

    /// Stage one attribute write on a block (the root id targets the
    /// document itself).
    pub fn set_attribute(
        &mut self,
        block: impl Into<BlockId>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) {
        let entry = (block.into(), key.into());
        if self.dag.attr_latest(&entry.0, &entry.1).map(|(_, v)| v) == Some(&value) {
            self.attrs.remove(&entry);
            return;
        }
        self.attrs.insert(entry, value);
    }

    /// Stage a full-content replacement for one block.
    pub fn replace_block(&mut self, state: BlockState) {
        if self.dag.block_latest(&state.id).map(|(_, v)| v) == Some(&state) {
            self.blocks.remove(&state.id);
            return;
        }
        self.blocks.insert(state.id.clone(), state);
    }

    /// Stage a move of `block` under `parent`, right of `left` (root id =
    /// leftmost). The first structural edit snapshots the tree.
    pub fn move_block(
        &mut self,
        parent: &BlockId,
        block: &BlockId,
        left: &BlockId,
    ) -> Result<MoveEffect> {
        let mutation = self.mutation.get_or_insert_with(|| self.dag.tree().mutate());
        let effect = mutation.move_block(parent, block, left)?;

        if effect != MoveEffect::Noop {
            if parent.is_trash() {
                self.deleted.insert(block.clone());
            } else {
                self.deleted.remove(block);
                if effect == MoveEffect::Created {
                    self.created.insert(block.clone());
                }
            }
        }
        Ok(effect)
    }

    /// Stage a deletion (move under trash).
    pub fn delete_block(&mut self, block: &BlockId) -> Result<()> {
        self.move_block(&BlockId::trash(), block, &BlockId::root())?;
        Ok(())
    }

    /// Consume the session into a signed change and apply it.
    ///
    /// Returns `None` when the batch nets out empty on an existing entity.
    /// On a fresh entity an empty batch still produces the genesis change.
    /// The session is taken by value — signing twice is a compile error.
    pub fn sign(
        self,
        author: PrincipalId,
        ts: u64,
        signer: &dyn Signer,
    ) -> Result<Option<(ChangeHash, Change)>> {
        let Session { dag, metadata, mut attrs, mut blocks, created, deleted, mutation } = self;

        // Timestamps must strictly dominate every dep; bump the caller's
        // clock forward if the entity has seen a later one.
        let mut ts = ts.min(MAX_TS);
        if !dag.is_empty() {
            ts = ts.max(dag.max_head_ts() + 1).min(MAX_TS);
        }
        let actor = dag.actor_id(&author);

        let records = match mutation {
            Some(m) => m.commit(ts, actor),
            None => Vec::new(),
        };
        let mut ops = coalesce_moves(&records);

        // Content for blocks that were created and deleted within this
        // same batch never leaves the session.
        for block in created.intersection(&deleted) {
            blocks.remove(block);
        }
        attrs.retain(|(block, _), _| !(created.contains(block) && deleted.contains(block)));

        for (key, value) in metadata {
            ops.push(Op::SetMetadata { key, value });
        }
        for ((block, key), value) in attrs {
            ops.push(Op::SetAttribute { block, key, value });
        }
        for (_, state) in blocks {
            ops.push(Op::ReplaceBlock { state });
        }

        if ops.is_empty() && !dag.is_empty() {
            return Ok(None);
        }

        let mut change = Change {
            genesis: dag.genesis(),
            deps: dag.heads(),
            depth: dag.next_depth(),
            ops,
            author,
            ts,
            signature: Vec::new(),
        };
        change.signature = signer.sign(&change.signing_payload()?);
        let hash = change.hash()?;
        dag.apply_change(hash, change.clone())?;
        Ok(Some((hash, change)))
    }
}

/// Collapse a commit's move records into the canonical op list. Records
/// that chain (same parent, each ref the previous record's op id) fold
/// into one multi-block op; trash-parented runs become deletes.
fn coalesce_moves(records: &[MoveRecord]) -> Vec<Op> {
    let mut ops: Vec<Op> = Vec::new();
    let mut prev_opid = OpId::ZERO;
    for rec in records {
        let chained = match ops.last_mut() {
            Some(Op::MoveBlocks { parent, blocks, .. })
                if *parent == rec.parent && rec.ref_id == prev_opid =>
            {
                blocks.push(rec.block.clone());
                true
            }
            Some(Op::DeleteBlocks { blocks }) if rec.parent.is_trash() && rec.ref_id == prev_opid => {
                blocks.push(rec.block.clone());
                true
            }
            _ => false,
        };
        if !chained {
            if rec.parent.is_trash() {
                debug_assert!(rec.ref_id.is_zero(), "delete run must anchor at zero");
                ops.push(Op::DeleteBlocks { blocks: vec![rec.block.clone()] });
            } else {
                ops.push(Op::MoveBlocks {
                    parent: rec.parent.clone(),
                    blocks: vec![rec.block.clone()],
                    ref_id: rec.ref_id,
                });
            }
        }
        prev_opid = rec.opid;
    }
    ops
}

/// One rendered document node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HydratedNode {
    /// Effective parent after promotion past content-less nodes.
    pub parent: BlockId,
    pub state: BlockState,
}

/// The exported materialized document.
#[derive(Clone, Debug, Default)]
pub struct HydratedDocument {
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub authors: Vec<PrincipalId>,
    /// Sorted, dot-joined head hashes.
    pub version: String,
    /// Depth-first document order.
    pub nodes: Vec<HydratedNode>,
}

impl ChangeDag {
    /// Materialize the document for external consumption.
    ///
    /// Tree nodes whose content register is empty (created structurally
    /// but never given content) are skipped, and their children re-parent
    /// to the nearest content-bearing ancestor so document order is
    /// preserved.
    pub fn hydrate(&self) -> HydratedDocument {
        let mut nodes = Vec::new();
        // block → effective parent, for children of skipped nodes.
        let mut promoted: BTreeMap<BlockId, BlockId> = BTreeMap::new();
        for (parent, block) in self.tree().dft() {
            let effective = promoted.get(&parent).cloned().unwrap_or(parent);
            match self.block_latest(&block) {
                Some((_, content)) => {
                    let mut state = content.clone();
                    if let Some(attrs) = self.state.attrs.get(&block) {
                        for (key, reg) in attrs {
                            if let Some(value) = reg.value() {
                                state.attributes.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    nodes.push(HydratedNode { parent: effective, state });
                }
                None => {
                    promoted.insert(block, effective);
                }
            }
        }

        HydratedDocument {
            metadata: self.resolved_metadata(),
            authors: self.authors(),
            version: self.version(),
            nodes,
        }
    }

    /// Metadata with longest-prefix shadowing: a key is suppressed when an
    /// ancestor path holds a write that is not older. Document-level
    /// attributes fill in behind, never overriding a metadata key.
    fn resolved_metadata(&self) -> BTreeMap<String, serde_json::Value> {
        let entries: Vec<(&String, OpId, &serde_json::Value)> = self
            .state
            .metadata
            .iter()
            .filter_map(|(key, reg)| reg.latest().map(|(id, v)| (key, id, v)))
            .collect();

        let mut out = BTreeMap::new();
        'keys: for (key, opid, value) in &entries {
            for (ancestor, anc_opid, _) in &entries {
                let is_prefix = key.len() > ancestor.len()
                    && key.starts_with(ancestor.as_str())
                    && key.as_bytes()[ancestor.len()] == b'/';
                if is_prefix && *anc_opid >= *opid {
                    continue 'keys;
                }
            }
            out.insert((*key).clone(), (*value).clone());
        }

        if let Some(doc_attrs) = self.state.attrs.get(&BlockId::root()) {
            for (key, reg) in doc_attrs {
                if let Some(value) = reg.value() {
                    out.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        out
    }
}

//! Block-tree CRDT with move semantics.
//!
//! The tree is a composition of one [`Rga`] child list per parent id, plus a
//! global move log ordered by op id. Two parents always exist: the document
//! root (the empty id) and the trash node that deleted blocks are moved
//! under.
//!
//! Integration only appends: a move never removes the block's previous list
//! slot. Which slot is the block's *current* position is decided at read
//! time by replaying the move log in op-id order ([`BlockTree::state`]),
//! marking superseded and cycle-forming moves invisible. Concurrent moves
//! that would create a cycle are a legitimate outcome of replication and
//! are resolved silently and deterministically, never reported as errors.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use vellum_types::BlockId;

use crate::error::CrdtError;
use crate::mutation::TreeMutation;
use crate::opid::{OpId, Position};
use crate::rga::Rga;
use crate::Result;

/// One entry in the global move log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MoveRecord {
    pub opid: OpId,
    /// Target parent (may be the root or the trash node).
    pub parent: BlockId,
    pub block: BlockId,
    /// Position of the left sibling at integration time; `OpId::ZERO` means
    /// leftmost under `parent`.
    pub ref_id: OpId,
}

/// A block's resolved position in the materialized tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Placement {
    pub parent: BlockId,
    pub position: OpId,
}

/// Derived view over the move log: current placement per block, plus the
/// set of moves rendered invisible (superseded or cycle-forming). Cheap to
/// rebuild, never authoritative.
#[derive(Clone, Debug, Default)]
pub struct BlockTreeState {
    pub placements: HashMap<BlockId, Placement>,
    pub invisible: HashSet<OpId>,
}

/// The block tree itself.
///
/// Child lists are `Arc`-shared so a [`TreeMutation`] snapshot is a
/// structural copy: only the lists a staged move actually touches get
/// duplicated (`Arc::make_mut` path-copying).
#[derive(Clone, Debug)]
pub struct BlockTree {
    /// Child list per parent id.
    pub(crate) lists: HashMap<BlockId, Arc<Rga<BlockId>>>,
    /// Global move log, ordered by op id.
    pub(crate) moves: BTreeMap<OpId, MoveRecord>,
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTree {
    pub fn new() -> Self {
        let mut lists = HashMap::new();
        lists.insert(BlockId::root(), Arc::new(Rga::new()));
        lists.insert(BlockId::trash(), Arc::new(Rga::new()));
        Self { lists, moves: BTreeMap::new() }
    }

    /// Integrate one committed move of `block` under `parent`, after the
    /// slot identified by `ref_id` (`OpId::ZERO` = leftmost).
    ///
    /// The parent must already exist as some node's id (root and trash
    /// included). On success the moved block gains its own (possibly empty)
    /// child list so it can host children, and the move is appended to the
    /// global log. Rejection leaves the tree untouched.
    pub fn integrate(
        &mut self,
        opid: OpId,
        parent: &BlockId,
        block: &BlockId,
        ref_id: OpId,
    ) -> Result<()> {
        if self.moves.contains_key(&opid) {
            return Err(CrdtError::DuplicateOperation(opid));
        }
        let Some(list) = self.lists.get_mut(parent) else {
            return Err(CrdtError::UnknownParent(parent.clone()));
        };

        let ref_pos = (!ref_id.is_zero()).then_some(Position::Committed(ref_id));
        Arc::make_mut(list).integrate(Position::Committed(opid), ref_pos, block.clone())?;

        self.lists.entry(block.clone()).or_insert_with(|| Arc::new(Rga::new()));
        self.moves.insert(
            opid,
            MoveRecord {
                opid,
                parent: parent.clone(),
                block: block.clone(),
                ref_id,
            },
        );
        Ok(())
    }

    /// Materialize the current tree state by replaying the move log in
    /// op-id order.
    ///
    /// Last move wins per block: an earlier placement of the same block is
    /// marked invisible. A move whose target parent is (transitively) a
    /// descendant of the moved block is marked invisible instead of applied
    /// — the cycle guard.
    pub fn state(&self) -> BlockTreeState {
        let mut state = BlockTreeState::default();
        for (opid, rec) in &self.moves {
            if self.creates_cycle(&state.placements, rec) {
                tracing::debug!(block = %rec.block, parent = %rec.parent, "move skipped: would create cycle");
                state.invisible.insert(*opid);
                continue;
            }
            let placement = Placement { parent: rec.parent.clone(), position: *opid };
            if let Some(prev) = state.placements.insert(rec.block.clone(), placement) {
                state.invisible.insert(prev.position);
            }
        }
        state
    }

    /// Would applying `rec` make its block an ancestor of itself?
    fn creates_cycle(&self, placements: &HashMap<BlockId, Placement>, rec: &MoveRecord) -> bool {
        let mut cur = rec.parent.clone();
        let mut hops = placements.len() + 2;
        loop {
            if cur == rec.block {
                return true;
            }
            if cur.is_root() || cur.is_trash() {
                return false;
            }
            match placements.get(&cur) {
                Some(p) => cur = p.parent.clone(),
                None => return false,
            }
            hops -= 1;
            if hops == 0 {
                // Placements should always chain to root or trash; bail
                // rather than spin if that invariant is ever broken.
                tracing::warn!(block = %rec.block, "ancestor chain exceeded placement count");
                return true;
            }
        }
    }

    /// Depth-first traversal from the root, yielding `(parent, block)` in
    /// canonical document order. Skips tombstoned slots, invisible moves,
    /// and everything under trash.
    pub fn dft(&self) -> Vec<(BlockId, BlockId)> {
        let state = self.state();
        let mut out = Vec::new();
        self.walk(&BlockId::root(), &state, &mut out);
        out
    }

    fn walk(&self, parent: &BlockId, state: &BlockTreeState, out: &mut Vec<(BlockId, BlockId)>) {
        let Some(list) = self.lists.get(parent) else {
            return;
        };
        for item in list.iter() {
            if item.deleted {
                continue;
            }
            let Position::Committed(opid) = item.pos else {
                continue;
            };
            if state.invisible.contains(&opid) {
                continue;
            }
            // Only the block's current placement renders it.
            let current = state
                .placements
                .get(&item.value)
                .is_some_and(|p| p.position == opid);
            if !current {
                continue;
            }
            out.push((parent.clone(), item.value.clone()));
            self.walk(&item.value, state, out);
        }
    }

    /// Begin a staged, copy-on-write batch of moves against the current
    /// state. The tree itself is not modified until the resulting records
    /// are integrated back via a change.
    pub fn mutate(&self) -> TreeMutation {
        TreeMutation::new(self)
    }

    /// Whether `parent` exists as a node id (and can therefore host
    /// children).
    pub fn knows(&self, parent: &BlockId) -> bool {
        self.lists.contains_key(parent)
    }
}

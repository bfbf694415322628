//! Staged block-tree mutations.
//!
//! A [`TreeMutation`] snapshots the tree via structural copy (the per-parent
//! `Arc` lists are shared; only lists a staged move touches are duplicated)
//! and batches any number of moves against the copy. Staged slots carry
//! [`Position::Pending`] ids; real op ids are assigned at commit time, in
//! breadth-first traversal order.
//!
//! Commit is *minimal*: a staged move whose final logical position
//! `(parent, left sibling)` matches the pre-mutation snapshot emits nothing,
//! so a sequence of moves that nets out to no change produces zero records.
//! Commit consumes the mutation — reuse is a compile error, not a runtime
//! panic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use vellum_types::BlockId;

use crate::error::CrdtError;
use crate::opid::{OpId, Position};
use crate::rga::{Rga, RgaItem};
use crate::tree::{BlockTree, MoveRecord};
use crate::Result;

/// What a single `move_block` call did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MoveEffect {
    /// The block had no placement before; this move introduces it.
    Created,
    /// The block existed and was repositioned.
    Moved,
    /// The block already sits at exactly this logical position; nothing was
    /// staged.
    Noop,
}

/// A block's placement in the staged tree.
#[derive(Clone, Debug, Eq, PartialEq)]
struct StagedPlacement {
    parent: BlockId,
    pos: Position,
}

/// A block's logical position in the pre-mutation snapshot, used for the
/// unchanged-skip check at commit time.
#[derive(Clone, Debug)]
struct BaseRecord {
    parent: BlockId,
    /// Op id of the visible left sibling (`OpId::ZERO` = leftmost).
    left: OpId,
    /// The block's own committed position op id.
    opid: OpId,
}

/// A copy-on-write batch of moves against one tree snapshot.
pub struct TreeMutation {
    lists: HashMap<BlockId, Arc<Rga<BlockId>>>,
    /// Current placement per block, staged moves included.
    placements: HashMap<BlockId, StagedPlacement>,
    /// Pre-mutation logical positions.
    base: HashMap<BlockId, BaseRecord>,
    next_pending: u64,
}

impl TreeMutation {
    pub(crate) fn new(tree: &BlockTree) -> Self {
        let state = tree.state();

        let placements = state
            .placements
            .iter()
            .map(|(block, p)| {
                (
                    block.clone(),
                    StagedPlacement {
                        parent: p.parent.clone(),
                        pos: Position::Committed(p.position),
                    },
                )
            })
            .collect();

        // Record each visible block's (parent, left sibling) so commit can
        // recognize placements that net out unchanged.
        let mut base = HashMap::new();
        for (parent, list) in &tree.lists {
            let mut prev = OpId::ZERO;
            for item in list.iter() {
                let Position::Committed(op) = item.pos else {
                    continue;
                };
                if item.deleted || state.invisible.contains(&op) {
                    continue;
                }
                let current = state
                    .placements
                    .get(&item.value)
                    .is_some_and(|p| p.position == op);
                if !current {
                    continue;
                }
                base.insert(
                    item.value.clone(),
                    BaseRecord { parent: parent.clone(), left: prev, opid: op },
                );
                prev = op;
            }
        }

        Self {
            lists: tree.lists.clone(),
            placements,
            base,
            next_pending: 0,
        }
    }

    /// Stage a move of `block` under `parent`, to the right of `left`
    /// (the root id means leftmost).
    ///
    /// Every rejection happens before any staging, so a failed move leaves
    /// the snapshot exactly as it was.
    pub fn move_block(
        &mut self,
        parent: &BlockId,
        block: &BlockId,
        left: &BlockId,
    ) -> Result<MoveEffect> {
        if block.is_root() {
            return Err(CrdtError::InvalidMove("block id must not be empty".into()));
        }
        if block.is_trash() {
            return Err(CrdtError::InvalidMove("trash node cannot be moved".into()));
        }
        if block == left {
            return Err(CrdtError::InvalidMove(format!(
                "block {block:?} cannot be its own left sibling"
            )));
        }
        if left.is_trash() {
            return Err(CrdtError::InvalidMove("left sibling must not be trash".into()));
        }
        if !parent.is_root() && parent == left {
            return Err(CrdtError::InvalidMove(format!(
                "parent {parent:?} cannot be its own child's left sibling"
            )));
        }
        if !self.lists.contains_key(parent) {
            return Err(CrdtError::UnknownParent(parent.clone()));
        }
        if self.is_ancestor(block, parent) {
            return Err(CrdtError::CycleDetected(block.clone()));
        }

        // Resolve the left sibling's staged position.
        let target_left: Option<Position> = if left.is_root() {
            None
        } else {
            match self.placements.get(left) {
                Some(p) if p.parent == *parent => Some(p.pos),
                Some(_) => {
                    return Err(CrdtError::InvalidMove(format!(
                        "left sibling {left:?} is not under parent {parent:?}"
                    )));
                }
                None => {
                    return Err(CrdtError::InvalidMove(format!(
                        "left sibling {left:?} has no placement"
                    )));
                }
            }
        };

        // Idempotence: same parent and same visible left sibling means the
        // logical position is unchanged, even when other slots sit between
        // the two as tombstones.
        let current = self.placements.get(block).cloned();
        if let Some(cur) = &current {
            if cur.parent == *parent && self.visible_left(&cur.parent, cur.pos) == target_left {
                return Ok(MoveEffect::Noop);
            }
        }

        // All checks passed; now mutate the copy.
        if let Some(cur) = &current {
            if let Some(list) = self.lists.get_mut(&cur.parent) {
                Arc::make_mut(list).tombstone(cur.pos);
            }
        }

        let pos = Position::Pending(self.next_pending);
        self.next_pending += 1;
        let list = self
            .lists
            .get_mut(parent)
            .unwrap_or_else(|| panic!("parent list vanished for {parent:?}"));
        Arc::make_mut(list).integrate(pos, target_left, block.clone())?;

        self.lists.entry(block.clone()).or_insert_with(|| Arc::new(Rga::new()));
        self.placements.insert(
            block.clone(),
            StagedPlacement { parent: parent.clone(), pos },
        );

        Ok(if current.is_some() { MoveEffect::Moved } else { MoveEffect::Created })
    }

    /// Is `block` an ancestor of `node` (or the node itself) in the staged
    /// tree?
    fn is_ancestor(&self, block: &BlockId, node: &BlockId) -> bool {
        let mut cur = node.clone();
        let mut hops = self.placements.len() + 2;
        loop {
            if cur == *block {
                return true;
            }
            if cur.is_root() || cur.is_trash() {
                return false;
            }
            match self.placements.get(&cur) {
                Some(p) => cur = p.parent.clone(),
                None => return false,
            }
            hops -= 1;
            if hops == 0 {
                tracing::warn!(block = %block, "ancestor chain exceeded placement count");
                return true;
            }
        }
    }

    /// Position of the visible item immediately left of `pos` under
    /// `parent` (`None` = leftmost).
    fn visible_left(&self, parent: &BlockId, pos: Position) -> Option<Position> {
        let list = self.lists.get(parent)?;
        let mut prev: Option<Position> = None;
        for item in list.iter() {
            if item.pos == pos {
                return prev;
            }
            if self.is_visible(parent, item) {
                prev = Some(item.pos);
            }
        }
        None
    }

    /// A slot renders its block iff it is not tombstoned and it is the
    /// block's current staged placement under this parent.
    fn is_visible(&self, parent: &BlockId, item: &RgaItem<BlockId>) -> bool {
        !item.deleted
            && self
                .placements
                .get(&item.value)
                .is_some_and(|p| p.parent == *parent && p.pos == item.pos)
    }

    /// Finalize the batch into an ordered sequence of move records.
    ///
    /// Breadth-first from the root, each staged slot is assigned a real
    /// `(ts, counter, actor)` op id in traversal order and linked to the
    /// final op id of its visible left sibling. Unchanged placements emit
    /// nothing. The trash subtree is walked next, emitting one chained run
    /// of deletions and cancelling blocks that were both created and
    /// deleted within this batch. Any staged subtree left unreachable from
    /// root and trash is committed last, in sorted block-id order.
    pub fn commit(self, ts: u64, actor: u64) -> Vec<MoveRecord> {
        let mut records = Vec::new();
        let mut idx: u32 = 0;
        let mut visited = HashSet::new();

        visited.insert(BlockId::root());
        self.walk_moves(vec![BlockId::root()], ts, actor, &mut idx, &mut visited, &mut records);

        visited.insert(BlockId::trash());
        self.walk_trash(ts, actor, &mut idx, &mut visited, &mut records);

        // Safety net: staged placements nothing above reached.
        let mut leftover: Vec<BlockId> = self
            .placements
            .iter()
            .filter(|(block, p)| p.pos.is_pending() && !visited.contains(*block))
            .map(|(block, _)| block.clone())
            .collect();
        leftover.sort();
        for block in leftover {
            if visited.contains(&block) {
                continue;
            }
            let Some(p) = self.placements.get(&block) else {
                continue;
            };
            tracing::warn!(block = %block, "committing detached subtree");
            let opid = OpId::new(ts, idx, actor);
            idx += 1;
            records.push(MoveRecord {
                opid,
                parent: p.parent.clone(),
                block: block.clone(),
                ref_id: OpId::ZERO,
            });
            visited.insert(block.clone());
            self.walk_moves(vec![block], ts, actor, &mut idx, &mut visited, &mut records);
        }

        records
    }

    /// Breadth-first emission of move records, starting from `roots`.
    fn walk_moves(
        &self,
        roots: Vec<BlockId>,
        ts: u64,
        actor: u64,
        idx: &mut u32,
        visited: &mut HashSet<BlockId>,
        records: &mut Vec<MoveRecord>,
    ) {
        let mut queue: VecDeque<BlockId> = roots.into();
        while let Some(parent) = queue.pop_front() {
            let Some(list) = self.lists.get(&parent) else {
                continue;
            };
            let mut prev_final = OpId::ZERO;
            for item in list.iter() {
                if !self.is_visible(&parent, item) {
                    continue;
                }
                let block = &item.value;
                let final_id = match item.pos {
                    Position::Committed(id) => id,
                    Position::Pending(_) => match self.base.get(block) {
                        // Net-unchanged: the block ends up exactly where it
                        // started, so replay keeps its old slot and id.
                        Some(b) if b.parent == parent && b.left == prev_final => b.opid,
                        _ => {
                            let opid = OpId::new(ts, *idx, actor);
                            *idx += 1;
                            records.push(MoveRecord {
                                opid,
                                parent: parent.clone(),
                                block: block.clone(),
                                ref_id: prev_final,
                            });
                            opid
                        }
                    },
                };
                prev_final = final_id;
                if visited.insert(block.clone()) {
                    queue.push_back(block.clone());
                }
            }
        }
    }

    /// Breadth-first walk under trash, emitting deletions as a single
    /// chained run.
    ///
    /// A staged block with no pre-mutation placement was created and
    /// deleted within this batch; it cancels out (no record), and any
    /// pre-existing block staged underneath it is deleted directly.
    fn walk_trash(
        &self,
        ts: u64,
        actor: u64,
        idx: &mut u32,
        visited: &mut HashSet<BlockId>,
        records: &mut Vec<MoveRecord>,
    ) {
        let trash = BlockId::trash();
        let mut chain = OpId::ZERO;
        let mut queue: VecDeque<BlockId> = VecDeque::from([trash.clone()]);
        while let Some(parent) = queue.pop_front() {
            let Some(list) = self.lists.get(&parent) else {
                continue;
            };
            for item in list.iter() {
                if !self.is_visible(&parent, item) {
                    continue;
                }
                let block = &item.value;
                if item.pos.is_pending() {
                    match self.base.get(block) {
                        // Already placed here before the mutation (re-delete
                        // of a deleted block, or no-op shuffle inside trash):
                        // nothing to emit.
                        Some(b) if b.parent == parent => {}
                        // Existed elsewhere: delete it.
                        Some(_) => {
                            let opid = OpId::new(ts, *idx, actor);
                            *idx += 1;
                            records.push(MoveRecord {
                                opid,
                                parent: trash.clone(),
                                block: block.clone(),
                                ref_id: chain,
                            });
                            chain = opid;
                        }
                        // Created in this batch: cancels out.
                        None => {}
                    }
                }
                if visited.insert(block.clone()) {
                    queue.push_back(block.clone());
                }
            }
        }
    }
}

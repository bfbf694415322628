//! Conflict-free replicated document model for Vellum.
//!
//! One entity is one collaborative document: an append-only DAG of signed,
//! content-addressed changes plus the CRDT state materialized from them.
//! Replicas that apply the same change set — in any causally valid order —
//! converge on identical state with no coordinator.
//!
//! Layering, leaf first:
//!
//! - [`OpId`] / [`Position`]: the single tie-breaking primitive shared by
//!   every structure here.
//! - [`MvReg`]: per-key register resolving concurrent writes by op id.
//! - [`Rga`]: insert-after ordered list with fractional-index keys.
//! - [`BlockTree`]: one list per parent, composed into a tree with move
//!   semantics and a deterministic cycle guard.
//! - [`TreeMutation`]: staged copy-on-write move batches that commit to a
//!   minimal op sequence.
//! - [`ChangeDag`]: causal ordering, heads, minimal deps, deterministic
//!   traversal, historical checkout.
//! - [`Session`] / hydration: one edit batch in, one canonical [`Change`]
//!   out, and the rendered document for consumers.
//!
//! The crate is pure in-memory state transition: no I/O, no transport, no
//! signature verification (a [`Signer`] seam is consumed, never
//! implemented here). Instances are not safe for concurrent mutation —
//! callers serialize per entity.

pub mod change;
pub mod dag;
pub mod document;
pub mod error;
pub mod mutation;
pub mod mvreg;
pub mod opid;
pub mod rga;
pub mod tree;

pub use change::{Change, ChangeHash, NoSigner, Op, Signer};
pub use dag::{ActorMap, ActorTable, BftDeps, ChangeDag};
pub use document::{HydratedDocument, HydratedNode, Session};
pub use error::CrdtError;
pub use mutation::{MoveEffect, TreeMutation};
pub use mvreg::MvReg;
pub use opid::{OpId, Position, MAX_IDX, MAX_TS};
pub use rga::Rga;
pub use tree::{BlockTree, BlockTreeState, MoveRecord, Placement};

pub type Result<T> = std::result::Result<T, CrdtError>;

#[cfg(test)]
mod scenario_tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use vellum_types::{BlockId, BlockState, PrincipalId};

    use super::*;

    fn actors() -> Arc<dyn ActorMap + Send + Sync> {
        Arc::new(|p: &PrincipalId| u64::from(p.as_bytes()[0]))
    }

    fn principal(tag: u8) -> PrincipalId {
        let mut bytes = [0u8; 16];
        bytes[0] = tag;
        PrincipalId::from_bytes(bytes)
    }

    fn b(s: &str) -> BlockId {
        BlockId::from(s)
    }

    /// Fingerprint of everything a consumer can observe.
    fn observable(dag: &ChangeDag) -> (BTreeMap<String, serde_json::Value>, Vec<(String, String)>, String) {
        let doc = dag.hydrate();
        let nodes = doc
            .nodes
            .iter()
            .map(|n| (n.parent.as_str().to_string(), n.state.id.as_str().to_string()))
            .collect();
        (doc.metadata, nodes, doc.version)
    }

    /// Apply changes in the given order, retrying ones rejected for a
    /// missing dep until the set settles (simulates out-of-order arrival
    /// with redelivery).
    fn apply_with_redelivery(dag: &mut ChangeDag, mut pending: Vec<(ChangeHash, Change)>) {
        loop {
            let before = pending.len();
            let mut still_pending = Vec::new();
            for (hash, change) in pending {
                match dag.apply_change(hash, change.clone()) {
                    Ok(()) => {}
                    Err(CrdtError::MissingDependency(_)) => still_pending.push((hash, change)),
                    Err(e) => panic!("unexpected rejection: {e}"),
                }
            }
            if still_pending.is_empty() {
                return;
            }
            assert!(still_pending.len() < before, "change set never settles");
            pending = still_pending;
        }
    }

    /// Build a history with branching edits from two authors.
    fn sample_history() -> Vec<(ChangeHash, Change)> {
        let mut dag = ChangeDag::new(actors());
        let alice = principal(1);
        let bob = principal(2);

        let mut s = dag.begin();
        s.set_metadata("title", serde_json::json!("Notes"));
        s.move_block(&BlockId::root(), &b("intro"), &BlockId::root()).unwrap();
        s.replace_block(BlockState::text("intro", "hello"));
        s.sign(alice, 100, &NoSigner).unwrap().unwrap();

        let mut s = dag.begin();
        s.move_block(&BlockId::root(), &b("body"), &b("intro")).unwrap();
        s.replace_block(BlockState::text("body", "world"));
        s.sign(bob, 200, &NoSigner).unwrap().unwrap();

        let mut s = dag.begin();
        s.set_metadata("title", serde_json::json!("Notes v2"));
        s.move_block(&b("body"), &b("detail"), &BlockId::root()).unwrap();
        s.replace_block(BlockState::text("detail", "deep"));
        s.sign(alice, 300, &NoSigner).unwrap().unwrap();

        let mut s = dag.begin();
        s.delete_block(&b("intro")).unwrap();
        s.sign(bob, 400, &NoSigner).unwrap().unwrap();

        let heads = dag.heads();
        let mut out = Vec::new();
        for hash in dag.bft_deps(heads[0]) {
            out.push((hash, dag.get(&hash).cloned().unwrap()));
        }
        out
    }

    #[test]
    fn test_convergence_across_delivery_orders() {
        let history = sample_history();

        let mut reference = ChangeDag::new(actors());
        apply_with_redelivery(&mut reference, history.clone());
        let expected = observable(&reference);

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let mut shuffled = history.clone();
            shuffled.shuffle(&mut rng);
            let mut dag = ChangeDag::new(actors());
            apply_with_redelivery(&mut dag, shuffled);
            assert_eq!(observable(&dag), expected);
        }
    }

    #[test]
    fn test_basic_convergence_scenario() {
        let alice = principal(1);
        let c1 = Change {
            genesis: None,
            deps: vec![],
            depth: 0,
            ops: vec![Op::SetMetadata { key: "title".into(), value: serde_json::json!("Hello") }],
            author: alice,
            ts: 100,
            signature: vec![],
        };
        let h1 = c1.hash().unwrap();
        let c2 = Change {
            genesis: Some(h1),
            deps: vec![h1],
            depth: 1,
            ops: vec![Op::SetMetadata {
                key: "title".into(),
                value: serde_json::json!("Hello world"),
            }],
            author: alice,
            ts: 200,
            signature: vec![],
        };
        let h2 = c2.hash().unwrap();

        let mut forward = ChangeDag::new(actors());
        forward.apply_change(h1, c1.clone()).unwrap();
        forward.apply_change(h2, c2.clone()).unwrap();

        let mut backward = ChangeDag::new(actors());
        let err = backward.apply_change(h2, c2.clone()).unwrap_err();
        assert!(matches!(err, CrdtError::MissingDependency(d) if d == h1));
        backward.apply_change(h1, c1).unwrap();
        backward.apply_change(h2, c2).unwrap();

        for dag in [&forward, &backward] {
            assert_eq!(
                dag.hydrate().metadata.get("title"),
                Some(&serde_json::json!("Hello world"))
            );
        }
        assert_eq!(forward.version(), backward.version());
    }

    #[test]
    fn test_tree_move_scenario() {
        let mut dag = ChangeDag::new(actors());
        let alice = principal(1);
        let root = BlockId::root();

        let mut s = dag.begin();
        s.move_block(&root, &b("b1"), &root).unwrap();
        s.move_block(&root, &b("b2"), &b("b1")).unwrap();
        s.move_block(&root, &b("b3"), &b("b2")).unwrap();
        s.move_block(&b("b1"), &b("b1.0"), &root).unwrap();
        s.move_block(&b("b1"), &b("b1.1"), &b("b1.0")).unwrap();
        s.move_block(&b("b1"), &b("b2"), &b("b1.1")).unwrap();
        s.move_block(&b("b1"), &b("b2"), &b("b1.0")).unwrap();
        s.sign(alice, 100, &NoSigner).unwrap().unwrap();

        let pairs: Vec<(String, String)> = dag
            .tree()
            .dft()
            .into_iter()
            .map(|(p, c)| (p.as_str().to_string(), c.as_str().to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("".to_string(), "b1".to_string()),
                ("b1".to_string(), "b1.0".to_string()),
                ("b1".to_string(), "b1.1".to_string()),
                ("b1".to_string(), "b2".to_string()),
                ("".to_string(), "b3".to_string()),
            ]
        );
    }

    #[test]
    fn test_concurrent_edits_from_two_replicas_converge() {
        // Shared base, then two replicas branch and exchange changes.
        let alice = principal(1);
        let bob = principal(2);

        let mut replica_a = ChangeDag::new(actors());
        let mut s = replica_a.begin();
        s.set_metadata("title", serde_json::json!("Doc"));
        s.move_block(&BlockId::root(), &b("b1"), &BlockId::root()).unwrap();
        s.replace_block(BlockState::text("b1", "base"));
        let (h0, c0) = s.sign(alice, 100, &NoSigner).unwrap().unwrap();

        let mut replica_b = ChangeDag::new(actors());
        replica_b.apply_change(h0, c0).unwrap();

        let mut s = replica_a.begin();
        s.move_block(&BlockId::root(), &b("a1"), &b("b1")).unwrap();
        s.replace_block(BlockState::text("a1", "from alice"));
        let (ha, ca) = s.sign(alice, 200, &NoSigner).unwrap().unwrap();

        let mut s = replica_b.begin();
        s.move_block(&BlockId::root(), &b("z1"), &b("b1")).unwrap();
        s.replace_block(BlockState::text("z1", "from bob"));
        let (hb, cb) = s.sign(bob, 250, &NoSigner).unwrap().unwrap();

        replica_a.apply_change(hb, cb).unwrap();
        replica_b.apply_change(ha, ca).unwrap();

        let fp_a = {
            let doc = replica_a.hydrate();
            doc.nodes.iter().map(|n| n.state.id.clone()).collect::<Vec<_>>()
        };
        let fp_b = {
            let doc = replica_b.hydrate();
            doc.nodes.iter().map(|n| n.state.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(fp_a, fp_b);
        assert_eq!(replica_a.version(), replica_b.version());
        assert_eq!(replica_a.heads().len(), 2);

        // The merge change names a minimal dep set.
        let mut s = replica_a.begin();
        s.set_metadata("merged", serde_json::json!(true));
        let (_, merge) = s.sign(alice, 300, &NoSigner).unwrap().unwrap();
        let mut expected = vec![ha, hb];
        expected.sort();
        assert_eq!(merge.deps, expected);
    }
}

//! # Recovery Engine
//!
//! Runs once during open, between pool attach and the first request. The
//! volatile index does not survive process death, so every open rebuilds it
//! from the persistent leaf chain; before that, any micro-log left armed by
//! a crash is resolved so the chain is free of split/unlink artifacts.
//!
//! ## Recovery Flow
//!
//! ```text
//! 1. head == null       -> initialize counters (opened=1, closed=0), done
//! 2. closed > opened    -> Corruption (counters can never run backwards)
//! 3. resolve split log  -> zero duplicate source fingerprints, scrub stale
//!                          cells, clear the log
//! 4. resolve delete log -> replay the unlink (prev.next = leaf.next or
//!                          head = leaf.next), free the leaf, clear the log
//! 5. walk the chain     -> cycle detection; collect fingerprints + max key
//! 6. rebuild the index  -> sort occupied leaves by max key and re-attach
//!                          them left to right through the same parent
//!                          update routine the split path uses
//! 7. counters           -> opened = closed + 1
//! ```
//!
//! ## Split-Log Resolution
//!
//! A crash between a slot move's destination fingerprint write and the
//! source fingerprint clear leaves the same key visible in both leaves.
//! That state is benign for reads (the new leaf sits ahead of the source in
//! the chain) but would break the disjoint-range assumption the index
//! rebuild relies on. Resolution compares the two leaves slot by slot:
//! matching keys at the same index lose their source fingerprint, and
//! emptied source slots with stale cell bytes are scrubbed so they can
//! never free an out-of-line block that moved to the new leaf.
//!
//! ## Index Rebuild
//!
//! Occupied leaves carry disjoint key ranges (the split protocol guarantees
//! it), so sorting them by their largest key yields the leaf order, and the
//! largest key of each leaf is exactly the separator under which its right
//! neighbor is attached. Empty leaves stay indexed by parentless leaf nodes:
//! they hold no keys, so routing never needs to reach them, and giving them
//! a separator would force a duplicate into the strictly-increasing key
//! arrays.

use eyre::Result;
use hashbrown::HashSet;

use super::corruption;
use super::fingerprint::EMPTY;
use super::leaf;
use super::node::{LeafNode, Node};
use super::tree::FpTree;
use crate::config::NODE_KEYS;
use crate::storage::{PPtr, ROOT_OFFSET, ROOT_SIZE};

impl FpTree {
    /// Rebuilds the volatile index from the persistent leaf list and
    /// resolves interrupted structural operations. See the module docs for
    /// the full flow.
    pub(crate) fn recover(&mut self) -> Result<()> {
        let head = self.pool().root()?.head();
        if head.is_null() {
            self.pool_mut().transaction(|txn| {
                let root = txn.root_mut()?;
                root.set_opened(1);
                root.set_closed(0);
                Ok(())
            })?;
            tracing::debug!("initialized fresh pool root");
            return Ok(());
        }

        let (opened, closed) = {
            let root = self.pool().root()?;
            (root.opened(), root.closed())
        };
        if closed > opened {
            return Err(corruption(format!(
                "close counter {} ahead of open counter {}",
                closed, opened
            )));
        }
        if opened != closed {
            tracing::warn!(opened, closed, "pool was not closed cleanly, recovering");
        }

        self.resolve_split_log()?;
        self.resolve_delete_log()?;
        self.rebuild_index()?;

        // A plain increment after an orderly close; a correction after a
        // crash left the counters unbalanced.
        self.pool_mut().transaction(|txn| {
            let root = txn.root_mut()?;
            let closed = root.closed();
            root.set_opened(closed + 1);
            Ok(())
        })?;
        tracing::debug!(opened = closed + 1, "recovered tree");
        Ok(())
    }

    fn resolve_split_log(&mut self) -> Result<()> {
        let (src, new) = {
            let root = self.pool().root()?;
            (root.split_src(), root.split_new())
        };
        if src.is_null() {
            return Ok(());
        }
        tracing::warn!(
            src = src.offset(),
            new = new.offset(),
            "resolving interrupted leaf split"
        );

        self.pool_mut().transaction(|txn| {
            if !new.is_null() && txn.pool().root()?.head() == new {
                // The new leaf became reachable: finish clearing the moved
                // slots out of the source.
                for slot in 0..NODE_KEYS {
                    let new_fps = leaf::fingerprints(txn.pool(), new)?;
                    let src_fps = leaf::fingerprints(txn.pool(), src)?;
                    if new_fps[slot] == EMPTY || src_fps[slot] == EMPTY {
                        continue;
                    }
                    let duplicate = leaf::key_bytes(txn.pool(), new, slot)?
                        == leaf::key_bytes(txn.pool(), src, slot)?;
                    if duplicate {
                        leaf::clear_fingerprint(txn, src, slot)?;
                    }
                }
                let src_fps = leaf::fingerprints(txn.pool(), src)?;
                for slot in 0..NODE_KEYS {
                    if src_fps[slot] == EMPTY {
                        leaf::scrub_slot_if_dirty(txn, src, slot)?;
                    }
                }
            }
            // Head never moved: the split never became visible and the
            // half-initialized leaf is unreachable; dropping the log is
            // enough.
            txn.root_mut()?.clear_split_log();
            txn.flush(ROOT_OFFSET, ROOT_SIZE)?;
            Ok(())
        })
    }

    fn resolve_delete_log(&mut self) -> Result<()> {
        let (dead, prev) = {
            let root = self.pool().root()?;
            (root.delete_leaf(), root.delete_prev())
        };
        if dead.is_null() {
            return Ok(());
        }
        tracing::warn!(leaf = dead.offset(), "resolving interrupted leaf unlink");

        self.pool_mut().transaction(|txn| {
            let successor = leaf::next(txn.pool(), dead)?;
            if !prev.is_null() {
                if leaf::next(txn.pool(), prev)? == dead {
                    leaf::set_next(txn, prev, successor)?;
                }
            } else if txn.pool().root()?.head() == dead {
                txn.root_mut()?.set_head(successor);
            }
            // The log must be gone before the block is reusable; a crash
            // after this point leaks the block instead of double-freeing it.
            txn.root_mut()?.clear_delete_log();
            txn.flush(ROOT_OFFSET, ROOT_SIZE)?;
            txn.free(dead);
            Ok(())
        })
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let head = self.pool().root()?.head();

        let mut occupied: Vec<(PPtr, [u8; NODE_KEYS], Vec<u8>)> = Vec::new();
        let mut drained: Vec<(PPtr, [u8; NODE_KEYS])> = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut cur = head;
        while !cur.is_null() {
            if !seen.insert(cur.offset()) {
                return Err(corruption(format!(
                    "leaf chain revisits offset {}",
                    cur.offset()
                )));
            }
            let fps = leaf::fingerprints(self.pool(), cur)?;
            match leaf::max_key(self.pool(), cur)? {
                Some(max) => occupied.push((cur, fps, max)),
                None => drained.push((cur, fps)),
            }
            cur = leaf::next(self.pool(), cur)?;
        }

        occupied.sort_by(|a, b| a.2.cmp(&b.2));
        for pair in occupied.windows(2) {
            if pair[0].2 == pair[1].2 {
                return Err(corruption(format!(
                    "two leaves share the maximum key {:?}",
                    pair[0].2
                )));
            }
        }

        self.arena_mut().clear();
        self.set_top(None);

        let mut prev: Option<(usize, Vec<u8>)> = None;
        for (ptr, fps, max) in occupied {
            let id = self.arena_mut().alloc(Node::Leaf(LeafNode::new(None, ptr, fps)));
            match prev.take() {
                None => self.set_top(Some(id)),
                Some((prev_id, prev_max)) => {
                    self.update_parents_after_split(prev_id, id, &prev_max)?;
                }
            }
            prev = Some((id, max));
        }

        for (ptr, fps) in drained {
            self.arena_mut().alloc(Node::Leaf(LeafNode::new(None, ptr, fps)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_LAYOUT, MIN_POOL_SIZE};
    use crate::storage::Pool;
    use crate::tree::fingerprint::fingerprint;
    use crate::tree::CorruptionError;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("recovery.pool")
    }

    fn open_tree(path: &std::path::Path) -> FpTree {
        FpTree::open(path, DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap()
    }

    fn get_vec(tree: &FpTree, key: &[u8]) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        tree.get(key, &mut out).unwrap().then_some(out)
    }

    #[test]
    fn fresh_pool_initializes_counters() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&path(&dir));

        let root = tree.pool().root().unwrap();
        assert_eq!(root.opened(), 1);
        assert_eq!(root.closed(), 0);
    }

    #[test]
    fn orderly_close_balances_counters() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut tree = open_tree(&p);
            tree.put(b"key1", b"value1").unwrap();
        }

        let tree = open_tree(&p);
        let root = tree.pool().root().unwrap();
        assert_eq!(root.opened(), 2);
        assert_eq!(root.closed(), 1);
    }

    #[test]
    fn values_survive_close_and_reopen() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut tree = open_tree(&p);
            tree.put(b"key1", b"value1").unwrap();
            tree.put(b"key2", b"value2").unwrap();
            tree.put(b"key3", b"value3").unwrap();
            tree.delete(b"key2").unwrap();
            tree.put(b"key3", b"VALUE3").unwrap();
        }

        let tree = open_tree(&p);
        assert_eq!(get_vec(&tree, b"key1").as_deref(), Some(b"value1".as_slice()));
        assert_eq!(get_vec(&tree, b"key2"), None);
        assert_eq!(get_vec(&tree, b"key3").as_deref(), Some(b"VALUE3".as_slice()));
        tree.debug_validate().unwrap();
    }

    #[test]
    fn reopen_rebuilds_full_inner_tree_over_many_leaves() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut tree = open_tree(&p);
            for i in 0..400usize {
                let key = format!("key{:05}", i);
                tree.put(key.as_bytes(), format!("value{:05}", i).as_bytes()).unwrap();
            }
        }

        let tree = open_tree(&p);
        tree.debug_validate().unwrap();
        assert!(tree.chain_len().unwrap() > 2);
        // The rebuilt top must be an inner node, not the first leaf.
        let top = tree.top().unwrap();
        assert!(matches!(tree.arena().get(top).unwrap(), Node::Inner(_)));
        for i in 0..400usize {
            let key = format!("key{:05}", i);
            assert_eq!(
                get_vec(&tree, key.as_bytes()),
                Some(format!("value{:05}", i).into_bytes())
            );
        }
    }

    #[test]
    fn reopen_then_overwrite_everything() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut tree = open_tree(&p);
            for i in 0..128usize {
                let istr = i.to_string();
                tree.put(istr.as_bytes(), istr.as_bytes()).unwrap();
            }
        }
        {
            let mut tree = open_tree(&p);
            for i in 0..256usize {
                let istr = i.to_string();
                let value = format!("{}!", istr);
                tree.put(istr.as_bytes(), value.as_bytes()).unwrap();
                assert_eq!(get_vec(&tree, istr.as_bytes()), Some(value.into_bytes()));
            }
            tree.debug_validate().unwrap();
        }

        let tree = open_tree(&p);
        for i in 0..256usize {
            let istr = i.to_string();
            assert_eq!(
                get_vec(&tree, istr.as_bytes()),
                Some(format!("{}!", istr).into_bytes())
            );
        }
    }

    #[test]
    fn sso_boundary_lengths_survive_reopen() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        let cases: Vec<(Vec<u8>, Vec<u8>)> = [14usize, 15, 16, 17]
            .iter()
            .map(|&len| (vec![b'k'; len], vec![b'v'; len]))
            .collect();

        {
            let mut tree = open_tree(&p);
            for (key, value) in &cases {
                tree.put(key, value).unwrap();
                assert_eq!(get_vec(&tree, key).as_deref(), Some(value.as_slice()));
            }
        }

        let tree = open_tree(&p);
        for (key, value) in &cases {
            assert_eq!(get_vec(&tree, key).as_deref(), Some(value.as_slice()));
        }
    }

    #[test]
    fn fully_drained_tree_reopens_and_accepts_new_keys() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut tree = open_tree(&p);
            tree.put(b"only", b"one").unwrap();
            tree.delete(b"only").unwrap();
        }

        let mut tree = open_tree(&p);
        assert_eq!(get_vec(&tree, b"only"), None);
        assert!(tree.top().is_none());

        tree.put(b"fresh", b"start").unwrap();
        assert_eq!(get_vec(&tree, b"fresh").as_deref(), Some(b"start".as_slice()));
        tree.debug_validate().unwrap();
    }

    /// Fabricates the media state a crash leaves mid-split: the new leaf
    /// linked at head with moved slots, the source still holding its copies,
    /// and the split log armed.
    #[test]
    fn armed_split_log_resolves_duplicates() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut pool = Pool::open_or_create(&p, DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap();
            pool.transaction(|txn| {
                let src = leaf::allocate(txn)?;
                let new = leaf::allocate(txn)?;
                for (slot, key) in [(0usize, b"aa".as_slice()), (1, b"mm"), (2, b"zz")] {
                    leaf::set_slot(txn, src, slot, fingerprint(key), key, b"src")?;
                }
                // "mm" and "zz" were copied to the new leaf but the source
                // fingerprints were never cleared.
                for (slot, key) in [(1usize, b"mm".as_slice()), (2, b"zz")] {
                    leaf::set_slot(txn, new, slot, fingerprint(key), key, b"src")?;
                }
                leaf::set_next(txn, new, src)?;
                let root = txn.root_mut()?;
                root.set_head(new);
                root.set_opened(1);
                root.set_closed(0);
                root.arm_split_log(src, new);
                Ok(())
            })
            .unwrap();
        }

        let tree = open_tree(&p);
        tree.debug_validate().unwrap();
        assert!(tree.pool().root().unwrap().split_src().is_null());
        assert_eq!(get_vec(&tree, b"aa").as_deref(), Some(b"src".as_slice()));
        assert_eq!(get_vec(&tree, b"mm").as_deref(), Some(b"src".as_slice()));
        assert_eq!(get_vec(&tree, b"zz").as_deref(), Some(b"src".as_slice()));
    }

    /// An armed delete log replays the unlink: the dead leaf drops out of
    /// the chain and its block returns to the allocator.
    #[test]
    fn armed_delete_log_replays_unlink() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut pool = Pool::open_or_create(&p, DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap();
            pool.transaction(|txn| {
                let c = leaf::allocate(txn)?;
                let b = leaf::allocate(txn)?;
                let a = leaf::allocate(txn)?;
                leaf::set_slot(txn, a, 0, fingerprint(b"aa"), b"aa", b"va")?;
                leaf::set_slot(txn, c, 0, fingerprint(b"cc"), b"cc", b"vc")?;
                leaf::set_next(txn, a, b)?;
                leaf::set_next(txn, b, c)?;
                let root = txn.root_mut()?;
                root.set_head(a);
                root.set_opened(1);
                root.set_closed(0);
                root.arm_delete_log(b, a);
                Ok(())
            })
            .unwrap();
        }

        let tree = open_tree(&p);
        tree.debug_validate().unwrap();
        assert_eq!(tree.chain_len().unwrap(), 2);
        assert!(tree.pool().root().unwrap().delete_leaf().is_null());
        assert_eq!(get_vec(&tree, b"aa").as_deref(), Some(b"va".as_slice()));
        assert_eq!(get_vec(&tree, b"cc").as_deref(), Some(b"vc".as_slice()));
    }

    #[test]
    fn leaf_chain_cycle_is_corruption() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut pool = Pool::open_or_create(&p, DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap();
            pool.transaction(|txn| {
                let a = leaf::allocate(txn)?;
                let b = leaf::allocate(txn)?;
                leaf::set_slot(txn, a, 0, fingerprint(b"k"), b"k", b"v")?;
                leaf::set_next(txn, a, b)?;
                leaf::set_next(txn, b, a)?;
                let root = txn.root_mut()?;
                root.set_head(a);
                root.set_opened(1);
                root.set_closed(0);
                Ok(())
            })
            .unwrap();
        }

        let err = FpTree::open(&p, DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap_err();
        assert!(err.downcast_ref::<CorruptionError>().is_some());
    }

    #[test]
    fn backwards_counters_are_corruption() {
        let dir = tempdir().unwrap();
        let p = path(&dir);

        {
            let mut pool = Pool::open_or_create(&p, DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap();
            pool.transaction(|txn| {
                let a = leaf::allocate(txn)?;
                leaf::set_slot(txn, a, 0, fingerprint(b"k"), b"k", b"v")?;
                let root = txn.root_mut()?;
                root.set_head(a);
                root.set_opened(1);
                root.set_closed(5);
                Ok(())
            })
            .unwrap();
        }

        let err = FpTree::open(&p, DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap_err();
        assert!(err.downcast_ref::<CorruptionError>().is_some());
    }
}

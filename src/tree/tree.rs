//! # Tree Core
//!
//! `FpTree` ties the two halves together: the persistent leaf list in the
//! pool and the volatile node arena that indexes it. All public operations
//! route through a volatile search first, then touch persistent memory
//! through pool transactions.
//!
//! ## Search
//!
//! From the top, descend inner nodes choosing the child of the smallest
//! separator comparing `>=` the key (equal routes left); the descent ends at
//! the unique leaf node that would hold the key. Comparison is byte-wise
//! throughout.
//!
//! ## Insert
//!
//! ```text
//! 1. search(key) -> leaf node (or allocate the first leaf on an empty tree)
//! 2. scan the fingerprint mirror in reverse, tracking
//!    - the last empty slot seen, and
//!    - the first slot whose fingerprint and full key match
//! 3. write into the matching slot (update) or the empty slot (insert)
//! 4. no slot available: split the leaf
//! ```
//!
//! ## Leaf Split
//!
//! The split key is the midpoint of the byte-sorted union of the 48 resident
//! keys and the incoming key. Within one transaction: a fresh leaf is
//! prepended to the persistent chain, every slot with a key above the split
//! key moves to the same index in the new leaf (raw cell copy, so long
//! values move by pointer), and the incoming pair lands in the first free
//! slot of whichever side owns it. The split micro-log brackets the window
//! in which slots exist in both leaves; recovery resolves it after a crash.
//! Volatile parents are updated only after the transaction commits,
//! propagating splits upward through the inner nodes recursively.
//!
//! ## Delete
//!
//! A single fingerprint byte is zeroed. Missing keys are not an error, and
//! leaves are never reclaimed when they empty out.
//!
//! ## Volatile Rollback
//!
//! Mirror updates are staged in locals and applied only after the pool
//! transaction returns success, so an aborted transaction leaves the
//! volatile index exactly as it was.

use eyre::Result;
use smallvec::SmallVec;

use super::corruption;
use super::fingerprint::{fingerprint, EMPTY};
use super::leaf;
use super::node::{InnerNode, LeafNode, Node, NodeArena, NodeId};
use crate::config::{INNER_KEYS, INNER_KEYS_MIDPOINT, INNER_KEYS_UPPER, NODE_KEYS, NODE_KEYS_MIDPOINT};
use crate::storage::{Pool, ROOT_OFFSET, ROOT_SIZE};

#[derive(Debug)]
pub struct FpTree {
    pool: Pool,
    arena: NodeArena,
    top: Option<NodeId>,
    shut: bool,
}

impl FpTree {
    /// Opens (or creates) the pool at `path` and rebuilds the volatile index
    /// from the persistent leaf list.
    pub fn open<P: AsRef<std::path::Path>>(path: P, layout: &str, pool_size: u64) -> Result<Self> {
        let pool = Pool::open_or_create(path, layout, pool_size)?;
        let mut tree = Self {
            pool,
            arena: NodeArena::new(),
            top: None,
            shut: false,
        };
        if let Err(err) = tree.recover() {
            // A failed open must not count as an orderly close in Drop.
            tree.shut = true;
            return Err(err);
        }
        Ok(tree)
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut Pool {
        &mut self.pool
    }

    pub(crate) fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    pub(crate) fn set_top(&mut self, top: Option<NodeId>) {
        self.top = top;
    }

    /// Descends to the leaf node that would hold `key`. `None` iff the tree
    /// has no indexed occupied leaf.
    fn search(&self, key: &[u8]) -> Result<Option<NodeId>> {
        let Some(mut cur) = self.top else {
            return Ok(None);
        };
        loop {
            match self.arena.get(cur)? {
                Node::Leaf(_) => return Ok(Some(cur)),
                Node::Inner(inner) => cur = inner.child(inner.route(key))?,
            }
        }
    }

    /// Appends the value for `key` to `out` and returns true, or leaves
    /// `out` untouched and returns false.
    pub fn get(&self, key: &[u8], out: &mut Vec<u8>) -> Result<bool> {
        let h = fingerprint(key);
        let Some(nid) = self.search(key)? else {
            return Ok(false);
        };
        let leafnode = self.arena.leafnode(nid)?;
        for slot in 0..NODE_KEYS {
            if leafnode.mirror[slot] != h {
                continue;
            }
            if leaf::key_bytes(&self.pool, leafnode.leaf, slot)? == key {
                let value = leaf::value_bytes(&self.pool, leafnode.leaf, slot)?;
                out.extend_from_slice(value);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Inserts or overwrites `key`. Last write wins.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let h = fingerprint(key);
        match self.search(key)? {
            None => self.put_first_leaf(h, key, value),
            Some(nid) => {
                if self.fill_slot_for_key(nid, h, key, value)? {
                    return Ok(());
                }
                self.split_leaf(nid, h, key, value)
            }
        }
    }

    /// Removes `key` if present. Missing keys are not an error.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let h = fingerprint(key);
        let Some(nid) = self.search(key)? else {
            return Ok(());
        };
        let (leaf_ptr, mirror) = {
            let leafnode = self.arena.leafnode(nid)?;
            (leafnode.leaf, leafnode.mirror)
        };
        for slot in (0..NODE_KEYS).rev() {
            if mirror[slot] == h && leaf::key_bytes(&self.pool, leaf_ptr, slot)? == key {
                self.pool
                    .transaction(|txn| leaf::clear_fingerprint(txn, leaf_ptr, slot))?;
                self.arena.leafnode_mut(nid)?.mirror[slot] = EMPTY;
                return Ok(());
            }
        }
        Ok(())
    }

    /// First insert into a tree with no indexed leaves: allocate a leaf,
    /// prepend it to the chain, and make it the volatile top.
    fn put_first_leaf(&mut self, h: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let new_leaf = self.pool.transaction(|txn| {
            let new_leaf = leaf::allocate(txn)?;
            let old_head = txn.pool().root()?.head();
            leaf::set_next(txn, new_leaf, old_head)?;
            leaf::set_slot(txn, new_leaf, 0, h, key, value)?;
            txn.root_mut()?.set_head(new_leaf);
            txn.flush(ROOT_OFFSET, ROOT_SIZE)?;
            Ok(new_leaf)
        })?;

        let mut mirror = [EMPTY; NODE_KEYS];
        mirror[0] = h;
        let id = self.arena.alloc(Node::Leaf(LeafNode::new(None, new_leaf, mirror)));
        self.top = Some(id);
        Ok(())
    }

    /// Writes `(h, key, value)` into the slot chosen by the reverse mirror
    /// scan: the slot already holding `key` if any, else the last empty slot
    /// seen. Returns false when the leaf is full and holds no matching key.
    fn fill_slot_for_key(&mut self, nid: NodeId, h: u8, key: &[u8], value: &[u8]) -> Result<bool> {
        let (leaf_ptr, mirror) = {
            let leafnode = self.arena.leafnode(nid)?;
            (leafnode.leaf, leafnode.mirror)
        };

        let mut empty: Option<usize> = None;
        let mut matching: Option<usize> = None;
        for slot in (0..NODE_KEYS).rev() {
            let fp = mirror[slot];
            if fp == EMPTY {
                empty = Some(slot);
            } else if fp == h && leaf::key_bytes(&self.pool, leaf_ptr, slot)? == key {
                matching = Some(slot);
                break;
            }
        }
        let Some(slot) = matching.or(empty) else {
            return Ok(false);
        };

        self.pool
            .transaction(|txn| leaf::set_slot(txn, leaf_ptr, slot, h, key, value))?;
        self.arena.leafnode_mut(nid)?.mirror[slot] = h;
        Ok(true)
    }

    /// Splits a full leaf around the midpoint of its keys plus the incoming
    /// one, then inserts the incoming pair and updates the volatile parents.
    fn split_leaf(&mut self, nid: NodeId, h: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let (leaf_ptr, mirror) = {
            let leafnode = self.arena.leafnode(nid)?;
            (leafnode.leaf, leafnode.mirror)
        };

        let mut keys: SmallVec<[Vec<u8>; 64]> = SmallVec::new();
        for slot in 0..NODE_KEYS {
            if mirror[slot] != EMPTY {
                keys.push(leaf::key_bytes(&self.pool, leaf_ptr, slot)?.to_vec());
            }
        }
        keys.push(key.to_vec());
        keys.sort_unstable();
        let splitkey = keys[NODE_KEYS_MIDPOINT].clone();

        let mut moves: Vec<(usize, u8)> = Vec::new();
        for slot in 0..NODE_KEYS {
            if mirror[slot] != EMPTY
                && leaf::key_bytes(&self.pool, leaf_ptr, slot)? > splitkey.as_slice()
            {
                moves.push((slot, mirror[slot]));
            }
        }

        let mut src_mirror = mirror;
        let mut new_mirror = [EMPTY; NODE_KEYS];
        for &(slot, fp) in &moves {
            src_mirror[slot] = EMPTY;
            new_mirror[slot] = fp;
        }

        let goes_right = key > splitkey.as_slice();
        let target_mirror = if goes_right { &new_mirror } else { &src_mirror };
        let target_slot = target_mirror
            .iter()
            .position(|&fp| fp == EMPTY)
            .ok_or_else(|| corruption("no free slot on either side of a leaf split"))?;

        tracing::trace!(
            moved = moves.len(),
            goes_right,
            "splitting leaf at offset {}",
            leaf_ptr.offset()
        );

        let new_leaf = self.pool.transaction(|txn| {
            let new_leaf = leaf::allocate(txn)?;
            let old_head = txn.pool().root()?.head();
            leaf::set_next(txn, new_leaf, old_head)?;

            // The micro-log brackets the window in which slots can exist in
            // both leaves; it must be durable before the first move.
            txn.root_mut()?.arm_split_log(leaf_ptr, new_leaf);
            txn.flush(ROOT_OFFSET, ROOT_SIZE)?;
            txn.root_mut()?.set_head(new_leaf);
            txn.flush(ROOT_OFFSET, ROOT_SIZE)?;

            for &(slot, fp) in &moves {
                leaf::move_slot(txn, leaf_ptr, new_leaf, slot, fp)?;
            }

            let target = if goes_right { new_leaf } else { leaf_ptr };
            leaf::set_slot(txn, target, target_slot, h, key, value)?;

            txn.root_mut()?.clear_split_log();
            txn.flush(ROOT_OFFSET, ROOT_SIZE)?;
            Ok(new_leaf)
        })?;

        if goes_right {
            new_mirror[target_slot] = h;
        } else {
            src_mirror[target_slot] = h;
        }

        self.arena.leafnode_mut(nid)?.mirror = src_mirror;
        let new_id = self.arena.alloc(Node::Leaf(LeafNode::new(None, new_leaf, new_mirror)));
        self.update_parents_after_split(nid, new_id, &splitkey)
    }

    /// Inserts `new_node` as the right sibling of `node` under the separator
    /// `splitkey`, growing a new top or splitting inner nodes as needed.
    pub(crate) fn update_parents_after_split(
        &mut self,
        node: NodeId,
        new_node: NodeId,
        splitkey: &[u8],
    ) -> Result<()> {
        let Some(parent) = self.arena.get(node)?.parent() else {
            let top_id = self.arena.alloc(Node::Inner(InnerNode::new(None)));
            {
                let inner = self.arena.inner_mut(top_id)?;
                inner.keycount = 1;
                inner.keys[0] = splitkey.to_vec();
                inner.children[0] = Some(node);
                inner.children[1] = Some(new_node);
            }
            self.arena.get_mut(node)?.set_parent(Some(top_id));
            self.arena.get_mut(new_node)?.set_parent(Some(top_id));
            self.top = Some(top_id);
            return Ok(());
        };

        {
            let inner = self.arena.inner_mut(parent)?;
            let idx = (0..inner.keycount)
                .find(|&i| splitkey < inner.keys[i].as_slice())
                .unwrap_or(inner.keycount);
            for i in (idx..inner.keycount).rev() {
                inner.keys[i + 1] = std::mem::take(&mut inner.keys[i]);
            }
            inner.keys[idx] = splitkey.to_vec();
            for i in (idx + 1..=inner.keycount).rev() {
                inner.children[i + 1] = inner.children[i];
            }
            inner.children[idx + 1] = Some(new_node);
            inner.keycount += 1;
        }
        self.arena.get_mut(new_node)?.set_parent(Some(parent));

        if self.arena.inner(parent)?.keycount <= INNER_KEYS {
            return Ok(());
        }

        // Overflowed: split the inner node at the midpoint and promote.
        let new_inner_id = self.arena.alloc(Node::Inner(InnerNode::new(None)));
        let promoted;
        let mut upper_keys: [Vec<u8>; INNER_KEYS + 1] = std::array::from_fn(|_| Vec::new());
        let mut upper_children = [None; INNER_KEYS + 2];
        {
            let inner = self.arena.inner_mut(parent)?;
            promoted = std::mem::take(&mut inner.keys[INNER_KEYS_MIDPOINT]);
            for (j, i) in (INNER_KEYS_UPPER..=INNER_KEYS).enumerate() {
                upper_keys[j] = std::mem::take(&mut inner.keys[i]);
            }
            for (j, i) in (INNER_KEYS_UPPER..=INNER_KEYS + 1).enumerate() {
                upper_children[j] = inner.children[i].take();
            }
            inner.keycount = INNER_KEYS_MIDPOINT;
        }
        {
            let new_inner = self.arena.inner_mut(new_inner_id)?;
            new_inner.keycount = INNER_KEYS - INNER_KEYS_MIDPOINT;
            new_inner.keys = upper_keys;
            new_inner.children = upper_children;
        }
        for child in upper_children.into_iter().flatten() {
            self.arena.get_mut(child)?.set_parent(Some(new_inner_id));
        }

        self.update_parents_after_split(parent, new_inner_id, &promoted)
    }

    /// Increments the orderly-close counter. Called once; the volatile index
    /// is dropped with the tree.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut {
            return Ok(());
        }
        self.pool.transaction(|txn| {
            let root = txn.root_mut()?;
            let closed = root.closed();
            root.set_closed(closed + 1);
            Ok(())
        })?;
        self.pool.flush_all()?;
        self.arena.clear();
        self.top = None;
        self.shut = true;
        tracing::debug!(path = %self.pool.path().display(), "closed tree");
        Ok(())
    }
}

impl Drop for FpTree {
    fn drop(&mut self) {
        if !self.shut {
            if let Err(err) = self.shutdown() {
                tracing::warn!(error = %err, "shutdown during drop failed");
            }
        }
    }
}

#[cfg(test)]
impl FpTree {
    pub(crate) fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub(crate) fn top(&self) -> Option<NodeId> {
        self.top
    }

    /// Walks both halves of the structure and asserts every cross-operation
    /// invariant: fingerprint/mirror agreement, separator ordering and
    /// routing bounds, parent back-links, inner fill factors, and the
    /// one-to-one mapping between chained leaves and leaf nodes.
    pub(crate) fn debug_validate(&self) -> Result<()> {
        use crate::storage::PPtr;
        use eyre::{bail, ensure};
        use hashbrown::{HashMap, HashSet};

        // Every persistent leaf reachable from head is indexed exactly once.
        let mut chain: Vec<PPtr> = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut cur = self.pool.root()?.head();
        while !cur.is_null() {
            ensure!(seen.insert(cur.offset()), "leaf chain cycle");
            chain.push(cur);
            cur = leaf::next(&self.pool, cur)?;
        }
        let mut indexed: HashMap<u64, usize> = HashMap::new();
        for id in 0..self.arena.len() {
            if let Node::Leaf(leafnode) = self.arena.get(id)? {
                *indexed.entry(leafnode.leaf.offset()).or_default() += 1;
            }
        }
        for ptr in &chain {
            ensure!(
                indexed.get(&ptr.offset()) == Some(&1),
                "leaf at {} indexed {} times",
                ptr.offset(),
                indexed.get(&ptr.offset()).copied().unwrap_or(0)
            );
        }

        // Mirror agreement and the fingerprint invariant.
        for id in 0..self.arena.len() {
            if let Node::Leaf(leafnode) = self.arena.get(id)? {
                let fps = leaf::fingerprints(&self.pool, leafnode.leaf)?;
                ensure!(leafnode.mirror == fps, "mirror out of sync with leaf");
                for slot in 0..NODE_KEYS {
                    if fps[slot] != EMPTY {
                        let key = leaf::key_bytes(&self.pool, leafnode.leaf, slot)?;
                        ensure!(
                            fps[slot] == fingerprint(key),
                            "fingerprint mismatch in slot {}",
                            slot
                        );
                    }
                }
            }
        }

        // Separator ordering, routing bounds, fill factors, parent links.
        fn walk(
            tree: &FpTree,
            id: NodeId,
            parent: Option<NodeId>,
            lower: Option<&[u8]>,
            upper: Option<&[u8]>,
        ) -> Result<()> {
            use eyre::ensure;
            match tree.arena.get(id)? {
                Node::Leaf(leafnode) => {
                    ensure!(leafnode.parent == parent, "leaf parent back-link broken");
                    for slot in 0..NODE_KEYS {
                        if leafnode.mirror[slot] == EMPTY {
                            continue;
                        }
                        let key = leaf::key_bytes(tree.pool(), leafnode.leaf, slot)?;
                        if let Some(lower) = lower {
                            ensure!(key > lower, "key below its subtree bound");
                        }
                        if let Some(upper) = upper {
                            ensure!(key <= upper, "key above its subtree bound");
                        }
                    }
                }
                Node::Inner(inner) => {
                    ensure!(inner.parent == parent, "inner parent back-link broken");
                    ensure!(inner.keycount >= 1, "inner node with no separators");
                    if parent.is_some() {
                        ensure!(
                            inner.keycount >= INNER_KEYS_MIDPOINT,
                            "non-root inner node underfull"
                        );
                    }
                    for i in 1..inner.keycount {
                        ensure!(
                            inner.keys[i - 1] < inner.keys[i],
                            "separators not strictly increasing"
                        );
                    }
                    for i in 0..=inner.keycount {
                        let child_lower = if i == 0 { lower } else { Some(inner.keys[i - 1].as_slice()) };
                        let child_upper = if i == inner.keycount {
                            upper
                        } else {
                            Some(inner.keys[i].as_slice())
                        };
                        walk(tree, inner.child(i)?, Some(id), child_lower, child_upper)?;
                    }
                }
            }
            Ok(())
        }
        if let Some(top) = self.top {
            ensure!(self.arena.get(top)?.parent().is_none(), "top has a parent");
            walk(self, top, None, None, None)?;
        } else {
            // No routing tree: acceptable only when no occupied leaf exists.
            for ptr in &chain {
                if leaf::max_key(&self.pool, *ptr)?.is_some() {
                    bail!("occupied leaf but no volatile top");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn chain_len(&self) -> Result<usize> {
        let mut n = 0;
        let mut cur = self.pool.root()?.head();
        while !cur.is_null() {
            n += 1;
            cur = leaf::next(&self.pool, cur)?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_LAYOUT, MIN_POOL_SIZE};
    use tempfile::tempdir;

    fn open_tree(dir: &tempfile::TempDir) -> FpTree {
        FpTree::open(dir.path().join("tree.pool"), DEFAULT_LAYOUT, MIN_POOL_SIZE).unwrap()
    }

    fn get_vec(tree: &FpTree, key: &[u8]) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        if tree.get(key, &mut out).unwrap() {
            Some(out)
        } else {
            None
        }
    }

    #[test]
    fn get_on_empty_tree_misses() {
        let dir = tempdir().unwrap();
        let tree = open_tree(&dir);
        assert_eq!(get_vec(&tree, b"waldo"), None);
    }

    #[test]
    fn delete_on_empty_tree_is_ok() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        tree.delete(b"nada").unwrap();
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        tree.put(b"key1", b"value1").unwrap();
        assert_eq!(get_vec(&tree, b"key1").as_deref(), Some(b"value1".as_slice()));
        assert_eq!(get_vec(&tree, b"key2"), None);
        tree.debug_validate().unwrap();
    }

    #[test]
    fn put_overwrites_in_place() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        tree.put(b"key1", b"value1").unwrap();
        tree.put(b"key1", b"value_replaced").unwrap();
        assert_eq!(
            get_vec(&tree, b"key1").as_deref(),
            Some(b"value_replaced".as_slice())
        );
        // An in-place update must not consume a second slot.
        assert_eq!(tree.chain_len().unwrap(), 1);
        tree.debug_validate().unwrap();
    }

    #[test]
    fn get_appends_to_existing_buffer() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        tree.put(b"k", b"-value").unwrap();

        let mut out = b"prefix".to_vec();
        assert!(tree.get(b"k", &mut out).unwrap());
        assert_eq!(out, b"prefix-value");

        let mut untouched = b"prefix".to_vec();
        assert!(!tree.get(b"missing", &mut untouched).unwrap());
        assert_eq!(untouched, b"prefix");
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        tree.put(b"tmpkey", b"tmpvalue1").unwrap();
        tree.delete(b"tmpkey").unwrap();
        tree.delete(b"tmpkey").unwrap();
        assert_eq!(get_vec(&tree, b"tmpkey"), None);

        tree.put(b"tmpkey1", b"tmpvalue1").unwrap();
        assert_eq!(
            get_vec(&tree, b"tmpkey1").as_deref(),
            Some(b"tmpvalue1".as_slice())
        );
        tree.debug_validate().unwrap();
    }

    #[test]
    fn empty_keys_and_values_are_accepted() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        tree.put(b"", b"empty-key").unwrap();
        tree.put(b"empty-value", b"").unwrap();

        assert_eq!(get_vec(&tree, b"").as_deref(), Some(b"empty-key".as_slice()));
        assert_eq!(get_vec(&tree, b"empty-value").as_deref(), Some(b"".as_slice()));
        tree.debug_validate().unwrap();
    }

    #[test]
    fn filling_one_leaf_does_not_split() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for i in 0..NODE_KEYS {
            let key = format!("key{:03}", i);
            tree.put(key.as_bytes(), b"v").unwrap();
        }
        assert_eq!(tree.chain_len().unwrap(), 1);
        tree.debug_validate().unwrap();
    }

    #[test]
    fn forty_ninth_key_splits_the_leaf() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for i in 0..=NODE_KEYS {
            let key = format!("key{:03}", i);
            tree.put(key.as_bytes(), key.as_bytes()).unwrap();
        }
        assert_eq!(tree.chain_len().unwrap(), 2);
        for i in 0..=NODE_KEYS {
            let key = format!("key{:03}", i);
            assert_eq!(get_vec(&tree, key.as_bytes()), Some(key.clone().into_bytes()));
        }
        tree.debug_validate().unwrap();
    }

    #[test]
    fn ascending_inserts_grow_inner_levels() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        let n = 8 * NODE_KEYS;
        for i in 1..=n {
            let key = i.to_string();
            tree.put(key.as_bytes(), key.as_bytes()).unwrap();
            assert_eq!(get_vec(&tree, key.as_bytes()), Some(key.into_bytes()));
        }
        for i in 1..=n {
            let key = i.to_string();
            assert_eq!(get_vec(&tree, key.as_bytes()), Some(key.into_bytes()));
        }
        assert!(tree.chain_len().unwrap() > 2);
        tree.debug_validate().unwrap();
    }

    #[test]
    fn descending_inserts_round_trip() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for i in (0..200usize).rev() {
            let key = format!("key{:05}", i);
            tree.put(key.as_bytes(), format!("val{:05}", i).as_bytes()).unwrap();
        }
        for i in 0..200usize {
            let key = format!("key{:05}", i);
            assert_eq!(
                get_vec(&tree, key.as_bytes()),
                Some(format!("val{:05}", i).into_bytes())
            );
        }
        tree.debug_validate().unwrap();
    }

    #[test]
    fn insertion_order_does_not_change_final_state() {
        let keys: Vec<String> = (0..120).map(|i| format!("key{:03}", i * 7 % 120)).collect();
        let orders: [Box<dyn Fn(&mut Vec<String>)>; 3] = [
            Box::new(|_v| {}),
            Box::new(|v| v.reverse()),
            Box::new(|v| v.rotate_left(41)),
        ];

        let mut finals = Vec::new();
        for order in orders {
            let dir = tempdir().unwrap();
            let mut tree = open_tree(&dir);
            let mut permuted = keys.clone();
            order(&mut permuted);
            for key in &permuted {
                tree.put(key.as_bytes(), format!("value-of-{}", key).as_bytes()).unwrap();
            }
            tree.debug_validate().unwrap();

            let mut snapshot = Vec::new();
            for key in &keys {
                snapshot.push(get_vec(&tree, key.as_bytes()));
            }
            finals.push(snapshot);
        }
        assert_eq!(finals[0], finals[1]);
        assert_eq!(finals[0], finals[2]);
    }

    #[test]
    fn duplicate_puts_across_splits_keep_one_copy() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for round in 0..3 {
            for i in 0..100usize {
                let key = format!("key{:03}", i);
                tree.put(key.as_bytes(), format!("r{}-{}", round, i).as_bytes()).unwrap();
            }
        }
        for i in 0..100usize {
            let key = format!("key{:03}", i);
            assert_eq!(
                get_vec(&tree, key.as_bytes()),
                Some(format!("r2-{}", i).into_bytes())
            );
        }
        tree.debug_validate().unwrap();
    }

    #[test]
    fn long_keys_and_values_survive_splits() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for i in 0..120usize {
            let key = format!("a-rather-long-key-well-past-sso-{:04}", i);
            let value = format!("an-equally-long-value-past-the-inline-buffer-{:04}", i);
            tree.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        for i in 0..120usize {
            let key = format!("a-rather-long-key-well-past-sso-{:04}", i);
            let value = format!("an-equally-long-value-past-the-inline-buffer-{:04}", i);
            assert_eq!(get_vec(&tree, key.as_bytes()), Some(value.into_bytes()));
        }
        tree.debug_validate().unwrap();
    }

    #[test]
    fn deletes_interleaved_with_splits() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);

        for i in 0..300usize {
            let key = format!("key{:05}", i);
            tree.put(key.as_bytes(), format!("value{:05}", i).as_bytes()).unwrap();
        }
        for i in (0..300usize).step_by(2) {
            tree.delete(format!("key{:05}", i).as_bytes()).unwrap();
        }
        for i in 0..300usize {
            let key = format!("key{:05}", i);
            let got = get_vec(&tree, key.as_bytes());
            if i % 2 == 0 {
                assert_eq!(got, None, "key {} should be deleted", key);
            } else {
                assert_eq!(got, Some(format!("value{:05}", i).into_bytes()));
            }
        }
        tree.debug_validate().unwrap();
    }

    #[test]
    fn failed_put_leaves_volatile_index_unchanged() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(&dir);
        tree.put(b"stable", b"value").unwrap();

        // A value larger than the whole pool exhausts the allocator inside
        // the transaction; the mirror must stay in its pre-put state.
        let huge = vec![0u8; 2 * MIN_POOL_SIZE as usize];
        let result = tree.put(b"overflow", &huge);
        assert!(result.is_err());

        tree.debug_validate().unwrap();
        assert_eq!(get_vec(&tree, b"stable").as_deref(), Some(b"value".as_slice()));
        assert_eq!(get_vec(&tree, b"overflow"), None);
    }
}

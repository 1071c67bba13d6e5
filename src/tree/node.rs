//! # Volatile Index Nodes
//!
//! The volatile half of the tree: inner nodes with sorted separator keys and
//! leaf nodes that each index exactly one persistent leaf, mirroring its
//! fingerprint array so point lookups never touch persistent memory until a
//! fingerprint matches.
//!
//! ## Ownership Model
//!
//! Parent and child references form cycles, so nodes are not owned through
//! their links. Instead all nodes live in an arena owned by the tree and
//! refer to each other by index (`NodeId`). The arena drops as a unit at
//! close, which breaks the cycles without reference counting. Parent links
//! are plain non-owning indices.
//!
//! ## Node Shape
//!
//! `Node` is a tagged variant: dispatch sites match on it and the compiler
//! enforces that both shapes are handled.
//!
//! An inner node holds up to `INNER_KEYS` separators plus one overflow slot
//! used transiently while a split insertion is rebalanced; children count is
//! always `keycount + 1`. A leaf node holds the fingerprint mirror and the
//! persistent pointer of the leaf it indexes.

use eyre::{bail, ensure, Result};

use crate::config::{INNER_KEYS, NODE_KEYS};
use crate::storage::PPtr;

pub type NodeId = usize;

/// Volatile inner node: sorted separators and child links.
#[derive(Debug)]
pub struct InnerNode {
    pub parent: Option<NodeId>,
    pub keycount: usize,
    /// `INNER_KEYS` separators plus one transient overflow slot.
    pub keys: [Vec<u8>; INNER_KEYS + 1],
    /// `keycount + 1` children plus one transient overflow slot.
    pub children: [Option<NodeId>; INNER_KEYS + 2],
}

impl InnerNode {
    pub fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            keycount: 0,
            keys: std::array::from_fn(|_| Vec::new()),
            children: [None; INNER_KEYS + 2],
        }
    }

    pub fn child(&self, index: usize) -> Result<NodeId> {
        ensure!(index <= self.keycount, "child index {} out of bounds", index);
        self.children[index]
            .ok_or_else(|| eyre::eyre!("inner node missing child at index {}", index))
    }

    /// Index of the child responsible for `key`: the first separator
    /// comparing greater than or equal routes left; keys greater than every
    /// separator fall through to the last child.
    pub fn route(&self, key: &[u8]) -> usize {
        for i in 0..self.keycount {
            if key <= self.keys[i].as_slice() {
                return i;
            }
        }
        self.keycount
    }
}

/// Volatile leaf node: fingerprint mirror plus the persistent leaf it
/// indexes.
#[derive(Debug)]
pub struct LeafNode {
    pub parent: Option<NodeId>,
    pub mirror: [u8; NODE_KEYS],
    pub leaf: PPtr,
}

impl LeafNode {
    pub fn new(parent: Option<NodeId>, leaf: PPtr, mirror: [u8; NODE_KEYS]) -> Self {
        Self { parent, mirror, leaf }
    }
}

#[derive(Debug)]
pub enum Node {
    Inner(InnerNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Inner(inner) => inner.parent,
            Node::Leaf(leafnode) => leafnode.parent,
        }
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        match self {
            Node::Inner(inner) => inner.parent = parent,
            Node::Leaf(leafnode) => leafnode.parent = parent,
        }
    }
}

/// Arena owning every volatile node. Cleared wholesale on close and rebuilt
/// by recovery on the next open.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| eyre::eyre!("dangling node id {}", id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| eyre::eyre!("dangling node id {}", id))
    }

    pub fn inner(&self, id: NodeId) -> Result<&InnerNode> {
        match self.get(id)? {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => bail!("node {} is a leaf node, expected inner", id),
        }
    }

    pub fn inner_mut(&mut self, id: NodeId) -> Result<&mut InnerNode> {
        match self.get_mut(id)? {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => bail!("node {} is a leaf node, expected inner", id),
        }
    }

    pub fn leafnode(&self, id: NodeId) -> Result<&LeafNode> {
        match self.get(id)? {
            Node::Leaf(leafnode) => Ok(leafnode),
            Node::Inner(_) => bail!("node {} is an inner node, expected leaf", id),
        }
    }

    pub fn leafnode_mut(&mut self, id: NodeId) -> Result<&mut LeafNode> {
        match self.get_mut(id)? {
            Node::Leaf(leafnode) => Ok(leafnode),
            Node::Inner(_) => bail!("node {} is an inner node, expected leaf", id),
        }
    }
}

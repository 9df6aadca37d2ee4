//! Rooted tree stored in an index-addressed arena.
//!
//! Every node owns exactly one variable and keeps an optional parent
//! index and an ordered list of child indices. Removed nodes leave an
//! empty slot behind, so a [`NodeId`] stays valid across clones: a
//! mutated copy of a graph still refers to the untouched nodes of its
//! source by the same ids.

use crate::variable::{VarId, Variable};
use std::collections::HashMap;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    variable: Variable,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Tree of variables
#[derive(Debug, Clone, Default)]
pub struct TreeGraph {
    nodes: Vec<Option<Node>>,
    root: Option<NodeId>,
    index: HashMap<VarId, NodeId>,
}

impl TreeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    ///////////////////////
    // edit primitives   //
    ///////////////////////

    /// Add an isolated node. The first node added becomes the root.
    pub fn add_node(&mut self, variable: Variable) -> anyhow::Result<NodeId> {
        if self.index.contains_key(&variable.id()) {
            anyhow::bail!("variable {} is already in the graph", variable.name());
        }
        let id = NodeId(self.nodes.len());
        self.index.insert(variable.id(), id);
        self.nodes.push(Some(Node {
            variable,
            parent: None,
            children: vec![],
        }));
        if self.root.is_none() {
            self.root = Some(id);
        }
        Ok(id)
    }

    /// Remove a node that has no edges left
    pub fn remove_node(&mut self, id: NodeId) -> anyhow::Result<Variable> {
        let node = self.node(id)?;
        if node.parent.is_some() || !node.children.is_empty() {
            anyhow::bail!("node {} still has edges", node.variable.name());
        }
        if self.root == Some(id) && self.num_nodes() > 1 {
            anyhow::bail!("cannot remove the root {} of a non-trivial tree", node.variable.name());
        }
        let node = self.nodes[id.0]
            .take()
            .ok_or_else(|| anyhow::anyhow!("no node at index {}", id.0))?;
        self.index.remove(&node.variable.id());
        if self.root == Some(id) {
            self.root = None;
        }
        Ok(node.variable)
    }

    /// Add a directed edge `parent -> child`; the child must be detached
    /// and must not be an ancestor of the parent.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        self.node(parent)?;
        if self.node(child)?.parent.is_some() {
            anyhow::bail!("node {} already has a parent", self.name_of(child));
        }
        if self.is_ancestor(child, parent) {
            anyhow::bail!(
                "edge {} -> {} would create a cycle",
                self.name_of(parent),
                self.name_of(child)
            );
        }
        if self.root == Some(child) {
            self.root = Some(parent);
        }
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Remove the edge `parent -> child`, leaving `child` detached
    pub fn remove_edge(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        if self.node(child)?.parent != Some(parent) {
            anyhow::bail!(
                "{} is not the parent of {}",
                self.name_of(parent),
                self.name_of(child)
            );
        }
        self.node_mut(child)?.parent = None;
        self.node_mut(parent)?.children.retain(|&c| c != child);
        Ok(())
    }

    /// Make `id` the root by reversing every edge on its path to the
    /// current root.
    pub fn reroot(&mut self, id: NodeId) -> anyhow::Result<()> {
        let path = self.path_to_root(id)?;
        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            self.node_mut(child)?.parent = None;
            self.node_mut(parent)?.children.retain(|&c| c != child);
        }
        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            self.node_mut(parent)?.parent = Some(child);
            self.node_mut(child)?.children.push(parent);
        }
        self.root = Some(id);
        Ok(())
    }

    /// Convenience: add a node and hang it under `parent`
    pub fn add_child(&mut self, parent: NodeId, variable: Variable) -> anyhow::Result<NodeId> {
        let id = self.add_node(variable)?;
        self.add_edge(parent, id)?;
        Ok(id)
    }

    /// Detach a subtree and reattach it under `new_parent`
    pub fn move_subtree(&mut self, id: NodeId, new_parent: NodeId) -> anyhow::Result<()> {
        let parent = self
            .parent(id)
            .ok_or_else(|| anyhow::anyhow!("cannot move the root {}", self.name_of(id)))?;
        if self.is_ancestor(id, new_parent) {
            anyhow::bail!(
                "{} lies inside the subtree of {}",
                self.name_of(new_parent),
                self.name_of(id)
            );
        }
        self.remove_edge(parent, id)?;
        self.add_edge(new_parent, id)
    }

    ///////////////////////
    // queries           //
    ///////////////////////

    fn node(&self, id: NodeId) -> anyhow::Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(|n| n.as_ref())
            .ok_or_else(|| anyhow::anyhow!("no node at index {}", id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> anyhow::Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(|n| n.as_mut())
            .ok_or_else(|| anyhow::anyhow!("no node at index {}", id.0))
    }

    fn name_of(&self, id: NodeId) -> String {
        self.node(id)
            .map(|n| n.variable.name().to_string())
            .unwrap_or_else(|_| format!("#{}", id.0))
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn num_nodes(&self) -> usize {
        self.index.len()
    }

    /// Live node ids in ascending order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Panics on a removed node, like slice indexing
    pub fn variable(&self, id: NodeId) -> &Variable {
        &self.nodes[id.0]
            .as_ref()
            .unwrap_or_else(|| panic!("node #{} was removed", id.0))
            .variable
    }

    /// Replace the variable held by a node
    pub fn set_variable(&mut self, id: NodeId, variable: Variable) -> anyhow::Result<Variable> {
        if let Some(&other) = self.index.get(&variable.id()) {
            if other != id {
                anyhow::bail!("variable {} is already in the graph", variable.name());
            }
        }
        let old = std::mem::replace(&mut self.node_mut(id)?.variable, variable.clone());
        self.index.remove(&old.id());
        self.index.insert(variable.id(), id);
        Ok(old)
    }

    pub fn node_of(&self, variable: &Variable) -> Option<NodeId> {
        self.index.get(&variable.id()).copied()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Parent (if any) followed by children
    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        self.parent(id)
            .into_iter()
            .chain(self.children(id).iter().copied())
            .collect()
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.children(id).is_empty()
    }

    /// Is `a` an ancestor of (or equal to) `b`?
    pub fn is_ancestor(&self, a: NodeId, b: NodeId) -> bool {
        let mut cur = Some(b);
        while let Some(x) = cur {
            if x == a {
                return true;
            }
            cur = self.parent(x);
        }
        false
    }

    /// `id, parent(id), ..., root`
    pub fn path_to_root(&self, id: NodeId) -> anyhow::Result<Vec<NodeId>> {
        self.node(id)?;
        let mut path = vec![id];
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            if path.len() > self.num_nodes() {
                anyhow::bail!("parent links contain a cycle");
            }
            path.push(p);
            cur = p;
        }
        Ok(path)
    }

    /// Nodes of the subtree rooted at `id`, pre-order
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![id];
        while let Some(x) = stack.pop() {
            out.push(x);
            stack.extend(self.children(x).iter().rev());
        }
        out
    }

    /// Depth-first pre-order from the root
    pub fn pre_order(&self) -> Vec<NodeId> {
        self.root.map(|r| self.subtree(r)).unwrap_or_default()
    }

    /// Children before parents; the root comes last
    pub fn post_order(&self) -> Vec<NodeId> {
        let mut order = self.pre_order();
        order.reverse();
        order
    }

    /// Check the tree invariants
    pub fn validate(&self) -> anyhow::Result<()> {
        let root = match self.root {
            Some(r) => r,
            None if self.num_nodes() == 0 => return Ok(()),
            None => anyhow::bail!("graph has nodes but no root"),
        };
        if self.parent(root).is_some() {
            anyhow::bail!("root {} has a parent", self.name_of(root));
        }
        for id in self.node_ids() {
            let node = self.node(id)?;
            if id != root && node.parent.is_none() {
                anyhow::bail!("node {} is detached", node.variable.name());
            }
            if let Some(p) = node.parent {
                if !self.children(p).contains(&id) {
                    anyhow::bail!("parent link of {} is not mirrored", node.variable.name());
                }
            }
            for &c in &node.children {
                if self.parent(c) != Some(id) {
                    anyhow::bail!("child link of {} is not mirrored", node.variable.name());
                }
            }
            if !node.children.is_empty() && !node.variable.is_latent() {
                anyhow::bail!("internal node {} is not latent", node.variable.name());
            }
        }
        let reached = self.pre_order();
        if reached.len() != self.num_nodes() {
            anyhow::bail!(
                "{} of {} nodes are reachable from the root",
                reached.len(),
                self.num_nodes()
            );
        }
        Ok(())
    }
}

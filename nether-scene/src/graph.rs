//! Arena-owned node tree.
//!
//! Nodes live in a slot vector and refer to each other by [`NodeId`]. Parent
//! and armature links are plain handles resolved by lookup; ownership of a
//! subtree is expressed only through `children`.

use hashbrown::HashMap;

use crate::bounds::Aabb;
use crate::device::{DeviceError, RenderFactory};
use crate::node::{Node, NodeId};

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Option<Node>>,
    live: usize,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Take ownership of a detached node.
    pub fn insert(&mut self, mut node: Node) -> NodeId {
        node.parent = None;
        node.children.clear();
        self.push(node)
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        self.live += 1;
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Append `child` to `parent`'s children and grow the parent's bounding
    /// box. Returns false when either node is missing, the child already has
    /// a parent, or the link would create a cycle.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.contains(parent) {
            return false;
        }
        match self.get(child) {
            Some(node) if node.parent.is_none() => {}
            _ => return false,
        }
        if self.ancestors(parent).any(|a| a == child) {
            return false;
        }

        let child_box = self
            .get(child)
            .map(|c| c.aabb.transform(&c.static_matrix()))
            .unwrap_or(Aabb::EMPTY);

        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
            node.aabb = node.aabb.union(&child_box);
        }
        true
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.get(id).and_then(|n| n.parent), move |&p| {
            self.get(p).and_then(|n| n.parent)
        })
    }

    /// Topmost ancestor of `id` (itself when it has no parent).
    pub fn root_of(&self, id: NodeId) -> NodeId {
        self.ancestors(id).last().unwrap_or(id)
    }

    /// Nearest armature at or above `id`.
    pub fn armature_of(&self, id: NodeId) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&n| self.get(n).is_some_and(|node| node.role().is_armature()))
    }

    /// Stable-partition `id`'s children so joints precede everything else.
    pub fn sort_children(&mut self, id: NodeId) {
        let Some(children) = self.get(id).map(|n| n.children.clone()) else {
            return;
        };
        let (mut joints, others): (Vec<NodeId>, Vec<NodeId>) = children
            .into_iter()
            .partition(|&c| self.get(c).is_some_and(|n| n.role().is_joint()));
        joints.extend(others);
        if let Some(node) = self.get_mut(id) {
            node.children = joints;
        }
    }

    /// Subtree of `id` in depth-first pre-order, children in order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            order.push(current);
            stack.extend(node.children.iter().rev());
        }
        order
    }

    /// First node named `name` in the subtree of `id`, pre-order.
    pub fn find_node(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .find(|&n| self.get(n).is_some_and(|node| node.name == name))
    }

    /// Search the whole tree containing `id`.
    pub fn find_node_from_root(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.find_node(self.root_of(id), name)
    }

    /// Detach `id` from its parent and release its subtree. Returns the
    /// number of nodes released.
    pub fn remove_subtree(&mut self, id: NodeId) -> usize {
        if let Some(parent) = self.get(id).and_then(|n| n.parent)
            && let Some(node) = self.get_mut(parent)
        {
            node.children.retain(|&c| c != id);
        }

        let doomed = self.descendants(id);
        for &node in &doomed {
            if let Some(slot) = self.nodes.get_mut(node.index()) {
                *slot = None;
            }
        }
        self.live -= doomed.len();
        tracing::debug!("Released {} nodes", doomed.len());
        doomed.len()
    }

    /// Recompute bounding boxes of the subtree bottom-up: each node covers
    /// its meshes plus its children's boxes in its own space.
    pub fn refresh_bounds(&mut self, id: NodeId) {
        for current in self.descendants(id).into_iter().rev() {
            let Some(node) = self.get(current) else {
                continue;
            };
            let mut aabb = node
                .meshes()
                .iter()
                .fold(Aabb::EMPTY, |acc, mesh| acc.union(&mesh.aabb()));
            for &child in &node.children {
                if let Some(c) = self.get(child) {
                    aabb = aabb.union(&c.aabb.transform(&c.static_matrix()));
                }
            }
            if let Some(node) = self.get_mut(current) {
                node.aabb = aabb;
            }
        }
    }

    /// Deep-copy the subtree of `id` for instancing.
    ///
    /// Every copied node gets fresh uniform buffers with the same layout;
    /// meshes and animation channels are shared. Parent, child and skin
    /// armature links inside the subtree are remapped to the copies. On
    /// failure nothing is added to the graph.
    pub fn clone_subtree(
        &mut self,
        id: NodeId,
        factory: &dyn RenderFactory,
    ) -> Result<NodeId, DeviceError> {
        let originals = self.descendants(id);
        let mut copies = Vec::with_capacity(originals.len());
        for &original in &originals {
            if let Some(node) = self.get(original) {
                copies.push(node.duplicate(factory)?);
            }
        }

        let base = self.nodes.len() as u32;
        let remap: HashMap<NodeId, NodeId> = originals
            .iter()
            .enumerate()
            .map(|(i, &old)| (old, NodeId(base + i as u32)))
            .collect();

        for mut copy in copies {
            copy.parent = copy.parent.and_then(|p| remap.get(&p).copied());
            copy.children = copy
                .children
                .iter()
                .filter_map(|c| remap.get(c).copied())
                .collect();
            copy.skin_armature = copy
                .skin_armature
                .map(|a| remap.get(&a).copied().unwrap_or(a));
            self.push(copy);
        }

        Ok(NodeId(base))
    }

    /// Live node handles.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }
}

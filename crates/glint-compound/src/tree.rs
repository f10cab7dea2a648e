// Copyright 2025 The glint authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The compound arena.
//!
//! Nodes are stored in a flat vector and addressed by [`CompoundId`] with an
//! explicit parent index and an ordered children list. Child order is
//! significant: it determines the binary split order used by the tree and
//! load balancers.

use crate::attributes::{CompoundData, CompoundInherit};
use crate::observer::TopologyEvent;
use glint_core::resource::{ChannelId, ResourceDirectory};

/// Index of one compound within a [`CompoundTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompoundId(pub u32);

#[derive(Debug)]
struct Node {
    parent: Option<CompoundId>,
    children: Vec<CompoundId>,
    data: CompoundData,
    inherit: CompoundInherit,
    task_id: u32,
}

/// A tree of compounds, owned by the configuration.
///
/// The tree may hold several roots (one per destination view). Destroying a
/// node destroys its subtree and unlinks it from the parent, but never the
/// channel it references.
#[derive(Debug, Default)]
pub struct CompoundTree {
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    roots: Vec<CompoundId>,
    events: Vec<TopologyEvent>,
}

impl CompoundTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, node: Node) -> CompoundId {
        if let Some(index) = self.free.pop() {
            self.nodes[index as usize] = Some(node);
            CompoundId(index)
        } else {
            self.nodes.push(Some(node));
            CompoundId((self.nodes.len() - 1) as u32)
        }
    }

    fn node(&self, id: CompoundId) -> &Node {
        self.nodes[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("compound {} was destroyed", id.0))
    }

    fn node_mut(&mut self, id: CompoundId) -> &mut Node {
        self.nodes[id.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("compound {} was destroyed", id.0))
    }

    /// Adds a new root compound.
    pub fn add_root(&mut self, data: CompoundData) -> CompoundId {
        let id = self.alloc(Node {
            parent: None,
            children: Vec::new(),
            data,
            inherit: CompoundInherit::default(),
            task_id: 0,
        });
        self.roots.push(id);
        id
    }

    /// Adds a new child under `parent`, appended after existing children.
    pub fn add_child(&mut self, parent: CompoundId, data: CompoundData) -> CompoundId {
        let id = self.alloc(Node {
            parent: Some(parent),
            children: Vec::new(),
            data,
            inherit: CompoundInherit::default(),
            task_id: 0,
        });
        self.node_mut(parent).children.push(id);
        self.events.push(TopologyEvent::ChildAdded { parent, child: id });
        id
    }

    /// Destroys `id` and its whole subtree, unlinking it from its parent.
    pub fn remove(&mut self, id: CompoundId) {
        let parent = self.node(id).parent;
        if let Some(parent) = parent {
            self.node_mut(parent).children.retain(|&c| c != id);
            self.events.push(TopologyEvent::ChildRemoved { parent, child: id });
        } else {
            self.roots.retain(|&r| r != id);
        }
        self.remove_subtree(id);
    }

    fn remove_subtree(&mut self, id: CompoundId) {
        let children = self.node(id).children.clone();
        for child in children {
            self.remove_subtree(child);
        }
        log::trace!("destroying compound {}", id.0);
        self.nodes[id.0 as usize] = None;
        self.free.push(id.0);
    }

    /// Drains the recorded topology events in mutation order.
    pub fn take_events(&mut self) -> Vec<TopologyEvent> {
        std::mem::take(&mut self.events)
    }

    /// The root compounds, in creation order.
    pub fn roots(&self) -> &[CompoundId] {
        &self.roots
    }

    /// The parent of `id`, `None` for roots.
    pub fn parent(&self, id: CompoundId) -> Option<CompoundId> {
        self.node(id).parent
    }

    /// The ordered children of `id`.
    pub fn children(&self, id: CompoundId) -> &[CompoundId] {
        &self.node(id).children
    }

    /// Returns `true` if `id` has no children.
    pub fn is_leaf(&self, id: CompoundId) -> bool {
        self.node(id).children.is_empty()
    }

    /// The declared attributes of `id`.
    pub fn data(&self, id: CompoundId) -> &CompoundData {
        &self.node(id).data
    }

    /// Mutable access to the declared attributes of `id`.
    pub fn data_mut(&mut self, id: CompoundId) -> &mut CompoundData {
        &mut self.node_mut(id).data
    }

    /// The inherited attributes of `id`, valid after the last update pass.
    pub fn inherit(&self, id: CompoundId) -> &CompoundInherit {
        &self.node(id).inherit
    }

    pub(crate) fn inherit_mut(&mut self, id: CompoundId) -> &mut CompoundInherit {
        &mut self.node_mut(id).inherit
    }

    /// The task id assigned to `id` by the last update pass.
    pub fn task_id(&self, id: CompoundId) -> u32 {
        self.node(id).task_id
    }

    pub(crate) fn set_task_id(&mut self, id: CompoundId, task_id: u32) {
        self.node_mut(id).task_id = task_id;
    }

    /// The channel this compound renders on: the nearest declared channel
    /// at or above this node.
    pub fn channel_of(&self, id: CompoundId) -> Option<ChannelId> {
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.node(c);
            if node.data.channel.is_some() {
                return node.data.channel;
            }
            current = node.parent;
        }
        None
    }

    /// Returns `true` if `id` binds a channel and no ancestor does: its
    /// output stays on the destination display.
    pub fn is_destination(&self, id: CompoundId) -> bool {
        if self.channel_of(id).is_none() {
            return false;
        }
        let mut current = self.node(id).parent;
        while let Some(ancestor) = current {
            let node = self.node(ancestor);
            if node.data.channel.is_some() {
                return false;
            }
            current = node.parent;
        }
        true
    }

    /// Returns `true` if `id` declares a channel that is also its inherited
    /// destination channel: the compound reads back into its own display.
    pub fn has_destination_channel(&self, id: CompoundId) -> bool {
        let node = self.node(id);
        node.data.channel.is_some() && node.data.channel == node.inherit.channel
    }

    /// Returns `true` if the compound executes this frame: at least one eye
    /// is active and the bound channel (if any) is running.
    pub fn is_running(&self, id: CompoundId, resources: &dyn ResourceDirectory) -> bool {
        let node = self.node(id);
        if !node.inherit.active.iter().any(|&a| a) {
            return false;
        }
        match self.channel_of(id) {
            Some(channel) => resources.is_running(channel),
            None => true,
        }
    }

    /// Pre-order traversal of the subtree rooted at `id`, including `id`.
    pub fn descendants(&self, id: CompoundId) -> Vec<CompoundId> {
        let mut out = Vec::new();
        self.collect_pre_order(id, &mut out);
        out
    }

    fn collect_pre_order(&self, id: CompoundId, out: &mut Vec<CompoundId>) {
        out.push(id);
        for &child in &self.node(id).children {
            self.collect_pre_order(child, out);
        }
    }

    /// The leaf compounds of the subtree rooted at `id`, in tree order.
    pub fn leaves(&self, id: CompoundId) -> Vec<CompoundId> {
        self.descendants(id)
            .into_iter()
            .filter(|&c| self.is_leaf(c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::resource::{PipeId, ResourceMap};

    fn leaf(channel: u32) -> CompoundData {
        CompoundData {
            channel: Some(ChannelId(channel)),
            ..Default::default()
        }
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(leaf(0));
        let a = tree.add_child(root, leaf(1));
        let b = tree.add_child(root, leaf(2));
        let c = tree.add_child(root, leaf(3));

        assert_eq!(tree.children(root), &[a, b, c]);
        assert_eq!(tree.descendants(root), vec![root, a, b, c]);
    }

    #[test]
    fn removal_destroys_the_subtree_and_unlinks() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData::default());
        let mid = tree.add_child(root, CompoundData::default());
        let deep = tree.add_child(mid, leaf(1));
        let sibling = tree.add_child(root, leaf(2));
        tree.take_events();

        tree.remove(mid);

        assert_eq!(tree.children(root), &[sibling]);
        let events = tree.take_events();
        assert_eq!(
            events,
            vec![TopologyEvent::ChildRemoved {
                parent: root,
                child: mid
            }]
        );

        // Freed slots are reused without disturbing survivors.
        let reused = tree.add_child(root, leaf(3));
        assert!(reused == mid || reused == deep);
        assert_eq!(tree.children(root), &[sibling, reused]);
    }

    #[test]
    fn destination_detection_skips_pass_through_ancestors() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(leaf(0));
        let pass = tree.add_child(root, CompoundData::default());
        let source = tree.add_child(pass, leaf(1));

        assert!(tree.is_destination(root));
        assert!(!tree.is_destination(pass)); // no channel of its own
        assert!(!tree.is_destination(source)); // ancestor has a channel

        let mut orphan_tree = CompoundTree::new();
        let lone = orphan_tree.add_root(CompoundData::default());
        let dest = orphan_tree.add_child(lone, leaf(4));
        assert!(orphan_tree.is_destination(dest));
    }

    #[test]
    fn running_requires_an_active_eye_and_channel() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(leaf(0));
        let mut resources = ResourceMap::new();
        resources.insert_running(ChannelId(0), PipeId(0), 640, 480);

        // No update pass ran: all eyes inactive.
        assert!(!tree.is_running(root, &resources));

        tree.inherit_mut(root).active = [true, false, false];
        assert!(tree.is_running(root, &resources));

        resources.set_running(ChannelId(0), false);
        assert!(!tree.is_running(root, &resources));
    }
}

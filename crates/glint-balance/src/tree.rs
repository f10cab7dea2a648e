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

//! Per-level split balancing from aggregate subtree times.

use glint_compound::{CompoundId, CompoundTree};
use glint_core::error::ConfigError;
use glint_core::math::{Range, Viewport};
use glint_core::resource::{ChannelId, ResourceDirectory};
use glint_core::telemetry::{LoadReport, StatisticType};

use crate::equalizer::{BalanceError, EqualizerConfig, SplitMode};

/// Balances the children of one compound by comparing the aggregate render
/// time of the left and right subtree at every level of a binary split tree.
///
/// Cheaper than [`LoadEqualizer`](crate::load::LoadEqualizer): no spatial
/// load profile is kept, only one time per subtree, so the split converges
/// slower but the per-frame cost is constant. Splits are stored relative to
/// the parent and carry a pixel resistance that suppresses visually
/// distracting micro-adjustments.
#[derive(Debug)]
pub struct TreeEqualizer {
    compound: CompoundId,
    mode: SplitMode,
    damping: f32,
    boundary: (i32, i32),
    boundary_fraction: f32,
    resistance: (i32, i32),
    resistance_fraction: f32,
    root: Option<Box<Node>>,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    mode: SplitMode,
    resources: f32,
    time: i64,
    /// Relative split position within the parent extent.
    split: f32,
    /// Last committed split, the reference for resistance.
    oldsplit: f32,
    boundary: (i32, i32),
    boundary_fraction: f32,
    resistance: (i32, i32),
    resistance_fraction: f32,
    max_size: (i32, i32),
}

#[derive(Debug)]
enum NodeKind {
    Leaf {
        compound: CompoundId,
        channel: Option<ChannelId>,
        task_id: u32,
    },
    Split {
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn new(kind: NodeKind, mode: SplitMode) -> Self {
        Self {
            kind,
            mode,
            resources: 0.0,
            time: 0,
            split: 0.5,
            oldsplit: 0.5,
            boundary: (1, 1),
            boundary_fraction: f32::EPSILON,
            resistance: (0, 0),
            resistance_fraction: 0.0,
            max_size: (0, 0),
        }
    }
}

impl TreeEqualizer {
    /// Attaches a new balancer to `compound`.
    pub fn attach(
        tree: &CompoundTree,
        compound: CompoundId,
        config: &EqualizerConfig,
    ) -> Result<Self, BalanceError> {
        config.validate()?;
        if tree.children(compound).is_empty() {
            return Err(ConfigError::NothingToBalance.into());
        }

        Ok(Self {
            compound,
            mode: config.mode,
            damping: config.damping,
            boundary: config.boundary,
            boundary_fraction: config.boundary_fraction,
            resistance: config.resistance,
            resistance_fraction: config.resistance_fraction,
            root: None,
        })
    }

    /// The governed compound.
    pub fn compound(&self) -> CompoundId {
        self.compound
    }

    /// Drops the split tree so it is rebuilt from the current children.
    pub fn invalidate(&mut self) {
        self.root = None;
    }

    /// Recomputes the splits and writes the children's viewports and ranges
    /// for the coming frame.
    pub fn pre_update(
        &mut self,
        tree: &mut CompoundTree,
        _frame: u32,
        resources: &dyn ResourceDirectory,
    ) -> Result<(), BalanceError> {
        if !tree.is_running(self.compound, resources) {
            return Ok(());
        }

        if self.root.is_none() {
            let children = tree.children(self.compound).to_vec();
            match children.as_slice() {
                [] => return Ok(()),
                [only] => {
                    // one child, reset whatever a previous balancer left
                    if self.mode == SplitMode::Db {
                        tree.data_mut(*only).range = Range::ALL;
                    } else {
                        tree.data_mut(*only).viewport = Viewport::FULL;
                    }
                    return Ok(());
                }
                _ => {
                    let mut root = build_tree(&children);
                    init_node(&mut root, self.mode);
                    self.root = Some(root);
                }
            }
        }

        let mut root = match self.root.take() {
            Some(root) => root,
            None => return Ok(()),
        };
        self.update_node(&mut root, tree, resources);
        split_node(&mut root, self.damping);
        log::trace!(
            "balancing {:?}: {} resources, subtree time {}",
            self.compound,
            root.resources,
            root.time
        );

        let root_pvp = tree.inherit(self.compound).pvp;
        let pvp_dims = (root_pvp.w as f32, root_pvp.h as f32);
        let result = assign(&mut root, Viewport::FULL, Range::ALL, tree, pvp_dims);
        self.root = Some(root);
        result
    }

    /// Folds one channel's statistics into the matching leaf time.
    pub fn handle_report(&mut self, report: &LoadReport) {
        if let Some(root) = self.root.as_deref_mut() {
            fold_report(root, report);
        }
    }

    fn update_node(
        &self,
        node: &mut Node,
        tree: &CompoundTree,
        resources: &dyn ResourceDirectory,
    ) {
        match &mut node.kind {
            NodeKind::Leaf {
                compound,
                channel,
                task_id,
            } => {
                let compound = *compound;
                *channel = tree.channel_of(compound);
                *task_id = tree.task_id(compound);
                node.resources = if tree.is_running(compound, resources) {
                    tree.data(compound).usage
                } else {
                    0.0
                };
                if let Some(channel) = tree.channel_of(compound) {
                    let pvp = resources.pixel_viewport(channel);
                    node.max_size = match resources.max_size(channel) {
                        (0, 0) => (pvp.w, pvp.h),
                        limit => limit,
                    };
                }
                node.boundary = self.boundary;
                node.boundary_fraction = self.boundary_fraction;
                node.resistance = self.resistance;
                node.resistance_fraction = self.resistance_fraction;
            }
            NodeKind::Split { left, right } => {
                self.update_node(left, tree, resources);
                self.update_node(right, tree, resources);

                let total = left.resources + right.resources;
                // a side without resources contributes nothing, the other
                // side's limits carry through unchanged
                let aggregates = if left.resources == 0.0 {
                    Aggregates::of(right)
                } else if right.resources == 0.0 {
                    Aggregates::of(left)
                } else {
                    let (max_size, boundary) = match node.mode {
                        SplitMode::Vertical => (
                            (
                                left.max_size.0 + right.max_size.0,
                                left.max_size.1.min(right.max_size.1),
                            ),
                            (
                                left.boundary.0 + right.boundary.0,
                                left.boundary.1.max(right.boundary.1),
                            ),
                        ),
                        SplitMode::Horizontal => (
                            (
                                left.max_size.0.min(right.max_size.0),
                                left.max_size.1 + right.max_size.1,
                            ),
                            (
                                left.boundary.0.max(right.boundary.0),
                                left.boundary.1 + right.boundary.1,
                            ),
                        ),
                        SplitMode::Db | SplitMode::TwoD => (
                            node.max_size,
                            (
                                left.boundary.0.max(right.boundary.0),
                                left.boundary.1.max(right.boundary.1),
                            ),
                        ),
                    };
                    Aggregates {
                        max_size,
                        boundary,
                        boundary_fraction: if node.mode == SplitMode::Db {
                            left.boundary_fraction + right.boundary_fraction
                        } else {
                            left.boundary_fraction.max(right.boundary_fraction)
                        },
                        resistance: (
                            left.resistance.0.max(right.resistance.0),
                            left.resistance.1.max(right.resistance.1),
                        ),
                        resistance_fraction: left
                            .resistance_fraction
                            .max(right.resistance_fraction),
                        time: left.time + right.time,
                    }
                };
                node.resources = total;
                aggregates.store(node);
            }
        }
    }
}

/// The limit and timing fields an interior node derives from its children.
/// Kept apart from [`Node`] so they can be computed while the child borrows
/// are live and written back afterwards.
struct Aggregates {
    max_size: (i32, i32),
    boundary: (i32, i32),
    boundary_fraction: f32,
    resistance: (i32, i32),
    resistance_fraction: f32,
    time: i64,
}

impl Aggregates {
    fn of(node: &Node) -> Self {
        Self {
            max_size: node.max_size,
            boundary: node.boundary,
            boundary_fraction: node.boundary_fraction,
            resistance: node.resistance,
            resistance_fraction: node.resistance_fraction,
            time: node.time,
        }
    }

    fn store(&self, node: &mut Node) {
        node.max_size = self.max_size;
        node.boundary = self.boundary;
        node.boundary_fraction = self.boundary_fraction;
        node.resistance = self.resistance;
        node.resistance_fraction = self.resistance_fraction;
        node.time = self.time;
    }
}

fn build_tree(compounds: &[CompoundId]) -> Box<Node> {
    if let [compound] = compounds {
        return Box::new(Node::new(
            NodeKind::Leaf {
                compound: *compound,
                channel: None,
                task_id: 0,
            },
            SplitMode::TwoD,
        ));
    }
    let middle = compounds.len() >> 1;
    Box::new(Node::new(
        NodeKind::Split {
            left: build_tree(&compounds[..middle]),
            right: build_tree(&compounds[middle..]),
        },
        SplitMode::TwoD,
    ))
}

/// Fixes the split axes, alternating them level by level in 2D mode,
/// starting with a vertical split.
fn init_node(node: &mut Node, mode: SplitMode) {
    node.mode = if mode == SplitMode::TwoD {
        SplitMode::Vertical
    } else {
        mode
    };
    if let NodeKind::Split { left, right } = &mut node.kind {
        let child_mode = if mode != SplitMode::TwoD {
            mode
        } else if node.mode == SplitMode::Vertical {
            SplitMode::Horizontal
        } else {
            SplitMode::Vertical
        };
        init_node(left, child_mode);
        init_node(right, child_mode);
    }
}

/// Merges one statistics batch into the leaf that rendered it. Clear, draw
/// and readback span the envelope; transmit extends it when the link is the
/// bottleneck; the first assemble ends the render phase.
fn fold_report(node: &mut Node, report: &LoadReport) {
    let (channel, task_id) = match &mut node.kind {
        NodeKind::Split { left, right } => {
            fold_report(left, report);
            fold_report(right, report);
            return;
        }
        NodeKind::Leaf {
            channel, task_id, ..
        } => (*channel, *task_id),
    };
    if channel != Some(report.channel) {
        return;
    }

    let mut start = i64::MAX;
    let mut end = 0i64;
    let mut transmit = 0i64;
    for stat in &report.statistics {
        if stat.task_id != task_id {
            continue;
        }
        match stat.kind {
            StatisticType::Clear | StatisticType::Draw | StatisticType::Readback => {
                start = start.min(stat.start_time);
                end = end.max(stat.end_time);
            }
            StatisticType::Transmit => transmit += stat.duration(),
            StatisticType::Assemble => break,
            _ => {}
        }
    }
    if start == i64::MAX {
        return;
    }
    node.time = (end - start).max(1).max(transmit);
}

/// Rebalances the relative splits bottom-up from the aggregated times.
fn split_node(node: &mut Node, damping: f32) {
    let (left, right) = match &mut node.kind {
        NodeKind::Leaf { .. } => return,
        NodeKind::Split { left, right } => (left, right),
    };

    if left.resources == 0.0 {
        node.split = 0.0;
    } else if right.resources == 0.0 {
        node.split = 1.0;
    } else {
        let target = node.time as f32 * left.resources / node.resources;
        let left_time = left.time as f32;
        let right_time = right.time as f32;
        let split = if left_time >= target {
            if left_time > 0.0 {
                target / left_time * node.split
            } else {
                node.split
            }
        } else {
            node.split + (target - left_time) / right_time * (1.0 - node.split)
        };
        node.split = (1.0 - damping) * split + damping * node.split;
    }

    split_node(left, damping);
    split_node(right, damping);
}

/// Converts the relative splits to absolute extents, applies boundary,
/// tile-limit and resistance constraints, and writes the results into the
/// children's declared data.
fn assign(
    node: &mut Node,
    vp: Viewport,
    range: Range,
    tree: &mut CompoundTree,
    pvp_dims: (f32, f32),
) -> Result<(), BalanceError> {
    let (left, right) = match &mut node.kind {
        NodeKind::Leaf { compound, .. } => {
            let compound = *compound;
            if vp != Viewport::FULL && range != Range::ALL {
                return Err(ConfigError::MixedSplitAxes.into());
            }
            let data = tree.data_mut(compound);
            data.viewport = vp;
            data.range = range;
            log::trace!("assigned {vp:?}, {range:?} to {compound:?}");
            return Ok(());
        }
        NodeKind::Split { left, right } => (left, right),
    };

    match node.mode {
        SplitMode::Vertical | SplitMode::Horizontal => {
            let horizontal = node.mode == SplitMode::Horizontal;
            let (start, length, end, pvp_dim) = if horizontal {
                (vp.y, vp.h, vp.y_end(), pvp_dims.1)
            } else {
                (vp.x, vp.w, vp.x_end(), pvp_dims.0)
            };
            let boundary = if pvp_dim > 0.0 {
                (if horizontal {
                    node.boundary.1
                } else {
                    node.boundary.0
                }) as f32
                    / pvp_dim
            } else {
                0.0
            };

            let mut absolute = start + length * node.split;
            if left.resources == 0.0 {
                absolute = start;
            } else if right.resources == 0.0 {
                absolute = end;
            } else if boundary > 0.0 {
                let length_left = absolute - start;
                let length_right = end - absolute;
                let (max_left, max_right) = if horizontal {
                    (
                        left.max_size.1 as f32 / pvp_dim,
                        right.max_size.1 as f32 / pvp_dim,
                    )
                } else {
                    (
                        left.max_size.0 as f32 / pvp_dim,
                        right.max_size.0 as f32 / pvp_dim,
                    )
                };
                if length_right > max_right {
                    absolute = end - max_right;
                } else if length_left > max_left {
                    absolute = start + max_left;
                }

                if absolute - start < boundary {
                    absolute = start + boundary;
                }
                if end - absolute < boundary {
                    absolute = end - boundary;
                }

                let ratio = (absolute / boundary + 0.5) as u32;
                absolute = ratio as f32 * boundary;
            }
            absolute = absolute.max(start).min(end);

            // suppress micro-adjustments below the pixel resistance
            let resistance = if horizontal {
                node.resistance.1
            } else {
                node.resistance.0
            };
            let new_pixel = pvp_dim * node.split;
            let old_pixel = pvp_dim * node.oldsplit;
            if ((new_pixel - old_pixel).abs() as i32) < resistance {
                absolute = start + length * node.oldsplit;
                node.split = node.oldsplit;
            } else {
                if length > 0.0 {
                    node.split = (absolute - start) / length;
                }
                node.oldsplit = node.split;
            }
            log::trace!("split {vp:?} at {absolute} (horizontal: {horizontal})");

            let mut child = vp;
            if horizontal {
                child.h = absolute - vp.y;
            } else {
                child.w = absolute - vp.x;
            }
            assign(left, child, range, tree, pvp_dims)?;

            if horizontal {
                child.y = child.y_end();
                child.h = end - child.y;
                // fp rounding may leave the right band slightly short
                while child.y_end() < end {
                    child.h += f32::EPSILON;
                }
            } else {
                child.x = child.x_end();
                child.w = end - child.x;
                while child.x_end() < end {
                    child.w += f32::EPSILON;
                }
            }
            assign(right, child, range, tree, pvp_dims)
        }
        SplitMode::Db | SplitMode::TwoD => {
            let end = range.end;
            let length = range.end - range.start;
            let mut absolute = range.start + length * node.split;

            if left.resources == 0.0 {
                absolute = range.start;
            } else if right.resources == 0.0 {
                absolute = end;
            }

            let boundary = node.boundary_fraction;
            let ratio = (absolute / boundary + 0.5) as u32;
            absolute = ratio as f32 * boundary;
            if absolute - range.start < boundary {
                absolute = range.start;
            }
            if end - absolute < boundary {
                absolute = end;
            }

            let old = range.start + length * node.oldsplit;
            if (absolute - old).abs() < node.resistance_fraction {
                absolute = old;
                node.split = node.oldsplit;
            } else {
                if length > 0.0 {
                    node.split = (absolute - range.start) / length;
                }
                node.oldsplit = node.split;
            }
            log::trace!("split {range:?} at {absolute}");

            assign(left, vp, Range::new(range.start, absolute), tree, pvp_dims)?;
            assign(right, vp, Range::new(absolute, range.end), tree, pvp_dims)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glint_compound::{update_pass, CompoundData, CompoundDefaults};
    use glint_core::resource::{PipeId, ResourceMap};
    use glint_core::telemetry::Statistic;

    fn fixture(child_count: u32) -> (CompoundTree, CompoundId, Vec<CompoundId>, ResourceMap) {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData {
            channel: Some(ChannelId(0)),
            ..Default::default()
        });
        let mut resources = ResourceMap::new();
        resources.insert_running(ChannelId(0), PipeId(0), 1024, 1024);

        let mut children = Vec::new();
        for i in 1..=child_count {
            let child = tree.add_child(
                root,
                CompoundData {
                    channel: Some(ChannelId(i)),
                    ..Default::default()
                },
            );
            children.push(child);
            resources.insert_running(ChannelId(i), PipeId(i), 1024, 1024);
        }
        tree.take_events();
        (tree, root, children, resources)
    }

    fn config(resistance: (i32, i32)) -> EqualizerConfig {
        EqualizerConfig {
            mode: SplitMode::Vertical,
            damping: 0.0,
            resistance,
            ..Default::default()
        }
    }

    fn draw_report(channel: u32, task_id: u32, micros: i64) -> LoadReport {
        LoadReport {
            channel: ChannelId(channel),
            frame: 2,
            statistics: vec![Statistic::new(StatisticType::Draw, task_id, 0, micros)],
        }
    }

    #[test]
    fn split_moves_proportionally_to_subtree_times() {
        let (mut tree, root, children, resources) = fixture(2);
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        let mut eq = TreeEqualizer::attach(&tree, root, &config((0, 0))).unwrap();
        eq.pre_update(&mut tree, 2, &resources).unwrap();
        update_pass(&mut tree, 2, &defaults, &resources);
        assert_relative_eq!(tree.data(children[0]).viewport.w, 0.5, epsilon = 1e-5);

        eq.handle_report(&draw_report(1, tree.task_id(children[0]), 10_000));
        eq.handle_report(&draw_report(2, tree.task_id(children[1]), 30_000));
        eq.pre_update(&mut tree, 3, &resources).unwrap();

        // target is half the total time; the left subtree delivered a quarter
        // so it grows by the shortfall over the right subtree's rate
        let left = tree.data(children[0]).viewport;
        let right = tree.data(children[1]).viewport;
        assert_relative_eq!(left.w, 2.0 / 3.0, epsilon = 1e-3);
        assert_relative_eq!(left.w + right.w, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn resistance_suppresses_small_moves() {
        let (mut tree, root, children, resources) = fixture(2);
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        // the measured imbalance is ~170 px on a 1024 px destination
        let mut eq = TreeEqualizer::attach(&tree, root, &config((300, 300))).unwrap();
        eq.pre_update(&mut tree, 2, &resources).unwrap();
        update_pass(&mut tree, 2, &defaults, &resources);
        eq.handle_report(&draw_report(1, tree.task_id(children[0]), 10_000));
        eq.handle_report(&draw_report(2, tree.task_id(children[1]), 30_000));
        eq.pre_update(&mut tree, 3, &resources).unwrap();

        assert_relative_eq!(tree.data(children[0]).viewport.w, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn stopped_child_collapses_its_side() {
        let (mut tree, root, children, mut resources) = fixture(2);
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        let mut eq = TreeEqualizer::attach(&tree, root, &config((0, 0))).unwrap();
        resources.set_running(ChannelId(2), false);
        eq.pre_update(&mut tree, 2, &resources).unwrap();

        assert_relative_eq!(tree.data(children[0]).viewport.w, 1.0, epsilon = 1e-5);
        assert!(!tree.data(children[1]).viewport.has_area());
    }

    #[test]
    fn single_child_gets_the_full_extent_back() {
        let (mut tree, root, children, resources) = fixture(1);
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);
        tree.data_mut(children[0]).viewport = Viewport::new(0.0, 0.0, 0.25, 1.0);

        let mut eq = TreeEqualizer::attach(&tree, root, &config((0, 0))).unwrap();
        eq.pre_update(&mut tree, 2, &resources).unwrap();

        assert_eq!(tree.data(children[0]).viewport, Viewport::FULL);
    }
}

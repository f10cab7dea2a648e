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

//! Cross-usage split balancing from a spatial load profile.

use std::collections::HashSet;

use glint_compound::{CompoundId, CompoundTree};
use glint_core::error::ConfigError;
use glint_core::math::{PixelViewport, Range, Viewport};
use glint_core::resource::ResourceDirectory;
use glint_core::telemetry::{LoadReport, Statistic, StatisticType};

use crate::equalizer::{BalanceError, EqualizerConfig, SplitMode};
use crate::history::{LoadHistory, TaskSample};

/// Balances the children of one compound by splitting screen space or the
/// database range proportionally to the measured per-area load.
///
/// The children are organized in a binary split tree. Each frame the youngest
/// complete load profile is swept along every split axis, accumulating
/// normalized load until each side holds the share of total render time its
/// resources warrant. The committed split positions are damped against the
/// previous frame and constrained by per-axis granularity and tile limits.
#[derive(Debug)]
pub struct LoadEqualizer {
    compound: CompoundId,
    mode: SplitMode,
    damping: f32,
    boundary: (i32, i32),
    boundary_fraction: f32,
    assemble_only_limit: f32,
    root: Option<Box<Node>>,
    history: LoadHistory,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    mode: SplitMode,
    resources: f32,
    /// Committed split position in absolute normalized coordinates.
    split: f32,
    boundary: (i32, i32),
    boundary_fraction: f32,
    max_size: (i32, i32),
}

#[derive(Debug)]
enum NodeKind {
    Leaf(CompoundId),
    Split { left: Box<Node>, right: Box<Node> },
}

impl Node {
    fn new(kind: NodeKind, mode: SplitMode) -> Self {
        Self {
            kind,
            mode,
            resources: 0.0,
            split: 0.5,
            boundary: (1, 1),
            boundary_fraction: f32::EPSILON,
            max_size: (0, 0),
        }
    }
}

/// Totals over the youngest complete load profile, shared by all leaves
/// during one update.
struct Totals {
    resources: f32,
    time: f32,
    assemble_time: f32,
}

/// The load profile pre-sorted along each split axis.
struct SortedSamples {
    by_x: Vec<TaskSample>,
    by_y: Vec<TaskSample>,
    by_range: Vec<TaskSample>,
}

impl SortedSamples {
    fn new(items: Vec<TaskSample>) -> Self {
        let mut by_x = items.clone();
        by_x.sort_by(|a, b| a.viewport.x.total_cmp(&b.viewport.x));
        let mut by_y = items.clone();
        by_y.sort_by(|a, b| a.viewport.y.total_cmp(&b.viewport.y));
        let mut by_range = items;
        by_range.sort_by(|a, b| a.range.start.total_cmp(&b.range.start));
        Self {
            by_x,
            by_y,
            by_range,
        }
    }

    fn for_mode(&self, mode: SplitMode) -> &[TaskSample] {
        match mode {
            SplitMode::Vertical => &self.by_x,
            SplitMode::Horizontal => &self.by_y,
            _ => &self.by_range,
        }
    }
}

impl LoadEqualizer {
    /// Attaches a new balancer to `compound`.
    ///
    /// Fails when the compound has no children, or when a channel serves two
    /// leaves of the governed subtree, which would break the association
    /// between reported statistics and assigned work.
    pub fn attach(
        tree: &CompoundTree,
        compound: CompoundId,
        config: &EqualizerConfig,
    ) -> Result<Self, BalanceError> {
        config.validate()?;
        if tree.children(compound).is_empty() {
            return Err(ConfigError::NothingToBalance.into());
        }
        let mut seen = HashSet::new();
        for leaf in tree.leaves(compound) {
            if let Some(channel) = tree.channel_of(leaf) {
                if !seen.insert(channel) {
                    return Err(ConfigError::AmbiguousChannel { channel }.into());
                }
            }
        }

        Ok(Self {
            compound,
            mode: config.mode,
            damping: config.damping,
            boundary: config.boundary,
            boundary_fraction: config.boundary_fraction,
            assemble_only_limit: config.assemble_only_limit,
            root: None,
            history: LoadHistory::new(),
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

    /// Recomputes the split and writes the children's viewports and ranges
    /// for `frame`.
    pub fn pre_update(
        &mut self,
        tree: &mut CompoundTree,
        frame: u32,
        resources: &dyn ResourceDirectory,
    ) -> Result<(), BalanceError> {
        self.history.prune();
        if !tree.is_running(self.compound, resources) {
            return Ok(());
        }

        if self.root.is_none() {
            let children = tree.children(self.compound).to_vec();
            if children.is_empty() {
                return Ok(());
            }
            let mut root = build_tree(&children, self.mode);
            init_node(&mut root, Viewport::FULL, Range::ALL);
            self.root = Some(root);
        }

        self.history.begin_frame(frame);

        let items = self.usable_profile();
        let totals = Totals {
            resources: total_resources(tree, self.compound, resources),
            time: items.iter().map(|s| s.time).sum::<i64>() as f32,
            assemble_time: items.iter().map(|s| s.assemble_time).sum::<i64>() as f32,
        };

        let mut root = match self.root.take() {
            Some(root) => root,
            None => return Ok(()),
        };
        self.update_node(&mut root, tree, resources, &totals);
        log::trace!(
            "balancing {:?} with {} resources over {} load samples",
            self.compound,
            root.resources,
            items.len()
        );

        let sorted = SortedSamples::new(items);
        let root_pvp = tree.inherit(self.compound).pvp;
        let result = self.split_node(
            &mut root,
            totals.time,
            &sorted,
            Viewport::FULL,
            Range::ALL,
            tree,
            &root_pvp,
        );
        self.root = Some(root);
        result
    }

    /// Merges one channel's statistics into the retained load profile.
    pub fn handle_report(&mut self, report: &LoadReport) {
        let Some(samples) = self.history.frame_mut(report.frame) else {
            return;
        };
        let Some(sample) = samples
            .iter_mut()
            .find(|s| s.channel == Some(report.channel))
        else {
            return;
        };
        fold_statistics(sample, &report.statistics);
    }

    /// The youngest complete load profile with the no-work samples dropped.
    /// Falls back to a single uniform sample so a split always exists.
    fn usable_profile(&self) -> Vec<TaskSample> {
        let mut items: Vec<TaskSample> = self
            .history
            .oldest()
            .unwrap_or(&[])
            .iter()
            .filter(|s| s.viewport.has_area() && s.range.has_data())
            .cloned()
            .collect();
        if items.is_empty() {
            items.push(TaskSample {
                time: 1,
                load: 1.0,
                ..Default::default()
            });
        }
        items
    }

    fn update_node(
        &self,
        node: &mut Node,
        tree: &CompoundTree,
        resources: &dyn ResourceDirectory,
        totals: &Totals,
    ) {
        match &mut node.kind {
            NodeKind::Leaf(compound) => {
                let compound = *compound;
                node.resources = if tree.is_running(compound, resources) {
                    tree.data(compound).usage
                } else {
                    0.0
                };
                node.boundary = self.boundary;
                node.boundary_fraction = self.boundary_fraction;
                if let Some(channel) = tree.channel_of(compound) {
                    let pvp = resources.pixel_viewport(channel);
                    node.max_size = match resources.max_size(channel) {
                        (0, 0) => (pvp.w, pvp.h),
                        limit => limit,
                    };
                }

                if !tree.has_destination_channel(compound) {
                    return;
                }

                // The destination only assembles once the other resources
                // suffice on their own.
                if self.assemble_only_limit <= totals.resources - node.resources {
                    node.resources = 0.0;
                    return;
                }

                // Discount the destination's render share by the time it
                // spends compositing.
                if totals.assemble_time == 0.0 || node.resources == 0.0 {
                    return;
                }
                let time_per_resource = totals.time / (totals.resources - node.resources);
                let render_time = time_per_resource * node.resources;
                let clamped_assemble = totals.assemble_time.min(render_time);
                let adjusted_per_resource = (totals.time + clamped_assemble) / totals.resources;
                node.resources -= clamped_assemble / adjusted_per_resource;
                if node.resources < 0.0 {
                    node.resources = 0.0;
                }
            }
            NodeKind::Split { left, right } => {
                self.update_node(left, tree, resources, totals);
                self.update_node(right, tree, resources, totals);

                node.resources = left.resources + right.resources;
                if left.resources == 0.0 {
                    node.max_size = right.max_size;
                    node.boundary = right.boundary;
                    node.boundary_fraction = right.boundary_fraction;
                } else if right.resources == 0.0 {
                    node.max_size = left.max_size;
                    node.boundary = left.boundary;
                    node.boundary_fraction = left.boundary_fraction;
                } else {
                    match node.mode {
                        SplitMode::Vertical => {
                            node.max_size.0 = left.max_size.0 + right.max_size.0;
                            node.max_size.1 = left.max_size.1.min(right.max_size.1);
                            node.boundary.0 = left.boundary.0 + right.boundary.0;
                            node.boundary.1 = left.boundary.1.max(right.boundary.1);
                            node.boundary_fraction =
                                left.boundary_fraction.max(right.boundary_fraction);
                        }
                        SplitMode::Horizontal => {
                            node.max_size.0 = left.max_size.0.min(right.max_size.0);
                            node.max_size.1 = left.max_size.1 + right.max_size.1;
                            node.boundary.0 = left.boundary.0.max(right.boundary.0);
                            node.boundary.1 = left.boundary.1 + right.boundary.1;
                            node.boundary_fraction =
                                left.boundary_fraction.max(right.boundary_fraction);
                        }
                        SplitMode::Db | SplitMode::TwoD => {
                            node.boundary.0 = left.boundary.0.max(right.boundary.0);
                            node.boundary.1 = left.boundary.1.max(right.boundary.1);
                            node.boundary_fraction =
                                left.boundary_fraction + right.boundary_fraction;
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn split_node(
        &mut self,
        node: &mut Node,
        time: f32,
        sorted: &SortedSamples,
        vp: Viewport,
        range: Range,
        tree: &mut CompoundTree,
        root_pvp: &PixelViewport,
    ) -> Result<(), BalanceError> {
        let (left, right) = match &mut node.kind {
            NodeKind::Leaf(compound) => {
                let compound = *compound;
                return self.assign(tree, compound, vp, range);
            }
            NodeKind::Split { left, right } => (left, right),
        };

        let left_time = if node.resources > 0.0 {
            time * left.resources / node.resources
        } else {
            0.0
        };
        let working = sorted.for_mode(node.mode);

        match node.mode {
            SplitMode::Vertical | SplitMode::Horizontal => {
                let horizontal = node.mode == SplitMode::Horizontal;
                let (start, end) = if horizontal {
                    (vp.y, vp.y_end())
                } else {
                    (vp.x, vp.x_end())
                };

                let mut split_pos = accumulate_2d(working, left_time, &vp, horizontal);
                split_pos = (1.0 - self.damping) * split_pos + self.damping * node.split;

                let pvp_dim = if horizontal { root_pvp.h } else { root_pvp.w } as f32;
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

                if left.resources == 0.0 {
                    split_pos = start;
                } else if right.resources == 0.0 {
                    split_pos = end;
                } else if boundary > 0.0 {
                    let length_left = split_pos - start;
                    let length_right = end - split_pos;
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
                        split_pos = end - max_right;
                    } else if length_left > max_left {
                        split_pos = start + max_left;
                    }

                    if split_pos - start < boundary {
                        split_pos = start + boundary;
                    }
                    if end - split_pos < boundary {
                        split_pos = end - boundary;
                    }

                    let ratio = (split_pos / boundary + 0.5) as u32;
                    split_pos = ratio as f32 * boundary;
                }

                split_pos = split_pos.max(start).min(end);
                node.split = split_pos;
                log::trace!("split {vp:?} at {split_pos} (horizontal: {horizontal})");

                let mut child = vp;
                if horizontal {
                    child.h = split_pos - vp.y;
                } else {
                    child.w = split_pos - vp.x;
                }
                self.split_node(left, left_time, sorted, child, range, tree, root_pvp)?;

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
                self.split_node(right, time - left_time, sorted, child, range, tree, root_pvp)
            }
            SplitMode::Db | SplitMode::TwoD => {
                let end = range.end;
                let mut split_pos = accumulate_db(working, left_time, range.start);
                split_pos = (1.0 - self.damping) * split_pos + self.damping * node.split;

                if left.resources == 0.0 {
                    split_pos = range.start;
                } else if right.resources == 0.0 {
                    split_pos = end;
                }

                let boundary = node.boundary_fraction;
                let ratio = (split_pos / boundary + 0.5) as u32;
                split_pos = ratio as f32 * boundary;
                if split_pos - range.start < boundary {
                    split_pos = range.start;
                }
                if end - split_pos < boundary {
                    split_pos = end;
                }

                node.split = split_pos;
                log::trace!("split {range:?} at {split_pos}");

                let left_range = Range::new(range.start, split_pos);
                self.split_node(left, left_time, sorted, vp, left_range, tree, root_pvp)?;

                let right_range = Range::new(split_pos, range.end);
                self.split_node(right, time - left_time, sorted, vp, right_range, tree, root_pvp)
            }
        }
    }

    fn assign(
        &mut self,
        tree: &mut CompoundTree,
        compound: CompoundId,
        vp: Viewport,
        range: Range,
    ) -> Result<(), BalanceError> {
        if vp != Viewport::FULL && range != Range::ALL {
            return Err(ConfigError::MixedSplitAxes.into());
        }

        let data = tree.data_mut(compound);
        data.viewport = vp;
        data.range = range;
        log::trace!("assigned {vp:?}, {range:?} to {compound:?}");

        let channel = tree.channel_of(compound);
        let dest_task_id = if channel.is_some() && channel == tree.channel_of(self.compound) {
            tree.task_id(self.compound)
        } else {
            0
        };
        let mut sample = TaskSample {
            channel,
            task_id: tree.task_id(compound),
            dest_task_id,
            viewport: vp,
            range,
            ..Default::default()
        };
        if !vp.has_area() || !range.has_data() {
            sample.time = 0;
        }
        if let Some(samples) = self.history.newest_mut() {
            samples.push(sample);
        }
        Ok(())
    }
}

/// Sums the usages of the governed compound's running children.
fn total_resources(
    tree: &CompoundTree,
    compound: CompoundId,
    resources: &dyn ResourceDirectory,
) -> f32 {
    tree.children(compound)
        .iter()
        .filter(|&&child| tree.is_running(child, resources))
        .map(|&child| tree.data(child).usage)
        .sum()
}

/// Splits the children down the middle into a binary tree, preserving order.
fn build_tree(compounds: &[CompoundId], mode: SplitMode) -> Box<Node> {
    if let [compound] = compounds {
        return Box::new(Node::new(NodeKind::Leaf(*compound), mode));
    }
    let middle = compounds.len() >> 1;
    let left = build_tree(&compounds[..middle], mode);
    let right = build_tree(&compounds[middle..], mode);
    Box::new(Node::new(NodeKind::Split { left, right }, mode))
}

/// Seeds split positions with a uniform partition and fixes the split axes,
/// alternating them level by level in 2D mode.
fn init_node(node: &mut Node, vp: Viewport, range: Range) {
    let (left, right) = match &mut node.kind {
        NodeKind::Leaf(_) => return,
        NodeKind::Split { left, right } => (left, right),
    };

    if node.mode == SplitMode::TwoD {
        node.mode = SplitMode::Vertical;
    }

    let mut left_vp = vp;
    let mut right_vp = vp;
    let mut left_range = range;
    let mut right_range = range;

    match node.mode {
        SplitMode::Vertical => {
            left_vp.w = vp.w * 0.5;
            right_vp.x = left_vp.x_end();
            right_vp.w = vp.x_end() - right_vp.x;
            node.split = left_vp.x_end();
        }
        SplitMode::Horizontal => {
            left_vp.h = vp.h * 0.5;
            right_vp.y = left_vp.y_end();
            right_vp.h = vp.y_end() - right_vp.y;
            node.split = left_vp.y_end();
        }
        SplitMode::Db | SplitMode::TwoD => {
            left_range.end = range.start + (range.end - range.start) * 0.5;
            right_range.start = left_range.end;
            node.split = left_range.end;
        }
    }

    if left.mode == SplitMode::TwoD {
        let child_mode = if node.mode == SplitMode::Vertical {
            SplitMode::Horizontal
        } else {
            SplitMode::Vertical
        };
        left.mode = child_mode;
        right.mode = child_mode;
    }
    init_node(left, left_vp, left_range);
    init_node(right, right_vp, right_range);
}

/// Folds a statistics batch into one pending sample. Clear, draw and readback
/// span the render envelope; transmit time extends it when the link is the
/// bottleneck, minus the time blocked on the send token. Statistics after the
/// first assemble belong to compositing, not rendering.
fn fold_statistics(sample: &mut TaskSample, statistics: &[Statistic]) {
    if sample.viewport.area() <= 0.0 {
        return;
    }

    let mut start = i64::MAX;
    let mut end = 0i64;
    let mut transmit = 0i64;
    let mut load_set = false;

    for stat in statistics {
        if stat.task_id == sample.dest_task_id {
            match stat.kind {
                StatisticType::Assemble => sample.assemble_time += stat.duration(),
                StatisticType::WaitReady => sample.assemble_time -= stat.duration(),
                _ => {}
            }
        }
        if stat.task_id != sample.task_id || load_set {
            continue;
        }
        match stat.kind {
            StatisticType::Clear | StatisticType::Draw | StatisticType::Readback => {
                start = start.min(stat.start_time);
                end = end.max(stat.end_time);
            }
            StatisticType::Transmit => transmit += stat.duration(),
            StatisticType::WaitSendToken => transmit -= stat.duration(),
            StatisticType::Assemble => load_set = true,
            _ => {}
        }
    }

    if start == i64::MAX {
        return;
    }
    sample.time = (end - start).max(1).max(transmit);
    sample.assemble_time = sample.assemble_time.max(0);
    sample.load = sample.time as f32 / sample.viewport.area();
}

/// Sweeps the load profile along one screen axis until `time_left` is
/// consumed, returning the absolute split position.
fn accumulate_2d(sorted: &[TaskSample], time_left: f32, vp: &Viewport, horizontal: bool) -> f32 {
    let (start, end) = if horizontal {
        (vp.y, vp.y_end())
    } else {
        (vp.x, vp.x_end())
    };
    let cross_len = if horizontal { vp.w } else { vp.h };
    let item_start = |s: &TaskSample| if horizontal { s.viewport.y } else { s.viewport.x };
    let item_end = |s: &TaskSample| {
        if horizontal {
            s.viewport.y_end()
        } else {
            s.viewport.x_end()
        }
    };

    let mut working: Vec<&TaskSample> = sorted.iter().collect();
    let mut split_pos = start;
    let mut time_left = time_left;

    while time_left > f32::EPSILON && split_pos < end && !working.is_empty() {
        working.retain(|s| item_end(s) > split_pos);
        if working.is_empty() {
            break;
        }

        // next discontinuity in the load profile
        let mut current_pos = 1.0f32;
        for s in &working {
            current_pos = current_pos.min(item_end(s));
        }

        // accumulate normalized load in split_pos..current_pos
        let mut current_load = 0.0f32;
        for s in &working {
            if item_start(s) >= current_pos {
                break;
            }
            let (s_lo, s_hi, s_len) = if horizontal {
                (s.viewport.x, s.viewport.x_end(), s.viewport.w)
            } else {
                (s.viewport.y, s.viewport.y_end(), s.viewport.h)
            };
            let (vp_lo, vp_hi) = if horizontal {
                (vp.x, vp.x_end())
            } else {
                (vp.y, vp.y_end())
            };
            let mut contribution = s_len;
            if s_lo < vp_lo {
                contribution -= vp_lo - s_lo;
            }
            if s_hi > vp_hi {
                contribution -= s_hi - vp_hi;
            }
            if contribution > 0.0 {
                current_load += s.load * (contribution / cross_len);
            }
        }

        let width = current_pos - split_pos;
        let current_time = width * cross_len * current_load;
        if current_time >= time_left {
            split_pos += width * time_left / current_time;
            time_left = 0.0;
        } else {
            time_left -= current_time;
            split_pos = current_pos;
        }
    }
    split_pos
}

/// Sweeps the load profile along the database range.
fn accumulate_db(sorted: &[TaskSample], time_left: f32, start: f32) -> f32 {
    let mut working: Vec<&TaskSample> = sorted.iter().collect();
    let mut split_pos = start;
    let mut time_left = time_left;

    while time_left > f32::EPSILON && split_pos < 1.0 && !working.is_empty() {
        working.retain(|s| s.range.end > split_pos);
        if working.is_empty() {
            break;
        }

        let mut current_pos = 1.0f32;
        for s in &working {
            current_pos = current_pos.min(s.range.end);
        }

        let mut current_load = 0.0f32;
        for s in &working {
            if s.range.start >= current_pos {
                break;
            }
            current_load += s.load;
        }

        if current_load >= time_left {
            let width = current_pos - split_pos;
            split_pos += width * time_left / current_load;
            time_left = 0.0;
        } else {
            time_left -= current_load;
            split_pos = current_pos;
        }
    }
    split_pos
}

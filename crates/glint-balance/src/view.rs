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

//! Time multiplexing of rendering resources across destination views.

use std::collections::{HashMap, HashSet, VecDeque};

use glint_compound::{CompoundId, CompoundTree};
use glint_core::error::ConfigError;
use glint_core::resource::{ChannelId, PipeId, ResourceDirectory};
use glint_core::telemetry::{LoadReport, StatisticType};

use crate::equalizer::BalanceError;

/// Smallest resource share worth assigning. Anything below this costs more in
/// composition overhead than it contributes.
const MIN_USAGE: f32 = 0.1;

/// Distributes rendering resources across the views of one compound.
///
/// Each child of the governed compound renders one view. The equalizer
/// measures the total time each view consumed on a past frame and re-assigns
/// the resource usage of the leaves under each view so that expensive views
/// borrow capacity from cheap ones, while no pipe is oversubscribed.
#[derive(Debug)]
pub struct ViewEqualizer {
    compound: CompoundId,
    listeners: Vec<Listener>,
    n_pipes: usize,
}

/// Per-view bookkeeping: which channels report for this view, and the load
/// of recent frames, newest first.
#[derive(Debug, Default)]
struct Listener {
    task_ids: HashMap<ChannelId, u32>,
    loads: VecDeque<Load>,
}

/// Accumulated time of one view for one frame. `missing` counts the channels
/// whose statistics are still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Load {
    frame: u32,
    missing: u32,
    n_resources: u32,
    time: i64,
}

impl Load {
    const NONE: Load = Load {
        frame: 0,
        missing: 0,
        n_resources: 0,
        time: 1,
    };

    fn new(frame: u32, missing: u32) -> Self {
        Self {
            frame,
            missing,
            n_resources: missing,
            time: 0,
        }
    }
}

impl ViewEqualizer {
    /// Attaches a new balancer to `compound`.
    ///
    /// Fails when the compound has no children, or when a channel appears
    /// twice within one view branch, which would break the association
    /// between statistics and views.
    pub fn attach(tree: &CompoundTree, compound: CompoundId) -> Result<Self, BalanceError> {
        if tree.children(compound).is_empty() {
            return Err(ConfigError::NothingToBalance.into());
        }
        for &child in tree.children(compound) {
            let mut seen = HashSet::new();
            for leaf in tree.leaves(child) {
                if let Some(channel) = tree.channel_of(leaf) {
                    if !seen.insert(channel) {
                        return Err(ConfigError::AmbiguousChannel { channel }.into());
                    }
                }
            }
        }

        Ok(Self {
            compound,
            listeners: Vec::new(),
            n_pipes: 0,
        })
    }

    /// The governed compound.
    pub fn compound(&self) -> CompoundId {
        self.compound
    }

    /// Drops the per-view listeners so they are rebuilt from the current
    /// children.
    pub fn invalidate(&mut self) {
        self.listeners.clear();
        self.n_pipes = 0;
    }

    /// Re-assigns the resource usage of the leaves under each view.
    pub fn pre_update(
        &mut self,
        tree: &mut CompoundTree,
        frame: u32,
        resources: &dyn ResourceDirectory,
    ) -> Result<(), BalanceError> {
        self.update_listeners(tree);
        self.update_pipe_count(tree, resources);
        self.update_usage(tree, frame, resources);
        Ok(())
    }

    /// Routes one channel's statistics to every view listening to it.
    pub fn handle_report(&mut self, report: &LoadReport) {
        for listener in &mut self.listeners {
            listener.notify(report);
        }
    }

    fn update_listeners(&mut self, tree: &CompoundTree) {
        let children = tree.children(self.compound).to_vec();
        if self.listeners.len() != children.len() {
            self.listeners = children.iter().map(|_| Listener::default()).collect();
        }
        // task ids are only stable per topology, refresh the mapping
        for (listener, &child) in self.listeners.iter_mut().zip(&children) {
            listener.task_ids.clear();
            for leaf in tree.leaves(child) {
                if let Some(channel) = tree.channel_of(leaf) {
                    listener
                        .task_ids
                        .entry(channel)
                        .or_insert_with(|| tree.task_id(leaf));
                }
            }
        }
    }

    fn update_pipe_count(&mut self, tree: &CompoundTree, resources: &dyn ResourceDirectory) {
        if self.n_pipes > 0 {
            return;
        }
        let mut pipes = HashSet::new();
        for leaf in tree.leaves(self.compound) {
            if !tree.is_running(leaf, resources) {
                continue;
            }
            if let Some(channel) = tree.channel_of(leaf) {
                pipes.insert(resources.pipe_of(channel));
            }
        }
        self.n_pipes = pipes.len();
    }

    fn update_usage(
        &mut self,
        tree: &mut CompoundTree,
        frame: u32,
        resources: &dyn ResourceDirectory,
    ) {
        let input_frame = self.find_input_frame(tree, resources);
        log::trace!("balancing views of {:?} using frame {input_frame}", self.compound);

        // always run the bookkeeping so stale loads are evicted
        let mut loads: Vec<Load> = self
            .listeners
            .iter_mut()
            .map(|listener| listener.use_load(input_frame))
            .collect();

        if !tree.is_running(self.compound, resources) || self.n_pipes == 0 {
            return;
        }

        let total_time: i64 = loads.iter().map(|l| l.time).sum::<i64>().max(1);
        let resource_time = total_time as f32 / self.n_pipes as f32;

        let children = tree.children(self.compound).to_vec();
        let mut pipe_usage: HashMap<PipeId, f32> = HashMap::new();
        let mut left_overs = vec![0.0f32; children.len()];

        // pass 1: each view claims its own pipe first
        for (i, &child) in children.iter().enumerate() {
            if !tree.is_running(child, resources) {
                continue;
            }
            let Some(self_pipe) = tree.channel_of(child).map(|c| resources.pipe_of(c)) else {
                continue;
            };
            let mut segment = loads[i].time as f32 / resource_time;
            let mut assigned = 0u32;

            for leaf in tree.leaves(child) {
                if !tree.is_running(leaf, resources) {
                    continue;
                }
                let Some(channel) = tree.channel_of(leaf) else {
                    continue;
                };
                if resources.pipe_of(channel) != self_pipe {
                    continue;
                }

                let usage = pipe_usage.entry(self_pipe).or_insert(0.0);
                if *usage >= 1.0 {
                    tree.data_mut(leaf).usage = 0.0;
                } else if *usage > 0.0 {
                    let use_share = (1.0 - *usage).max(MIN_USAGE);
                    tree.data_mut(leaf).usage = use_share;
                    segment -= use_share;
                    *usage = 1.0;
                    assigned += 1;
                } else {
                    let use_share = segment.min(1.0);
                    tree.data_mut(leaf).usage = use_share;
                    segment -= use_share;
                    *usage = use_share;
                    assigned += 1;
                }
                break;
            }
            loads[i].missing = assigned;
            left_overs[i] = segment;
        }

        // pass 2: reclaim pipes this view borrowed on previous frames
        for (i, &child) in children.iter().enumerate() {
            if !tree.is_running(child, resources) {
                continue;
            }
            let Some(self_pipe) = tree.channel_of(child).map(|c| resources.pipe_of(c)) else {
                continue;
            };
            for leaf in tree.leaves(child) {
                if !tree.is_running(leaf, resources) {
                    continue;
                }
                let Some(channel) = tree.channel_of(leaf) else {
                    continue;
                };
                let pipe = resources.pipe_of(channel);
                if tree.data(leaf).usage == 0.0 || pipe == self_pipe {
                    continue;
                }

                tree.data_mut(leaf).usage = 0.0;
                if left_overs[i] <= MIN_USAGE {
                    continue;
                }
                let usage = pipe_usage.entry(pipe).or_insert(0.0);
                if *usage > 0.0 {
                    continue;
                }

                let mut use_share = left_overs[i].min(1.0);
                if use_share + MIN_USAGE > 1.0 {
                    use_share = 1.0;
                }
                *usage = use_share;
                tree.data_mut(leaf).usage = use_share;
                left_overs[i] -= use_share;
                loads[i].missing += 1;
            }
        }

        // pass 3: satisfy left-overs anywhere, assigning at least one
        // resource per view
        for (i, &child) in children.iter().enumerate() {
            if !tree.is_running(child, resources) {
                continue;
            }

            if left_overs[i] > MIN_USAGE || loads[i].missing == 0 {
                let mut fallback = None;
                for leaf in tree.leaves(child) {
                    if !tree.is_running(leaf, resources) {
                        continue;
                    }
                    if fallback.is_none() {
                        fallback = Some(leaf);
                    }
                    if tree.data(leaf).usage != 0.0 {
                        continue;
                    }
                    let Some(channel) = tree.channel_of(leaf) else {
                        continue;
                    };
                    let usage = pipe_usage.entry(resources.pipe_of(channel)).or_insert(0.0);
                    if *usage >= 1.0 {
                        continue;
                    }
                    if *usage > 0.0 {
                        let use_share = (1.0 - *usage).max(MIN_USAGE);
                        tree.data_mut(leaf).usage = use_share;
                        left_overs[i] -= use_share;
                        *usage = 1.0;
                    } else {
                        let use_share = left_overs[i].min(1.0);
                        tree.data_mut(leaf).usage = use_share;
                        left_overs[i] -= use_share;
                        *usage = use_share;
                    }
                    loads[i].missing += 1;
                    if left_overs[i] <= MIN_USAGE {
                        break;
                    }
                }

                if loads[i].missing == 0 {
                    if let Some(fallback) = fallback {
                        tree.data_mut(fallback).usage = left_overs[i];
                        loads[i].missing = 1;
                    }
                }
            }

            self.listeners[i].new_load(frame, loads[i].missing);
        }
    }

    /// The youngest frame for which every running view has complete data.
    fn find_input_frame(&self, tree: &CompoundTree, resources: &dyn ResourceDirectory) -> u32 {
        let mut frame = u32::MAX;
        for (listener, &child) in self.listeners.iter().zip(tree.children(self.compound)) {
            if !tree.is_running(child, resources) {
                continue;
            }
            frame = frame.min(listener.find_youngest_load());
        }
        frame
    }
}

impl Listener {
    fn notify(&mut self, report: &LoadReport) {
        let Some(&task_id) = self.task_ids.get(&report.channel) else {
            return;
        };
        let Some(load) = self.loads.iter_mut().find(|l| l.frame == report.frame) else {
            return;
        };
        if load.missing == 0 {
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
                StatisticType::WaitSendToken => transmit -= stat.duration(),
                StatisticType::Assemble => break,
                _ => {}
            }
        }
        if start == i64::MAX {
            return;
        }

        let time = (end - start).max(transmit);
        load.time += time;
        load.missing -= 1;
        if load.missing == 0 && load.n_resources > 0 {
            // scale down superlinearly: n resources don't render n times
            // faster once composition is accounted for
            let per_resource = load.time as f32 / load.n_resources as f32;
            load.time = (per_resource * (load.n_resources as f32).sqrt()) as i64;
        }
    }

    fn find_youngest_load(&self) -> u32 {
        self.loads
            .iter()
            .find(|l| l.missing == 0)
            .map(|l| l.frame)
            .unwrap_or(0)
    }

    /// Takes the load of `frame` for balancing and evicts everything older.
    fn use_load(&mut self, frame: u32) -> Load {
        let Some(index) = self.loads.iter().position(|l| l.frame == frame) else {
            return Load::NONE;
        };
        if self.loads[index].time == 0 {
            self.loads[index].time = 1;
        }
        let load = self.loads[index];
        self.loads.truncate(index + 1);
        load
    }

    fn new_load(&mut self, frame: u32, missing: u32) {
        self.loads.push_front(Load::new(frame, missing));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glint_compound::{update_pass, CompoundData, CompoundDefaults};
    use glint_core::resource::ResourceMap;
    use glint_core::telemetry::Statistic;

    /// Two views, two pipes, each view owning one leaf per pipe.
    fn fixture() -> (CompoundTree, CompoundId, [CompoundId; 4], ResourceMap) {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData::default());
        let mut resources = ResourceMap::new();

        let channel = |id: u32| CompoundData {
            channel: Some(ChannelId(id)),
            ..Default::default()
        };
        let view_a = tree.add_child(root, channel(10));
        let view_b = tree.add_child(root, channel(20));
        let leaves = [
            tree.add_child(view_a, channel(10)),
            tree.add_child(view_a, channel(11)),
            tree.add_child(view_b, channel(20)),
            tree.add_child(view_b, channel(21)),
        ];
        resources.insert_running(ChannelId(10), PipeId(0), 1024, 1024);
        resources.insert_running(ChannelId(11), PipeId(1), 1024, 1024);
        resources.insert_running(ChannelId(20), PipeId(1), 1024, 1024);
        resources.insert_running(ChannelId(21), PipeId(0), 1024, 1024);
        tree.take_events();
        (tree, root, leaves, resources)
    }

    fn draw_report(channel: u32, frame: u32, task_id: u32, micros: i64) -> LoadReport {
        LoadReport {
            channel: ChannelId(channel),
            frame,
            statistics: vec![Statistic::new(StatisticType::Draw, task_id, 0, micros)],
        }
    }

    #[test]
    fn each_view_starts_on_its_own_pipe() {
        let (mut tree, root, leaves, resources) = fixture();
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        let mut eq = ViewEqualizer::attach(&tree, root).unwrap();
        eq.pre_update(&mut tree, 2, &resources).unwrap();

        assert_relative_eq!(tree.data(leaves[0]).usage, 1.0);
        assert_relative_eq!(tree.data(leaves[1]).usage, 0.0);
        assert_relative_eq!(tree.data(leaves[2]).usage, 1.0);
        assert_relative_eq!(tree.data(leaves[3]).usage, 0.0);
    }

    #[test]
    fn expensive_view_borrows_idle_capacity() {
        let (mut tree, root, leaves, resources) = fixture();
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        let mut eq = ViewEqualizer::attach(&tree, root).unwrap();
        eq.pre_update(&mut tree, 2, &resources).unwrap();
        update_pass(&mut tree, 2, &defaults, &resources);

        // view A finished in 10 ms, view B needed 30 ms
        eq.handle_report(&draw_report(10, 2, tree.task_id(leaves[0]), 10_000));
        eq.handle_report(&draw_report(20, 2, tree.task_id(leaves[2]), 30_000));
        eq.pre_update(&mut tree, 3, &resources).unwrap();

        // A shrinks to half a pipe, B keeps its pipe and borrows the
        // other half of A's
        assert_relative_eq!(tree.data(leaves[0]).usage, 0.5, epsilon = 1e-5);
        assert_relative_eq!(tree.data(leaves[2]).usage, 1.0, epsilon = 1e-5);
        assert_relative_eq!(tree.data(leaves[3]).usage, 0.5, epsilon = 1e-5);

        // no pipe is oversubscribed
        let pipe0 = tree.data(leaves[0]).usage + tree.data(leaves[3]).usage;
        let pipe1 = tree.data(leaves[1]).usage + tree.data(leaves[2]).usage;
        assert!(pipe0 <= 1.0 + 1e-5);
        assert!(pipe1 <= 1.0 + 1e-5);
    }

    #[test]
    fn duplicate_channel_in_one_view_is_rejected() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData::default());
        let view = tree.add_child(
            root,
            CompoundData {
                channel: Some(ChannelId(10)),
                ..Default::default()
            },
        );
        for _ in 0..2 {
            tree.add_child(
                view,
                CompoundData {
                    channel: Some(ChannelId(11)),
                    ..Default::default()
                },
            );
        }
        assert!(matches!(
            ViewEqualizer::attach(&tree, root),
            Err(BalanceError::Config(ConfigError::AmbiguousChannel {
                channel: ChannelId(11)
            }))
        ));
    }
}

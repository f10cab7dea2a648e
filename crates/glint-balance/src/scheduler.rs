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

//! Per-frame orchestration of the compound tree and its balancers.

use std::collections::HashSet;

use glint_compound::{
    observer, update_pass_with, CompoundDefaults, CompoundId, CompoundObserver, CompoundTree,
};
use glint_core::resource::ResourceDirectory;
use glint_core::telemetry::{LoadReport, StatisticsFeed};

use crate::equalizer::{BalanceError, Equalizer, EqualizerConfig};
use crate::framerate::FramerateEqualizer;
use crate::load::LoadEqualizer;
use crate::monitor::MonitorEqualizer;
use crate::tree::TreeEqualizer;
use crate::view::ViewEqualizer;

/// Owns the compound tree and drives one balanced update per frame.
///
/// The per-frame order is fixed: drain the statistics feed and fold the
/// reports into every balancer, invalidate balancers whose governed subtree
/// changed shape, then run the inheritance pass with each balancer rewriting
/// its children's declared attributes just before those children inherit.
#[derive(Debug)]
pub struct FrameScheduler {
    tree: CompoundTree,
    defaults: CompoundDefaults,
    feed: StatisticsFeed,
    equalizers: Vec<Equalizer>,
}

impl FrameScheduler {
    /// Creates a scheduler around an authored compound tree.
    pub fn new(tree: CompoundTree, defaults: CompoundDefaults) -> Self {
        Self {
            tree,
            defaults,
            feed: StatisticsFeed::new(),
            equalizers: Vec::new(),
        }
    }

    /// The compound tree.
    pub fn tree(&self) -> &CompoundTree {
        &self.tree
    }

    /// Mutable access to the compound tree, for topology edits between
    /// frames.
    pub fn tree_mut(&mut self) -> &mut CompoundTree {
        &mut self.tree
    }

    /// A sender for the statistics feed, to hand to render clients.
    pub fn sender(&self) -> flume::Sender<LoadReport> {
        self.feed.sender()
    }

    /// Queues a report directly, bypassing the channel.
    pub fn publish(&self, report: LoadReport) {
        self.feed.publish(report);
    }

    /// Attaches a cross-usage split balancer to `compound`.
    pub fn balance_load(
        &mut self,
        compound: CompoundId,
        config: &EqualizerConfig,
    ) -> Result<(), BalanceError> {
        let eq = LoadEqualizer::attach(&self.tree, compound, config)?;
        self.equalizers.push(Equalizer::Load(eq));
        Ok(())
    }

    /// Attaches a per-level split balancer to `compound`.
    pub fn balance_tree(
        &mut self,
        compound: CompoundId,
        config: &EqualizerConfig,
    ) -> Result<(), BalanceError> {
        let eq = TreeEqualizer::attach(&self.tree, compound, config)?;
        self.equalizers.push(Equalizer::Tree(eq));
        Ok(())
    }

    /// Attaches a view time-multiplexer to `compound`.
    pub fn balance_views(&mut self, compound: CompoundId) -> Result<(), BalanceError> {
        let eq = ViewEqualizer::attach(&self.tree, compound)?;
        self.equalizers.push(Equalizer::View(eq));
        Ok(())
    }

    /// Attaches a frame-rate throttle to `compound`.
    pub fn balance_framerate(&mut self, compound: CompoundId) -> Result<(), BalanceError> {
        let eq = FramerateEqualizer::attach(&self.tree, compound)?;
        self.equalizers.push(Equalizer::Framerate(eq));
        Ok(())
    }

    /// Attaches a monitor scaler to `compound`.
    pub fn balance_monitor(&mut self, compound: CompoundId) -> Result<(), BalanceError> {
        let eq = MonitorEqualizer::attach(&self.tree, compound)?;
        self.equalizers.push(Equalizer::Monitor(eq));
        Ok(())
    }

    /// Detaches every balancer governing `compound`.
    pub fn remove_balancers(&mut self, compound: CompoundId) {
        self.equalizers.retain(|eq| eq.compound() != compound);
    }

    /// Runs one balanced update: folds queued statistics, reacts to topology
    /// changes and recomputes the inherited attributes for `frame`.
    pub fn run_frame(
        &mut self,
        frame: u32,
        resources: &dyn ResourceDirectory,
    ) -> Result<(), BalanceError> {
        for report in self.feed.drain() {
            for eq in &mut self.equalizers {
                eq.handle_report(&report);
            }
        }

        self.dispatch_topology_events();

        let Self {
            tree,
            defaults,
            equalizers,
            ..
        } = self;
        let mut failure: Option<BalanceError> = None;
        update_pass_with(tree, frame, defaults, resources, &mut |tree, id, frame| {
            for eq in equalizers.iter_mut() {
                if eq.compound() != id || failure.is_some() {
                    continue;
                }
                if let Err(e) = eq.pre_update(tree, frame, resources) {
                    failure = Some(e);
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn dispatch_topology_events(&mut self) {
        let events = self.tree.take_events();
        if events.is_empty() {
            return;
        }
        let mut touched = TouchedParents::default();
        observer::dispatch(&events, &mut touched);
        for eq in &mut self.equalizers {
            let affected = self
                .tree
                .descendants(eq.compound())
                .into_iter()
                .any(|id| touched.0.contains(&id));
            if affected {
                log::debug!("topology change under {:?}, resetting balancer", eq.compound());
                eq.notify_topology_changed();
            }
        }
    }
}

/// Collects the parents whose child lists changed during a frame.
#[derive(Default)]
struct TouchedParents(HashSet<CompoundId>);

impl CompoundObserver for TouchedParents {
    fn notify_child_added(&mut self, parent: CompoundId, _child: CompoundId) {
        self.0.insert(parent);
    }

    fn notify_child_removed(&mut self, parent: CompoundId, _child: CompoundId) {
        self.0.insert(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glint_compound::CompoundData;
    use glint_core::resource::{ChannelId, PipeId, ResourceMap};
    use glint_core::telemetry::{Statistic, StatisticType};

    fn fixture(child_count: u32) -> (FrameScheduler, CompoundId, Vec<CompoundId>, ResourceMap) {
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
            resources.insert_running(ChannelId(i), PipeId(i), 1024, 1024);
            children.push(child);
        }

        let scheduler = FrameScheduler::new(tree, CompoundDefaults::default());
        (scheduler, root, children, resources)
    }

    fn draw_report(channel: u32, frame: u32, task_id: u32, micros: i64) -> LoadReport {
        LoadReport {
            channel: ChannelId(channel),
            frame,
            statistics: vec![Statistic::new(StatisticType::Draw, task_id, 0, micros)],
        }
    }

    #[test]
    fn reported_load_reshapes_the_next_frame() {
        let (mut scheduler, root, children, resources) = fixture(2);
        let config = EqualizerConfig {
            damping: 0.0,
            boundary: (0, 0),
            ..Default::default()
        };
        scheduler.balance_load(root, &config).unwrap();

        // frame 1 activates the compounds, frame 2 assigns uniform halves
        scheduler.run_frame(1, &resources).unwrap();
        scheduler.run_frame(2, &resources).unwrap();
        assert_relative_eq!(scheduler.tree().data(children[0]).viewport.w, 0.5);

        let tasks: Vec<u32> = children
            .iter()
            .map(|&c| scheduler.tree().task_id(c))
            .collect();
        scheduler.publish(draw_report(1, 2, tasks[0], 10_000));
        scheduler.publish(draw_report(2, 2, tasks[1], 30_000));
        scheduler.run_frame(3, &resources).unwrap();

        // the fast channel takes on more screen
        let fast = scheduler.tree().data(children[0]).viewport;
        let slow = scheduler.tree().data(children[1]).viewport;
        assert_relative_eq!(fast.w, 2.0 / 3.0, epsilon = 1e-4);
        assert_relative_eq!(slow.w, 1.0 / 3.0, epsilon = 1e-4);
        assert_relative_eq!(fast.w + slow.w, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn adding_a_child_resets_the_split_tree() {
        let (mut scheduler, root, _, mut resources) = fixture(2);
        scheduler
            .balance_load(
                root,
                &EqualizerConfig {
                    damping: 0.0,
                    ..Default::default()
                },
            )
            .unwrap();
        scheduler.run_frame(1, &resources).unwrap();
        scheduler.run_frame(2, &resources).unwrap();

        let third = scheduler.tree_mut().add_child(
            root,
            CompoundData {
                channel: Some(ChannelId(3)),
                ..Default::default()
            },
        );
        resources.insert_running(ChannelId(3), PipeId(3), 1024, 1024);
        scheduler.run_frame(3, &resources).unwrap();
        scheduler.run_frame(4, &resources).unwrap();

        // the uniform profile now spreads over three tiles
        let w = scheduler.tree().data(third).viewport.w;
        assert_relative_eq!(w, 1.0 / 3.0, epsilon = 1e-2);
    }

    #[test]
    fn transport_producers_feed_through_the_channel() {
        let (mut scheduler, root, children, resources) = fixture(2);
        scheduler.balance_framerate(root).unwrap();

        let sender = scheduler.sender();
        for frame in 1..6 {
            scheduler.run_frame(frame, &resources).unwrap();
            for &child in &children {
                let channel = scheduler.tree().channel_of(child).unwrap();
                sender
                    .send(draw_report(channel.0, frame, 1, 50_000))
                    .unwrap();
            }
        }
        scheduler.run_frame(6, &resources).unwrap();

        let max_fps = scheduler.tree().data(root).max_fps;
        assert!(max_fps < 21.0 && max_fps > 18.0);
    }

    #[test]
    fn a_bad_config_is_rejected_at_attach_time() {
        let (mut scheduler, root, _, _) = fixture(2);
        let config = EqualizerConfig {
            damping: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            scheduler.balance_load(root, &config),
            Err(BalanceError::InvalidDamping(d)) if d == 1.5
        ));
    }
}

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

//! Frame rate smoothing for time-multiplexed compounds.

use std::collections::{HashMap, VecDeque};

use glint_compound::{CompoundId, CompoundTree};
use glint_core::error::ConfigError;
use glint_core::resource::{ChannelId, ResourceDirectory};
use glint_core::telemetry::{LoadReport, StatisticType};

use crate::equalizer::BalanceError;

/// Safety margin on the predicted frame time. Throttling slightly below the
/// measured rate keeps the pipeline from oscillating around its limit.
const SLOWDOWN: f32 = 1.05;

/// Above this rate the display refresh is the limit, not the cluster.
const VSYNC_FPS: f32 = 60.0;

/// Upper bound on the sliding window, in frames.
const MAX_SAMPLES: usize = 100;

/// Caps the frame rate of a compound to the speed of its slowest child.
///
/// Children rendering with a period greater than one produce a frame only
/// every n-th update. Without throttling, the faster children race ahead and
/// the output stutters whenever the slow producer's frame is consumed. This
/// equalizer measures per-frame render times, normalized by each child's
/// period, and publishes the sustainable rate as the compound's fps limit.
#[derive(Debug)]
pub struct FramerateEqualizer {
    compound: CompoundId,
    /// Sliding window of per-frame times in microseconds, newest first.
    /// A zero entry is a frame whose statistics have not arrived yet.
    times: VecDeque<(u32, f32)>,
    /// Channels feeding the window, with the period of their subtree.
    periods: HashMap<ChannelId, u32>,
    n_samples: usize,
}

impl FramerateEqualizer {
    /// Attaches a new throttle to `compound`.
    pub fn attach(tree: &CompoundTree, compound: CompoundId) -> Result<Self, BalanceError> {
        if tree.children(compound).is_empty() {
            return Err(ConfigError::NothingToBalance.into());
        }
        Ok(Self {
            compound,
            times: VecDeque::new(),
            periods: HashMap::new(),
            n_samples: 0,
        })
    }

    /// The governed compound.
    pub fn compound(&self) -> CompoundId {
        self.compound
    }

    /// Drops the measurement window so it is rebuilt from the current
    /// topology.
    pub fn invalidate(&mut self) {
        self.times.clear();
        self.periods.clear();
        self.n_samples = 0;
    }

    /// Updates the fps limit of the compound from the sliding window and
    /// opens a slot for `frame`.
    pub fn pre_update(
        &mut self,
        tree: &mut CompoundTree,
        frame: u32,
        resources: &dyn ResourceDirectory,
    ) -> Result<(), BalanceError> {
        self.init(tree);

        // the window is contiguous from the newest entry down to the
        // youngest frame still missing statistics
        let mut from = None;
        for (i, &(_, time)) in self.times.iter().enumerate().rev() {
            if time == 0.0 {
                from = Some(i);
                break;
            }
        }

        let start = from.map_or(0, |i| i + 1);
        let mut samples = 0;
        let mut avg_time = 0.0f32;
        for &(_, time) in self.times.iter().skip(start).take(self.n_samples) {
            samples += 1;
            avg_time += time;
        }

        // a full window means everything older is noise
        if samples == self.n_samples {
            self.times.truncate(start);
        }

        if !tree.is_running(self.compound, resources) {
            tree.data_mut(self.compound).max_fps = f32::MAX;
            return Ok(());
        }

        if samples > 0 {
            avg_time /= samples as f32;
            log::trace!("frame {frame} avg time {avg_time}us");

            let fps = 1_000_000.0 / (avg_time * SLOWDOWN);
            tree.data_mut(self.compound).max_fps =
                if fps > VSYNC_FPS { f32::MAX } else { fps };
        }

        if self.times.front().map(|&(f, _)| f) != Some(frame) {
            self.times.push_front((frame, 0.0));
        }
        Ok(())
    }

    /// Folds one channel's frame envelope into the window, normalized by
    /// the channel's multiplex period.
    pub fn handle_report(&mut self, report: &LoadReport) {
        let Some(&period) = self.periods.get(&report.channel) else {
            return;
        };

        let mut start = i64::MAX;
        let mut end = 0i64;
        for stat in &report.statistics {
            match stat.kind {
                StatisticType::Clear
                | StatisticType::Draw
                | StatisticType::Assemble
                | StatisticType::Readback => {
                    start = start.min(stat.start_time);
                    end = end.max(stat.end_time);
                }
                _ => {}
            }
        }
        if start == i64::MAX {
            return;
        }
        if start == end {
            // very fast frames report equal timestamps
            end += 1;
        }

        for entry in &mut self.times {
            if entry.0 != report.frame {
                continue;
            }
            let time = (end - start) as f32 / period.max(1) as f32;
            entry.1 = entry.1.max(time);
        }
    }

    fn init(&mut self, tree: &CompoundTree) {
        if self.n_samples > 0 {
            return;
        }
        self.n_samples = 1;
        for &child in tree.children(self.compound) {
            let period = tree.inherit(child).period;
            self.n_samples = self.n_samples.max(period as usize);
            for node in tree.descendants(child) {
                if let Some(channel) = tree.channel_of(node) {
                    self.periods.entry(channel).or_insert(period.max(1));
                }
            }
        }
        self.n_samples = self.n_samples.min(MAX_SAMPLES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glint_compound::{update_pass, CompoundData, CompoundDefaults};
    use glint_core::resource::{PipeId, ResourceMap};
    use glint_core::telemetry::Statistic;

    fn fixture() -> (CompoundTree, CompoundId, ResourceMap) {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData {
            channel: Some(ChannelId(0)),
            ..Default::default()
        });
        let mut resources = ResourceMap::new();
        resources.insert_running(ChannelId(0), PipeId(0), 1024, 1024);
        for id in 1..=2u32 {
            tree.add_child(
                root,
                CompoundData {
                    channel: Some(ChannelId(id)),
                    ..Default::default()
                },
            );
            resources.insert_running(ChannelId(id), PipeId(id), 1024, 1024);
        }
        tree.take_events();
        (tree, root, resources)
    }

    fn draw_report(channel: u32, frame: u32, micros: i64) -> LoadReport {
        LoadReport {
            channel: ChannelId(channel),
            frame,
            statistics: vec![Statistic::new(StatisticType::Draw, 1, 0, micros)],
        }
    }

    #[test]
    fn slow_frames_lower_the_fps_cap() {
        let (mut tree, root, resources) = fixture();
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        let mut eq = FramerateEqualizer::attach(&tree, root).unwrap();
        for frame in 2..6 {
            eq.pre_update(&mut tree, frame, &resources).unwrap();
            // 50 ms per frame on the slower channel
            eq.handle_report(&draw_report(1, frame, 10_000));
            eq.handle_report(&draw_report(2, frame, 50_000));
        }
        eq.pre_update(&mut tree, 6, &resources).unwrap();

        // 20 fps measured, derated by the slowdown factor
        let expected = 1_000_000.0 / (50_000.0 * SLOWDOWN);
        assert_relative_eq!(tree.data(root).max_fps, expected, epsilon = 1e-3);
    }

    #[test]
    fn fast_frames_release_the_throttle() {
        let (mut tree, root, resources) = fixture();
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        let mut eq = FramerateEqualizer::attach(&tree, root).unwrap();
        for frame in 2..6 {
            eq.pre_update(&mut tree, frame, &resources).unwrap();
            eq.handle_report(&draw_report(1, frame, 2_000));
            eq.handle_report(&draw_report(2, frame, 3_000));
        }
        eq.pre_update(&mut tree, 6, &resources).unwrap();

        assert_eq!(tree.data(root).max_fps, f32::MAX);
    }

    #[test]
    fn a_missing_report_blocks_the_window_until_it_arrives() {
        let (mut tree, root, resources) = fixture();
        let defaults = CompoundDefaults::default();
        update_pass(&mut tree, 1, &defaults, &resources);

        let mut eq = FramerateEqualizer::attach(&tree, root).unwrap();
        eq.pre_update(&mut tree, 2, &resources).unwrap();
        eq.pre_update(&mut tree, 3, &resources).unwrap();
        eq.handle_report(&draw_report(2, 3, 50_000));

        // frame 2 has not reported, so frame 3 is not usable yet
        eq.pre_update(&mut tree, 4, &resources).unwrap();
        assert_eq!(tree.data(root).max_fps, f32::MAX);

        eq.handle_report(&draw_report(2, 2, 50_000));
        eq.pre_update(&mut tree, 5, &resources).unwrap();
        assert_relative_eq!(
            tree.data(root).max_fps,
            1_000_000.0 / (50_000.0 * SLOWDOWN),
            epsilon = 1e-3
        );
    }
}

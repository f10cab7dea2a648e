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

//! Per-frame load history shared by the split-based equalizers.

use std::collections::VecDeque;

use glint_core::math::{Range, Viewport};
use glint_core::resource::ChannelId;

/// The work one leaf compound was assigned for one frame, together with the
/// timing that eventually comes back for it.
///
/// `time` is in microseconds; `-1` marks a sample whose statistics have not
/// arrived yet. `load` is time normalized by the assigned viewport area, so
/// samples from differently sized tiles are comparable.
#[derive(Debug, Clone)]
pub struct TaskSample {
    /// Channel the work was assigned to.
    pub channel: Option<ChannelId>,
    /// Task id of the leaf compound for that frame.
    pub task_id: u32,
    /// Task id of the governed compound itself when the leaf renders to the
    /// destination channel, `0` otherwise. Assemble and wait statistics
    /// reported under this id discount the leaf's render time.
    pub dest_task_id: u32,
    /// Viewport assigned to the leaf.
    pub viewport: Viewport,
    /// Database range assigned to the leaf.
    pub range: Range,
    /// Measured render time in microseconds, `-1` while pending.
    pub time: i64,
    /// Time spent compositing on the destination, in microseconds.
    pub assemble_time: i64,
    /// `time` per unit of viewport area.
    pub load: f32,
}

impl Default for TaskSample {
    fn default() -> Self {
        Self {
            channel: None,
            task_id: 0,
            dest_task_id: 0,
            viewport: Viewport::FULL,
            range: Range::ALL,
            time: -1,
            assemble_time: 0,
            load: 0.0,
        }
    }
}

impl TaskSample {
    fn is_complete(&self) -> bool {
        self.time >= 0
    }
}

/// Load samples of recent frames, oldest first.
///
/// New frames are appended by [`LoadHistory::begin_frame`]; statistics arrive
/// out of order and are merged into whichever frame they belong to. A single
/// [`LoadHistory::prune`] pass, run once per frame before the split is
/// computed, evicts everything older than the youngest fully reported frame
/// so the deque stays bounded even when a channel never reports.
#[derive(Debug, Default)]
pub struct LoadHistory {
    frames: VecDeque<(u32, Vec<TaskSample>)>,
}

/// How many incomplete frames may queue behind the split source. Statistics
/// arrive within a frame or two of the work; anything that stayed unreported
/// while this many newer frames were begun is not completing anymore.
const MAX_PENDING: usize = 2;

impl LoadHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an empty sample set for `frame`.
    pub fn begin_frame(&mut self, frame: u32) {
        self.frames.push_back((frame, Vec::new()));
    }

    /// The samples of the newest frame, for recording fresh assignments.
    pub fn newest_mut(&mut self) -> Option<&mut Vec<TaskSample>> {
        self.frames.back_mut().map(|(_, samples)| samples)
    }

    /// The samples of a specific frame, if it is still retained.
    pub fn frame_mut(&mut self, frame: u32) -> Option<&mut Vec<TaskSample>> {
        self.frames
            .iter_mut()
            .find(|(f, _)| *f == frame)
            .map(|(_, samples)| samples)
    }

    /// The oldest retained frame. After [`LoadHistory::prune`] this is the
    /// youngest frame with complete data, the one splits are computed from.
    pub fn oldest(&self) -> Option<&[TaskSample]> {
        self.frames.front().map(|(_, samples)| samples.as_slice())
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if no frame is retained.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drops every frame older than the youngest complete one, and bounds
    /// the incomplete tail behind it.
    ///
    /// A frame is complete when all of its samples have reported a time.
    /// Frames the balancer produced but that never got statistics stay for
    /// up to [`MAX_PENDING`] newer frames, then the oldest of them is
    /// written off so a silent channel cannot grow the deque without bound.
    /// When nothing complete is retained the history collapses to a
    /// synthetic frame with one uniform unit-load sample, so a split can
    /// always be computed.
    pub fn prune(&mut self) {
        let youngest_complete = self
            .frames
            .iter()
            .rposition(|(_, samples)| samples.iter().all(TaskSample::is_complete));

        match youngest_complete {
            Some(index) => {
                if index > 0 {
                    log::trace!("evicting {} stale history frames", index);
                }
                self.frames.drain(..index);
            }
            None => {
                self.frames.clear();
            }
        }

        while self.frames.len() > 1 + MAX_PENDING {
            if let Some((frame, _)) = self.frames.remove(1) {
                log::trace!("writing off unreported frame {frame}");
            }
        }

        if self.frames.is_empty() {
            self.frames.push_back((
                0,
                vec![TaskSample {
                    time: 1,
                    load: 1.0,
                    ..Default::default()
                }],
            ));
        }
    }
}

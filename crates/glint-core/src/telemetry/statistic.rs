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

//! One timing measurement from a remote render channel.

use crate::resource::ChannelId;
use serde::{Deserialize, Serialize};

/// The kind of operation a [`Statistic`] measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatisticType {
    /// Framebuffer clear.
    Clear,
    /// Scene draw.
    Draw,
    /// Framebuffer readback.
    Readback,
    /// Input frame compositing.
    Assemble,
    /// Output frame network transfer.
    Transmit,
    /// Stall waiting for a send token.
    WaitSendToken,
    /// Stall waiting for input frames to become ready.
    WaitReady,
}

/// One timing sample, tagged with the task that produced it.
///
/// Times are in microseconds on the reporting node's clock; only the
/// difference `end_time - start_time` and the relative order of samples from
/// one channel are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistic {
    /// The measured operation.
    pub kind: StatisticType,
    /// The per-frame task id assigned by the update pass.
    pub task_id: u32,
    /// Start of the operation, microseconds.
    pub start_time: i64,
    /// End of the operation, microseconds.
    pub end_time: i64,
}

impl Statistic {
    /// Creates a new sample.
    pub const fn new(kind: StatisticType, task_id: u32, start_time: i64, end_time: i64) -> Self {
        Self {
            kind,
            task_id,
            start_time,
            end_time,
        }
    }

    /// The measured duration in microseconds.
    #[inline]
    pub fn duration(&self) -> i64 {
        self.end_time - self.start_time
    }
}

/// A batch of statistics for one `(channel, frame)`, as shipped by the
/// transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// The reporting channel.
    pub channel: ChannelId,
    /// The frame the work belonged to.
    pub frame: u32,
    /// All samples gathered for that frame on that channel.
    pub statistics: Vec<Statistic>,
}

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

//! The resource directory contract towards the rendering layer.
//!
//! The scheduler never owns channels or GPUs; it observes their status
//! through [`ResourceDirectory`] and emits decisions keyed by [`ChannelId`].
//! The window/context lifecycle behind these queries is out of scope.

use crate::math::PixelViewport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies one render channel (a viewport on a window, bound to a GPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

/// Identifies one GPU (pipe). Several channels may share a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipeId(pub u32);

/// Read-only status of the cluster's render resources.
///
/// Implemented by the runtime layer that tracks entity lifecycles; the
/// in-memory [`ResourceMap`] serves tests and single-process setups.
pub trait ResourceDirectory {
    /// Whether the channel has completed initialization and may receive work.
    fn is_running(&self, channel: ChannelId) -> bool;

    /// The channel's current drawable size.
    fn pixel_viewport(&self, channel: ChannelId) -> PixelViewport;

    /// The hardware tiling limit in pixels, `(0, 0)` meaning unbounded.
    fn max_size(&self, channel: ChannelId) -> (i32, i32);

    /// The pipe (GPU) the channel is bound to.
    fn pipe_of(&self, channel: ChannelId) -> PipeId;
}

/// Per-channel record held by a [`ResourceMap`].
#[derive(Debug, Clone)]
pub struct ChannelEntry {
    /// The owning pipe.
    pub pipe: PipeId,
    /// Current drawable size.
    pub pixel_viewport: PixelViewport,
    /// Hardware tiling limit, `(0, 0)` = unbounded.
    pub max_size: (i32, i32),
    /// Lifecycle gate.
    pub running: bool,
}

/// A plain in-memory [`ResourceDirectory`].
#[derive(Debug, Default)]
pub struct ResourceMap {
    channels: HashMap<ChannelId, ChannelEntry>,
}

impl ResourceMap {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a channel entry.
    pub fn insert(&mut self, channel: ChannelId, entry: ChannelEntry) {
        self.channels.insert(channel, entry);
    }

    /// Registers a running channel with the given pipe and size, unbounded
    /// tiling. Convenience for tests and simple setups.
    pub fn insert_running(&mut self, channel: ChannelId, pipe: PipeId, width: i32, height: i32) {
        self.insert(
            channel,
            ChannelEntry {
                pipe,
                pixel_viewport: PixelViewport::new(0, 0, width, height),
                max_size: (0, 0),
                running: true,
            },
        );
    }

    /// Flips a channel's lifecycle gate.
    pub fn set_running(&mut self, channel: ChannelId, running: bool) {
        if let Some(entry) = self.channels.get_mut(&channel) {
            entry.running = running;
        } else {
            log::warn!("set_running for unknown channel {channel:?}");
        }
    }

    /// Updates a channel's drawable size.
    pub fn set_pixel_viewport(&mut self, channel: ChannelId, pvp: PixelViewport) {
        if let Some(entry) = self.channels.get_mut(&channel) {
            entry.pixel_viewport = pvp;
        }
    }
}

impl ResourceDirectory for ResourceMap {
    fn is_running(&self, channel: ChannelId) -> bool {
        self.channels.get(&channel).map_or(false, |e| e.running)
    }

    fn pixel_viewport(&self, channel: ChannelId) -> PixelViewport {
        self.channels
            .get(&channel)
            .map_or_else(PixelViewport::default, |e| e.pixel_viewport)
    }

    fn max_size(&self, channel: ChannelId) -> (i32, i32) {
        self.channels.get(&channel).map_or((0, 0), |e| e.max_size)
    }

    fn pipe_of(&self, channel: ChannelId) -> PipeId {
        self.channels.get(&channel).map_or(PipeId(0), |e| e.pipe)
    }
}

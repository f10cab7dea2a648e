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

//! Output scaling for monitor views of a larger display.

use glint_compound::{CompoundId, CompoundTree};
use glint_core::error::ConfigError;
use glint_core::resource::ResourceDirectory;

use crate::equalizer::BalanceError;

/// Scales the output of each child to the resolution of the governing
/// compound's destination channel.
///
/// A monitor view mirrors a wall or cave at the native resolution of a
/// control station, which is usually much smaller. Instead of rendering at
/// full size and downsampling during assembly, this equalizer derives a
/// zoom factor per child so that every source renders directly at the pixel
/// size the monitor will display. Purely geometric, no load feedback.
#[derive(Debug)]
pub struct MonitorEqualizer {
    compound: CompoundId,
}

impl MonitorEqualizer {
    /// Attaches a new scaler to `compound`.
    pub fn attach(tree: &CompoundTree, compound: CompoundId) -> Result<Self, BalanceError> {
        if tree.children(compound).is_empty() {
            return Err(ConfigError::NothingToBalance.into());
        }
        Ok(Self { compound })
    }

    /// The governed compound.
    pub fn compound(&self) -> CompoundId {
        self.compound
    }

    /// Re-derives the output zoom of every child from the destination
    /// resolution.
    pub fn pre_update(
        &mut self,
        tree: &mut CompoundTree,
        resources: &dyn ResourceDirectory,
    ) -> Result<(), BalanceError> {
        let Some(destination) = tree.channel_of(self.compound) else {
            return Ok(());
        };
        if !resources.is_running(destination) {
            return Ok(());
        }
        let destination_pvp = resources.pixel_viewport(destination);
        if !destination_pvp.has_area() {
            return Ok(());
        }

        for child in tree.children(self.compound).to_vec() {
            let Some(source) = tree.channel_of(child) else {
                continue;
            };
            let source_pvp = resources.pixel_viewport(source);
            if !source_pvp.has_area() {
                continue;
            }

            // the child's viewport places it on the monitor; its channel
            // renders the full source, so the pixel-rounded region sizes
            // determine the zoom
            let viewport = tree.data(child).viewport;
            let mut shown = destination_pvp;
            shown.apply_viewport(&viewport);

            let mut zoom = shown.zoom_for(&source_pvp);
            zoom.validate();
            log::trace!("monitor zoom for {child:?}: {zoom:?}");
            tree.data_mut(child).zoom = zoom;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glint_compound::CompoundData;
    use glint_core::math::Viewport;
    use glint_core::resource::{ChannelId, PipeId, ResourceMap};

    #[test]
    fn children_render_at_the_monitor_resolution() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData {
            channel: Some(ChannelId(0)),
            ..Default::default()
        });
        let left = tree.add_child(
            root,
            CompoundData {
                channel: Some(ChannelId(1)),
                viewport: Viewport::new(0.0, 0.0, 0.5, 1.0),
                ..Default::default()
            },
        );
        let right = tree.add_child(
            root,
            CompoundData {
                channel: Some(ChannelId(2)),
                viewport: Viewport::new(0.5, 0.0, 0.5, 1.0),
                ..Default::default()
            },
        );

        // the monitor is a quarter of the wall segments in each dimension
        let mut resources = ResourceMap::new();
        resources.insert_running(ChannelId(0), PipeId(0), 480, 270);
        resources.insert_running(ChannelId(1), PipeId(1), 960, 1080);
        resources.insert_running(ChannelId(2), PipeId(2), 960, 1080);

        let mut eq = MonitorEqualizer::attach(&tree, root).unwrap();
        eq.pre_update(&mut tree, &resources).unwrap();

        for child in [left, right] {
            let zoom = tree.data(child).zoom;
            assert_relative_eq!(zoom.x, 0.25, epsilon = 1e-6);
            assert_relative_eq!(zoom.y, 0.25, epsilon = 1e-6);
        }
    }

    #[test]
    fn a_stopped_destination_keeps_the_declared_zoom() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData {
            channel: Some(ChannelId(0)),
            ..Default::default()
        });
        let child = tree.add_child(
            root,
            CompoundData {
                channel: Some(ChannelId(1)),
                ..Default::default()
            },
        );

        let mut resources = ResourceMap::new();
        resources.insert_running(ChannelId(0), PipeId(0), 480, 270);
        resources.set_running(ChannelId(0), false);
        resources.insert_running(ChannelId(1), PipeId(1), 1024, 1024);

        let mut eq = MonitorEqualizer::attach(&tree, root).unwrap();
        eq.pre_update(&mut tree, &resources).unwrap();
        assert_eq!(tree.data(child).zoom, glint_core::math::Zoom::NONE);
    }
}

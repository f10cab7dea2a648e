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

//! The closed set of balancing strategies and their shared configuration.

use glint_compound::{CompoundId, CompoundTree};
use glint_core::error::ConfigError;
use glint_core::resource::ResourceDirectory;
use glint_core::telemetry::LoadReport;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::framerate::FramerateEqualizer;
use crate::load::LoadEqualizer;
use crate::monitor::MonitorEqualizer;
use crate::tree::TreeEqualizer;
use crate::view::ViewEqualizer;

/// Errors raised while attaching or running a balancer.
#[derive(Debug, Error)]
pub enum BalanceError {
    /// The compound layout cannot support the requested strategy.
    #[error("invalid balancer configuration: {0}")]
    Config(#[from] ConfigError),
    /// Damping outside `[0, 1]` would amplify oscillation instead of
    /// suppressing it.
    #[error("damping must be within [0, 1], got {0}")]
    InvalidDamping(f32),
}

/// How a split-based balancer partitions work among children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Partition the database range, screen space untouched.
    Db,
    /// Stack horizontal screen-space bands.
    Horizontal,
    /// Stack vertical screen-space bands.
    Vertical,
    /// Alternate split axes level by level, tiling the screen.
    #[default]
    TwoD,
}

/// Tuning knobs shared by [`LoadEqualizer`] and [`TreeEqualizer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerConfig {
    /// Split axis selection.
    pub mode: SplitMode,
    /// Fraction of the previous split retained each frame, `0` jumps straight
    /// to the measured optimum, `1` never moves.
    pub damping: f32,
    /// Screen-space split granularity in pixels per axis.
    pub boundary: (i32, i32),
    /// Database range granularity.
    pub boundary_fraction: f32,
    /// Minimum per-axis pixel delta below which a new split is discarded.
    pub resistance: (i32, i32),
    /// Minimum range delta below which a new split is discarded.
    pub resistance_fraction: f32,
    /// When the remaining resources reach this limit, the destination channel
    /// stops rendering and only assembles.
    pub assemble_only_limit: f32,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            mode: SplitMode::TwoD,
            damping: 0.5,
            boundary: (1, 1),
            boundary_fraction: f32::EPSILON,
            resistance: (0, 0),
            resistance_fraction: 0.0,
            assemble_only_limit: f32::MAX,
        }
    }
}

impl EqualizerConfig {
    pub(crate) fn validate(&self) -> Result<(), BalanceError> {
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(BalanceError::InvalidDamping(self.damping));
        }
        Ok(())
    }
}

/// A balancing strategy attached to one compound.
///
/// The set is closed: each variant rewrites a different declared attribute of
/// the governed compound's children (viewports and ranges, resource usages,
/// frame-rate caps, or zooms), and the [`FrameScheduler`] drives them all
/// through the same three notifications.
///
/// [`FrameScheduler`]: crate::scheduler::FrameScheduler
#[derive(Debug)]
pub enum Equalizer {
    /// Cross-usage split balancing from a spatial load profile.
    Load(LoadEqualizer),
    /// Per-level split balancing from aggregate subtree times.
    Tree(TreeEqualizer),
    /// Time multiplexing of resources across destination views.
    View(ViewEqualizer),
    /// Frame-rate smoothing for swap-locked displays.
    Framerate(FramerateEqualizer),
    /// Destination-driven pure scaling, no load feedback.
    Monitor(MonitorEqualizer),
}

impl Equalizer {
    /// The compound this balancer governs.
    pub fn compound(&self) -> CompoundId {
        match self {
            Equalizer::Load(eq) => eq.compound(),
            Equalizer::Tree(eq) => eq.compound(),
            Equalizer::View(eq) => eq.compound(),
            Equalizer::Framerate(eq) => eq.compound(),
            Equalizer::Monitor(eq) => eq.compound(),
        }
    }

    /// Rewrites the governed children's declared attributes for `frame`.
    ///
    /// Runs after task ids were assigned for the governed compound but before
    /// the inheritance pass descends into it, so the rewritten attributes
    /// take effect in the same frame.
    pub fn pre_update(
        &mut self,
        tree: &mut CompoundTree,
        frame: u32,
        resources: &dyn ResourceDirectory,
    ) -> Result<(), BalanceError> {
        match self {
            Equalizer::Load(eq) => eq.pre_update(tree, frame, resources),
            Equalizer::Tree(eq) => eq.pre_update(tree, frame, resources),
            Equalizer::View(eq) => eq.pre_update(tree, frame, resources),
            Equalizer::Framerate(eq) => eq.pre_update(tree, frame, resources),
            Equalizer::Monitor(eq) => eq.pre_update(tree, resources),
        }
    }

    /// Feeds one channel's timing statistics back into the strategy.
    pub fn handle_report(&mut self, report: &LoadReport) {
        match self {
            Equalizer::Load(eq) => eq.handle_report(report),
            Equalizer::Tree(eq) => eq.handle_report(report),
            Equalizer::View(eq) => eq.handle_report(report),
            Equalizer::Framerate(eq) => eq.handle_report(report),
            Equalizer::Monitor(_) => {}
        }
    }

    /// Drops state derived from the compound topology after a child was
    /// added or removed under the governed compound.
    pub fn notify_topology_changed(&mut self) {
        match self {
            Equalizer::Load(eq) => eq.invalidate(),
            Equalizer::Tree(eq) => eq.invalidate(),
            Equalizer::View(eq) => eq.invalidate(),
            Equalizer::Framerate(eq) => eq.invalidate(),
            Equalizer::Monitor(_) => {}
        }
    }
}

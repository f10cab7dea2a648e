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

//! Declared and inherited attribute records of a compound.

use glint_core::math::{Pixel, PixelViewport, Range, SubPixel, Viewport, Zoom};
use glint_core::resource::ChannelId;
use glint_core::task::{EyeFlags, TaskFlags, NUM_EYES};
use serde::{Deserialize, Serialize};

/// Flags selecting which framebuffers a compound transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferFlags {
    bits: u32,
}

impl BufferFlags {
    /// No declaration; inherit or default.
    pub const UNDEFINED: Self = Self { bits: 0 };
    /// The color buffer.
    pub const COLOR: Self = Self { bits: 1 << 0 };
    /// The depth buffer.
    pub const DEPTH: Self = Self { bits: 1 << 1 };

    /// Combines two sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Checks if these flags contain all of `other`.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Checks if no buffer is declared.
    pub const fn is_undefined(&self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// A per-component framebuffer write mask for anaglyphic stereo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorMask {
    bits: u32,
}

impl ColorMask {
    /// Nothing writable.
    pub const NONE: Self = Self { bits: 0 };
    /// Red channel.
    pub const RED: Self = Self { bits: 1 << 0 };
    /// Green channel.
    pub const GREEN: Self = Self { bits: 1 << 1 };
    /// Blue channel.
    pub const BLUE: Self = Self { bits: 1 << 2 };
    /// Everything writable.
    pub const ALL: Self = Self {
        bits: Self::RED.bits | Self::GREEN.bits | Self::BLUE.bits,
    };

    /// Combines two masks.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }
}

impl std::ops::BitOr for ColorMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// How stereo eye passes reach the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StereoMode {
    /// Decide from the inherited eye set at update time.
    Auto,
    /// One eye per destination, no in-channel separation.
    Passive,
    /// Quad-buffered stereo.
    Quad,
    /// Anaglyphic stereo via color masks.
    Anaglyph,
}

/// The declared (authored) attributes of one compound.
///
/// Every field is an override: unset fields (`None`, `UNDEFINED`, `DEFAULT`)
/// inherit from the parent, or from [`CompoundDefaults`] at the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundData {
    /// The bound render channel; `None` for pass-through nodes.
    pub channel: Option<ChannelId>,
    /// Fraction of the parent's viewport this compound covers.
    pub viewport: Viewport,
    /// Fraction of the parent's database range this compound covers.
    pub range: Range,
    /// Pixel decomposition within the inherited viewport.
    pub pixel: Pixel,
    /// Subpixel (sample) decomposition.
    pub subpixel: SubPixel,
    /// Output zoom factor.
    pub zoom: Zoom,
    /// Stereo eyes this compound renders; `UNDEFINED` inherits.
    pub eyes: EyeFlags,
    /// Declared task set; `DEFAULT` derives from the tree position.
    pub tasks: TaskFlags,
    /// Time-multiplex period in frames; `None` inherits.
    pub period: Option<u32>,
    /// Time-multiplex phase; `None` inherits.
    pub phase: Option<u32>,
    /// Framerate cap written by a framerate balancer; `f32::MAX` = uncapped.
    pub max_fps: f32,
    /// Fractional share (0..=1) of the bound resource this compound may use.
    /// The main lever balancers manipulate besides viewport and range.
    pub usage: f32,
    /// Framebuffers to transport; `UNDEFINED` inherits.
    pub buffers: BufferFlags,
    /// Per-eye activation counters for destination compounds. A destination
    /// eye runs only while its counter is above zero.
    pub active: [u32; NUM_EYES],
    /// Stereo presentation mode; `None` inherits.
    pub stereo_mode: Option<StereoMode>,
    /// Anaglyph write mask of the left eye; `None` inherits.
    pub anaglyph_left_mask: Option<ColorMask>,
    /// Anaglyph write mask of the right eye; `None` inherits.
    pub anaglyph_right_mask: Option<ColorMask>,
}

impl Default for CompoundData {
    fn default() -> Self {
        Self {
            channel: None,
            viewport: Viewport::FULL,
            range: Range::ALL,
            pixel: Pixel::ALL,
            subpixel: SubPixel::ALL,
            zoom: Zoom::NONE,
            eyes: EyeFlags::UNDEFINED,
            tasks: TaskFlags::DEFAULT,
            period: None,
            phase: None,
            max_fps: f32::MAX,
            usage: 1.0,
            buffers: BufferFlags::UNDEFINED,
            active: [1; NUM_EYES],
            stereo_mode: None,
            anaglyph_left_mask: None,
            anaglyph_right_mask: None,
        }
    }
}

/// The effective attributes of one compound for the current frame.
///
/// Recomputed from scratch by every update pass; never persisted
/// semantically across frames and never written by external callers.
#[derive(Debug, Clone)]
pub struct CompoundInherit {
    /// The nearest bound channel at or above this compound.
    pub channel: Option<ChannelId>,
    /// Absolute normalized viewport.
    pub viewport: Viewport,
    /// Absolute database range.
    pub range: Range,
    /// Composed pixel decomposition.
    pub pixel: Pixel,
    /// Composed subpixel decomposition.
    pub subpixel: SubPixel,
    /// Composed output zoom, pixel-rounding corrected.
    pub zoom: Zoom,
    /// Concrete pixel viewport on the bound channel.
    pub pvp: PixelViewport,
    /// Effective eye set.
    pub eyes: EyeFlags,
    /// Effective task set (after dead-work elimination).
    pub tasks: TaskFlags,
    /// Effective multiplex period.
    pub period: u32,
    /// Effective multiplex phase.
    pub phase: u32,
    /// Effective framerate cap.
    pub max_fps: f32,
    /// Effective framebuffer set.
    pub buffers: BufferFlags,
    /// Per-eye activation computed by the update pass.
    pub active: [bool; NUM_EYES],
    /// Resolved stereo mode (never `Auto` after the update pass ran on a
    /// channel-bound compound).
    pub stereo_mode: StereoMode,
    /// Resolved left-eye anaglyph mask.
    pub anaglyph_left_mask: ColorMask,
    /// Resolved right-eye anaglyph mask.
    pub anaglyph_right_mask: ColorMask,
}

impl Default for CompoundInherit {
    fn default() -> Self {
        Self {
            channel: None,
            viewport: Viewport::FULL,
            range: Range::ALL,
            pixel: Pixel::ALL,
            subpixel: SubPixel::ALL,
            zoom: Zoom::NONE,
            pvp: PixelViewport::default(),
            eyes: EyeFlags::UNDEFINED,
            tasks: TaskFlags::NONE,
            period: 1,
            phase: 0,
            max_fps: f32::MAX,
            buffers: BufferFlags::UNDEFINED,
            active: [false; NUM_EYES],
            stereo_mode: StereoMode::Auto,
            anaglyph_left_mask: ColorMask::RED,
            anaglyph_right_mask: ColorMask::GREEN.union(ColorMask::BLUE),
        }
    }
}

/// Root-level fallbacks for attributes no compound declares.
///
/// Passed explicitly into the update pass; there is no implicit global
/// defaults object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundDefaults {
    /// Eyes rendered when none are declared anywhere.
    pub eyes: EyeFlags,
    /// Multiplex period fallback.
    pub period: u32,
    /// Multiplex phase fallback.
    pub phase: u32,
    /// Framebuffer fallback.
    pub buffers: BufferFlags,
    /// Stereo mode fallback.
    pub stereo_mode: StereoMode,
    /// Left-eye anaglyph mask fallback.
    pub anaglyph_left_mask: ColorMask,
    /// Right-eye anaglyph mask fallback.
    pub anaglyph_right_mask: ColorMask,
}

impl Default for CompoundDefaults {
    fn default() -> Self {
        Self {
            eyes: EyeFlags::ALL,
            period: 1,
            phase: 0,
            buffers: BufferFlags::COLOR,
            stereo_mode: StereoMode::Auto,
            anaglyph_left_mask: ColorMask::RED,
            anaglyph_right_mask: ColorMask::GREEN.union(ColorMask::BLUE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_attributes_start_undeclared() {
        let data = CompoundData::default();
        assert!(data.channel.is_none());
        assert_eq!(data.tasks, TaskFlags::DEFAULT);
        assert!(data.eyes.is_undefined());
        assert!(data.buffers.is_undefined());
        assert!(data.period.is_none());
        assert_eq!(data.usage, 1.0);
    }

    #[test]
    fn defaults_match_documented_fallbacks() {
        let defaults = CompoundDefaults::default();
        assert_eq!(defaults.eyes, EyeFlags::ALL);
        assert_eq!(defaults.period, 1);
        assert_eq!(defaults.phase, 0);
        assert_eq!(defaults.buffers, BufferFlags::COLOR);
        assert_eq!(
            defaults.anaglyph_right_mask,
            ColorMask::GREEN | ColorMask::BLUE
        );
    }
}

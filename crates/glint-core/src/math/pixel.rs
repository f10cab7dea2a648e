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

//! Pixel-exact viewports and the pixel, subpixel and zoom decompositions.

use super::Viewport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 2D viewport in integer device pixels.
///
/// A freshly constructed pixel viewport is invalid (`w == h == -1`); it
/// becomes valid once a channel reports its drawable size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelViewport {
    /// Left edge in pixels.
    pub x: i32,
    /// Bottom edge in pixels.
    pub y: i32,
    /// Width in pixels, `-1` when invalid.
    pub w: i32,
    /// Height in pixels, `-1` when invalid.
    pub h: i32,
}

impl PixelViewport {
    /// Creates a new pixel viewport.
    #[inline]
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Returns `true` if the size is non-negative (possibly empty).
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.w >= 0 && self.h >= 0
    }

    /// Returns `true` if the viewport covers at least one pixel.
    #[inline]
    pub fn has_area(&self) -> bool {
        self.w > 0 && self.h > 0
    }

    /// The covered area in pixels.
    #[inline]
    pub fn area(&self) -> u32 {
        if self.has_area() {
            (self.w * self.h) as u32
        } else {
            0
        }
    }

    /// The X end position in pixels.
    #[inline]
    pub fn x_end(&self) -> i32 {
        self.x + self.w
    }

    /// The Y end position in pixels.
    #[inline]
    pub fn y_end(&self) -> i32 {
        self.y + self.h
    }

    /// Applies a fractional viewport to this pixel viewport.
    ///
    /// End positions are computed before start positions so that adjacent
    /// fractional tiles truncate to adjacent pixel tiles without seams.
    pub fn apply_viewport(&mut self, vp: &Viewport) {
        // honor position over size to avoid rounding artifacts
        let x_end = self.x + ((vp.x + vp.w) * self.w as f32) as i32;
        let y_end = self.y + ((vp.y + vp.h) * self.h as f32) as i32;

        self.x += (self.w as f32 * vp.x) as i32;
        self.y += (self.h as f32 * vp.y) as i32;
        self.w = x_end - self.x;
        self.h = y_end - self.y;
    }

    /// Applies a pixel decomposition, shrinking the size to the per-step
    /// share and rounding up when the decomposition does not divide evenly.
    pub fn apply_pixel(&mut self, pixel: &Pixel) {
        if pixel.w > 1 {
            let mut new_width = self.w / pixel.w as i32;
            if self.w - new_width * pixel.w as i32 != 0 {
                new_width += 1;
            }
            self.w = new_width;
        }
        if pixel.h > 1 {
            let mut new_height = self.h / pixel.h as i32;
            if self.h - new_height * pixel.h as i32 != 0 {
                new_height += 1;
            }
            self.h = new_height;
        }
    }

    /// Applies a zoom factor, rounding to the nearest pixel.
    pub fn apply_zoom(&mut self, zoom: &Zoom) {
        if *zoom == Zoom::NONE {
            return;
        }
        self.w = (self.w as f32 * zoom.x + 0.5) as i32;
        self.h = (self.h as f32 * zoom.y + 0.5) as i32;
    }

    /// Returns the fractional viewport which, applied to `parent`, yields
    /// this pixel viewport.
    pub fn sub_viewport(&self, parent: &PixelViewport) -> Viewport {
        if self == parent {
            return Viewport::FULL;
        }
        if !parent.has_area() {
            return Viewport::new(self.x as f32, self.y as f32, 0.0, 0.0);
        }
        Viewport::new(
            (self.x - parent.x) as f32 / parent.w as f32,
            (self.y - parent.y) as f32 / parent.h as f32,
            self.w as f32 / parent.w as f32,
            self.h as f32 / parent.h as f32,
        )
    }

    /// Returns the zoom which, applied to `unzoomed`, yields this pixel
    /// viewport. Keeps the inherited zoom pixel-accurate after the integer
    /// rounding performed by [`PixelViewport::apply_zoom`].
    pub fn zoom_for(&self, unzoomed: &PixelViewport) -> Zoom {
        if self == unzoomed {
            return Zoom::NONE;
        }
        if !unzoomed.has_area() {
            return Zoom::new(f32::MAX, f32::MAX);
        }
        Zoom::new(
            self.w as f32 / unzoomed.w as f32,
            self.h as f32 / unzoomed.h as f32,
        )
    }
}

impl Default for PixelViewport {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: -1,
            h: -1,
        }
    }
}

impl fmt::Display for PixelViewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {}]", self.x, self.y, self.w, self.h)
    }
}

/// A pixel decomposition: render every `w`-th column starting at `x` and
/// every `h`-th row starting at `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pixel {
    /// Column offset.
    pub x: u32,
    /// Row offset.
    pub y: u32,
    /// Column step.
    pub w: u32,
    /// Row step.
    pub h: u32,
}

impl Pixel {
    /// The identity decomposition.
    pub const ALL: Self = Self {
        x: 0,
        y: 0,
        w: 1,
        h: 1,
    };

    /// Returns `true` if offsets are within the step sizes.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.w > 0 && self.h > 0 && self.x < self.w && self.y < self.h
    }

    /// Clamps an out-of-bounds decomposition back to the identity.
    pub fn validate(&mut self) {
        if !self.is_valid() {
            *self = Self::ALL;
        }
    }

    /// Composes a nested decomposition onto this one.
    pub fn apply(&mut self, other: &Pixel) {
        if !other.is_valid() {
            return;
        }
        self.x = self.x * other.w + other.x;
        self.w *= other.w;
        self.y = self.y * other.h + other.y;
        self.h *= other.h;
    }
}

impl Default for Pixel {
    fn default() -> Self {
        Self::ALL
    }
}

/// A subpixel decomposition for anti-aliasing or depth-of-field sampling:
/// this task renders sample `index` of `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubPixel {
    /// Sample index.
    pub index: u32,
    /// Total number of samples.
    pub size: u32,
}

impl SubPixel {
    /// The identity decomposition.
    pub const ALL: Self = Self { index: 0, size: 1 };

    /// Returns `true` if the index addresses an existing sample.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.size > 0 && self.index < self.size
    }

    /// Clamps an out-of-bounds decomposition back to the identity.
    pub fn validate(&mut self) {
        if !self.is_valid() {
            *self = Self::ALL;
        }
    }

    /// Composes a nested decomposition onto this one.
    pub fn apply(&mut self, other: &SubPixel) {
        if !other.is_valid() {
            return;
        }
        self.index = self.index * other.size + other.index;
        self.size *= other.size;
    }
}

impl Default for SubPixel {
    fn default() -> Self {
        Self::ALL
    }
}

/// An output scaling factor applied after rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zoom {
    /// Horizontal scale.
    pub x: f32,
    /// Vertical scale.
    pub y: f32,
}

impl Zoom {
    /// The identity zoom.
    pub const NONE: Self = Self { x: 1.0, y: 1.0 };

    /// Creates a new zoom factor.
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Returns `true` for a usable, strictly positive scale.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x > 0.0 && self.y > 0.0
    }

    /// Clamps a degenerate zoom back to the identity.
    pub fn validate(&mut self) {
        if !self.is_valid() {
            *self = Self::NONE;
        }
    }

    /// Composes another zoom onto this one.
    pub fn apply(&mut self, other: &Zoom) {
        self.x *= other.x;
        self.y *= other.y;
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn fractional_tiles_stay_seamless() {
        let parent = PixelViewport::new(0, 0, 1000, 800);

        let mut left = parent;
        left.apply_viewport(&Viewport::new(0.0, 0.0, 0.375, 1.0));
        let mut right = parent;
        right.apply_viewport(&Viewport::new(0.375, 0.0, 0.625, 1.0));

        assert_eq!(left.x_end(), right.x);
        assert_eq!(right.x_end(), parent.x_end());
        assert_eq!(left.h, 800);
    }

    #[test]
    fn sub_viewport_round_trips() {
        let parent = PixelViewport::new(0, 0, 640, 480);
        let mut child = parent;
        let vp = Viewport::new(0.25, 0.5, 0.5, 0.5);
        child.apply_viewport(&vp);

        let recovered = child.sub_viewport(&parent);
        assert_abs_diff_eq!(recovered.x, vp.x, epsilon = 1e-3);
        assert_abs_diff_eq!(recovered.w, vp.w, epsilon = 1e-3);
    }

    #[test]
    fn pixel_decomposition_rounds_up() {
        let mut pvp = PixelViewport::new(0, 0, 11, 7);
        pvp.apply_pixel(&Pixel {
            x: 0,
            y: 0,
            w: 2,
            h: 2,
        });
        assert_eq!(pvp.w, 6);
        assert_eq!(pvp.h, 4);
    }

    #[test]
    fn zoom_derivation_matches_rounding() {
        let unzoomed = PixelViewport::new(0, 0, 333, 333);
        let mut zoomed = unzoomed;
        zoomed.apply_zoom(&Zoom::new(0.5, 0.5));

        let corrected = zoomed.zoom_for(&unzoomed);
        assert_abs_diff_eq!(corrected.x, zoomed.w as f32 / 333.0);
        assert_eq!(zoomed.w, 167); // rounded, not truncated
    }

    #[test]
    fn invalid_decompositions_validate_to_identity() {
        let mut pixel = Pixel {
            x: 3,
            y: 0,
            w: 2,
            h: 1,
        };
        pixel.validate();
        assert_eq!(pixel, Pixel::ALL);

        let mut sub = SubPixel { index: 4, size: 2 };
        sub.validate();
        assert_eq!(sub, SubPixel::ALL);

        let mut zoom = Zoom::new(-1.0, 0.0);
        zoom.validate();
        assert_eq!(zoom, Zoom::NONE);
    }
}

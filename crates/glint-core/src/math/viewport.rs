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

//! The normalized 2D viewport used for sort-first (spatial) decomposition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A rectangle in normalized `[0, 1]` device coordinates.
///
/// Viewports compose multiplicatively: a child viewport is interpreted
/// *within* its parent's viewport via [`Viewport::apply`], which is what lets
/// a balancer rewrite splits at any tree depth without knowing the absolute
/// screen position of the subtree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Left edge.
    pub x: f32,
    /// Bottom edge.
    pub y: f32,
    /// Width, `>= 0`.
    pub w: f32,
    /// Height, `>= 0`.
    pub h: f32,
}

impl Viewport {
    /// The whole unit square.
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    /// Creates a new viewport.
    #[inline]
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Returns `true` if width and height are non-negative.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.w >= 0.0 && self.h >= 0.0
    }

    /// Returns `true` if the viewport covers a non-zero area.
    #[inline]
    pub fn has_area(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// The covered area.
    #[inline]
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// The right edge.
    #[inline]
    pub fn x_end(&self) -> f32 {
        self.x + self.w
    }

    /// The top edge.
    #[inline]
    pub fn y_end(&self) -> f32 {
        self.y + self.h
    }

    /// Maps `other` into this viewport, leaving the result in `self`.
    ///
    /// `other` is interpreted as a sub-rectangle of `self`, so applying
    /// `FULL` is the identity and applying the left half of the unit square
    /// yields the left half of `self`.
    pub fn apply(&mut self, other: &Viewport) {
        self.x += other.x * self.w;
        self.y += other.y * self.h;
        self.w *= other.w;
        self.h *= other.h;
    }

    /// Shrinks this viewport to the intersection with `other`.
    pub fn intersect(&mut self, other: &Viewport) {
        let x_end = self.x_end().min(other.x_end());
        let y_end = self.y_end().min(other.y_end());
        self.x = self.x.max(other.x);
        self.y = self.y.max(other.y);
        self.w = (x_end - self.x).max(0.0);
        self.h = (y_end - self.y).max(0.0);
    }

    /// Fraction of this viewport's area covered by `other`.
    ///
    /// Returns `0` when this viewport has no area.
    pub fn coverage(&self, other: &Viewport) -> f32 {
        if !self.has_area() {
            return 0.0;
        }
        let mut overlap = *self;
        overlap.intersect(other);
        overlap.area() / self.area()
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {}]", self.x, self.y, self.w, self.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn apply_is_multiplicative() {
        // The left half of the top half is the top-left quadrant.
        let mut vp = Viewport::new(0.0, 0.5, 1.0, 0.5);
        vp.apply(&Viewport::new(0.0, 0.0, 0.5, 1.0));

        assert_abs_diff_eq!(vp.x, 0.0);
        assert_abs_diff_eq!(vp.y, 0.5);
        assert_abs_diff_eq!(vp.w, 0.5);
        assert_abs_diff_eq!(vp.h, 0.5);
    }

    #[test]
    fn apply_full_is_identity() {
        let mut vp = Viewport::new(0.25, 0.25, 0.5, 0.5);
        vp.apply(&Viewport::FULL);
        assert_eq!(vp, Viewport::new(0.25, 0.25, 0.5, 0.5));
    }

    #[test]
    fn intersection_clamps_to_overlap() {
        let mut vp = Viewport::new(0.0, 0.0, 0.6, 0.6);
        vp.intersect(&Viewport::new(0.4, 0.4, 0.6, 0.6));

        assert_abs_diff_eq!(vp.x, 0.4);
        assert_abs_diff_eq!(vp.y, 0.4);
        assert_abs_diff_eq!(vp.w, 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(vp.h, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn disjoint_intersection_has_no_area() {
        let mut vp = Viewport::new(0.0, 0.0, 0.3, 0.3);
        vp.intersect(&Viewport::new(0.5, 0.5, 0.3, 0.3));
        assert!(!vp.has_area());
        assert!(vp.is_valid());
    }

    #[test]
    fn coverage_fraction() {
        let vp = Viewport::new(0.0, 0.0, 0.5, 1.0);
        // The right half of the unit square overlaps nothing of the left half.
        assert_abs_diff_eq!(vp.coverage(&Viewport::new(0.5, 0.0, 0.5, 1.0)), 0.0);
        // The full square covers all of it.
        assert_abs_diff_eq!(vp.coverage(&Viewport::FULL), 1.0);
        // The left quarter covers half of it.
        assert_abs_diff_eq!(vp.coverage(&Viewport::new(0.0, 0.0, 0.25, 1.0)), 0.5);
    }
}

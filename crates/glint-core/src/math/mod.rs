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

//! Decomposition primitives for spatial and sort-last work partitioning.
//!
//! All fractional types operate in normalized `[0, 1]` space; pixel-exact
//! positioning is expressed through [`PixelViewport`]. Composition is always
//! multiplicative: applying a child viewport to a parent viewport yields the
//! child's extent *within* the parent, never in absolute coordinates.

pub mod pixel;
pub mod range;
pub mod viewport;

pub use self::pixel::{Pixel, PixelViewport, SubPixel, Zoom};
pub use self::range::Range;
pub use self::viewport::Viewport;

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

//! The normalized 1D interval used for sort-last (DB) decomposition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A fraction of a sort-last database decomposition, `0 <= start <= end <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Start of the interval.
    pub start: f32,
    /// End of the interval.
    pub end: f32,
}

impl Range {
    /// The whole database.
    pub const ALL: Self = Self {
        start: 0.0,
        end: 1.0,
    };

    /// Creates a new range.
    #[inline]
    pub const fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    /// Returns `true` if start does not exceed end.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    /// Returns `true` if the interval is non-empty.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.end > self.start
    }

    /// The covered fraction.
    #[inline]
    pub fn size(&self) -> f32 {
        self.end - self.start
    }

    /// Maps `other` into this range, analogous to [`super::Viewport::apply`].
    pub fn apply(&mut self, other: &Range) {
        let size = self.end - self.start;
        self.end = self.start + other.end * size;
        self.start += other.start * size;
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn apply_nests_intervals() {
        // The second half of the first half is [0.25, 0.5].
        let mut range = Range::new(0.0, 0.5);
        range.apply(&Range::new(0.5, 1.0));

        assert_abs_diff_eq!(range.start, 0.25);
        assert_abs_diff_eq!(range.end, 0.5);
    }

    #[test]
    fn apply_all_is_identity() {
        let mut range = Range::new(0.2, 0.7);
        range.apply(&Range::ALL);
        assert_eq!(range, Range::new(0.2, 0.7));
    }

    #[test]
    fn empty_range_has_no_data() {
        assert!(!Range::new(0.4, 0.4).has_data());
        assert!(Range::new(0.4, 0.4).is_valid());
        assert!(Range::ALL.has_data());
    }
}

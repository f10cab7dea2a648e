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

//! Flag types for render tasks and stereo eye passes.

use serde::{Deserialize, Serialize};

/// Flags describing which render tasks a compound executes.
///
/// Multiple tasks can be combined using bitwise operations. The sentinel
/// [`TaskFlags::DEFAULT`] means "not declared": the update pass replaces it
/// with [`TaskFlags::ALL`] on leaves and assemble/readback on interior nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskFlags {
    bits: u32,
}

impl TaskFlags {
    /// No tasks; the compound is skipped by the dispatch layer.
    pub const NONE: Self = Self { bits: 0 };
    /// Clear the framebuffer.
    pub const CLEAR: Self = Self { bits: 1 << 0 };
    /// Cull against the view frustum.
    pub const CULL: Self = Self { bits: 1 << 1 };
    /// Draw the scene.
    pub const DRAW: Self = Self { bits: 1 << 2 };
    /// Composite input frames.
    pub const ASSEMBLE: Self = Self { bits: 1 << 3 };
    /// Read back output frames.
    pub const READBACK: Self = Self { bits: 1 << 4 };
    /// Update the destination view.
    pub const VIEW: Self = Self { bits: 1 << 5 };
    /// All concrete tasks.
    pub const ALL: Self = Self {
        bits: Self::CLEAR.bits
            | Self::CULL.bits
            | Self::DRAW.bits
            | Self::ASSEMBLE.bits
            | Self::READBACK.bits,
    };
    /// Sentinel: no explicit declaration, derive per tree position.
    pub const DEFAULT: Self = Self { bits: 1 << 31 };

    /// Creates a new set of task flags from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self { bits }
    }

    /// Returns the raw bits.
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Combines two sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Removes `other` from these flags.
    pub const fn difference(self, other: Self) -> Self {
        Self {
            bits: self.bits & !other.bits,
        }
    }

    /// Checks if these flags contain all of `other`.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Checks if these flags are empty (no tasks).
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for TaskFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for TaskFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// The stereo eye passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    /// Monoscopic rendering.
    Cyclop,
    /// Left eye pass.
    Left,
    /// Right eye pass.
    Right,
}

/// The number of distinct eye passes.
pub const NUM_EYES: usize = 3;

impl Eye {
    /// All eyes, in activation-array order.
    pub const ALL: [Eye; NUM_EYES] = [Eye::Cyclop, Eye::Left, Eye::Right];

    /// The activation-array index of this eye.
    pub const fn index(self) -> usize {
        match self {
            Eye::Cyclop => 0,
            Eye::Left => 1,
            Eye::Right => 2,
        }
    }
}

/// Flags describing which stereo eyes a compound renders.
///
/// [`EyeFlags::UNDEFINED`] means "not declared"; the update pass substitutes
/// [`EyeFlags::ALL`] at the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EyeFlags {
    bits: u32,
}

impl EyeFlags {
    /// No declaration; inherit or default.
    pub const UNDEFINED: Self = Self { bits: 0 };
    /// Monoscopic eye.
    pub const CYCLOP: Self = Self { bits: 1 << 0 };
    /// Left eye.
    pub const LEFT: Self = Self { bits: 1 << 1 };
    /// Right eye.
    pub const RIGHT: Self = Self { bits: 1 << 2 };
    /// Both stereo eyes.
    pub const STEREO: Self = Self {
        bits: Self::LEFT.bits | Self::RIGHT.bits,
    };
    /// All eyes.
    pub const ALL: Self = Self {
        bits: Self::CYCLOP.bits | Self::STEREO.bits,
    };

    /// Creates eye flags from a single eye.
    pub const fn from_eye(eye: Eye) -> Self {
        match eye {
            Eye::Cyclop => Self::CYCLOP,
            Eye::Left => Self::LEFT,
            Eye::Right => Self::RIGHT,
        }
    }

    /// Combines two sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Checks if these flags contain a specific eye.
    pub const fn contains(&self, eye: Eye) -> bool {
        let eye_bits = Self::from_eye(eye).bits;
        (self.bits & eye_bits) == eye_bits
    }

    /// Checks if these flags contain all of `other`.
    pub const fn contains_all(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Checks if no eye is declared.
    pub const fn is_undefined(&self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for EyeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for EyeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_flag_composition() {
        let tasks = TaskFlags::ASSEMBLE | TaskFlags::READBACK;
        assert!(tasks.contains(TaskFlags::ASSEMBLE));
        assert!(!tasks.contains(TaskFlags::DRAW));
        assert!(TaskFlags::ALL.contains(tasks));
        assert!(tasks.difference(tasks).is_empty());
    }

    #[test]
    fn default_is_not_a_concrete_task() {
        assert!(!TaskFlags::ALL.contains(TaskFlags::DEFAULT));
        assert!(!TaskFlags::DEFAULT.is_empty());
    }

    #[test]
    fn eye_flags_cover_all_eyes() {
        for eye in Eye::ALL {
            assert!(EyeFlags::ALL.contains(eye));
        }
        assert!(!EyeFlags::STEREO.contains(Eye::Cyclop));
        assert!(EyeFlags::UNDEFINED.is_undefined());
    }
}

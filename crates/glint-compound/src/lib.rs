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

//! # Glint Compound
//!
//! The compound task tree: a declarative tree of render tasks and the
//! per-frame inheritance pass that turns it into a concrete execution plan.
//!
//! Compounds live in an arena ([`CompoundTree`]) and are addressed by
//! [`CompoundId`]. Each node carries its *declared* attributes
//! ([`CompoundData`]) and, after [`update::update_pass`] ran for a frame, its
//! effective *inherited* attributes ([`CompoundInherit`]) plus a per-frame
//! `task_id` used to correlate late-arriving timing statistics.

#![warn(missing_docs)]

pub mod attributes;
pub mod observer;
pub mod tree;
pub mod update;

pub use attributes::{
    BufferFlags, ColorMask, CompoundData, CompoundDefaults, CompoundInherit, StereoMode,
};
pub use observer::{CompoundObserver, TopologyEvent};
pub use tree::{CompoundId, CompoundTree};
pub use update::{update_pass, update_pass_with, PreUpdateHook};

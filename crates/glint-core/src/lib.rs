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

//! # Glint Core
//!
//! Foundational crate for the glint cluster-rendering scheduler: the
//! normalized viewport and range primitives that express spatial and
//! sort-last decompositions, the flag types for tasks and stereo eyes, the
//! resource directory contract towards the rendering layer, and the pull-based
//! timing statistics feed that the per-frame scheduling pass drains.

#![warn(missing_docs)]

pub mod error;
pub mod math;
pub mod resource;
pub mod task;
pub mod telemetry;

pub use error::ConfigError;
pub use math::{PixelViewport, Range, Viewport, Zoom};
pub use resource::{ChannelId, PipeId, ResourceDirectory, ResourceMap};
pub use task::{EyeFlags, TaskFlags};
pub use telemetry::{Statistic, StatisticType, StatisticsFeed};

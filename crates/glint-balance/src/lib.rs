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

//! # Glint Balance
//!
//! Dynamic load balancing for the compound task tree.
//!
//! An [`Equalizer`] attaches to one compound and rewrites the declared
//! viewports, ranges, resource usages or frame-rate caps of that compound's
//! children once per frame, immediately before the inheritance pass computes
//! the children's effective attributes. Timing statistics reported by render
//! channels feed back into the equalizers through [`FrameScheduler`], which
//! owns the tree, drains the telemetry feed and drives the whole per-frame
//! cycle.

#![warn(missing_docs)]

pub mod equalizer;
pub mod framerate;
pub mod history;
pub mod load;
pub mod monitor;
pub mod scheduler;
pub mod tree;
pub mod view;

pub use equalizer::{BalanceError, Equalizer, EqualizerConfig, SplitMode};
pub use framerate::FramerateEqualizer;
pub use history::{LoadHistory, TaskSample};
pub use load::LoadEqualizer;
pub use monitor::MonitorEqualizer;
pub use scheduler::FrameScheduler;
pub use tree::TreeEqualizer;
pub use view::ViewEqualizer;

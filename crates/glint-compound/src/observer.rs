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

//! Topology-change notification.
//!
//! Tree mutations are recorded as [`TopologyEvent`]s and dispatched to
//! observers through an explicit drain step instead of callbacks firing in
//! the middle of a mutation. Balancers use this to invalidate cached split
//! trees when the children of their governed compound change.

use crate::tree::CompoundId;

/// One recorded tree mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    /// `child` was inserted under `parent`.
    ChildAdded {
        /// The parent compound.
        parent: CompoundId,
        /// The new child.
        child: CompoundId,
    },
    /// `child` was removed from under `parent`.
    ChildRemoved {
        /// The parent compound.
        parent: CompoundId,
        /// The removed child.
        child: CompoundId,
    },
}

/// Receives tree mutations when the owner drains the event log.
pub trait CompoundObserver {
    /// A child was inserted under `parent`.
    fn notify_child_added(&mut self, parent: CompoundId, child: CompoundId);

    /// A child was removed from under `parent`.
    fn notify_child_removed(&mut self, parent: CompoundId, child: CompoundId);
}

/// Dispatches a batch of events to one observer, in recording order.
pub fn dispatch(events: &[TopologyEvent], observer: &mut dyn CompoundObserver) {
    for event in events {
        match *event {
            TopologyEvent::ChildAdded { parent, child } => {
                observer.notify_child_added(parent, child)
            }
            TopologyEvent::ChildRemoved { parent, child } => {
                observer.notify_child_removed(parent, child)
            }
        }
    }
}

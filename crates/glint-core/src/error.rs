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

//! Structural configuration errors.
//!
//! Only topology mistakes surface as errors: data incompleteness and numeric
//! edge cases are absorbed by the per-frame algorithms, which self-correct as
//! soon as real data arrives.

use crate::resource::ChannelId;
use std::fmt;

/// A structural misconfiguration, detected at attach time or when a split
/// would be applied, never deep inside numeric code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// One physical channel appears in two branches of a governed subtree,
    /// which breaks the load-to-task correlation.
    AmbiguousChannel {
        /// The channel appearing more than once.
        channel: ChannelId,
    },
    /// A subtree mixes 2D viewport splitting with DB range splitting.
    MixedSplitAxes,
    /// A balancer was attached to a compound without children to govern.
    NothingToBalance,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AmbiguousChannel { channel } => {
                write!(
                    f,
                    "Channel {channel:?} is used in more than one branch of a balanced subtree"
                )
            }
            ConfigError::MixedSplitAxes => {
                write!(f, "Mixed 2D/DB load balancing within one subtree")
            }
            ConfigError::NothingToBalance => {
                write!(f, "Balancer attached to a compound without children")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::AmbiguousChannel {
            channel: ChannelId(3),
        };
        assert_eq!(
            format!("{err}"),
            "Channel ChannelId(3) is used in more than one branch of a balanced subtree"
        );
        assert_eq!(
            format!("{}", ConfigError::MixedSplitAxes),
            "Mixed 2D/DB load balancing within one subtree"
        );
    }
}

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

//! The pull-based statistics feed.
//!
//! Remote channels report timing asynchronously from network-receive context.
//! Instead of invoking balancer callbacks from that context, reports are
//! queued here and drained by the scheduler at the start of each frame, which
//! makes the per-frame computation deterministic and testable.

use super::statistic::LoadReport;

/// A thread-safe queue of [`LoadReport`]s.
#[derive(Debug)]
pub struct StatisticsFeed {
    sender: flume::Sender<LoadReport>,
    receiver: flume::Receiver<LoadReport>,
}

impl StatisticsFeed {
    /// Creates a new feed with an unbounded channel.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    /// Queues a report, logging an error if the receiver is disconnected.
    pub fn publish(&self, report: LoadReport) {
        log::trace!(
            "statistics for channel {:?} frame {}: {} samples",
            report.channel,
            report.frame,
            report.statistics.len()
        );
        if let Err(e) = self.sender.send(report) {
            log::error!("Failed to queue load report: {e}. Receiver likely disconnected.");
        }
    }

    /// Returns a clone of the sender end, for transport-layer producers.
    pub fn sender(&self) -> flume::Sender<LoadReport> {
        self.sender.clone()
    }

    /// Drains all queued reports, in arrival order.
    pub fn drain(&self) -> Vec<LoadReport> {
        self.receiver.try_iter().collect()
    }
}

impl Default for StatisticsFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ChannelId;
    use crate::telemetry::{Statistic, StatisticType};
    use std::thread;

    #[test]
    fn drain_preserves_arrival_order() {
        let feed = StatisticsFeed::new();
        for frame in 0..3 {
            feed.publish(LoadReport {
                channel: ChannelId(1),
                frame,
                statistics: vec![Statistic::new(StatisticType::Draw, 1, 0, 1000)],
            });
        }

        let reports = feed.drain();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].frame, 0);
        assert_eq!(reports[2].frame, 2);
        assert!(feed.drain().is_empty());
    }

    #[test]
    fn reports_cross_threads() {
        let feed = StatisticsFeed::new();
        let sender = feed.sender();

        let handle = thread::spawn(move || {
            sender
                .send(LoadReport {
                    channel: ChannelId(2),
                    frame: 41,
                    statistics: Vec::new(),
                })
                .unwrap();
        });
        handle.join().unwrap();

        let reports = feed.drain();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].channel, ChannelId(2));
    }
}

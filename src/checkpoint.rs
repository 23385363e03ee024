// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Broker-wide durability timestamps.
//!
//! The flush paths record the store timestamp their last full flush
//! covered; abnormal recovery uses the minimum across the physical log
//! and the derived files to pick a segment that is certainly older than
//! any lost write.

use std::sync::atomic::{AtomicI64, Ordering};

/// Slack subtracted from the minimum so recovery starts strictly before
/// the oldest possibly-incomplete flush.
const MIN_TIMESTAMP_BACKOFF_MILLIS: i64 = 1000 * 3;

#[derive(Default)]
pub struct StoreCheckpoint {
    /// Store timestamp covered by the last commit-log flush.
    physic_msg_timestamp: AtomicI64,
    /// Store timestamp covered by the last consume-queue flush.
    logics_msg_timestamp: AtomicI64,
    /// Store timestamp covered by the last index-file flush.
    index_msg_timestamp:  AtomicI64,
}

impl StoreCheckpoint {
    pub fn new() -> Self { Self::default() }

    pub fn set_physic_msg_timestamp(&self, timestamp: i64) {
        self.physic_msg_timestamp.store(timestamp, Ordering::Release);
    }

    pub fn physic_msg_timestamp(&self) -> i64 {
        self.physic_msg_timestamp.load(Ordering::Acquire)
    }

    pub fn set_logics_msg_timestamp(&self, timestamp: i64) {
        self.logics_msg_timestamp.store(timestamp, Ordering::Release);
    }

    pub fn set_index_msg_timestamp(&self, timestamp: i64) {
        self.index_msg_timestamp.store(timestamp, Ordering::Release);
    }

    /// Oldest of the physical and logical flush timestamps, backed off by
    /// a safety margin.
    pub fn min_timestamp(&self) -> i64 {
        let min = self
            .physic_msg_timestamp
            .load(Ordering::Acquire)
            .min(self.logics_msg_timestamp.load(Ordering::Acquire));
        (min - MIN_TIMESTAMP_BACKOFF_MILLIS).max(0)
    }

    /// [`Self::min_timestamp`] additionally bounded by the index flush.
    pub fn min_timestamp_index(&self) -> i64 {
        self.min_timestamp()
            .min(self.index_msg_timestamp.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_timestamp_takes_older_and_backs_off() {
        let checkpoint = StoreCheckpoint::new();
        checkpoint.set_physic_msg_timestamp(10_000);
        checkpoint.set_logics_msg_timestamp(8_000);

        assert_eq!(checkpoint.min_timestamp(), 5_000);
    }

    #[test]
    fn test_min_timestamp_never_negative() {
        let checkpoint = StoreCheckpoint::new();
        checkpoint.set_physic_msg_timestamp(1_000);
        checkpoint.set_logics_msg_timestamp(1_000);

        assert_eq!(checkpoint.min_timestamp(), 0);
    }

    #[test]
    fn test_min_timestamp_index_bounds_by_index() {
        let checkpoint = StoreCheckpoint::new();
        checkpoint.set_physic_msg_timestamp(20_000);
        checkpoint.set_logics_msg_timestamp(20_000);
        checkpoint.set_index_msg_timestamp(4_000);

        assert_eq!(checkpoint.min_timestamp_index(), 4_000);
    }
}

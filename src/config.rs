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

use std::path::PathBuf;

/// Configuration for the commit log store.
///
/// Durability is selected through [`FlushDiskType`]: `SyncFlush` routes
/// every waiting producer through the group-commit rendezvous, `AsyncFlush`
/// leaves persistence to the background flush (and, when the transient
/// write pool is enabled, commit) services.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the segment files.
    pub store_path: PathBuf,
    /// Fixed size of every segment file in bytes.
    pub mapped_file_size: u64,
    /// Durability strategy for appended messages.
    pub flush_disk_type: FlushDiskType,
    /// Upper bound for a producer waiting on a sync flush or a replica ack.
    pub sync_flush_timeout_millis: u64,
    /// Async flush service pass interval.
    pub flush_interval_millis: u64,
    /// Minimum number of dirty pages before an async flush pass does work.
    pub flush_least_pages: u64,
    /// Ceiling on how long the least-pages gate may defer a flush.
    pub flush_thorough_interval_millis: u64,
    /// Sleep a fixed interval between flush passes instead of waiting on
    /// wakeups.
    pub flush_commitlog_timed: bool,
    /// Commit service pass interval (transient pool only).
    pub commit_interval_millis: u64,
    /// Minimum number of buffered pages before a commit pass does work.
    pub commit_least_pages: u64,
    /// Ceiling on how long the least-pages gate may defer a commit.
    pub commit_thorough_interval_millis: u64,
    /// Route appends through an off-mmap write buffer that a separate
    /// commit step copies into the mapped region.
    pub transient_store_pool_enable: bool,
    /// Serialize writers with a blocking mutex instead of the spin lock.
    pub use_mutex_when_put_message: bool,
    /// Largest encoded record accepted by the append path.
    pub max_message_size: usize,
    /// Verify body CRCs while replaying records during recovery.
    pub check_crc_on_recover: bool,
    /// Role of this broker in a replica group.
    pub broker_role: BrokerRole,
    /// Replay only records below the confirm offset during abnormal
    /// recovery.
    pub duplication_enable: bool,
    /// Message index files are maintained downstream.
    pub message_index_enable: bool,
    /// Use the index-safe minimum checkpoint when picking the abnormal
    /// recovery start segment.
    pub message_index_safe: bool,
    /// Highest delay level accepted for scheduled delivery.
    pub max_delay_level: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("./store/commitlog"),
            mapped_file_size: 1024 * 1024 * 1024,
            flush_disk_type: FlushDiskType::AsyncFlush,
            sync_flush_timeout_millis: 5000,
            flush_interval_millis: 500,
            flush_least_pages: 4,
            flush_thorough_interval_millis: 1000 * 10,
            flush_commitlog_timed: false,
            commit_interval_millis: 200,
            commit_least_pages: 4,
            commit_thorough_interval_millis: 200,
            transient_store_pool_enable: false,
            use_mutex_when_put_message: false,
            max_message_size: 1024 * 1024 * 4,
            check_crc_on_recover: true,
            broker_role: BrokerRole::AsyncMaster,
            duplication_enable: false,
            message_index_enable: true,
            message_index_safe: false,
            max_delay_level: 18,
        }
    }
}

/// How appended messages reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDiskType {
    /// Producers requesting durability block on the group-commit service.
    SyncFlush,
    /// A background service flushes on an interval.
    AsyncFlush,
}

/// Role of this broker within a replica group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerRole {
    /// Replicates to the slave asynchronously.
    AsyncMaster,
    /// Waits for the slave ack before confirming a durable put.
    SyncMaster,
    /// Receives replicated data via the raw append path.
    Slave,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.mapped_file_size, 1024 * 1024 * 1024);
        assert_eq!(config.sync_flush_timeout_millis, 5000);
        assert_eq!(config.flush_disk_type, FlushDiskType::AsyncFlush);
        assert_eq!(config.broker_role, BrokerRole::AsyncMaster);
        assert!(!config.transient_store_pool_enable);
        assert!(config.check_crc_on_recover);
    }
}

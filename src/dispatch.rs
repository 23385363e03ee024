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

//! Replay record handed to the downstream dispatch pipeline, plus the trait
//! the pipeline implements.
//!
//! During abnormal recovery every decoded record is pushed through
//! [`MessageDispatcher::dispatch`] so consume queues and index files can be
//! rebuilt from the log alone.

/// A decoded commit-log record, or one of two sentinels: `msg_size == 0`
/// marks the blank trailer at the end of a segment, `msg_size == -1` an
/// undecodable record.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub topic:    String,
    pub queue_id: i32,
    /// Physical offset at which the record starts.
    pub commit_log_offset: u64,
    /// Encoded record length; 0 = end of segment, -1 = invalid.
    pub msg_size: i32,
    /// Hash of the TAGS property, for consume-queue filtering.
    pub tags_code: i64,
    pub store_timestamp: i64,
    pub consume_queue_offset: i64,
    pub keys:     String,
    pub uniq_key: Option<String>,
    pub sys_flag: i32,
    pub prepared_transaction_offset: i64,
    /// Whether the record decoded cleanly.
    pub success:  bool,
}

impl DispatchRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: String,
        queue_id: i32,
        commit_log_offset: u64,
        msg_size: i32,
        tags_code: i64,
        store_timestamp: i64,
        consume_queue_offset: i64,
        keys: String,
        uniq_key: Option<String>,
        sys_flag: i32,
        prepared_transaction_offset: i64,
    ) -> Self {
        Self {
            topic,
            queue_id,
            commit_log_offset,
            msg_size,
            tags_code,
            store_timestamp,
            consume_queue_offset,
            keys,
            uniq_key,
            sys_flag,
            prepared_transaction_offset,
            success: true,
        }
    }

    /// Sentinel carrying only a size and a success flag.
    pub fn sentinel(msg_size: i32, success: bool) -> Self {
        Self {
            topic: String::new(),
            queue_id: 0,
            commit_log_offset: 0,
            msg_size,
            tags_code: 0,
            store_timestamp: 0,
            consume_queue_offset: 0,
            keys: String::new(),
            uniq_key: None,
            sys_flag: 0,
            prepared_transaction_offset: 0,
            success,
        }
    }
}

/// Downstream consumer of replayed records. Implemented by the store layer
/// that owns consume queues and index files.
pub trait MessageDispatcher: Send + Sync {
    /// Rebuild derived state from one replayed record.
    fn dispatch(&self, request: &DispatchRequest);

    /// Drop derived entries beyond the given physical offset.
    fn truncate_dirty_logic_files(&self, phy_offset: u64);

    /// Remove all derived files; called when the log itself is empty.
    fn destroy_logics(&self);
}

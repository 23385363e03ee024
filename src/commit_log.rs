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

//! The commit-log facade: single-writer appends, durability coordination,
//! replication waits, lookups and crash recovery.
//!
//! Every produced message is serialized into this log before any consume
//! queue or index entry exists; on crash, those derived structures are
//! rebuilt by replaying records out of the log.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::{
    append::{
        AppendMessageResult, AppendMessageStatus, BoundAppendCallback, DefaultAppendCallback,
        TopicQueueTable,
    },
    checkpoint::StoreCheckpoint,
    clock::now_millis,
    codec::{
        MESSAGE_MAGIC_CODE, MESSAGE_MAGIC_CODE_POSITION, MESSAGE_STORE_TIMESTAMP_POSITION,
        check_message_and_return_size,
    },
    config::{BrokerRole, FlushDiskType, StoreConfig},
    dispatch::{DispatchRequest, MessageDispatcher},
    error::Result,
    flush::{
        CommitRealTimeService, FlushRealTimeService, GroupCommitRequest, GroupCommitService,
    },
    ha::HighAvailability,
    lock::{PutMessageLock, new_put_message_lock},
    mapped_file::{MappedFile, MappedSlice},
    mapped_file_queue::MappedFileQueue,
    message::{
        MessageInner, PROPERTY_REAL_QUEUE_ID, PROPERTY_REAL_TOPIC, SCHEDULE_TOPIC,
        TRANSACTION_COMMIT_TYPE, TRANSACTION_NOT_TYPE, TRANSACTION_PREPARED_TYPE,
        TRANSACTION_ROLLBACK_TYPE, transaction_value,
    },
};

/// Outcome of a `put_message` call as reported to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMessageStatus {
    PutOk,
    CreateMappedFileFailed,
    MessageIllegal,
    /// Written, but the sync flush did not confirm within the timeout.
    FlushDiskTimeout,
    /// Written, but the replica did not confirm within the timeout.
    FlushSlaveTimeout,
    /// Written, but the replica lags beyond the configured window.
    SlaveNotAvailable,
    UnknownError,
}

#[derive(Debug, Clone)]
pub struct PutMessageResult {
    pub status: PutMessageStatus,
    pub append_result: Option<AppendMessageResult>,
}

impl PutMessageResult {
    pub fn new(status: PutMessageStatus, append_result: Option<AppendMessageResult>) -> Self {
        Self {
            status,
            append_result,
        }
    }

    pub fn is_ok(&self) -> bool { self.status == PutMessageStatus::PutOk }
}

enum FlushService {
    GroupCommit(Arc<GroupCommitService>),
    RealTime(Arc<FlushRealTimeService>),
}

/// The append-only commit log.
pub struct CommitLog {
    config:            Arc<StoreConfig>,
    mapped_file_queue: Arc<MappedFileQueue>,
    checkpoint:        Arc<StoreCheckpoint>,
    /// Next queue offset per `"{topic}-{queue_id}"`; written only inside
    /// the writer critical section and during recovery replay.
    topic_queue_table: Arc<TopicQueueTable>,
    append_callback:   DefaultAppendCallback,
    put_message_lock:  Box<dyn PutMessageLock>,
    /// Wall clock at which the current holder entered the critical
    /// section; 0 while unlocked.
    begin_time_in_lock: AtomicI64,
    /// Highest physical offset acknowledged by the replica; -1 until set.
    confirm_offset: AtomicI64,
    flush_service:  FlushService,
    commit_service: Arc<CommitRealTimeService>,
    ha_service:     RwLock<Option<Arc<dyn HighAvailability>>>,
    threads:        Mutex<Vec<JoinHandle<()>>>,
}

impl CommitLog {
    pub fn new(config: StoreConfig) -> Self {
        let config = Arc::new(config);
        let mapped_file_queue = Arc::new(MappedFileQueue::new(
            config.store_path.clone(),
            config.mapped_file_size,
            config.transient_store_pool_enable,
        ));
        let checkpoint = Arc::new(StoreCheckpoint::new());

        let flush_service = match config.flush_disk_type {
            FlushDiskType::SyncFlush => FlushService::GroupCommit(Arc::new(
                GroupCommitService::new(mapped_file_queue.clone(), checkpoint.clone()),
            )),
            FlushDiskType::AsyncFlush => FlushService::RealTime(Arc::new(
                FlushRealTimeService::new(
                    mapped_file_queue.clone(),
                    checkpoint.clone(),
                    config.clone(),
                ),
            )),
        };
        let flush_state = match &flush_service {
            FlushService::GroupCommit(service) => service.state_handle(),
            FlushService::RealTime(service) => service.state_handle(),
        };
        let commit_service = Arc::new(CommitRealTimeService::new(
            mapped_file_queue.clone(),
            config.clone(),
            flush_state,
        ));

        Self {
            append_callback: DefaultAppendCallback::new(config.max_message_size),
            put_message_lock: new_put_message_lock(config.use_mutex_when_put_message),
            begin_time_in_lock: AtomicI64::new(0),
            confirm_offset: AtomicI64::new(-1),
            topic_queue_table: Arc::new(TopicQueueTable::default()),
            mapped_file_queue,
            checkpoint,
            config,
            flush_service,
            commit_service,
            ha_service: RwLock::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Map every segment found on disk. Returns false when the directory
    /// cannot be mapped, in which case broker startup must abort.
    pub fn load(&self) -> bool {
        let result = self.mapped_file_queue.load();
        match &result {
            Ok(()) => info!("load commit log OK"),
            Err(e) => error!(error = ?e, "load commit log failed"),
        }
        result.is_ok()
    }

    /// Start the background durability services.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();

        let handle = match &self.flush_service {
            FlushService::GroupCommit(service) => {
                let service = service.clone();
                std::thread::Builder::new()
                    .name("commitlog-group-commit".into())
                    .spawn(move || service.run())?
            }
            FlushService::RealTime(service) => {
                let service = service.clone();
                std::thread::Builder::new()
                    .name("commitlog-flush".into())
                    .spawn(move || service.run())?
            }
        };
        threads.push(handle);

        if self.config.transient_store_pool_enable {
            let service = self.commit_service.clone();
            let handle = std::thread::Builder::new()
                .name("commitlog-commit".into())
                .spawn(move || service.run())?;
            threads.push(handle);
        }

        Ok(())
    }

    /// Stop the background services in reverse startup order and wait for
    /// them to drain.
    pub fn shutdown(&self) {
        if self.config.transient_store_pool_enable {
            self.commit_service.shutdown();
        }
        match &self.flush_service {
            FlushService::GroupCommit(service) => service.shutdown(),
            FlushService::RealTime(service) => service.shutdown(),
        }

        let mut threads = self.threads.lock();
        for handle in threads.drain(..).rev() {
            if handle.join().is_err() {
                error!("durability service thread panicked");
            }
        }
    }

    pub fn config(&self) -> &StoreConfig { &self.config }

    pub fn checkpoint(&self) -> &Arc<StoreCheckpoint> { &self.checkpoint }

    pub fn set_ha_service(&self, service: Arc<dyn HighAvailability>) {
        *self.ha_service.write() = Some(service);
    }

    pub fn confirm_offset(&self) -> i64 { self.confirm_offset.load(Ordering::Acquire) }

    pub fn set_confirm_offset(&self, phy_offset: i64) {
        self.confirm_offset.store(phy_offset, Ordering::Release);
    }

    /// How long the current writer has held the lock, for health checks.
    pub fn lock_time_millis(&self) -> i64 {
        let begin = self.begin_time_in_lock.load(Ordering::Acquire);
        if begin > 0 {
            (now_millis() - begin).max(0)
        } else {
            0
        }
    }

    /// Append one message. See the module docs for the durability and
    /// replication semantics of the returned status.
    pub fn put_message(&self, mut msg: MessageInner) -> PutMessageResult {
        msg.store_timestamp = now_millis();
        msg.body_crc = crc32fast::hash(&msg.body);

        let tran_type = msg.transaction_type();
        if matches!(tran_type, TRANSACTION_NOT_TYPE | TRANSACTION_COMMIT_TYPE)
            && msg.delay_time_level() > 0
        {
            self.remap_delayed_message(&mut msg);
        }

        let mut mapped_file = self.mapped_file_queue.last_mapped_file();

        self.put_message_lock.lock();
        let guard = PutLockGuard { log: self };
        let begin_lock_timestamp = now_millis();
        self.begin_time_in_lock
            .store(begin_lock_timestamp, Ordering::Release);

        // Re-stamp under the lock so global order agrees with log order.
        msg.store_timestamp = begin_lock_timestamp;

        if mapped_file.as_ref().is_none_or(|f| f.is_full()) {
            mapped_file = self.mapped_file_queue.last_mapped_file_or_create(0).ok();
        }
        let Some(mut file) = mapped_file else {
            error!(topic = %msg.topic, "create mapped file failed");
            return PutMessageResult::new(PutMessageStatus::CreateMappedFileFailed, None);
        };

        let bound = BoundAppendCallback {
            callback: &self.append_callback,
            table:    self.topic_queue_table.as_ref(),
        };
        let mut result = file.append_message(&msg, &bound);
        match result.status {
            AppendMessageStatus::PutOk => {}
            AppendMessageStatus::EndOfFile => {
                // The segment was sealed with a blank trailer; retry once
                // on a fresh one.
                match self.mapped_file_queue.last_mapped_file_or_create(0) {
                    Ok(new_file) => {
                        file = new_file;
                        result = file.append_message(&msg, &bound);
                    }
                    Err(e) => {
                        error!(error = ?e, topic = %msg.topic, "create mapped file failed");
                        return PutMessageResult::new(
                            PutMessageStatus::CreateMappedFileFailed,
                            Some(result),
                        );
                    }
                }
            }
            AppendMessageStatus::MessageSizeExceeded
            | AppendMessageStatus::PropertiesSizeExceeded => {
                return PutMessageResult::new(PutMessageStatus::MessageIllegal, Some(result));
            }
            AppendMessageStatus::UnknownError => {
                return PutMessageResult::new(PutMessageStatus::UnknownError, Some(result));
            }
        }
        let elapsed_in_lock = now_millis() - begin_lock_timestamp;
        drop(guard);

        if elapsed_in_lock > 500 {
            warn!(
                elapsed_in_lock,
                body_len = msg.body.len(),
                "put message held the writer lock for a long time"
            );
        }

        let mut put_result =
            PutMessageResult::new(PutMessageStatus::PutOk, Some(result.clone()));

        let request = self.handle_disk_flush(&result, &msg, &mut put_result);
        self.handle_slave_sync(&result, &msg, request, &mut put_result);

        put_result
    }

    /// Retarget a delayed message onto the schedule topic, preserving the
    /// real destination in properties for the scheduler.
    fn remap_delayed_message(&self, msg: &mut MessageInner) {
        let level = msg.delay_time_level().min(self.config.max_delay_level);
        msg.set_delay_time_level(level);

        let real_topic = std::mem::replace(&mut msg.topic, SCHEDULE_TOPIC.to_string());
        let real_queue_id = msg.queue_id;
        msg.queue_id = level - 1;
        msg.put_property(PROPERTY_REAL_TOPIC, real_topic);
        msg.put_property(PROPERTY_REAL_QUEUE_ID, real_queue_id.to_string());
    }

    fn handle_disk_flush(
        &self,
        result: &AppendMessageResult,
        msg: &MessageInner,
        put_result: &mut PutMessageResult,
    ) -> Option<Arc<GroupCommitRequest>> {
        match &self.flush_service {
            FlushService::GroupCommit(service) => {
                if msg.wait_store_msg_ok() {
                    let request = Arc::new(GroupCommitRequest::new(
                        result.wrote_offset + result.wrote_bytes,
                    ));
                    service.put_request(request.clone());
                    let timeout = Duration::from_millis(self.config.sync_flush_timeout_millis);
                    if !request.wait_for_flush(timeout) {
                        error!(
                            topic = %msg.topic,
                            "group commit wait for flush failed"
                        );
                        put_result.status = PutMessageStatus::FlushDiskTimeout;
                    }
                    Some(request)
                } else {
                    service.wakeup();
                    None
                }
            }
            FlushService::RealTime(service) => {
                if self.config.transient_store_pool_enable {
                    self.commit_service.wakeup();
                } else {
                    service.wakeup();
                }
                None
            }
        }
    }

    fn handle_slave_sync(
        &self,
        result: &AppendMessageResult,
        msg: &MessageInner,
        request: Option<Arc<GroupCommitRequest>>,
        put_result: &mut PutMessageResult,
    ) {
        if self.config.broker_role != BrokerRole::SyncMaster {
            return;
        }
        let Some(ha) = self.ha_service.read().clone() else {
            return;
        };
        if !msg.wait_store_msg_ok() {
            return;
        }

        let target = result.wrote_offset + result.wrote_bytes;
        if ha.is_slave_ok(target) {
            let request = request.unwrap_or_else(|| Arc::new(GroupCommitRequest::new(target)));
            ha.put_request(request.clone());
            ha.notify_waiters();
            let timeout = Duration::from_millis(self.config.sync_flush_timeout_millis);
            if !request.wait_for_flush(timeout) {
                error!(topic = %msg.topic, "sync transfer to slave did not return in time");
                put_result.status = PutMessageStatus::FlushSlaveTimeout;
            }
        } else {
            put_result.status = PutMessageStatus::SlaveNotAvailable;
        }
    }

    /// Raw append of replicated bytes at a fixed offset; the slave side of
    /// the HA channel.
    pub fn append_data(&self, start_offset: u64, data: &[u8]) -> bool {
        self.put_message_lock.lock();
        let appended = match self.mapped_file_queue.last_mapped_file_or_create(start_offset) {
            Ok(file) => file.append_bytes(data),
            Err(e) => {
                error!(error = ?e, start_offset, "append data could not obtain a segment");
                false
            }
        };
        self.put_message_lock.unlock();
        appended
    }

    /// Force a full commit + flush and report the flushed-through offset.
    pub fn flush(&self) -> u64 {
        if let Err(e) = self.mapped_file_queue.commit(0) {
            warn!(error = ?e, "manual commit failed");
        }
        if let Err(e) = self.mapped_file_queue.flush(0) {
            warn!(error = ?e, "manual flush failed");
        }
        self.mapped_file_queue.flushed_where()
    }

    pub fn remain_how_many_data_to_commit(&self) -> u64 {
        self.mapped_file_queue.remain_how_many_data_to_commit()
    }

    pub fn remain_how_many_data_to_flush(&self) -> u64 {
        self.mapped_file_queue.remain_how_many_data_to_flush()
    }

    /// Readable bytes from `offset` to the end of its segment's readable
    /// region. Used by the replication transport.
    pub fn get_data(&self, offset: u64) -> Option<MappedSlice> {
        self.get_data_with(offset, offset == 0)
    }

    pub fn get_data_with(&self, offset: u64, return_first_on_miss: bool) -> Option<MappedSlice> {
        let file = self
            .mapped_file_queue
            .find_by_offset(offset, return_first_on_miss)?;
        file.select_slice(offset % self.config.mapped_file_size)
    }

    /// Exactly `size` bytes starting at `offset`.
    pub fn get_message(&self, offset: u64, size: u64) -> Option<MappedSlice> {
        let file = self.mapped_file_queue.find_by_offset(offset, offset == 0)?;
        file.select_slice_sized(offset % self.config.mapped_file_size, size)
    }

    /// Read the store timestamp of the record at `offset` without a full
    /// decode. Returns -1 when the record cannot be read.
    pub fn pickup_store_timestamp(&self, offset: u64, size: u64) -> i64 {
        if (offset as i64) >= self.min_offset() {
            if let Some(slice) = self.get_message(offset, size) {
                if slice.bytes.len() >= MESSAGE_STORE_TIMESTAMP_POSITION + 8 {
                    let raw = &slice.bytes
                        [MESSAGE_STORE_TIMESTAMP_POSITION..MESSAGE_STORE_TIMESTAMP_POSITION + 8];
                    return i64::from_be_bytes(raw.try_into().unwrap());
                }
            }
        }
        -1
    }

    /// Base offset of the first available segment, or the next segment's
    /// base when the first is being reclaimed. -1 on an empty log.
    pub fn min_offset(&self) -> i64 {
        match self.mapped_file_queue.first_mapped_file() {
            Some(file) if file.is_available() => file.base_offset() as i64,
            Some(file) => self.roll_next_file(file.base_offset()) as i64,
            None => -1,
        }
    }

    pub fn max_offset(&self) -> u64 { self.mapped_file_queue.max_offset() }

    /// First offset of the segment after the one containing `offset`.
    pub fn roll_next_file(&self, offset: u64) -> u64 {
        let size = self.config.mapped_file_size;
        offset + size - offset % size
    }

    /// Next queue offset for a (topic, queue), if any record was appended.
    pub fn topic_queue_tail(&self, topic: &str, queue_id: i32) -> Option<i64> {
        self.topic_queue_table
            .lock()
            .get(&format!("{topic}-{queue_id}"))
            .copied()
    }

    pub fn remove_queue_from_topic_queue_table(&self, topic: &str, queue_id: i32) {
        let key = format!("{topic}-{queue_id}");
        self.topic_queue_table.lock().remove(&key);
        info!(topic, queue_id, "removed queue from topic queue table");
    }

    pub fn delete_expired_file(
        &self,
        expired_millis: i64,
        delete_interval: Duration,
        immediately: bool,
    ) -> usize {
        self.mapped_file_queue
            .delete_expired_by_time(expired_millis, delete_interval, immediately)
    }

    pub fn retry_delete_first_file(&self) -> bool {
        self.mapped_file_queue.retry_delete_first_file()
    }

    pub fn reset_offset(&self, offset: u64) -> bool {
        self.mapped_file_queue.reset_offset(offset)
    }

    pub fn check_self(&self) { self.mapped_file_queue.check_self(); }

    pub fn destroy(&self) { self.mapped_file_queue.destroy(); }

    /// Replay after a clean shutdown: every flushed byte is trustworthy,
    /// so scanning the newest few segments suffices to re-establish the
    /// pointers.
    pub fn recover_normally(&self) {
        let check_crc = self.config.check_crc_on_recover;
        let files = self.mapped_file_queue.mapped_files();
        if files.is_empty() {
            return;
        }

        // Begin from the third-from-last segment.
        let mut index = files.len().saturating_sub(3);
        let mut file = files[index].clone();
        let mut process_offset = file.base_offset();
        let mut in_file_offset = 0u64;

        loop {
            let request = self.decode_at(&file, in_file_offset, check_crc);
            let size = request.msg_size;

            if request.success && size > 0 {
                self.replay_topic_queue_table(&request);
                in_file_offset += size as u64;
            } else if request.success && size == 0 {
                // Blank trailer: move to the next segment.
                index += 1;
                if index >= files.len() {
                    info!(segment = ?file.path(), "recover over, reached the last segment");
                    break;
                }
                file = files[index].clone();
                process_offset = file.base_offset();
                in_file_offset = 0;
                info!(segment = ?file.path(), "recover next segment");
            } else {
                info!(segment = ?file.path(), "recover reached the end of valid data");
                break;
            }
        }

        process_offset += in_file_offset;
        self.mapped_file_queue.set_flushed_where(process_offset);
        self.mapped_file_queue.set_committed_where(process_offset);
        self.mapped_file_queue.truncate_dirty(process_offset);
    }

    /// Replay after a crash: pick the newest segment whose first record
    /// predates the durability checkpoint, replay forward feeding every
    /// record to the dispatcher so derived files are rebuilt, then
    /// truncate both the log and the derived files at the last valid
    /// boundary.
    pub fn recover_abnormally(&self, dispatcher: &dyn MessageDispatcher) {
        let check_crc = self.config.check_crc_on_recover;
        let files = self.mapped_file_queue.mapped_files();

        if files.is_empty() {
            self.mapped_file_queue.set_flushed_where(0);
            self.mapped_file_queue.set_committed_where(0);
            dispatcher.destroy_logics();
            return;
        }

        let mut index = files.len() - 1;
        loop {
            if self.is_mapped_file_matched_recover(&files[index]) {
                info!(segment = ?files[index].path(), "recover from this segment");
                break;
            }
            if index == 0 {
                break;
            }
            index -= 1;
        }

        let mut file = files[index].clone();
        let mut process_offset = file.base_offset();
        let mut in_file_offset = 0u64;

        loop {
            let request = self.decode_at(&file, in_file_offset, check_crc);
            let size = request.msg_size;

            if request.success && size > 0 {
                self.replay_topic_queue_table(&request);
                if self.config.duplication_enable {
                    if (request.commit_log_offset as i64) < self.confirm_offset() {
                        dispatcher.dispatch(&request);
                    }
                } else {
                    dispatcher.dispatch(&request);
                }
                in_file_offset += size as u64;
            } else if request.success && size == 0 {
                index += 1;
                if index >= files.len() {
                    info!(segment = ?file.path(), "recover over, reached the last segment");
                    break;
                }
                file = files[index].clone();
                process_offset = file.base_offset();
                in_file_offset = 0;
                info!(segment = ?file.path(), "recover next segment");
            } else {
                info!(segment = ?file.path(), "recover reached the end of valid data");
                break;
            }
        }

        process_offset += in_file_offset;
        self.mapped_file_queue.set_flushed_where(process_offset);
        self.mapped_file_queue.set_committed_where(process_offset);
        self.mapped_file_queue.truncate_dirty(process_offset);

        // Derived files may run past the log; wind them back too.
        dispatcher.truncate_dirty_logic_files(process_offset);
    }

    fn decode_at(&self, file: &Arc<MappedFile>, pos: u64, check_crc: bool) -> DispatchRequest {
        match file.as_slice(pos, file.file_size() - pos) {
            Ok(data) => check_message_and_return_size(data.as_slice(), check_crc, true),
            Err(e) => {
                error!(error = ?e, pos, "segment read failed during recovery");
                DispatchRequest::sentinel(-1, false)
            }
        }
    }

    /// Rebuild the per-queue tail table from a replayed record. Prepared
    /// and rollback records never advance queue offsets.
    fn replay_topic_queue_table(&self, request: &DispatchRequest) {
        if matches!(
            transaction_value(request.sys_flag),
            TRANSACTION_PREPARED_TYPE | TRANSACTION_ROLLBACK_TYPE
        ) {
            return;
        }
        let key = format!("{}-{}", request.topic, request.queue_id);
        let next = request.consume_queue_offset + 1;
        let mut table = self.topic_queue_table.lock();
        let entry = table.entry(key).or_insert(0);
        *entry = (*entry).max(next);
    }

    /// A segment qualifies as the abnormal-recovery starting point when
    /// its first record is a real message older than the durability
    /// checkpoint.
    fn is_mapped_file_matched_recover(&self, file: &Arc<MappedFile>) -> bool {
        let header = match file.as_slice(0, (MESSAGE_STORE_TIMESTAMP_POSITION + 8) as u64) {
            Ok(data) => data,
            Err(_) => return false,
        };

        let magic = u32::from_be_bytes(
            header.as_slice()[MESSAGE_MAGIC_CODE_POSITION..MESSAGE_MAGIC_CODE_POSITION + 4]
                .try_into()
                .unwrap(),
        );
        if magic != MESSAGE_MAGIC_CODE {
            return false;
        }

        let store_timestamp = i64::from_be_bytes(
            header.as_slice()[MESSAGE_STORE_TIMESTAMP_POSITION..MESSAGE_STORE_TIMESTAMP_POSITION + 8]
                .try_into()
                .unwrap(),
        );
        if store_timestamp == 0 {
            return false;
        }

        let min = if self.config.message_index_enable && self.config.message_index_safe {
            self.checkpoint.min_timestamp_index()
        } else {
            self.checkpoint.min_timestamp()
        };
        if store_timestamp <= min {
            info!(store_timestamp, "found checkpoint-covered segment");
            return true;
        }
        false
    }
}

impl Drop for CommitLog {
    fn drop(&mut self) {
        if !self.threads.get_mut().is_empty() {
            if self.config.transient_store_pool_enable {
                self.commit_service.shutdown();
            }
            match &self.flush_service {
                FlushService::GroupCommit(service) => service.shutdown(),
                FlushService::RealTime(service) => service.shutdown(),
            }
        }
    }
}

/// Clears the lock-hold telemetry and releases the writer lock on every
/// exit path of the critical section.
struct PutLockGuard<'a> {
    log: &'a CommitLog,
}

impl Drop for PutLockGuard<'_> {
    fn drop(&mut self) {
        self.log.begin_time_in_lock.store(0, Ordering::Release);
        self.log.put_message_lock.unlock();
    }
}

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

use std::{
    io::{Seek, SeekFrom, Write},
    net::{Ipv4Addr, SocketAddrV4},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use commitlog::{
    BrokerRole, CommitLog, DispatchRequest, FlushDiskType, GroupCommitRequest, HighAvailability,
    MessageDispatcher, MessageInner, PutMessageStatus, StoreConfig,
    codec::check_message_and_return_size,
    message::{
        PROPERTY_REAL_QUEUE_ID, PROPERTY_REAL_TOPIC, SCHEDULE_TOPIC, TRANSACTION_PREPARED_TYPE,
        string_to_properties,
    },
};
use tempfile::TempDir;

fn store_config(dir: &TempDir, mapped_file_size: u64) -> StoreConfig {
    StoreConfig {
        store_path: dir.path().to_path_buf(),
        mapped_file_size,
        ..Default::default()
    }
}

fn test_message(topic: &str, queue_id: i32, body: &[u8]) -> MessageInner {
    let mut msg = MessageInner::new(topic, queue_id, Bytes::copy_from_slice(body));
    msg.born_host = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5000);
    msg.store_host = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 10911);
    msg.born_timestamp = 1;
    msg
}

#[derive(Default)]
struct CountingDispatcher {
    dispatched: AtomicUsize,
    truncated:  AtomicUsize,
    destroyed:  AtomicUsize,
}

impl MessageDispatcher for CountingDispatcher {
    fn dispatch(&self, _request: &DispatchRequest) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    fn truncate_dirty_logic_files(&self, _phy_offset: u64) {
        self.truncated.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy_logics(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_put_then_decode_roundtrip() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());

    let result = log.put_message(test_message("T", 3, b"hello"));
    assert_eq!(result.status, PutMessageStatus::PutOk);

    let append = result.append_result.unwrap();
    assert_eq!(append.wrote_offset, 0);
    assert_eq!(append.wrote_bytes, 97);
    assert_eq!(append.queue_offset, 0);

    let slice = log.get_message(0, 97).unwrap();
    let decoded = check_message_and_return_size(&slice.bytes, true, true);
    assert!(decoded.success);
    assert_eq!(decoded.msg_size, 97);
    assert_eq!(decoded.topic, "T");
    assert_eq!(decoded.queue_id, 3);
    assert_eq!(decoded.commit_log_offset, 0);
    assert_eq!(decoded.consume_queue_offset, 0);
    assert_eq!(decoded.store_timestamp, append.store_timestamp);
}

#[test]
fn test_segment_roll_writes_blank_trailer() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024));
    assert!(log.load());

    // Ten 97-byte records leave 54 bytes, too little for another record
    // plus the trailer header.
    for _ in 0..10 {
        let result = log.put_message(test_message("T", 0, b"hello"));
        assert_eq!(result.status, PutMessageStatus::PutOk);
    }

    let rolled = log.put_message(test_message("T", 0, b"hello"));
    assert_eq!(rolled.status, PutMessageStatus::PutOk);
    let append = rolled.append_result.unwrap();
    assert_eq!(append.wrote_offset, 1024);

    let trailer = log.get_message(970, 54).unwrap();
    let decoded = check_message_and_return_size(&trailer.bytes, true, true);
    assert!(decoded.success);
    assert_eq!(decoded.msg_size, 0);

    let record = log.get_message(1024, 97).unwrap();
    let decoded = check_message_and_return_size(&record.bytes, true, true);
    assert!(decoded.success);
    assert_eq!(decoded.commit_log_offset, 1024);

    assert_eq!(log.max_offset(), 1024 + 97);
    assert_eq!(log.roll_next_file(970), 1024);
}

#[test]
fn test_queue_offsets_skip_prepared_transactions() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());

    for _ in 0..5 {
        log.put_message(test_message("T", 0, b"n"));
    }
    for _ in 0..2 {
        let mut msg = test_message("T", 0, b"p");
        msg.sys_flag = TRANSACTION_PREPARED_TYPE;
        log.put_message(msg);
    }

    let mut offset = 0u64;
    let mut queue_offsets = Vec::new();
    for _ in 0..7 {
        let slice = log.get_data(offset).unwrap();
        let decoded = check_message_and_return_size(&slice.bytes, true, true);
        assert!(decoded.success);
        queue_offsets.push(decoded.consume_queue_offset);
        offset += decoded.msg_size as u64;
    }

    assert_eq!(queue_offsets, vec![0, 1, 2, 3, 4, 0, 0]);
    assert_eq!(log.topic_queue_tail("T", 0), Some(5));
}

#[test]
fn test_delayed_message_is_remapped_to_schedule_topic() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());

    let mut msg = test_message("orders", 1, b"x");
    msg.set_delay_time_level(3);
    let result = log.put_message(msg);
    assert_eq!(result.status, PutMessageStatus::PutOk);

    let append = result.append_result.unwrap();
    let slice = log.get_message(0, append.wrote_bytes).unwrap();
    let decoded = check_message_and_return_size(&slice.bytes, true, true);
    assert_eq!(decoded.topic, SCHEDULE_TOPIC);
    assert_eq!(decoded.queue_id, 2);

    // The real destination travels in the properties section: the fixed
    // fields and the three payloads precede it.
    let record = slice.bytes.as_ref();
    let props_pos = 84 + 4 + 1 + 1 + SCHEDULE_TOPIC.len();
    let props_len =
        i16::from_be_bytes(record[props_pos..props_pos + 2].try_into().unwrap()) as usize;
    let props = std::str::from_utf8(&record[props_pos + 2..props_pos + 2 + props_len]).unwrap();
    let properties = string_to_properties(props);

    assert_eq!(properties.get(PROPERTY_REAL_TOPIC).unwrap(), "orders");
    assert_eq!(properties.get(PROPERTY_REAL_QUEUE_ID).unwrap(), "1");
}

#[test]
fn test_recover_normally_restores_pointers_and_records() {
    let dir = TempDir::new().unwrap();

    let mut timestamps = Vec::new();
    {
        let log = CommitLog::new(store_config(&dir, 1024 * 1024));
        assert!(log.load());
        for i in 0..10 {
            let result = log.put_message(test_message("T", 0, format!("m{i}").as_bytes()));
            timestamps.push(result.append_result.unwrap().store_timestamp);
        }
        log.flush();
    }

    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());
    log.recover_normally();

    let expected_end: u64 = timestamps.len() as u64 * 94; // encoded_length(2, 1, 0)
    assert_eq!(log.max_offset(), expected_end);
    assert_eq!(log.topic_queue_tail("T", 0), Some(10));

    // Replaying from zero yields the appended sequence, timestamps
    // non-decreasing in offset order.
    let mut offset = 0u64;
    let mut last_timestamp = 0i64;
    for i in 0..10 {
        let slice = log.get_data(offset).unwrap();
        let decoded = check_message_and_return_size(&slice.bytes, true, true);
        assert!(decoded.success);
        assert_eq!(decoded.consume_queue_offset, i);
        assert!(decoded.store_timestamp >= last_timestamp);
        last_timestamp = decoded.store_timestamp;
        offset += decoded.msg_size as u64;
    }
    assert_eq!(offset, expected_end);

    // The next append resumes exactly past the last record.
    let result = log.put_message(test_message("T", 0, b"m10"));
    assert_eq!(result.append_result.unwrap().wrote_offset, expected_end);
}

#[test]
fn test_recover_abnormally_truncates_torn_record() {
    let dir = TempDir::new().unwrap();
    let record_len = 97u64;

    let segment_path = {
        let log = CommitLog::new(store_config(&dir, 1024 * 1024));
        assert!(log.load());
        for _ in 0..100 {
            let result = log.put_message(test_message("T", 0, b"hello"));
            assert_eq!(result.status, PutMessageStatus::PutOk);
        }
        log.flush();
        dir.path().join(format!("{:020}", 0))
    };

    // Zero the last 10 bytes of the final record, as a torn write would.
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&segment_path)
            .unwrap();
        file.seek(SeekFrom::Start(100 * record_len - 10)).unwrap();
        file.write_all(&[0u8; 10]).unwrap();
    }

    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());
    let dispatcher = CountingDispatcher::default();
    log.recover_abnormally(&dispatcher);

    assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 99);
    assert_eq!(dispatcher.truncated.load(Ordering::SeqCst), 1);
    assert_eq!(log.max_offset(), 99 * record_len);

    // The torn record's slot is where the next append lands.
    let result = log.put_message(test_message("T", 0, b"hello"));
    assert_eq!(result.append_result.unwrap().wrote_offset, 99 * record_len);
}

#[test]
fn test_recover_abnormally_on_empty_log_destroys_derived_files() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());

    let dispatcher = CountingDispatcher::default();
    log.recover_abnormally(&dispatcher);

    assert_eq!(dispatcher.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.dispatched.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_flush_times_out_when_service_is_down() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir, 1024 * 1024);
    config.flush_disk_type = FlushDiskType::SyncFlush;
    config.sync_flush_timeout_millis = 300;

    // The group-commit service is never started, so the flush can only
    // time out.
    let log = CommitLog::new(config);
    assert!(log.load());

    let begin = Instant::now();
    let result = log.put_message(test_message("T", 0, b"hello"));
    let waited = begin.elapsed();

    assert_eq!(result.status, PutMessageStatus::FlushDiskTimeout);
    assert!(waited >= Duration::from_millis(250));
    assert!(waited < Duration::from_millis(2000));

    // The record itself was written regardless.
    let slice = log.get_message(0, 97).unwrap();
    let decoded = check_message_and_return_size(&slice.bytes, true, true);
    assert!(decoded.success);
}

#[test]
fn test_sync_flush_confirms_with_running_service() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir, 1024 * 1024);
    config.flush_disk_type = FlushDiskType::SyncFlush;

    let log = CommitLog::new(config);
    assert!(log.load());
    log.start().unwrap();

    let result = log.put_message(test_message("T", 0, b"hello"));
    assert_eq!(result.status, PutMessageStatus::PutOk);

    log.shutdown();
}

struct StubHa {
    slave_ok: bool,
    ack:      bool,
}

impl HighAvailability for StubHa {
    fn is_slave_ok(&self, _target_offset: u64) -> bool { self.slave_ok }

    fn put_request(&self, request: Arc<GroupCommitRequest>) {
        if self.ack {
            request.wakeup_customer(true);
        }
    }

    fn notify_waiters(&self) {}
}

#[test]
fn test_sync_master_waits_for_slave_ack() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir, 1024 * 1024);
    config.broker_role = BrokerRole::SyncMaster;

    let log = CommitLog::new(config);
    assert!(log.load());
    log.set_ha_service(Arc::new(StubHa {
        slave_ok: true,
        ack:      true,
    }));

    let result = log.put_message(test_message("T", 0, b"hello"));
    assert_eq!(result.status, PutMessageStatus::PutOk);
}

#[test]
fn test_sync_master_reports_lagging_slave() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir, 1024 * 1024);
    config.broker_role = BrokerRole::SyncMaster;

    let log = CommitLog::new(config);
    assert!(log.load());
    log.set_ha_service(Arc::new(StubHa {
        slave_ok: false,
        ack:      false,
    }));

    let result = log.put_message(test_message("T", 0, b"hello"));
    assert_eq!(result.status, PutMessageStatus::SlaveNotAvailable);
}

#[test]
fn test_sync_master_times_out_without_ack() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir, 1024 * 1024);
    config.broker_role = BrokerRole::SyncMaster;
    config.sync_flush_timeout_millis = 200;

    let log = CommitLog::new(config);
    assert!(log.load());
    log.set_ha_service(Arc::new(StubHa {
        slave_ok: true,
        ack:      false,
    }));

    let result = log.put_message(test_message("T", 0, b"hello"));
    assert_eq!(result.status, PutMessageStatus::FlushSlaveTimeout);
}

#[test]
fn test_message_illegal_when_too_large() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir, 1024 * 1024);
    config.max_message_size = 128;

    let log = CommitLog::new(config);
    assert!(log.load());

    let result = log.put_message(test_message("T", 0, &[0u8; 256]));
    assert_eq!(result.status, PutMessageStatus::MessageIllegal);
    assert_eq!(log.lock_time_millis(), 0);
}

#[test]
fn test_pickup_store_timestamp() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());

    let append = log
        .put_message(test_message("T", 0, b"hello"))
        .append_result
        .unwrap();

    assert_eq!(log.pickup_store_timestamp(0, 97), append.store_timestamp);
    assert_eq!(log.pickup_store_timestamp(4096, 97), -1);
}

#[test]
fn test_min_offset_tracks_expired_segments() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024));
    assert!(log.load());

    assert_eq!(log.min_offset(), -1);

    // Three segments worth of records: ten 97-byte records per 1 KiB
    // segment, then the roll.
    for _ in 0..25 {
        log.put_message(test_message("T", 0, b"hello"));
    }
    assert_eq!(log.min_offset(), 0);
    assert!(log.max_offset() > 2048);

    let deleted = log.delete_expired_file(0, Duration::ZERO, true);
    assert_eq!(deleted, 2);
    assert_eq!(log.min_offset(), 2048);
}

#[test]
fn test_append_data_for_replication() {
    let dir = TempDir::new().unwrap();
    let source_dir = TempDir::new().unwrap();

    // A master's bytes, replayed verbatim into a slave's log.
    let master = CommitLog::new(store_config(&source_dir, 1024 * 1024));
    assert!(master.load());
    let append = master
        .put_message(test_message("T", 5, b"replica"))
        .append_result
        .unwrap();
    let bytes = master.get_message(0, append.wrote_bytes).unwrap().bytes;

    let slave = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(slave.load());
    assert!(slave.append_data(0, &bytes));

    let slice = slave.get_data(0).unwrap();
    let decoded = check_message_and_return_size(&slice.bytes, true, true);
    assert!(decoded.success);
    assert_eq!(decoded.topic, "T");
    assert_eq!(decoded.queue_id, 5);
}

#[test]
fn test_flush_reports_flushed_through_offset() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());

    log.put_message(test_message("T", 0, b"hello"));
    assert_eq!(log.remain_how_many_data_to_flush(), 97);

    let flushed = log.flush();
    assert_eq!(flushed, 97);
    assert_eq!(log.remain_how_many_data_to_flush(), 0);
}

#[test]
fn test_transient_pool_commit_path() {
    let dir = TempDir::new().unwrap();
    let mut config = store_config(&dir, 1024 * 1024);
    config.transient_store_pool_enable = true;

    let log = CommitLog::new(config);
    assert!(log.load());

    log.put_message(test_message("T", 0, b"hello"));
    // Nothing readable until the commit step copies the buffered bytes
    // into the mapped region.
    assert!(log.get_message(0, 97).is_none());
    assert_eq!(log.remain_how_many_data_to_commit(), 97);

    let flushed = log.flush();
    assert_eq!(flushed, 97);
    let slice = log.get_message(0, 97).unwrap();
    assert!(check_message_and_return_size(&slice.bytes, true, true).success);
}

#[test]
fn test_remove_queue_from_topic_queue_table() {
    let dir = TempDir::new().unwrap();
    let log = CommitLog::new(store_config(&dir, 1024 * 1024));
    assert!(log.load());

    log.put_message(test_message("T", 0, b"x"));
    assert_eq!(log.topic_queue_tail("T", 0), Some(1));

    log.remove_queue_from_topic_queue_table("T", 0);
    assert_eq!(log.topic_queue_tail("T", 0), None);
}

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

//! The append callback: turns one message into one encoded record inside
//! the segment the writer currently holds, or a blank trailer when the
//! record no longer fits.
//!
//! Runs entirely inside the writer's critical section; it is the only code
//! that assigns queue offsets and the only code that mutates the per-queue
//! tail table.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::warn;

use crate::{
    clock::now_millis,
    codec::{BLANK_MAGIC_CODE, END_FILE_MIN_BLANK_LENGTH, MESSAGE_MAGIC_CODE, encoded_length},
    mapped_file::SegmentSlot,
    message::{
        MessageInner, TRANSACTION_PREPARED_TYPE, TRANSACTION_ROLLBACK_TYPE, create_message_id,
        host_to_bytes,
    },
};

/// Outcome of one append attempt against a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMessageStatus {
    PutOk,
    /// The segment could not hold the record; a blank trailer was written
    /// and the caller must retry on a fresh segment.
    EndOfFile,
    MessageSizeExceeded,
    PropertiesSizeExceeded,
    UnknownError,
}

/// Result of one append attempt. On `PutOk` and `EndOfFile` the byte
/// fields describe what was actually written.
#[derive(Debug, Clone)]
pub struct AppendMessageResult {
    pub status: AppendMessageStatus,
    /// Absolute physical offset the write started at.
    pub wrote_offset: u64,
    /// Bytes consumed in the segment (record length, or remaining blank).
    pub wrote_bytes: u64,
    pub msg_id: String,
    pub store_timestamp: i64,
    /// Queue offset assigned to the record.
    pub queue_offset: i64,
    pub elapsed_millis: i64,
}

impl AppendMessageResult {
    pub fn error(status: AppendMessageStatus) -> Self {
        Self {
            status,
            wrote_offset: 0,
            wrote_bytes: 0,
            msg_id: String::new(),
            store_timestamp: 0,
            queue_offset: 0,
            elapsed_millis: 0,
        }
    }

    pub fn is_ok(&self) -> bool { self.status == AppendMessageStatus::PutOk }
}

/// Per-(topic, queue) next queue offset, keyed `"{topic}-{queue_id}"`.
/// Mutated only inside the writer's critical section and during recovery.
pub type TopicQueueTable = Mutex<HashMap<String, i64>>;

/// Writes one record (or the end-of-segment filler) into the region a
/// segment hands it.
pub trait AppendCallback: Send + Sync {
    fn do_append(
        &self,
        file_from_offset: u64,
        slot: &mut SegmentSlot<'_>,
        msg: &MessageInner,
    ) -> AppendMessageResult;
}

/// Default record emitter.
pub struct DefaultAppendCallback {
    max_message_size: usize,
}

impl DefaultAppendCallback {
    pub fn new(max_message_size: usize) -> Self { Self { max_message_size } }
}

impl DefaultAppendCallback {
    /// Encode and write one record, assigning the queue offset from
    /// `table`. Prepared and rollback transaction records are written with
    /// queue offset 0 and never advance the table.
    pub fn append(
        &self,
        table: &TopicQueueTable,
        file_from_offset: u64,
        slot: &mut SegmentSlot<'_>,
        msg: &MessageInner,
    ) -> AppendMessageResult {
        let begin = now_millis();
        let wrote_offset = file_from_offset + slot.offset_in_file();
        let max_blank = slot.remaining();

        let msg_id = create_message_id(&msg.store_host, wrote_offset);

        let key = format!("{}-{}", msg.topic, msg.queue_id);
        let mut queue_offset = {
            let mut table = table.lock();
            *table.entry(key.clone()).or_insert(0)
        };

        let tran_type = msg.transaction_type();
        if matches!(
            tran_type,
            TRANSACTION_PREPARED_TYPE | TRANSACTION_ROLLBACK_TYPE
        ) {
            // Neither prepared nor rollback records are consumable; they
            // carry no queue position.
            queue_offset = 0;
        }

        let properties = msg.properties_string();
        let properties_data = properties.as_bytes();
        if properties_data.len() > i16::MAX as usize {
            warn!(
                length = properties_data.len(),
                "message properties length too long"
            );
            return AppendMessageResult::error(AppendMessageStatus::PropertiesSizeExceeded);
        }

        let topic_data = msg.topic.as_bytes();
        let body_len = msg.body.len();
        let msg_len = encoded_length(body_len, topic_data.len(), properties_data.len());

        if msg_len > self.max_message_size {
            warn!(
                msg_len,
                body_len,
                max = self.max_message_size,
                "message size exceeded"
            );
            return AppendMessageResult::error(AppendMessageStatus::MessageSizeExceeded);
        }

        // The record plus the minimum trailer header must fit; otherwise
        // seal the segment with a blank trailer.
        if msg_len + END_FILE_MIN_BLANK_LENGTH > max_blank {
            let mut trailer = BytesMut::with_capacity(END_FILE_MIN_BLANK_LENGTH);
            trailer.put_i32(max_blank as i32);
            trailer.put_u32(BLANK_MAGIC_CODE);
            if let Err(e) = slot.put(&trailer) {
                warn!(error = ?e, "failed to write end-of-segment trailer");
                return AppendMessageResult::error(AppendMessageStatus::UnknownError);
            }
            return AppendMessageResult {
                status: AppendMessageStatus::EndOfFile,
                wrote_offset,
                wrote_bytes: max_blank as u64,
                msg_id,
                store_timestamp: msg.store_timestamp,
                queue_offset,
                elapsed_millis: now_millis() - begin,
            };
        }

        let mut record = BytesMut::with_capacity(msg_len);
        record.put_i32(msg_len as i32);
        record.put_u32(MESSAGE_MAGIC_CODE);
        record.put_u32(msg.body_crc);
        record.put_i32(msg.queue_id);
        record.put_i32(msg.flag);
        record.put_i64(queue_offset);
        record.put_i64(wrote_offset as i64);
        record.put_i32(msg.sys_flag);
        record.put_i64(msg.born_timestamp);
        record.put_slice(&host_to_bytes(&msg.born_host));
        record.put_i64(msg.store_timestamp);
        record.put_slice(&host_to_bytes(&msg.store_host));
        record.put_i32(msg.reconsume_times);
        record.put_i64(msg.prepared_transaction_offset);
        record.put_i32(body_len as i32);
        record.put_slice(&msg.body);
        record.put_u8(topic_data.len() as u8);
        record.put_slice(topic_data);
        record.put_i16(properties_data.len() as i16);
        record.put_slice(properties_data);
        debug_assert_eq!(record.len(), msg_len);

        if let Err(e) = slot.put(&record) {
            warn!(error = ?e, "failed to write record");
            return AppendMessageResult::error(AppendMessageStatus::UnknownError);
        }

        if !matches!(
            tran_type,
            TRANSACTION_PREPARED_TYPE | TRANSACTION_ROLLBACK_TYPE
        ) {
            table.lock().insert(key, queue_offset + 1);
        }

        AppendMessageResult {
            status: AppendMessageStatus::PutOk,
            wrote_offset,
            wrote_bytes: msg_len as u64,
            msg_id,
            store_timestamp: msg.store_timestamp,
            queue_offset,
            elapsed_millis: now_millis() - begin,
        }
    }
}

/// Binds the callback to a queue table so segments can invoke it through
/// the object-safe [`AppendCallback`] seam.
pub struct BoundAppendCallback<'a> {
    pub callback: &'a DefaultAppendCallback,
    pub table:    &'a TopicQueueTable,
}

impl AppendCallback for BoundAppendCallback<'_> {
    fn do_append(
        &self,
        file_from_offset: u64,
        slot: &mut SegmentSlot<'_>,
        msg: &MessageInner,
    ) -> AppendMessageResult {
        self.callback.append(self.table, file_from_offset, slot, msg)
    }
}

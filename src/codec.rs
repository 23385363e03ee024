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

//! On-disk record layout: field widths, magic values, the encoded-length
//! formula and the decoder used by reads and recovery.
//!
//! A record is a contiguous run of big-endian fields:
//!
//! ```text
//! total_size:4 magic:4 body_crc:4 queue_id:4 flag:4 queue_offset:8
//! physical_offset:8 sys_flag:4 born_timestamp:8 born_host:8
//! store_timestamp:8 store_host:8 reconsume_times:4 prep_txn_offset:8
//! body_len:4 body:N topic_len:1 topic:M props_len:2 props:P
//! ```
//!
//! When a segment cannot hold the next record plus the 8-byte trailer
//! header, a blank trailer is written instead: `total_size` = remaining
//! space, `magic` = [`BLANK_MAGIC_CODE`], rest of the segment
//! uninterpreted. Decoders treat it as end-of-segment.

use tracing::{debug, error, warn};

use crate::{
    dispatch::DispatchRequest,
    message::{
        PROPERTY_KEYS, PROPERTY_TAGS, PROPERTY_UNIQ_KEY, string_to_properties,
        tags_string_to_tags_code,
    },
};

/// Magic marking a real record. The literal wrap-around arithmetic is the
/// wire contract; see the unit test pinning the evaluated value.
pub const MESSAGE_MAGIC_CODE: u32 = 0xAABB_CCDD ^ (1880681586u32.wrapping_add(8));

/// Magic marking the blank trailer of a full segment.
pub const BLANK_MAGIC_CODE: u32 = 0xBBCC_DDEE ^ (1880681586u32.wrapping_add(8));

/// Byte offset of the magic field inside a record.
pub const MESSAGE_MAGIC_CODE_POSITION: usize = 4;

/// Byte offset of the store timestamp field inside a record.
pub const MESSAGE_STORE_TIMESTAMP_POSITION: usize = 56;

/// Fixed bytes every record carries besides body, topic and properties
/// payloads (includes their three length prefixes).
pub const RECORD_FIXED_BYTES: usize = 4 // total_size
    + 4  // magic
    + 4  // body_crc
    + 4  // queue_id
    + 4  // flag
    + 8  // queue_offset
    + 8  // physical_offset
    + 4  // sys_flag
    + 8  // born_timestamp
    + 8  // born_host
    + 8  // store_timestamp
    + 8  // store_host
    + 4  // reconsume_times
    + 8  // prep_txn_offset
    + 4  // body_len
    + 1  // topic_len
    + 2; // props_len

/// A full segment must at least hold the blank trailer header.
pub const END_FILE_MIN_BLANK_LENGTH: usize = 4 + 4;

/// Exact encoded length of a record with the given payload sizes.
#[inline]
pub const fn encoded_length(body_len: usize, topic_len: usize, props_len: usize) -> usize {
    RECORD_FIXED_BYTES + body_len + topic_len + props_len
}

/// Decode one record starting at the beginning of `buffer`.
///
/// Returns a [`DispatchRequest`] whose `msg_size` is the record length on
/// success, `0` on the blank trailer (do not advance past its header) and
/// `-1` when the bytes are not a decodable record. `check_crc` validates
/// the body CRC; `read_body` may be disabled to skip the body when the
/// caller only needs metadata.
pub fn check_message_and_return_size(
    buffer: &[u8],
    check_crc: bool,
    read_body: bool,
) -> DispatchRequest {
    match try_decode(buffer, check_crc, read_body) {
        Some(request) => request,
        None => {
            debug!(len = buffer.len(), "record decode ran off the end of the buffer");
            DispatchRequest::sentinel(-1, false)
        }
    }
}

fn try_decode(buffer: &[u8], check_crc: bool, read_body: bool) -> Option<DispatchRequest> {
    let mut cursor = Cursor::new(buffer);

    let total_size = cursor.get_i32()?;
    let magic = cursor.get_u32()?;
    match magic {
        MESSAGE_MAGIC_CODE => {}
        BLANK_MAGIC_CODE => return Some(DispatchRequest::sentinel(0, true)),
        other => {
            warn!("found an illegal magic code {other:#010x}");
            return Some(DispatchRequest::sentinel(-1, false));
        }
    }

    let body_crc = cursor.get_u32()?;
    let queue_id = cursor.get_i32()?;
    let _flag = cursor.get_i32()?;
    let queue_offset = cursor.get_i64()?;
    let physical_offset = cursor.get_i64()?;
    let sys_flag = cursor.get_i32()?;
    let _born_timestamp = cursor.get_i64()?;
    cursor.skip(8)?; // born_host
    let store_timestamp = cursor.get_i64()?;
    cursor.skip(8)?; // store_host
    let _reconsume_times = cursor.get_i32()?;
    let prepared_transaction_offset = cursor.get_i64()?;

    let body_len = cursor.get_i32()?;
    if body_len > 0 {
        if read_body {
            let body = cursor.get_bytes(body_len as usize)?;
            if check_crc {
                let crc = crc32fast::hash(body);
                if crc != body_crc {
                    warn!(stored = body_crc, computed = crc, "body CRC check failed");
                    return Some(DispatchRequest::sentinel(-1, false));
                }
            }
        } else {
            cursor.skip(body_len as usize)?;
        }
    }

    let topic_len = cursor.get_u8()? as usize;
    let topic_bytes = cursor.get_bytes(topic_len)?;
    let topic = String::from_utf8_lossy(topic_bytes).into_owned();

    let mut tags_code = 0i64;
    let mut keys = String::new();
    let mut uniq_key = None;

    let props_len = cursor.get_i16()?;
    if props_len > 0 {
        let props_bytes = cursor.get_bytes(props_len as usize)?;
        let encoded = String::from_utf8_lossy(props_bytes);
        let properties = string_to_properties(&encoded);

        if let Some(k) = properties.get(PROPERTY_KEYS) {
            keys = k.clone();
        }
        uniq_key = properties.get(PROPERTY_UNIQ_KEY).cloned();
        if let Some(tags) = properties.get(PROPERTY_TAGS) {
            if !tags.is_empty() {
                tags_code = tags_string_to_tags_code(tags);
            }
        }
    }

    let read_length = encoded_length(
        body_len.max(0) as usize,
        topic_len,
        props_len.max(0) as usize,
    );
    if total_size as usize != read_length {
        error!(
            total_size,
            read_length, body_len, topic_len, props_len,
            "read total count not equal to record total size"
        );
        return Some(DispatchRequest::sentinel(total_size, false));
    }

    Some(DispatchRequest::new(
        topic,
        queue_id,
        physical_offset as u64,
        total_size,
        tags_code,
        store_timestamp,
        queue_offset,
        keys,
        uniq_key,
        sys_flag,
        prepared_transaction_offset,
    ))
}

/// Bounds-checked big-endian reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    fn get_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        if end > self.buf.len() {
            return None;
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Some(out)
    }

    fn skip(&mut self, len: usize) -> Option<()> {
        self.get_bytes(len).map(|_| ())
    }

    fn get_u8(&mut self) -> Option<u8> { self.get_bytes(1).map(|b| b[0]) }

    fn get_i16(&mut self) -> Option<i16> {
        self.get_bytes(2)
            .map(|b| i16::from_be_bytes(b.try_into().unwrap()))
    }

    fn get_i32(&mut self) -> Option<i32> {
        self.get_bytes(4)
            .map(|b| i32::from_be_bytes(b.try_into().unwrap()))
    }

    fn get_u32(&mut self) -> Option<u32> {
        self.get_bytes(4)
            .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
    }

    fn get_i64(&mut self) -> Option<i64> {
        self.get_bytes(8)
            .map(|b| i64::from_be_bytes(b.try_into().unwrap()))
    }
}

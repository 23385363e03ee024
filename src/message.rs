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

//! Broker-internal message representation and the small codecs attached to
//! it: the properties string, the packed host address, the message id and
//! the tags hash.
//!
//! Properties travel inside the record as a single string of
//! `key 0x01 value 0x02` pairs. The message id is the 8-byte packed store
//! host followed by the 8-byte physical offset, rendered as hex, so a
//! consumer can locate the record from the id alone.

use std::{collections::BTreeMap, net::SocketAddrV4};

use bytes::Bytes;

/// Separates a property key from its value inside the encoded string.
pub const NAME_VALUE_SEPARATOR: char = '\u{1}';
/// Separates encoded properties from each other.
pub const PROPERTY_SEPARATOR: char = '\u{2}';

pub const PROPERTY_KEYS: &str = "KEYS";
pub const PROPERTY_TAGS: &str = "TAGS";
pub const PROPERTY_WAIT_STORE_MSG_OK: &str = "WAIT";
pub const PROPERTY_DELAY_TIME_LEVEL: &str = "DELAY";
pub const PROPERTY_REAL_TOPIC: &str = "REAL_TOPIC";
pub const PROPERTY_REAL_QUEUE_ID: &str = "REAL_QID";
pub const PROPERTY_UNIQ_KEY: &str = "UNIQ_KEY";

/// Topic that scheduled (delayed) messages are parked under until the
/// scheduler redelivers them.
pub const SCHEDULE_TOPIC: &str = "SCHEDULE_TOPIC_XXXX";

/// Transaction type bits inside `sys_flag`.
pub const TRANSACTION_NOT_TYPE: i32 = 0;
pub const TRANSACTION_PREPARED_TYPE: i32 = 0x4;
pub const TRANSACTION_COMMIT_TYPE: i32 = 0x8;
pub const TRANSACTION_ROLLBACK_TYPE: i32 = 0xC;

/// Extract the transaction type bits from a `sys_flag` value.
#[inline]
pub fn transaction_value(sys_flag: i32) -> i32 { sys_flag & TRANSACTION_ROLLBACK_TYPE }

/// A message as the broker stores it: producer fields plus the metadata
/// stamped on the append path.
#[derive(Debug, Clone)]
pub struct MessageInner {
    pub topic:    String,
    pub queue_id: i32,
    /// Opaque application flag, stored verbatim.
    pub flag:     i32,
    pub body:     Bytes,
    /// Bitfield carrying transaction type, compression, etc.
    pub sys_flag: i32,
    /// Producer clock at send time, ms.
    pub born_timestamp: i64,
    pub born_host:      SocketAddrV4,
    /// Broker clock at enqueue, ms. Re-stamped under the writer lock.
    pub store_timestamp: i64,
    pub store_host:      SocketAddrV4,
    /// Redelivery counter.
    pub reconsume_times: i32,
    /// Physical offset of the prepared record this one resolves.
    pub prepared_transaction_offset: i64,
    /// CRC-32 of the body, computed on the put path.
    pub body_crc:   u32,
    properties: BTreeMap<String, String>,
}

impl MessageInner {
    pub fn new(topic: impl Into<String>, queue_id: i32, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            queue_id,
            flag: 0,
            body: body.into(),
            sys_flag: 0,
            born_timestamp: 0,
            born_host: SocketAddrV4::new([0, 0, 0, 0].into(), 0),
            store_timestamp: 0,
            store_host: SocketAddrV4::new([0, 0, 0, 0].into(), 0),
            reconsume_times: 0,
            prepared_transaction_offset: 0,
            body_crc: 0,
            properties: BTreeMap::new(),
        }
    }

    pub fn put_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> { &self.properties }

    /// Encoded form of the properties map as stored in the record.
    pub fn properties_string(&self) -> String { properties_to_string(&self.properties) }

    /// Transaction type bits of this message.
    pub fn transaction_type(&self) -> i32 { transaction_value(self.sys_flag) }

    /// Delay level requested by the producer, 0 when immediate.
    pub fn delay_time_level(&self) -> i32 {
        self.property(PROPERTY_DELAY_TIME_LEVEL)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_delay_time_level(&mut self, level: i32) {
        self.put_property(PROPERTY_DELAY_TIME_LEVEL, level.to_string());
    }

    /// Whether the producer asked to wait for the store (and replica) ack.
    /// Absent property means yes.
    pub fn wait_store_msg_ok(&self) -> bool {
        self.property(PROPERTY_WAIT_STORE_MSG_OK)
            .map(|v| v.parse().unwrap_or(true))
            .unwrap_or(true)
    }

    pub fn tags(&self) -> Option<&str> { self.property(PROPERTY_TAGS) }
}

/// Encode a properties map into the on-disk string form.
pub fn properties_to_string(properties: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in properties {
        out.push_str(key);
        out.push(NAME_VALUE_SEPARATOR);
        out.push_str(value);
        out.push(PROPERTY_SEPARATOR);
    }
    out
}

/// Decode the on-disk properties string back into a map. Entries without a
/// value separator are dropped.
pub fn string_to_properties(encoded: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for item in encoded.split(PROPERTY_SEPARATOR) {
        if item.is_empty() {
            continue;
        }
        if let Some((key, value)) = item.split_once(NAME_VALUE_SEPARATOR) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// Pack an IPv4 host address into the 8-byte record field: four address
/// octets followed by the port as a big-endian u32.
pub fn host_to_bytes(addr: &SocketAddrV4) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&addr.ip().octets());
    out[4..].copy_from_slice(&u32::from(addr.port()).to_be_bytes());
    out
}

/// Build a message id from the packed store host and the physical offset
/// of the record, rendered as 32 uppercase hex characters.
pub fn create_message_id(store_host: &SocketAddrV4, wrote_offset: u64) -> String {
    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&host_to_bytes(store_host));
    raw[8..].copy_from_slice(&wrote_offset.to_be_bytes());

    let mut id = String::with_capacity(32);
    for byte in raw {
        id.push_str(&format!("{byte:02X}"));
    }
    id
}

/// Parse a message id back into its packed host bytes and physical offset.
pub fn decode_message_id(id: &str) -> Option<([u8; 8], u64)> {
    if id.len() != 32 {
        return None;
    }
    let mut raw = [0u8; 16];
    for (i, chunk) in raw.iter_mut().enumerate() {
        *chunk = u8::from_str_radix(&id[i * 2..i * 2 + 2], 16).ok()?;
    }
    let mut host = [0u8; 8];
    host.copy_from_slice(&raw[..8]);
    let offset = u64::from_be_bytes(raw[8..].try_into().unwrap());
    Some((host, offset))
}

/// Hash a tags string into the code stored in the consume queue. The
/// 31-based rolling hash over UTF-16 units keeps codes stable across
/// brokers regardless of platform.
pub fn tags_string_to_tags_code(tags: &str) -> i64 {
    let mut hash: i32 = 0;
    for unit in tags.encode_utf16() {
        hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
    }
    hash as i64
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_properties_roundtrip() {
        let mut msg = MessageInner::new("T", 0, Bytes::from("x"));
        msg.put_property(PROPERTY_TAGS, "TagA");
        msg.put_property(PROPERTY_KEYS, "order-42");

        let encoded = msg.properties_string();
        let decoded = string_to_properties(&encoded);

        assert_eq!(decoded.get(PROPERTY_TAGS).unwrap(), "TagA");
        assert_eq!(decoded.get(PROPERTY_KEYS).unwrap(), "order-42");
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_string_to_properties_skips_malformed() {
        let decoded = string_to_properties("novalue\u{2}k\u{1}v\u{2}");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("k").unwrap(), "v");
    }

    #[test]
    fn test_host_to_bytes() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 10911);
        let bytes = host_to_bytes(&addr);
        assert_eq!(&bytes[..4], &[10, 0, 0, 1]);
        assert_eq!(u32::from_be_bytes(bytes[4..].try_into().unwrap()), 10911);
    }

    #[test]
    fn test_message_id_roundtrip() {
        let host = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 7), 10911);
        let id = create_message_id(&host, 0x1234_5678_9ABC);

        assert_eq!(id.len(), 32);
        let (host_bytes, offset) = decode_message_id(&id).unwrap();
        assert_eq!(host_bytes, host_to_bytes(&host));
        assert_eq!(offset, 0x1234_5678_9ABC);
    }

    #[test]
    fn test_tags_code_matches_reference_hash() {
        // Reference value of the 31-based rolling hash over "TagA".
        assert_eq!(tags_string_to_tags_code("TagA"), 2598919);
        assert_eq!(tags_string_to_tags_code(""), 0);
    }

    #[test]
    fn test_wait_store_msg_ok_defaults_true() {
        let mut msg = MessageInner::new("T", 0, Bytes::from("x"));
        assert!(msg.wait_store_msg_ok());

        msg.put_property(PROPERTY_WAIT_STORE_MSG_OK, "false");
        assert!(!msg.wait_store_msg_ok());
    }

    #[test]
    fn test_transaction_value() {
        assert_eq!(transaction_value(0), TRANSACTION_NOT_TYPE);
        assert_eq!(transaction_value(0x4 | 0x1), TRANSACTION_PREPARED_TYPE);
        assert_eq!(transaction_value(0xC), TRANSACTION_ROLLBACK_TYPE);
    }

    #[test]
    fn test_delay_time_level() {
        let mut msg = MessageInner::new("orders", 1, Bytes::from("x"));
        assert_eq!(msg.delay_time_level(), 0);
        msg.set_delay_time_level(3);
        assert_eq!(msg.delay_time_level(), 3);
    }
}

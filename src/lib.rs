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

//! Append-only commit log for a persistent message broker.
//!
//! Every produced message is serialized into this log before any consume
//! queue or index entry is built, making the log the broker's system of
//! record: after a crash, all derived state is rebuilt by replaying it.
//!
//! Features:
//! - Bit-exact binary record layout over memory-mapped, fixed-size
//!   segments named by their base offset
//! - Single-writer append path (spin or blocking lock) with per-queue
//!   offset assignment
//! - Async flush, transient-pool commit, and group-commit (sync flush)
//!   durability services
//! - Normal and abnormal recovery with dirty-tail truncation and replay
//!   into the downstream dispatch pipeline
//! - Rendezvous-based replication waits for sync-master brokers

mod clock;
mod service;

pub mod append;
pub mod checkpoint;
pub mod codec;
pub mod commit_log;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flush;
pub mod ha;
pub mod lock;
pub mod mapped_file;
pub mod mapped_file_queue;
pub mod message;

pub use append::{AppendMessageResult, AppendMessageStatus};
pub use checkpoint::StoreCheckpoint;
pub use commit_log::{CommitLog, PutMessageResult, PutMessageStatus};
pub use config::{BrokerRole, FlushDiskType, StoreConfig};
pub use dispatch::{DispatchRequest, MessageDispatcher};
pub use error::{Error, Result};
pub use flush::GroupCommitRequest;
pub use ha::HighAvailability;
pub use mapped_file::{MappedFile, MappedSlice};
pub use mapped_file_queue::MappedFileQueue;
pub use message::MessageInner;

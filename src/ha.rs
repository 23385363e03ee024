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

//! Seam to the replication transport.
//!
//! A sync-master broker hands the same [`GroupCommitRequest`] rendezvous
//! used for disk flushes to the HA service and waits until the replica has
//! acknowledged up to the target offset. The transport itself lives
//! outside this crate.

use std::sync::Arc;

use crate::flush::GroupCommitRequest;

pub trait HighAvailability: Send + Sync {
    /// Whether the replica's acknowledged offset is close enough to
    /// `target_offset` to be worth waiting on.
    fn is_slave_ok(&self, target_offset: u64) -> bool;

    /// Register a rendezvous to be completed once the replica has
    /// acknowledged `request.next_offset()`.
    fn put_request(&self, request: Arc<GroupCommitRequest>);

    /// Kick the transfer threads so newly written bytes ship immediately.
    fn notify_waiters(&self);
}

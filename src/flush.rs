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

//! Background durability services.
//!
//! Three cooperating loops, selected by configuration:
//!
//! - [`FlushRealTimeService`]: periodic page flush for async durability,
//!   with a "least pages" gate and a "thorough interval" ceiling on how
//!   long that gate may defer work.
//! - [`CommitRealTimeService`]: when the transient store pool is enabled,
//!   copies buffered pages into the mapped region and pokes the flush
//!   service whenever it moved data.
//! - [`GroupCommitService`]: sync durability. Producers enqueue a target
//!   offset and block on a one-shot rendezvous; the service coalesces all
//!   waiters onto forced flushes using a double-buffered request list, so
//!   producers never hold the list the service is draining.

use std::{sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};
use tracing::{error, info, warn};

use crate::{
    checkpoint::StoreCheckpoint,
    clock::now_millis,
    config::StoreConfig,
    mapped_file_queue::MappedFileQueue,
    service::ServiceState,
};

/// Shutdown drains retry the final flush/commit this many times.
const RETRY_TIMES_OVER: usize = 10;

/// A producer's rendezvous with the group-commit service: filled once with
/// the flush outcome for `next_offset`.
pub struct GroupCommitRequest {
    /// First offset past the record; flushed-through must reach it.
    next_offset: u64,
    completed:   Mutex<Option<bool>>,
    cond:        Condvar,
}

impl GroupCommitRequest {
    pub fn new(next_offset: u64) -> Self {
        Self {
            next_offset,
            completed: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub fn next_offset(&self) -> u64 { self.next_offset }

    /// Deliver the flush outcome and release the waiting producer.
    pub fn wakeup_customer(&self, flush_ok: bool) {
        let mut completed = self.completed.lock();
        *completed = Some(flush_ok);
        self.cond.notify_all();
    }

    /// Block until the outcome arrives or the timeout passes. A timeout
    /// reads as a failed flush; the record itself stays written.
    pub fn wait_for_flush(&self, timeout: Duration) -> bool {
        let mut completed = self.completed.lock();
        if completed.is_none() {
            self.cond.wait_for(&mut completed, timeout);
        }
        completed.unwrap_or(false)
    }
}

/// Sync-flush rendezvous service.
pub struct GroupCommitService {
    mapped_file_queue: Arc<MappedFileQueue>,
    checkpoint:        Arc<StoreCheckpoint>,
    state:             Arc<ServiceState>,
    /// Producers append here; the service swaps the whole list out before
    /// draining it.
    requests_write: Mutex<Vec<Arc<GroupCommitRequest>>>,
}

impl GroupCommitService {
    pub fn new(mapped_file_queue: Arc<MappedFileQueue>, checkpoint: Arc<StoreCheckpoint>) -> Self {
        Self {
            mapped_file_queue,
            checkpoint,
            state: Arc::new(ServiceState::new()),
            requests_write: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn state_handle(&self) -> Arc<ServiceState> { self.state.clone() }

    /// Enqueue a rendezvous and wake the service.
    pub fn put_request(&self, request: Arc<GroupCommitRequest>) {
        self.requests_write.lock().push(request);
        self.state.wakeup();
    }

    pub fn wakeup(&self) { self.state.wakeup(); }

    pub fn shutdown(&self) { self.state.shutdown(); }

    fn swap_requests(&self, backlog: &mut Vec<Arc<GroupCommitRequest>>) {
        let mut write = self.requests_write.lock();
        std::mem::swap(&mut *write, backlog);
    }

    fn do_commit(&self, backlog: &mut Vec<Arc<GroupCommitRequest>>) {
        if backlog.is_empty() {
            // Messages appended without wait-store-ok still rely on this
            // forced flush.
            if let Err(e) = self.mapped_file_queue.flush(0) {
                warn!(error = ?e, "group commit idle flush failed");
            }
            return;
        }

        for request in backlog.drain(..) {
            // A record can straddle at most two segments, so two forced
            // flushes always cover the target offset.
            let mut flush_ok = false;
            for _ in 0..2 {
                flush_ok = self.mapped_file_queue.flushed_where() >= request.next_offset();
                if flush_ok {
                    break;
                }
                if let Err(e) = self.mapped_file_queue.flush(0) {
                    warn!(error = ?e, "group commit flush failed");
                }
            }
            request.wakeup_customer(flush_ok);
        }

        let timestamp = self.mapped_file_queue.store_timestamp();
        if timestamp > 0 {
            self.checkpoint.set_physic_msg_timestamp(timestamp);
        }
    }

    pub fn run(&self) {
        info!("group commit service started");

        let mut backlog = Vec::new();
        while !self.state.is_stopped() {
            self.state.wait_for_running(Duration::from_millis(10));
            self.swap_requests(&mut backlog);
            self.do_commit(&mut backlog);
        }

        // Give producers racing shutdown a moment to enqueue, then drain
        // once more so nobody stays parked on a rendezvous.
        std::thread::sleep(Duration::from_millis(10));
        self.swap_requests(&mut backlog);
        self.do_commit(&mut backlog);

        info!("group commit service stopped");
    }
}

/// Async flush loop.
pub struct FlushRealTimeService {
    mapped_file_queue: Arc<MappedFileQueue>,
    checkpoint:        Arc<StoreCheckpoint>,
    config:            Arc<StoreConfig>,
    state:             Arc<ServiceState>,
}

impl FlushRealTimeService {
    pub fn new(
        mapped_file_queue: Arc<MappedFileQueue>,
        checkpoint: Arc<StoreCheckpoint>,
        config: Arc<StoreConfig>,
    ) -> Self {
        Self {
            mapped_file_queue,
            checkpoint,
            config,
            state: Arc::new(ServiceState::new()),
        }
    }

    pub(crate) fn state_handle(&self) -> Arc<ServiceState> { self.state.clone() }

    pub fn wakeup(&self) { self.state.wakeup(); }

    pub fn shutdown(&self) { self.state.shutdown(); }

    pub fn run(&self) {
        info!("flush service started");

        let mut last_flush_timestamp = 0i64;
        while !self.state.is_stopped() {
            let interval = Duration::from_millis(self.config.flush_interval_millis);
            let mut least_pages = self.config.flush_least_pages;
            let thorough = self.config.flush_thorough_interval_millis as i64;

            let now = now_millis();
            if now >= last_flush_timestamp + thorough {
                last_flush_timestamp = now;
                least_pages = 0;
            }

            if self.config.flush_commitlog_timed {
                std::thread::sleep(interval);
            } else {
                self.state.wait_for_running(interval);
            }

            let begin = now_millis();
            match self.mapped_file_queue.flush(least_pages) {
                Ok(_) => {
                    let timestamp = self.mapped_file_queue.store_timestamp();
                    if timestamp > 0 {
                        self.checkpoint.set_physic_msg_timestamp(timestamp);
                    }
                }
                Err(e) => warn!(error = ?e, "flush service pass failed"),
            }
            let past = now_millis() - begin;
            if past > 500 {
                info!(cost_millis = past, "flush data to disk was slow");
            }
        }

        // Normal shutdown: everything must be flushed before exit.
        let mut done = false;
        for attempt in 0..RETRY_TIMES_OVER {
            done = self.mapped_file_queue.flush(0).unwrap_or(false);
            info!(
                attempt = attempt + 1,
                done, "flush service shutdown retry"
            );
            if done {
                break;
            }
        }

        info!("flush service stopped");
    }
}

/// Transient-pool commit loop: moves buffered bytes into the mapped
/// region so the flush service can persist them.
pub struct CommitRealTimeService {
    mapped_file_queue: Arc<MappedFileQueue>,
    config:            Arc<StoreConfig>,
    state:             Arc<ServiceState>,
    /// Wakes the flush service whenever a pass committed data.
    flush_state: Arc<ServiceState>,
}

impl CommitRealTimeService {
    pub fn new(
        mapped_file_queue: Arc<MappedFileQueue>,
        config: Arc<StoreConfig>,
        flush_state: Arc<ServiceState>,
    ) -> Self {
        Self {
            mapped_file_queue,
            config,
            state: Arc::new(ServiceState::new()),
            flush_state,
        }
    }

    pub fn wakeup(&self) { self.state.wakeup(); }

    pub fn shutdown(&self) { self.state.shutdown(); }

    pub fn run(&self) {
        info!("commit service started");

        let mut last_commit_timestamp = 0i64;
        while !self.state.is_stopped() {
            let interval = Duration::from_millis(self.config.commit_interval_millis);
            let mut least_pages = self.config.commit_least_pages;
            let thorough = self.config.commit_thorough_interval_millis as i64;

            let begin = now_millis();
            if begin >= last_commit_timestamp + thorough {
                last_commit_timestamp = begin;
                least_pages = 0;
            }

            match self.mapped_file_queue.commit(least_pages) {
                Ok(nothing_committed) => {
                    let end = now_millis();
                    if !nothing_committed {
                        last_commit_timestamp = end;
                        self.flush_state.wakeup();
                    }
                    if end - begin > 500 {
                        info!(cost_millis = end - begin, "commit data to file was slow");
                    }
                }
                Err(e) => error!(error = ?e, "commit service pass failed"),
            }

            self.state.wait_for_running(interval);
        }

        let mut done = false;
        for attempt in 0..RETRY_TIMES_OVER {
            done = self.mapped_file_queue.commit(0).unwrap_or(false);
            info!(
                attempt = attempt + 1,
                done, "commit service shutdown retry"
            );
            if done {
                break;
            }
        }

        info!("commit service stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tempfile::TempDir;

    use super::*;

    fn small_queue(dir: &TempDir) -> Arc<MappedFileQueue> {
        Arc::new(MappedFileQueue::new(dir.path().to_path_buf(), 4096, false))
    }

    #[test]
    fn test_request_rendezvous() {
        let request = Arc::new(GroupCommitRequest::new(100));
        let waiter = {
            let request = request.clone();
            std::thread::spawn(move || request.wait_for_flush(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(10));
        request.wakeup_customer(true);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_request_timeout_reads_as_failure() {
        let request = GroupCommitRequest::new(100);
        let begin = Instant::now();
        assert!(!request.wait_for_flush(Duration::from_millis(50)));
        assert!(begin.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_group_commit_flushes_through_target() {
        let dir = TempDir::new().unwrap();
        let queue = small_queue(&dir);
        let file = queue.last_mapped_file_or_create(0).unwrap();
        file.append_bytes(&[7u8; 128]);

        let service = Arc::new(GroupCommitService::new(
            queue.clone(),
            Arc::new(StoreCheckpoint::new()),
        ));
        let runner = {
            let service = service.clone();
            std::thread::spawn(move || service.run())
        };

        let request = Arc::new(GroupCommitRequest::new(128));
        service.put_request(request.clone());
        assert!(request.wait_for_flush(Duration::from_secs(5)));
        assert_eq!(queue.flushed_where(), 128);

        service.shutdown();
        runner.join().unwrap();
    }

    #[test]
    fn test_group_commit_shutdown_drains_waiters() {
        let dir = TempDir::new().unwrap();
        let queue = small_queue(&dir);
        let file = queue.last_mapped_file_or_create(0).unwrap();
        file.append_bytes(&[7u8; 64]);

        let service = Arc::new(GroupCommitService::new(
            queue.clone(),
            Arc::new(StoreCheckpoint::new()),
        ));

        // Enqueue before the loop even starts; the shutdown drain must
        // still complete the rendezvous.
        let request = Arc::new(GroupCommitRequest::new(64));
        service.put_request(request.clone());
        service.shutdown();
        service.run();

        assert!(request.wait_for_flush(Duration::from_millis(100)));
    }
}

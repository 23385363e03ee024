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

//! Shared wait/notify primitive for the background services.
//!
//! A service parks in [`ServiceState::wait_for_running`] between passes;
//! producers call [`ServiceState::wakeup`] after appending so the pass
//! starts immediately instead of at the next tick. Wakeups coalesce: any
//! number of wakeups while a pass is running result in exactly one
//! immediate follow-up pass.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
pub(crate) struct ServiceState {
    notified: AtomicBool,
    stopped:  AtomicBool,
    guard:    Mutex<()>,
    cond:     Condvar,
}

impl ServiceState {
    pub fn new() -> Self { Self::default() }

    /// Request an immediate pass.
    pub fn wakeup(&self) {
        if !self.notified.swap(true, Ordering::AcqRel) {
            let _guard = self.guard.lock();
            self.cond.notify_all();
        }
    }

    /// Park until woken or `interval` elapses. A wakeup delivered while
    /// the previous pass was still running returns immediately.
    pub fn wait_for_running(&self, interval: Duration) {
        if self
            .notified
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }

        let mut guard = self.guard.lock();
        if !self.notified.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire) {
            self.cond.wait_for(&mut guard, interval);
        }
        drop(guard);
        self.notified.store(false, Ordering::Release);
    }

    /// Flag the service for shutdown and wake it so the loop can exit.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wakeup();
    }

    pub fn is_stopped(&self) -> bool { self.stopped.load(Ordering::Acquire) }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Instant};

    use super::*;

    #[test]
    fn test_wait_times_out() {
        let state = ServiceState::new();
        let begin = Instant::now();
        state.wait_for_running(Duration::from_millis(20));
        assert!(begin.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_wakeup_interrupts_wait() {
        let state = Arc::new(ServiceState::new());
        let waiter = {
            let state = state.clone();
            std::thread::spawn(move || {
                let begin = Instant::now();
                state.wait_for_running(Duration::from_secs(5));
                begin.elapsed()
            })
        };

        std::thread::sleep(Duration::from_millis(30));
        state.wakeup();
        let waited = waiter.join().unwrap();
        assert!(waited < Duration::from_secs(1));
    }

    #[test]
    fn test_pending_wakeup_skips_next_wait() {
        let state = ServiceState::new();
        state.wakeup();

        let begin = Instant::now();
        state.wait_for_running(Duration::from_secs(5));
        assert!(begin.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_shutdown_unblocks_waiter() {
        let state = Arc::new(ServiceState::new());
        let waiter = {
            let state = state.clone();
            std::thread::spawn(move || state.wait_for_running(Duration::from_secs(5)))
        };

        std::thread::sleep(Duration::from_millis(20));
        state.shutdown();
        waiter.join().unwrap();
        assert!(state.is_stopped());
    }
}

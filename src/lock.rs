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

//! Writer serialization for the append path.
//!
//! Exactly one thread may run the append critical section at a time. Two
//! interchangeable disciplines: a spin lock for short, contended bursts,
//! and a blocking (non-fair) lock for workloads where parking the thread
//! is cheaper than spinning.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

/// Serializes writers on the append path.
pub trait PutMessageLock: Send + Sync {
    fn lock(&self);
    fn unlock(&self);
}

/// Busy-waits on a compare-and-set claim word.
#[derive(Default)]
pub struct SpinLock {
    available: AtomicBool,
}

impl SpinLock {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
        }
    }
}

impl PutMessageLock for SpinLock {
    fn lock(&self) {
        while self
            .available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.available.store(true, Ordering::Release);
    }
}

/// Parks contending writers on a condition variable. Wakeup order is
/// whatever the OS hands back; fairness is not guaranteed.
#[derive(Default)]
pub struct BlockingLock {
    locked: Mutex<bool>,
    cond:   Condvar,
}

impl BlockingLock {
    pub fn new() -> Self { Self::default() }
}

impl PutMessageLock for BlockingLock {
    fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.cond.wait(&mut locked);
        }
        *locked = true;
    }

    fn unlock(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        self.cond.notify_one();
    }
}

/// Select the lock implementation from configuration.
pub fn new_put_message_lock(use_mutex: bool) -> Box<dyn PutMessageLock> {
    if use_mutex {
        Box::new(BlockingLock::new())
    } else {
        Box::new(SpinLock::new())
    }
}

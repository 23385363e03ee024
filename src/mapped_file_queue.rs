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

//! Ordered container of commit-log segments.
//!
//! Segments are fixed-size files named by their base physical offset, so
//! the logical log is the concatenation of the files sorted by name. The
//! container owns the log-wide `flushed_where` / `committed_where`
//! pointers; flushing and committing always target the segment those
//! pointers fall into.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::{
    clock::now_millis,
    error::Result,
    mapped_file::MappedFile,
};

/// Upper bound on segments reclaimed by one expiration pass.
const DELETE_FILES_BATCH_MAX: usize = 10;

pub struct MappedFileQueue {
    store_path:       PathBuf,
    mapped_file_size: u64,
    transient_pool:   bool,
    files:            RwLock<Vec<Arc<MappedFile>>>,
    /// Highest physical offset persisted to stable storage.
    flushed_where:   AtomicU64,
    /// Highest physical offset copied into the mapped region.
    committed_where: AtomicU64,
    /// Store timestamp of the newest record covered by the last full
    /// flush, fed to the store checkpoint.
    store_timestamp: AtomicI64,
}

impl MappedFileQueue {
    pub fn new(store_path: PathBuf, mapped_file_size: u64, transient_pool: bool) -> Self {
        Self {
            store_path,
            mapped_file_size,
            transient_pool,
            files: RwLock::new(Vec::new()),
            flushed_where: AtomicU64::new(0),
            committed_where: AtomicU64::new(0),
            store_timestamp: AtomicI64::new(0),
        }
    }

    /// Map every segment file found in the store directory, in offset
    /// order. A file whose length does not match the configured segment
    /// size aborts the load: the directory is not a log we wrote.
    pub fn load(&self) -> Result<()> {
        if !self.store_path.exists() {
            return Ok(());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.store_path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut files = self.files.write();
        for path in paths {
            let file = MappedFile::open(&path, self.mapped_file_size, self.transient_pool)?;
            info!(path = ?path, "loaded segment");
            files.push(Arc::new(file));
        }

        Ok(())
    }

    pub fn mapped_file_size(&self) -> u64 { self.mapped_file_size }

    /// Snapshot of the segment list, oldest first.
    pub fn mapped_files(&self) -> Vec<Arc<MappedFile>> { self.files.read().clone() }

    pub fn first_mapped_file(&self) -> Option<Arc<MappedFile>> {
        self.files.read().first().cloned()
    }

    pub fn last_mapped_file(&self) -> Option<Arc<MappedFile>> {
        self.files.read().last().cloned()
    }

    /// Newest segment, creating one when the log is empty or the newest is
    /// full. A created segment starts at `start_offset` rounded down to a
    /// segment boundary (or right after the current newest).
    pub fn last_mapped_file_or_create(&self, start_offset: u64) -> Result<Arc<MappedFile>> {
        let mut create_offset = None;

        match self.last_mapped_file() {
            None => {
                create_offset = Some(start_offset - start_offset % self.mapped_file_size);
            }
            Some(last) if last.is_full() => {
                create_offset = Some(last.base_offset() + self.mapped_file_size);
            }
            Some(last) => return Ok(last),
        }

        let base_offset = create_offset.expect("segment base offset computed above");
        let file = Arc::new(MappedFile::create(
            &self.store_path,
            base_offset,
            self.mapped_file_size,
            self.transient_pool,
        )?);
        self.files.write().push(file.clone());
        Ok(file)
    }

    /// Locate the segment whose range covers `offset`.
    pub fn find_by_offset(
        &self,
        offset: u64,
        return_first_on_miss: bool,
    ) -> Option<Arc<MappedFile>> {
        let files = self.files.read();
        let first = files.first()?;

        let index = (offset / self.mapped_file_size)
            .checked_sub(first.base_offset() / self.mapped_file_size)
            .map(|i| i as usize);
        if let Some(index) = index {
            if let Some(file) = files.get(index) {
                if offset >= file.base_offset()
                    && offset < file.base_offset() + self.mapped_file_size
                {
                    return Some(file.clone());
                }
            }
        }

        // Expired deletions can leave holes at the front; fall back to a
        // scan before giving up.
        for file in files.iter() {
            if offset >= file.base_offset() && offset < file.base_offset() + self.mapped_file_size
            {
                return Some(file.clone());
            }
        }

        if return_first_on_miss {
            warn!(offset, "offset not matched, returning first segment");
            return Some(first.clone());
        }
        None
    }

    pub fn flushed_where(&self) -> u64 { self.flushed_where.load(Ordering::Acquire) }

    pub fn set_flushed_where(&self, offset: u64) {
        self.flushed_where.store(offset, Ordering::Release);
    }

    pub fn committed_where(&self) -> u64 { self.committed_where.load(Ordering::Acquire) }

    pub fn set_committed_where(&self, offset: u64) {
        self.committed_where.store(offset, Ordering::Release);
    }

    /// Store timestamp covered by the last full flush.
    pub fn store_timestamp(&self) -> i64 { self.store_timestamp.load(Ordering::Acquire) }

    /// Flush the segment the flush pointer falls into. Returns true when
    /// nothing new was persisted.
    pub fn flush(&self, least_pages: u64) -> Result<bool> {
        let mut result = true;
        let where_before = self.flushed_where();
        if let Some(file) = self.find_by_offset(where_before, where_before == 0) {
            let timestamp = file.store_timestamp();
            let offset_in_file = file.flush(least_pages)?;
            let flushed = file.base_offset() + offset_in_file;
            result = flushed == where_before;
            self.set_flushed_where(flushed);
            if least_pages == 0 {
                self.store_timestamp.store(timestamp, Ordering::Release);
            }
        }
        Ok(result)
    }

    /// Commit buffered bytes of the segment the commit pointer falls into.
    /// Returns true when nothing new was committed.
    pub fn commit(&self, least_pages: u64) -> Result<bool> {
        let mut result = true;
        let where_before = self.committed_where();
        if let Some(file) = self.find_by_offset(where_before, where_before == 0) {
            let offset_in_file = file.commit(least_pages)?;
            let committed = file.base_offset() + offset_in_file;
            result = committed == where_before;
            self.set_committed_where(committed);
        }
        Ok(result)
    }

    /// Highest readable physical offset.
    pub fn max_offset(&self) -> u64 {
        self.last_mapped_file()
            .map(|f| f.base_offset() + f.max_readable())
            .unwrap_or(0)
    }

    /// Highest written physical offset (may exceed [`Self::max_offset`]
    /// while the transient buffer holds uncommitted bytes).
    pub fn max_wrote_position(&self) -> u64 {
        self.last_mapped_file()
            .map(|f| f.base_offset() + f.wrote_position())
            .unwrap_or(0)
    }

    pub fn remain_how_many_data_to_commit(&self) -> u64 {
        self.max_wrote_position().saturating_sub(self.committed_where())
    }

    pub fn remain_how_many_data_to_flush(&self) -> u64 {
        self.max_offset().saturating_sub(self.flushed_where())
    }

    /// Drop everything beyond `offset`: pointers inside the surviving
    /// segment are wound back, segments wholly past it are deleted.
    pub fn truncate_dirty(&self, offset: u64) {
        let mut files = self.files.write();
        files.retain(|file| {
            let tail = file.base_offset() + self.mapped_file_size;
            if offset >= tail {
                return true;
            }
            if offset >= file.base_offset() {
                let pos = offset % self.mapped_file_size;
                file.set_wrote_position(pos);
                file.set_committed_position(pos);
                file.set_flushed_position(pos);
                return true;
            }
            info!(
                base = file.base_offset(),
                offset, "truncating dirty segment"
            );
            if let Err(e) = file.destroy() {
                warn!(error = ?e, "failed to destroy dirty segment");
            }
            false
        });
    }

    /// Wind the log back to `offset`, dropping newer segments. Refuses a
    /// rewind further than two segments, which signals operator error.
    pub fn reset_offset(&self, offset: u64) -> bool {
        let mut files = self.files.write();
        let Some(last) = files.last() else {
            return false;
        };

        let last_offset = last.base_offset() + last.wrote_position();
        let diff = last_offset.saturating_sub(offset);
        if diff > self.mapped_file_size * 2 {
            return false;
        }

        while let Some(file) = files.last().cloned() {
            if offset >= file.base_offset() {
                let pos = offset % self.mapped_file_size;
                file.set_wrote_position(pos);
                file.set_committed_position(pos);
                file.set_flushed_position(pos);
                break;
            }
            let _ = file.destroy();
            files.pop();
        }
        true
    }

    /// Reclaim read-only segments whose last modification is older than
    /// `expired_millis`. The active segment is never deleted. Returns the
    /// number of segments removed.
    pub fn delete_expired_by_time(
        &self,
        expired_millis: i64,
        delete_interval: Duration,
        immediately: bool,
    ) -> usize {
        let files = self.mapped_files();
        if files.len() < 2 {
            return 0;
        }

        let now = now_millis();
        let mut deleted = Vec::new();
        for file in &files[..files.len() - 1] {
            let live_until = file.last_modified_millis() + expired_millis;
            if now < live_until && !immediately {
                break;
            }
            if file.destroy().is_err() {
                break;
            }
            deleted.push(file.base_offset());
            if deleted.len() >= DELETE_FILES_BATCH_MAX {
                break;
            }
            if !delete_interval.is_zero() {
                std::thread::sleep(delete_interval);
            }
        }

        if !deleted.is_empty() {
            info!(count = deleted.len(), "deleted expired segments");
            self.files
                .write()
                .retain(|f| !deleted.contains(&f.base_offset()));
        }
        deleted.len()
    }

    /// Forcibly reclaim the oldest segment, regardless of age.
    pub fn retry_delete_first_file(&self) -> bool {
        let Some(first) = self.first_mapped_file() else {
            return false;
        };
        if first.destroy().is_err() {
            return false;
        }
        self.files
            .write()
            .retain(|f| f.base_offset() != first.base_offset());
        true
    }

    /// Audit filename continuity: adjacent segments must be exactly one
    /// segment size apart.
    pub fn check_self(&self) {
        let files = self.files.read();
        for pair in files.windows(2) {
            let gap = pair[1].base_offset() - pair[0].base_offset();
            if gap != self.mapped_file_size {
                error!(
                    prev = ?pair[0].path(),
                    next = ?pair[1].path(),
                    gap,
                    "segment files are not continuous"
                );
            }
        }
    }

    /// Delete every segment and reset the pointers.
    pub fn destroy(&self) {
        let mut files = self.files.write();
        for file in files.iter() {
            let _ = file.destroy();
        }
        files.clear();
        self.set_flushed_where(0);
        self.set_committed_where(0);
    }
}

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

//! One fixed-size segment of the commit log, backed by a memory-mapped
//! file.
//!
//! The segment tracks three monotonic in-file pointers:
//!
//! - `wrote_position`: next byte the single writer will fill
//! - `committed_position`: bytes copied out of the transient write buffer
//!   into the mapped region (equal to `wrote_position` when the buffer is
//!   disabled)
//! - `flushed_position`: bytes persisted to stable storage
//!
//! with `flushed <= committed <= wrote <= file_size` at all times. Writers
//! never mutate bytes below `wrote_position`; readers only see bytes below
//! the readable bound, so they need no coordination with the writer.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
};

use bytes::Bytes;
use mmap_io::MemoryMappedFile;
use parking_lot::Mutex;
use snafu::ResultExt;
use tracing::{debug, error, warn};

use crate::{
    append::{AppendCallback, AppendMessageResult, AppendMessageStatus},
    error::{InvalidSegmentPathSnafu, MmapFailedSnafu, Result, SegmentSizeMismatchSnafu},
    message::MessageInner,
};

/// Flush/commit page granularity.
pub const OS_PAGE_SIZE: u64 = 4096;

/// A fixed-size mapped segment file named by its base physical offset.
pub struct MappedFile {
    path:        PathBuf,
    base_offset: u64,
    file_size:   u64,
    mmap:        MemoryMappedFile,
    /// Next byte within this segment the writer will fill.
    wrote_position:     AtomicU64,
    /// Bytes copied from the transient buffer into the mapped region.
    committed_position: AtomicU64,
    /// Bytes persisted to stable storage.
    flushed_position:   AtomicU64,
    /// Store timestamp of the last appended record.
    store_timestamp: AtomicI64,
    available:       AtomicBool,
    /// Present only when the transient store pool is enabled; appends land
    /// here and a commit pass moves them into the mapped region.
    write_buffer: Option<Mutex<Vec<u8>>>,
}

/// Bytes selected out of a segment, tagged with their absolute offset.
#[derive(Debug, Clone)]
pub struct MappedSlice {
    /// Absolute physical offset of the first byte.
    pub start_offset: u64,
    pub bytes:        Bytes,
}

impl MappedSlice {
    pub fn len(&self) -> usize { self.bytes.len() }

    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
}

/// Writable window handed to the append callback: the region between the
/// segment's current write position and its end. All writes go through
/// [`SegmentSlot::put`], which routes to the transient buffer or the
/// mapped region.
pub struct SegmentSlot<'a> {
    file:    &'a MappedFile,
    start:   u64,
    written: usize,
}

impl SegmentSlot<'_> {
    /// Offset of this slot within its segment.
    pub fn offset_in_file(&self) -> u64 { self.start }

    /// Bytes left between the slot and the end of the segment.
    pub fn remaining(&self) -> usize { (self.file.file_size - self.start) as usize }

    /// Append bytes at the slot's current position.
    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_at(self.start + self.written as u64, data)?;
        self.written += data.len();
        Ok(())
    }
}

impl MappedFile {
    /// Create a fresh segment of `file_size` bytes starting at
    /// `base_offset`, named `{base_offset:020}` under `dir`.
    pub fn create(
        dir: &Path,
        base_offset: u64,
        file_size: u64,
        transient_pool: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{base_offset:020}"));
        debug!(path = ?path, "creating segment file");

        let mmap = MemoryMappedFile::create_rw(&path, file_size).context(MmapFailedSnafu)?;

        Ok(Self {
            path,
            base_offset,
            file_size,
            mmap,
            wrote_position: AtomicU64::new(0),
            committed_position: AtomicU64::new(0),
            flushed_position: AtomicU64::new(0),
            store_timestamp: AtomicI64::new(0),
            available: AtomicBool::new(true),
            write_buffer: transient_pool.then(|| Mutex::new(vec![0u8; file_size as usize])),
        })
    }

    /// Map an existing segment file. The base offset is parsed from the
    /// filename and the length must match the configured segment size.
    /// All pointers start at `file_size`; recovery truncates them back.
    pub fn open(path: &Path, expected_size: u64, transient_pool: bool) -> Result<Self> {
        let base_offset = parse_base_offset(path)?;
        let mmap = MemoryMappedFile::open_rw(path).context(MmapFailedSnafu)?;

        let actual = mmap.len();
        snafu::ensure!(
            actual == expected_size,
            SegmentSizeMismatchSnafu {
                path:     path.to_path_buf(),
                expected: expected_size,
                actual,
            }
        );

        Ok(Self {
            path: path.to_path_buf(),
            base_offset,
            file_size: expected_size,
            mmap,
            wrote_position: AtomicU64::new(expected_size),
            committed_position: AtomicU64::new(expected_size),
            flushed_position: AtomicU64::new(expected_size),
            store_timestamp: AtomicI64::new(0),
            available: AtomicBool::new(true),
            write_buffer: transient_pool.then(|| Mutex::new(vec![0u8; expected_size as usize])),
        })
    }

    pub fn base_offset(&self) -> u64 { self.base_offset }

    pub fn file_size(&self) -> u64 { self.file_size }

    pub fn path(&self) -> &Path { &self.path }

    pub fn is_full(&self) -> bool {
        self.wrote_position.load(Ordering::Acquire) >= self.file_size
    }

    pub fn is_available(&self) -> bool { self.available.load(Ordering::Acquire) }

    pub fn wrote_position(&self) -> u64 { self.wrote_position.load(Ordering::Acquire) }

    pub fn committed_position(&self) -> u64 { self.committed_position.load(Ordering::Acquire) }

    pub fn flushed_position(&self) -> u64 { self.flushed_position.load(Ordering::Acquire) }

    pub fn store_timestamp(&self) -> i64 { self.store_timestamp.load(Ordering::Acquire) }

    pub fn set_wrote_position(&self, pos: u64) {
        self.wrote_position.store(pos, Ordering::Release);
    }

    pub fn set_committed_position(&self, pos: u64) {
        self.committed_position.store(pos, Ordering::Release);
    }

    pub fn set_flushed_position(&self, pos: u64) {
        self.flushed_position.store(pos, Ordering::Release);
    }

    /// Highest in-file position readers may observe: committed bytes when
    /// the transient buffer is active, written bytes otherwise.
    pub fn max_readable(&self) -> u64 {
        if self.write_buffer.is_some() {
            self.committed_position.load(Ordering::Acquire)
        } else {
            self.wrote_position.load(Ordering::Acquire)
        }
    }

    /// Hand the region past the write position to the append callback.
    /// Advances the write position by whatever the callback reports
    /// written (a record or a blank trailer).
    pub fn append_message(
        &self,
        msg: &MessageInner,
        callback: &dyn AppendCallback,
    ) -> AppendMessageResult {
        let pos = self.wrote_position.load(Ordering::Acquire);
        if pos >= self.file_size {
            error!(
                pos,
                file_size = self.file_size,
                "append past the end of the segment"
            );
            return AppendMessageResult::error(AppendMessageStatus::UnknownError);
        }

        let mut slot = SegmentSlot {
            file:    self,
            start:   pos,
            written: 0,
        };
        let result = callback.do_append(self.base_offset, &mut slot, msg);

        self.wrote_position
            .store(pos + result.wrote_bytes, Ordering::Release);
        self.store_timestamp
            .store(result.store_timestamp, Ordering::Release);
        result
    }

    /// Raw append used by the replication path. Returns false when the
    /// bytes do not fit in the remaining space.
    pub fn append_bytes(&self, data: &[u8]) -> bool {
        let pos = self.wrote_position.load(Ordering::Acquire);
        if pos + data.len() as u64 > self.file_size {
            return false;
        }
        if let Err(e) = self.write_at(pos, data) {
            error!(error = ?e, pos, "raw append failed");
            return false;
        }
        self.wrote_position
            .store(pos + data.len() as u64, Ordering::Release);
        true
    }

    fn write_at(&self, pos: u64, data: &[u8]) -> Result<()> {
        snafu::ensure!(
            pos + data.len() as u64 <= self.file_size,
            crate::error::InternalSnafu {
                message: format!(
                    "write of {} bytes at {pos} exceeds segment size {}",
                    data.len(),
                    self.file_size
                ),
            }
        );
        match &self.write_buffer {
            Some(buffer) => {
                let mut buf = buffer.lock();
                buf[pos as usize..pos as usize + data.len()].copy_from_slice(data);
                Ok(())
            }
            None => self.mmap.update_region(pos, data).context(MmapFailedSnafu),
        }
    }

    /// Copy buffered bytes into the mapped region. No-op (reporting the
    /// write position) when the transient buffer is disabled. Returns the
    /// committed in-file position.
    pub fn commit(&self, least_pages: u64) -> Result<u64> {
        let Some(buffer) = &self.write_buffer else {
            return Ok(self.wrote_position.load(Ordering::Acquire));
        };

        if self.is_able_to_commit(least_pages) {
            let wrote = self.wrote_position.load(Ordering::Acquire);
            let committed = self.committed_position.load(Ordering::Acquire);
            if wrote > committed {
                let buf = buffer.lock();
                self.mmap
                    .update_region(committed, &buf[committed as usize..wrote as usize])
                    .context(MmapFailedSnafu)?;
                self.committed_position.store(wrote, Ordering::Release);
            }
        }

        Ok(self.committed_position.load(Ordering::Acquire))
    }

    /// Persist readable bytes to stable storage. Returns the flushed
    /// in-file position.
    pub fn flush(&self, least_pages: u64) -> Result<u64> {
        if self.is_able_to_flush(least_pages) {
            let value = self.max_readable();
            let flushed = self.flushed_position.load(Ordering::Acquire);
            if value > flushed {
                self.mmap
                    .flush_range(flushed, value - flushed)
                    .context(MmapFailedSnafu)?;
            }
            self.flushed_position.store(value, Ordering::Release);
        }
        Ok(self.flushed_position.load(Ordering::Acquire))
    }

    fn is_able_to_commit(&self, least_pages: u64) -> bool {
        let committed = self.committed_position.load(Ordering::Acquire);
        let wrote = self.wrote_position.load(Ordering::Acquire);

        if self.is_full() {
            return true;
        }
        if least_pages > 0 {
            return wrote / OS_PAGE_SIZE - committed / OS_PAGE_SIZE >= least_pages;
        }
        wrote > committed
    }

    fn is_able_to_flush(&self, least_pages: u64) -> bool {
        let flushed = self.flushed_position.load(Ordering::Acquire);
        let readable = self.max_readable();

        if self.is_full() {
            return true;
        }
        if least_pages > 0 {
            return readable / OS_PAGE_SIZE - flushed / OS_PAGE_SIZE >= least_pages;
        }
        readable > flushed
    }

    /// Borrow raw mapped bytes. Used by recovery, which scans the whole
    /// region including not-yet-truncated garbage.
    pub fn as_slice(&self, pos: u64, len: u64) -> Result<mmap_io::MappedSlice<'_>> {
        self.mmap.as_slice(pos, len).context(MmapFailedSnafu)
    }

    /// Readable bytes from an in-file position to the readable bound.
    pub fn select_slice(&self, pos: u64) -> Option<MappedSlice> {
        let readable = self.max_readable();
        if pos >= readable {
            return None;
        }
        self.select_slice_sized(pos, readable - pos)
    }

    /// Exactly `size` readable bytes from an in-file position.
    pub fn select_slice_sized(&self, pos: u64, size: u64) -> Option<MappedSlice> {
        if pos + size > self.max_readable() {
            return None;
        }
        match self.as_slice(pos, size) {
            Ok(data) => Some(MappedSlice {
                start_offset: self.base_offset + pos,
                bytes:        Bytes::copy_from_slice(data.as_slice()),
            }),
            Err(e) => {
                error!(error = ?e, pos, size, "segment read failed");
                None
            }
        }
    }

    /// Milliseconds since epoch of the last file modification, for
    /// retention decisions. Returns 0 when unavailable.
    pub fn last_modified_millis(&self) -> i64 {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Mark the segment unavailable and unlink its file. The mapping stays
    /// valid until the last reference drops.
    pub fn destroy(&self) -> Result<()> {
        self.available.store(false, Ordering::Release);
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = ?e, "failed to unlink segment file");
            return Err(e.into());
        }
        Ok(())
    }
}

fn parse_base_offset(path: &Path) -> Result<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| {
            InvalidSegmentPathSnafu {
                path: path.to_path_buf(),
            }
            .build()
        })
}

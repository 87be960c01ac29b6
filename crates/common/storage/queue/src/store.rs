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

//! Append-only record log over a single file.
//!
//! ## Record Format
//!
//! ```text
//! ┌──────────────────┬─────────────────────────┐
//! │ length (4B, BE)  │ payload (length bytes)  │
//! └──────────────────┴─────────────────────────┘
//! ```
//!
//! A record is addressed by the offset of its length prefix. The store keeps
//! a logical size (one past the last complete record) and every append is a
//! positioned write at that size. A failed write therefore leaves the size
//! untouched and the next append overwrites whatever partial bytes it left.
//!
//! A store holds two handles: a reader used by [`Store::read`] and a writer
//! used by [`Store::append`]. A store opened with [`Store::open_read_only`]
//! (or after [`Store::close_writer`]) rejects writes.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use bytes::{BufMut, Bytes, BytesMut};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::{
    Result,
    error::{IoSnafu, RecordTooLargeSnafu, ShortReadSnafu, StoreClosedSnafu, StoreReadOnlySnafu},
};

/// Size of the big-endian length prefix in front of every record.
pub const RECORD_LENGTH_SIZE: u64 = 4;

/// Bytes a payload of `len` bytes occupies on disk.
#[must_use]
pub const fn record_disk_size(len: usize) -> u64 { RECORD_LENGTH_SIZE + len as u64 }

#[derive(Debug)]
pub struct Store {
    path:   PathBuf,
    reader: Option<File>,
    writer: Option<File>,
    size:   u64,
}

impl Store {
    /// Open (or create) a store for reading and appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(IoSnafu { path: parent })?;
        }

        let writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .context(IoSnafu { path: &path })?;
        let reader = File::open(&path).context(IoSnafu { path: &path })?;
        let size = writer.metadata().context(IoSnafu { path: &path })?.len();

        debug!(path = %path.display(), size, "opened store");

        Ok(Self {
            path,
            reader: Some(reader),
            writer: Some(writer),
            size,
        })
    }

    /// Open an existing store for replay. Appends fail with `StoreReadOnly`.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = File::open(&path).context(IoSnafu { path: &path })?;
        let size = reader.metadata().context(IoSnafu { path: &path })?.len();

        debug!(path = %path.display(), size, "opened read-only store");

        Ok(Self {
            path,
            reader: Some(reader),
            writer: None,
            size,
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Logical size: offset one past the last complete record.
    pub const fn size(&self) -> u64 { self.size }

    pub const fn is_writable(&self) -> bool { self.writer.is_some() }

    pub const fn is_closed(&self) -> bool { self.reader.is_none() && self.writer.is_none() }

    /// Append one record and return the offset of its length prefix.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let len = u32::try_from(payload.len())
            .ok()
            .context(RecordTooLargeSnafu { len: payload.len() })?;
        let writer = self.writer()?;

        let mut buf = BytesMut::with_capacity(RECORD_LENGTH_SIZE as usize + payload.len());
        buf.put_u32(len);
        buf.put_slice(payload);

        let offset = self.size;
        writer
            .write_all_at(&buf, offset)
            .context(IoSnafu { path: &self.path })?;
        self.size += buf.len() as u64;

        Ok(offset)
    }

    /// Read the record whose length prefix starts at `offset`.
    pub fn read(&self, offset: u64) -> Result<Bytes> {
        let reader = self.reader()?;
        let short_read = || {
            ShortReadSnafu {
                path: &self.path,
                offset,
                size: self.size,
            }
            .build()
        };
        let payload_offset = offset
            .checked_add(RECORD_LENGTH_SIZE)
            .filter(|end| *end <= self.size)
            .ok_or_else(short_read)?;

        let mut header = [0u8; RECORD_LENGTH_SIZE as usize];
        reader
            .read_exact_at(&mut header, offset)
            .context(IoSnafu { path: &self.path })?;
        let len = u64::from(u32::from_be_bytes(header));

        payload_offset
            .checked_add(len)
            .filter(|end| *end <= self.size)
            .ok_or_else(short_read)?;

        #[allow(clippy::cast_possible_truncation)]
        let mut payload = vec![0u8; len as usize];
        reader
            .read_exact_at(&mut payload, payload_offset)
            .context(IoSnafu { path: &self.path })?;

        Ok(Bytes::from(payload))
    }

    /// Iterate complete records from the start of the store.
    pub const fn records(&self) -> Records<'_> {
        Records {
            store: self,
            pos:   0,
            done:  false,
        }
    }

    /// Cut the store back to `len` bytes, discarding everything after it.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        let writer = self.writer()?;
        writer.set_len(len).context(IoSnafu { path: &self.path })?;
        writer.sync_all().context(IoSnafu { path: &self.path })?;
        self.size = len;
        Ok(())
    }

    /// fsync everything written so far. A no-op once the writer is gone.
    pub fn flush(&self) -> Result<()> {
        if let Some(writer) = &self.writer {
            writer.sync_data().context(IoSnafu { path: &self.path })?;
        }
        Ok(())
    }

    /// Flush and drop the write handle. Reads keep working.
    pub fn close_writer(&mut self) -> Result<()> {
        self.flush()?;
        self.writer = None;
        Ok(())
    }

    /// Flush and drop both handles.
    pub fn close(&mut self) -> Result<()> {
        self.close_writer()?;
        self.reader = None;
        Ok(())
    }

    fn writer(&self) -> Result<&File> {
        match (&self.writer, &self.reader) {
            (Some(writer), _) => Ok(writer),
            (None, Some(_)) => StoreReadOnlySnafu { path: &self.path }.fail(),
            (None, None) => StoreClosedSnafu { path: &self.path }.fail(),
        }
    }

    fn reader(&self) -> Result<&File> {
        self.reader
            .as_ref()
            .context(StoreClosedSnafu { path: &self.path })
    }
}

/// One record yielded by [`Records`].
#[derive(Debug, Clone)]
pub struct Record {
    pub offset:  u64,
    pub payload: Bytes,
}

/// Sequential scan over the complete records of a [`Store`].
///
/// Iteration stops at the first record whose header or payload runs past the
/// logical size. [`Records::position`] then points at the end of the last
/// complete record, so `position() < store.size()` means a torn tail.
pub struct Records<'a> {
    store: &'a Store,
    pos:   u64,
    done:  bool,
}

impl Records<'_> {
    pub const fn position(&self) -> u64 { self.pos }
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let reader = match self.store.reader() {
            Ok(reader) => reader,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let size = self.store.size;
        if self.pos + RECORD_LENGTH_SIZE > size {
            self.done = true;
            return None;
        }

        let mut header = [0u8; RECORD_LENGTH_SIZE as usize];
        if let Err(e) = reader
            .read_exact_at(&mut header, self.pos)
            .context(IoSnafu {
                path: &self.store.path,
            })
        {
            self.done = true;
            return Some(Err(e));
        }

        let len = u64::from(u32::from_be_bytes(header));
        if self.pos + RECORD_LENGTH_SIZE + len > size {
            self.done = true;
            return None;
        }

        match self.store.read(self.pos) {
            Ok(payload) => {
                let record = Record {
                    offset: self.pos,
                    payload,
                };
                self.pos += RECORD_LENGTH_SIZE + len;
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::QueueError;

    #[test]
    fn test_append_returns_prefix_offset() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open(temp_dir.path().join("store")).unwrap();

        assert_eq!(store.append(b"hello").unwrap(), 0);
        assert_eq!(store.append(b"world!").unwrap(), 9);
        assert_eq!(store.size(), 9 + 10);

        assert_eq!(store.read(0).unwrap().as_ref(), b"hello");
        assert_eq!(store.read(9).unwrap().as_ref(), b"world!");
    }

    #[test]
    fn test_empty_payload() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open(temp_dir.path().join("store")).unwrap();

        let offset = store.append(b"").unwrap();
        assert_eq!(store.size(), record_disk_size(0));
        assert!(store.read(offset).unwrap().is_empty());
    }

    #[test]
    fn test_read_past_size_is_short_read() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open(temp_dir.path().join("store")).unwrap();
        store.append(b"abc").unwrap();

        let err = store.read(7).unwrap_err();
        assert!(matches!(err, QueueError::ShortRead { offset: 7, .. }));
    }

    #[test_case(u64::MAX ; "max offset")]
    #[test_case(u64::MAX - 1 ; "header wraps")]
    #[test_case(u64::MAX - RECORD_LENGTH_SIZE ; "header end at max")]
    fn test_read_near_u64_max_is_short_read(offset: u64) {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open(temp_dir.path().join("store")).unwrap();
        store.append(b"abc").unwrap();

        let err = store.read(offset).unwrap_err();
        assert!(matches!(err, QueueError::ShortRead { offset: o, .. } if o == offset));
    }

    #[test]
    fn test_reopen_keeps_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store");

        {
            let mut store = Store::open(&path).unwrap();
            store.append(b"one").unwrap();
            store.append(b"two").unwrap();
            store.close().unwrap();
        }

        let store = Store::open_read_only(&path).unwrap();
        let payloads: Vec<Bytes> = store.records().map(|r| r.unwrap().payload).collect();
        assert_eq!(payloads, vec![Bytes::from("one"), Bytes::from("two")]);
    }

    #[test]
    fn test_read_only_rejects_append() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store");
        Store::open(&path).unwrap().close().unwrap();

        let mut store = Store::open_read_only(&path).unwrap();
        assert!(matches!(
            store.append(b"x").unwrap_err(),
            QueueError::StoreReadOnly { .. }
        ));
    }

    #[test]
    fn test_close_writer_keeps_reads() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open(temp_dir.path().join("store")).unwrap();
        let offset = store.append(b"kept").unwrap();

        store.close_writer().unwrap();
        assert!(!store.is_writable());
        assert_eq!(store.read(offset).unwrap().as_ref(), b"kept");

        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(
            store.read(offset).unwrap_err(),
            QueueError::StoreClosed { .. }
        ));
        assert!(matches!(
            store.append(b"x").unwrap_err(),
            QueueError::StoreClosed { .. }
        ));
    }

    #[test]
    fn test_records_stop_at_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store");

        {
            let mut store = Store::open(&path).unwrap();
            store.append(b"complete").unwrap();
            store.close().unwrap();
        }
        // A header promising 100 bytes followed by only two of them.
        {
            use std::io::Write;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_be_bytes()).unwrap();
            file.write_all(b"xx").unwrap();
        }

        let mut store = Store::open(&path).unwrap();
        let mut records = store.records();
        assert_eq!(records.next().unwrap().unwrap().payload.as_ref(), b"complete");
        assert!(records.next().is_none());
        let valid_end = records.position();
        assert_eq!(valid_end, record_disk_size(8));
        assert!(valid_end < store.size());

        store.truncate(valid_end).unwrap();
        let offset = store.append(b"next").unwrap();
        assert_eq!(offset, valid_end);
        assert_eq!(store.read(offset).unwrap().as_ref(), b"next");
    }
}

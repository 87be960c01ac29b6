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

//! Durable message-id index.
//!
//! Maps every message id to the segment and byte offset holding its payload.
//! Lookups are served from memory; every entry is also appended to its own
//! record log so the map can be rebuilt by replay.
//!
//! ## Entry Format
//!
//! Each entry is one [`Store`] record with a 24-byte payload:
//!
//! ```text
//! ┌──────────────────┬──────────────────┬──────────────────┐
//! │ segment_id (8B)  │ offset (8B)      │ element_id (8B)  │
//! └──────────────────┴──────────────────┴──────────────────┘
//! ```
//!
//! All fields are big-endian. Ids are allocated under the same lock as the
//! log append, so the id returned to a caller is always the id on disk and ids
//! stay gapless.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{FlushMode, Result, error::CorruptedIndexSnafu, store::Store};

/// Location of one message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageEntry {
    pub segment_id: u64,
    pub offset:     u64,
    pub element_id: u64,
}

impl MessageEntry {
    pub const ENCODED_LEN: usize = 24;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_u64(self.segment_id);
        buf.put_u64(self.offset);
        buf.put_u64(self.element_id);
        buf.freeze()
    }

    /// Decode a 24-byte entry; `None` if the buffer has the wrong length.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            segment_id: buf.get_u64(),
            offset:     buf.get_u64(),
            element_id: buf.get_u64(),
        })
    }
}

struct IndexLog {
    store:   Store,
    next_id: u64,
}

pub struct Index {
    path:       PathBuf,
    flush_mode: FlushMode,
    log:        Mutex<IndexLog>,
    entries:    RwLock<HashMap<u64, MessageEntry>>,
}

impl Index {
    /// Open the index log at `path`, replaying any entries it already holds.
    ///
    /// A truncated record at the tail of the log is dropped and the log is cut
    /// back to the last complete entry. A complete record that does not decode
    /// fails with `CorruptedIndex`.
    pub fn open<P: AsRef<Path>>(path: P, flush_mode: FlushMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Store::open(&path)?;

        let mut entries = HashMap::new();
        let mut max_id: Option<u64> = None;
        let mut records = store.records();
        for record in records.by_ref() {
            let record = record?;
            let Some(entry) = MessageEntry::decode(&record.payload) else {
                return CorruptedIndexSnafu {
                    offset: record.offset,
                    reason: format!(
                        "expected {} byte entry, found {} bytes",
                        MessageEntry::ENCODED_LEN,
                        record.payload.len()
                    ),
                }
                .fail();
            };
            max_id = Some(max_id.map_or(entry.element_id, |m| m.max(entry.element_id)));
            entries.insert(entry.element_id, entry);
        }

        let valid_end = records.position();
        if valid_end < store.size() {
            warn!(
                path = %path.display(),
                valid_end,
                size = store.size(),
                "truncating torn tail of message index"
            );
            store.truncate(valid_end)?;
        }

        let next_id = max_id.map_or(0, |m| m + 1);
        info!(
            path = %path.display(),
            entries = entries.len(),
            next_id,
            "message index restored"
        );

        Ok(Self {
            path,
            flush_mode,
            log: Mutex::new(IndexLog { store, next_id }),
            entries: RwLock::new(entries),
        })
    }

    /// Allocate the next message id for a payload at `(segment_id, offset)`
    /// and record it durably.
    pub fn append(&self, segment_id: u64, offset: u64) -> Result<u64> {
        let mut log = self.log.lock();
        let entry = MessageEntry {
            segment_id,
            offset,
            element_id: log.next_id,
        };

        log.store.append(&entry.encode())?;
        if self.flush_mode == FlushMode::Sync {
            log.store.flush()?;
        }

        self.entries.write().insert(entry.element_id, entry);
        log.next_id += 1;

        debug!(element_id = entry.element_id, segment_id, offset, "indexed message");
        Ok(entry.element_id)
    }

    pub fn get(&self, element_id: u64) -> Option<MessageEntry> {
        self.entries.read().get(&element_id).copied()
    }

    /// Id the next append will receive.
    pub fn next_id(&self) -> u64 { self.log.lock().next_id }

    pub fn len(&self) -> usize { self.entries.read().len() }

    pub fn is_empty(&self) -> bool { self.entries.read().is_empty() }

    pub fn path(&self) -> &Path { &self.path }

    pub fn flush(&self) -> Result<()> { self.log.lock().store.flush() }

    pub fn close(&self) -> Result<()> { self.log.lock().store.close() }
}

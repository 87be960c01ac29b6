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

use std::path::Path;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{Result, config::full_threshold, path::segment_file_path, store::Store};

/// One bounded `segment-<id>` file.
///
/// The store sits behind a reader/writer lock: the active segment is appended
/// to by producers while consumers catching up to the head read from it.
#[derive(Debug)]
pub struct Segment {
    id:    u64,
    store: RwLock<Store>,
}

impl Segment {
    /// Open (or create) `root/segment-<id>` for appending.
    pub fn create<P: AsRef<Path>>(root: P, id: u64) -> Result<Self> {
        let store = Store::open(segment_file_path(root, id))?;
        Ok(Self {
            id,
            store: RwLock::new(store),
        })
    }

    /// Reopen an existing segment as closed (read-only).
    pub fn open_read_only<P: AsRef<Path>>(path: P, id: u64) -> Result<Self> {
        let store = Store::open_read_only(path)?;
        Ok(Self {
            id,
            store: RwLock::new(store),
        })
    }

    pub const fn id(&self) -> u64 { self.id }

    pub fn size(&self) -> u64 { self.store.read().size() }

    pub fn append(&self, data: &[u8]) -> Result<u64> { self.store.write().append(data) }

    pub fn read(&self, offset: u64) -> Result<Bytes> { self.store.read().read(offset) }

    /// `size >= 90%` of `max_bytes`.
    #[allow(clippy::cast_precision_loss)]
    pub fn is_full(&self, max_bytes: u64) -> bool { self.size() as f64 >= full_threshold(max_bytes) }

    pub fn is_writable(&self) -> bool { self.store.read().is_writable() }

    pub fn flush(&self) -> Result<()> { self.store.read().flush() }

    /// Stop accepting appends; reads keep working.
    pub fn close_writer(&self) -> Result<()> { self.store.write().close_writer() }

    pub fn close(&self) -> Result<()> { self.store.write().close() }
}

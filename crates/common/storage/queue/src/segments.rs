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

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, info, warn};

use crate::{
    FlushMode, QueueConfig, Result,
    error::{IoSnafu, UnknownMessageIdSnafu, UnknownSegmentSnafu},
    index::Index,
    path::scan_segment_files,
    segment::Segment,
};

struct SegmentSet {
    active: Arc<Segment>,
    /// Write-closed segments, ascending by id.
    closed: Vec<Arc<Segment>>,
}

/// The active segment, the closed segments and the message index.
pub struct Segments {
    config:      QueueConfig,
    /// Serialises the whole "check full, roll over, append, index" sequence.
    append_lock: Mutex<()>,
    set:         RwLock<SegmentSet>,
    index:       Index,
}

impl Segments {
    /// Restore from `config.segments_root`, or start fresh if it is empty.
    ///
    /// Every existing segment is reopened read-only; the new active segment
    /// takes `max(existing id) + 1`, or `1` on an empty root.
    pub fn open(config: QueueConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.segments_root).context(IoSnafu {
            path: &config.segments_root,
        })?;
        std::fs::create_dir_all(&config.metadata_path).context(IoSnafu {
            path: &config.metadata_path,
        })?;

        let mut closed = Vec::new();
        for (id, path) in scan_segment_files(&config.segments_root)? {
            closed.push(Arc::new(Segment::open_read_only(&path, id)?));
        }

        let active_id = closed.last().map_or(1, |s| s.id() + 1);
        let active = Arc::new(Segment::create(&config.segments_root, active_id)?);
        let index = Index::open(config.index_file_path(), config.flush_mode)?;

        info!(
            root = %config.segments_root.display(),
            closed = closed.len(),
            active_id,
            next_element_id = index.next_id(),
            "segments opened"
        );

        Ok(Self {
            config,
            append_lock: Mutex::new(()),
            set: RwLock::new(SegmentSet { active, closed }),
            index,
        })
    }

    pub const fn config(&self) -> &QueueConfig { &self.config }

    /// Append `data` to the active segment, rolling over first if it is full,
    /// and return the message id assigned by the index.
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let _guard = self.append_lock.lock();

        let mut active = self.set.read().active.clone();
        if active.is_full(self.config.max_segment_size) {
            active = self.roll_over(&active)?;
        }

        let offset = active.append(data)?;
        if self.config.flush_mode == FlushMode::Sync {
            active.flush()?;
        }

        self.index.append(active.id(), offset)
    }

    /// Read the payload of message `element_id`.
    pub fn read(&self, element_id: u64) -> Result<Bytes> {
        let entry = self
            .index
            .get(element_id)
            .context(UnknownMessageIdSnafu { element_id })?;
        let segment = self
            .find_segment(entry.segment_id)
            .context(UnknownSegmentSnafu {
                segment_id: entry.segment_id,
                element_id,
            })?;
        segment.read(entry.offset)
    }

    /// Force the active segment and the index log to disk.
    pub fn flush(&self) -> Result<()> {
        self.set.read().active.flush()?;
        self.index.flush()
    }

    /// Close every segment and the index. All are attempted; the first error
    /// is returned.
    pub fn close(&self) -> Result<()> {
        let set = self.set.read();
        let mut first_err = None;

        for segment in std::iter::once(&set.active).chain(set.closed.iter()) {
            if let Err(e) = segment.close() {
                warn!(segment_id = segment.id(), error = %e, "failed to close segment");
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.index.close() {
            warn!(path = %self.index.path().display(), error = %e, "failed to close message index");
            first_err.get_or_insert(e);
        }

        info!(root = %self.config.segments_root.display(), "segments closed");
        first_err.map_or(Ok(()), Err)
    }

    pub fn active_segment_id(&self) -> u64 { self.set.read().active.id() }

    pub fn closed_segment_count(&self) -> usize { self.set.read().closed.len() }

    /// Id the next appended message will receive.
    pub fn next_element_id(&self) -> u64 { self.index.next_id() }

    fn roll_over(&self, current: &Arc<Segment>) -> Result<Arc<Segment>> {
        let next = Arc::new(Segment::create(
            &self.config.segments_root,
            current.id() + 1,
        )?);
        current.close_writer()?;

        let mut set = self.set.write();
        let previous = std::mem::replace(&mut set.active, Arc::clone(&next));
        set.closed.push(previous);

        info!(
            closed_id = current.id(),
            active_id = next.id(),
            size = current.size(),
            "segment rolled over"
        );
        Ok(next)
    }

    fn find_segment(&self, segment_id: u64) -> Option<Arc<Segment>> {
        let set = self.set.read();
        if set.active.id() == segment_id {
            return Some(Arc::clone(&set.active));
        }
        let found = set
            .closed
            .binary_search_by_key(&segment_id, |s| s.id())
            .ok()
            .map(|i| Arc::clone(&set.closed[i]));
        if found.is_none() {
            debug!(segment_id, "segment not resident");
        }
        found
    }
}

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

use std::path::PathBuf;

use crate::path::index_file_path;

/// Fraction of `max_segment_size` at which the active segment is considered
/// full.
pub const SEGMENT_FULL_RATIO: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory holding `segment-<id>` files.
    pub segments_root:    PathBuf,
    /// Directory holding the message index log.
    pub metadata_path:    PathBuf,
    /// Segment size cap in bytes.
    pub max_segment_size: u64,
    pub flush_mode:       FlushMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            segments_root:    PathBuf::from("./data/segments"),
            metadata_path:    PathBuf::from("./data/metadata"),
            max_segment_size: 64 * 1024 * 1024,
            flush_mode:       FlushMode::Async,
        }
    }
}

impl QueueConfig {
    /// Location of the message index log.
    #[must_use]
    pub fn index_file_path(&self) -> PathBuf { index_file_path(&self.metadata_path) }
}

/// Byte size at or above which a segment of `max_segment_size` rolls over.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn full_threshold(max_segment_size: u64) -> f64 { max_segment_size as f64 * SEGMENT_FULL_RATIO }

/// When appended records are forced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Rely on explicit `flush()` and `close()`.
    #[default]
    Async,
    /// fsync the segment and the index log after every append.
    Sync,
}

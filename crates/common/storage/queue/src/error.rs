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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Filesystem I/O failure (open, read, write, sync).
    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Write attempted on a store that has no write handle.
    #[snafu(display("Store {} is read-only", path.display()))]
    StoreReadOnly {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// Operation attempted on a fully closed store.
    #[snafu(display("Store {} is closed", path.display()))]
    StoreClosed {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// A read ran past the logical end of the store.
    #[snafu(display(
        "Short read at offset {offset} in {} (logical size {size})",
        path.display()
    ))]
    ShortRead {
        path:   PathBuf,
        offset: u64,
        size:   u64,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Payload does not fit the 4-byte length prefix.
    #[snafu(display("Record of {len} bytes exceeds the maximum record size"))]
    RecordTooLarge {
        len: usize,
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    /// No index entry exists for the message id.
    #[snafu(display("Unknown message id {element_id}"))]
    UnknownMessageId { element_id: u64 },

    /// An index entry references a segment that is not resident.
    #[snafu(display("Unknown segment {segment_id} referenced by message {element_id}"))]
    UnknownSegment {
        segment_id: u64,
        element_id: u64,
        #[snafu(implicit)]
        loc:        snafu::Location,
    },

    /// Invalid or unparseable file path.
    #[snafu(display("Invalid file path: {}", path.display()))]
    InvalidPath {
        path: PathBuf,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    /// The index log holds a record that does not decode.
    #[snafu(display("Corrupted index at offset {offset}: {reason}"))]
    CorruptedIndex {
        offset: u64,
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl QueueError {
    /// `true` when the error only means "no message with this id yet".
    #[must_use]
    pub const fn is_unknown_message_id(&self) -> bool {
        matches!(self, Self::UnknownMessageId { .. })
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

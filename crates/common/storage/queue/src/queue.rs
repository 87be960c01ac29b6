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

use bytes::Bytes;

use crate::{QueueConfig, Result, segments::Segments};

/// Persistent message queue addressed by message id.
///
/// Ids start at 0, grow by one per [`Queue::enqueue`] and survive restarts.
/// Thread-safe; share it behind an `Arc`.
pub struct Queue {
    segments: Segments,
}

impl Queue {
    /// Open the queue described by `config`, restoring existing state.
    pub fn open(config: QueueConfig) -> Result<Self> {
        Ok(Self {
            segments: Segments::open(config)?,
        })
    }

    /// Append a message and return its id.
    pub fn enqueue(&self, data: &[u8]) -> Result<u64> { self.segments.append(data) }

    /// Read message `element_id`. Fails with `UnknownMessageId` past the head.
    pub fn dequeue(&self, element_id: u64) -> Result<Bytes> { self.segments.read(element_id) }

    pub fn flush(&self) -> Result<()> { self.segments.flush() }

    pub fn close(&self) -> Result<()> { self.segments.close() }

    pub const fn config(&self) -> &QueueConfig { self.segments.config() }

    /// Id the next enqueued message will receive.
    pub fn next_element_id(&self) -> u64 { self.segments.next_element_id() }

    pub fn active_segment_id(&self) -> u64 { self.segments.active_segment_id() }

    pub fn closed_segment_count(&self) -> usize { self.segments.closed_segment_count() }
}

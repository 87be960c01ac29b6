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

use crate::{FlushMode, Queue, QueueConfig, Result};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<S: Into<PathBuf>, M: Into<PathBuf>>(segments_root: S, metadata_path: M) -> Self {
        Self {
            config: QueueConfig {
                segments_root: segments_root.into(),
                metadata_path: metadata_path.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    #[must_use]
    pub const fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    pub fn config(self) -> QueueConfig { self.config }

    pub fn build(self) -> Result<Queue> { Queue::open(self.config) }
}

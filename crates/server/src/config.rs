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

use std::{path::PathBuf, time::Duration};

use bon::Builder;
use queue::{FlushMode, QueueConfig};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

pub const DEFAULT_DELIVERY_BUFFER: usize = 1024;

/// Broker configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding `segment-<id>` files.
    #[default(_code = "PathBuf::from(\"./data/segments\")")]
    #[builder(into, default = PathBuf::from("./data/segments"))]
    pub segments_root: PathBuf,

    /// Directory holding the message index log and consumer snapshots.
    #[default(_code = "PathBuf::from(\"./data/metadata\")")]
    #[builder(into, default = PathBuf::from("./data/metadata"))]
    pub metadata_path: PathBuf,

    #[default = 67_108_864]
    #[builder(default = 64 * 1024 * 1024)]
    pub max_segment_size: u64,

    /// fsync every append instead of relying on flush and close.
    #[default = false]
    #[builder(default)]
    pub sync_writes: bool,

    /// Period of consumer cursor snapshots. Zero disables the background
    /// persister; cursors are then only saved on close.
    #[serde(with = "humantime_serde")]
    #[default(_code = "Duration::from_secs(5)")]
    #[builder(default = Duration::from_secs(5))]
    pub consumer_index_sync_interval: Duration,

    /// Capacity of each subscriber's outbound channel.
    #[default(DEFAULT_DELIVERY_BUFFER)]
    #[builder(default = DEFAULT_DELIVERY_BUFFER)]
    pub delivery_buffer: usize,
}

impl ServerConfig {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            segments_root:    self.segments_root.clone(),
            metadata_path:    self.metadata_path.clone(),
            max_segment_size: self.max_segment_size,
            flush_mode:       if self.sync_writes {
                FlushMode::Sync
            } else {
                FlushMode::Async
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_segment_size, 64 * 1024 * 1024);
        assert_eq!(config.consumer_index_sync_interval, Duration::from_secs(5));
        assert_eq!(config, ServerConfig::builder().build());
    }

    #[test]
    fn test_deserialize_humantime_interval() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"segments_root":"/q/seg","consumer_index_sync_interval":"250ms","sync_writes":true}"#,
        )
        .unwrap();

        assert_eq!(config.segments_root, PathBuf::from("/q/seg"));
        assert_eq!(
            config.consumer_index_sync_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.queue_config().flush_mode, FlushMode::Sync);
        assert_eq!(config.delivery_buffer, 1024);
    }
}

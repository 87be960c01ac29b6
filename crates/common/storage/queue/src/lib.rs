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

//! Segmented, append-only message storage.
//!
//! Messages are framed records in `segment-<id>` files. A segment stops
//! taking writes once it reaches 90% of the configured size and a new one is
//! started. A separate index log maps every message id to the segment and
//! offset holding it, so any message can be read back by id after a restart.

pub mod builder;
pub mod config;
pub mod error;
pub mod index;
pub mod path;
pub mod queue;
pub mod segment;
pub mod segments;
pub mod store;

pub use builder::QueueBuilder;
pub use config::{FlushMode, QueueConfig};
pub use error::{QueueError, Result};
pub use index::MessageEntry;
pub use queue::Queue;

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

//! Broker core on top of the segmented queue: durable consumer cursors,
//! the dequeue/revert service and push delivery to live subscribers.

pub mod broadcast;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod service;

pub use broadcast::{
    Broadcaster, MessageSink, OnlineConsumer, SinkError, Subscription, SubscriptionEnd,
    SubscriptionId,
};
pub use config::ServerConfig;
pub use consumer::ConsumerIndex;
pub use error::{Result, ServerError};
pub use service::{Message, QueueService};

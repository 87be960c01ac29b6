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

use std::sync::LazyLock;

use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGauge, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};

pub const REASON_LABEL: &str = "reason";

pub static MESSAGES_ENQUEUED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("pmq_messages_enqueued_total", "Messages appended to the queue").unwrap()
});

pub static MESSAGES_DELIVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "pmq_messages_delivered_total",
        "Messages pushed to subscriber streams"
    )
    .unwrap()
});

pub static CONSUMERS_EVICTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "pmq_consumers_evicted_total",
        "Subscribers removed after a failed delivery"
    )
    .unwrap()
});

pub static SUBSCRIPTIONS_ENDED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pmq_subscriptions_ended_total",
        "Subscriptions that ended, by reason",
        &[REASON_LABEL]
    )
    .unwrap()
});

pub static CONSUMERS_ONLINE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("pmq_consumers_online", "Subscribers currently registered").unwrap()
});

pub static CLOSED_SEGMENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("pmq_closed_segments", "Write-closed segments held by the queue").unwrap()
});

pub static SNAPSHOTS_PERSISTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "pmq_consumer_snapshots_persisted_total",
        "Consumer cursor snapshots written"
    )
    .unwrap()
});

pub static SNAPSHOT_PERSIST_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "pmq_consumer_snapshot_failures_total",
        "Consumer cursor snapshot attempts that failed"
    )
    .unwrap()
});

pub static SNAPSHOT_PERSIST_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "pmq_consumer_snapshot_duration_seconds",
        "Time spent writing one consumer cursor snapshot"
    )
    .unwrap()
});

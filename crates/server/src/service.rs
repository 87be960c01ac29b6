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

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use queue::Queue;
use snafu::{ResultExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    consumer::{ConsumerIndex, INITIAL_CURSOR},
    error::{ClosedSnafu, Result, StorageSnafu},
    metrics::{CLOSED_SEGMENTS, MESSAGES_ENQUEUED},
};

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub element_id: u64,
    pub payload:    Bytes,
}

/// Queue plus consumer cursors: "next unread message for consumer C".
pub struct QueueService {
    queue:          Queue,
    consumers:      ConsumerIndex,
    /// Serialises read-then-write of one consumer's cursor.
    consumer_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
    closed:         AtomicBool,
}

impl QueueService {
    /// Open (or restore) the queue and consumer cursors described by
    /// `config`.
    pub fn open(config: &ServerConfig) -> Result<Self> {
        let queue = Queue::open(config.queue_config()).context(StorageSnafu)?;
        let consumers =
            ConsumerIndex::open(&config.metadata_path, config.consumer_index_sync_interval)?;
        Ok(Self::new(queue, consumers))
    }

    pub fn new(queue: Queue, consumers: ConsumerIndex) -> Self {
        update_segment_gauge(&queue);
        info!(
            next_element_id = queue.next_element_id(),
            consumers = consumers.consumer_count(),
            "queue service ready"
        );
        Self {
            queue,
            consumers,
            consumer_locks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a message and return its id.
    pub fn enqueue(&self, data: &[u8]) -> Result<u64> {
        self.ensure_open()?;
        let element_id = self.queue.enqueue(data).context(StorageSnafu)?;
        MESSAGES_ENQUEUED.inc();
        update_segment_gauge(&self.queue);
        debug!(element_id, len = data.len(), "enqueued message");
        Ok(element_id)
    }

    /// Read the message after `consumer_id`'s cursor and advance the cursor.
    ///
    /// When the consumer has caught up the error satisfies
    /// [`ServerError::is_caught_up`](crate::ServerError::is_caught_up) and the
    /// cursor is left alone.
    pub fn dequeue(&self, consumer_id: u32) -> Result<Message> {
        self.ensure_open()?;
        let lock = self.consumer_lock(consumer_id);
        let _guard = lock.lock();

        let element_id = u64::try_from(self.consumers.read_index(consumer_id) + 1).unwrap_or(0);
        let payload = self.queue.dequeue(element_id).context(StorageSnafu)?;
        #[allow(clippy::cast_possible_wrap)]
        self.consumers.write_index(consumer_id, element_id as i64);

        debug!(consumer_id, element_id, "dequeued message");
        Ok(Message {
            element_id,
            payload,
        })
    }

    /// Undo the last cursor advance of `consumer_id` and return the new
    /// cursor. A cursor still at `-1` is left there.
    pub fn revert_dequeue(&self, consumer_id: u32) -> Result<i64> {
        self.ensure_open()?;
        let lock = self.consumer_lock(consumer_id);
        let _guard = lock.lock();

        let cursor = self.consumers.read_index(consumer_id);
        if cursor <= INITIAL_CURSOR {
            warn!(consumer_id, "revert on a consumer with nothing delivered");
            return Ok(cursor);
        }
        self.consumers.write_index(consumer_id, cursor - 1);
        debug!(consumer_id, cursor = cursor - 1, "reverted dequeue");
        Ok(cursor - 1)
    }

    /// Current cursor of `consumer_id` (`-1` when nothing was delivered).
    pub fn cursor(&self, consumer_id: u32) -> i64 { self.consumers.read_index(consumer_id) }

    pub const fn queue(&self) -> &Queue { &self.queue }

    pub const fn consumers(&self) -> &ConsumerIndex { &self.consumers }

    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    /// Close the queue, then persist and close the consumer cursors. Both are
    /// attempted; the first failure is returned.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let queue_result = self.queue.close().context(StorageSnafu);
        if let Err(e) = &queue_result {
            warn!(error = %e, "failed to close queue");
        }
        let consumers_result = self.consumers.close();
        if let Err(e) = &consumers_result {
            warn!(error = %e, "failed to close consumer index");
        }

        info!("queue service closed");
        queue_result.and(consumers_result)
    }

    fn ensure_open(&self) -> Result<()> {
        ensure!(!self.is_closed(), ClosedSnafu);
        Ok(())
    }

    fn consumer_lock(&self, consumer_id: u32) -> Arc<Mutex<()>> {
        Arc::clone(self.consumer_locks.lock().entry(consumer_id).or_default())
    }
}

#[allow(clippy::cast_possible_wrap)]
fn update_segment_gauge(queue: &Queue) { CLOSED_SEGMENTS.set(queue.closed_segment_count() as i64); }

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::ServerError;

    fn config(temp_dir: &TempDir) -> ServerConfig {
        ServerConfig::builder()
            .segments_root(temp_dir.path().join("segments"))
            .metadata_path(temp_dir.path().join("metadata"))
            .max_segment_size(1024)
            .consumer_index_sync_interval(Duration::ZERO)
            .build()
    }

    fn payload(message: &Message) -> &str { std::str::from_utf8(&message.payload).unwrap() }

    #[test]
    fn test_two_consumers_drain_independently() {
        let temp_dir = TempDir::new().unwrap();
        let service = QueueService::open(&config(&temp_dir)).unwrap();

        for msg in ["A", "B", "C"] {
            service.enqueue(msg.as_bytes()).unwrap();
        }

        assert_eq!(payload(&service.dequeue(1).unwrap()), "A");
        assert_eq!(payload(&service.dequeue(1).unwrap()), "B");
        assert_eq!(payload(&service.dequeue(1).unwrap()), "C");
        assert_eq!(payload(&service.dequeue(2).unwrap()), "A");

        let err = service.dequeue(1).unwrap_err();
        assert!(err.is_caught_up());
        assert_eq!(service.cursor(1), 2);
        assert_eq!(service.cursor(2), 0);
    }

    #[test]
    fn test_revert_redelivers_same_message() {
        let temp_dir = TempDir::new().unwrap();
        let service = QueueService::open(&config(&temp_dir)).unwrap();
        for msg in ["m0", "m1", "m2"] {
            service.enqueue(msg.as_bytes()).unwrap();
        }

        service.dequeue(4).unwrap();
        let before = service.cursor(4);
        let first = service.dequeue(4).unwrap();
        assert_eq!(service.cursor(4), before + 1);

        assert_eq!(service.revert_dequeue(4).unwrap(), before);
        let again = service.dequeue(4).unwrap();
        assert_eq!(again, first);
        assert_eq!(again.element_id, 1);
    }

    #[test]
    fn test_revert_on_fresh_consumer_stays_at_minus_one() {
        let temp_dir = TempDir::new().unwrap();
        let service = QueueService::open(&config(&temp_dir)).unwrap();

        assert_eq!(service.revert_dequeue(9).unwrap(), -1);
        assert_eq!(service.cursor(9), -1);
    }

    #[test]
    fn test_caught_up_dequeue_keeps_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let service = QueueService::open(&config(&temp_dir)).unwrap();

        assert!(service.dequeue(1).unwrap_err().is_caught_up());
        assert_eq!(service.cursor(1), -1);

        service.enqueue(b"late").unwrap();
        let message = service.dequeue(1).unwrap();
        assert_eq!(message.element_id, 0);
        assert_eq!(payload(&message), "late");
    }

    #[test]
    fn test_close_then_restore_round_trip() {
        let temp_dir = TempDir::new().unwrap();

        {
            let service = QueueService::open(&config(&temp_dir)).unwrap();
            for i in 0..10 {
                service.enqueue(format!("msg-{i}").as_bytes()).unwrap();
            }
            for _ in 0..4 {
                service.dequeue(1).unwrap();
            }
            service.dequeue(2).unwrap();
            service.close().unwrap();
            assert!(matches!(
                service.enqueue(b"rejected").unwrap_err(),
                ServerError::Closed { .. }
            ));
        }

        let service = QueueService::open(&config(&temp_dir)).unwrap();
        assert_eq!(service.cursor(1), 3);
        assert_eq!(service.cursor(2), 0);
        for i in 0..10 {
            let data = service.queue().dequeue(i).unwrap();
            assert_eq!(data.as_ref(), format!("msg-{i}").as_bytes());
        }
        assert_eq!(payload(&service.dequeue(1).unwrap()), "msg-4");
        assert_eq!(service.enqueue(b"msg-10").unwrap(), 10);
    }

    #[test]
    fn test_concurrent_dequeue_on_one_consumer_never_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let service = Arc::new(QueueService::open(&config(&temp_dir)).unwrap());
        for i in 0..100 {
            service.enqueue(format!("{i}").as_bytes()).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(message) = service.dequeue(7) {
                        seen.push(message.element_id);
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}

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

use std::{sync::Arc, thread};

use queue::{FlushMode, QueueBuilder};
use tempfile::TempDir;
use test_case::test_case;

fn builder(temp_dir: &TempDir) -> QueueBuilder {
    QueueBuilder::new(
        temp_dir.path().join("segments"),
        temp_dir.path().join("metadata"),
    )
}

#[test]
fn test_queue_write_and_read() {
    let temp_dir = TempDir::new().unwrap();
    let queue = builder(&temp_dir)
        .max_segment_size(1024 * 1024)
        .flush_mode(FlushMode::Sync)
        .build()
        .unwrap();

    for i in 0..100 {
        let msg = format!("message-{i:04}");
        assert_eq!(queue.enqueue(msg.as_bytes()).unwrap(), i);
    }

    for i in 0..100 {
        let msg = queue.dequeue(i).unwrap();
        assert_eq!(
            std::str::from_utf8(&msg).unwrap(),
            format!("message-{i:04}")
        );
    }

    assert!(queue.dequeue(100).unwrap_err().is_unknown_message_id());
    queue.close().unwrap();
}

#[test_case(64 ; "many small segments")]
#[test_case(1024 * 1024 ; "single segment")]
fn test_queue_recovery_reproduces_messages(max_segment_size: u64) {
    let temp_dir = TempDir::new().unwrap();
    let messages: Vec<String> = (0..50).map(|i| format!("payload {i} {}", "x".repeat(i % 7))).collect();

    {
        let queue = builder(&temp_dir)
            .max_segment_size(max_segment_size)
            .build()
            .unwrap();
        for msg in &messages {
            queue.enqueue(msg.as_bytes()).unwrap();
        }
        queue.close().unwrap();
    }

    let queue = builder(&temp_dir)
        .max_segment_size(max_segment_size)
        .build()
        .unwrap();
    assert_eq!(queue.next_element_id(), messages.len() as u64);
    for (i, msg) in messages.iter().enumerate() {
        assert_eq!(queue.dequeue(i as u64).unwrap().as_ref(), msg.as_bytes());
    }

    assert_eq!(queue.enqueue(b"after restart").unwrap(), messages.len() as u64);
    assert_eq!(
        queue.dequeue(messages.len() as u64).unwrap().as_ref(),
        b"after restart"
    );
}

#[test]
fn test_rollover_with_twenty_byte_segments() {
    let temp_dir = TempDir::new().unwrap();
    let queue = builder(&temp_dir).max_segment_size(20).build().unwrap();

    queue.enqueue(b"Hello Segments").unwrap();
    assert_eq!(queue.closed_segment_count(), 0);

    queue.enqueue(b"Hello Segments").unwrap();
    assert_eq!(queue.closed_segment_count(), 1);
}

#[test]
fn test_close_then_restore_closes_every_segment() {
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = builder(&temp_dir).max_segment_size(10).build().unwrap();
        for msg in ["first", "second", "third"] {
            queue.enqueue(msg.as_bytes()).unwrap();
        }
        queue.close().unwrap();
    }

    let queue = builder(&temp_dir).max_segment_size(10).build().unwrap();
    assert_eq!(queue.closed_segment_count(), 3);
    assert_eq!(queue.active_segment_id(), 4);
    assert_eq!(queue.dequeue(1).unwrap().as_ref(), b"second");
}

#[test]
fn test_concurrent_producers_get_unique_ids() {
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(builder(&temp_dir).max_segment_size(256).build().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                (0..50)
                    .map(|i| {
                        let msg = format!("t{t}-m{i}");
                        (queue.enqueue(msg.as_bytes()).unwrap(), msg)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut written: Vec<(u64, String)> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    written.sort_by_key(|(id, _)| *id);

    let ids: Vec<u64> = written.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, (0..200).collect::<Vec<_>>());
    for (id, msg) in &written {
        assert_eq!(queue.dequeue(*id).unwrap().as_ref(), msg.as_bytes());
    }
}

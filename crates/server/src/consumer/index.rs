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
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use parking_lot::{Mutex, RwLock};
use snafu::ResultExt;
use tracing::{debug, info};

use super::{persister::Persister, snapshot};
use crate::{
    error::{Result, SnapshotSnafu},
    metrics::{SNAPSHOT_PERSIST_DURATION_SECONDS, SNAPSHOTS_PERSISTED, SNAPSHOT_PERSIST_FAILURES},
};

/// Cursor of a consumer that has not been delivered anything yet.
pub const INITIAL_CURSOR: i64 = -1;

struct CursorTable {
    metadata_path:  PathBuf,
    cursors:        RwLock<HashMap<u32, i64>>,
    /// Timestamp of the last snapshot written; never goes backwards.
    last_timestamp: Mutex<u64>,
}

impl CursorTable {
    fn persist(&self) -> Result<()> {
        let started = Instant::now();
        let result = self.write_snapshot();
        SNAPSHOT_PERSIST_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        match &result {
            Ok(()) => SNAPSHOTS_PERSISTED.inc(),
            Err(_) => SNAPSHOT_PERSIST_FAILURES.inc(),
        }
        result
    }

    fn write_snapshot(&self) -> Result<()> {
        // Held for the whole cycle so an older copy never lands after a newer one.
        let mut last = self.last_timestamp.lock();
        let data = snapshot::encode(&self.cursors.read())?;
        let timestamp = unix_secs().max(*last);
        let path = snapshot::write(&self.metadata_path, timestamp, &data)?;
        let pruned = snapshot::prune(&self.metadata_path, &path)?;
        *last = timestamp;

        debug!(path = %path.display(), pruned, "consumer index persisted");
        Ok(())
    }
}

/// Durable table of per-consumer read cursors.
///
/// Cursors live in memory and are written out as whole snapshots by a
/// background thread and once more on [`ConsumerIndex::close`].
pub struct ConsumerIndex {
    table:     Arc<CursorTable>,
    persister: Mutex<Option<Persister>>,
}

impl ConsumerIndex {
    /// Restore cursors from the newest valid snapshot in `metadata_path`.
    ///
    /// With no snapshot present an empty one is written. A non-zero
    /// `sync_interval` starts the background persister.
    pub fn open<P: AsRef<Path>>(metadata_path: P, sync_interval: Duration) -> Result<Self> {
        let metadata_path = metadata_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&metadata_path).context(SnapshotSnafu {
            path: &metadata_path,
        })?;

        let restored = snapshot::load_latest(&metadata_path)?;
        let found = restored.is_some();
        let (cursors, last_timestamp) = match restored {
            Some(loaded) => {
                info!(
                    path = %loaded.path.display(),
                    consumers = loaded.cursors.len(),
                    "consumer index restored"
                );
                (loaded.cursors, loaded.timestamp)
            }
            None => (HashMap::new(), 0),
        };

        let table = Arc::new(CursorTable {
            metadata_path,
            cursors: RwLock::new(cursors),
            last_timestamp: Mutex::new(last_timestamp),
        });
        if !found {
            info!(path = %table.metadata_path.display(), "no consumer snapshot found, starting empty");
            table.persist()?;
        }

        let persister = if sync_interval.is_zero() {
            None
        } else {
            let table = Arc::clone(&table);
            Some(Persister::spawn(sync_interval, move || table.persist())?)
        };

        Ok(Self {
            table,
            persister: Mutex::new(persister),
        })
    }

    /// Cursor of `consumer_id`, registering it at `-1` if unknown.
    pub fn read_index(&self, consumer_id: u32) -> i64 {
        if let Some(&cursor) = self.table.cursors.read().get(&consumer_id) {
            return cursor;
        }
        *self
            .table
            .cursors
            .write()
            .entry(consumer_id)
            .or_insert(INITIAL_CURSOR)
    }

    pub fn write_index(&self, consumer_id: u32, cursor: i64) {
        self.table.cursors.write().insert(consumer_id, cursor);
    }

    /// Write a snapshot now and prune the older ones.
    pub fn persist(&self) -> Result<()> { self.table.persist() }

    pub fn consumer_count(&self) -> usize { self.table.cursors.read().len() }

    pub fn metadata_path(&self) -> &Path { &self.table.metadata_path }

    /// Stop the background persister, then persist one final time.
    pub fn close(&self) -> Result<()> {
        if let Some(mut persister) = self.persister.lock().take() {
            persister.stop();
        }
        self.table.persist()?;
        info!(
            path = %self.table.metadata_path.display(),
            consumers = self.consumer_count(),
            "consumer index closed"
        );
        Ok(())
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn snapshot_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(snapshot::SNAPSHOT_PREFIX))
            .collect()
    }

    #[test]
    fn test_unknown_consumer_starts_at_minus_one() {
        let temp_dir = TempDir::new().unwrap();
        let index = ConsumerIndex::open(temp_dir.path(), Duration::ZERO).unwrap();

        assert_eq!(index.read_index(7), -1);
        assert_eq!(index.consumer_count(), 1);

        index.write_index(7, 3);
        assert_eq!(index.read_index(7), 3);
        assert_eq!(index.read_index(8), -1);
    }

    #[test]
    fn test_fresh_directory_gets_empty_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let _index = ConsumerIndex::open(temp_dir.path(), Duration::ZERO).unwrap();

        let files = snapshot_files(temp_dir.path());
        assert_eq!(files.len(), 1);
        let len = std::fs::metadata(temp_dir.path().join(&files[0]))
            .unwrap()
            .len();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_close_then_restore_keeps_cursors() {
        let temp_dir = TempDir::new().unwrap();

        {
            let index = ConsumerIndex::open(temp_dir.path(), Duration::ZERO).unwrap();
            index.write_index(1, 10);
            index.write_index(2, 0);
            assert_eq!(index.read_index(3), -1);
            index.close().unwrap();
        }

        let index = ConsumerIndex::open(temp_dir.path(), Duration::ZERO).unwrap();
        assert_eq!(index.read_index(1), 10);
        assert_eq!(index.read_index(2), 0);
        assert_eq!(index.read_index(3), -1);
        assert_eq!(index.consumer_count(), 3);
    }

    #[test]
    fn test_repeated_persists_leave_one_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let index = ConsumerIndex::open(temp_dir.path(), Duration::ZERO).unwrap();

        for cursor in 0..5 {
            index.write_index(1, cursor);
            index.persist().unwrap();
        }

        let files = snapshot_files(temp_dir.path());
        assert_eq!(files.len(), 1);
        let latest = snapshot::load_latest(temp_dir.path()).unwrap().unwrap();
        assert_eq!(latest.cursors.get(&1), Some(&4));
    }

    #[test]
    fn test_stale_snapshots_are_pruned_on_persist() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        snapshot::write(dir, 10, &snapshot::encode(&HashMap::from([(1, 1)])).unwrap()).unwrap();
        snapshot::write(dir, 20, &snapshot::encode(&HashMap::from([(1, 2)])).unwrap()).unwrap();

        let index = ConsumerIndex::open(dir, Duration::ZERO).unwrap();
        assert_eq!(index.read_index(1), 2);
        index.persist().unwrap();

        let files = snapshot_files(dir);
        assert_eq!(files.len(), 1);
        assert_ne!(files[0], "consumer_index_10");
    }

    #[test]
    fn test_background_persister_writes_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let index = ConsumerIndex::open(temp_dir.path(), Duration::from_millis(20)).unwrap();
        index.write_index(5, 42);

        std::thread::sleep(Duration::from_millis(150));
        let latest = snapshot::load_latest(temp_dir.path()).unwrap().unwrap();
        assert_eq!(latest.cursors.get(&5), Some(&42));

        index.close().unwrap();
        assert_eq!(snapshot_files(temp_dir.path()).len(), 1);
    }
}

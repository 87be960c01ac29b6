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

//! Consumer cursor snapshot files.
//!
//! A snapshot is `consumer_index_<unix seconds>` holding one 8-byte entry per
//! consumer:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────┐
//! │ consumer_id (4B, BE) │ cursor (4B, BE)      │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! A cursor of `-1` (nothing delivered yet) is stored as `0xFFFF_FFFF`.
//!
//! Snapshots are written to `<name>.tmp`, synced, then renamed into place, so
//! a crash mid-write never leaves a partial file under a final name. Restore
//! still rejects files whose length is not a multiple of 8 and falls back to
//! the next newest one.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::error::{CursorOverflowSnafu, Result, SnapshotSnafu};

pub const SNAPSHOT_PREFIX: &str = "consumer_index_";
pub const TMP_SUFFIX: &str = ".tmp";
pub const ENTRY_SIZE: usize = 8;
/// On-disk value of the `-1` cursor.
pub const NO_CURSOR: u32 = u32::MAX;

/// A snapshot read back from disk.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub timestamp: u64,
    pub path:      PathBuf,
    pub cursors:   HashMap<u32, i64>,
}

pub fn snapshot_file_name(timestamp: u64) -> String { format!("{SNAPSHOT_PREFIX}{timestamp}") }

/// Timestamp of a final (non-temporary) snapshot file.
pub fn parse_snapshot_timestamp(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(SNAPSHOT_PREFIX)?
        .parse()
        .ok()
}

fn is_snapshot_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX))
}

/// Encode cursors, ordered by consumer id.
pub fn encode(cursors: &HashMap<u32, i64>) -> Result<Bytes> {
    let mut entries: Vec<(u32, i64)> = cursors.iter().map(|(&id, &c)| (id, c)).collect();
    entries.sort_unstable_by_key(|(id, _)| *id);

    let mut buf = BytesMut::with_capacity(entries.len() * ENTRY_SIZE);
    for (consumer_id, cursor) in entries {
        let stored = if cursor == -1 {
            NO_CURSOR
        } else {
            u32::try_from(cursor)
                .ok()
                .filter(|&c| c != NO_CURSOR)
                .context(CursorOverflowSnafu {
                    consumer_id,
                    cursor,
                })?
        };
        buf.put_u32(consumer_id);
        buf.put_u32(stored);
    }
    Ok(buf.freeze())
}

/// Decode a snapshot body; `None` if it is not a whole number of entries.
pub fn decode(mut buf: &[u8]) -> Option<HashMap<u32, i64>> {
    if buf.len() % ENTRY_SIZE != 0 {
        return None;
    }

    let mut cursors = HashMap::with_capacity(buf.len() / ENTRY_SIZE);
    while buf.has_remaining() {
        let consumer_id = buf.get_u32();
        let cursor = match buf.get_u32() {
            NO_CURSOR => -1,
            c => i64::from(c),
        };
        cursors.insert(consumer_id, cursor);
    }
    Some(cursors)
}

/// Final snapshot files in `dir`, newest first.
pub fn list_snapshots(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut snapshots = Vec::new();
    for entry in fs::read_dir(dir).context(SnapshotSnafu { path: dir })? {
        let path = entry.context(SnapshotSnafu { path: dir })?.path();
        if let Some(ts) = parse_snapshot_timestamp(&path) {
            snapshots.push((ts, path));
        }
    }
    snapshots.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(snapshots)
}

/// Newest snapshot in `dir` that decodes, skipping truncated ones.
pub fn load_latest(dir: &Path) -> Result<Option<LoadedSnapshot>> {
    for (timestamp, path) in list_snapshots(dir)? {
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable consumer snapshot");
                continue;
            }
        };
        match decode(&data) {
            Some(cursors) => {
                return Ok(Some(LoadedSnapshot {
                    timestamp,
                    path,
                    cursors,
                }));
            }
            None => warn!(
                path = %path.display(),
                len = data.len(),
                "skipping truncated consumer snapshot"
            ),
        }
    }
    Ok(None)
}

/// Durably write `data` as `consumer_index_<timestamp>` in `dir`.
pub fn write(dir: &Path, timestamp: u64, data: &[u8]) -> Result<PathBuf> {
    let path = dir.join(snapshot_file_name(timestamp));
    let tmp = dir.join(format!("{}{TMP_SUFFIX}", snapshot_file_name(timestamp)));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)
        .context(SnapshotSnafu { path: &tmp })?;
    file.write_all(data).context(SnapshotSnafu { path: &tmp })?;
    file.sync_all().context(SnapshotSnafu { path: &tmp })?;
    drop(file);

    fs::rename(&tmp, &path).context(SnapshotSnafu { path: &path })?;
    File::open(dir)
        .and_then(|d| d.sync_all())
        .context(SnapshotSnafu { path: dir })?;

    debug!(path = %path.display(), bytes = data.len(), "consumer snapshot written");
    Ok(path)
}

/// Remove every snapshot file in `dir` except `keep`, temporaries included.
pub fn prune(dir: &Path, keep: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir).context(SnapshotSnafu { path: dir })? {
        let path = entry.context(SnapshotSnafu { path: dir })?.path();
        if path == keep || !is_snapshot_file(&path) {
            continue;
        }
        fs::remove_file(&path).context(SnapshotSnafu { path: &path })?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;
    use crate::error::ServerError;

    #[test]
    fn test_entry_layout() {
        let cursors = HashMap::from([(2u32, -1i64), (1u32, 258i64)]);
        let data = encode(&cursors).unwrap();

        assert_eq!(
            data.as_ref(),
            &[0, 0, 0, 1, 0, 0, 1, 2, 0, 0, 0, 2, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(decode(&data).unwrap(), cursors);
    }

    #[test_case(i64::from(u32::MAX) ; "reserved sentinel")]
    #[test_case(i64::from(u32::MAX) + 1 ; "wider than 32 bits")]
    #[test_case(-2 ; "below minus one")]
    fn test_encode_rejects_out_of_range_cursor(cursor: i64) {
        let err = encode(&HashMap::from([(9u32, cursor)])).unwrap_err();
        assert!(matches!(err, ServerError::CursorOverflow { consumer_id: 9, .. }));
    }

    #[test_case(7 ; "partial entry")]
    #[test_case(12 ; "one and a half entries")]
    fn test_decode_rejects_partial_entries(len: usize) {
        assert!(decode(&vec![0u8; len]).is_none());
    }

    #[test]
    fn test_parse_timestamp_ignores_temporaries() {
        assert_eq!(
            parse_snapshot_timestamp(Path::new("consumer_index_1700000000")),
            Some(1_700_000_000)
        );
        assert_eq!(
            parse_snapshot_timestamp(Path::new("consumer_index_1700000000.tmp")),
            None
        );
        assert_eq!(parse_snapshot_timestamp(Path::new("message_index")), None);
    }

    #[test]
    fn test_load_latest_falls_back_past_truncated_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let good = HashMap::from([(1u32, 4i64)]);
        write(dir, 100, &encode(&good).unwrap()).unwrap();
        fs::write(dir.join(snapshot_file_name(200)), [0u8; 5]).unwrap();

        let loaded = load_latest(dir).unwrap().unwrap();
        assert_eq!(loaded.timestamp, 100);
        assert_eq!(loaded.cursors, good);
    }

    #[test]
    fn test_prune_keeps_only_current() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        write(dir, 1, &[]).unwrap();
        write(dir, 2, &[]).unwrap();
        fs::write(dir.join("consumer_index_3.tmp"), [1u8]).unwrap();
        fs::write(dir.join("message_index"), [1u8]).unwrap();
        let keep = write(dir, 4, &[]).unwrap();

        assert_eq!(prune(dir, &keep).unwrap(), 3);
        let snapshots = list_snapshots(dir).unwrap();
        assert_eq!(snapshots, vec![(4, keep)]);
        assert!(dir.join("message_index").exists());
    }
}

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

use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::{Result, error::IoSnafu};

pub const SEGMENT_FILE_PREFIX: &str = "segment-";
pub const INDEX_FILE_NAME: &str = "message_index";

/// Generates a segment file name: `segment-<id>`.
pub fn segment_file_name(id: u64) -> String { format!("{SEGMENT_FILE_PREFIX}{id}") }

/// Returns full path to a segment file: `root/segment-<id>`.
pub fn segment_file_path<P: AsRef<Path>>(root: P, id: u64) -> PathBuf {
    root.as_ref().join(segment_file_name(id))
}

/// Returns full path to the index log: `metadata/message_index`.
pub fn index_file_path<P: AsRef<Path>>(metadata: P) -> PathBuf {
    metadata.as_ref().join(INDEX_FILE_NAME)
}

/// Parses the trailing numeric id out of a `segment-<id>` file name.
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(SEGMENT_FILE_PREFIX)?
        .parse()
        .ok()
}

/// Lists every segment file under `root`, sorted by ascending id.
///
/// Files that do not follow the `segment-<id>` pattern are ignored.
pub fn scan_segment_files<P: AsRef<Path>>(root: P) -> Result<Vec<(u64, PathBuf)>> {
    let root = root.as_ref();
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for entry in std::fs::read_dir(root).context(IoSnafu { path: root })? {
        let path = entry.context(IoSnafu { path: root })?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(id) = parse_segment_id(&path) {
            segments.push((id, path));
        }
    }

    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

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

use std::{any::Any, path::PathBuf};

use pmq_error::{ErrorExt, StackError, StatusCode};
use queue::QueueError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServerError {
    #[snafu(display("Storage failure"))]
    Storage {
        source: QueueError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Consumer index snapshot failure on {}", path.display()))]
    Snapshot {
        path:   PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Cursor {cursor} of consumer {consumer_id} does not fit a snapshot entry"))]
    CursorOverflow {
        consumer_id: u32,
        cursor:      i64,
        #[snafu(implicit)]
        loc:         snafu::Location,
    },

    #[snafu(display("Consumer id {consumer_id} is out of range"))]
    InvalidConsumerId {
        consumer_id: u64,
        #[snafu(implicit)]
        loc:         snafu::Location,
    },

    #[snafu(display("Queue service is closed"))]
    Closed {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Failed to start consumer index persister"))]
    Persister {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl ServerError {
    /// `true` when a dequeue found nothing past the consumer's cursor.
    pub const fn is_caught_up(&self) -> bool {
        matches!(self, Self::Storage { source, .. } if source.is_unknown_message_id())
    }
}

impl ErrorExt for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            _ if self.is_caught_up() => StatusCode::NotFound,
            Self::InvalidConsumerId { .. } => StatusCode::InvalidArgument,
            Self::Closed { .. } => StatusCode::Unavailable,
            _ => StatusCode::Internal,
        }
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}

impl StackError for ServerError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        match self {
            Self::Storage { source, loc } => {
                buf.push(format!("{layer}: {self}, at {loc}"));
                buf.push(format!("{}: {source}", layer + 1));
            }
            Self::Snapshot { source, loc, .. } | Self::Persister { source, loc } => {
                buf.push(format!("{layer}: {self}, at {loc}"));
                buf.push(format!("{}: {source}", layer + 1));
            }
            Self::CursorOverflow { loc, .. }
            | Self::InvalidConsumerId { loc, .. }
            | Self::Closed { loc } => buf.push(format!("{layer}: {self}, at {loc}")),
        }
    }

    fn next(&self) -> Option<&dyn StackError> { None }
}

impl From<ServerError> for tonic::Status {
    fn from(error: ServerError) -> Self {
        Self::new(error.status_code().tonic_code(), error.output_msg())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

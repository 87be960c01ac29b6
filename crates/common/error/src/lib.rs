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

//! Transport-neutral error classification.
//!
//! Broker errors report a [`StatusCode`] through [`ErrorExt`]; whichever RPC
//! layer fronts the broker turns that into an HTTP status or a gRPC code.

use std::{any::Any, error::Error as StdError};

use http::StatusCode as HttpStatusCode;
use serde::Serialize;
use strum::EnumProperty;
use tonic::Code as TonicCode;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusCode {
    /// Malformed request, e.g. a consumer id that does not fit the cursor
    /// table.
    #[strum(props(http_status = "400", tonic_code = "3"))]
    InvalidArgument,
    /// Nothing at the requested position yet.
    #[strum(props(http_status = "404", tonic_code = "5"))]
    NotFound,
    /// The broker is shutting down or already closed.
    #[strum(props(http_status = "503", tonic_code = "14"))]
    Unavailable,
    #[strum(props(http_status = "500", tonic_code = "13"))]
    Internal,
    #[strum(props(http_status = "500", tonic_code = "13"))]
    Unknown,
}

impl StatusCode {
    pub fn http_status(self) -> HttpStatusCode {
        self.get_str("http_status")
            .and_then(|value| value.parse::<u16>().ok())
            .and_then(|value| HttpStatusCode::from_u16(value).ok())
            .unwrap_or(HttpStatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn tonic_code(self) -> TonicCode {
        let value = self
            .get_str("tonic_code")
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(TonicCode::Internal as i32);
        TonicCode::from_i32(value)
    }
}

/// An error that is a layer in a chain of snafu contexts.
pub trait StackError: StdError {
    /// Render this layer and the ones below it, one line per layer.
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>);

    fn next(&self) -> Option<&dyn StackError>;

    fn last(&self) -> &dyn StackError
    where
        Self: Sized,
    {
        let Some(mut result) = self.next() else {
            return self;
        };
        while let Some(err) = result.next() {
            result = err;
        }
        result
    }
}

pub trait ErrorExt: StackError {
    fn status_code(&self) -> StatusCode { StatusCode::Unknown }

    fn as_any(&self) -> &dyn Any;

    /// Message safe to hand to a client. Internal failures are not described.
    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal => {
                format!("Internal error: {}", self.status_code())
            }
            _ => {
                let error = self.last();
                match error.source() {
                    Some(source) => format!("{error}: {}", root_of(source)),
                    None => format!("{error}"),
                }
            }
        }
    }

    /// Innermost non-stack error, usually an `io::Error`.
    fn root_cause(&self) -> Option<&dyn StdError>
    where
        Self: Sized,
    {
        self.last().source().map(root_of)
    }

    /// Full layered description for logs.
    fn stack_trace(&self) -> Vec<String> {
        let mut buf = Vec::new();
        self.debug_fmt(0, &mut buf);
        buf
    }
}

fn root_of(mut error: &dyn StdError) -> &dyn StdError {
    while let Some(source) = error.source() {
        error = source;
    }
    error
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use test_case::test_case;

    use super::*;

    #[test_case(StatusCode::InvalidArgument, 400, TonicCode::InvalidArgument)]
    #[test_case(StatusCode::NotFound, 404, TonicCode::NotFound)]
    #[test_case(StatusCode::Unavailable, 503, TonicCode::Unavailable)]
    #[test_case(StatusCode::Internal, 500, TonicCode::Internal)]
    #[test_case(StatusCode::Unknown, 500, TonicCode::Internal)]
    fn test_status_mapping(code: StatusCode, http: u16, tonic: TonicCode) {
        assert_eq!(code.http_status().as_u16(), http);
        assert_eq!(code.tonic_code(), tonic);
    }

    #[derive(Debug)]
    struct Leaf {
        code:   StatusCode,
        source: Option<std::io::Error>,
    }

    impl fmt::Display for Leaf {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "leaf failed") }
    }

    impl StdError for Leaf {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.source.as_ref().map(|e| e as &(dyn StdError + 'static))
        }
    }

    impl StackError for Leaf {
        fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
            buf.push(format!("{layer}: {self}"));
        }

        fn next(&self) -> Option<&dyn StackError> { None }
    }

    impl ErrorExt for Leaf {
        fn status_code(&self) -> StatusCode { self.code }

        fn as_any(&self) -> &dyn Any { self }
    }

    #[test]
    fn test_output_msg_hides_internal_errors() {
        let err = Leaf {
            code:   StatusCode::Internal,
            source: Some(std::io::Error::other("disk on fire")),
        };
        assert_eq!(err.output_msg(), "Internal error: internal");
        assert_eq!(err.root_cause().unwrap().to_string(), "disk on fire");
    }

    #[test]
    fn test_output_msg_includes_root_cause() {
        let err = Leaf {
            code:   StatusCode::InvalidArgument,
            source: Some(std::io::Error::other("bad id")),
        };
        assert_eq!(err.output_msg(), "leaf failed: bad id");
        assert_eq!(err.stack_trace(), vec!["0: leaf failed".to_string()]);
    }
}

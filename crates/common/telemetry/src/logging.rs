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

//! Global `tracing` subscriber for the broker.
//!
//! Up to three layers are installed behind one reloadable target filter:
//!
//! - stdout, when `append_stdout` is set
//! - an hourly rolling `<prefix>.*` file under `dir`
//! - an hourly rolling `<prefix>-err.*` file under `dir` holding errors only
//!
//! `log` records from dependencies are bridged in through `tracing-log`.

use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once},
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, registry::LookupSpan,
};

pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Fallback filter when neither `level` nor `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Handle for changing the target filter after start-up.
///
/// Only set once [`init_global_logging`] has run.
pub static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> =
    OnceCell::new();

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rolling log files. Empty disables file output.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Target filter such as `"info,queue=debug"`. Falls back to `RUST_LOG`.
    pub level: Option<String>,

    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per layer. 720 is 30 days of hourly files.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,

    /// File name prefix of the rolling files.
    #[default = "pmq"]
    #[builder(default = "pmq".to_string())]
    pub file_prefix: String,
}

#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,
    #[default]
    Text,
}

/// Install logging for unit tests. Safe to call from every test.
///
/// Honours `UNITTEST_LOG_DIR` (default `/tmp/__pmq_unittest_logs`) and
/// `UNITTEST_LOG_LEVEL` (default `debug`).
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__pmq_unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());

        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            append_stdout: false,
            ..Default::default()
        };
        let guards = init_global_logging("unittest", &opts);
        if let Ok(mut g) = GLOBAL_UT_LOG_GUARD.lock() {
            *g = Some(guards);
        }

        tracing::info!(dir = %dir, "unit test logging initialised");
    });
}

static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// Install the global subscriber. Only the first call has any effect.
///
/// The returned guards flush the non-blocking writers when dropped and must
/// live as long as the process logs.
///
/// # Panics
///
/// Panics when the log directory cannot be created, the filter string does
/// not parse, or another global subscriber is already installed.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        // A `log` logger may already be set by the host; keep going without it.
        let _ = LogTracer::init();

        let stdout_layer = opts.append_stdout.then(|| {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            fmt_layer(writer, opts.log_format, std::io::stdout().is_terminal())
        });

        let file_layer = (!opts.dir.is_empty()).then(|| {
            let (writer, guard) = rolling_writer(&opts.dir, &opts.file_prefix, opts.max_log_files);
            guards.push(guard);
            fmt_layer(writer, opts.log_format, false)
        });

        let err_file_layer = (!opts.dir.is_empty()).then(|| {
            let prefix = format!("{}-err", opts.file_prefix);
            let (writer, guard) = rolling_writer(&opts.dir, &prefix, opts.max_log_files);
            guards.push(guard);
            fmt_layer(writer, opts.log_format, false)
                .with_filter(filter::LevelFilter::ERROR)
                .boxed()
        });

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .unwrap_or_else(|e| panic!("invalid log level string: {e}"));

        let (dyn_filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);
        let _ = RELOAD_HANDLE.set(reload_handle);

        let subscriber = Registry::default()
            .with(dyn_filter)
            .with(stdout_layer)
            .with(file_layer)
            .with(err_file_layer);

        tracing::subscriber::set_global_default(subscriber)
            .unwrap_or_else(|e| panic!("error setting global tracing subscriber: {e}"));

        tracing::info!(
            app = app_name,
            dir = %opts.dir,
            format = %opts.log_format,
            "logging initialised"
        );
    });

    guards
}

fn rolling_writer(dir: &str, prefix: &str, max_files: usize) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(max_files)
        .build(dir)
        .unwrap_or_else(|e| panic!("initializing rolling file appender at {dir} failed: {e}"));
    tracing_appender::non_blocking(appender)
}

fn fmt_layer<S>(
    writer: NonBlocking,
    format: LogFormat,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

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

//! Background thread that snapshots consumer cursors on a fixed interval.
//!
//! ```text
//! ┌──────────────────┐   tick(interval)   ┌────────────────────────────┐
//! │ crossbeam ticker │ ─────────────────► │ consumer-index-persister   │
//! └──────────────────┘                    │ (dedicated thread)         │
//! ┌──────────────────┐   stop / drop      │  persist(); log on failure │
//! │ ConsumerIndex    │ ─────────────────► │                            │
//! └──────────────────┘                    └────────────────────────────┘
//! ```
//!
//! The thread belongs to one `ConsumerIndex`; several indexes in one process
//! each run their own.

use std::{thread::JoinHandle, time::Duration};

use crossbeam::channel::{self, Sender};
use snafu::ResultExt;
use tracing::{debug, error, info};

use crate::error::{PersisterSnafu, Result};

const THREAD_NAME: &str = "consumer-index-persister";

pub(crate) struct Persister {
    stop_tx: Option<Sender<()>>,
    handle:  Option<JoinHandle<()>>,
}

impl Persister {
    /// Start calling `persist` every `interval` until stopped.
    pub(crate) fn spawn<F>(interval: Duration, persist: F) -> Result<Self>
    where
        F: Fn() -> Result<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                info!(interval = ?interval, "consumer index persister started");
                loop {
                    channel::select! {
                        recv(ticker) -> _ => {
                            if let Err(e) = persist() {
                                error!(error = %e, "periodic consumer index persist failed");
                            } else {
                                debug!("periodic consumer index persist done");
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                info!("consumer index persister stopped");
            })
            .context(PersisterSnafu)?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle:  Some(handle),
        })
    }

    /// Stop the thread and wait for an in-flight persist to finish.
    pub(crate) fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("consumer index persister panicked");
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) { self.stop(); }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut persister = Persister::spawn(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        persister.stop();
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected several ticks, got {after_stop}");

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_failures_do_not_stop_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let persister = Persister::spawn(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            crate::error::ClosedSnafu.fail()
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        drop(persister);
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}

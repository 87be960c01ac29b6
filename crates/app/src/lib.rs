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

mod settings;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use pmq_server::Broadcaster;
use snafu::{ResultExt, Whatever};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use crate::settings::{AppConfig, ENV_PREFIX};

/// The broker with lifecycle management
pub struct App {
    config:             AppConfig,
    broadcaster:        Arc<Broadcaster>,
    running:            Arc<AtomicBool>,
    cancellation_token: CancellationToken,
}

impl AppConfig {
    /// Open (or restore) the queue and consumer cursors.
    pub fn open(self) -> Result<App, Whatever> {
        let broadcaster =
            Broadcaster::open(&self.server).whatever_context("Failed to open the broker")?;
        info!(
            segments_root = %self.server.segments_root.display(),
            metadata_path = %self.server.metadata_path.display(),
            "broker opened"
        );
        Ok(App {
            config: self,
            broadcaster,
            running: Arc::new(AtomicBool::new(false)),
            cancellation_token: CancellationToken::new(),
        })
    }
}

/// Handle for controlling a running application
#[derive(Clone)]
pub struct AppHandle {
    running:            Arc<AtomicBool>,
    cancellation_token: CancellationToken,
}

impl AppHandle {
    /// Ask the application to shut down. Returns immediately.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        self.cancellation_token.cancel();
    }

    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }
}

impl App {
    pub const fn config(&self) -> &AppConfig { &self.config }

    /// Entry point for the RPC layer.
    pub const fn broadcaster(&self) -> &Arc<Broadcaster> { &self.broadcaster }

    #[must_use]
    pub fn handle(&self) -> AppHandle {
        AppHandle {
            running:            Arc::clone(&self.running),
            cancellation_token: self.cancellation_token.clone(),
        }
    }

    /// Run until Ctrl-C, SIGTERM or [`AppHandle::shutdown`], then close the
    /// broker: subscriptions end, the queue is flushed and consumer cursors
    /// are persisted one last time.
    pub async fn run(self) -> Result<(), Whatever> {
        self.running.store(true, Ordering::SeqCst);
        info!("Application started");

        shutdown_signal(&self.cancellation_token).await;

        info!("Shutting down broker");
        self.broadcaster
            .close()
            .await
            .whatever_context("Failed to close the broker")?;
        self.running.store(false, Ordering::SeqCst);
        info!("Application shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal(cancellation_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
        () = cancellation_token.cancelled() => { info!("Received shutdown signal"); },
    }
}

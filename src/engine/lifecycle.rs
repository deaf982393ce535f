// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: startup, background task spawning, graceful
//! shutdown.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use super::{EngineState, SyncEngine};

impl SyncEngine {
    /// Start the worker pool, the retry pump, and (when configured) the
    /// periodic reconciliation loop.
    ///
    /// Calling `start` on an engine that is not idle logs a warning and
    /// does nothing; the running pool is left untouched.
    pub async fn start(self: &Arc<Self>) {
        let current = self.state();
        if current != EngineState::Idle {
            warn!(state = %current, "start ignored; engine is not idle");
            return;
        }
        let _ = self.state.send(EngineState::Starting);
        info!(
            workers = self.config.worker_count,
            scan_interval_secs = self.config.scan_interval_secs,
            "starting sync engine"
        );

        let mut handles = Vec::new();
        for worker_id in 0..self.config.worker_count.max(1) {
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                engine.worker_loop(worker_id).await;
            }));
        }
        {
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                engine.retry_pump().await;
            }));
        }
        if self.config.scan_interval_secs > 0 {
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                engine.scan_loop().await;
            }));
        }
        self.workers.lock().await.extend(handles);

        let _ = self.state.send(EngineState::Running);
        info!("sync engine running");
    }

    /// Graceful shutdown.
    ///
    /// Stops task intake, cancels any in-progress reconciliation scan,
    /// lets workers finish the tasks the queue already accepted, and
    /// joins every background task. Retries still parked in the
    /// scheduler are abandoned; the affected entities remain FAILED and
    /// the next scan or webhook picks them back up.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("shutting down sync engine");
        let _ = self.state.send(EngineState::ShuttingDown);
        self.scanner.request_cancel();
        self.queue.close().await;

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        let _ = self.state.send(EngineState::Stopped);
        info!("sync engine stopped");
    }
}

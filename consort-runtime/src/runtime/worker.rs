/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Dedicated worker threads, each driving a named single-threaded runtime.

use crate::observability::events;
use std::future::Future;
use std::thread;
use tokio::sync::watch;
use tracing::{error, info};

const COMPONENT: &str = "worker";

/// Handle to a worker thread. Signalling shutdown and joining the thread are
/// both funneled through [`WorkerHandle::stop`].
pub(crate) struct WorkerHandle {
    name: String,
    thread: Option<thread::JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

/// Spawns a named thread running `task` on its own current-thread runtime.
/// The task receives a watch channel that flips to `true` when the worker
/// should wind down.
pub(crate) fn spawn_worker<F, Fut>(name: &str, task: F) -> WorkerHandle
where
    F: FnOnce(watch::Receiver<bool>) -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let thread_name = name.to_string();
    let thread = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Unable to build worker runtime");
            runtime.block_on(task(shutdown_rx));
        })
        .expect("Unable to spawn worker thread");
    info!(
        event = events::RUNTIME_WORKER_SPAWNED,
        component = COMPONENT,
        worker_id = name,
        "worker thread started"
    );
    WorkerHandle {
        name: name.to_string(),
        thread: Some(thread),
        shutdown: shutdown_tx,
    }
}

impl WorkerHandle {
    /// Signals shutdown and joins the thread. Joining happens on the blocking
    /// pool because a worker may take a moment to finish its current pass.
    pub(crate) async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.thread.take() {
            let name = self.name.clone();
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            match joined {
                Ok(Ok(())) => {
                    info!(
                        event = events::RUNTIME_WORKER_STOPPED,
                        component = COMPONENT,
                        worker_id = %self.name,
                        "worker thread stopped"
                    );
                }
                _ => {
                    error!(
                        event = events::RUNTIME_WORKER_PANICKED,
                        component = COMPONENT,
                        worker_id = %name,
                        "worker thread panicked before join"
                    );
                }
            }
        }
    }
}

//! The user-facing service: iteration over emitted data items, failure
//! inspection, signal handling, file export.

use crate::{
    cache::build_cache,
    config::ServiceConfig,
    error::{ConfigError, EngineError, WriteError},
    worker::{DataWorker, StopSignal},
    write,
};
use futures::Stream;
use harvester_common::{
    data::DataItem,
    error::FailedRequest,
    request::RequestSource,
};
use std::{collections::HashMap, path::Path};
use tokio::task::JoinHandle;

/// Orchestrates the request → response → data flow for one batch of seed
/// requests.
///
/// Drain it synchronously (it is an [`Iterator`]) or asynchronously via
/// [`DataService::stream`]. Either way the scheduler runs to completion
/// on the first item and the queued data items are handed out one by one.
pub struct DataService {
    worker: DataWorker,
    stop: StopSignal,
    error: Option<EngineError>,
    ran: bool,
}

impl DataService {
    /// Service with the default configuration.
    pub fn new(requests: impl Into<RequestSource>) -> Self {
        let stop = StopSignal::new();
        Self {
            worker: DataWorker::new(
                requests.into(),
                ServiceConfig::default(),
                None,
                stop.clone(),
            ),
            stop,
            error: None,
            ran: false,
        }
    }

    /// Service with a custom configuration; fails when the configuration
    /// is invalid.
    pub fn with_config(
        requests: impl Into<RequestSource>,
        config: ServiceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let cache = build_cache(&config.cache)?;
        let stop = StopSignal::new();
        Ok(Self {
            worker: DataWorker::new(requests.into(), config, cache, stop.clone()),
            stop,
            error: None,
            ran: false,
        })
    }

    /// Handle for requesting a graceful stop from anywhere.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Per-URL failure records accumulated so far.
    pub fn failures(&self) -> HashMap<String, FailedRequest> {
        self.worker.ctx().failures()
    }

    /// The error that ended the run, if any. Per-request failures are in
    /// [`DataService::failures`] instead.
    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    /// Serialize `items` to `path`; the extension picks the format
    /// (`.csv` or `.json`).
    pub fn write<'a, I>(&self, path: impl AsRef<Path>, items: I) -> Result<(), WriteError>
    where
        I: IntoIterator<Item = &'a DataItem>,
    {
        write::write(path.as_ref(), items)
    }

    fn pop_data(&self) -> Option<DataItem> {
        self.worker.ctx().pop_data()
    }

    async fn run_once(&mut self) {
        if self.ran {
            return;
        }
        self.ran = true;
        if let Err(err) = self.worker.run().await {
            log::error!("Engine run failed: {err}");
            self.error = Some(err);
        }
    }

    /// Asynchronous iteration.
    ///
    /// The first poll installs SIGINT/SIGTERM handlers that set the stop
    /// signal, runs the scheduler once, and removes the handlers again;
    /// every poll after that yields one queued data item until the queue
    /// is empty.
    pub fn stream(&mut self) -> impl Stream<Item = DataItem> + '_ {
        futures::stream::unfold((self, true), |(service, first)| async move {
            if first {
                let watcher = spawn_signal_watcher(service.stop.clone());
                service.run_once().await;
                watcher.abort();
            }
            service.pop_data().map(|item| (item, (service, false)))
        })
    }
}

/// Synchronous iteration: the first `next()` runs the whole scheduler on
/// a private runtime, then the data queue drains element by element.
impl Iterator for DataService {
    type Item = DataItem;

    fn next(&mut self) -> Option<DataItem> {
        if !self.ran {
            match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(self.run_once()),
                Err(err) => {
                    log::error!("Failed to build runtime: {err}");
                    self.ran = true;
                }
            }
        }
        self.pop_data()
    }
}

fn spawn_signal_watcher(stop: StopSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        stop.set();
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => log::info!("Received SIGINT, stopping"),
                _ = sigterm.recv() => log::info!("Received SIGTERM, stopping"),
            }
        }
        Err(err) => {
            log::warn!("Failed to install SIGTERM handler: {err}");
            let _ = ctrl_c.await;
            log::info!("Received SIGINT, stopping");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("Received interrupt, stopping");
}

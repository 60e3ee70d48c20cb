//! The work-queue scheduler.

use crate::{
    cache::{Cache, fetch_with_cache},
    config::ServiceConfig,
    dispatch::{self, WorkItem},
    error::EngineError,
};
use backon::Retryable;
use futures::StreamExt;
use harvester_common::{
    data::DataItem,
    error::{ErrorKind, FailedRequest, FetchError},
    limiter::RateLimiter,
    request::{CallbackResult, Node, Request, RequestSource},
    response::Response,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::Semaphore;

/// Cooperative stop flag. The facade sets it on external signals; the
/// scheduler only reads it.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State shared between the scheduler loop and its tasks.
pub(crate) struct WorkerCtx {
    pub(crate) config: ServiceConfig,
    work_queue: Mutex<VecDeque<WorkItem>>,
    data_queue: Mutex<VecDeque<DataItem>>,
    seen: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, FailedRequest>>,
    gate: Semaphore,
    limiter: Option<RateLimiter>,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) stop: StopSignal,
}

impl WorkerCtx {
    pub(crate) fn push_work(&self, item: WorkItem) {
        self.work_queue.lock().push_back(item);
    }

    /// Up to `max_items` entries off the front of the work queue.
    pub(crate) fn pop_batch(&self, max_items: usize) -> Vec<WorkItem> {
        let mut queue = self.work_queue.lock();
        let take = queue.len().min(max_items);
        queue.drain(..take).collect()
    }

    pub(crate) fn work_len(&self) -> usize {
        self.work_queue.lock().len()
    }

    pub(crate) fn push_data(&self, item: DataItem) {
        self.data_queue.lock().push_back(item);
    }

    pub(crate) fn pop_data(&self) -> Option<DataItem> {
        self.data_queue.lock().pop_front()
    }

    pub(crate) fn failures(&self) -> HashMap<String, FailedRequest> {
        self.failures.lock().clone()
    }

    /// Check-and-insert under one lock so two tasks for the same
    /// fingerprint cannot both reach the fetch.
    fn is_duplicate(&self, request: &Request) -> bool {
        let key = request.unique_key();
        let mut seen = self.seen.lock();
        if seen.contains(&key) {
            return true;
        }
        seen.insert(key);
        false
    }

    fn record_failure(&self, request: &Request, message: String, kind: ErrorKind) {
        self.failures.lock().insert(
            request.url().to_string(),
            FailedRequest::new(request.clone(), message, kind),
        );
    }

    /// The full lifecycle of one request: dedup, failure memo, admission,
    /// fetch with retries through the cache, callback, routing of the
    /// callback output.
    pub(crate) async fn handle_request(self: &Arc<Self>, request: Request) {
        if self.config.deduplication && self.is_duplicate(&request) {
            log::debug!("Skipping duplicate request: {}", request.url_encoded());
            return;
        }
        if self.failures.lock().contains_key(request.url().as_str()) {
            log::debug!("Skipping previously failed URL: {}", request.url());
            return;
        }

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        let Ok(_permit) = self.gate.acquire().await else {
            return;
        };
        self.config.delay.apply().await;

        match self.fetch_with_retry(&request).await {
            Ok(response) => self.run_callback(request, response).await,
            Err(err) => match err.kind() {
                ErrorKind::Generic => {
                    log::error!("Error fetching {}: {err}", request.url());
                }
                kind => {
                    log::warn!("Request failed ({kind}): {} - {err}", request.url());
                    self.record_failure(&request, err.to_string(), kind);
                }
            },
        }
    }

    async fn fetch_with_retry(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url_encoded();
        (|| fetch_with_cache(self.cache.as_ref(), request))
            .retry(self.config.retry.clone())
            .when(FetchError::is_retryable)
            .notify(|err, dur| log::info!("Retrying {url} after {dur:?}: {err}"))
            .await
    }

    /// Run the user callback off the scheduler, on the blocking pool, and
    /// route its output. A panicking callback becomes a `Parsing` failure.
    async fn run_callback(self: &Arc<Self>, request: Request, response: Response) {
        let callback = request.callback();
        match tokio::task::spawn_blocking(move || callback(response)).await {
            Ok(result) => self.route_callback_result(result),
            Err(err) => {
                let message = if err.is_panic() {
                    panic_message(err.into_panic())
                } else {
                    err.to_string()
                };
                log::error!("Error processing callback for {}: {message}", request.url());
                self.record_failure(&request, message, ErrorKind::Parsing);
            }
        }
    }

    fn route_callback_result(&self, result: CallbackResult) {
        match result {
            CallbackResult::One(Node::Data(item)) => self.push_data(item),
            CallbackResult::One(Node::Request(request)) => {
                self.push_work(WorkItem::Request(request));
            }
            producer => self.push_work(WorkItem::Producer(producer)),
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

/// Owns the scheduler loop: seeds the work queue, drives the fan-out, and
/// flushes the cache on the way out.
pub(crate) struct DataWorker {
    ctx: Arc<WorkerCtx>,
    requests: Option<RequestSource>,
    started: bool,
}

impl DataWorker {
    pub(crate) fn new(
        requests: RequestSource,
        config: ServiceConfig,
        cache: Option<Arc<dyn Cache>>,
        stop: StopSignal,
    ) -> Self {
        let gate = Semaphore::new(config.max_concurrency);
        let limiter = config
            .limiter
            .as_ref()
            .map(|limiter| RateLimiter::new(limiter.max_rate, limiter.time_period));

        Self {
            ctx: Arc::new(WorkerCtx {
                config,
                work_queue: Mutex::new(VecDeque::new()),
                data_queue: Mutex::new(VecDeque::new()),
                seen: Mutex::new(HashSet::new()),
                failures: Mutex::new(HashMap::new()),
                gate,
                limiter,
                cache,
                stop,
            }),
            requests: Some(requests),
            started: false,
        }
    }

    pub(crate) fn ctx(&self) -> &Arc<WorkerCtx> {
        &self.ctx
    }

    async fn enqueue_start_requests(&mut self) -> Result<(), EngineError> {
        match self.requests.take() {
            Some(RequestSource::Iter(requests)) => {
                for request in requests {
                    self.ctx.push_work(WorkItem::Request(Box::new(request)));
                }
            }
            Some(RequestSource::Stream(mut requests)) => {
                while let Some(request) = requests.next().await {
                    self.ctx.push_work(WorkItem::Request(Box::new(request)));
                }
            }
            None => {}
        }

        if self.ctx.work_len() == 0 {
            return Err(EngineError::EmptyInput);
        }
        Ok(())
    }

    /// Run the scheduler to completion. Idempotent; a second call is a
    /// no-op.
    pub(crate) async fn run(&mut self) -> Result<(), EngineError> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        self.enqueue_start_requests().await?;

        if let Some(cache) = &self.ctx.cache {
            cache.load().await?;
        }

        let result = self.run_loop().await;

        if let Some(cache) = &self.ctx.cache {
            cache.flush().await?;
        }

        result
    }

    /// One batch of queue items per cycle, at most `max_concurrency` of
    /// them; the gate bounds the fetches their fan-out produces.
    async fn run_loop(&mut self) -> Result<(), EngineError> {
        loop {
            if self.ctx.stop.is_set() {
                log::info!("Stop signal set, shutting down");
                break;
            }
            let batch = self.ctx.pop_batch(self.ctx.config.max_concurrency);
            if batch.is_empty() {
                break;
            }
            log::debug!("Work queue size: {}", self.ctx.work_len());

            let mut tasks = Vec::new();
            for item in batch {
                tasks.extend(dispatch::spawn_tasks(&self.ctx, item).await);
            }
            for task in tasks {
                if let Err(err) = task.await {
                    log::error!("Scheduler task failed: {err}");
                }
            }

            if let Some(cache) = &self.ctx.cache {
                cache.tick(self.ctx.config.cache.write_interval).await?;
            }
        }
        Ok(())
    }
}

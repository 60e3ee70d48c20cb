//! End-to-end scheduler scenarios against a scripted in-memory fetcher.

use futures::StreamExt;
use harvester_engine::{
    CallbackResult, DataItem, DataService, ErrorKind, FetchError, Fetcher, LimiterConfig, Request,
    RequestBuilder, Response, RetryConfig, ServiceConfig, StopSignal,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

type Script = Box<dyn Fn(&Request, usize) -> Result<Response, FetchError> + Send + Sync>;

/// Fetcher driven by a closure of (request, per-URL attempt number),
/// counting every invocation.
struct ScriptedFetcher {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
    script: Script,
}

impl ScriptedFetcher {
    fn new(
        script: impl Fn(&Request, usize) -> Result<Response, FetchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            attempts: Mutex::new(HashMap::new()),
            script: Box::new(script),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        // keep fetches overlapping so the concurrency ceiling is observable
        tokio::time::sleep(Duration::from_millis(5)).await;

        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(request.url().to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let result = (self.script)(request, attempt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn ok(request: &Request, body: &str) -> Result<Response, FetchError> {
    Ok(Response::new(request.clone(), request.url_encoded(), 200).text(body))
}

fn status_err(status: u16) -> FetchError {
    if status == 403 || status == 429 || status >= 500 {
        FetchError::Retryable {
            message: format!("HTTP status {status}"),
            status: Some(status),
        }
    } else {
        FetchError::NonRetryable {
            message: format!("HTTP status {status}"),
            status: Some(status),
        }
    }
}

fn seed(fetcher: &Arc<ScriptedFetcher>, url: &str) -> RequestBuilder {
    Request::get(url).fetcher(fetcher.clone())
}

fn fast_retries() -> ServiceConfig {
    ServiceConfig::new().retry(RetryConfig::immediate(3))
}

/// Single successful request, drained through the synchronous iterator.
#[test]
fn single_request_emits_one_item() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));
    let request = seed(&fetcher, "https://x/a")
        .callback(|_| DataItem::new().field("k", 1).into())
        .build()
        .unwrap();

    let mut service = DataService::new(vec![request]);
    let items: Vec<DataItem> = service.by_ref().collect();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("k"), Some(&serde_json::json!(1)));
    assert!(service.failures().is_empty());
    assert!(service.error().is_none());
    assert_eq!(fetcher.calls(), 1);
}

/// The same flow through the asynchronous stream.
#[tokio::test]
async fn single_request_emits_one_item_async() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));
    let request = seed(&fetcher, "https://x/a")
        .callback(|_| DataItem::new().field("k", 1).into())
        .build()
        .unwrap();

    let mut service = DataService::new(vec![request]);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 1);
    assert!(service.failures().is_empty());
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn non_retryable_failure_is_recorded_once() {
    let fetcher = ScriptedFetcher::new(|_, _| Err(status_err(404)));
    let request = seed(&fetcher, "https://x/404")
        .callback(|_| DataItem::new().into())
        .build()
        .unwrap();

    let mut service = DataService::new(vec![request]);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert!(items.is_empty());
    assert_eq!(fetcher.calls(), 1);

    let failures = service.failures();
    let failure = &failures["https://x/404"];
    assert_eq!(failure.kind, ErrorKind::NonRetryable);
    assert_eq!(failure.request.url().as_str(), "https://x/404");
}

#[tokio::test]
async fn retryable_failure_succeeds_within_the_envelope() {
    let fetcher = ScriptedFetcher::new(|request, attempt| {
        if attempt < 3 {
            Err(status_err(500))
        } else {
            ok(request, "finally")
        }
    });
    let request = seed(&fetcher, "https://x/flaky")
        .callback(|response| DataItem::new().field("body", response.body()).into())
        .build()
        .unwrap();

    let mut service = DataService::with_config(vec![request], fast_retries()).unwrap();
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].get("body"), Some(&serde_json::json!("finally")));
    assert_eq!(fetcher.calls(), 3);
    assert!(service.failures().is_empty());
}

#[tokio::test]
async fn exhausted_retries_record_the_failure() {
    let fetcher = ScriptedFetcher::new(|_, _| Err(status_err(500)));
    let request = seed(&fetcher, "https://x/down")
        .callback(|_| DataItem::new().into())
        .build()
        .unwrap();

    let mut service = DataService::with_config(vec![request], fast_retries()).unwrap();
    let items: Vec<DataItem> = service.stream().collect().await;

    assert!(items.is_empty());
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(
        service.failures()["https://x/down"].kind,
        ErrorKind::Retryable
    );
}

#[tokio::test]
async fn timeouts_retry_and_keep_their_kind() {
    let fetcher = ScriptedFetcher::new(|_, _| Err(FetchError::Timeout("read timed out".into())));
    let request = seed(&fetcher, "https://x/slow")
        .callback(|_| DataItem::new().into())
        .build()
        .unwrap();

    let mut service = DataService::with_config(vec![request], fast_retries()).unwrap();
    let _: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(fetcher.calls(), 3);
    assert_eq!(service.failures()["https://x/slow"].kind, ErrorKind::Timeout);
}

/// A fan-out yielding the same URL twice fetches it once and emits one
/// item downstream.
#[tokio::test]
async fn duplicate_requests_are_fetched_once() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "page"));
    let fetcher_for_seed = fetcher.clone();

    let request = seed(&fetcher, "https://x/seed")
        .callback(move |_| {
            let children: Vec<harvester_engine::Node> = (0..2)
                .map(|_| {
                    Request::get("https://x/p")
                        .fetcher(fetcher_for_seed.clone())
                        .callback(|_| DataItem::new().field("page", "p").into())
                        .build()
                        .unwrap()
                        .into()
                })
                .collect();
            CallbackResult::seq(children)
        })
        .build()
        .unwrap();

    let mut service = DataService::new(vec![request]);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 1);
    // seed + one fetch of /p
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn dedup_can_be_disabled() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "page"));
    let fetcher_for_seed = fetcher.clone();

    let request = seed(&fetcher, "https://x/seed")
        .callback(move |_| {
            let children: Vec<harvester_engine::Node> = (0..2)
                .map(|_| {
                    Request::get("https://x/p")
                        .fetcher(fetcher_for_seed.clone())
                        .callback(|_| DataItem::new().field("page", "p").into())
                        .build()
                        .unwrap()
                        .into()
                })
                .collect();
            CallbackResult::seq(children)
        })
        .build()
        .unwrap();

    let config = ServiceConfig::new().deduplication(false);
    let mut service = DataService::with_config(vec![request], config).unwrap();
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(fetcher.calls(), 3);
}

/// Requests with distinct fingerprints but one URL share the failure
/// memo: once the URL fails, it is never fetched again in the run.
#[tokio::test]
async fn failed_urls_are_not_fetched_again() {
    let fetcher = ScriptedFetcher::new(|_, _| Err(status_err(404)));

    let first = seed(&fetcher, "https://x/a")
        .param("page", "1")
        .callback(|_| DataItem::new().into())
        .build()
        .unwrap();
    let second = seed(&fetcher, "https://x/a")
        .param("page", "2")
        .callback(|_| DataItem::new().into())
        .build()
        .unwrap();

    // sequential batches so the failure lands before the second attempt
    let config = ServiceConfig::new().max_concurrency(1);
    let mut service = DataService::with_config(vec![first, second], config).unwrap();
    let _: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(service.failures().len(), 1);
}

#[tokio::test]
async fn panicking_callback_records_parsing_failure_and_continues() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));

    let bad = seed(&fetcher, "https://x/bad")
        .callback(|_| panic!("missing selector"))
        .build()
        .unwrap();
    let good = seed(&fetcher, "https://x/good")
        .callback(|_| DataItem::new().field("k", 1).into())
        .build()
        .unwrap();

    let mut service = DataService::new(vec![bad, good]);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 1);
    assert_eq!(fetcher.calls(), 2);

    let failures = service.failures();
    let failure = &failures["https://x/bad"];
    assert_eq!(failure.kind, ErrorKind::Parsing);
    assert!(failure.message.contains("missing selector"));
}

#[tokio::test]
async fn generic_errors_are_not_recorded_and_do_not_poison_the_run() {
    let fetcher = ScriptedFetcher::new(|request, _| {
        if request.url().path() == "/broken" {
            Err(FetchError::Generic(anyhow::anyhow!("wire corruption")))
        } else {
            ok(request, "ok")
        }
    });

    let broken = seed(&fetcher, "https://x/broken")
        .callback(|_| DataItem::new().into())
        .build()
        .unwrap();
    let good = seed(&fetcher, "https://x/good")
        .callback(|_| DataItem::new().field("k", 1).into())
        .build()
        .unwrap();

    let mut service = DataService::new(vec![broken, good]);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 1);
    assert_eq!(fetcher.calls(), 2);
    assert!(service.failures().is_empty());
}

#[tokio::test]
async fn async_callback_results_are_drained() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));

    let request = seed(&fetcher, "https://x/seed")
        .callback(|_| {
            let nodes: Vec<harvester_engine::Node> = vec![
                DataItem::new().field("n", 1).into(),
                DataItem::new().field("n", 2).into(),
            ];
            CallbackResult::stream(futures::stream::iter(nodes).boxed())
        })
        .build()
        .unwrap();

    let mut service = DataService::new(vec![request]);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn async_request_sources_seed_the_run() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));
    let requests: Vec<Request> = (0..2)
        .map(|i| {
            seed(&fetcher, &format!("https://x/{i}"))
                .callback(|_| DataItem::new().field("k", 1).into())
                .build()
                .unwrap()
        })
        .collect();

    let source = harvester_engine::RequestSource::from_stream(
        futures::stream::iter(requests).boxed(),
    );
    let mut service = DataService::new(source);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(fetcher.calls(), 2);
}

/// A callback returning a single follow-up request keeps the crawl going
/// until nothing new is produced.
#[tokio::test]
async fn chained_requests_crawl_until_the_queue_drains() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));
    let fetcher_for_next = fetcher.clone();

    let request = seed(&fetcher, "https://x/page/1")
        .callback(move |_| {
            Request::get("https://x/page/2")
                .fetcher(fetcher_for_next.clone())
                .callback(|response| {
                    DataItem::new()
                        .field("url", response.url().as_str())
                        .into()
                })
                .build()
                .unwrap()
                .into()
        })
        .build()
        .unwrap();

    let mut service = DataService::new(vec![request]);
    let items: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].get("url"),
        Some(&serde_json::json!("https://x/page/2"))
    );
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn empty_input_is_an_error() {
    let mut service = DataService::new(Vec::new());
    let items: Vec<DataItem> = service.stream().collect().await;

    assert!(items.is_empty());
    assert!(matches!(
        service.error(),
        Some(harvester_engine::EngineError::EmptyInput)
    ));
}

#[tokio::test]
async fn in_flight_fetches_stay_under_the_gate() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));
    let requests: Vec<Request> = (0..12)
        .map(|i| {
            seed(&fetcher, &format!("https://x/{i}"))
                .callback(|_| DataItem::new().into())
                .build()
                .unwrap()
        })
        .collect();

    let config = ServiceConfig::new().max_concurrency(3);
    let mut service = DataService::with_config(requests, config).unwrap();
    let _: Vec<DataItem> = service.stream().collect().await;

    assert_eq!(fetcher.calls(), 12);
    assert!(fetcher.max_in_flight() <= 3);
}

#[tokio::test]
async fn rate_limiter_bounds_fetch_starts() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));
    let requests: Vec<Request> = (0..4)
        .map(|i| {
            seed(&fetcher, &format!("https://x/{i}"))
                .callback(|_| DataItem::new().into())
                .build()
                .unwrap()
        })
        .collect();

    let period = Duration::from_millis(100);
    let config = ServiceConfig::new().limiter(LimiterConfig::new(2, period));
    let mut service = DataService::with_config(requests, config).unwrap();

    let start = Instant::now();
    let _: Vec<DataItem> = service.stream().collect().await;

    // 4 starts at 2 per window needs at least one extra window
    assert!(start.elapsed() >= period);
    assert_eq!(fetcher.calls(), 4);
}

/// Stop mid-run: the current batch finishes, nothing else is fetched,
/// and the iterator still terminates cleanly.
#[tokio::test]
async fn stop_signal_ends_the_run_after_the_current_batch() {
    let fetcher = ScriptedFetcher::new(|request, _| ok(request, "ok"));
    let completed = Arc::new(AtomicUsize::new(0));
    let stop_slot: Arc<OnceLock<StopSignal>> = Arc::new(OnceLock::new());

    let requests: Vec<Request> = (0..100)
        .map(|i| {
            let completed = completed.clone();
            let stop_slot = stop_slot.clone();
            seed(&fetcher, &format!("https://x/{i}"))
                .callback(move |_| {
                    if completed.fetch_add(1, Ordering::SeqCst) + 1 >= 2
                        && let Some(stop) = stop_slot.get()
                    {
                        stop.set();
                    }
                    DataItem::new().into()
                })
                .build()
                .unwrap()
        })
        .collect();

    let config = ServiceConfig::new().max_concurrency(4);
    let mut service = DataService::with_config(requests, config).unwrap();
    stop_slot.set(service.stop_signal()).ok();

    let items: Vec<DataItem> = service.stream().collect().await;

    // the in-flight batch of at most 4 runs out, the rest never start
    assert!(fetcher.calls() <= 8);
    assert_eq!(items.len(), fetcher.calls());
    assert!(service.failures().is_empty());
}

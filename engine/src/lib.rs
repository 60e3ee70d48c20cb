//! A concurrent, cache-aware, retry-capable data-extraction engine.
//!
//! Seed the service with requests; every response is handed to the
//! request's callback, and whatever the callback yields (more requests,
//! data items, or a lazy sequence of either) becomes further work. The
//! run ends when the work queue drains, and the collected data items come
//! back as an iterator.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use harvester_engine::{
//!     CallbackResult, DataItem, DataService, HttpFetcher, HttpFetcherOptions, Request,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let fetcher = Arc::new(HttpFetcher::new(HttpFetcherOptions::new())?);
//!
//!     let seed = Request::get("https://books.toscrape.com/")
//!         .fetcher(fetcher)
//!         .callback(|response| {
//!             let html = match response.html() {
//!                 Ok(html) => html,
//!                 Err(_) => return CallbackResult::empty(),
//!             };
//!             let selector = harvester_engine::scraper::Selector::parse("title").unwrap();
//!             let title = html
//!                 .select(&selector)
//!                 .next()
//!                 .map(|t| t.text().collect::<String>())
//!                 .unwrap_or_default();
//!             DataItem::new().field("title", title).into()
//!         })
//!         .build()?;
//!
//!     let service = DataService::new(vec![seed]);
//!     for item in service {
//!         println!("{item:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
mod dispatch;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod worker;
pub mod write;

pub use cache::{
    BinaryFileCache, Cache, CacheEntry, JsonFileCache, RemoteCache, RemoteHooks,
};
pub use config::{CacheConfig, CacheType, LimiterConfig, ServiceConfig};
pub use error::{ConfigError, EngineError, PipelineError, WriteError};
pub use pipeline::{Pipeline, StageFn};
pub use service::DataService;
pub use worker::StopSignal;

// the model and plumbing types users touch, re-exported from the common crate
pub use harvester_common::scraper;
pub use harvester_common::{
    data::{DataError, DataItem},
    error::{ErrorKind, FailedRequest, FetchError, RequestError, ResponseError},
    fetcher::{Fetcher, HttpFetcher, HttpFetcherOptions},
    limiter::{DelayConfig, DelayKind},
    request::{
        CallbackResult, ContentType, Method, Node, Proxy, Request, RequestBuilder, RequestSource,
    },
    response::Response,
    retry::RetryConfig,
};

//! The fetcher capability.
//!
//! The scheduler only ever sees this trait; concrete transports live
//! behind it. [`HttpFetcher`] is the bundled plain-HTTP implementation.
//! A headless-browser fetcher can be plugged in externally: such a
//! fetcher may run a user action on the page before returning, intercept
//! sub-resource fetches by URL substring, and must collate the captured
//! bodies into a single [`Response`] whose `data` is an object keyed by
//! intercepted URL, with the top-level HTML in the body.

mod http;
pub use http::*;

use crate::{error::FetchError, request::Request, response::Response};

/// Turn a [`Request`] into a [`Response`] or a typed error.
///
/// Implementations apply the request's headers, cookies, proxy and
/// timeout, follow redirects, buffer the whole body, and parse it as JSON
/// when the request's content type asks for it. Instances are shared
/// immutably between tasks.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

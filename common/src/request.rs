//! The request model and the canonical fingerprint used for deduplication
//! and caching.

use crate::{data::DataItem, error::RequestError, fetcher::Fetcher, response::Response};
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    time::Duration,
};
use url::Url;

/// User callback, run once per successful response.
pub type Callback = Arc<dyn Fn(Response) -> CallbackResult + Send + Sync>;

/// One unit of callback output.
pub enum Node {
    Request(Box<Request>),
    Data(DataItem),
}

impl From<Request> for Node {
    fn from(request: Request) -> Self {
        Self::Request(Box::new(request))
    }
}

impl From<DataItem> for Node {
    fn from(item: DataItem) -> Self {
        Self::Data(item)
    }
}

/// What a callback may yield: a single node, a finite synchronous
/// sequence, or an asynchronous sequence. This set is closed; the
/// scheduler dispatches on it without further type probing.
pub enum CallbackResult {
    One(Node),
    Seq(Box<dyn Iterator<Item = Node> + Send>),
    Stream(BoxStream<'static, Node>),
}

impl CallbackResult {
    pub fn seq<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Node>,
        I::IntoIter: Send + 'static,
    {
        Self::Seq(Box::new(iter.into_iter()))
    }

    pub fn stream(stream: BoxStream<'static, Node>) -> Self {
        Self::Stream(stream)
    }

    /// A callback that produces no further work.
    pub fn empty() -> Self {
        Self::Seq(Box::new(std::iter::empty()))
    }
}

impl From<Request> for CallbackResult {
    fn from(request: Request) -> Self {
        Self::One(request.into())
    }
}

impl From<DataItem> for CallbackResult {
    fn from(item: DataItem) -> Self {
        Self::One(item.into())
    }
}

impl fmt::Debug for CallbackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(Node::Request(request)) => write!(f, "One(Request({}))", request.url()),
            Self::One(Node::Data(_)) => f.write_str("One(Data)"),
            Self::Seq(_) => f.write_str("Seq(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
        })
    }
}

/// Whether the fetcher should parse the body as JSON into
/// [`Response::data`](crate::response::Response::data).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentType {
    #[default]
    Text,
    Json,
}

/// Outbound proxy for a single request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Proxy endpoint in URL form, credentials excluded.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// An immutable unit of work: where to fetch, how, and what to do with the
/// response.
#[derive(Clone)]
pub struct Request {
    url: Url,
    method: Method,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    form_data: BTreeMap<String, String>,
    json_data: Option<Value>,
    cookies: BTreeMap<String, String>,
    content_type: ContentType,
    proxy: Option<Proxy>,
    timeout: Duration,
    callback: Callback,
    fetcher: Arc<dyn Fetcher>,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Shorthand for a GET request builder.
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::default().url(url)
    }

    /// Shorthand for a POST request builder.
    pub fn post(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::default().url(url).method(Method::Post)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn form_data(&self) -> &BTreeMap<String, String> {
        &self.form_data
    }

    pub fn json_data(&self) -> Option<&Value> {
        self.json_data.as_ref()
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn callback(&self) -> Callback {
        self.callback.clone()
    }

    pub fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    /// The request URL with `params` appended, sorted. Used in logs and as
    /// the URL of responses synthesized from cache entries.
    pub fn url_encoded(&self) -> Url {
        let mut url = self.url.clone();
        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Canonical fingerprint, stable across runs: the dedup and cache key.
    ///
    /// `"{METHOD} {url}[ params={..}][ form_data={..}][ json_data={..}]"`,
    /// inner maps serialized with sorted keys.
    pub fn unique_key(&self) -> String {
        let mut key = format!("{} {}", self.method, self.url_encoded());
        if !self.params.is_empty() {
            key.push_str(&format!(" params={}", sorted_json(&self.params)));
        }
        if !self.form_data.is_empty() {
            key.push_str(&format!(" form_data={}", sorted_json(&self.form_data)));
        }
        if let Some(json_data) = &self.json_data {
            // serde_json objects iterate in key order
            key.push_str(&format!(" json_data={json_data}"));
        }
        key
    }
}

// The callback and fetcher capabilities are opaque; everything else prints.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("content_type", &self.content_type)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn sorted_json(map: &BTreeMap<String, String>) -> String {
    serde_json::to_string(map).unwrap_or_default()
}

/// Builder for [`Request`]. Validation happens in [`RequestBuilder::build`].
#[derive(Default)]
pub struct RequestBuilder {
    url: Option<String>,
    method: Method,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    form_data: BTreeMap<String, String>,
    json_data: Option<Value>,
    cookies: BTreeMap<String, String>,
    content_type: ContentType,
    proxy: Option<Proxy>,
    timeout: Option<Duration>,
    callback: Option<Callback>,
    fetcher: Option<Arc<dyn Fetcher>>,
}

impl RequestBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_data.insert(name.into(), value.into());
        self
    }

    pub fn json_data(mut self, json_data: Value) -> Self {
        self.json_data = Some(json_data);
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Response) -> CallbackResult + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn build(self) -> Result<Request, RequestError> {
        let url: Url = self.url.ok_or(RequestError::MissingUrl)?.parse()?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(RequestError::Scheme(other.to_string())),
        }

        let has_body = !self.form_data.is_empty() || self.json_data.is_some();
        match self.method {
            Method::Post if !has_body => return Err(RequestError::PostWithoutBody),
            Method::Get if has_body => return Err(RequestError::GetWithBody),
            _ => {}
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout < Duration::from_secs(1) || timeout > MAX_TIMEOUT {
            return Err(RequestError::TimeoutRange(timeout.as_secs()));
        }

        Ok(Request {
            url,
            method: self.method,
            headers: self.headers,
            params: self.params,
            form_data: self.form_data,
            json_data: self.json_data,
            cookies: self.cookies,
            content_type: self.content_type,
            proxy: self.proxy,
            timeout,
            callback: self.callback.ok_or(RequestError::MissingCallback)?,
            fetcher: self.fetcher.ok_or(RequestError::MissingFetcher)?,
        })
    }
}

/// The seed requests handed to the engine: a finite iterator or an
/// asynchronous stream.
pub enum RequestSource {
    Iter(Box<dyn Iterator<Item = Request> + Send>),
    Stream(BoxStream<'static, Request>),
}

impl RequestSource {
    pub fn from_stream(stream: BoxStream<'static, Request>) -> Self {
        Self::Stream(stream)
    }
}

impl From<Vec<Request>> for RequestSource {
    fn from(requests: Vec<Request>) -> Self {
        Self::Iter(Box::new(requests.into_iter()))
    }
}

impl fmt::Debug for RequestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iter(_) => f.write_str("RequestSource::Iter(..)"),
            Self::Stream(_) => f.write_str("RequestSource::Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;

    struct NoFetcher;

    #[async_trait::async_trait]
    impl Fetcher for NoFetcher {
        async fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
            Err(FetchError::Generic(anyhow::anyhow!("not wired")))
        }
    }

    fn builder(url: &str) -> RequestBuilder {
        Request::get(url)
            .callback(|_| CallbackResult::empty())
            .fetcher(Arc::new(NoFetcher))
    }

    #[test]
    fn fingerprint_is_method_and_url() {
        let request = builder("https://x/a").build().unwrap();
        assert_eq!(request.unique_key(), "GET https://x/a");
    }

    #[test]
    fn fingerprint_includes_sorted_params() {
        let request = builder("https://x/a")
            .param("b", "2")
            .param("a", "1")
            .build()
            .unwrap();
        assert_eq!(
            request.unique_key(),
            r#"GET https://x/a?a=1&b=2 params={"a":"1","b":"2"}"#
        );
    }

    #[test]
    fn fingerprint_includes_form_data() {
        let request = builder("https://x/login")
            .method(Method::Post)
            .form("user", "u")
            .build()
            .unwrap();
        assert_eq!(
            request.unique_key(),
            r#"POST https://x/login form_data={"user":"u"}"#
        );
    }

    #[test]
    fn fingerprint_is_stable_across_clones() {
        let request = builder("https://x/a").param("q", "1").build().unwrap();
        assert_eq!(request.unique_key(), request.clone().unique_key());
    }

    #[test]
    fn get_with_body_is_rejected() {
        let err = builder("https://x/a").form("k", "v").build().unwrap_err();
        assert!(matches!(err, RequestError::GetWithBody));
    }

    #[test]
    fn post_without_body_is_rejected() {
        let err = builder("https://x/a")
            .method(Method::Post)
            .build()
            .unwrap_err();
        assert!(matches!(err, RequestError::PostWithoutBody));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let err = builder("ftp://x/a").build().unwrap_err();
        assert!(matches!(err, RequestError::Scheme(_)));
    }

    #[test]
    fn timeout_out_of_range_is_rejected() {
        let err = builder("https://x/a")
            .timeout(Duration::from_secs(301))
            .build()
            .unwrap_err();
        assert!(matches!(err, RequestError::TimeoutRange(301)));
    }

    #[test]
    fn url_encoded_appends_params() {
        let request = builder("https://x/a").param("q", "1").build().unwrap();
        assert_eq!(request.url_encoded().as_str(), "https://x/a?q=1");
        // the base URL is untouched
        assert_eq!(request.url().as_str(), "https://x/a");
    }
}

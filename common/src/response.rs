//! The response model handed to user callbacks.

use crate::{
    error::ResponseError,
    request::{ContentType, Request},
};
use scraper::Html;
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// A fetched response.
///
/// Lives for the duration of one callback invocation; callbacks must not
/// store it past their return.
#[derive(Clone, Debug)]
pub struct Response {
    request: Request,
    url: Url,
    status: u16,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    text: String,
    data: Option<Value>,
}

impl Response {
    pub fn new(request: Request, url: Url, status: u16) -> Self {
        Self {
            request,
            url,
            status,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            text: String::new(),
            data: None,
        }
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn cookies(mut self, cookies: BTreeMap<String, String>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn data(mut self, data: impl Into<Option<Value>>) -> Self {
        self.data = data.into();
        self
    }

    /// The request that produced this response.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Final URL, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn all_headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn all_cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Raw body.
    pub fn body(&self) -> &str {
        &self.text
    }

    /// Parsed JSON body, present when the request asked for
    /// [`ContentType::Json`].
    pub fn json(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Parse the body into an HTML tree.
    ///
    /// Fails for JSON-type responses. The tree is parsed on each call and
    /// is not `Send`; callbacks parse into a local and query that.
    pub fn html(&self) -> Result<Html, ResponseError> {
        if self.request.content_type() == ContentType::Json || self.data.is_some() {
            return Err(ResponseError::JsonBody);
        }
        Ok(Html::parse_document(&self.text))
    }
}

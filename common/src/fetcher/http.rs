use crate::{
    error::FetchError,
    fetcher::Fetcher,
    http::retry_after_from_response,
    request::{ContentType, Method, Proxy, Request},
    response::Response,
};
use anyhow::Context;
use parking_lot::Mutex;
use reqwest::{Client, ClientBuilder, header};
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

/// Options for the [`HttpFetcher`]
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct HttpFetcherOptions {
    /// Used when a 429 response does not include a Retry-After header.
    pub default_retry_after: Duration,
    pub user_agent: Option<String>,
}

impl HttpFetcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_retry_after(mut self, duration: impl Into<Duration>) -> Self {
        self.default_retry_after = duration.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

impl Default for HttpFetcherOptions {
    fn default() -> Self {
        Self {
            default_retry_after: Duration::from_secs(10),
            user_agent: None,
        }
    }
}

/// Plain HTTP implementation of [`Fetcher`] on top of a shared client.
///
/// Requests with a proxy get a dedicated client, built once per proxy
/// endpoint and kept for the lifetime of the fetcher.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    proxied: Mutex<HashMap<String, Client>>,
    options: HttpFetcherOptions,
}

impl HttpFetcher {
    pub fn new(options: HttpFetcherOptions) -> anyhow::Result<Self> {
        let client = Self::client_builder(&options).build()?;
        Ok(Self {
            client,
            proxied: Mutex::new(HashMap::new()),
            options,
        })
    }

    fn client_builder(options: &HttpFetcherOptions) -> ClientBuilder {
        let mut builder = ClientBuilder::new();
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder
    }

    fn client_for(&self, proxy: Option<&Proxy>) -> Result<Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.client.clone());
        };

        let endpoint = proxy.endpoint();
        if let Some(client) = self.proxied.lock().get(&endpoint) {
            return Ok(client.clone());
        }

        let mut upstream = reqwest::Proxy::all(&endpoint)
            .with_context(|| format!("Invalid proxy endpoint: {endpoint}"))?;
        if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
            upstream = upstream.basic_auth(username, password);
        }
        let client = Self::client_builder(&self.options)
            .proxy(upstream)
            .build()
            .context("Failed to build proxied client")?;

        self.proxied.lock().insert(endpoint, client.clone());
        Ok(client)
    }

    fn new_request(
        &self,
        client: &Client,
        request: &Request,
    ) -> Result<reqwest::RequestBuilder, FetchError> {
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = client
            .request(method, request.url().clone())
            .timeout(request.timeout());

        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if !request.cookies().is_empty() {
            builder = builder.header(header::COOKIE, cookie_header(request.cookies()));
        }
        if !request.params().is_empty() {
            builder = builder.query(request.params());
        }
        if request.method() == Method::Post {
            if !request.form_data().is_empty() {
                builder = builder.form(request.form_data());
            }
            if let Some(json_data) = request.json_data() {
                builder = builder.json(json_data);
            }
        }

        Ok(builder)
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        log::debug!("Fetching: {}", request.url_encoded());

        let client = self.client_for(request.proxy())?;
        let response = self
            .new_request(&client, request)?
            .send()
            .await
            .map_err(classify_transport)?;

        log::debug!("Response status: {}", response.status());

        if let Some(retry_after) =
            retry_after_from_response(&response, self.options.default_retry_after)
        {
            log::info!("Rate limited (429), retry after: {retry_after:?}");
            return Err(FetchError::Retryable {
                message: format!("rate limited (HTTP 429), retry after {retry_after:?}"),
                status: Some(429),
            });
        }

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP status {status} for {}", request.url_encoded());
            // 403 is commonly bot-detection noise, treated as transient
            return if status.as_u16() == 403 || status.is_server_error() {
                Err(FetchError::Retryable {
                    message,
                    status: Some(status.as_u16()),
                })
            } else {
                Err(FetchError::NonRetryable {
                    message,
                    status: Some(status.as_u16()),
                })
            };
        }

        let final_url = response.url().clone();
        let headers = header_map(&response);
        let cookies = set_cookies(&response);

        let text = response.text().await.map_err(classify_transport)?;

        let data = match request.content_type() {
            ContentType::Text => None,
            ContentType::Json => Some(
                serde_json::from_str(&text)
                    .with_context(|| format!("Invalid JSON body from {final_url}"))?,
            ),
        };

        Ok(Response::new(request.clone(), final_url, status.as_u16())
            .headers(headers)
            .cookies(cookies)
            .text(text)
            .data(data))
    }
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(err.to_string())
    } else if err.is_connect() {
        FetchError::Retryable {
            message: err.to_string(),
            status: None,
        }
    } else {
        FetchError::Generic(err.into())
    }
}

fn cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn header_map(response: &reqwest::Response) -> BTreeMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn set_cookies(response: &reqwest::Response) -> BTreeMap<String, String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| {
            let value = value.to_str().ok()?;
            let pair = value.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

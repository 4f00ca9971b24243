//! Request/response model and network fetching
//!
//! `Fetcher` is the seam between the cache component and the network. The
//! production implementation wraps a reqwest `Client`; tests script responses
//! in memory.

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::RequestKey;
use crate::error::CacheError;

/// An outgoing fetch as seen by the cache component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// A GET request with no extra headers
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The identity this request is cached under, with the URL in the
    /// fetcher's canonical form
    pub fn cache_key<F: Fetcher + ?Sized>(&self, fetcher: &F) -> RequestKey {
        RequestKey::new(&self.method, &fetcher.normalize(&self.url))
    }
}

/// How the response relates to the requesting origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response
    Basic,
    /// Cross-origin response with readable body
    Cors,
    /// Cross-origin response with hidden status and body
    Opaque,
    /// Network-level error response
    Error,
}

/// A full response snapshot
///
/// The body is held in memory, so cloning a response yields an independent
/// copy and the caller's copy is never consumed by a cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub response_type: ResponseType,
}

impl Response {
    /// A same-origin response with the given status and body
    pub fn basic(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
        }
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether the status is in the 2xx range and the fetch did not error
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status) && self.response_type != ResponseType::Error
    }

    /// Only successful same-origin responses may enter the cache
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.response_type == ResponseType::Basic
    }
}

/// Performs network requests on behalf of the cache component
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch `request` from the network
    ///
    /// Returns `CacheError::Network` when the transport fails. Non-success
    /// statuses are returned as ordinary responses.
    async fn fetch(&self, request: &Request) -> Result<Response, CacheError>;

    /// Canonical form of `url` used for cache keys
    ///
    /// Two spellings that fetch the same resource must normalize to the same
    /// string. The default keeps the URL as given.
    fn normalize(&self, url: &str) -> String {
        url.to_string()
    }
}

/// Fetcher backed by reqwest
///
/// Relative URLs are resolved against the configured origin, and responses
/// whose final URL shares that origin are classified as `Basic`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    /// Create a fetcher for the given origin (e.g. `https://tracker.example`)
    pub fn new(origin: &str) -> Result<Self, CacheError> {
        Ok(Self::with_client(Client::new(), parse_origin(origin)?))
    }

    /// Create a fetcher with a custom HTTP client
    pub fn with_client(client: Client, origin: Url) -> Self {
        Self { client, origin }
    }

    /// Resolve a request URL against the configured origin
    pub fn resolve(&self, url: &str) -> Result<Url, CacheError> {
        self.origin.join(url).map_err(|e| CacheError::Network {
            url: url.to_string(),
            reason: format!("invalid URL: {}", e),
        })
    }

    fn classify(&self, final_url: &Url) -> ResponseType {
        if final_url.origin() == self.origin.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        }
    }
}

fn parse_origin(origin: &str) -> Result<Url, CacheError> {
    Url::parse(origin).map_err(|e| CacheError::Network {
        url: origin.to_string(),
        reason: format!("invalid origin: {}", e),
    })
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// Absolute URL resolved against the origin; unparseable URLs are kept as given
    fn normalize(&self, url: &str) -> String {
        match self.resolve(url) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => url.to_string(),
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
        let url = self.resolve(&request.url)?;
        let method =
            Method::from_bytes(request.method.as_bytes()).map_err(|e| CacheError::Network {
                url: request.url.clone(),
                reason: format!("invalid method: {}", e),
            })?;

        let network_error = |e: reqwest::Error| CacheError::Network {
            url: request.url.clone(),
            reason: e.to_string(),
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let response_type = self.classify(response.url());
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(network_error)?.to_vec();

        debug!(url = %request.url, status, ?response_type, "network fetch complete");

        Ok(Response {
            status,
            headers,
            body,
            response_type,
        })
    }
}

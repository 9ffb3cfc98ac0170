//! Network fall-through for requests the cache cannot answer.

use async_trait::async_trait;
use bytes::Bytes;
use guestbook_common::NetworkConfig;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Outgoing request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl Request {
    /// Create a request.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Response handed back to the page, either stored or fresh from the network.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Whether this response was served from a cache bucket.
    pub from_cache: bool,
}

impl Response {
    /// Create a network response with an empty header map.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// The `fetch()` capability the worker falls back to.
#[async_trait]
pub trait Network: Send + Sync {
    /// Issue a request. Non-2xx statuses are responses, not errors.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

/// `reqwest`-backed network.
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Create a network client from configuration.
    pub fn new(config: &NetworkConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        debug!(user_agent = %config.user_agent, "HttpNetwork initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Network response received"
        );

        Ok(Response {
            url,
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/static/manifest.json").unwrap();
        let request = Request::get(url.clone()).header(
            http::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, url);
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn test_response_ok() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(Response::new(url.clone(), StatusCode::OK, "hi").ok());
        assert!(!Response::new(url, StatusCode::NOT_FOUND, "").ok());
    }

    #[tokio::test]
    async fn test_http_network_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/manifest.json"))
            .and(header("accept", "application/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"name":"guestbook"}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let network = HttpNetwork::new(&NetworkConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/static/manifest.json", server.uri())).unwrap();
        let request = Request::get(url).header(
            http::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        let response = network.fetch(&request).await.unwrap();
        assert!(response.ok());
        assert!(!response.from_cache);
        assert_eq!(response.text().unwrap(), r#"{"name":"guestbook"}"#);
        assert_eq!(
            response.headers.get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_http_network_passes_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let network = HttpNetwork::new(&NetworkConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/missing.png", server.uri())).unwrap();

        let response = network.fetch(&Request::get(url)).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_http_network_connection_refused() {
        let config = NetworkConfig {
            timeout_secs: 2,
            ..Default::default()
        };
        let network = HttpNetwork::new(&config).unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();

        let result = network.fetch(&Request::get(url)).await;
        assert!(matches!(result, Err(NetError::HttpError(_))));
    }

    #[tokio::test]
    async fn test_http_network_sends_configured_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "guestbook-test/1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = NetworkConfig {
            user_agent: "guestbook-test/1".to_string(),
            ..Default::default()
        };
        let network = HttpNetwork::new(&config).unwrap();
        let url = Url::parse(&format!("{}/", server.uri())).unwrap();

        let response = network.fetch(&Request::get(url)).await.unwrap();
        assert!(response.ok());
    }
}

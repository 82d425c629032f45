//! HTTP data source for REST upstreams
//!
//! [`HttpDataSource`] is the reusable capability behind every upstream
//! client: a fixed base origin, a shared [`ResponseCache`], request
//! interceptors and a retrying `GET`. Concrete clients such as
//! [`MoviesApi`](crate::upstream::MoviesApi) compose it rather than
//! re-implementing transport concerns.
//!
//! # Example
//!
//! ```rust,no_run
//! use movies_gateway::cache::{create_response_cache, CacheConfig};
//! use movies_gateway::data_source::{DataSourceConfig, HttpDataSource};
//!
//! # async fn example() -> movies_gateway::Result<()> {
//! let config = DataSourceConfig::new("https://jsonplaceholder.typicode.com");
//! let client = config.build_client()?;
//! let source = HttpDataSource::new(
//!     config.into(),
//!     client,
//!     create_response_cache(CacheConfig::default()),
//!     Default::default(),
//! );
//! let posts: serde_json::Value = source.get("/posts").await?;
//! # Ok(())
//! # }
//! ```

use crate::cache::{ResponseCache, SharedResponseCache};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

/// Configuration shared by every data source instance
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    /// Base origin, without a trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Headers sent with every request
    pub default_headers: HashMap<String, String>,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(10),
            default_headers: HashMap::from([(
                "Accept".to_string(),
                "application/json".to_string(),
            )]),
            retry: RetryConfig::default(),
        }
    }
}

impl DataSourceConfig {
    /// Configuration for the given origin with default settings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().base_url(base_url)
    }

    /// Set the base origin; a trailing slash is trimmed
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a header sent with every request
    pub fn default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set the retry configuration
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Disable retries
    pub fn no_retry(mut self) -> Self {
        self.retry = RetryConfig::disabled();
        self
    }

    /// Build the pooled HTTP client shared by all data source instances
    pub fn build_client(&self) -> Result<reqwest::Client> {
        if self.base_url.is_empty() {
            return Err(Error::Config("upstream requires a base_url".into()));
        }
        reqwest::Url::parse(&self.base_url).map_err(|e| {
            Error::Config(format!("invalid upstream base_url {}: {}", self.base_url, e))
        })?;

        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Retry configuration for failed requests
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// HTTP status codes that should trigger a retry
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            retry_statuses: vec![502, 503, 504],
        }
    }
}

impl RetryConfig {
    /// Disable retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(current.as_secs_f64() * self.multiplier),
            self.max_backoff,
        )
    }
}

/// An outbound request, open to modification by interceptors
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Full URL
    pub url: String,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Timeout for this request
    pub timeout: Duration,
}

/// Raw result of one upstream round trip
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code
    pub status: u16,
    /// `Cache-Control` header, if any
    pub cache_control: Option<String>,
    /// Response body text
    pub body: String,
}

impl UpstreamResponse {
    /// Check if the response indicates success (2xx status)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Hook run on every outbound request before it is sent
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Intercept and potentially modify the request before sending
    async fn intercept(&self, request: &mut UpstreamRequest) -> Result<()>;
}

/// Bearer token authentication interceptor
pub struct BearerAuthInterceptor {
    token: String,
}

impl BearerAuthInterceptor {
    /// Create a new bearer auth interceptor with a static token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl RequestInterceptor for BearerAuthInterceptor {
    async fn intercept(&self, request: &mut UpstreamRequest) -> Result<()> {
        request
            .headers
            .insert("Authorization".to_string(), format!("Bearer {}", self.token));
        Ok(())
    }
}

/// Interceptors applied in registration order
pub type Interceptors = Arc<Vec<Arc<dyn RequestInterceptor>>>;

/// How an upstream response may be cached, derived from `Cache-Control`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Do not store the response
    Bypass,
    /// Store, with the upstream `max-age` if it sent one
    Store(Option<Duration>),
}

impl CachePolicy {
    /// Interpret a `Cache-Control` header value
    pub fn from_cache_control(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return CachePolicy::Store(None);
        };

        let mut max_age = None;
        for directive in header.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            if matches!(directive.as_str(), "no-store" | "no-cache" | "private") {
                return CachePolicy::Bypass;
            }
            if let Some(value) = directive.strip_prefix("max-age=") {
                if let Ok(secs) = value.trim_matches('"').parse::<u64>() {
                    max_age = Some(Duration::from_secs(secs));
                }
            }
        }

        match max_age {
            Some(ttl) if ttl.is_zero() => CachePolicy::Bypass,
            other => CachePolicy::Store(other),
        }
    }
}

/// Cached, retrying `GET` against one fixed origin
#[derive(Clone)]
pub struct HttpDataSource {
    config: Arc<DataSourceConfig>,
    client: reqwest::Client,
    cache: SharedResponseCache,
    interceptors: Interceptors,
}

impl std::fmt::Debug for HttpDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDataSource")
            .field("base_url", &self.config.base_url)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl HttpDataSource {
    /// Bind a data source to shared configuration, client and cache.
    ///
    /// Construction performs no I/O.
    pub fn new(
        config: Arc<DataSourceConfig>,
        client: reqwest::Client,
        cache: SharedResponseCache,
        interceptors: Interceptors,
    ) -> Self {
        Self {
            config,
            client,
            cache,
            interceptors,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Resolve a path against the base origin
    pub fn resolve_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url,
            path.trim_start_matches('/')
        )
    }

    /// `GET` a path and decode the body into `T`, consulting the shared
    /// cache first.
    ///
    /// A response is cached only once it has decoded into `T`, so a body of
    /// the wrong shape is refetched on the next request.
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.resolve_url(path);
        let cache_key = ResponseCache::generate_cache_key("GET", &url);

        if let Some(body) = self.cache.get(&cache_key) {
            debug!("Serving GET {} from cache", url);
            return decode(&url, body);
        }

        let (body, policy) = self.fetch(url.clone()).await?;
        let value = decode(&url, body.clone())?;

        match policy {
            CachePolicy::Store(ttl) => {
                let ttl = ttl.unwrap_or_else(|| self.cache.default_ttl());
                self.cache.put_with_ttl(cache_key, body, ttl);
            }
            CachePolicy::Bypass => {
                debug!("Not caching GET {} (Cache-Control)", url);
            }
        }

        Ok(value)
    }

    /// Run interceptors and the retrying request, mapping failures to errors
    async fn fetch(&self, url: String) -> Result<(JsonValue, CachePolicy)> {
        let mut request = UpstreamRequest {
            url,
            headers: self.config.default_headers.clone(),
            timeout: self.config.timeout,
        };

        for interceptor in self.interceptors.iter() {
            interceptor.intercept(&mut request).await?;
        }

        let response = self.execute_with_retry(&request).await?;

        match response.status {
            200..=299 => {}
            404 => {
                return Err(Error::UpstreamNotFound { url: request.url });
            }
            status => {
                return Err(Error::UpstreamHttp {
                    status,
                    url: request.url,
                });
            }
        }

        let body: JsonValue = serde_json::from_str(&response.body).map_err(|e| {
            Error::UpstreamDecode(format!("{} returned invalid JSON: {}", request.url, e))
        })?;

        let policy = CachePolicy::from_cache_control(response.cache_control.as_deref());
        Ok((body, policy))
    }

    async fn execute_with_retry(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let retry_config = &self.config.retry;
        let mut attempts = 0;
        let mut backoff = retry_config.initial_backoff;

        loop {
            attempts += 1;

            match self.execute_request(request).await {
                Ok(response) => {
                    if !response.is_success()
                        && retry_config.retry_statuses.contains(&response.status)
                        && attempts <= retry_config.max_retries
                    {
                        warn!(
                            "GET {} returned {}, retrying in {:?} (attempt {}/{})",
                            request.url,
                            response.status,
                            backoff,
                            attempts,
                            retry_config.max_retries
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = retry_config.next_backoff(backoff);
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempts <= retry_config.max_retries {
                        warn!(
                            "GET {} failed: {}, retrying in {:?} (attempt {}/{})",
                            request.url, e, backoff, attempts, retry_config.max_retries
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = retry_config.next_backoff(backoff);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Execute a single request
    async fn execute_request(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let start = Instant::now();

        let mut req_builder = self.client.get(&request.url).timeout(request.timeout);
        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        let response = req_builder.send().await.map_err(|e| {
            error!("Upstream request failed: {}", e);
            Error::UpstreamUnavailable(format!("GET {}: {}", request.url, e))
        })?;

        let status = response.status().as_u16();
        let cache_control = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response.text().await.map_err(|e| {
            error!("Failed to read upstream response: {}", e);
            Error::UpstreamUnavailable(format!("reading body of {}: {}", request.url, e))
        })?;

        debug!("GET {} -> {} ({:?})", request.url, status, start.elapsed());

        Ok(UpstreamResponse {
            status,
            cache_control,
            body,
        })
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: JsonValue) -> Result<T> {
    serde_json::from_value(body).map_err(|e| {
        Error::UpstreamDecode(format!("unexpected response shape from {}: {}", url, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{create_response_cache, CacheConfig};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn data_source(base_url: &str, retry: RetryConfig) -> HttpDataSource {
        data_source_with(base_url, retry, Vec::new())
    }

    fn data_source_with(
        base_url: &str,
        retry: RetryConfig,
        interceptors: Vec<Arc<dyn RequestInterceptor>>,
    ) -> HttpDataSource {
        let config = DataSourceConfig::new(base_url).retry(RetryConfig {
            initial_backoff: Duration::from_millis(1),
            ..retry
        });
        let client = config.build_client().unwrap();
        HttpDataSource::new(
            Arc::new(config),
            client,
            create_response_cache(CacheConfig::default()),
            Arc::new(interceptors),
        )
    }

    #[test]
    fn test_resolve_url_joins_single_slash() {
        let source = data_source("http://upstream.test/", RetryConfig::disabled());
        assert_eq!(source.base_url(), "http://upstream.test");
        assert_eq!(source.resolve_url("/posts"), "http://upstream.test/posts");
        assert_eq!(source.resolve_url("posts/1"), "http://upstream.test/posts/1");
    }

    #[test]
    fn test_cache_policy_parsing() {
        assert_eq!(CachePolicy::from_cache_control(None), CachePolicy::Store(None));
        assert_eq!(
            CachePolicy::from_cache_control(Some("public, max-age=120")),
            CachePolicy::Store(Some(Duration::from_secs(120)))
        );
        assert_eq!(
            CachePolicy::from_cache_control(Some("no-store")),
            CachePolicy::Bypass
        );
        assert_eq!(
            CachePolicy::from_cache_control(Some("Private, max-age=60")),
            CachePolicy::Bypass
        );
        assert_eq!(
            CachePolicy::from_cache_control(Some("max-age=0")),
            CachePolicy::Bypass
        );
    }

    #[test]
    fn test_build_client_rejects_missing_base_url() {
        let err = DataSourceConfig::default().build_client().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = DataSourceConfig::new("not a url").build_client().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_successful_get_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::disabled());
        assert_eq!(source.get::<JsonValue>("/posts").await.unwrap(), json!([{"id": 1}]));
        assert_eq!(source.get::<JsonValue>("/posts").await.unwrap(), json!([{"id": 1}]));

        server.verify().await;
    }

    #[tokio::test]
    async fn test_no_store_responses_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Cache-Control", "no-store")
                    .set_body_json(json!([])),
            )
            .expect(2)
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::disabled());
        source.get::<JsonValue>("/posts").await.unwrap();
        source.get::<JsonValue>("/posts").await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn test_server_error_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::default());
        let err = source.get::<JsonValue>("/posts").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamHttp { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_retryable_status_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::default());
        assert_eq!(source.get::<JsonValue>("/posts").await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_not_found_is_propagated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts/999"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({})))
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::disabled());
        let err = source.get::<JsonValue>("/posts/999").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamNotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_json_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::disabled());
        let err = source.get::<JsonValue>("/posts").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamDecode(_)));
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/numbers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"not": "a list"})))
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::disabled());
        let err = source.get::<Vec<u32>>("/numbers").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamDecode(_)));
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/numbers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(["one"])))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/numbers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .expect(1)
            .mount(&server)
            .await;

        let source = data_source(&server.uri(), RetryConfig::disabled());
        let err = source.get::<Vec<u32>>("/numbers").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamDecode(_)));
        assert_eq!(source.cache.len(), 0);

        assert_eq!(source.get::<Vec<u32>>("/numbers").await.unwrap(), vec![1, 2]);
        assert_eq!(source.get::<Vec<u32>>("/numbers").await.unwrap(), vec![1, 2]);
        assert_eq!(source.cache.len(), 1);

        server.verify().await;
    }

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(header("Authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let interceptor: Arc<dyn RequestInterceptor> =
            Arc::new(BearerAuthInterceptor::new("s3cret"));
        let source = data_source_with(&server.uri(), RetryConfig::disabled(), vec![interceptor]);
        source.get::<JsonValue>("/posts").await.unwrap();

        server.verify().await;
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = data_source(&format!("http://{}", addr), RetryConfig::default());
        let err = source.get::<JsonValue>("/posts").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }
}

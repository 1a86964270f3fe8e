//! Main client implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::api::{TrackableObjectsApi, TrackersApi};
use crate::auth::{Authenticator, DEFAULT_REFRESH_SKEW};
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::types::Payload;

/// Production API base URL.
pub const DEFAULT_API_URL: &str = "https://graph.tractive.com/3/";

/// Production event channel URL.
pub const DEFAULT_CHANNEL_URL: &str = "https://channel.tractive.com/3/channel";

/// Client identifier expected by the vendor in `x-tractive-client`.
pub const DEFAULT_CLIENT_ID: &str = "5f9be055d8912eb21a4cd7ba";

/// Default timeout for plain requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-read timeout on the streaming channel before reconnecting.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of retries after a 429 before giving up.
const DEFAULT_RETRY_COUNT: u32 = 3;

/// Default keep-alive watchdog settings.
const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Computes how long to sleep before retry number `attempt` (1-based).
pub type RetryDelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Default backoff: `3^attempt` seconds plus up to 3 seconds of jitter.
fn default_retry_delay(attempt: u32) -> Duration {
    let base = 3f64.powi(attempt.min(10) as i32);
    let jitter: f64 = rand::rng().random_range(0.0..3.0);
    Duration::from_secs_f64(base + jitter)
}

/// Tractive API client.
///
/// Cheap to clone; all clones share one HTTP session and one credential
/// snapshot. The session is owned here and only here — [`Channel`] and the
/// endpoint APIs borrow it.
///
/// # Example
///
/// ```no_run
/// use tractive_client::TractiveClient;
///
/// # async fn example() -> tractive_client::Result<()> {
/// let client = TractiveClient::builder()
///     .email("user@example.com")
///     .password("secret")
///     .build()?;
///
/// let trackers = client.trackers().list().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TractiveClient {
    /// Inner shared state.
    inner: Arc<ClientInner>,
}

/// Inner client state (shared across clones).
pub(crate) struct ClientInner {
    /// HTTP session.
    pub(crate) http: reqwest::Client,
    /// Base URL for API requests.
    pub(crate) base_url: Url,
    /// URL of the streaming event channel.
    pub(crate) channel_url: Url,
    /// Request timeout.
    pub(crate) timeout: Duration,
    /// Per-read timeout on the streaming channel.
    pub(crate) read_timeout: Duration,
    /// Retries allowed after a 429.
    pub(crate) retry_count: u32,
    /// Backoff schedule.
    pub(crate) retry_delay: RetryDelayFn,
    /// Keep-alive watchdog: silence tolerated before the session is killed.
    pub(crate) keep_alive_timeout: Duration,
    /// Keep-alive watchdog: polling interval.
    pub(crate) check_interval: Duration,
    /// Credential state and login handshake.
    pub(crate) auth: Authenticator,
}

impl fmt::Debug for TractiveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TractiveClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("channel_url", &self.inner.channel_url.as_str())
            .finish_non_exhaustive()
    }
}

impl TractiveClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Get access to the inner client state (for API implementations).
    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the trackers API.
    pub fn trackers(&self) -> TrackersApi {
        TrackersApi::new(self.clone())
    }

    /// Access the trackable objects (pets) API.
    pub fn trackable_objects(&self) -> TrackableObjectsApi {
        TrackableObjectsApi::new(self.clone())
    }

    /// Create an event channel bound to this client's session.
    pub fn channel(&self) -> Channel {
        Channel::new(self.clone())
    }

    /// ID of the authenticated account, logging in if necessary.
    pub async fn user_id(&self) -> Result<String> {
        self.inner.auth.user_id().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue an authenticated request against an arbitrary API path.
    ///
    /// Returns parsed JSON when the response declares a JSON content type and
    /// raw bytes otherwise. Rate limiting (429) is retried with backoff up to
    /// the configured retry count; every other non-2xx status maps straight
    /// onto the error taxonomy.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        params: Option<&[(&str, &str)]>,
        body: Option<&serde_json::Value>,
    ) -> Result<Payload> {
        let response = self.send(method, uri, params, body).await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

        if is_json {
            Ok(Payload::Json(response.json().await?))
        } else {
            Ok(Payload::Bytes(response.bytes().await?))
        }
    }

    /// Make a GET request and deserialize the JSON response.
    pub(crate) async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None, None).await?;
        Ok(response.json().await?)
    }

    /// Make a GET request with query parameters and deserialize the response.
    pub(crate) async fn get_with_query<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.send(Method::GET, path, Some(query), None).await?;
        Ok(response.json().await?)
    }

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner.base_url.join(path).map_err(Error::from)
    }

    /// Issue a request, retrying on 429, and return the classified response.
    ///
    /// Auth headers are recomputed on every attempt, so a credential refresh
    /// that happens mid-retry-loop is picked up naturally.
    async fn send(
        &self,
        method: Method,
        path: &str,
        params: Option<&[(&str, &str)]>,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        let mut attempt: u32 = 1;

        loop {
            let headers = self.inner.auth.auth_headers().await?;

            let mut request = self
                .inner
                .http
                .request(method.clone(), url.clone())
                .headers(headers)
                .timeout(self.inner.timeout);
            if let Some(params) = params {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.inner.retry_count {
                    return Err(Error::RateLimitExceeded { attempts: attempt });
                }
                let delay = (self.inner.retry_delay)(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    path,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(Error::from_status(status.as_u16(), message));
            }

            return Ok(response);
        }
    }
}

/// Builder for creating a [`TractiveClient`].
pub struct ClientBuilder {
    base_url: String,
    channel_url: String,
    client_id: String,
    email: Option<String>,
    password: Option<String>,
    timeout: Duration,
    read_timeout: Duration,
    retry_count: u32,
    retry_delay: RetryDelayFn,
    refresh_skew: Duration,
    keep_alive_timeout: Duration,
    check_interval: Duration,
    user_agent: Option<String>,
}

impl ClientBuilder {
    /// Create a new builder with production defaults.
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            email: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Arc::new(default_retry_delay),
            refresh_skew: DEFAULT_REFRESH_SKEW,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            check_interval: DEFAULT_CHECK_INTERVAL,
            user_agent: None,
        }
    }

    /// Account email used for the login handshake.
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Account password used for the login handshake.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Override the API base URL (tests point this at a mock server).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Override the streaming channel URL.
    pub fn channel_url(mut self, url: impl Into<String>) -> Self {
        self.channel_url = url.into();
        self
    }

    /// Override the `x-tractive-client` identifier.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-read timeout on the streaming channel.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the number of retries allowed after a 429.
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Replace the backoff schedule (tests inject a zero delay).
    pub fn retry_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.retry_delay = Arc::new(delay);
        self
    }

    /// Set the refresh skew subtracted from token expiry.
    pub fn refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Set how long the channel tolerates keep-alive silence.
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Set the keep-alive watchdog polling interval.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<TractiveClient> {
        // Normalize so Url::join treats the last segment as a directory.
        let mut base_url = Url::parse(&self.base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let channel_url = Url::parse(&self.channel_url)?;

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("tractive-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder().user_agent(user_agent).build()?;

        let auth = Authenticator::new(
            http.clone(),
            &base_url,
            self.client_id,
            self.email,
            self.password,
            self.timeout,
            self.refresh_skew,
        )?;

        Ok(TractiveClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                channel_url,
                timeout: self.timeout,
                read_timeout: self.read_timeout,
                retry_count: self.retry_count,
                retry_delay: self.retry_delay,
                keep_alive_timeout: self.keep_alive_timeout,
                check_interval: self.check_interval,
                auth,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let client = ClientBuilder::new().build().unwrap();
        assert_eq!(client.base_url().as_str(), DEFAULT_API_URL);
        assert_eq!(client.inner().retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(client.inner().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_builder_normalizes_trailing_slash() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080/api")
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8080/api/");
    }

    #[test]
    fn test_url_building() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8080/3")
            .build()
            .unwrap();

        let url = client.url("user/u1/trackers").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/3/user/u1/trackers");

        let url = client.url("/user/u1/trackers").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/3/user/u1/trackers");
    }

    #[test]
    fn test_default_backoff_shape() {
        for attempt in 1..=3u32 {
            let base = 3f64.powi(attempt as i32);
            let delay = default_retry_delay(attempt).as_secs_f64();
            assert!(delay >= base, "delay {delay} below base {base}");
            assert!(delay < base + 3.0, "delay {delay} above jitter cap");
        }
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = ClientBuilder::new().base_url("not a url").build();
        assert!(result.is_err());
    }
}

//! Token acquisition and refresh.
//!
//! The [`Authenticator`] owns the only mutable shared state in the client: the
//! current [`Credentials`] snapshot. Refresh builds a new snapshot and swaps
//! it in whole, so readers never observe a half-updated credential set.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use tokio::sync::RwLock;
use url::Url;

use crate::error::{Error, Result};
use crate::types::Credentials;

/// Path of the token endpoint, relative to the API base URL.
const TOKEN_URI: &str = "auth/token";

/// Default safety margin before expiry that triggers proactive re-login.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(3600);

/// Performs the login handshake and hands out per-request auth headers.
#[derive(Debug)]
pub struct Authenticator {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    email: Option<String>,
    password: Option<String>,
    timeout: Duration,
    refresh_skew: Duration,
    credentials: RwLock<Option<Credentials>>,
}

impl Authenticator {
    pub(crate) fn new(
        http: reqwest::Client,
        base_url: &Url,
        client_id: String,
        email: Option<String>,
        password: Option<String>,
        timeout: Duration,
        refresh_skew: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http,
            token_url: base_url.join(TOKEN_URI)?,
            client_id,
            email,
            password,
            timeout,
            refresh_skew,
            credentials: RwLock::new(None),
        })
    }

    /// Headers sent on every request, authenticated or not.
    pub(crate) fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        if let Ok(value) = HeaderValue::from_str(&self.client_id) {
            headers.insert("x-tractive-client", value);
        }
        headers
    }

    /// Return valid credentials, logging in first if none are cached or the
    /// cached snapshot is within `refresh_skew` of expiry.
    pub async fn authenticate(&self) -> Result<Credentials> {
        {
            let guard = self.credentials.read().await;
            if let Some(creds) = guard.as_ref() {
                if !self.is_expired(creds) {
                    return Ok(creds.clone());
                }
            }
        }
        self.login().await
    }

    /// Base headers plus the credential-derived `x-tractive-user` and
    /// `authorization` headers, recomputed fresh on every call.
    pub async fn auth_headers(&self) -> Result<HeaderMap> {
        let creds = self.authenticate().await?;
        let mut headers = self.base_headers();

        let user = HeaderValue::from_str(&creds.user_id)
            .map_err(|_| Error::Config("server returned an invalid user id".to_string()))?;
        headers.insert("x-tractive-user", user);

        let bearer = HeaderValue::from_str(&format!("Bearer {}", creds.access_token))
            .map_err(|_| Error::Config("server returned an invalid access token".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);

        Ok(headers)
    }

    /// ID of the authenticated account.
    pub async fn user_id(&self) -> Result<String> {
        Ok(self.authenticate().await?.user_id)
    }

    /// Whether a snapshot is past `expires_at - refresh_skew`.
    fn is_expired(&self, creds: &Credentials) -> bool {
        unix_now() > creds.expires_at.saturating_sub(self.refresh_skew.as_secs())
    }

    /// Perform the login call and swap in the new snapshot.
    async fn login(&self) -> Result<Credentials> {
        let (email, password) = match (&self.email, &self.password) {
            (Some(email), Some(password)) => (email, password),
            _ => {
                return Err(Error::Unauthorized(
                    "login and password are required".to_string(),
                ))
            }
        };

        tracing::debug!(url = %self.token_url, "requesting access token");

        let response = self
            .http
            .post(self.token_url.clone())
            .headers(self.base_headers())
            .json(&json!({
                "platform_email": email,
                "platform_token": password,
                "grant_type": "tractive",
            }))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return match status.as_u16() {
                401 | 403 => Err(Error::Unauthorized(message)),
                code => Err(Error::Api {
                    status: code,
                    message,
                }),
            };
        }

        let creds: Credentials = response.json().await?;
        tracing::debug!(user_id = %creds.user_id, expires_at = creds.expires_at, "authenticated");

        let mut guard = self.credentials.write().await;
        *guard = Some(creds.clone());
        Ok(creds)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(skew: Duration) -> Authenticator {
        Authenticator::new(
            reqwest::Client::new(),
            &Url::parse("https://graph.example.com/3/").unwrap(),
            "client-id".to_string(),
            Some("user@example.com".to_string()),
            Some("secret".to_string()),
            Duration::from_secs(10),
            skew,
        )
        .unwrap()
    }

    fn credentials(expires_at: u64) -> Credentials {
        Credentials {
            user_id: "u1".to_string(),
            access_token: "t1".to_string(),
            expires_at,
        }
    }

    #[test]
    fn expiry_applies_refresh_skew() {
        let auth = authenticator(Duration::from_secs(3600));
        let now = unix_now();

        assert!(!auth.is_expired(&credentials(now + 7200)));
        // Inside the skew window counts as expired even though the token is
        // nominally still valid.
        assert!(auth.is_expired(&credentials(now + 1800)));
        assert!(auth.is_expired(&credentials(now.saturating_sub(10))));
    }

    #[test]
    fn expiry_handles_underflowing_timestamps() {
        let auth = authenticator(Duration::from_secs(3600));
        assert!(auth.is_expired(&credentials(0)));
    }

    #[tokio::test]
    async fn missing_login_is_unauthorized() {
        let auth = Authenticator::new(
            reqwest::Client::new(),
            &Url::parse("https://graph.example.com/3/").unwrap(),
            "client-id".to_string(),
            None,
            None,
            Duration::from_secs(10),
            DEFAULT_REFRESH_SKEW,
        )
        .unwrap();

        let err = auth.authenticate().await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[test]
    fn base_headers_carry_client_id() {
        let auth = authenticator(DEFAULT_REFRESH_SKEW);
        let headers = auth.base_headers();
        assert_eq!(headers.get("x-tractive-client").unwrap(), "client-id");
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap(),
            "application/json;charset=UTF-8"
        );
    }
}

//! PostgREST HTTP client
//!
//! Provides a thin HTTP client for a PostgREST-compatible data API. Handles
//! the authentication headers, endpoint construction and, most importantly,
//! turning every failure into a [`RemoteError`] that tells a network problem
//! apart from a rejection by the server.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use clinicsync_remote::client::RestClient;
//!
//! # fn example() -> anyhow::Result<()> {
//! let client = RestClient::new("https://xyz.supabase.co", "anon-key", Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use clinicsync_core::ports::RemoteError;

/// Path prefix of the REST endpoints
const REST_PREFIX: &str = "/rest/v1";

/// Statuses that mean "the service is not reachable right now"
///
/// 408 and 429 are request-level, the 5xx codes come from gateways and
/// load balancers in front of the database. A plain 500 is a server-side
/// rejection and is treated as an application error.
const CONNECTIVITY_STATUSES: &[StatusCode] = &[
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

// ============================================================================
// Error body
// ============================================================================

/// Error payload returned by PostgREST
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    /// SQLSTATE or PostgREST error code (e.g. `23505`, `PGRST116`)
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl ErrorBody {
    fn describe(self, status: StatusCode) -> (Option<String>, String) {
        let mut message = self
            .message
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
        if let Some(details) = self.details.filter(|d| !d.is_empty()) {
            message.push_str(": ");
            message.push_str(&details);
        }
        if let Some(hint) = self.hint.filter(|h| !h.is_empty()) {
            message.push_str(&format!(" (hint: {hint})"));
        }
        (self.code, message)
    }
}

// ============================================================================
// RestClient
// ============================================================================

/// HTTP client for the PostgREST data API
///
/// Wraps `reqwest::Client` with the `apikey` / bearer headers and the
/// `/rest/v1` base path. Every request is bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl RestClient {
    /// Creates a client for the project at `base_url`
    ///
    /// # Errors
    /// Fails if the underlying TLS backend cannot be initialised.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        })
    }

    /// Creates a client against a custom base URL (useful for testing)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(5);
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        }
    }

    /// Replaces the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates an authenticated request builder for `table`
    ///
    /// The URL is `{base_url}/rest/v1/{table}`.
    pub fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let url = format!("{}{}/{}", self.base_url, REST_PREFIX, table);
        self.client
            .request(method, &url)
            .timeout(self.timeout)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Sends `request` and decodes a JSON body
    ///
    /// An empty body (e.g. `204 No Content`) decodes as `Value::Null`.
    pub async fn send_json(&self, request: RequestBuilder) -> Result<serde_json::Value, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;
        let response = check_status(response).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport(e, self.timeout))?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Application {
            status: None,
            code: None,
            message: format!("Invalid JSON response: {e}"),
        })
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Maps a transport-level failure to a [`RemoteError`]
///
/// Anything that prevented a response from arriving is a connectivity
/// problem. Decoding failures of a received body are the exception: the
/// server answered, so those are application errors.
pub fn classify_transport(err: reqwest::Error, timeout: Duration) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(timeout)
    } else if err.is_decode() {
        RemoteError::Application {
            status: err.status().map(|s| s.as_u16()),
            code: None,
            message: err.to_string(),
        }
    } else {
        RemoteError::Connectivity(err.to_string())
    }
}

/// Whether an HTTP status means the service could not be reached
pub fn is_connectivity_status(status: StatusCode) -> bool {
    CONNECTIVITY_STATUSES.contains(&status)
}

/// Passes successful responses through; converts the rest into errors
async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), path = %url, "Remote store returned error status");

    if is_connectivity_status(status) {
        return Err(RemoteError::Connectivity(format!(
            "HTTP {} from {}",
            status.as_u16(),
            url
        )));
    }

    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_else(|_| ErrorBody {
        message: (!body.trim().is_empty()).then(|| body.trim().to_string()),
        ..ErrorBody::default()
    });
    let (code, message) = parsed.describe(status);

    Err(RemoteError::Application {
        status: Some(status.as_u16()),
        code,
        message,
    })
}

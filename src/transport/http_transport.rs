use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::util::truncate_on_char_boundary;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_ERROR_MAX_LEN: usize = 500;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, RelayError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| RelayError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for the single upstream service.
///
/// Requests are sent once; a failed call is terminal for that request.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the transport from server pool/timeout settings and an optional proxy.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the proxy URL is invalid or the
    /// client cannot be constructed.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, RelayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.timeout),
            proxy_url,
        )?;
        Ok(Self { client })
    }

    /// POST a JSON body. The caller decides whether to read it whole or as a stream.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent or no
    /// response headers arrive.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        self.client
            .post(url)
            .headers(headers.clone())
            .body(body)
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(url, error = %err, "upstream request failed");
                RelayError::Transport(format!("Upstream request failed: {err}"))
            })
    }

    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the request cannot be sent.
    pub async fn get(
        &self,
        url: &str,
        headers: &http::HeaderMap,
    ) -> Result<reqwest::Response, RelayError> {
        self.client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|err| RelayError::Transport(format!("Upstream request failed: {err}")))
    }
}

/// Consume a non-2xx upstream response into a [`RelayError::Upstream`].
pub async fn upstream_error_from_response(response: reqwest::Response) -> RelayError {
    let status = response.status().as_u16();
    let message = match response.bytes().await {
        Ok(body) => sanitize_upstream_error(&body),
        Err(err) => format!("failed to read upstream error body: {err}"),
    };
    tracing::warn!(status, message = %message, "upstream returned an error");
    RelayError::Upstream { status, message }
}

/// Reduce an upstream error body to a short message.
///
/// Prefers `error.message` from a JSON body and otherwise falls back to the
/// lossy text, capped at 500 bytes.
#[must_use]
pub fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
        {
            return truncate_message(msg);
        }
    }
    truncate_message(&String::from_utf8_lossy(body))
}

fn truncate_message(msg: &str) -> String {
    if msg.len() > UPSTREAM_ERROR_MAX_LEN {
        format!("{}...", truncate_on_char_boundary(msg, UPSTREAM_ERROR_MAX_LEN))
    } else {
        msg.to_string()
    }
}

use crate::config::UpstreamConfig;

/// Upstream endpoints and headers resolved once at startup.
#[derive(Debug, Clone)]
pub struct PreparedUpstream {
    chat_url: String,
    models_url: String,
    headers: http::HeaderMap,
    model: String,
    proxy: Option<String>,
    supports_images: bool,
}

impl PreparedUpstream {
    #[must_use]
    pub fn new(upstream: &UpstreamConfig) -> Self {
        let base = upstream.base_url.trim().trim_end_matches('/');
        Self {
            chat_url: format!("{base}/chat/completions"),
            models_url: format!("{base}/models"),
            headers: build_upstream_headers(&upstream.api_key),
            model: upstream.model.trim().to_string(),
            proxy: normalize_proxy(upstream.proxy.as_deref()),
            supports_images: upstream.supports_images,
        }
    }

    #[must_use]
    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    #[must_use]
    pub fn models_url(&self) -> &str {
        &self.models_url
    }

    #[must_use]
    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    /// Configured target model; empty when the client's model is forwarded.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    #[must_use]
    pub fn supports_images(&self) -> bool {
        self.supports_images
    }
}

fn build_upstream_headers(api_key: &str) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    let key = api_key.trim();
    if !key.is_empty() {
        if let Ok(val) = http::HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(http::header::AUTHORIZATION, val);
        }
    }
    headers
}

fn normalize_proxy(proxy: Option<&str>) -> Option<String> {
    proxy.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

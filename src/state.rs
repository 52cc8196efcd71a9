mod request_id;

use crate::auth::{authenticate, AllowedClientKeys};
use crate::config::AppConfig;
use crate::cot::CotMode;
use crate::error::RelayError;
use crate::transport::{HttpTransport, PreparedUpstream};

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
///
/// Built once at startup and never mutated afterwards; per-request state
/// lives in the handlers and stream sessions.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub upstream: PreparedUpstream,
    allowed_client_keys: AllowedClientKeys,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        transport: HttpTransport,
        upstream: PreparedUpstream,
        allowed_client_keys: AllowedClientKeys,
    ) -> Self {
        Self {
            config,
            transport,
            upstream,
            allowed_client_keys,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build state from config alone, constructing the transport and key index.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let upstream = PreparedUpstream::new(&config.upstream);
        let transport = HttpTransport::new(&config.server, upstream.proxy())?;
        let allowed_client_keys = crate::auth::build_allowed_key_set(&config);
        Ok(Self::new(config, transport, upstream, allowed_client_keys))
    }

    /// # Errors
    ///
    /// Returns `RelayError::Auth` when client keys are configured and the
    /// request key is missing or unknown.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), RelayError> {
        authenticate(headers, &self.allowed_client_keys)
    }

    #[must_use]
    pub fn allowed_key_count(&self) -> usize {
        self.allowed_client_keys.len()
    }

    #[must_use]
    pub fn cot_mode(&self) -> &CotMode {
        &self.config.features.cot_mode
    }

    #[must_use]
    pub fn next_completion_id(&self) -> String {
        self.request_ids.next_completion_id()
    }
}

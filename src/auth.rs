use crate::config::AppConfig;
use crate::error::RelayError;
use http::header::AUTHORIZATION;
use rustc_hash::FxHashSet;

/// Compact index of configured client keys.
///
/// `Open` means no keys were configured and every request is accepted.
pub enum AllowedClientKeys {
    Open,
    Single { bearer: Box<str> },
    Multiple(FxHashSet<String>),
}

impl AllowedClientKeys {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            AllowedClientKeys::Open => 0,
            AllowedClientKeys::Single { .. } => 1,
            AllowedClientKeys::Multiple(set) => set.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, AllowedClientKeys::Open)
    }
}

/// Extract the key from `Authorization: Bearer <key>`.
///
/// # Errors
///
/// Returns `RelayError::Auth` when the header is absent or not a bearer token.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, RelayError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| RelayError::Auth("Missing API key".to_string()))
}

/// Check a request against the configured client keys.
///
/// # Errors
///
/// Returns `RelayError::Auth` when keys are configured and the request
/// carries no key or an unknown one.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), RelayError> {
    match allowed_keys {
        AllowedClientKeys::Open => Ok(()),
        AllowedClientKeys::Single { bearer } => match headers.get(AUTHORIZATION) {
            Some(value) if value.as_bytes() == bearer.as_bytes() => Ok(()),
            Some(_) => Err(RelayError::Auth("Invalid API key".to_string())),
            None => Err(RelayError::Auth("Missing API key".to_string())),
        },
        AllowedClientKeys::Multiple(allowed_set) => {
            let client_key = extract_api_key(headers)?;
            if allowed_set.contains(client_key) {
                Ok(())
            } else {
                Err(RelayError::Auth("Invalid API key".to_string()))
            }
        }
    }
}

/// Build the key index from `client_authentication.allowed_keys`.
#[must_use]
pub fn build_allowed_key_set(config: &AppConfig) -> AllowedClientKeys {
    let mut allowed_set: FxHashSet<String> = config
        .client_authentication
        .allowed_keys
        .iter()
        .cloned()
        .collect();

    match allowed_set.len() {
        0 => AllowedClientKeys::Open,
        1 => match allowed_set.drain().next() {
            Some(single_key) => AllowedClientKeys::Single {
                bearer: format!("Bearer {single_key}").into_boxed_str(),
            },
            None => AllowedClientKeys::Open,
        },
        _ => AllowedClientKeys::Multiple(allowed_set),
    }
}

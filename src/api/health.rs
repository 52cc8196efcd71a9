use std::sync::Arc;

use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(state: &Arc<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "cot-relay is running",
        "config": {
            "upstream_model": state.upstream.model(),
            "supports_images": state.upstream.supports_images(),
            "client_keys_count": state.allowed_key_count(),
            "features": {
                "cot_mode": config.features.cot_mode.as_str(),
                "log_level": config.features.log_level,
            }
        }
    }))
}

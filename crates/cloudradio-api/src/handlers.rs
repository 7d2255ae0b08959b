//! Control plane endpoints

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::{Map, Value};

use crate::error::{ApiError, Result};
use crate::ApiState;

fn present(state: &ApiState, names: &[String]) -> Map<String, Value> {
    names
        .iter()
        .filter_map(|name| {
            state
                .host
                .get_attribute(name)
                .map(|value| (name.clone(), value))
        })
        .collect()
}

/// `GET /status`
pub async fn get_status(State(state): State<ApiState>) -> Json<Map<String, Value>> {
    Json(present(&state, &state.settings.read_settings))
}

/// `GET /config`
pub async fn get_config(State(state): State<ApiState>) -> Json<Map<String, Value>> {
    Json(present(&state, &state.settings.write_settings))
}

/// `PUT /config` and `PATCH /config`
///
/// Every field is checked against the allow-list and the host before any of
/// them is applied, so a rejected request leaves the host untouched.
pub async fn update_config(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Map<String, Value>>> {
    let write_settings = &state.settings.write_settings;
    if write_settings.is_empty() {
        return Err(ApiError::NotConfigured("write"));
    }

    let settings = match parse_body(&body)? {
        Value::Object(settings) => settings,
        _ => return Err(ApiError::NotAnObject),
    };

    for (name, value) in &settings {
        if !write_settings.iter().any(|allowed| allowed == name) {
            return Err(ApiError::NotAllowed(name.clone()));
        }
        state.host.check_attribute(name, value)?;
    }

    for (name, value) in &settings {
        state.host.set_attribute(name, value.clone())?;
        tracing::info!(setting = %name, value = %value, "setting updated");
    }

    Ok(Json(settings))
}

/// `PUT /call/:name`
pub async fn call(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>> {
    let call_settings = &state.settings.call_settings;
    if call_settings.is_empty() {
        return Err(ApiError::NotConfigured("call"));
    }
    if !call_settings.iter().any(|allowed| *allowed == name) {
        return Err(ApiError::NotAllowed(name));
    }

    let args = parse_body(&body)?;
    let result = state.host.call(&name, args).map_err(|e| {
        tracing::warn!(callback = %name, error = %e, "callback failed");
        e
    })?;
    tracing::info!(callback = %name, "callback invoked");
    Ok(Json(result))
}

fn parse_body(body: &[u8]) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidBody(e.to_string()))
}

//! Shared HTTP plumbing for the source and sink adapters.

use reqwest::{Response, StatusCode};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Build a client. Certificate checks follow `verify_ssl`; timeouts are set per request.
pub fn build_client(verify_ssl: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!verify_ssl)
        .build()
        .map_err(|e| SyncError::Transport(format!("failed to build HTTP client: {}", e)))
}

/// Turn a non-success response into [`SyncError::Status`], keeping the body for the log.
pub async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(status_error(response).await)
}

async fn status_error(response: Response) -> SyncError {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    SyncError::Status { status, url, body }
}

/// Decode a successful response as JSON.
pub async fn json_body(response: Response) -> Result<Value> {
    let response = ensure_success(response).await?;
    response
        .json::<Value>()
        .await
        .map_err(|e| SyncError::Malformed(e.to_string()))
}

/// Which way a mutating call goes; decides which status means "already done".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Delete,
}

/// Map a mutation response: 409 on create and 404 on delete become the
/// idempotent error classes, anything else non-2xx is a status error.
pub async fn finish_mutation(response: Response, op: Mutation, what: &str) -> Result<()> {
    match (op, response.status()) {
        (_, s) if s.is_success() => Ok(()),
        (Mutation::Create, StatusCode::CONFLICT) => Err(SyncError::AlreadyExists(what.to_string())),
        (Mutation::Delete, StatusCode::NOT_FOUND) => Err(SyncError::NotFound(what.to_string())),
        _ => Err(status_error(response).await),
    }
}

/// Integer field that may arrive as a JSON number or a numeric string.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-empty string field.
pub fn as_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// The array under `key`, treating `null` or absence as empty.
pub fn array<'a>(value: &'a Value, key: &str) -> Result<&'a [Value]> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(other) => Err(SyncError::Malformed(format!(
            "expected array in '{}', got {}",
            key, other
        ))),
    }
}

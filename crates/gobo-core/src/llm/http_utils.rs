//! HTTP utilities for the model provider
//!
//! Common request/response handling shared by the REST calls.

use crate::llm::LlmError;
use bytes::Bytes;
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

const MAX_ERROR_BODY_LEN: usize = 500;

/// Creates an HTTP client, optionally bounded by a request timeout.
///
/// No timeout is applied unless configured.
#[must_use]
pub fn create_http_client(timeout_secs: Option<u64>) -> HttpClient {
    let mut builder = HttpClient::builder();
    if let Some(secs) = timeout_secs.filter(|s| *s > 0) {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build().unwrap_or_else(|_| HttpClient::new())
}

fn with_headers(mut request: RequestBuilder, headers: &[(&str, &str)]) -> RequestBuilder {
    for (key, value) in headers {
        request = request.header(*key, *value);
    }
    request
}

/// Sends a request and maps transport failures and non-success statuses to `LlmError`.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues or `LlmError::ApiError`
/// on non-success status codes.
pub async fn send_checked(request: RequestBuilder) -> Result<Response, LlmError> {
    let response = request
        .send()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))?;

    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(LlmError::ApiError(describe_error_body(status, &error_text)))
}

fn describe_error_body(status: reqwest::StatusCode, error_text: &str) -> String {
    let trimmed = error_text.trim_start();

    // Detect HTML error pages from proxies
    let is_html = trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<HTML");

    if is_html {
        return format!("API error: {status} (Server returned HTML error page)");
    }

    if error_text.len() > MAX_ERROR_BODY_LEN {
        let cut = crate::utils::truncate_str(error_text, MAX_ERROR_BODY_LEN);
        format!("API error: {status} - {cut}... (truncated)")
    } else {
        format!("API error: {status} - {error_text}")
    }
}

/// Sends an HTTP POST request with JSON body and returns parsed JSON response.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` on connectivity issues, `LlmError::ApiError` on non-success status codes,
/// or `LlmError::JsonError` if parsing fails.
pub async fn send_json_request(
    client: &HttpClient,
    url: &str,
    body: &Value,
    extra_headers: &[(&str, &str)],
) -> Result<Value, LlmError> {
    let request = with_headers(client.post(url).json(body), extra_headers);
    send_checked(request)
        .await?
        .json()
        .await
        .map_err(|e| LlmError::JsonError(e.to_string()))
}

/// Opens a POST request whose response body is consumed as a stream.
///
/// # Errors
///
/// Same as [`send_checked`].
pub async fn open_stream_request(
    client: &HttpClient,
    url: &str,
    body: &Value,
    extra_headers: &[(&str, &str)],
) -> Result<Response, LlmError> {
    send_checked(with_headers(client.post(url).json(body), extra_headers)).await
}

/// Sends an HTTP GET request and returns parsed JSON response.
///
/// # Errors
///
/// Same as [`send_json_request`].
pub async fn get_json(
    client: &HttpClient,
    url: &str,
    extra_headers: &[(&str, &str)],
) -> Result<Value, LlmError> {
    send_checked(with_headers(client.get(url), extra_headers))
        .await?
        .json()
        .await
        .map_err(|e| LlmError::JsonError(e.to_string()))
}

/// Downloads a binary resource.
///
/// # Errors
///
/// Returns `LlmError::NetworkError` if the body cannot be read, otherwise as [`send_checked`].
pub async fn get_bytes(
    client: &HttpClient,
    url: &str,
    extra_headers: &[(&str, &str)],
) -> Result<Bytes, LlmError> {
    send_checked(with_headers(client.get(url), extra_headers))
        .await?
        .bytes()
        .await
        .map_err(|e| LlmError::NetworkError(e.to_string()))
}

/// Extracts a string from a JSON response by navigating a path.
///
/// Path segments are object keys or numeric array indices, e.g.
/// `["response", "generatedSamples", "0", "video", "uri"]`.
///
/// # Errors
///
/// Returns `LlmError::ApiError` if the path is invalid or the target is not a string.
pub fn extract_text_content(response: &Value, path: &[&str]) -> Result<String, LlmError> {
    let mut current = response;

    for segment in path {
        if let Ok(index) = segment.parse::<usize>() {
            current = current.get(index).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid path: missing index {index}"))
            })?;
        } else {
            current = current.get(*segment).ok_or_else(|| {
                LlmError::ApiError(format!("Invalid path: missing key {segment}"))
            })?;
        }
    }

    current
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| LlmError::ApiError(format!("Expected string at path, got: {current:?}")))
}

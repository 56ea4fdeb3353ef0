//! Shared HTTPS plumbing for the REST adapters.
//!
//! Every REST client sends through one pooled [`reqwest::Client`] and maps
//! responses onto [`ApiError`] the same way: 404 becomes
//! [`ApiError::NotFound`], other non-success statuses keep a truncated body.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ApiFuture};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: usize = 512;

pub(crate) static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Describes one REST call for error reporting.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Call<'a> {
    pub(crate) operation: &'a str,
    pub(crate) kind: &'a str,
    pub(crate) id: &'a str,
}

impl<'a> Call<'a> {
    pub(crate) const fn new(operation: &'a str, kind: &'a str, id: &'a str) -> Self {
        Self {
            operation,
            kind,
            id,
        }
    }
}

/// Sends `request` and returns the response when the status is a success.
pub(crate) async fn send(request: RequestBuilder, call: Call<'_>) -> Result<Response, ApiError> {
    let response = request.send().await.map_err(|err| ApiError::Transport {
        operation: call.operation.to_owned(),
        message: err.to_string(),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::not_found(call.kind, call.id));
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        operation: call.operation.to_owned(),
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    })
}

/// Sends `request` and decodes a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    call: Call<'_>,
) -> Result<T, ApiError> {
    let response = send(request, call).await?;
    decode(response, call).await
}

/// Sends `request`, mapping 404 to `None`.
pub(crate) async fn send_optional<T: DeserializeOwned>(
    request: RequestBuilder,
    call: Call<'_>,
) -> Result<Option<T>, ApiError> {
    match send_json(request, call).await {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Sends `request` and discards the body.
pub(crate) async fn send_empty(request: RequestBuilder, call: Call<'_>) -> Result<(), ApiError> {
    send(request, call).await.map(|_| ())
}

/// Decodes a JSON response body.
pub(crate) async fn decode<T: DeserializeOwned>(
    response: Response,
    call: Call<'_>,
) -> Result<T, ApiError> {
    let body = response.bytes().await.map_err(|err| ApiError::Transport {
        operation: call.operation.to_owned(),
        message: err.to_string(),
    })?;
    serde_json::from_slice(&body).map_err(|err| ApiError::Decode {
        operation: call.operation.to_owned(),
        message: err.to_string(),
    })
}

/// Returns `true` for an expired or rejected credential.
pub(crate) const fn is_unauthorised(error: &ApiError) -> bool {
    matches!(error, ApiError::Status { status: 401, .. })
}

/// Supplies bearer tokens for the OAuth-protected REST adapters.
pub trait TokenSource: Send + Sync + fmt::Debug {
    /// Returns a token valid for the next request.
    fn token(&self) -> ApiFuture<'_, String>;
}

/// Token fixed at construction, typically read from configuration.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> ApiFuture<'_, String> {
        let token = self.0.clone();
        Box::pin(async move {
            if token.trim().is_empty() {
                Err(ApiError::Auth(String::from("access token is empty")))
            } else {
                Ok(token)
            }
        })
    }
}

/// Attaches a bearer token from `tokens` to `request`.
pub(crate) async fn authorise(
    request: RequestBuilder,
    tokens: &dyn TokenSource,
) -> Result<RequestBuilder, ApiError> {
    let token = tokens.token().await?;
    Ok(request.bearer_auth(token))
}

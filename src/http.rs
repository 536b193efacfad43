//! JSON-over-HTTP calls with exponential-backoff retry, shared by the
//! embedding providers and the generative models.
//!
//! Connection failures, HTTP 429 and 5xx are retried after 1s, 2s, 4s, ...
//! (capped at 32s). Any other status fails immediately.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection error ({url}): {message}")]
    Connection { url: String, message: String },

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response decode error: {0}")]
    Decode(String),
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            HttpError::Connection { .. } => true,
            HttpError::Status { status, .. } => *status == 429 || *status >= 500,
            HttpError::Decode(_) => false,
        }
    }
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Run `call` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries are spent.
pub async fn with_retry<T, E, F, Fut>(max_retries: u32, label: &str, mut call: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                debug!(label, attempt, error = %e, "retrying request");
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One POST of a JSON body, decoding a JSON response.
pub async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Req,
) -> Result<Resp, HttpError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.map_err(|e| HttpError::Connection {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HttpError::Status {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Resp>()
        .await
        .map_err(|e| HttpError::Decode(e.to_string()))
}

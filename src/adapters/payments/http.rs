//! HTTP plumbing shared by the payment provider adapters.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::domain::billing::ProviderKind;
use crate::ports::{PaymentError, PaymentErrorCode};

/// Builds the client every provider adapter shares.
///
/// Every request made through it is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<Client, PaymentError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| PaymentError::network(format!("Failed to create HTTP client: {}", e)))
}

/// Maps a transport failure. A timeout is never reported as success.
pub fn send_error(provider: ProviderKind, operation: &str, err: reqwest::Error) -> PaymentError {
    if err.is_timeout() {
        tracing::warn!(provider = %provider, operation, "Provider request timed out");
        PaymentError::timeout(format!("{} {} timed out", provider, operation))
    } else {
        tracing::warn!(provider = %provider, operation, error = %err, "Provider request failed");
        PaymentError::network(format!("{} {} failed: {}", provider, operation, err))
    }
}

/// Reads a JSON body, turning non-2xx responses into [`PaymentError`].
pub async fn read_json<T: DeserializeOwned>(
    provider: ProviderKind,
    operation: &str,
    response: Response,
) -> Result<T, PaymentError> {
    let response = ensure_success(provider, operation, response).await?;
    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            return send_error(provider, operation, e);
        }
        PaymentError::new(
            PaymentErrorCode::ProviderError,
            format!("Failed to parse {} response: {}", provider, e),
        )
    })
}

/// Passes 2xx responses through; logs and maps everything else.
pub async fn ensure_success(
    provider: ProviderKind,
    operation: &str,
    response: Response,
) -> Result<Response, PaymentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        provider = %provider,
        operation,
        status = status.as_u16(),
        error = %body,
        "Provider API call failed"
    );
    Err(PaymentError::from_status(
        status.as_u16(),
        format!("{} API error ({}): {}", provider, status.as_u16(), body),
    ))
}

//! Shared error mapping for the HTTP-backed providers.

use reqwest::{Response, StatusCode};

use sandbox_orchestrator_error::OrchestratorError;

pub(crate) fn transport_error(operation: &str, err: reqwest::Error) -> OrchestratorError {
    if err.is_timeout() {
        OrchestratorError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        OrchestratorError::BackendUnreachable {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

/// Map a non-success status to the adapter taxonomy: 4xx means the provider
/// rejected the request, everything else is treated as unreachable.
pub(crate) async fn status_error(operation: &str, response: Response) -> OrchestratorError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    if status == StatusCode::NOT_FOUND {
        OrchestratorError::NotFound {
            path: operation.to_string(),
        }
    } else if status.is_client_error() {
        OrchestratorError::BackendRejected {
            operation: operation.to_string(),
            message,
        }
    } else {
        OrchestratorError::BackendUnreachable {
            operation: operation.to_string(),
            message,
        }
    }
}

pub(crate) async fn expect_success(
    operation: &str,
    result: Result<Response, reqwest::Error>,
) -> Result<Response, OrchestratorError> {
    let response = result.map_err(|err| transport_error(operation, err))?;
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(status_error(operation, response).await)
    }
}

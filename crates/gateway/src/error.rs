//! Error types for the gateway

use crate::chain::ChainError;
use crate::orchestrator::TransactionOutcome;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tokengate_common::types::TxHash;

/// Failures surfaced at the orchestrator boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Rate limit exceeded: try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Transaction could not be built: {0}")]
    Build(String),

    #[error("Network error after {attempts} attempt(s): {detail}")]
    Network { detail: String, attempts: u32 },

    #[error("Chain rejected transaction: {0}")]
    ChainRejected(String),

    #[error("Insufficient funds in faucet: {available} available, {required} required")]
    InsufficientFunds { available: u128, required: u128 },

    #[error("Ledger error: {detail}")]
    Storage {
        detail: String,
        /// Set when the chain already accepted the transaction
        transaction_hash: Option<TxHash>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        GatewayError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Maps a terminal chain failure after `attempts` tries.
    pub fn from_chain(err: ChainError, attempts: u32) -> Self {
        match err {
            ChainError::Network { detail, .. } => GatewayError::Network { detail, attempts },
            ChainError::InvalidResponse(detail) => GatewayError::Network { detail, attempts },
            ChainError::Rejected(reason) => GatewayError::ChainRejected(reason),
            ChainError::Signing(detail) => GatewayError::Build(detail),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "VALIDATION_ERROR",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::Build(_) => "BUILD_ERROR",
            GatewayError::Network { .. } => "NETWORK_ERROR",
            GatewayError::ChainRejected(_) => "CHAIN_REJECTED",
            GatewayError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            GatewayError::Storage { .. } => "STORAGE_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Build(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Network { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ChainRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::InsufficientFunds { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Terminal outcome recorded for the request that failed with this error.
    pub fn outcome(&self) -> TransactionOutcome {
        match self {
            GatewayError::Network { .. } | GatewayError::Internal(_) => {
                TransactionOutcome::failed(None, self.to_string())
            }
            GatewayError::Storage { transaction_hash, .. } => {
                TransactionOutcome::failed(*transaction_hash, self.to_string())
            }
            // Chain reasons are passed through verbatim
            GatewayError::ChainRejected(reason) => TransactionOutcome::rejected(reason.clone()),
            _ => TransactionOutcome::rejected(self.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
            "outcome": self.outcome(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        match &self {
            GatewayError::Validation { field, .. } => body["field"] = json!(field),
            GatewayError::RateLimited { retry_after_secs } => body["retryAfterSecs"] = json!(retry_after_secs),
            GatewayError::Storage {
                transaction_hash: Some(hash),
                ..
            } => body["transactionHash"] = json!(hash),
            _ => {}
        }

        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited { retry_after_secs } = &self {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }

        response
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BroadcastState;
    use crate::orchestrator::OutcomeStatus;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::validation("address", "bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::RateLimited { retry_after_secs: 5 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::Network { detail: "down".into(), attempts: 3 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_chain_error_mapping() {
        let network = GatewayError::from_chain(ChainError::network("refused", BroadcastState::NotBroadcast), 3);
        assert_eq!(network, GatewayError::Network { detail: "refused".into(), attempts: 3 });

        let rejected = GatewayError::from_chain(ChainError::Rejected("execution reverted".into()), 1);
        let outcome = rejected.outcome();
        assert_eq!(outcome.status, OutcomeStatus::Rejected);
        assert_eq!(outcome.error_detail.as_deref(), Some("execution reverted"));
        assert_eq!(outcome.transaction_hash, None);
    }

    #[test]
    fn test_storage_outcome_keeps_hash() {
        let err = GatewayError::Storage {
            detail: "disk full".into(),
            transaction_hash: Some(TxHash([1; 32])),
        };
        let outcome = err.outcome();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.transaction_hash, Some(TxHash([1; 32])));
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let response = GatewayError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }
}

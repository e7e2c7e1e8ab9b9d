use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::PaymentStatus;

/// Failures at the chain boundary. Never changes payment state by itself.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC call `{0}` timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

impl ChainError {
    pub fn decode(what: &'static str, reason: impl Into<String>) -> Self {
        ChainError::Decode {
            what,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Payment already carries transaction {existing}; it can only be replaced once proven failed")]
    HashConflict { existing: String },

    #[error("Transaction {hash} already settles payment {payment_id}")]
    TransactionAlreadyUsed { hash: String, payment_id: Uuid },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("On-chain verification unavailable: no RPC endpoint configured")]
    ChainUnavailable,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl PaymentError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PaymentError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            PaymentError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            PaymentError::HashConflict { .. } => (StatusCode::CONFLICT, "TRANSACTION_HASH_CONFLICT"),
            PaymentError::TransactionAlreadyUsed { .. } => {
                (StatusCode::CONFLICT, "TRANSACTION_ALREADY_USED")
            }
            PaymentError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            PaymentError::ChainUnavailable | PaymentError::Chain(_) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR")
            }
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status, error_code) = self.status_and_code();

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, error_code, "Request failed");
        } else {
            tracing::debug!(error = %self, error_code, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

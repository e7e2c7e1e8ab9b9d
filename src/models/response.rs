use crate::models::{PaymentStatus, Token};
use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub invoice_id: String,
    pub token: Token,
    pub amount: String,
    #[serde(default)]
    pub merchant_address: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub status: PaymentStatus,
    pub transaction_hash: Option<H256>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub transaction_hash: String,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default)]
    pub verify: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub transaction_hash: Option<H256>,
    /// True only when on-chain verification reached a definitive outcome.
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RatesResponse {
    pub rates: BTreeMap<Token, f64>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub redis: bool,
    pub chain_rpc: Option<bool>,
    pub observer_subscriptions: usize,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

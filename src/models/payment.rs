use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Asset a payment is expected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    Eth,
    Usdc,
    Usdt,
}

impl Token {
    pub const ALL: [Token; 3] = [Token::Eth, Token::Usdc, Token::Usdt];

    /// Smallest-unit precision used on chain.
    pub fn decimals(self) -> u32 {
        match self {
            Token::Eth => 18,
            Token::Usdc | Token::Usdt => 6,
        }
    }

    pub fn is_native(self) -> bool {
        matches!(self, Token::Eth)
    }

    pub fn is_stablecoin(self) -> bool {
        matches!(self, Token::Usdc | Token::Usdt)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Token::Eth => "ETH",
            Token::Usdc => "USDC",
            Token::Usdt => "USDT",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// Forward-only state machine. Staying in the same state is always allowed.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Pending, Processing) => true,
            (Pending | Processing, Completed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub invoice_id: String,
    pub token: Token,
    /// Human units, e.g. "25.00".
    pub amount: String,
    pub merchant_address: Option<Address>,
    pub status: PaymentStatus,
    pub transaction_hash: Option<H256>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(payment: NewPayment) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: payment.user_id,
            invoice_id: payment.invoice_id,
            token: payment.token,
            amount: payment.amount,
            merchant_address: payment.merchant_address,
            status: PaymentStatus::Pending,
            transaction_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub invoice_id: String,
    pub token: Token,
    pub amount: String,
    pub merchant_address: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub wallet_address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use PaymentStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Completed));

        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_token_serde_uses_symbols() {
        let json = serde_json::to_string(&Token::Usdc).unwrap();
        assert_eq!(json, "\"USDC\"");

        let token: Token = serde_json::from_str("\"ETH\"").unwrap();
        assert_eq!(token, Token::Eth);
        assert_eq!(token.decimals(), 18);
    }

    #[test]
    fn test_new_record_starts_pending() {
        let record = PaymentRecord::new(NewPayment {
            user_id: Uuid::new_v4(),
            invoice_id: "inv-1".to_string(),
            token: Token::Usdt,
            amount: "12.5".to_string(),
            merchant_address: None,
        });

        assert_eq!(record.status, PaymentStatus::Pending);
        assert!(record.transaction_hash.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }
}

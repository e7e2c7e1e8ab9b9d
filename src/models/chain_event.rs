use crate::models::Token;
use ethers::types::{Address, H256, U256};
use ethers::utils::format_units;

/// Value movement observed on chain, already decoded from raw RPC data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    /// Smallest-unit amount.
    pub amount: U256,
    pub tx_hash: H256,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    NativeTransfer(Transfer),
    TokenTransfer {
        token: Token,
        transfer: Transfer,
    },
    RouterPayment {
        invoice_ref: H256,
        token: Token,
        transfer: Transfer,
    },
}

impl ChainEvent {
    pub fn token(&self) -> Token {
        match self {
            ChainEvent::NativeTransfer(_) => Token::Eth,
            ChainEvent::TokenTransfer { token, .. } | ChainEvent::RouterPayment { token, .. } => {
                *token
            }
        }
    }

    pub fn transfer(&self) -> &Transfer {
        match self {
            ChainEvent::NativeTransfer(transfer)
            | ChainEvent::TokenTransfer { transfer, .. }
            | ChainEvent::RouterPayment { transfer, .. } => transfer,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::NativeTransfer(_) => "native_transfer",
            ChainEvent::TokenTransfer { .. } => "token_transfer",
            ChainEvent::RouterPayment { .. } => "router_payment",
        }
    }

    /// Amount converted to human units using the asset's decimals.
    pub fn human_amount(&self) -> Option<f64> {
        to_human_units(self.transfer().amount, self.token().decimals())
    }
}

/// Converts a smallest-unit integer into a float in human units.
pub fn to_human_units(amount: U256, decimals: u32) -> Option<f64> {
    format_units(amount, decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parses a human-unit decimal string such as "25.00".
pub fn parse_human_amount(amount: &str) -> Option<f64> {
    amount
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

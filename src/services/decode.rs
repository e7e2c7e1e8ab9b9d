//! Turns raw RPC objects into typed [`ChainEvent`]s. Nothing past this module
//! handles untyped chain data.

use crate::config::TokenContracts;
use crate::contracts::{decode_payment_received, decode_transfer};
use crate::error::ChainError;
use crate::models::{ChainEvent, Token, Transfer};
use ethers::types::{Log, Transaction, H256};

/// Native value transfer carried by a plain transaction.
/// Contract creations and zero-value calls are not payments.
pub fn native_transfer(tx: &Transaction, block_number: u64) -> Option<ChainEvent> {
    let to = tx.to?;
    if tx.value.is_zero() {
        return None;
    }

    Some(ChainEvent::NativeTransfer(Transfer {
        from: tx.from,
        to,
        amount: tx.value,
        tx_hash: tx.hash,
        block_number: tx.block_number.map(|n| n.as_u64()).unwrap_or(block_number),
    }))
}

pub fn token_transfer(log: &Log, token: Token) -> Result<ChainEvent, ChainError> {
    let decoded = decode_transfer(log)?;
    let (tx_hash, block_number) = log_position(log)?;

    Ok(ChainEvent::TokenTransfer {
        token,
        transfer: Transfer {
            from: decoded.from,
            to: decoded.to,
            amount: decoded.value,
            tx_hash,
            block_number,
        },
    })
}

/// Router events are split into native vs token by the emitted token address.
/// Returns `Ok(None)` for tokens this deployment does not accept.
pub fn router_payment(log: &Log, tokens: &TokenContracts) -> Result<Option<ChainEvent>, ChainError> {
    let decoded = decode_payment_received(log)?;
    let (tx_hash, block_number) = log_position(log)?;

    let token = if decoded.is_native() {
        Token::Eth
    } else {
        match tokens.token_at(decoded.token) {
            Some(token) => token,
            None => {
                tracing::debug!(
                    token = ?decoded.token,
                    tx_hash = ?tx_hash,
                    "Ignoring router payment in unsupported token"
                );
                return Ok(None);
            }
        }
    };

    Ok(Some(ChainEvent::RouterPayment {
        invoice_ref: decoded.invoice_id,
        token,
        transfer: Transfer {
            from: decoded.payer,
            to: decoded.merchant,
            amount: decoded.amount,
            tx_hash,
            block_number,
        },
    }))
}

fn log_position(log: &Log) -> Result<(H256, u64), ChainError> {
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| ChainError::decode("log", "missing transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or_else(|| ChainError::decode("log", "missing block number"))?
        .as_u64();
    Ok((tx_hash, block_number))
}

use crate::error::ChainError;
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;

pub const PAYMENT_RECEIVED_SIGNATURE: &str =
    "PaymentReceived(bytes32,address,address,address,uint256)";

pub fn payment_received_topic() -> H256 {
    H256::from(keccak256(PAYMENT_RECEIVED_SIGNATURE.as_bytes()))
}

/// `PaymentReceived(bytes32 indexed invoiceId, address indexed payer,
/// address indexed token, address merchant, uint256 amount)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceived {
    pub invoice_id: H256,
    pub payer: Address,
    /// Zero address for native payments.
    pub token: Address,
    pub merchant: Address,
    pub amount: U256,
}

impl PaymentReceived {
    pub fn is_native(&self) -> bool {
        self.token == Address::zero()
    }
}

pub fn decode_payment_received(log: &Log) -> Result<PaymentReceived, ChainError> {
    if log.topics.first() != Some(&payment_received_topic()) {
        return Err(ChainError::decode(
            "PaymentReceived log",
            "topic0 is not PaymentReceived",
        ));
    }
    if log.topics.len() < 4 {
        return Err(ChainError::decode(
            "PaymentReceived log",
            format!("expected 4 topics, got {}", log.topics.len()),
        ));
    }
    if log.data.len() < 64 {
        return Err(ChainError::decode(
            "PaymentReceived log",
            format!("expected 64 data bytes, got {}", log.data.len()),
        ));
    }

    let data = log.data.as_ref();
    Ok(PaymentReceived {
        invoice_id: log.topics[1],
        payer: Address::from(log.topics[2]),
        token: Address::from(log.topics[3]),
        merchant: Address::from_slice(&data[12..32]),
        amount: U256::from_big_endian(&data[32..64]),
    })
}

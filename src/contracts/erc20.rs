use crate::error::ChainError;
use ethers::prelude::*;
use ethers::utils::keccak256;

// Minimal ERC-20 surface used by the payer agent
abigen!(
    IERC20,
    r#"[
        function transfer(address to, uint256 amount) external returns (bool)
        function balanceOf(address account) external view returns (uint256)
        function decimals() external view returns (uint8)
    ]"#
);

pub const TRANSFER_SIGNATURE: &str = "Transfer(address,address,uint256)";

pub fn transfer_topic() -> H256 {
    H256::from(keccak256(TRANSFER_SIGNATURE.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Transfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Decodes a standard `Transfer` log. `from`/`to` are indexed, `value` is data.
pub fn decode_transfer(log: &Log) -> Result<Erc20Transfer, ChainError> {
    if log.topics.first() != Some(&transfer_topic()) {
        return Err(ChainError::decode("Transfer log", "topic0 is not Transfer"));
    }
    if log.topics.len() < 3 {
        return Err(ChainError::decode(
            "Transfer log",
            format!("expected 3 topics, got {}", log.topics.len()),
        ));
    }
    if log.data.len() < 32 {
        return Err(ChainError::decode(
            "Transfer log",
            format!("expected 32 data bytes, got {}", log.data.len()),
        ));
    }

    Ok(Erc20Transfer {
        from: Address::from(log.topics[1]),
        to: Address::from(log.topics[2]),
        value: U256::from_big_endian(&log.data[..32]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_topic(addr: Address) -> H256 {
        H256::from(addr)
    }

    #[test]
    fn test_transfer_topic_matches_known_hash() {
        assert_eq!(
            hex::encode(transfer_topic()),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_decode_transfer() {
        let from = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let mut data = [0u8; 32];
        U256::from(25_000_000u64).to_big_endian(&mut data);

        let log = Log {
            topics: vec![transfer_topic(), address_topic(from), address_topic(to)],
            data: Bytes::from(data.to_vec()),
            ..Default::default()
        };

        let transfer = decode_transfer(&log).unwrap();
        assert_eq!(transfer.from, from);
        assert_eq!(transfer.to, to);
        assert_eq!(transfer.value, U256::from(25_000_000u64));
    }

    #[test]
    fn test_decode_transfer_rejects_short_data() {
        let log = Log {
            topics: vec![transfer_topic(), H256::zero(), H256::zero()],
            data: Bytes::from(vec![0u8; 8]),
            ..Default::default()
        };
        assert!(matches!(decode_transfer(&log), Err(ChainError::Decode { .. })));
    }
}

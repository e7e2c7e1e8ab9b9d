use crate::config::TokenContracts;
use crate::error::ChainError;
use crate::models::{PaymentRecord, Token, Transfer};
use crate::services::decode;
use crate::services::matching::{MatchRule, Mismatch};
use crate::services::ChainReader;
use ethers::types::{Address, TransactionReceipt, H256, U64};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Confirmed,
    Rejected(RejectReason),
    /// Receipt not available yet. Status must stay as it is.
    NotMined,
    /// Nothing on this node can judge the payment (e.g. no contract address
    /// for its token). Status must stay as it is.
    Unverifiable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Reverted,
    Mismatch(Mismatch),
    NoTransferLog,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Reverted => write!(f, "transaction reverted"),
            RejectReason::Mismatch(m) => write!(f, "{}", m),
            RejectReason::NoTransferLog => write!(f, "no matching transfer found in transaction"),
        }
    }
}

/// On-demand verification of a client-supplied transaction hash against a
/// payment record, straight from the RPC endpoint.
pub struct PaymentVerifier {
    chain: Arc<dyn ChainReader>,
    rule: MatchRule,
    tokens: TokenContracts,
    router: Option<Address>,
}

impl PaymentVerifier {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        rule: MatchRule,
        tokens: TokenContracts,
        router: Option<Address>,
    ) -> Self {
        Self {
            chain,
            rule,
            tokens,
            router,
        }
    }

    pub fn chain(&self) -> &Arc<dyn ChainReader> {
        &self.chain
    }

    /// `payer` is the wallet of the user owning `record`; a transfer sent
    /// from any other address does not settle it.
    pub async fn verify(
        &self,
        record: &PaymentRecord,
        payer: Address,
        tx_hash: H256,
    ) -> Result<VerificationOutcome, ChainError> {
        let Some(receipt) = self.chain.receipt(tx_hash).await? else {
            tracing::debug!(payment_id = %record.id, tx_hash = ?tx_hash, "Receipt not available yet");
            return Ok(VerificationOutcome::NotMined);
        };

        if receipt.status != Some(U64::from(1u64)) {
            return Ok(self.reject(record, tx_hash, RejectReason::Reverted));
        }

        let outcome = if record.token.is_native() {
            self.verify_native(record, payer, tx_hash, &receipt).await?
        } else {
            self.verify_token(record, payer, &receipt)
        };

        match outcome {
            VerificationOutcome::Confirmed => {
                tracing::info!(
                    payment_id = %record.id,
                    token = %record.token,
                    tx_hash = ?tx_hash,
                    "Payment verified on chain"
                );
                Ok(VerificationOutcome::Confirmed)
            }
            VerificationOutcome::Rejected(reason) => Ok(self.reject(record, tx_hash, reason)),
            VerificationOutcome::Unverifiable(why) => {
                tracing::warn!(payment_id = %record.id, tx_hash = ?tx_hash, %why, "Payment cannot be verified");
                Ok(VerificationOutcome::Unverifiable(why))
            }
            VerificationOutcome::NotMined => Ok(VerificationOutcome::NotMined),
        }
    }

    async fn verify_native(
        &self,
        record: &PaymentRecord,
        payer: Address,
        tx_hash: H256,
        receipt: &TransactionReceipt,
    ) -> Result<VerificationOutcome, ChainError> {
        let Some(tx) = self.chain.transaction(tx_hash).await? else {
            return Ok(VerificationOutcome::NotMined);
        };

        // Routed payment: value went to the router, which emitted the merchant.
        if self.router.is_some() && tx.to == self.router {
            return Ok(self.verify_router_log(record, payer, receipt, Token::Eth));
        }

        let Some(to) = tx.to else {
            return Ok(VerificationOutcome::Rejected(RejectReason::NoTransferLog));
        };

        let transfer = Transfer {
            from: tx.from,
            to,
            amount: tx.value,
            tx_hash,
            block_number: receipt.block_number.map_or(0, |n| n.as_u64()),
        };
        Ok(match self.check_transfer(record, payer, Token::Eth, &transfer) {
            Ok(()) => VerificationOutcome::Confirmed,
            Err(m) => VerificationOutcome::Rejected(RejectReason::Mismatch(m)),
        })
    }

    fn verify_token(
        &self,
        record: &PaymentRecord,
        payer: Address,
        receipt: &TransactionReceipt,
    ) -> VerificationOutcome {
        let Some(contract) = self.tokens.address_of(record.token) else {
            return VerificationOutcome::Unverifiable(format!(
                "no contract configured for {}",
                record.token
            ));
        };

        let mut last_mismatch = None;
        for log in receipt.logs.iter().filter(|log| log.address == contract) {
            let Ok(event) = decode::token_transfer(log, record.token) else {
                continue;
            };
            match self.check_transfer(record, payer, record.token, event.transfer()) {
                Ok(()) => return VerificationOutcome::Confirmed,
                Err(m) => last_mismatch = Some(m),
            }
        }

        match last_mismatch {
            Some(m) => VerificationOutcome::Rejected(RejectReason::Mismatch(m)),
            None => VerificationOutcome::Rejected(RejectReason::NoTransferLog),
        }
    }

    fn verify_router_log(
        &self,
        record: &PaymentRecord,
        payer: Address,
        receipt: &TransactionReceipt,
        token: Token,
    ) -> VerificationOutcome {
        let mut last_mismatch = None;
        for log in receipt.logs.iter().filter(|log| Some(log.address) == self.router) {
            let Ok(Some(event)) = decode::router_payment(log, &self.tokens) else {
                continue;
            };
            if event.token() != token {
                continue;
            }
            match self.check_transfer(record, payer, token, event.transfer()) {
                Ok(()) => return VerificationOutcome::Confirmed,
                Err(m) => last_mismatch = Some(m),
            }
        }

        match last_mismatch {
            Some(m) => VerificationOutcome::Rejected(RejectReason::Mismatch(m)),
            None => VerificationOutcome::Rejected(RejectReason::NoTransferLog),
        }
    }

    fn check_transfer(
        &self,
        record: &PaymentRecord,
        payer: Address,
        token: Token,
        transfer: &Transfer,
    ) -> Result<(), Mismatch> {
        self.rule.check_payer(payer, transfer.from)?;
        self.rule.check(record, token, transfer.to, transfer.amount)
    }

    fn reject(&self, record: &PaymentRecord, tx_hash: H256, reason: RejectReason) -> VerificationOutcome {
        tracing::warn!(
            payment_id = %record.id,
            tx_hash = ?tx_hash,
            %reason,
            "Payment verification failed"
        );
        VerificationOutcome::Rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::models::NewPayment;
    use crate::test_support::{receipt, router_log, transfer_log, FakeChain};
    use ethers::types::{Transaction, U256};
    use uuid::Uuid;

    const MERCHANT: Address = Address::repeat_byte(0xaa);
    const PAYER: Address = Address::repeat_byte(0x11);
    const USDC: Address = Address::repeat_byte(0x05);
    const ROUTER: Address = Address::repeat_byte(0x0f);

    fn record(token: Token, amount: &str) -> PaymentRecord {
        PaymentRecord::new(NewPayment {
            user_id: Uuid::new_v4(),
            invoice_id: "inv".into(),
            token,
            amount: amount.into(),
            merchant_address: Some(MERCHANT),
        })
    }

    fn verifier(chain: Arc<FakeChain>) -> PaymentVerifier {
        PaymentVerifier::new(
            chain,
            MatchRule::new(&MatchConfig::default()),
            TokenContracts { usdc: Some(USDC), usdt: None },
            Some(ROUTER),
        )
    }

    fn native_tx(hash: H256, to: Address, wei: U256) -> Transaction {
        Transaction {
            hash,
            from: PAYER,
            to: Some(to),
            value: wei,
            ..Default::default()
        }
    }

    fn one_eth() -> U256 {
        U256::exp10(18)
    }

    #[tokio::test]
    async fn test_native_payment_confirmed() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x01);
        chain.add_transaction(native_tx(hash, MERCHANT, one_eth()), receipt(hash, true, vec![]));

        let outcome = verifier(chain).verify(&record(Token::Eth, "1.0"), PAYER, hash).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_native_payment_wrong_recipient_rejected() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x01);
        let other = Address::repeat_byte(0xbb);
        chain.add_transaction(native_tx(hash, other, one_eth()), receipt(hash, true, vec![]));

        let outcome = verifier(chain).verify(&record(Token::Eth, "1.0"), PAYER, hash).await.unwrap();
        assert!(matches!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::Mismatch(Mismatch::Recipient { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reverted_receipt_always_rejected() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x01);
        chain.add_transaction(native_tx(hash, MERCHANT, one_eth()), receipt(hash, false, vec![]));

        let outcome = verifier(chain).verify(&record(Token::Eth, "1.0"), PAYER, hash).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Rejected(RejectReason::Reverted));
    }

    #[tokio::test]
    async fn test_missing_receipt_is_not_mined() {
        let chain = Arc::new(FakeChain::new());
        let outcome = verifier(chain)
            .verify(&record(Token::Eth, "1.0"), PAYER, H256::repeat_byte(0x09))
            .await
            .unwrap();
        assert_eq!(outcome, VerificationOutcome::NotMined);
    }

    #[tokio::test]
    async fn test_rpc_failure_propagates() {
        let chain = Arc::new(FakeChain::new());
        chain.fail_all(true);
        let result = verifier(chain)
            .verify(&record(Token::Eth, "1.0"), PAYER, H256::repeat_byte(0x09))
            .await;
        assert!(matches!(result, Err(ChainError::Rpc(_))));
    }

    #[tokio::test]
    async fn test_token_payment_via_transfer_log() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x02);
        let log = transfer_log(USDC, PAYER, MERCHANT, U256::from(25_000_000u64), hash, 10);
        chain.add_transaction(native_tx(hash, USDC, U256::zero()), receipt(hash, true, vec![log]));

        let outcome = verifier(chain).verify(&record(Token::Usdc, "25.00"), PAYER, hash).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_token_transfer_from_other_contract_ignored() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x02);
        let fake_token = Address::repeat_byte(0x66);
        let log = transfer_log(fake_token, PAYER, MERCHANT, U256::from(25_000_000u64), hash, 10);
        chain.add_transaction(native_tx(hash, fake_token, U256::zero()), receipt(hash, true, vec![log]));

        let outcome = verifier(chain).verify(&record(Token::Usdc, "25.00"), PAYER, hash).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Rejected(RejectReason::NoTransferLog));
    }

    #[tokio::test]
    async fn test_native_payment_through_router() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x03);
        let log = router_log(ROUTER, PAYER, Address::zero(), MERCHANT, one_eth(), hash, 11);
        chain.add_transaction(native_tx(hash, ROUTER, one_eth()), receipt(hash, true, vec![log]));

        let outcome = verifier(chain).verify(&record(Token::Eth, "1"), PAYER, hash).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_native_payment_from_other_wallet_rejected() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x04);
        let mut tx = native_tx(hash, MERCHANT, one_eth());
        tx.from = Address::repeat_byte(0x22);
        chain.add_transaction(tx, receipt(hash, true, vec![]));

        let outcome = verifier(chain).verify(&record(Token::Eth, "1.0"), PAYER, hash).await.unwrap();
        assert_eq!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::Mismatch(Mismatch::Payer {
                expected: PAYER,
                actual: Address::repeat_byte(0x22),
            }))
        );
    }

    #[tokio::test]
    async fn test_token_transfer_from_other_wallet_rejected() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x05);
        let stranger = Address::repeat_byte(0x22);
        let log = transfer_log(USDC, stranger, MERCHANT, U256::from(25_000_000u64), hash, 10);
        chain.add_transaction(native_tx(hash, USDC, U256::zero()), receipt(hash, true, vec![log]));

        let outcome = verifier(chain).verify(&record(Token::Usdc, "25.00"), PAYER, hash).await.unwrap();
        assert!(matches!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::Mismatch(Mismatch::Payer { .. }))
        ));
    }

    #[tokio::test]
    async fn test_token_transfer_wrong_amount_rejected() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x06);
        // 24.99 USDC against a 25.00 invoice
        let log = transfer_log(USDC, PAYER, MERCHANT, U256::from(24_990_000u64), hash, 10);
        chain.add_transaction(native_tx(hash, USDC, U256::zero()), receipt(hash, true, vec![log]));

        let outcome = verifier(chain).verify(&record(Token::Usdc, "25.00"), PAYER, hash).await.unwrap();
        assert!(matches!(
            outcome,
            VerificationOutcome::Rejected(RejectReason::Mismatch(Mismatch::Amount { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_token_is_unverifiable() {
        let chain = Arc::new(FakeChain::new());
        let hash = H256::repeat_byte(0x07);
        let usdt = Address::repeat_byte(0x06);
        let log = transfer_log(usdt, PAYER, MERCHANT, U256::from(25_000_000u64), hash, 10);
        chain.add_transaction(native_tx(hash, usdt, U256::zero()), receipt(hash, true, vec![log]));

        let outcome = verifier(chain).verify(&record(Token::Usdt, "25"), PAYER, hash).await.unwrap();
        assert!(matches!(outcome, VerificationOutcome::Unverifiable(_)));
    }
}

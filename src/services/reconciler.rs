use crate::error::PaymentError;
use crate::models::{ChainEvent, PaymentRecord, PaymentStatus};
use crate::services::matching::MatchRule;
use crate::services::PaymentStore;
use std::sync::Arc;

/// Event-driven matching: pairs an observed chain event with the payer's most
/// recent pending payment that it satisfies.
pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    rule: MatchRule,
    lookback: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PaymentStore>, rule: MatchRule, lookback: usize) -> Self {
        Self {
            store,
            rule,
            lookback,
        }
    }

    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    /// Returns the completed record, or `None` when the event is not for us.
    pub async fn handle_event(
        &self,
        event: &ChainEvent,
    ) -> Result<Option<PaymentRecord>, PaymentError> {
        let transfer = event.transfer();
        let token = event.token();

        let Some(user) = self.store.find_user_by_wallet_address(transfer.from).await? else {
            return Ok(None);
        };

        // A transaction settles at most one payment.
        let claimed = self
            .store
            .find_payment_by_transaction_hash(transfer.tx_hash)
            .await?;
        if let Some(claimed) = claimed.as_ref().filter(|p| p.status.is_terminal()) {
            tracing::debug!(
                payment_id = %claimed.id,
                tx_hash = ?transfer.tx_hash,
                "Transaction already settled a payment"
            );
            return Ok(None);
        }

        let pending = self
            .store
            .find_pending_payments(user.id, token, self.lookback)
            .await?;
        if pending.is_empty() {
            return Ok(None);
        }

        let matched = pending.into_iter().find(|record| {
            if record.transaction_hash.is_some_and(|h| h != transfer.tx_hash) {
                tracing::debug!(
                    payment_id = %record.id,
                    tx_hash = ?transfer.tx_hash,
                    "Pending payment is bound to another transaction"
                );
                return false;
            }
            if claimed.as_ref().is_some_and(|c| c.id != record.id) {
                return false;
            }
            match self.rule.check(record, token, transfer.to, transfer.amount) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::debug!(
                        payment_id = %record.id,
                        tx_hash = ?transfer.tx_hash,
                        %reason,
                        "Pending payment does not match event"
                    );
                    false
                }
            }
        });

        let Some(record) = matched else {
            return Ok(None);
        };

        let updated = match self
            .store
            .update_payment_status(record.id, PaymentStatus::Completed, Some(transfer.tx_hash))
            .await
        {
            Ok(updated) => updated,
            // lost a race with a concurrent confirm
            Err(e @ (PaymentError::HashConflict { .. } | PaymentError::TransactionAlreadyUsed { .. })) => {
                tracing::debug!(payment_id = %record.id, error = %e, "Event not applied");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            payment_id = %updated.id,
            user_id = %user.id,
            token = %token,
            kind = event.kind(),
            tx_hash = ?transfer.tx_hash,
            block = transfer.block_number,
            "Payment matched & completed"
        );

        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::models::{NewPayment, Token, Transfer};
    use crate::services::MemoryStore;
    use ethers::types::{Address, H256, U256};
    use uuid::Uuid;

    const MERCHANT: Address = Address::repeat_byte(0xaa);
    const WALLET: Address = Address::repeat_byte(0x11);

    async fn setup() -> (Arc<MemoryStore>, Reconciler, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = store.register_user(WALLET).await;
        let reconciler = Reconciler::new(
            store.clone(),
            MatchRule::new(&MatchConfig::default()),
            5,
        );
        (store, reconciler, user.id)
    }

    async fn pending(store: &MemoryStore, user_id: Uuid, token: Token, amount: &str) -> PaymentRecord {
        store
            .create_payment(NewPayment {
                user_id,
                invoice_id: "inv-1".into(),
                token,
                amount: amount.into(),
                merchant_address: Some(MERCHANT),
            })
            .await
            .unwrap()
    }

    fn usdc_event(to: Address, amount: u64, tx: u8) -> ChainEvent {
        ChainEvent::TokenTransfer {
            token: Token::Usdc,
            transfer: Transfer {
                from: WALLET,
                to,
                amount: U256::from(amount),
                tx_hash: H256::repeat_byte(tx),
                block_number: 100,
            },
        }
    }

    #[tokio::test]
    async fn test_token_transfer_completes_pending_payment() {
        let (store, reconciler, user_id) = setup().await;
        let record = pending(&store, user_id, Token::Usdc, "25.00").await;

        let event = usdc_event(MERCHANT, 25_000_000, 0x01);
        let updated = reconciler.handle_event(&event).await.unwrap().unwrap();

        assert_eq!(updated.id, record.id);
        assert_eq!(updated.status, PaymentStatus::Completed);
        assert_eq!(updated.transaction_hash, Some(H256::repeat_byte(0x01)));
    }

    #[tokio::test]
    async fn test_repeated_event_is_idempotent() {
        let (store, reconciler, user_id) = setup().await;
        let record = pending(&store, user_id, Token::Usdc, "25.00").await;

        let event = usdc_event(MERCHANT, 25_000_000, 0x01);
        reconciler.handle_event(&event).await.unwrap();
        let second = reconciler.handle_event(&event).await.unwrap();
        assert!(second.is_none());

        let stored = store.find_payment(user_id, record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(stored.transaction_hash, Some(H256::repeat_byte(0x01)));
    }

    #[tokio::test]
    async fn test_wrong_recipient_never_matches() {
        let (store, reconciler, user_id) = setup().await;
        let record = pending(&store, user_id, Token::Usdc, "25.00").await;

        let event = usdc_event(Address::repeat_byte(0xbb), 25_000_000, 0x01);
        assert!(reconciler.handle_event(&event).await.unwrap().is_none());

        let stored = store.find_payment(user_id, record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_most_recent_pending_wins_tie() {
        let (store, reconciler, user_id) = setup().await;
        let older = pending(&store, user_id, Token::Usdc, "5").await;
        let newer = pending(&store, user_id, Token::Usdc, "5").await;

        let updated = reconciler
            .handle_event(&usdc_event(MERCHANT, 5_000_000, 0x02))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, newer.id);

        let older = store.find_payment(user_id, older.id).await.unwrap().unwrap();
        assert_eq!(older.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_native_tolerance_boundary() {
        let (store, reconciler, user_id) = setup().await;
        let record = pending(&store, user_id, Token::Eth, "10.000000").await;

        let far = ChainEvent::NativeTransfer(Transfer {
            from: WALLET,
            to: MERCHANT,
            amount: U256::from(10_001_000_000_000_000_000u128),
            tx_hash: H256::repeat_byte(0x03),
            block_number: 1,
        });
        assert!(reconciler.handle_event(&far).await.unwrap().is_none());

        let close = ChainEvent::NativeTransfer(Transfer {
            from: WALLET,
            to: MERCHANT,
            amount: U256::from(10_000_000_500_000_000_000u128),
            tx_hash: H256::repeat_byte(0x04),
            block_number: 2,
        });
        let updated = reconciler.handle_event(&close).await.unwrap().unwrap();
        assert_eq!(updated.id, record.id);
    }

    #[tokio::test]
    async fn test_unknown_payer_is_ignored() {
        let (store, reconciler, user_id) = setup().await;
        pending(&store, user_id, Token::Usdc, "25.00").await;

        let mut event = usdc_event(MERCHANT, 25_000_000, 0x01);
        if let ChainEvent::TokenTransfer { transfer, .. } = &mut event {
            transfer.from = Address::repeat_byte(0x99);
        }
        assert!(reconciler.handle_event(&event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settled_hash_does_not_complete_another_payment() {
        let (store, reconciler, user_id) = setup().await;
        let first = pending(&store, user_id, Token::Usdc, "25.00").await;

        let event = usdc_event(MERCHANT, 25_000_000, 0x05);
        reconciler.handle_event(&event).await.unwrap().unwrap();

        // a new invoice for the same amount must not be paid by the old transaction
        let second = pending(&store, user_id, Token::Usdc, "25.00").await;
        assert!(reconciler.handle_event(&event).await.unwrap().is_none());

        let second = store.find_payment(user_id, second.id).await.unwrap().unwrap();
        assert_eq!(second.status, PaymentStatus::Pending);
        assert_eq!(second.transaction_hash, None);
        let first = store.find_payment(user_id, first.id).await.unwrap().unwrap();
        assert_eq!(first.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_payment_bound_to_other_hash_is_skipped() {
        let (store, reconciler, user_id) = setup().await;
        let record = pending(&store, user_id, Token::Usdc, "25.00").await;
        let attached = H256::repeat_byte(0x06);
        store
            .update_payment_status(record.id, PaymentStatus::Pending, Some(attached))
            .await
            .unwrap();

        let event = usdc_event(MERCHANT, 25_000_000, 0x07);
        assert!(reconciler.handle_event(&event).await.unwrap().is_none());

        let stored = store.find_payment(user_id, record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.transaction_hash, Some(attached));

        // the attached transaction itself still settles it
        let event = usdc_event(MERCHANT, 25_000_000, 0x06);
        let updated = reconciler.handle_event(&event).await.unwrap().unwrap();
        assert_eq!(updated.id, record.id);
        assert_eq!(updated.status, PaymentStatus::Completed);
    }
}

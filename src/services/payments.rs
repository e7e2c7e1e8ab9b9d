use crate::config::{self, MatchConfig};
use crate::error::PaymentError;
use crate::models::{
    chain_event::parse_human_amount, ConfirmPaymentRequest, ConfirmPaymentResponse,
    InitiatePaymentRequest, InitiatePaymentResponse, NewPayment, PaymentRecord, PaymentStatus,
    PaymentStatusResponse,
};
use crate::services::verifier::{PaymentVerifier, VerificationOutcome};
use crate::services::PaymentStore;
use ethers::types::{Address, H256, U64};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Caller-facing payment operations: initiate, poll, confirm.
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    verifier: Option<Arc<PaymentVerifier>>,
    matching: MatchConfig,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        verifier: Option<Arc<PaymentVerifier>>,
        matching: MatchConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            matching,
        }
    }

    pub async fn initiate(
        &self,
        user_id: Uuid,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, PaymentError> {
        let invoice_id = request.invoice_id.trim();
        if invoice_id.is_empty() {
            return Err(PaymentError::InvalidRequest("invoiceId is required".into()));
        }

        let invoice = self
            .store
            .find_invoice(user_id, invoice_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Invoice".to_string()))?;

        let amount = request.amount.trim();
        match parse_human_amount(amount) {
            Some(value) if value.is_finite() && value > 0.0 => {}
            _ => {
                return Err(PaymentError::InvalidRequest(format!(
                    "amount must be a positive number, got {:?}",
                    request.amount
                )))
            }
        }

        let merchant_address = match request
            .merchant_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(raw) => Some(
                config::parse_address(raw)
                    .map_err(|e| PaymentError::InvalidRequest(format!("merchantAddress: {}", e)))?,
            ),
            None => self.matching.default_merchant,
        };

        let record = self
            .store
            .create_payment(NewPayment {
                user_id,
                invoice_id: invoice.id,
                token: request.token,
                amount: amount.to_string(),
                merchant_address,
            })
            .await?;

        tracing::info!(
            payment_id = %record.id,
            user_id = %user_id,
            invoice_id = %record.invoice_id,
            token = %record.token,
            amount = %record.amount,
            "Payment initiated"
        );

        Ok(InitiatePaymentResponse {
            payment_id: record.id,
            status: record.status,
        })
    }

    /// Current status; re-verifies on chain first when a hash is attached
    /// and the record is still open.
    pub async fn get_status(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentStatusResponse, PaymentError> {
        let mut record = self.load(user_id, payment_id).await?;

        if let (Some(hash), Some(verifier)) = (record.transaction_hash, &self.verifier) {
            if !record.status.is_terminal() {
                let payer = self.owner_wallet(&record).await?;
                match verifier.verify(&record, payer, hash).await {
                    Ok(outcome) => record = self.apply_outcome(&record, hash, &outcome).await?,
                    Err(e) => tracing::warn!(
                        payment_id = %record.id,
                        tx_hash = ?hash,
                        error = %e,
                        "Opportunistic verification failed, status unchanged"
                    ),
                }
            }
        }

        Ok(PaymentStatusResponse {
            status: record.status,
            transaction_hash: record.transaction_hash,
        })
    }

    pub async fn confirm(
        &self,
        user_id: Uuid,
        payment_id: Uuid,
        request: ConfirmPaymentRequest,
    ) -> Result<ConfirmPaymentResponse, PaymentError> {
        let hash = parse_tx_hash(&request.transaction_hash)?;
        let mut record = self.load(user_id, payment_id).await?;

        if record.status.is_terminal() {
            tracing::debug!(payment_id = %record.id, status = %record.status, "Confirm on settled payment ignored");
            return Ok(confirm_response(record, false, None));
        }

        if let Some(other) = self
            .store
            .find_payment_by_transaction_hash(hash)
            .await?
            .filter(|p| p.id != record.id)
        {
            tracing::warn!(
                payment_id = %record.id,
                other_payment_id = %other.id,
                tx_hash = ?hash,
                "Transaction hash already attached to another payment"
            );
            return Err(PaymentError::TransactionAlreadyUsed {
                hash: format!("{:?}", hash),
                payment_id: other.id,
            });
        }

        if let Some(existing) = record.transaction_hash.filter(|h| *h != hash) {
            self.ensure_replaceable(&record, existing).await?;
            record = self
                .store
                .replace_transaction_hash(record.id, existing, hash)
                .await?;
            if record.status.is_terminal() {
                return Ok(confirm_response(record, false, None));
            }
        }

        if request.verify.unwrap_or(false) {
            return self.confirm_verified(record, hash).await;
        }

        let target = match request.status {
            Some(asserted) if !record.status.can_transition_to(asserted) => {
                tracing::debug!(
                    payment_id = %record.id,
                    from = %record.status,
                    to = %asserted,
                    "Ignoring backward status from client"
                );
                record.status
            }
            Some(asserted) if asserted.is_terminal() && !self.matching.trust_client_status => {
                tracing::debug!(
                    payment_id = %record.id,
                    asserted = %asserted,
                    "Client-asserted status not trusted, leaving it to verification"
                );
                record.status
            }
            Some(asserted) => asserted,
            None => record.status,
        };

        let updated = self
            .store
            .update_payment_status(record.id, target, Some(hash))
            .await?;

        tracing::info!(
            payment_id = %updated.id,
            tx_hash = ?hash,
            status = %updated.status,
            "Transaction hash attached"
        );

        Ok(confirm_response(updated, false, None))
    }

    async fn confirm_verified(
        &self,
        record: PaymentRecord,
        hash: H256,
    ) -> Result<ConfirmPaymentResponse, PaymentError> {
        let Some(verifier) = &self.verifier else {
            let updated = self.attach_hash(&record, hash).await?;
            return Ok(confirm_response(
                updated,
                false,
                Some(PaymentError::ChainUnavailable.to_string()),
            ));
        };

        let payer = self.owner_wallet(&record).await?;
        match verifier.verify(&record, payer, hash).await {
            Ok(VerificationOutcome::NotMined) => {
                let updated = self.attach_hash(&record, hash).await?;
                Ok(confirm_response(
                    updated,
                    false,
                    Some("transaction not yet mined".to_string()),
                ))
            }
            Ok(VerificationOutcome::Unverifiable(why)) => {
                let updated = self.attach_hash(&record, hash).await?;
                Ok(confirm_response(updated, false, Some(why)))
            }
            Ok(outcome) => {
                let error = match &outcome {
                    VerificationOutcome::Rejected(reason) => Some(reason.to_string()),
                    _ => None,
                };
                let updated = self.apply_outcome(&record, hash, &outcome).await?;
                Ok(confirm_response(updated, true, error))
            }
            Err(e) => {
                tracing::warn!(
                    payment_id = %record.id,
                    tx_hash = ?hash,
                    error = %e,
                    "Verification could not run, status unchanged"
                );
                let updated = self.attach_hash(&record, hash).await?;
                Ok(confirm_response(updated, false, Some(e.to_string())))
            }
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, PaymentError> {
        self.store.list_payments_for_user(user_id).await
    }

    pub async fn list_for_invoice(
        &self,
        user_id: Uuid,
        invoice_id: &str,
    ) -> Result<Vec<PaymentRecord>, PaymentError> {
        if self.store.find_invoice(user_id, invoice_id).await?.is_none() {
            return Err(PaymentError::NotFound("Invoice".to_string()));
        }
        self.store.list_payments_for_invoice(user_id, invoice_id).await
    }

    async fn load(&self, user_id: Uuid, payment_id: Uuid) -> Result<PaymentRecord, PaymentError> {
        self.store
            .find_payment(user_id, payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Payment".to_string()))
    }

    async fn owner_wallet(&self, record: &PaymentRecord) -> Result<Address, PaymentError> {
        self.store
            .find_user(record.user_id)
            .await?
            .map(|user| user.wallet_address)
            .ok_or_else(|| PaymentError::NotFound("User".to_string()))
    }

    async fn attach_hash(&self, record: &PaymentRecord, hash: H256) -> Result<PaymentRecord, PaymentError> {
        self.store
            .update_payment_status(record.id, record.status, Some(hash))
            .await
    }

    async fn apply_outcome(
        &self,
        record: &PaymentRecord,
        hash: H256,
        outcome: &VerificationOutcome,
    ) -> Result<PaymentRecord, PaymentError> {
        let status = match outcome {
            VerificationOutcome::Confirmed => PaymentStatus::Completed,
            VerificationOutcome::Rejected(_) => PaymentStatus::Failed,
            VerificationOutcome::NotMined | VerificationOutcome::Unverifiable(_) => {
                return Ok(record.clone())
            }
        };
        self.store
            .update_payment_status(record.id, status, Some(hash))
            .await
    }

    /// A different hash may only replace one that reverted on chain.
    async fn ensure_replaceable(&self, record: &PaymentRecord, existing: H256) -> Result<(), PaymentError> {
        let conflict = || PaymentError::HashConflict {
            existing: format!("{:?}", existing),
        };

        let Some(verifier) = &self.verifier else {
            return Err(conflict());
        };

        match verifier.chain().receipt(existing).await {
            Ok(Some(receipt)) if receipt.status != Some(U64::from(1u64)) => {
                tracing::info!(
                    payment_id = %record.id,
                    replaced = ?existing,
                    "Replacing reverted transaction hash"
                );
                Ok(())
            }
            Ok(_) => Err(conflict()),
            Err(e) => {
                tracing::warn!(payment_id = %record.id, error = %e, "Could not check existing transaction");
                Err(conflict())
            }
        }
    }
}

fn confirm_response(
    record: PaymentRecord,
    verified: bool,
    verification_error: Option<String>,
) -> ConfirmPaymentResponse {
    ConfirmPaymentResponse {
        payment_id: record.id,
        status: record.status,
        transaction_hash: record.transaction_hash,
        verified,
        verification_error,
    }
}

pub fn parse_tx_hash(raw: &str) -> Result<H256, PaymentError> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 64 {
        return Err(PaymentError::InvalidRequest(format!(
            "transactionHash must be 32 bytes of hex, got {:?}",
            trimmed
        )));
    }
    H256::from_str(hex_part)
        .map_err(|e| PaymentError::InvalidRequest(format!("Invalid transactionHash: {}", e)))
}

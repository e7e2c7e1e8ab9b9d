use crate::error::PaymentError;
use crate::models::{Invoice, NewPayment, PaymentRecord, PaymentStatus, Token, User};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, H256};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence operations the reconciliation core depends on.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create_payment(&self, payment: NewPayment) -> Result<PaymentRecord, PaymentError>;

    /// Scoped to the owning user; other users' payments are invisible.
    async fn find_payment(&self, user_id: Uuid, id: Uuid) -> Result<Option<PaymentRecord>, PaymentError>;

    /// Most recent first.
    async fn find_pending_payments(
        &self,
        user_id: Uuid,
        token: Token,
        limit: usize,
    ) -> Result<Vec<PaymentRecord>, PaymentError>;

    /// Not user-scoped: a transaction hash identifies at most one payment.
    async fn find_payment_by_transaction_hash(
        &self,
        hash: H256,
    ) -> Result<Option<PaymentRecord>, PaymentError>;

    /// Applies a status change atomically. Writes against a terminal record
    /// are no-ops that return the record unchanged. The transaction hash is
    /// write-once: a different hash than the attached one is a
    /// `HashConflict`, and a hash already carried by another payment is
    /// `TransactionAlreadyUsed`.
    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        transaction_hash: Option<H256>,
    ) -> Result<PaymentRecord, PaymentError>;

    /// Swaps the attached hash for `replacement`, only if it is still
    /// `expected`. Callers must have proven `expected` failed on chain.
    async fn replace_transaction_hash(
        &self,
        id: Uuid,
        expected: H256,
        replacement: H256,
    ) -> Result<PaymentRecord, PaymentError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, PaymentError>;

    async fn find_user_by_wallet_address(&self, address: Address) -> Result<Option<User>, PaymentError>;

    async fn find_invoice(&self, user_id: Uuid, invoice_id: &str) -> Result<Option<Invoice>, PaymentError>;

    async fn list_payments_for_user(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, PaymentError>;

    async fn list_payments_for_invoice(
        &self,
        user_id: Uuid,
        invoice_id: &str,
    ) -> Result<Vec<PaymentRecord>, PaymentError>;
}

#[derive(Default)]
struct StoreState {
    users: HashMap<Uuid, User>,
    invoices: HashMap<String, Invoice>,
    /// Insertion order doubles as recency order.
    payments: Vec<PaymentRecord>,
}

impl StoreState {
    fn position(&self, id: Uuid) -> Result<usize, PaymentError> {
        self.payments
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PaymentError::NotFound("Payment".to_string()))
    }

    fn ensure_unused(&self, id: Uuid, hash: H256) -> Result<(), PaymentError> {
        match self
            .payments
            .iter()
            .find(|p| p.id != id && p.transaction_hash == Some(hash))
        {
            Some(other) => Err(PaymentError::TransactionAlreadyUsed {
                hash: format!("{:?}", hash),
                payment_id: other.id,
            }),
            None => Ok(()),
        }
    }
}

/// In-process store used when no external CRUD backend is wired in.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Fixtures {
    users: Vec<UserFixture>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFixture {
    id: Option<Uuid>,
    wallet_address: Address,
    #[serde(default)]
    invoices: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds users and invoices from a JSON file:
    /// `{ "users": [{ "id": "...", "walletAddress": "0x..", "invoices": ["inv-1"] }] }`
    pub async fn from_fixtures(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fixtures {}", path.display()))?;
        let fixtures: Fixtures = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid fixtures {}", path.display()))?;

        let store = Self::new();
        for user in fixtures.users {
            let created = store
                .register_user_with_id(user.id.unwrap_or_else(Uuid::new_v4), user.wallet_address)
                .await;
            for invoice in user.invoices {
                store.register_invoice(created.id, &invoice).await;
            }
        }

        let state = store.state.read().await;
        tracing::info!(
            users = state.users.len(),
            invoices = state.invoices.len(),
            "Store seeded from fixtures"
        );
        drop(state);

        Ok(store)
    }

    pub async fn register_user(&self, wallet_address: Address) -> User {
        self.register_user_with_id(Uuid::new_v4(), wallet_address).await
    }

    async fn register_user_with_id(&self, id: Uuid, wallet_address: Address) -> User {
        let user = User { id, wallet_address };
        self.state.write().await.users.insert(id, user.clone());
        user
    }

    pub async fn register_invoice(&self, user_id: Uuid, invoice_id: &str) -> Invoice {
        let invoice = Invoice {
            id: invoice_id.to_string(),
            user_id,
        };
        self.state
            .write()
            .await
            .invoices
            .insert(invoice.id.clone(), invoice.clone());
        invoice
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn create_payment(&self, payment: NewPayment) -> Result<PaymentRecord, PaymentError> {
        let record = PaymentRecord::new(payment);
        self.state.write().await.payments.push(record.clone());
        Ok(record)
    }

    async fn find_payment(&self, user_id: Uuid, id: Uuid) -> Result<Option<PaymentRecord>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.id == id && p.user_id == user_id)
            .cloned())
    }

    async fn find_pending_payments(
        &self,
        user_id: Uuid,
        token: Token,
        limit: usize,
    ) -> Result<Vec<PaymentRecord>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .rev()
            .filter(|p| {
                p.user_id == user_id && p.token == token && p.status == PaymentStatus::Pending
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_payment_by_transaction_hash(
        &self,
        hash: H256,
    ) -> Result<Option<PaymentRecord>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.transaction_hash == Some(hash))
            .cloned())
    }

    async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        transaction_hash: Option<H256>,
    ) -> Result<PaymentRecord, PaymentError> {
        let mut state = self.state.write().await;
        let index = state.position(id)?;
        let current = &state.payments[index];

        if current.status.is_terminal() {
            return Ok(current.clone());
        }
        if let Some(hash) = transaction_hash {
            if let Some(existing) = current.transaction_hash.filter(|h| *h != hash) {
                return Err(PaymentError::HashConflict {
                    existing: format!("{:?}", existing),
                });
            }
            state.ensure_unused(id, hash)?;
        }
        let current = &state.payments[index];
        if !current.status.can_transition_to(status) {
            return Err(PaymentError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let record = &mut state.payments[index];
        record.status = status;
        if transaction_hash.is_some() {
            record.transaction_hash = transaction_hash;
        }
        record.updated_at = Utc::now();

        Ok(record.clone())
    }

    async fn replace_transaction_hash(
        &self,
        id: Uuid,
        expected: H256,
        replacement: H256,
    ) -> Result<PaymentRecord, PaymentError> {
        let mut state = self.state.write().await;
        let index = state.position(id)?;
        let current = &state.payments[index];

        if current.status.is_terminal() {
            return Ok(current.clone());
        }
        if current.transaction_hash != Some(expected) {
            return Err(PaymentError::HashConflict {
                existing: current
                    .transaction_hash
                    .map(|h| format!("{:?}", h))
                    .unwrap_or_else(|| "none".to_string()),
            });
        }
        state.ensure_unused(id, replacement)?;

        let record = &mut state.payments[index];
        record.transaction_hash = Some(replacement);
        record.updated_at = Utc::now();

        Ok(record.clone())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, PaymentError> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_wallet_address(&self, address: Address) -> Result<Option<User>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.wallet_address == address)
            .cloned())
    }

    async fn find_invoice(&self, user_id: Uuid, invoice_id: &str) -> Result<Option<Invoice>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .invoices
            .get(invoice_id)
            .filter(|inv| inv.user_id == user_id)
            .cloned())
    }

    async fn list_payments_for_user(&self, user_id: Uuid) -> Result<Vec<PaymentRecord>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_payments_for_invoice(
        &self,
        user_id: Uuid,
        invoice_id: &str,
    ) -> Result<Vec<PaymentRecord>, PaymentError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id && p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }
}

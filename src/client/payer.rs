use crate::config::TokenContracts;
use crate::contracts::IERC20;
use crate::models::Token;
use anyhow::{Context, Result};
use ethers::{
    prelude::*,
    providers::{Http, Provider},
    types::{Address, TransactionRequest, U256},
    utils::{format_units, parse_units},
};
use std::sync::Arc;

/// Wallet-side sender used by the payer agent.
pub struct PayerClient {
    provider: Arc<SignerMiddleware<Provider<Http>, LocalWallet>>,
    tokens: TokenContracts,
}

impl PayerClient {
    pub async fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        tokens: TokenContracts,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;

        let wallet = private_key
            .parse::<LocalWallet>()?
            .with_chain_id(chain_id);

        let provider = Arc::new(SignerMiddleware::new(provider, wallet));

        Ok(Self { provider, tokens })
    }

    pub fn address(&self) -> Address {
        self.provider.address()
    }

    /// Balance in smallest units.
    pub async fn balance(&self, token: Token) -> Result<U256> {
        if token.is_native() {
            return Ok(self.provider.get_balance(self.address(), None).await?);
        }
        let contract = self.contract(token)?;
        Ok(contract.balance_of(self.address()).call().await?)
    }

    /// Sends `amount` (human units) of `token` to `recipient` and waits for
    /// the receipt.
    pub async fn pay(&self, token: Token, amount: &str, recipient: Address) -> Result<H256> {
        let value: U256 = parse_units(amount.trim(), token.decimals())
            .with_context(|| format!("Invalid {} amount: {}", token, amount))?
            .into();

        let balance = self.balance(token).await?;
        if balance < value {
            anyhow::bail!(
                "Insufficient {} balance: {} < {}",
                token,
                format_units(balance, token.decimals())?,
                amount
            );
        }

        tracing::info!("Sending {} {} to {:?}", amount, token, recipient);

        let pending = if token.is_native() {
            let tx = TransactionRequest::new().to(recipient).value(value);
            self.provider
                .send_transaction(tx, None)
                .await
                .context("Failed to send native transfer")?
        } else {
            let contract = self.contract(token)?;
            let call = contract.transfer(recipient, value);
            let tx_hash = *call.send().await.context("Failed to send token transfer")?;
            // `send` borrows the call; wait on the long-lived provider instead
            PendingTransaction::new(tx_hash, self.provider.provider())
        };

        tracing::info!("Transaction sent, waiting for confirmation...");

        let receipt = pending
            .await
            .context("Failed to get transaction receipt")?
            .ok_or_else(|| anyhow::anyhow!("Transaction dropped"))?;

        if receipt.status != Some(1.into()) {
            anyhow::bail!("Transaction failed onchain");
        }

        tracing::info!("Transfer mined: {:?}", receipt.transaction_hash);

        Ok(receipt.transaction_hash)
    }

    fn contract(&self, token: Token) -> Result<IERC20<SignerMiddleware<Provider<Http>, LocalWallet>>> {
        let address = self
            .tokens
            .address_of(token)
            .with_context(|| format!("No contract address configured for {}", token))?;
        Ok(IERC20::new(address, self.provider.clone()))
    }
}

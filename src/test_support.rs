//! In-crate fakes shared by unit tests.

use crate::contracts::{payment_received_topic, transfer_topic};
use crate::error::ChainError;
use crate::services::ChainReader;
use async_trait::async_trait;
use ethers::types::{
    Address, Block, Bytes, Filter, Log, Transaction, TransactionReceipt, ValueOrArray, H256,
    U256, U64,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    chain_id: u64,
    head: u64,
    blocks: HashMap<u64, Block<Transaction>>,
    logs: Vec<Log>,
    transactions: HashMap<H256, Transaction>,
    receipts: HashMap<H256, TransactionReceipt>,
    failing_blocks: HashSet<u64>,
    fail_all: bool,
}

#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new() -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().chain_id = 84532;
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn add_block(&self, number: u64, transactions: Vec<Transaction>) {
        let block = Block {
            number: Some(U64::from(number)),
            transactions,
            ..Default::default()
        };
        let mut state = self.state.lock().unwrap();
        state.blocks.insert(number, block);
        state.head = state.head.max(number);
    }

    pub fn add_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn add_transaction(&self, tx: Transaction, receipt: TransactionReceipt) {
        let mut state = self.state.lock().unwrap();
        state.transactions.insert(tx.hash, tx);
        state.receipts.insert(receipt.transaction_hash, receipt);
    }

    pub fn fail_block(&self, number: u64) {
        self.state.lock().unwrap().failing_blocks.insert(number);
    }

    pub fn fail_all(&self, fail: bool) {
        self.state.lock().unwrap().fail_all = fail;
    }

    fn check(&self) -> Result<(), ChainError> {
        if self.state.lock().unwrap().fail_all {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        Ok(())
    }
}

fn filter_matches(filter: &Filter, log: &Log) -> bool {
    if let Some(ValueOrArray::Value(address)) = &filter.address {
        if *address != log.address {
            return false;
        }
    }
    if let Some(ValueOrArray::Value(Some(topic))) = &filter.topics[0] {
        if log.topics.first() != Some(topic) {
            return false;
        }
    }
    let block = log.block_number.map(|n| n.as_u64()).unwrap_or(0);
    let from = filter.get_from_block().map(|n| n.as_u64()).unwrap_or(0);
    let to = filter.get_to_block().map(|n| n.as_u64()).unwrap_or(u64::MAX);
    (from..=to).contains(&block)
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.check()?;
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        self.check()?;
        Ok(self.state.lock().unwrap().head)
    }

    async fn block_with_transactions(
        &self,
        number: u64,
    ) -> Result<Option<Block<Transaction>>, ChainError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        if state.failing_blocks.contains(&number) {
            return Err(ChainError::Timeout("eth_getBlockByNumber", std::time::Duration::from_secs(5)));
        }
        Ok(state.blocks.get(&number).cloned())
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|log| filter_matches(filter, log))
            .cloned()
            .collect())
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>, ChainError> {
        self.check()?;
        Ok(self.state.lock().unwrap().transactions.get(&hash).cloned())
    }

    async fn receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        self.check()?;
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }
}

pub fn transfer_log(
    contract: Address,
    from: Address,
    to: Address,
    value: U256,
    tx_hash: H256,
    block: u64,
) -> Log {
    let mut data = [0u8; 32];
    value.to_big_endian(&mut data);
    Log {
        address: contract,
        topics: vec![transfer_topic(), H256::from(from), H256::from(to)],
        data: Bytes::from(data.to_vec()),
        transaction_hash: Some(tx_hash),
        block_number: Some(U64::from(block)),
        ..Default::default()
    }
}

pub fn router_log(
    router: Address,
    payer: Address,
    token: Address,
    merchant: Address,
    amount: U256,
    tx_hash: H256,
    block: u64,
) -> Log {
    let mut data = vec![0u8; 64];
    data[12..32].copy_from_slice(merchant.as_bytes());
    amount.to_big_endian(&mut data[32..64]);
    Log {
        address: router,
        topics: vec![
            payment_received_topic(),
            H256::repeat_byte(0x42),
            H256::from(payer),
            H256::from(token),
        ],
        data: Bytes::from(data),
        transaction_hash: Some(tx_hash),
        block_number: Some(U64::from(block)),
        ..Default::default()
    }
}

pub fn receipt(tx_hash: H256, success: bool, logs: Vec<Log>) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: tx_hash,
        status: Some(U64::from(if success { 1u64 } else { 0u64 })),
        logs,
        ..Default::default()
    }
}

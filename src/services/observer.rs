use crate::config::{ChainConfig, TokenContracts};
use crate::contracts::{payment_received_topic, transfer_topic};
use crate::error::ChainError;
use crate::models::{ChainEvent, Token};
use crate::services::{decode, ChainReader, Reconciler};
use ethers::types::{Address, Filter, Log};
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub chain_id: u64,
    pub tokens: TokenContracts,
    pub router: Option<Address>,
    pub scan_blocks: bool,
    pub poll_interval: Duration,
    pub confirmations: u64,
    pub max_blocks_per_poll: u64,
}

impl ObserverConfig {
    /// `None` when the chain id is missing; the observer then stays off.
    pub fn from_chain(chain: &ChainConfig) -> Option<Self> {
        Some(Self {
            chain_id: chain.chain_id?,
            tokens: chain.tokens.clone(),
            router: chain.router_address,
            scan_blocks: chain.scan_blocks,
            poll_interval: chain.poll_interval,
            confirmations: chain.confirmations,
            max_blocks_per_poll: chain.max_blocks_per_poll.max(1),
        })
    }
}

/// One independently polled stream of candidate payment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Blocks,
    TokenTransfers { token: Token, contract: Address },
    RouterPayments { contract: Address },
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Blocks => write!(f, "blocks"),
            Source::TokenTransfers { token, .. } => write!(f, "{}-transfers", token),
            Source::RouterPayments { .. } => write!(f, "router-payments"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub events: usize,
    pub matched: usize,
    pub skipped: usize,
}

/// Watches the chain for payment-carrying activity and hands every decoded
/// event to the reconciler.
pub struct ChainObserver {
    chain: Arc<dyn ChainReader>,
    reconciler: Arc<Reconciler>,
    config: ObserverConfig,
}

impl ChainObserver {
    pub fn new(chain: Arc<dyn ChainReader>, reconciler: Arc<Reconciler>, config: ObserverConfig) -> Self {
        Self {
            chain,
            reconciler,
            config,
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut sources = Vec::new();
        if self.config.scan_blocks {
            sources.push(Source::Blocks);
        }
        for (token, contract) in self.config.tokens.configured() {
            sources.push(Source::TokenTransfers { token, contract });
        }
        if let Some(contract) = self.config.router {
            sources.push(Source::RouterPayments { contract });
        }
        sources
    }

    /// Starts one subscription per configured source. Returns `None` if the
    /// endpoint reports a different chain than configured.
    pub async fn start(self: Arc<Self>) -> Option<ObserverHandle> {
        match self.chain.chain_id().await {
            Ok(id) if id != self.config.chain_id => {
                tracing::warn!(
                    expected = self.config.chain_id,
                    actual = id,
                    "Chain observer disabled: RPC endpoint serves a different chain"
                );
                return None;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Could not confirm chain id, continuing"),
        }

        let active = Arc::new(AtomicUsize::new(0));
        let subscriptions: Vec<_> = self
            .sources()
            .into_iter()
            .map(|source| self.subscribe(source, active.clone()))
            .collect();

        tracing::info!(
            chain_id = self.config.chain_id,
            subscriptions = subscriptions.len(),
            "Chain observer started"
        );

        Some(ObserverHandle {
            subscriptions,
            active,
        })
    }

    fn subscribe(self: &Arc<Self>, source: Source, active: Arc<AtomicUsize>) -> Subscription {
        let (stop_tx, stop_rx) = watch::channel(false);
        let observer = self.clone();
        let task = tokio::spawn(async move { observer.run(source, stop_rx).await });
        active.fetch_add(1, Ordering::SeqCst);

        Subscription {
            source,
            stop: stop_tx,
            task: Some(task),
            active,
        }
    }

    async fn run(&self, source: Source, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_block: Option<u64> = None;

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
            }

            let head = match self.chain.block_number().await {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(%source, error = %e, "Failed to read chain head");
                    continue;
                }
            };
            let safe_head = head.saturating_sub(self.config.confirmations);

            // First successful poll: start at the head, no historical backfill.
            let from = *next_block.get_or_insert(safe_head + 1);
            if safe_head < from {
                continue;
            }
            let to = safe_head.min(from + self.config.max_blocks_per_poll - 1);

            match self.scan(source, from, to).await {
                Ok(stats) => {
                    tracing::debug!(
                        %source,
                        from_block = from,
                        to_block = to,
                        events = stats.events,
                        matched = stats.matched,
                        skipped = stats.skipped,
                        "Scanned block range"
                    );
                    next_block = Some(to + 1);
                }
                Err(e) => {
                    tracing::warn!(%source, from_block = from, to_block = to, error = %e, "Scan failed, will retry");
                }
            }
        }

        tracing::debug!(%source, "Subscription stopped");
    }

    /// One scanning pass over `[from, to]`. Only a failure to fetch the range
    /// itself is an error; individual blocks, transactions and logs that fail
    /// are logged and skipped.
    pub async fn scan(&self, source: Source, from: u64, to: u64) -> Result<ScanStats, ChainError> {
        match source {
            Source::Blocks => Ok(self.scan_blocks(from, to).await),
            Source::TokenTransfers { token, contract } => {
                let filter = Filter::new()
                    .address(contract)
                    .topic0(transfer_topic())
                    .from_block(from)
                    .to_block(to);
                let logs = self.chain.logs(&filter).await?;
                Ok(self
                    .scan_logs(source, &logs, |log| decode::token_transfer(log, token).map(Some))
                    .await)
            }
            Source::RouterPayments { contract } => {
                let filter = Filter::new()
                    .address(contract)
                    .topic0(payment_received_topic())
                    .from_block(from)
                    .to_block(to);
                let logs = self.chain.logs(&filter).await?;
                let tokens = &self.config.tokens;
                Ok(self
                    .scan_logs(source, &logs, |log| decode::router_payment(log, tokens))
                    .await)
            }
        }
    }

    async fn scan_blocks(&self, from: u64, to: u64) -> ScanStats {
        let mut stats = ScanStats::default();

        for number in from..=to {
            let block = match self.chain.block_with_transactions(number).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    tracing::warn!(block = number, "Block not found");
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(block = number, error = %e, "Block scan error");
                    stats.skipped += 1;
                    continue;
                }
            };

            for tx in &block.transactions {
                if let Some(event) = decode::native_transfer(tx, number) {
                    self.dispatch(&event, &mut stats).await;
                }
            }
        }

        stats
    }

    async fn scan_logs<F>(&self, source: Source, logs: &[Log], decode: F) -> ScanStats
    where
        F: Fn(&Log) -> Result<Option<ChainEvent>, ChainError>,
    {
        let mut stats = ScanStats::default();

        for log in logs {
            match decode(log) {
                Ok(Some(event)) => self.dispatch(&event, &mut stats).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        %source,
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Log parse error"
                    );
                    stats.skipped += 1;
                }
            }
        }

        stats
    }

    async fn dispatch(&self, event: &ChainEvent, stats: &mut ScanStats) {
        stats.events += 1;
        match self.reconciler.handle_event(event).await {
            Ok(Some(_)) => stats.matched += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    kind = event.kind(),
                    tx_hash = ?event.transfer().tx_hash,
                    error = %e,
                    "Failed to reconcile event"
                );
                stats.skipped += 1;
            }
        }
    }
}

/// A running subscription. Dropping it aborts the task; `unsubscribe` stops
/// it cleanly and waits for it.
pub struct Subscription {
    source: Source,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn source(&self) -> Source {
        self.source
    }

    pub async fn unsubscribe(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(source = %self.source, error = %e, "Subscription task ended abnormally");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns every subscription started by [`ChainObserver::start`].
pub struct ObserverHandle {
    subscriptions: Vec<Subscription>,
    active: Arc<AtomicUsize>,
}

impl ObserverHandle {
    pub fn sources(&self) -> Vec<Source> {
        self.subscriptions.iter().map(Subscription::source).collect()
    }

    /// Live subscription count, readable after the handle has moved.
    pub fn active_counter(&self) -> Arc<AtomicUsize> {
        self.active.clone()
    }

    pub async fn shutdown(self) {
        let count = self.subscriptions.len();
        join_all(self.subscriptions.into_iter().map(Subscription::unsubscribe)).await;
        tracing::info!(subscriptions = count, "Chain observer stopped");
    }
}

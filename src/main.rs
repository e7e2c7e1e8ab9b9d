use anyhow::Result;
use invoice_pay::{
    config::Config,
    handlers::HealthState,
    routes::{router, AppState},
    services::*,
};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting invoice-pay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    let store = Arc::new(match &config.store_fixtures {
        Some(path) => {
            tracing::info!("Seeding store from {}", path.display());
            MemoryStore::from_fixtures(path).await?
        }
        None => MemoryStore::new(),
    });

    let cache = Arc::new(CacheService::new(config.redis_url.as_deref(), config.rates.ttl).await?);

    let chain = match &config.chain {
        Some(chain_config) => match connect(
            &chain_config.rpc_url,
            chain_config.rpc_fallback.as_deref(),
            chain_config.rpc_timeout,
        )
        .await
        {
            Ok(chain) => Some(chain),
            Err(e) => {
                tracing::warn!("EVM RPC unavailable ({:#}); on-chain matching disabled", e);
                None
            }
        },
        None => {
            tracing::warn!("EVM_RPC_URL not set; on-chain matching and verification disabled");
            None
        }
    };

    let rule = MatchRule::new(&config.matching);

    let verifier = match (&chain, &config.chain) {
        (Some(chain), Some(chain_config)) => Some(Arc::new(PaymentVerifier::new(
            chain.clone(),
            rule.clone(),
            chain_config.tokens.clone(),
            chain_config.router_address,
        ))),
        _ => None,
    };

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        rule,
        config.matching.pending_lookback,
    ));

    let observer = match (&chain, &config.chain) {
        (Some(chain), Some(chain_config)) => match ObserverConfig::from_chain(chain_config) {
            Some(observer_config) => {
                Arc::new(ChainObserver::new(chain.clone(), reconciler.clone(), observer_config))
                    .start()
                    .await
            }
            None => {
                tracing::warn!("EVM_CHAIN_ID not set; chain observer disabled");
                None
            }
        },
        _ => None,
    };

    let observer_subscriptions = observer
        .as_ref()
        .map(ObserverHandle::active_counter)
        .unwrap_or_else(|| Arc::new(AtomicUsize::new(0)));

    let rates = Arc::new(RatesService::new(cache.clone(), config.rates.clone())?);
    let payments = Arc::new(PaymentService::new(store.clone(), verifier, config.matching.clone()));

    let app = router(AppState {
        payments,
        rates,
        health: HealthState {
            cache,
            chain,
            observer_subscriptions,
            started_at: Instant::now(),
        },
    });

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(observer) = observer {
        observer.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl+c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}

use crate::config::RatesConfig;
use crate::models::{RatesResponse, Token};
use crate::services::CacheService;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

const CACHE_KEY: &str = "rates:usd";

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

fn coingecko_id(token: Token) -> &'static str {
    match token {
        Token::Eth => "ethereum",
        Token::Usdc => "usd-coin",
        Token::Usdt => "tether",
    }
}

/// Advisory USD prices for display. Never consulted by matching.
pub struct RatesService {
    client: reqwest::Client,
    cache: Arc<CacheService>,
    config: RatesConfig,
    last_known: RwLock<BTreeMap<Token, f64>>,
}

impl RatesService {
    pub fn new(cache: Arc<CacheService>, config: RatesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client for rates")?;

        Ok(Self {
            client,
            cache,
            config,
            last_known: RwLock::new(BTreeMap::new()),
        })
    }

    pub async fn get_rates(&self) -> RatesResponse {
        if let Some(cached) = self.cache.get::<RatesResponse>(CACHE_KEY).await {
            return cached;
        }

        match self.fetch().await {
            Ok(rates) => {
                *self.last_known.write().await = rates.clone();
                let response = RatesResponse {
                    rates,
                    source: "coingecko".to_string(),
                    timestamp: Utc::now(),
                };
                if let Err(e) = self.cache.set(CACHE_KEY, &response).await {
                    tracing::warn!("Failed to cache rates: {}", e);
                }
                response
            }
            Err(e) => {
                tracing::warn!(error = %e, "Price source unreachable, serving fallback rates");
                self.fallback().await
            }
        }
    }

    async fn fetch(&self) -> Result<BTreeMap<Token, f64>> {
        let ids = Token::ALL
            .iter()
            .map(|t| coingecko_id(*t))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/simple/price", self.config.api_url.trim_end_matches('/'));

        let quotes: HashMap<String, UsdQuote> = self
            .client
            .get(&url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .send()
            .await
            .context("Price request failed")?
            .error_for_status()
            .context("Price source returned an error status")?
            .json()
            .await
            .context("Malformed price response")?;

        let mut rates = BTreeMap::new();
        for token in Token::ALL {
            match quotes.get(coingecko_id(token)) {
                Some(quote) => {
                    rates.insert(token, quote.usd);
                }
                None if token.is_stablecoin() => {
                    rates.insert(token, 1.0);
                }
                None => anyhow::bail!("price source omitted {}", token),
            }
        }

        tracing::debug!(?rates, "Fetched rates");
        Ok(rates)
    }

    /// Stablecoins pegged at 1, everything else at its last known price or 0.
    async fn fallback(&self) -> RatesResponse {
        let last_known = self.last_known.read().await;
        let rates = Token::ALL
            .iter()
            .map(|&token| {
                let price = if token.is_stablecoin() {
                    1.0
                } else {
                    last_known.get(&token).copied().unwrap_or(0.0)
                };
                (token, price)
            })
            .collect();

        RatesResponse {
            rates,
            source: "fallback".to_string(),
            timestamp: Utc::now(),
        }
    }
}

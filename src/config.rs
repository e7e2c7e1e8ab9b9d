use crate::models::Token;
use anyhow::{bail, Context, Result};
use ethers::types::Address;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,

    // Redis (rates cache mirror)
    pub redis_url: Option<String>,

    // EVM chain; None disables the observer and on-chain verification
    pub chain: Option<ChainConfig>,

    // Matching rule shared by the reconciler and the verifier
    pub matching: MatchConfig,

    pub rates: RatesConfig,

    pub store_fixtures: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub rpc_fallback: Option<String>,
    /// Required by the observer; verification works without it.
    pub chain_id: Option<u64>,
    pub tokens: TokenContracts,
    pub router_address: Option<Address>,
    pub scan_blocks: bool,
    pub poll_interval: Duration,
    pub confirmations: u64,
    pub max_blocks_per_poll: u64,
    pub rpc_timeout: Duration,
}

/// ERC-20 contract addresses for the tokens this deployment accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenContracts {
    pub usdc: Option<Address>,
    pub usdt: Option<Address>,
}

impl TokenContracts {
    pub fn address_of(&self, token: Token) -> Option<Address> {
        match token {
            Token::Eth => None,
            Token::Usdc => self.usdc,
            Token::Usdt => self.usdt,
        }
    }

    pub fn token_at(&self, contract: Address) -> Option<Token> {
        [Token::Usdc, Token::Usdt]
            .into_iter()
            .find(|token| self.address_of(*token) == Some(contract))
    }

    pub fn configured(&self) -> Vec<(Token, Address)> {
        [Token::Usdc, Token::Usdt]
            .into_iter()
            .filter_map(|token| self.address_of(token).map(|addr| (token, addr)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub default_merchant: Option<Address>,
    /// Absolute tolerance in human units.
    pub tolerance: f64,
    pub pending_lookback: usize,
    pub trust_client_status: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            default_merchant: None,
            tolerance: 1e-6,
            pending_lookback: 5,
            trust_client_status: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RatesConfig {
    pub api_url: String,
    pub ttl: Duration,
    pub timeout: Duration,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.coingecko.com/api/v3".to_string(),
            ttl: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Self::parse_environment()?;

        let config = Self {
            environment,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_or("PORT", 8080)?,

            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),

            chain: Self::parse_chain()?,

            matching: MatchConfig {
                default_merchant: Self::parse_optional_address("EVM_MERCHANT_ADDRESS")?,
                tolerance: Self::parse_or("MATCH_TOLERANCE", 1e-6)?,
                pending_lookback: Self::parse_or("MATCH_PENDING_LOOKBACK", 5)?,
                trust_client_status: Self::parse_or("TRUST_CLIENT_STATUS", false)?,
            },

            rates: RatesConfig {
                api_url: std::env::var("RATES_API_URL")
                    .unwrap_or_else(|_| RatesConfig::default().api_url),
                ttl: Duration::from_secs(Self::parse_or("RATES_TTL_SECS", 60)?),
                timeout: RatesConfig::default().timeout,
            },

            store_fixtures: std::env::var("STORE_FIXTURES").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_chain() -> Result<Option<ChainConfig>> {
        let Some(rpc_url) = std::env::var("EVM_RPC_URL").ok().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let chain_id = match std::env::var("EVM_CHAIN_ID") {
            Ok(raw) if !raw.is_empty() => {
                Some(raw.parse().context("Invalid EVM_CHAIN_ID")?)
            }
            _ => None,
        };

        Ok(Some(ChainConfig {
            rpc_url,
            rpc_fallback: std::env::var("EVM_RPC_FALLBACK").ok().filter(|s| !s.is_empty()),
            chain_id,
            tokens: TokenContracts {
                usdc: Self::parse_optional_address("EVM_USDC_ADDRESS")?,
                usdt: Self::parse_optional_address("EVM_USDT_ADDRESS")?,
            },
            router_address: Self::parse_optional_address("EVM_ROUTER_ADDRESS")?,
            scan_blocks: Self::parse_or("EVM_SCAN_BLOCKS", true)?,
            poll_interval: Duration::from_millis(Self::parse_or("EVM_POLL_INTERVAL_MS", 4000)?),
            confirmations: Self::parse_or("EVM_CONFIRMATIONS", 0)?,
            max_blocks_per_poll: Self::parse_or("EVM_MAX_BLOCKS_PER_POLL", 50)?,
            rpc_timeout: Duration::from_secs(Self::parse_or("EVM_RPC_TIMEOUT_SECS", 5)?),
        }))
    }

    fn parse_environment() -> Result<Environment> {
        let env = std::env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string());

        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_or<T>(var: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match std::env::var(var) {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}", var)),
            _ => Ok(default),
        }
    }

    fn parse_optional_address(var: &str) -> Result<Option<Address>> {
        match std::env::var(var) {
            Ok(raw) if !raw.trim().is_empty() => parse_address(&raw)
                .map(Some)
                .with_context(|| format!("Invalid address for {}", var)),
            _ => Ok(None),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(chain) = &self.chain {
            let url = chain.rpc_url.as_str();
            if !(url.starts_with("http") || url.starts_with("ws")) {
                bail!("EVM_RPC_URL must be an HTTP(S) or WS(S) URL");
            }
            if chain.poll_interval.is_zero() {
                bail!("EVM_POLL_INTERVAL_MS must be positive");
            }
        }

        if !self.matching.tolerance.is_finite() || self.matching.tolerance < 0.0 {
            bail!("MATCH_TOLERANCE must be a non-negative number");
        }
        if self.matching.pending_lookback == 0 {
            bail!("MATCH_PENDING_LOOKBACK must be at least 1");
        }
        if !self.rates.api_url.starts_with("http") {
            bail!("RATES_API_URL must be HTTP(S) URL");
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}

/// Parses a 0x-prefixed (or bare) hex address.
pub fn parse_address(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 40 {
        bail!("expected 20-byte hex address, got {:?}", trimmed);
    }
    Address::from_str(hex_part).with_context(|| format!("Invalid address: {}", trimmed))
}

use anyhow::{Context, Result};
use invoice_pay::{
    client::PayerClient,
    config::{parse_address, TokenContracts},
    middleware::USER_HEADER,
    models::{
        ConfirmPaymentRequest, ConfirmPaymentResponse, InitiatePaymentRequest,
        InitiatePaymentResponse, PaymentStatus, PaymentStatusResponse, Token,
    },
};
use reqwest::Client;
use std::time::Duration;

fn env_address(key: &str) -> Result<Option<ethers::types::Address>> {
    match std::env::var(key).ok().filter(|s| !s.is_empty()) {
        Some(raw) => Ok(Some(parse_address(&raw).with_context(|| format!("Invalid {}", key))?)),
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    let base_url = std::env::var("INVOICE_PAY_URL")
        .unwrap_or_else(|_| "http://localhost:8080".to_string());
    let user_id = std::env::var("PAYER_USER_ID").context("PAYER_USER_ID is required")?;
    let private_key = std::env::var("PAYER_PRIVATE_KEY").context("PAYER_PRIVATE_KEY is required")?;
    let invoice_id = std::env::var("PAYER_INVOICE_ID").context("PAYER_INVOICE_ID is required")?;
    let amount = std::env::var("PAYER_AMOUNT").unwrap_or_else(|_| "0.01".to_string());
    let token: Token = serde_json::from_value(serde_json::Value::String(
        std::env::var("PAYER_TOKEN").unwrap_or_else(|_| "USDC".to_string()).to_uppercase(),
    ))
    .context("PAYER_TOKEN must be one of ETH, USDC, USDT")?;
    let rpc_url = std::env::var("EVM_RPC_URL").context("EVM_RPC_URL is required")?;
    let chain_id: u64 = std::env::var("EVM_CHAIN_ID")
        .unwrap_or_else(|_| "84532".to_string())
        .parse()
        .context("EVM_CHAIN_ID must be numeric")?;
    let merchant = env_address("EVM_MERCHANT_ADDRESS")?
        .context("EVM_MERCHANT_ADDRESS is required")?;
    let tokens = TokenContracts {
        usdc: env_address("EVM_USDC_ADDRESS")?,
        usdt: env_address("EVM_USDT_ADDRESS")?,
    };

    println!("Invoice Payer Agent");
    println!("===================");
    println!("Server: {}", base_url);
    println!("Paying {} {} to {:?} for invoice {}", amount, token, merchant, invoice_id);
    println!();

    let payer = PayerClient::new(&rpc_url, &private_key, chain_id, tokens).await?;
    println!("Wallet: {:?}", payer.address());

    let http = Client::new();

    println!("Step 1: Initiating payment...");
    let initiated: InitiatePaymentResponse = http
        .post(format!("{}/payments/initiate", base_url))
        .header(USER_HEADER, &user_id)
        .json(&InitiatePaymentRequest {
            invoice_id,
            token,
            amount: amount.clone(),
            merchant_address: Some(format!("{:?}", merchant)),
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    println!("   [OK] Payment {} is {}", initiated.payment_id, initiated.status);

    println!("Step 2: Sending on-chain transfer...");
    let tx_hash = payer.pay(token, &amount, merchant).await?;
    println!("   [OK] Transfer mined: {:?}", tx_hash);

    println!("Step 3: Confirming with on-chain verification...");
    let confirmed: ConfirmPaymentResponse = http
        .post(format!("{}/payments/{}/confirm", base_url, initiated.payment_id))
        .header(USER_HEADER, &user_id)
        .json(&ConfirmPaymentRequest {
            transaction_hash: format!("{:?}", tx_hash),
            status: None,
            verify: Some(true),
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    println!(
        "   [OK] status={} verified={}{}",
        confirmed.status,
        confirmed.verified,
        confirmed
            .verification_error
            .map(|e| format!(" ({})", e))
            .unwrap_or_default()
    );

    println!("Step 4: Polling status...");
    let mut status = confirmed.status;
    for _ in 0..30 {
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(4)).await;
        let polled: PaymentStatusResponse = http
            .get(format!("{}/payments/{}/status", base_url, initiated.payment_id))
            .header(USER_HEADER, &user_id)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        status = polled.status;
        println!("   status={}", status);
    }

    match status {
        PaymentStatus::Completed => println!("[SUCCESS] Payment completed"),
        PaymentStatus::Failed => println!("[FAILED] Payment failed verification"),
        other => println!("[PENDING] Gave up polling while payment is {}", other),
    }

    Ok(())
}

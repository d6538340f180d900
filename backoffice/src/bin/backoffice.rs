//! Back-office command line tools

use anyhow::Context;
use backoffice::audit::{read_log, verify_chain};
use backoffice::Config;
use clap::{Args, Parser, Subcommand};
use records_core::{validate_payment, validate_withdrawal, CryptoType, ValidationErrors, WalletType};
use rust_decimal::Decimal;
use serde::Serialize;
use settlement::{
    HttpRateProvider, RateProvider, SettlementEngine, SettlementRequest, StaticRateProvider,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "backoffice")]
#[command(about = "Validate payment/withdrawal records and price withdrawals")]
struct Cli {
    /// TOML configuration file (environment variables are used when absent).
    #[arg(long, env = "BACKOFFICE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a payment JSON document
    ValidatePayment {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Validate a withdrawal JSON document
    ValidateWithdrawal {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Compute fees and the quantity to send
    Quote(QuoteArgs),
    /// Check the hash chain of an audit log
    VerifyAudit {
        /// JSON-lines audit file (defaults to the configured log path)
        file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct QuoteArgs {
    /// Withdrawal amount in BRL
    #[arg(long)]
    amount: Decimal,
    /// Destination network (OnChainAddress, TronAddress, PixKey, ...)
    #[arg(long)]
    wallet_type: String,
    /// BRL per BTC; the live feed is used unless both rates are given
    #[arg(long)]
    btc_brl: Option<Decimal>,
    /// BRL per USDT
    #[arg(long)]
    usdt_brl: Option<Decimal>,
    /// Destination currency for fiat rails
    #[arg(long, value_parser = parse_crypto_type)]
    crypto_type: Option<CryptoType>,
    /// Quoted destination value (implies the EUR/USD rate)
    #[arg(long)]
    crypto_value: Option<Decimal>,
    /// Platform's retained share of the fee
    #[arg(long)]
    platform_total: Option<Decimal>,
    /// Coupon flag (does not change the fee)
    #[arg(long)]
    coupon: bool,
}

fn parse_crypto_type(raw: &str) -> Result<CryptoType, String> {
    CryptoType::parse(raw).ok_or_else(|| format!("unsupported crypto type: {raw}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    init_tracing(&config);

    match cli.command {
        Command::ValidatePayment { file } => {
            let raw = read_json(&file)?;
            report(validate_payment(&raw))
        }
        Command::ValidateWithdrawal { file } => {
            let raw = read_json(&file)?;
            report(validate_withdrawal(&raw))
        }
        Command::Quote(args) => quote(&config, args).await,
        Command::VerifyAudit { file } => {
            let path = file
                .or_else(|| config.audit.log_path.clone())
                .context("no audit log given and BACKOFFICE_AUDIT_LOG is unset")?;
            verify_audit(&path)
        }
    }
}

fn init_tracing(config: &Config) {
    let level = config
        .logging
        .level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report<T: Serialize>(result: Result<T, ValidationErrors>) -> anyhow::Result<ExitCode> {
    match result {
        Ok(record) => {
            print_json(&record)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(errors) => {
            tracing::warn!(count = errors.len(), "Validation failed");
            print_json(&serde_json::json!({ "errors": errors }))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn quote(config: &Config, args: QuoteArgs) -> anyhow::Result<ExitCode> {
    let mut request = SettlementRequest::new(args.amount, WalletType::from(args.wallet_type.as_str()))
        .with_coupon(args.coupon);
    if let Some(crypto_type) = args.crypto_type {
        request = request.with_crypto(crypto_type, args.crypto_value);
    }
    if let Some(platform_total) = args.platform_total {
        request = request.with_platform_total(platform_total);
    }

    let fees = config.settlement.fees.clone();
    match (args.btc_brl, args.usdt_brl) {
        (Some(btc), Some(usdt)) => run_quote(fees, StaticRateProvider::new(btc, usdt), &request).await,
        _ => {
            let provider = HttpRateProvider::new(&config.settlement.rate_feed)?;
            run_quote(fees, provider, &request).await
        }
    }
}

async fn run_quote<P: RateProvider>(
    fees: settlement::FeeConfig,
    provider: P,
    request: &SettlementRequest,
) -> anyhow::Result<ExitCode> {
    let engine = SettlementEngine::new(fees, provider);
    let quote = engine.quote(request).await?;

    print_json(&serde_json::json!({
        "quote": quote,
        "rendered": quote.conversion.rendered_amount(),
        "satoshis": quote.conversion.satoshis(),
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn verify_audit(path: &Path) -> anyhow::Result<ExitCode> {
    let records = read_log(path).with_context(|| format!("reading audit log {}", path.display()))?;

    let broken_at = verify_chain(&records).err();
    if let Some(index) = broken_at {
        tracing::error!(index, "Audit chain broken");
    }

    print_json(&serde_json::json!({
        "records": records.len(),
        "intact": broken_at.is_none(),
        "brokenAt": broken_at,
    }))?;
    Ok(if broken_at.is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

//! alt-orchestrator CLI
//!
//! Provisions an address lookup table holding a batch of freshly generated
//! recipients and pays every recipient in one v0 transaction.
//!
//! Exit codes follow the failing error category (see [`exit_code`]).

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::Parser;
use solana_sdk::{
    native_token::LAMPORTS_PER_SOL,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alt_orchestrator::{
    config::Config,
    keys::{FileKeyProvider, KeyProvider},
    ledger::{LedgerClient, RpcLedgerClient},
    metrics::metrics,
    tx_pipeline::{shutdown_channel, Orchestrator, PipelineError, RunPlan, RunReport},
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// JSON-RPC endpoint (overrides rpc.url)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Fee payer keypair file (overrides wallet.keypair_path)
    #[arg(short, long)]
    keypair: Option<String>,

    /// Number of recipients to generate (overrides transfer.recipient_count)
    #[arg(short, long)]
    recipients: Option<usize>,

    /// Lamports per recipient (overrides transfer.lamports_per_recipient)
    #[arg(long)]
    lamports: Option<u64>,

    /// Reuse an address table from an earlier run
    #[arg(long, value_parser = parse_pubkey)]
    existing_table: Option<Pubkey>,

    /// Enable verbose logging and dump metrics at exit
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn parse_pubkey(s: &str) -> Result<Pubkey, String> {
    s.parse::<Pubkey>()
        .map_err(|e| format!("invalid address '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_json)?;

    info!("Starting alt-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    let payer = FileKeyProvider::from_config(&config.wallet)
        .get_or_create_signing_key()
        .context("Failed to load fee payer")?;
    info!(payer = %payer.pubkey(), rpc = %config.rpc.url, "Configuration loaded");

    let ledger = Arc::new(RpcLedgerClient::new(&config.rpc, config.submitter.skip_preflight));

    let plan = RunPlan {
        recipients: (0..config.transfer.recipient_count)
            .map(|_| Keypair::new().pubkey())
            .collect(),
        lamports_per_recipient: config.transfer.lamports_per_recipient,
        existing_table: args.existing_table,
    };

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling run");
            trigger.trigger();
        }
    });

    let mut orchestrator = Orchestrator::new(ledger.clone(), &config);
    let outcome = orchestrator.run(&payer, &plan, &shutdown).await;

    if args.verbose {
        match metrics().encode_text() {
            Ok(text) => eprintln!("{}", text),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }
    }

    match outcome {
        Ok(report) => {
            print_report(&report);
            report_balances(ledger.as_ref(), &payer.pubkey(), &plan.recipients).await;
            Ok(())
        }
        Err(err) => {
            if let Some(table) = orchestrator.table() {
                error!(table = %table.address, "Rerun with --existing-table {} to reuse the table", table.address);
            }
            error!(category = err.category(), "{}", err);
            std::process::exit(exit_code(&err));
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "alt_orchestrator=debug,info"
    } else {
        "alt_orchestrator=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults, then apply CLI overrides
fn load_config(args: &Args) -> Result<Config> {
    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::from_file_with_env(&args.config)
            .with_context(|| format!("Failed to load config from {}", args.config))?
    } else {
        warn!("Config file '{}' not found, using defaults", args.config);
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config
    };

    if let Some(url) = &args.rpc_url {
        config.rpc.url = url.clone();
    }
    if let Some(path) = &args.keypair {
        config.wallet.keypair_path = path.clone();
    }
    if let Some(count) = args.recipients {
        config.transfer.recipient_count = count;
    }
    if let Some(lamports) = args.lamports {
        config.transfer.lamports_per_recipient = lamports;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Process exit code for a failed run
fn exit_code(err: &PipelineError) -> i32 {
    match err.category() {
        "validation" => 2,
        "config" => 3,
        "transient_network" => 4,
        "ledger" => 5,
        "expired" => 6,
        "rejected" => 7,
        "not_found" => 8,
        "watch_timeout" => 9,
        "signing" => 10,
        "cancelled" => 130,
        _ => 1,
    }
}

fn print_report(report: &RunReport) {
    info!(
        run_id = %report.run_id,
        table = %report.table_address,
        entries = report.table_entries,
        signature = %report.transfer_signature,
        inline_accounts = report.inline_account_count,
        lookup_accounts = report.lookup_account_count,
        size_bytes = report.transaction_size,
        "Run finished"
    );
    println!("address table:        {}", report.table_address);
    println!("table transactions:   {}", report.table_signatures.len());
    println!("transfer signature:   {}", report.transfer_signature);
    println!("inline accounts:      {}", report.inline_account_count);
    println!("looked-up accounts:   {}", report.lookup_account_count);
    println!("transaction size:     {} bytes", report.transaction_size);
}

async fn report_balances<L: LedgerClient + ?Sized>(ledger: &L, payer: &Pubkey, recipients: &[Pubkey]) {
    match ledger.get_balance(payer).await {
        Ok(lamports) => println!(
            "payer balance:        {:.9} SOL",
            lamports as f64 / LAMPORTS_PER_SOL as f64
        ),
        Err(e) => warn!(error = %e, "Could not read payer balance"),
    }
    for recipient in recipients {
        match ledger.get_balance(recipient).await {
            Ok(lamports) => println!("  {} {:>12} lamports", recipient, lamports),
            Err(e) => warn!(recipient = %recipient, error = %e, "Could not read balance"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Signature;

    #[test]
    fn test_args_parse_overrides() {
        let table = Pubkey::new_unique();
        let args = Args::parse_from([
            "alt-orchestrator",
            "--recipients",
            "5",
            "--lamports",
            "42",
            "--existing-table",
            &table.to_string(),
            "--log-json",
        ]);
        assert_eq!(args.recipients, Some(5));
        assert_eq!(args.lamports, Some(42));
        assert_eq!(args.existing_table, Some(table));
        assert!(args.log_json);
        assert_eq!(args.config, "config.toml");
    }

    #[test]
    fn test_invalid_table_address_is_rejected() {
        let parsed = Args::try_parse_from(["alt-orchestrator", "--existing-table", "not-a-key"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(exit_code(&PipelineError::validation("x")), 2);
        assert_eq!(
            exit_code(&PipelineError::Expired {
                signature: Signature::default(),
                last_valid_block_height: 1,
            }),
            6
        );
        assert_eq!(exit_code(&PipelineError::Cancelled("waiting")), 130);
        assert_eq!(exit_code(&PipelineError::internal("x")), 1);
    }
}

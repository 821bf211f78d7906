//! credit-tx - submit and track confidential credit-scoring contract calls
//!
//! Each subcommand builds one contract call, runs it through the orchestrator
//! and prints the terminal receipt as JSON. Ciphertext arguments are hex blobs
//! produced by the external encryption client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use credit_tx::chain::{load_wallet, EthersLedger, LedgerClient};
use credit_tx::config::Settings;
use credit_tx::contract::{CreditCallBuilder, CreditContractReader, PendingCall};
use credit_tx::encryption::Ciphertext;
use credit_tx::error::CoreResult;
use credit_tx::format::{format_price, format_wei};
use credit_tx::metrics::MetricsServer;
use credit_tx::tx::{
    CallbackSink, ExecuteOptions, PostConfirmation, TerminalReceipt, TransactionOrchestrator,
    TransactionStatus,
};
use ethers::types::Address;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the account-status logger may run after a confirmed call
const POST_CONFIRMATION_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "credit-tx", version, about)]
struct Cli {
    /// Configuration file; defaults to $CREDIT_TX_CONFIG or config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Confirmations to wait for, overriding configuration
    #[arg(long, global = true)]
    confirmations: Option<u64>,

    /// Confirmation wait bound in milliseconds, overriding configuration
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CREDIT_TX_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit encrypted income, outstanding debt and payment history
    SubmitCreditData(SubmitArgs),
    /// Ask the contract to evaluate the caller's credit score
    Evaluate,
    /// Request approval for an encrypted loan amount
    RequestLoan {
        /// Encrypted loan amount (hex)
        #[arg(long)]
        amount: String,
    },
    /// Show an account's progress through the credit flow
    Status {
        /// Account to inspect; defaults to the signing wallet
        #[arg(long)]
        account: Option<String>,
    },
    /// Show contract-wide evaluation counters
    Stats,
}

#[derive(Args, Debug)]
struct SubmitArgs {
    /// Encrypted income (hex, 32-bit field)
    #[arg(long)]
    income: String,
    /// Encrypted outstanding debt (hex, 32-bit field)
    #[arg(long)]
    debt: String,
    /// Encrypted payment history rating (hex, 8-bit field)
    #[arg(long)]
    payment_history: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.json_logs);

    info!("Starting credit-tx v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    let contract = settings.ledger.contract()?;

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let wallet = load_wallet(&settings.wallet.private_key_env)?;
    let ethers_ledger = EthersLedger::connect(&settings.ledger, wallet).await?;
    let signer = ethers_ledger.signer_address();
    let ledger: Arc<dyn LedgerClient> = Arc::new(ethers_ledger);

    let builder = CreditCallBuilder::new(contract);
    let reader = CreditContractReader::new(ledger.clone(), contract);

    let options = ExecuteOptions {
        confirmations: Some(cli.confirmations.unwrap_or(settings.execution.confirmations)),
        timeout: Some(
            cli.timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| settings.execution.timeout()),
        ),
    };

    let result = match cli.command {
        Command::SubmitCreditData(args) => {
            let call = builder.submit_encrypted_credit_data(
                parse_ciphertext("income", &args.income)?,
                parse_ciphertext("debt", &args.debt)?,
                parse_ciphertext("payment-history", &args.payment_history)?,
            )?;
            execute(&ledger, contract, signer, call, options).await
        }
        Command::Evaluate => {
            let call = builder.evaluate_credit_score()?;
            execute(&ledger, contract, signer, call, options).await
        }
        Command::RequestLoan { amount } => {
            let call =
                builder.request_encrypted_loan_approval(parse_ciphertext("amount", &amount)?)?;
            execute(&ledger, contract, signer, call, options).await
        }
        Command::Status { account } => {
            let account = match account {
                Some(raw) => raw
                    .parse::<Address>()
                    .with_context(|| format!("Invalid account address: {}", raw))?,
                None => signer,
            };
            let status = reader.account_status(account).await?;
            let mut output = json!({ "status": status });
            if status.is_evaluated {
                let score = reader.encrypted_credit_score(account).await?;
                output["encrypted_credit_score"] =
                    json!(format!("0x{}", hex::encode(score.as_bytes())));
            }
            print_json(&output)
        }
        Command::Stats => {
            let stats = reader.evaluation_stats().await?;
            print_json(&json!({ "stats": stats }))
        }
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    result
}

async fn execute(
    ledger: &Arc<dyn LedgerClient>,
    contract: Address,
    signer: Address,
    call: PendingCall,
    options: ExecuteOptions,
) -> Result<()> {
    let orchestrator = TransactionOrchestrator::new(ledger.clone(), contract)
        .with_post_confirmation(Arc::new(AccountStatusLogger {
            reader: CreditContractReader::new(ledger.clone(), contract),
            account: signer,
        }));

    let sink = CallbackSink(|status: TransactionStatus| {
        info!(
            phase = status.phase.as_str(),
            tx_hash = ?status.transaction_hash,
            confirmations = ?status.confirmations,
            error = ?status.error,
            "Status update"
        );
    });

    let outcome = orchestrator.execute(call, &sink, options).await;
    orchestrator.settle(POST_CONFIRMATION_GRACE).await;

    print_json(&receipt_summary(&outcome?))
}

fn receipt_summary(receipt: &TerminalReceipt) -> serde_json::Value {
    json!({
        "transaction_hash": format!("{:?}", receipt.transaction_hash),
        "succeeded": receipt.succeeded,
        "block_number": receipt.block_number,
        "confirmations": receipt.confirmations,
        "gas_used": receipt.gas_used.map(|g| g.to_string()),
        "effective_gas_price_gwei": receipt.effective_gas_price.map(format_price),
        "fee_paid_eth": receipt.fee_paid().map(format_wei),
        "events": receipt.events,
    })
}

fn parse_ciphertext(field: &str, input: &str) -> Result<Ciphertext> {
    Ciphertext::from_hex(input).with_context(|| format!("Invalid ciphertext for {}", field))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Logs the signer's progress through the credit flow after each confirmed call
struct AccountStatusLogger {
    reader: CreditContractReader,
    account: Address,
}

#[async_trait]
impl PostConfirmation for AccountStatusLogger {
    async fn run(&self, call: PendingCall, receipt: TerminalReceipt) -> CoreResult<()> {
        for event in &receipt.events {
            if event.user() != self.account {
                warn!(event = event.name(), user = ?event.user(), "Event for another account");
            }
        }

        let status = self.reader.account_status(self.account).await?;
        info!(
            method = %call.method(),
            account = ?status.account,
            has_submitted = status.has_submitted,
            is_evaluated = status.is_evaluated,
            "Account status after confirmation"
        );
        Ok(())
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,credit_tx=debug,hyper=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

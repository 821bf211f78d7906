//! Estimate, submit and monitor a credit contract call as one invocation

use super::failure::TxFailure;
use super::gas::FeeEstimator;
use super::monitor::{TransactionMonitor, DEFAULT_CONFIRMATIONS};
use super::status::{StatusGate, StatusSink, TerminalReceipt, TransactionStatus};
use crate::chain::{LedgerClient, TxHash};
use crate::contract::PendingCall;
use crate::error::CoreResult;
use crate::format::truncate_id;

use async_trait::async_trait;
use ethers::types::Address;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

/// Confirmation wait bound when the caller does not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Per-invocation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub confirmations: Option<u64>,
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Side work to run after a confirmed outcome, detached from the result
#[async_trait]
pub trait PostConfirmation: Send + Sync {
    async fn run(&self, call: PendingCall, receipt: TerminalReceipt) -> CoreResult<()>;
}

/// Runs credit contract calls end to end
pub struct TransactionOrchestrator {
    ledger: Arc<dyn LedgerClient>,
    estimator: FeeEstimator,
    monitor: TransactionMonitor,
    post_confirmation: Option<Arc<dyn PostConfirmation>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TransactionOrchestrator {
    /// Create an orchestrator for calls on `contract`
    pub fn new(ledger: Arc<dyn LedgerClient>, contract: Address) -> Self {
        Self {
            estimator: FeeEstimator::new(ledger.clone()),
            monitor: TransactionMonitor::new(ledger.clone(), contract),
            ledger,
            post_confirmation: None,
            background: Mutex::new(Vec::new()),
        }
    }

    /// Attach a best-effort hook that runs after every confirmed call
    pub fn with_post_confirmation(mut self, hook: Arc<dyn PostConfirmation>) -> Self {
        self.post_confirmation = Some(hook);
        self
    }

    /// Estimate, submit and wait for a call
    ///
    /// `on_update` receives `pending` first, at most one `confirming` and exactly
    /// one terminal update. Failures are classified once here; a reverted receipt
    /// is returned as `Ok` with `succeeded == false`.
    #[instrument(
        skip_all,
        fields(invocation_id = %uuid::Uuid::new_v4(), method = %call.method())
    )]
    pub async fn execute(
        &self,
        call: PendingCall,
        on_update: &dyn StatusSink,
        options: ExecuteOptions,
    ) -> Result<TerminalReceipt, TxFailure> {
        let gate = StatusGate::new(on_update);
        let method = call.method().name();
        let confirmations = options.confirmations.unwrap_or(DEFAULT_CONFIRMATIONS);
        let deadline = options.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let fees = self.estimator.estimate(&call).await;
        gate.emit(TransactionStatus::pending(None)).await;

        let tx_hash = match self.ledger.submit(&call, &fees).await {
            Ok(hash) => hash,
            Err(e) => {
                let failure = TxFailure::classify(&e);
                warn!(error = %e, kind = failure.kind().as_str(), "Submission failed");
                return Err(self.fail(&gate, method, None, failure).await);
            }
        };

        info!(
            tx_hash = %truncate_id(&format!("{:?}", tx_hash)),
            gas_limit = %fees.gas_limit,
            estimated_cost = %fees.estimated_cost,
            "Transaction submitted"
        );
        crate::metrics::record_tx_submitted(method);
        let submitted_at = Instant::now();

        // Dropping the wait future on expiry abandons it; the broadcast stands
        let outcome = timeout(deadline, self.monitor.watch(tx_hash, &gate, confirmations)).await;
        crate::metrics::record_tx_latency(method, submitted_at.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(receipt)) => {
                if receipt.succeeded {
                    crate::metrics::record_tx_confirmed(method);
                    self.spawn_post_confirmation(&call, &receipt);
                } else {
                    crate::metrics::record_tx_reverted(method);
                }
                Ok(receipt)
            }
            Ok(Err(e)) => {
                let failure = TxFailure::classify(&e);
                warn!(error = %e, kind = failure.kind().as_str(), "Confirmation wait failed");
                Err(self.fail(&gate, method, Some(tx_hash), failure).await)
            }
            Err(_) => {
                error!(
                    timeout_ms = deadline.as_millis() as u64,
                    "Confirmation wait timed out, abandoning"
                );
                let failure = TxFailure::Timeout { after: deadline };
                Err(self.fail(&gate, method, Some(tx_hash), failure).await)
            }
        }
    }

    async fn fail(
        &self,
        gate: &StatusGate<'_>,
        method: &str,
        tx_hash: Option<TxHash>,
        failure: TxFailure,
    ) -> TxFailure {
        crate::metrics::record_tx_failed(method, failure.kind().as_str());
        gate.emit(TransactionStatus::failed(tx_hash, failure.to_string()))
            .await;
        failure
    }

    fn spawn_post_confirmation(&self, call: &PendingCall, receipt: &TerminalReceipt) {
        if let Some(hook) = &self.post_confirmation {
            let hook = hook.clone();
            let call = call.clone();
            let receipt = receipt.clone();
            let handle = crate::background::spawn_detached("post_confirmation", async move {
                hook.run(call, receipt).await
            });
            if let Ok(mut background) = self.background.lock() {
                background.retain(|h| !h.is_finished());
                background.push(handle);
            }
        }
    }

    /// Wait up to `within` for post-confirmation work still in flight
    ///
    /// Returns whether everything finished. Short-lived processes call this
    /// before exiting so detached work is not cut off by runtime shutdown.
    pub async fn settle(&self, within: Duration) -> bool {
        let handles = match self.background.lock() {
            Ok(mut background) => std::mem::take(&mut *background),
            Err(_) => return false,
        };
        if handles.is_empty() {
            return true;
        }

        let pending = handles.len();
        match timeout(within, futures::future::join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(pending, "Post-confirmation work still running, not waiting longer");
                false
            }
        }
    }
}

//! Transaction status updates and the sinks that receive them

use crate::chain::TxHash;
use crate::contract::{events, CreditEvent};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, TransactionReceipt, U256};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Lifecycle position of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxPhase {
    Pending,
    Confirming,
    Confirmed,
    Failed,
}

impl TxPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxPhase::Confirmed | TxPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxPhase::Pending => "pending",
            TxPhase::Confirming => "confirming",
            TxPhase::Confirmed => "confirmed",
            TxPhase::Failed => "failed",
        }
    }
}

/// One progress update delivered to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionStatus {
    pub phase: TxPhase,
    pub transaction_hash: Option<TxHash>,
    pub confirmations: Option<u64>,
    pub gas_used: Option<U256>,
    pub effective_gas_price: Option<U256>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl TransactionStatus {
    fn new(phase: TxPhase) -> Self {
        Self {
            phase,
            transaction_hash: None,
            confirmations: None,
            gas_used: None,
            effective_gas_price: None,
            block_number: None,
            error: None,
            observed_at: Utc::now(),
        }
    }

    /// `pending` with zero confirmations
    pub fn pending(transaction_hash: Option<TxHash>) -> Self {
        Self {
            transaction_hash,
            confirmations: Some(0),
            ..Self::new(TxPhase::Pending)
        }
    }

    pub fn confirming(transaction_hash: TxHash, confirmations: u64) -> Self {
        Self {
            transaction_hash: Some(transaction_hash),
            confirmations: Some(confirmations),
            ..Self::new(TxPhase::Confirming)
        }
    }

    /// Terminal update derived from a receipt
    pub fn from_receipt(receipt: &TerminalReceipt) -> Self {
        let phase = if receipt.succeeded {
            TxPhase::Confirmed
        } else {
            TxPhase::Failed
        };
        Self {
            transaction_hash: Some(receipt.transaction_hash),
            confirmations: Some(receipt.confirmations),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            block_number: receipt.block_number,
            error: (!receipt.succeeded).then(|| "Transaction reverted".to_string()),
            ..Self::new(phase)
        }
    }

    /// Terminal failure with a message
    pub fn failed(transaction_hash: Option<TxHash>, error: impl Into<String>) -> Self {
        Self {
            transaction_hash,
            error: Some(error.into()),
            ..Self::new(TxPhase::Failed)
        }
    }
}

/// Immutable record of a transaction's final outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalReceipt {
    pub transaction_hash: TxHash,
    pub succeeded: bool,
    pub gas_used: Option<U256>,
    pub effective_gas_price: Option<U256>,
    pub block_number: Option<u64>,
    pub confirmations: u64,
    pub events: Vec<CreditEvent>,
}

impl TerminalReceipt {
    /// Build from the node's receipt; credit events are decoded for `contract`
    pub fn from_receipt(
        receipt: &TransactionReceipt,
        contract: Address,
        confirmations: u64,
    ) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            succeeded: receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            confirmations,
            events: events::parse_logs(contract, &receipt.logs),
        }
    }

    /// Total fee paid in wei, when the node reported both parts
    pub fn fee_paid(&self) -> Option<U256> {
        Some(self.gas_used?.saturating_mul(self.effective_gas_price?))
    }
}

/// Receiver of status updates for one invocation
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn emit(&self, status: TransactionStatus);
}

/// Sink that calls a closure synchronously for every update
pub struct CallbackSink<F>(pub F);

#[async_trait]
impl<F> StatusSink for CallbackSink<F>
where
    F: Fn(TransactionStatus) + Send + Sync,
{
    async fn emit(&self, status: TransactionStatus) {
        (self.0)(status)
    }
}

/// Sink that forwards updates into a bounded channel, waiting for capacity
pub struct ChannelSink(mpsc::Sender<TransactionStatus>);

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransactionStatus>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self(tx), rx)
    }
}

#[async_trait]
impl StatusSink for ChannelSink {
    async fn emit(&self, status: TransactionStatus) {
        if self.0.send(status).await.is_err() {
            debug!("Status receiver dropped, update discarded");
        }
    }
}

/// Sink that discards everything
pub struct NullSink;

#[async_trait]
impl StatusSink for NullSink {
    async fn emit(&self, _status: TransactionStatus) {}
}

#[derive(Default)]
struct GateState {
    last: Option<TxPhase>,
}

/// Enforces per-invocation ordering: one `pending` first, at most one
/// `confirming`, one terminal update, nothing afterwards
pub struct StatusGate<'a> {
    inner: &'a dyn StatusSink,
    state: Mutex<GateState>,
}

impl<'a> StatusGate<'a> {
    pub fn new(inner: &'a dyn StatusSink) -> Self {
        Self {
            inner,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Whether a terminal update has already gone through
    pub async fn is_closed(&self) -> bool {
        self.state
            .lock()
            .await
            .last
            .map(|p| p.is_terminal())
            .unwrap_or(false)
    }
}

#[async_trait]
impl StatusSink for StatusGate<'_> {
    async fn emit(&self, status: TransactionStatus) {
        let mut state = self.state.lock().await;

        let accept = match (state.last, status.phase) {
            (Some(last), _) if last.is_terminal() => false,
            (None, TxPhase::Pending) => true,
            // Terminal straight away is allowed; confirming before pending is not
            (None, phase) => phase.is_terminal(),
            (Some(_), TxPhase::Pending) => false,
            (Some(TxPhase::Confirming), TxPhase::Confirming) => false,
            (Some(_), _) => true,
        };

        if !accept {
            debug!(
                phase = status.phase.as_str(),
                last = state.last.map(|p| p.as_str()),
                "Suppressing out-of-order status update"
            );
            return;
        }

        // Forward while holding the lock so concurrent emitters cannot reorder.
        // The phase only counts once delivered; a send cancelled mid-way leaves
        // the gate open for the update that replaces it.
        let phase = status.phase;
        self.inner.emit(status).await;
        state.last = Some(phase);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Sink that records every update for assertions
    #[derive(Default)]
    pub struct RecordingSink {
        updates: StdMutex<Vec<TransactionStatus>>,
    }

    impl RecordingSink {
        pub fn updates(&self) -> Vec<TransactionStatus> {
            self.updates.lock().unwrap().clone()
        }

        pub fn phases(&self) -> Vec<TxPhase> {
            self.updates().into_iter().map(|s| s.phase).collect()
        }
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn emit(&self, status: TransactionStatus) {
            self.updates.lock().unwrap().push(status);
        }
    }
}

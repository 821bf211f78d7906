//! Chain module - the ledger collaborator boundary
//!
//! This module provides:
//! - The `LedgerClient` trait every component talks to
//! - An ethers-backed implementation with multi-RPC failover for reads
//! - Receipt polling with confirmation-depth tracking

pub mod finality;
pub mod provider;

pub use finality::{confirmations_at, ReceiptSource, ReceiptWaiter};
pub use provider::{load_wallet, EthersLedger};

use crate::contract::PendingCall;
use crate::tx::FeeEstimate;

use async_trait::async_trait;
use ethers::types::{Bytes, TransactionReceipt, H256, U256};
use thiserror::Error;

/// Transaction identifier as returned by the node
pub type TxHash = H256;

/// JSON-RPC code wallets use when the user declines a request (EIP-1193)
pub const USER_REJECTED_CODE: i64 = 4001;

/// JSON-RPC code for a node-level internal error
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// Current network fee data; any field may be missing depending on the chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeData {
    pub legacy_price: Option<U256>,
    pub max_fee: Option<U256>,
    pub max_priority_fee: Option<U256>,
}

/// Raw failure signals reported by the ledger client
///
/// These are never shown to users directly; the orchestrator classifies them once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("user rejected the request: {0}")]
    UserRejected(String),

    #[error("internal JSON-RPC error: {0}")]
    NodeInternal(String),

    #[error("{message}")]
    Rpc { code: Option<i64>, message: String },

    #[error("transaction {0:?} was dropped before inclusion")]
    Dropped(TxHash),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// Build an error from a JSON-RPC error object
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            USER_REJECTED_CODE => LedgerError::UserRejected(message),
            INTERNAL_ERROR_CODE => LedgerError::NodeInternal(message),
            _ => LedgerError::Rpc {
                code: Some(code),
                message,
            },
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// The remote ledger node as seen by this core
///
/// Implementations are shared by reference across components and concurrent
/// invocations, so they must not require `&mut self`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current fee market data
    async fn get_fee_data(&self) -> LedgerResult<FeeData>;

    /// Raw gas estimate for a call against current state
    async fn estimate_gas(&self, call: &PendingCall) -> LedgerResult<U256>;

    /// Sign and broadcast a call with the given fee parameters
    async fn submit(&self, call: &PendingCall, fees: &FeeEstimate) -> LedgerResult<TxHash>;

    /// Wait until the transaction is included and has `confirmations` blocks on top
    async fn await_receipt(
        &self,
        tx_hash: TxHash,
        confirmations: u64,
    ) -> LedgerResult<TransactionReceipt>;

    /// Receipt lookup without waiting
    async fn get_receipt(&self, tx_hash: TxHash) -> LedgerResult<Option<TransactionReceipt>>;

    /// Read-only call against the latest state
    async fn call(&self, call: &PendingCall) -> LedgerResult<Bytes>;
}

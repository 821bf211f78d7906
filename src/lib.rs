//! Transaction execution core for a confidential credit-scoring contract
//!
//! Estimates fees, submits encrypted credit data and scoring requests, tracks
//! them to a terminal state and normalizes every failure into a small set of
//! user-facing categories.

pub mod background;
pub mod chain;
pub mod config;
pub mod contract;
pub mod encryption;
pub mod error;
pub mod format;
pub mod metrics;
pub mod tx;

pub use chain::{LedgerClient, LedgerError};
pub use error::{CoreError, CoreResult};
pub use tx::{
    ExecuteOptions, FeeEstimate, FeeEstimator, TransactionMonitor, TransactionOrchestrator,
    TxFailure,
};

//! Classification of raw ledger failures into stable user-facing outcomes

use crate::chain::LedgerError;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Classified outcome of a failed `execute`
///
/// `Display` is the user-facing message and does not depend on transport text,
/// except for `Unknown`, which keeps the raw message verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxFailure {
    #[error("Transaction was cancelled by the user")]
    UserCancelled,

    #[error("The network node or contract rejected the transaction")]
    SubmissionRejected { raw: String },

    #[error("Insufficient funds to cover the transaction and its fees")]
    InsufficientFunds,

    #[error("The contract rejected the submitted input")]
    ContractRejectedInput { raw: String },

    #[error("Timed out waiting for transaction confirmation")]
    Timeout { after: Duration },

    #[error("{0}")]
    Unknown(String),
}

/// Flat failure category, used as a metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    UserCancelled,
    SubmissionRejected,
    InsufficientFunds,
    ContractRejectedInput,
    Timeout,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UserCancelled => "user-cancelled",
            FailureKind::SubmissionRejected => "submission-rejected",
            FailureKind::InsufficientFunds => "insufficient-funds",
            FailureKind::ContractRejectedInput => "contract-rejected-input",
            FailureKind::Timeout => "timeout",
            FailureKind::Unknown => "unknown",
        }
    }
}

const INSUFFICIENT_FUNDS: &[&str] = &["insufficient funds"];
const USER_REJECTED: &[&str] = &["user rejected", "user denied"];
const EXECUTION_REVERTED: &[&str] = &["execution reverted"];

impl TxFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            TxFailure::UserCancelled => FailureKind::UserCancelled,
            TxFailure::SubmissionRejected { .. } => FailureKind::SubmissionRejected,
            TxFailure::InsufficientFunds => FailureKind::InsufficientFunds,
            TxFailure::ContractRejectedInput { .. } => FailureKind::ContractRejectedInput,
            TxFailure::Timeout { .. } => FailureKind::Timeout,
            TxFailure::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// Classify a raw ledger error; structured signals win over message matching
    pub fn classify(error: &LedgerError) -> Self {
        match error {
            LedgerError::UserRejected(_) => TxFailure::UserCancelled,
            LedgerError::NodeInternal(message) => TxFailure::SubmissionRejected {
                raw: message.clone(),
            },
            LedgerError::Transport(message)
            | LedgerError::Signer(message)
            | LedgerError::Malformed(message) => Self::classify_message(message),
            other => Self::classify_message(&other.to_string()),
        }
    }

    /// Classify by message content alone
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if contains_any(INSUFFICIENT_FUNDS) {
            TxFailure::InsufficientFunds
        } else if contains_any(USER_REJECTED) {
            TxFailure::UserCancelled
        } else if contains_any(EXECUTION_REVERTED) {
            TxFailure::ContractRejectedInput {
                raw: message.to_string(),
            }
        } else {
            TxFailure::Unknown(message.to_string())
        }
    }
}

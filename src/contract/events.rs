//! Credit contract event types and parsing
//!
//! Events are decoded from the logs of a terminal receipt so callers can see
//! what the contract recorded without a second round trip.

use ethers::types::{Address, Log, H256, U256};
use ethers::utils::keccak256;
use lazy_static::lazy_static;
use serde::Serialize;

/// Events emitted by the credit-scoring contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CreditEvent {
    CreditDataSubmitted { user: Address, timestamp: u64 },
    CreditEvaluated { user: Address, timestamp: u64 },
    LoanApprovalRequested { user: Address, timestamp: u64 },
}

impl CreditEvent {
    /// Get event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            CreditEvent::CreditDataSubmitted { .. } => "credit_data_submitted",
            CreditEvent::CreditEvaluated { .. } => "credit_evaluated",
            CreditEvent::LoanApprovalRequested { .. } => "loan_approval_requested",
        }
    }

    pub fn user(&self) -> Address {
        match self {
            CreditEvent::CreditDataSubmitted { user, .. }
            | CreditEvent::CreditEvaluated { user, .. }
            | CreditEvent::LoanApprovalRequested { user, .. } => *user,
        }
    }
}

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use super::*;

    lazy_static! {
        pub static ref CREDIT_DATA_SUBMITTED: H256 =
            H256::from(keccak256("CreditDataSubmitted(address,uint256)"));
        pub static ref CREDIT_EVALUATED: H256 =
            H256::from(keccak256("CreditEvaluated(address,uint256)"));
        pub static ref LOAN_APPROVAL_REQUESTED: H256 =
            H256::from(keccak256("LoanApprovalRequested(address,uint256)"));
    }
}

/// Parse a single log; `None` for logs from other contracts or unknown topics
pub fn parse_log(contract: Address, log: &Log) -> Option<CreditEvent> {
    if log.address != contract {
        return None;
    }

    let topic = log.topics.first()?;

    // user is indexed, timestamp is the only data word
    let user = log
        .topics
        .get(1)
        .map(|t| Address::from_slice(&t.as_bytes()[12..32]))?;
    let timestamp = if log.data.len() >= 32 {
        U256::from_big_endian(&log.data[0..32]).low_u64()
    } else {
        0
    };

    if *topic == *topics::CREDIT_DATA_SUBMITTED {
        Some(CreditEvent::CreditDataSubmitted { user, timestamp })
    } else if *topic == *topics::CREDIT_EVALUATED {
        Some(CreditEvent::CreditEvaluated { user, timestamp })
    } else if *topic == *topics::LOAN_APPROVAL_REQUESTED {
        Some(CreditEvent::LoanApprovalRequested { user, timestamp })
    } else {
        None
    }
}

/// Decode every credit event in a set of receipt logs, in log order
pub fn parse_logs(contract: Address, logs: &[Log]) -> Vec<CreditEvent> {
    logs.iter().filter_map(|log| parse_log(contract, log)).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ethers::types::Bytes;

    pub fn event_log(contract: Address, topic: H256, user: Address, timestamp: u64) -> Log {
        let mut data = [0u8; 32];
        U256::from(timestamp).to_big_endian(&mut data);
        Log {
            address: contract,
            topics: vec![topic, H256::from(user)],
            data: Bytes::from(data.to_vec()),
            ..Default::default()
        }
    }
}

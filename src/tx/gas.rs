//! Gas and fee estimation with a safety buffer and a conservative fallback

use crate::chain::{FeeData, LedgerClient, LedgerError, LedgerResult};
use crate::contract::PendingCall;
use crate::format::format_cost;

use ethers::types::U256;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Gas limit used when estimation fails
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// Legacy gas price used when estimation fails: 20 gwei
pub const DEFAULT_GAS_PRICE_WEI: u64 = 20_000_000_000;

/// Buffer applied to raw gas estimates, in percent of the raw value
pub const GAS_LIMIT_BUFFER_PERCENT: u64 = 120;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Worst-case price per gas unit
    pub fn ceiling(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Fee parameters for one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeEstimate {
    pub gas_limit: U256,
    pub fees: GasPrice,
    /// Worst-case cost in ether, six fractional digits
    pub estimated_cost: String,
}

impl FeeEstimate {
    pub fn new(gas_limit: U256, fees: GasPrice) -> Self {
        Self {
            gas_limit,
            fees,
            estimated_cost: format_cost(gas_limit, fees.ceiling()),
        }
    }

    /// Pessimistic estimate used whenever the network cannot be asked
    pub fn conservative_default() -> Self {
        Self::new(
            U256::from(DEFAULT_GAS_LIMIT),
            GasPrice::Legacy(U256::from(DEFAULT_GAS_PRICE_WEI)),
        )
    }

    pub fn legacy_gas_price(&self) -> Option<U256> {
        match self.fees {
            GasPrice::Legacy(price) => Some(price),
            GasPrice::Eip1559 { .. } => None,
        }
    }

    pub fn max_fee_per_gas(&self) -> Option<U256> {
        match self.fees {
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => Some(max_fee_per_gas),
            GasPrice::Legacy(_) => None,
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<U256> {
        match self.fees {
            GasPrice::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => Some(max_priority_fee_per_gas),
            GasPrice::Legacy(_) => None,
        }
    }
}

/// Apply the safety buffer, rounding up so the result never undershoots
pub fn buffered_gas_limit(raw: U256) -> U256 {
    let scaled = raw.saturating_mul(U256::from(GAS_LIMIT_BUFFER_PERCENT));
    let hundred = U256::from(100);
    let (quotient, remainder) = scaled.div_mod(hundred);
    if remainder.is_zero() {
        quotient
    } else {
        quotient + 1
    }
}

/// Pick one consistent fee scheme from whatever the node reported
pub fn select_gas_price(data: &FeeData) -> Option<GasPrice> {
    let max_fee = data.max_fee.or(match data.max_priority_fee {
        // Dynamic pair without a max fee degrades to the legacy price
        Some(_) => data.legacy_price,
        None => None,
    });

    match (max_fee, data.max_priority_fee) {
        (Some(max_fee_per_gas), Some(priority)) => Some(GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas: priority.min(max_fee_per_gas),
        }),
        _ => data.legacy_price.map(GasPrice::Legacy),
    }
}

/// Gas estimator for credit contract calls
pub struct FeeEstimator {
    ledger: Arc<dyn LedgerClient>,
}

impl FeeEstimator {
    /// Create a new fee estimator
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Estimate fees for a call; never fails
    ///
    /// Any RPC or data problem yields [`FeeEstimate::conservative_default`]. The
    /// fallback is only visible in logs and the `fee_estimate_defaulted` metric.
    pub async fn estimate(&self, call: &PendingCall) -> FeeEstimate {
        match self.try_estimate(call).await {
            Ok(estimate) => {
                debug!(
                    method = %call.method(),
                    gas_limit = %estimate.gas_limit,
                    fees = ?estimate.fees,
                    cost = %estimate.estimated_cost,
                    "Fee estimate computed"
                );
                estimate
            }
            Err(e) => {
                warn!(
                    method = %call.method(),
                    error = %e,
                    "Fee estimation failed, using conservative default"
                );
                crate::metrics::record_fee_estimate_defaulted();
                FeeEstimate::conservative_default()
            }
        }
    }

    async fn try_estimate(&self, call: &PendingCall) -> LedgerResult<FeeEstimate> {
        let fee_data = self.ledger.get_fee_data().await?;
        let raw_gas = self.ledger.estimate_gas(call).await?;
        if raw_gas.is_zero() {
            return Err(LedgerError::Malformed("zero gas estimate".to_string()));
        }

        let gas_limit = buffered_gas_limit(raw_gas);
        let fees = select_gas_price(&fee_data).ok_or_else(|| {
            LedgerError::Malformed(format!("no usable gas price in {:?}", fee_data))
        })?;

        Ok(FeeEstimate::new(gas_limit, fees))
    }
}

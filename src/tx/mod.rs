//! Transaction execution: fee estimation, confirmation tracking and orchestration

mod failure;
mod gas;
mod monitor;
mod orchestrator;
mod status;

pub use failure::{FailureKind, TxFailure};
pub use gas::{
    buffered_gas_limit, select_gas_price, FeeEstimate, FeeEstimator, GasPrice,
    DEFAULT_GAS_LIMIT, DEFAULT_GAS_PRICE_WEI,
};
pub use monitor::{TransactionMonitor, DEFAULT_CONFIRMATIONS};
pub use orchestrator::{
    ExecuteOptions, PostConfirmation, TransactionOrchestrator, DEFAULT_TIMEOUT,
};
pub use status::{
    CallbackSink, ChannelSink, NullSink, StatusGate, StatusSink, TerminalReceipt,
    TransactionStatus, TxPhase,
};

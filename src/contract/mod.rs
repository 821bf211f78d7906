//! Credit-scoring contract boundary
//!
//! The contract logic itself is external. This module only knows its entry
//! points, how to encode calls to them, how to read its view accessors and
//! how to recognise its events in a receipt.

pub mod builder;
pub mod call;
pub mod events;
pub mod reader;

pub use builder::{CreditCallBuilder, CreditData};
pub use call::{CallArg, CreditMethod, PendingCall};
pub use events::CreditEvent;
pub use reader::{AccountStatus, CreditContractReader, EvaluationStats};

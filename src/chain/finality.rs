//! Receipt polling with confirmation-depth tracking
//!
//! A transaction counts as confirmed `n` times once its inclusion block and
//! `n - 1` blocks on top of it exist. A transaction the node no longer knows
//! about for several consecutive polls is reported as dropped.

use super::{LedgerError, LedgerResult, TxHash};
use crate::format::truncate_id;

use async_trait::async_trait;
use ethers::types::TransactionReceipt;
use std::time::Duration;
use tracing::{debug, warn};

/// The node queries the waiter needs
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn receipt(&self, tx_hash: TxHash) -> LedgerResult<Option<TransactionReceipt>>;

    /// Whether the node still has the transaction, mined or in its pool
    async fn is_known(&self, tx_hash: TxHash) -> LedgerResult<bool>;

    async fn block_number(&self) -> LedgerResult<u64>;
}

/// Confirmations of a transaction included at `inclusion` when the head is `current`
pub fn confirmations_at(current: u64, inclusion: u64) -> u64 {
    if current < inclusion {
        0
    } else {
        current - inclusion + 1
    }
}

/// Polls a [`ReceiptSource`] until a transaction reaches the requested depth
#[derive(Debug, Clone)]
pub struct ReceiptWaiter {
    poll_interval: Duration,
    dropped_after_polls: u32,
}

impl ReceiptWaiter {
    pub fn new(poll_interval: Duration, dropped_after_polls: u32) -> Self {
        Self {
            poll_interval,
            dropped_after_polls: dropped_after_polls.max(1),
        }
    }

    /// Wait until `tx_hash` has `confirmations` blocks; never gives up on its own
    /// unless the transaction disappears
    ///
    /// Transport errors while polling are logged and retried on the next tick.
    pub async fn wait(
        &self,
        source: &dyn ReceiptSource,
        tx_hash: TxHash,
        confirmations: u64,
    ) -> LedgerResult<TransactionReceipt> {
        let required = confirmations.max(1);
        let short_hash = truncate_id(&format!("{:?}", tx_hash));
        let mut unknown_polls = 0u32;

        loop {
            match self.poll(source, tx_hash, required).await {
                Ok(Poll::Ready(receipt)) => return Ok(receipt),
                Ok(Poll::Included(depth)) => {
                    unknown_polls = 0;
                    debug!(tx_hash = %short_hash, depth, required, "Awaiting confirmations");
                }
                Ok(Poll::InPool) => unknown_polls = 0,
                Ok(Poll::Unknown) => {
                    unknown_polls += 1;
                    if unknown_polls >= self.dropped_after_polls {
                        warn!(tx_hash = %short_hash, polls = unknown_polls, "Transaction dropped");
                        return Err(LedgerError::Dropped(tx_hash));
                    }
                }
                Err(LedgerError::Transport(message)) => {
                    warn!(tx_hash = %short_hash, error = %message, "Receipt poll failed");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn poll(
        &self,
        source: &dyn ReceiptSource,
        tx_hash: TxHash,
        required: u64,
    ) -> LedgerResult<Poll> {
        let receipt = match source.receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None if source.is_known(tx_hash).await? => return Ok(Poll::InPool),
            None => return Ok(Poll::Unknown),
        };

        let inclusion = match receipt.block_number {
            Some(block) => block.as_u64(),
            // Pending receipt from some nodes
            None => return Ok(Poll::InPool),
        };

        let depth = if required == 1 {
            1
        } else {
            confirmations_at(source.block_number().await?, inclusion)
        };

        if depth >= required {
            Ok(Poll::Ready(receipt))
        } else {
            Ok(Poll::Included(depth))
        }
    }
}

enum Poll {
    Ready(TransactionReceipt),
    Included(u64),
    InPool,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U64};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of node responses, repeating the last one
    struct Scripted {
        receipts: Mutex<VecDeque<LedgerResult<Option<TransactionReceipt>>>>,
        known: bool,
        head: Mutex<u64>,
    }

    impl Scripted {
        fn new(receipts: Vec<LedgerResult<Option<TransactionReceipt>>>, known: bool) -> Self {
            Self {
                receipts: Mutex::new(receipts.into()),
                known,
                head: Mutex::new(100),
            }
        }
    }

    #[async_trait]
    impl ReceiptSource for Scripted {
        async fn receipt(&self, _tx_hash: TxHash) -> LedgerResult<Option<TransactionReceipt>> {
            let mut receipts = self.receipts.lock().unwrap();
            if receipts.len() > 1 {
                receipts.pop_front().unwrap()
            } else {
                receipts.front().cloned().unwrap_or(Ok(None))
            }
        }

        async fn is_known(&self, _tx_hash: TxHash) -> LedgerResult<bool> {
            Ok(self.known)
        }

        async fn block_number(&self) -> LedgerResult<u64> {
            let mut head = self.head.lock().unwrap();
            *head += 1;
            Ok(*head)
        }
    }

    fn mined(block: u64) -> TransactionReceipt {
        TransactionReceipt {
            block_number: Some(U64::from(block)),
            status: Some(U64::from(1)),
            ..Default::default()
        }
    }

    #[test]
    fn test_confirmations_at() {
        assert_eq!(confirmations_at(10, 10), 1);
        assert_eq!(confirmations_at(12, 10), 3);
        assert_eq!(confirmations_at(9, 10), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_inclusion() {
        let source = Scripted::new(vec![Ok(None), Ok(None), Ok(Some(mined(50)))], true);
        let waiter = ReceiptWaiter::new(Duration::from_millis(500), 3);

        let receipt = waiter.wait(&source, H256::zero(), 1).await.unwrap();
        assert_eq!(receipt.block_number, Some(U64::from(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_depth() {
        // Head starts at 101 and grows by one per query
        let source = Scripted::new(vec![Ok(Some(mined(101)))], true);
        let waiter = ReceiptWaiter::new(Duration::from_millis(500), 3);

        waiter.wait(&source, H256::zero(), 3).await.unwrap();
        assert!(*source.head.lock().unwrap() >= 103);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_retried() {
        let source = Scripted::new(
            vec![
                Err(LedgerError::Transport("connection reset".to_string())),
                Ok(Some(mined(7))),
            ],
            true,
        );
        let waiter = ReceiptWaiter::new(Duration::from_millis(500), 3);
        assert!(waiter.wait(&source, H256::zero(), 1).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_transaction_is_dropped() {
        let source = Scripted::new(vec![Ok(None)], false);
        let waiter = ReceiptWaiter::new(Duration::from_millis(500), 3);

        let err = waiter.wait(&source, H256::repeat_byte(9), 1).await.unwrap_err();
        assert_eq!(err, LedgerError::Dropped(H256::repeat_byte(9)));
    }
}

//! Confirmation tracking for submitted transactions
//!
//! The monitor waits on the ledger until a transaction reaches a terminal state
//! and reports progress through a [`StatusSink`]. It imposes no deadline of its
//! own; callers bound the wait.

use super::status::{StatusSink, TerminalReceipt, TransactionStatus};
use crate::chain::{LedgerClient, LedgerResult, TxHash};
use crate::format::truncate_id;

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Confirmations required when the caller does not ask for more
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Tracks transactions on one contract until they are final
pub struct TransactionMonitor {
    ledger: Arc<dyn LedgerClient>,
    contract: Address,
}

impl TransactionMonitor {
    /// Create a monitor; `contract` selects which receipt logs are decoded as events
    pub fn new(ledger: Arc<dyn LedgerClient>, contract: Address) -> Self {
        Self { ledger, contract }
    }

    /// Track a transaction to its terminal state
    ///
    /// Emits `pending`, an optional `confirming`, then exactly one terminal update.
    /// A reverted receipt is reported as `failed` but returned as `Ok`. If the wait
    /// itself fails, a `failed` update carrying the underlying message is emitted
    /// and the error is returned.
    pub async fn track(
        &self,
        tx_hash: TxHash,
        on_update: &dyn StatusSink,
        confirmations: u64,
    ) -> LedgerResult<TerminalReceipt> {
        match self.watch(tx_hash, on_update, confirmations).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                warn!(
                    tx_hash = %truncate_id(&format!("{:?}", tx_hash)),
                    error = %e,
                    "Waiting for receipt failed"
                );
                on_update
                    .emit(TransactionStatus::failed(Some(tx_hash), e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Everything `track` does except reporting a failed wait; the orchestrator
    /// reports those itself with a classified message
    pub(crate) async fn watch(
        &self,
        tx_hash: TxHash,
        on_update: &dyn StatusSink,
        confirmations: u64,
    ) -> LedgerResult<TerminalReceipt> {
        let required = confirmations.max(1);
        let short_hash = truncate_id(&format!("{:?}", tx_hash));

        on_update.emit(TransactionStatus::pending(Some(tx_hash))).await;

        let mut receipt = self.ledger.await_receipt(tx_hash, 1).await?;
        debug!(
            tx_hash = %short_hash,
            block = ?receipt.block_number,
            "Transaction included"
        );

        let included_ok = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
        if required > 1 && included_ok {
            on_update
                .emit(TransactionStatus::confirming(tx_hash, 1))
                .await;
            receipt = self.ledger.await_receipt(tx_hash, required).await?;
        }

        let terminal = TerminalReceipt::from_receipt(&receipt, self.contract, required);
        if terminal.succeeded {
            info!(
                tx_hash = %short_hash,
                block = ?terminal.block_number,
                gas_used = ?terminal.gas_used,
                events = terminal.events.len(),
                "Transaction confirmed"
            );
        } else {
            warn!(
                tx_hash = %short_hash,
                block = ?terminal.block_number,
                "Transaction reverted"
            );
        }

        on_update.emit(TransactionStatus::from_receipt(&terminal)).await;
        Ok(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{LedgerError, MockLedgerClient};
    use crate::contract::events::{testing::event_log, topics};
    use crate::contract::CreditEvent;
    use crate::tx::status::testing::RecordingSink;
    use crate::tx::TxPhase;
    use ethers::types::{TransactionReceipt, H256, U256, U64};
    use mockall::predicate::eq;

    fn contract() -> Address {
        "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap()
    }

    fn receipt(status: u64, block: u64) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: H256::repeat_byte(0xaa),
            status: Some(U64::from(status)),
            gas_used: Some(U256::from(48_211)),
            effective_gas_price: Some(U256::from(1_500_000_000u64)),
            block_number: Some(U64::from(block)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_emits_pending_then_confirmed() {
        let hash = H256::repeat_byte(0xaa);
        let user: Address = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_await_receipt()
            .with(eq(hash), eq(1))
            .times(1)
            .returning(move |_, _| {
                let mut r = receipt(1, 10);
                r.logs = vec![event_log(contract(), *topics::CREDIT_EVALUATED, user, 99)];
                Ok(r)
            });

        let sink = RecordingSink::default();
        let monitor = TransactionMonitor::new(Arc::new(ledger), contract());
        let terminal = monitor.track(hash, &sink, DEFAULT_CONFIRMATIONS).await.unwrap();

        assert!(terminal.succeeded);
        assert_eq!(
            terminal.events,
            vec![CreditEvent::CreditEvaluated { user, timestamp: 99 }]
        );
        assert_eq!(sink.phases(), vec![TxPhase::Pending, TxPhase::Confirmed]);

        let updates = sink.updates();
        assert_eq!(updates[0].confirmations, Some(0));
        assert_eq!(updates[1].confirmations, Some(1));
        assert_eq!(updates[1].block_number, Some(10));
        assert_eq!(updates[1].gas_used, Some(U256::from(48_211)));
    }

    #[tokio::test]
    async fn test_revert_is_failed_without_error() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_await_receipt()
            .returning(|_, _| Ok(receipt(0, 11)));

        let sink = RecordingSink::default();
        let monitor = TransactionMonitor::new(Arc::new(ledger), contract());
        let terminal = monitor
            .track(H256::repeat_byte(0xaa), &sink, 1)
            .await
            .unwrap();

        assert!(!terminal.succeeded);
        assert_eq!(sink.phases(), vec![TxPhase::Pending, TxPhase::Failed]);
    }

    #[tokio::test]
    async fn test_multiple_confirmations_emit_one_confirming() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_await_receipt()
            .withf(|_, confirmations| *confirmations == 1)
            .times(1)
            .returning(|_, _| Ok(receipt(1, 20)));
        ledger
            .expect_await_receipt()
            .withf(|_, confirmations| *confirmations == 3)
            .times(1)
            .returning(|_, _| Ok(receipt(1, 20)));

        let sink = RecordingSink::default();
        let monitor = TransactionMonitor::new(Arc::new(ledger), contract());
        let terminal = monitor
            .track(H256::repeat_byte(0xaa), &sink, 3)
            .await
            .unwrap();

        assert_eq!(terminal.confirmations, 3);
        assert_eq!(
            sink.phases(),
            vec![TxPhase::Pending, TxPhase::Confirming, TxPhase::Confirmed]
        );
        assert_eq!(sink.updates()[1].confirmations, Some(1));
    }

    #[tokio::test]
    async fn test_wait_failure_emits_failed_and_returns_error() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_await_receipt()
            .returning(|hash, _| Err(LedgerError::Dropped(hash)));

        let sink = RecordingSink::default();
        let monitor = TransactionMonitor::new(Arc::new(ledger), contract());
        let err = monitor
            .track(H256::repeat_byte(0xaa), &sink, 1)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Dropped(_)));
        assert_eq!(sink.phases(), vec![TxPhase::Pending, TxPhase::Failed]);
        assert_eq!(sink.updates()[1].error, Some(err.to_string()));
    }
}

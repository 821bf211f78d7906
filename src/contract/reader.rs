//! Read-only accessors of the credit contract

use super::call::{CallArg, CreditMethod, PendingCall};
use crate::chain::LedgerClient;
use crate::encryption::{Ciphertext, Decryption, EncryptionHandle};
use crate::error::{CoreError, CoreResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Contract-wide counters returned by `getEvaluationStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationStats {
    pub total_submissions: U256,
    pub total_evaluations: U256,
}

/// Per-account progress through the credit flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    pub account: Address,
    pub has_submitted: bool,
    pub is_evaluated: bool,
}

/// View-call client for one deployed credit contract
pub struct CreditContractReader {
    ledger: Arc<dyn LedgerClient>,
    contract: Address,
}

impl CreditContractReader {
    pub fn new(ledger: Arc<dyn LedgerClient>, contract: Address) -> Self {
        Self { ledger, contract }
    }

    pub async fn has_submitted_credit_data(&self, account: Address) -> CoreResult<bool> {
        let tokens = self
            .query(CreditMethod::HasSubmittedCreditData, Some(account), &[ParamType::Bool])
            .await?;
        bool_at(&tokens, 0)
    }

    pub async fn is_credit_evaluated(&self, account: Address) -> CoreResult<bool> {
        let tokens = self
            .query(CreditMethod::IsCreditEvaluated, Some(account), &[ParamType::Bool])
            .await?;
        bool_at(&tokens, 0)
    }

    pub async fn evaluation_stats(&self) -> CoreResult<EvaluationStats> {
        let tokens = self
            .query(
                CreditMethod::GetEvaluationStats,
                None,
                &[ParamType::Uint(256), ParamType::Uint(256)],
            )
            .await?;
        Ok(EvaluationStats {
            total_submissions: uint_at(&tokens, 0)?,
            total_evaluations: uint_at(&tokens, 1)?,
        })
    }

    pub async fn encrypted_credit_score(&self, account: Address) -> CoreResult<Ciphertext> {
        let tokens = self
            .query(CreditMethod::GetEncryptedCreditScore, Some(account), &[ParamType::Bytes])
            .await?;
        bytes_at(&tokens, 0)
    }

    pub async fn encrypted_loan_approval(&self, account: Address) -> CoreResult<Ciphertext> {
        let tokens = self
            .query(CreditMethod::GetEncryptedLoanApproval, Some(account), &[ParamType::Bytes])
            .await?;
        bytes_at(&tokens, 0)
    }

    /// Fetch and decrypt the account's credit score
    pub async fn credit_score(
        &self,
        account: Address,
        encryption: &EncryptionHandle,
    ) -> CoreResult<Decryption> {
        let ciphertext = self.encrypted_credit_score(account).await?;
        Ok(encryption.decrypt(&ciphertext)?)
    }

    /// Fetch and decrypt the account's loan decision (non-zero means approved)
    pub async fn loan_approval(
        &self,
        account: Address,
        encryption: &EncryptionHandle,
    ) -> CoreResult<Decryption> {
        let ciphertext = self.encrypted_loan_approval(account).await?;
        Ok(encryption.decrypt(&ciphertext)?)
    }

    pub async fn account_status(&self, account: Address) -> CoreResult<AccountStatus> {
        let (has_submitted, is_evaluated) = futures::try_join!(
            self.has_submitted_credit_data(account),
            self.is_credit_evaluated(account)
        )?;
        Ok(AccountStatus {
            account,
            has_submitted,
            is_evaluated,
        })
    }

    async fn query(
        &self,
        method: CreditMethod,
        account: Option<Address>,
        outputs: &[ParamType],
    ) -> CoreResult<Vec<Token>> {
        let args = account.map(CallArg::Address).into_iter().collect();
        let call = PendingCall::new(self.contract, method, args)?;
        let raw = self.ledger.call(&call).await?;
        debug!(method = %method, bytes = raw.len(), "View call returned");

        abi::decode(outputs, raw.as_ref())
            .map_err(|e| CoreError::Contract(format!("Failed to decode {} output: {}", method, e)))
    }
}

fn bool_at(tokens: &[Token], index: usize) -> CoreResult<bool> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_bool)
        .ok_or_else(|| CoreError::Contract(format!("Expected bool at output {}", index)))
}

fn uint_at(tokens: &[Token], index: usize) -> CoreResult<U256> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| CoreError::Contract(format!("Expected uint256 at output {}", index)))
}

fn bytes_at(tokens: &[Token], index: usize) -> CoreResult<Ciphertext> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_bytes)
        .map(Ciphertext::from)
        .ok_or_else(|| CoreError::Contract(format!("Expected bytes at output {}", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{LedgerError, MockLedgerClient};
    use crate::encryption::testing::initialized_handle;
    use crate::encryption::FieldWidth;
    use ethers::types::Bytes;

    fn contract() -> Address {
        "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap()
    }

    fn account() -> Address {
        "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap()
    }

    fn encoded(tokens: &[Token]) -> Bytes {
        Bytes::from(abi::encode(tokens))
    }

    #[tokio::test]
    async fn test_account_status_reads_both_flags() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_call().times(2).returning(|call| {
            let flag = call.method() == CreditMethod::HasSubmittedCreditData;
            Ok(encoded(&[Token::Bool(flag)]))
        });

        let reader = CreditContractReader::new(Arc::new(ledger), contract());
        let status = reader.account_status(account()).await.unwrap();
        assert!(status.has_submitted);
        assert!(!status.is_evaluated);
    }

    #[tokio::test]
    async fn test_evaluation_stats() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_call()
            .returning(|_| Ok(encoded(&[Token::Uint(12.into()), Token::Uint(9.into())])));

        let reader = CreditContractReader::new(Arc::new(ledger), contract());
        let stats = reader.evaluation_stats().await.unwrap();
        assert_eq!(stats.total_submissions, U256::from(12));
        assert_eq!(stats.total_evaluations, U256::from(9));
    }

    #[tokio::test]
    async fn test_credit_score_decrypts_through_handle() {
        let handle = initialized_handle(true);
        let ciphertext = handle.encrypt_field(742, FieldWidth::W32).unwrap();
        let payload = encoded(&[Token::Bytes(ciphertext.as_bytes().to_vec())]);

        let mut ledger = MockLedgerClient::new();
        ledger.expect_call().returning(move |_| Ok(payload.clone()));

        let reader = CreditContractReader::new(Arc::new(ledger), contract());
        assert_eq!(
            reader.credit_score(account(), &handle).await.unwrap(),
            Decryption::Value(742)
        );
        assert_eq!(
            reader
                .credit_score(account(), &initialized_handle(false))
                .await
                .unwrap(),
            Decryption::Unavailable
        );
    }

    #[tokio::test]
    async fn test_malformed_output_is_contract_error() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_call().returning(|_| Ok(Bytes::from(vec![0x01])));

        let reader = CreditContractReader::new(Arc::new(ledger), contract());
        let err = reader.is_credit_evaluated(account()).await.unwrap_err();
        assert!(matches!(err, CoreError::Contract(_)));
    }

    #[tokio::test]
    async fn test_ledger_failure_propagates() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_call()
            .returning(|_| Err(LedgerError::Transport("connection refused".to_string())));

        let reader = CreditContractReader::new(Arc::new(ledger), contract());
        let err = reader.evaluation_stats().await.unwrap_err();
        assert!(matches!(err, CoreError::Ledger(LedgerError::Transport(_))));
    }
}

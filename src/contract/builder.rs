//! Builds state-changing credit contract calls from plaintext inputs

use super::call::{CallArg, CreditMethod, PendingCall};
use crate::encryption::{Ciphertext, EncryptionHandle, FieldWidth};
use crate::error::CoreResult;

use ethers::types::Address;

/// Plaintext credit profile, encrypted field by field before submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditData {
    pub income: u32,
    pub outstanding_debt: u32,
    /// Payment history rating, 0-255
    pub payment_history: u8,
}

/// Produces [`PendingCall`]s for one deployed credit contract
#[derive(Debug, Clone, Copy)]
pub struct CreditCallBuilder {
    contract: Address,
}

impl CreditCallBuilder {
    pub fn new(contract: Address) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// `submitCreditData` with each field encrypted through the handle
    pub fn submit_credit_data(
        &self,
        encryption: &EncryptionHandle,
        data: CreditData,
    ) -> CoreResult<PendingCall> {
        let income = encryption.encrypt_field(data.income.into(), FieldWidth::W32)?;
        let debt = encryption.encrypt_field(data.outstanding_debt.into(), FieldWidth::W32)?;
        let history = encryption.encrypt_field(data.payment_history.into(), FieldWidth::W8)?;
        self.submit_encrypted_credit_data(income, debt, history)
    }

    /// `submitCreditData` from ciphertexts produced elsewhere
    pub fn submit_encrypted_credit_data(
        &self,
        income: Ciphertext,
        outstanding_debt: Ciphertext,
        payment_history: Ciphertext,
    ) -> CoreResult<PendingCall> {
        PendingCall::new(
            self.contract,
            CreditMethod::SubmitCreditData,
            vec![
                CallArg::Ciphertext(income),
                CallArg::Ciphertext(outstanding_debt),
                CallArg::Ciphertext(payment_history),
            ],
        )
    }

    pub fn evaluate_credit_score(&self) -> CoreResult<PendingCall> {
        PendingCall::new(self.contract, CreditMethod::EvaluateCreditScore, vec![])
    }

    /// `requestLoanApproval` for an amount encrypted through the handle
    pub fn request_loan_approval(
        &self,
        encryption: &EncryptionHandle,
        amount: u32,
    ) -> CoreResult<PendingCall> {
        let amount = encryption.encrypt_field(amount.into(), FieldWidth::W32)?;
        self.request_encrypted_loan_approval(amount)
    }

    pub fn request_encrypted_loan_approval(&self, amount: Ciphertext) -> CoreResult<PendingCall> {
        PendingCall::new(
            self.contract,
            CreditMethod::RequestLoanApproval,
            vec![CallArg::Ciphertext(amount)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::testing::initialized_handle;
    use crate::encryption::EncryptionError;
    use crate::error::CoreError;

    fn builder() -> CreditCallBuilder {
        CreditCallBuilder::new("0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap())
    }

    #[test]
    fn test_submit_credit_data_encrypts_every_field() {
        let handle = initialized_handle(true);
        let call = builder()
            .submit_credit_data(
                &handle,
                CreditData {
                    income: 85_000,
                    outstanding_debt: 12_000,
                    payment_history: 97,
                },
            )
            .unwrap();

        assert_eq!(call.method(), CreditMethod::SubmitCreditData);
        assert_eq!(call.args().len(), 3);
        assert!(call
            .args()
            .iter()
            .all(|arg| matches!(arg, CallArg::Ciphertext(c) if !c.is_empty())));
    }

    #[test]
    fn test_uninitialized_encryption_surfaces_as_core_error() {
        let handle = EncryptionHandle::new();
        let err = builder().request_loan_approval(&handle, 5_000).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Encryption(EncryptionError::NotInitialized)
        ));
    }

    #[test]
    fn test_evaluate_has_no_arguments() {
        let call = builder().evaluate_credit_score().unwrap();
        assert!(call.args().is_empty());
        assert_eq!(call.target(), builder().contract());
    }
}

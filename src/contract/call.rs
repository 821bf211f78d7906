//! Pending calls against the credit-scoring contract and their ABI encoding

use crate::encryption::Ciphertext;
use crate::error::{CoreError, CoreResult};

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes};
use ethers::utils::id;
use serde::Serialize;
use std::fmt;

/// Contract entry points known at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CreditMethod {
    SubmitCreditData,
    EvaluateCreditScore,
    RequestLoanApproval,
    HasSubmittedCreditData,
    IsCreditEvaluated,
    GetEvaluationStats,
    GetEncryptedCreditScore,
    GetEncryptedLoanApproval,
}

/// ABI parameter kinds used by the credit contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bytes,
    Address,
}

impl CreditMethod {
    /// Solidity method name
    pub fn name(&self) -> &'static str {
        match self {
            CreditMethod::SubmitCreditData => "submitCreditData",
            CreditMethod::EvaluateCreditScore => "evaluateCreditScore",
            CreditMethod::RequestLoanApproval => "requestLoanApproval",
            CreditMethod::HasSubmittedCreditData => "hasSubmittedCreditData",
            CreditMethod::IsCreditEvaluated => "isCreditEvaluated",
            CreditMethod::GetEvaluationStats => "getEvaluationStats",
            CreditMethod::GetEncryptedCreditScore => "getEncryptedCreditScore",
            CreditMethod::GetEncryptedLoanApproval => "getEncryptedLoanApproval",
        }
    }

    /// Parameter list in declaration order
    pub fn params(&self) -> &'static [ParamKind] {
        match self {
            // income, outstanding debt, payment history
            CreditMethod::SubmitCreditData => &[ParamKind::Bytes, ParamKind::Bytes, ParamKind::Bytes],
            CreditMethod::EvaluateCreditScore => &[],
            // requested amount
            CreditMethod::RequestLoanApproval => &[ParamKind::Bytes],
            CreditMethod::HasSubmittedCreditData
            | CreditMethod::IsCreditEvaluated
            | CreditMethod::GetEncryptedCreditScore
            | CreditMethod::GetEncryptedLoanApproval => &[ParamKind::Address],
            CreditMethod::GetEvaluationStats => &[],
        }
    }

    /// Canonical signature, e.g. `requestLoanApproval(bytes)`
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self
            .params()
            .iter()
            .map(|p| match p {
                ParamKind::Bytes => "bytes",
                ParamKind::Address => "address",
            })
            .collect();
        format!("{}({})", self.name(), params.join(","))
    }

    /// 4-byte function selector
    pub fn selector(&self) -> [u8; 4] {
        id(self.signature())
    }

    /// Whether the method is a view accessor rather than a state-changing entry point
    pub fn is_read_only(&self) -> bool {
        !matches!(
            self,
            CreditMethod::SubmitCreditData
                | CreditMethod::EvaluateCreditScore
                | CreditMethod::RequestLoanApproval
        )
    }
}

impl fmt::Display for CreditMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single call argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    Ciphertext(Ciphertext),
    Address(Address),
}

impl CallArg {
    fn kind(&self) -> ParamKind {
        match self {
            CallArg::Ciphertext(_) => ParamKind::Bytes,
            CallArg::Address(_) => ParamKind::Address,
        }
    }

    fn to_token(&self) -> Token {
        match self {
            CallArg::Ciphertext(c) => Token::Bytes(c.as_bytes().to_vec()),
            CallArg::Address(a) => Token::Address(*a),
        }
    }
}

/// A call waiting to be estimated and submitted
///
/// Fields are private so a call cannot change between estimation and submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    target: Address,
    method: CreditMethod,
    args: Vec<CallArg>,
}

impl PendingCall {
    /// Create a call, checking the arguments against the method's parameter list
    pub fn new(target: Address, method: CreditMethod, args: Vec<CallArg>) -> CoreResult<Self> {
        let params = method.params();
        if params.len() != args.len() {
            return Err(CoreError::Contract(format!(
                "{} expects {} arguments, got {}",
                method,
                params.len(),
                args.len()
            )));
        }

        for (position, (param, arg)) in params.iter().zip(&args).enumerate() {
            if *param != arg.kind() {
                return Err(CoreError::Contract(format!(
                    "{} argument {} must be {:?}, got {:?}",
                    method,
                    position,
                    param,
                    arg.kind()
                )));
            }
        }

        Ok(Self {
            target,
            method,
            args,
        })
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn method(&self) -> CreditMethod {
        self.method
    }

    pub fn args(&self) -> &[CallArg] {
        &self.args
    }

    /// ABI-encoded calldata: selector followed by the encoded arguments
    pub fn calldata(&self) -> Bytes {
        let tokens: Vec<Token> = self.args.iter().map(CallArg::to_token).collect();
        let mut data = self.method.selector().to_vec();
        data.extend_from_slice(&abi::encode(&tokens));
        Bytes::from(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Address {
        "0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap()
    }

    #[test]
    fn test_signatures() {
        assert_eq!(
            CreditMethod::SubmitCreditData.signature(),
            "submitCreditData(bytes,bytes,bytes)"
        );
        assert_eq!(CreditMethod::EvaluateCreditScore.signature(), "evaluateCreditScore()");
        assert_eq!(
            CreditMethod::GetEncryptedCreditScore.signature(),
            "getEncryptedCreditScore(address)"
        );
    }

    #[test]
    fn test_read_only_accessors() {
        assert!(!CreditMethod::RequestLoanApproval.is_read_only());
        assert!(CreditMethod::HasSubmittedCreditData.is_read_only());
        assert!(CreditMethod::GetEvaluationStats.is_read_only());
    }

    #[test]
    fn test_argument_count_is_checked() {
        let err = PendingCall::new(contract(), CreditMethod::RequestLoanApproval, vec![])
            .unwrap_err();
        assert!(err.to_string().contains("expects 1 arguments"));
    }

    #[test]
    fn test_argument_kind_is_checked() {
        let err = PendingCall::new(
            contract(),
            CreditMethod::IsCreditEvaluated,
            vec![CallArg::Ciphertext(Ciphertext::from(vec![1, 2, 3]))],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Contract(_)));
    }

    #[test]
    fn test_calldata_starts_with_selector() {
        let account: Address = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();
        let call = PendingCall::new(
            contract(),
            CreditMethod::HasSubmittedCreditData,
            vec![CallArg::Address(account)],
        )
        .unwrap();

        let data = call.calldata();
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(&data[..4], &CreditMethod::HasSubmittedCreditData.selector());
        assert_eq!(&data[16..36], account.as_bytes());
    }

    #[test]
    fn test_no_argument_call_is_selector_only() {
        let call = PendingCall::new(contract(), CreditMethod::EvaluateCreditScore, vec![]).unwrap();
        assert_eq!(call.calldata().len(), 4);
    }
}

//! Ethers-backed ledger client with multi-RPC failover and a local signing wallet

use super::finality::{ReceiptSource, ReceiptWaiter};
use super::{FeeData, LedgerClient, LedgerError, LedgerResult, TxHash};
use crate::config::LedgerConfig;
use crate::contract::PendingCall;
use crate::error::{CoreError, CoreResult};
use crate::tx::{FeeEstimate, GasPrice};

use async_trait::async_trait;
use ethers::middleware::signer::SignerMiddlewareError;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider, ProviderError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, Bytes, Eip1559TransactionRequest, TransactionReceipt, TransactionRequest, U256,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Load the signing wallet from the environment variable named in configuration
pub fn load_wallet(env_var: &str) -> CoreResult<LocalWallet> {
    let key = std::env::var(env_var).map_err(|_| {
        CoreError::Wallet(format!("No wallet configured. Set {}", env_var))
    })?;
    key.trim()
        .parse::<LocalWallet>()
        .map_err(|e| CoreError::Wallet(format!("Invalid private key: {}", e)))
}

/// Map an ethers error to a raw ledger signal, keeping JSON-RPC codes
fn ledger_error<E: MiddlewareError>(e: E) -> LedgerError {
    match e.as_error_response() {
        Some(rpc) => LedgerError::from_rpc(rpc.code, rpc.message.clone()),
        None => LedgerError::Transport(e.to_string()),
    }
}

/// Ledger client over one or more HTTP endpoints of the same chain
///
/// Read queries rotate to the next endpoint on transport failure. Submission uses
/// the active endpoint only, so a broadcast is never repeated.
pub struct EthersLedger {
    chain_id: u64,
    clients: Vec<Client>,
    current: AtomicUsize,
    waiter: ReceiptWaiter,
}

impl EthersLedger {
    /// Connect to every configured endpoint that parses
    pub async fn connect(config: &LedgerConfig, wallet: LocalWallet) -> CoreResult<Self> {
        let wallet = wallet.with_chain_id(config.chain_id);
        let mut clients = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(config.poll_interval());
                    clients.push(SignerMiddleware::new(provider, wallet.clone()));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => warn!("Failed to create provider for {}: {}", url, e),
            }
        }

        if clients.is_empty() {
            return Err(CoreError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let ledger = Self {
            chain_id: config.chain_id,
            clients,
            current: AtomicUsize::new(0),
            waiter: ReceiptWaiter::new(config.poll_interval(), config.dropped_after_polls),
        };

        match ledger.read(|p| async move { p.get_chainid().await }).await {
            Ok(id) if id != U256::from(config.chain_id) => {
                return Err(CoreError::ChainConnection {
                    chain_id: config.chain_id,
                    message: format!("Node reports chain id {}", id),
                });
            }
            Ok(_) => info!(
                chain_id = config.chain_id,
                signer = ?wallet.address(),
                "Ledger connected"
            ),
            Err(e) => warn!(
                chain_id = config.chain_id,
                error = %e,
                "Could not verify chain id, continuing"
            ),
        }

        Ok(ledger)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address transactions are signed with
    pub fn signer_address(&self) -> Address {
        self.client().address()
    }

    fn client(&self) -> &Client {
        let idx = self.current.load(Ordering::Relaxed);
        &self.clients[idx % self.clients.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.clients.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    /// Run a read query, moving to the next endpoint on transport failure
    async fn read<T, F, Fut>(&self, query: F) -> LedgerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;
        for _ in 0..self.clients.len() {
            match query(self.client().inner().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => match ledger_error(e) {
                    LedgerError::Transport(message) => {
                        warn!("Query on chain {} failed: {}", self.chain_id, message);
                        self.failover();
                        last_error = Some(LedgerError::Transport(message));
                    }
                    other => return Err(other),
                },
            }
        }

        Err(last_error
            .unwrap_or_else(|| LedgerError::Transport("All providers failed".to_string())))
    }

    fn unpriced_request(&self, call: &PendingCall) -> TypedTransaction {
        TransactionRequest::new()
            .from(self.signer_address())
            .to(call.target())
            .data(call.calldata())
            .into()
    }

    fn priced_request(&self, call: &PendingCall, fees: &FeeEstimate) -> TypedTransaction {
        match fees.fees {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(self.signer_address())
                .to(call.target())
                .data(call.calldata())
                .gas(fees.gas_limit)
                .gas_price(price)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(self.signer_address())
                .to(call.target())
                .data(call.calldata())
                .gas(fees.gas_limit)
                .max_fee_per_gas(max_fee_per_gas)
                .max_priority_fee_per_gas(max_priority_fee_per_gas)
                .into(),
        }
    }
}

#[async_trait]
impl ReceiptSource for EthersLedger {
    async fn receipt(&self, tx_hash: TxHash) -> LedgerResult<Option<TransactionReceipt>> {
        self.read(|p| async move { p.get_transaction_receipt(tx_hash).await })
            .await
    }

    async fn is_known(&self, tx_hash: TxHash) -> LedgerResult<bool> {
        self.read(|p| async move { p.get_transaction(tx_hash).await })
            .await
            .map(|tx| tx.is_some())
    }

    async fn block_number(&self) -> LedgerResult<u64> {
        self.read(|p| async move { p.get_block_number().await })
            .await
            .map(|block| block.as_u64())
    }
}

#[async_trait]
impl LedgerClient for EthersLedger {
    async fn get_fee_data(&self) -> LedgerResult<FeeData> {
        let legacy = self.read(|p| async move { p.get_gas_price().await }).await;
        // Fails on chains without a base fee; the legacy price still applies there
        let dynamic = self
            .read(|p| async move { p.estimate_eip1559_fees(None).await })
            .await;

        match (legacy, dynamic) {
            (Err(e), Err(_)) => Err(e),
            (legacy, dynamic) => {
                let (max_fee, max_priority_fee) = match dynamic {
                    Ok((max_fee, priority)) => (Some(max_fee), Some(priority)),
                    Err(e) => {
                        debug!(error = %e, "No dynamic fee data");
                        (None, None)
                    }
                };
                Ok(FeeData {
                    legacy_price: legacy.ok(),
                    max_fee,
                    max_priority_fee,
                })
            }
        }
    }

    async fn estimate_gas(&self, call: &PendingCall) -> LedgerResult<U256> {
        let tx = self.unpriced_request(call);
        self.read(|p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }

    async fn submit(&self, call: &PendingCall, fees: &FeeEstimate) -> LedgerResult<TxHash> {
        let tx = self.priced_request(call, fees);
        match self.client().send_transaction(tx, None).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(SignerMiddlewareError::SignerError(e)) => Err(LedgerError::Signer(e.to_string())),
            Err(e) => Err(ledger_error(e)),
        }
    }

    async fn await_receipt(
        &self,
        tx_hash: TxHash,
        confirmations: u64,
    ) -> LedgerResult<TransactionReceipt> {
        self.waiter.wait(self, tx_hash, confirmations).await
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> LedgerResult<Option<TransactionReceipt>> {
        self.receipt(tx_hash).await
    }

    async fn call(&self, call: &PendingCall) -> LedgerResult<Bytes> {
        let tx = self.unpriced_request(call);
        self.read(|p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    // Well-known development key (anvil account 0)
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn rpc_error(code: i64, message: &str) -> ProviderError {
        ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(JsonRpcError {
            code,
            message: message.to_string(),
            data: None,
        })))
    }

    fn config(rpc_urls: Vec<&str>) -> LedgerConfig {
        LedgerConfig {
            chain_id: 31337,
            rpc_urls: rpc_urls.into_iter().map(String::from).collect(),
            contract_address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(),
            poll_interval_ms: 100,
            dropped_after_polls: 3,
        }
    }

    #[test]
    fn test_json_rpc_codes_are_preserved() {
        assert_eq!(
            ledger_error(rpc_error(4001, "User denied transaction signature")),
            LedgerError::UserRejected("User denied transaction signature".to_string())
        );
        assert_eq!(
            ledger_error(rpc_error(-32603, "Internal JSON-RPC error.")),
            LedgerError::NodeInternal("Internal JSON-RPC error.".to_string())
        );
        assert_eq!(
            ledger_error(rpc_error(3, "execution reverted: already evaluated")),
            LedgerError::Rpc {
                code: Some(3),
                message: "execution reverted: already evaluated".to_string(),
            }
        );
    }

    #[test]
    fn test_non_rpc_errors_are_transport() {
        let err = ledger_error(ProviderError::CustomError("connection refused".to_string()));
        assert!(matches!(err, LedgerError::Transport(_)));
    }

    #[test]
    fn test_load_wallet_from_env() {
        std::env::set_var("CREDIT_TX_TEST_WALLET_KEY", DEV_KEY);
        let wallet = load_wallet("CREDIT_TX_TEST_WALLET_KEY").unwrap();
        assert_eq!(
            wallet.address(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
                .parse::<Address>()
                .unwrap()
        );

        assert!(matches!(
            load_wallet("CREDIT_TX_TEST_WALLET_UNSET"),
            Err(CoreError::Wallet(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_requires_a_valid_endpoint() {
        let wallet: LocalWallet = DEV_KEY.parse().unwrap();
        let result = EthersLedger::connect(&config(vec!["not a url"]), wallet).await;
        assert!(matches!(
            result,
            Err(CoreError::ChainConnection { chain_id: 31337, .. })
        ));
    }
}

//! Chain registry: default implementations plus per-operation overrides.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::ChainNetwork;
use crate::model::{
    Authhead, Balance, Block, Coin, CoinListing, FeeRate, Transaction, Wallet, WalletAddress,
};
use crate::params::{
    AddressParams, AddressStreamParams, BlockListParams, BlockParams, BroadcastParams,
    CreateWalletParams, FeeParams, TransactionListParams, TxInBlockParams, TxParams,
    UpdateWalletParams, WalletAddressParams, WalletBalanceAtTimeParams, WalletParams,
    WalletTransactionParams, WalletUtxoParams,
};
use crate::service::{ChainStateService, Operation, ServiceError};
use crate::stream::RecordStream;

/// A registration the registry refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("chain {0} already has a default implementation")]
    DuplicateDefault(String),
    #[error("chain {0} has no default implementation to override")]
    MissingDefault(String),
    #[error("operation {operation} is already overridden for chain {chain}")]
    DuplicateOverride { chain: String, operation: Operation },
}

/// Where a resolved operation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Default,
    Override,
}

struct ServiceEntry {
    default: Arc<dyn ChainStateService>,
    overrides: BTreeMap<Operation, Arc<dyn ChainStateService>>,
}

/// Maps chain tickers to their service implementations.
///
/// Built once at startup, then shared read-only. Resolution is a map lookup
/// and never touches a collaborator.
#[derive(Default)]
pub struct ChainRegistry {
    chains: HashMap<String, ServiceEntry>,
}

impl ChainRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the default implementation for `chain`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateDefault`] if `chain` already has one.
    pub fn register(
        &mut self,
        chain: &str,
        service: Arc<dyn ChainStateService>,
    ) -> Result<(), RegistryError> {
        let chain = chain.to_uppercase();
        if self.chains.contains_key(&chain) {
            return Err(RegistryError::DuplicateDefault(chain));
        }
        self.chains.insert(
            chain,
            ServiceEntry {
                default: service,
                overrides: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Serves `operation` on `chain` from `service` instead of the default.
    ///
    /// # Errors
    ///
    /// Returns an error if `chain` has no default yet or `operation` is
    /// already overridden for it.
    pub fn register_override(
        &mut self,
        chain: &str,
        operation: Operation,
        service: Arc<dyn ChainStateService>,
    ) -> Result<(), RegistryError> {
        let chain = chain.to_uppercase();
        let Some(entry) = self.chains.get_mut(&chain) else {
            return Err(RegistryError::MissingDefault(chain));
        };
        if entry.overrides.contains_key(&operation) {
            return Err(RegistryError::DuplicateOverride { chain, operation });
        }
        entry.overrides.insert(operation, service);
        Ok(())
    }

    /// The effective implementation for `chain`. The network is not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnknownChain`] if no default is registered.
    pub fn resolve(&self, chain: &ChainNetwork) -> Result<ResolvedService<'_>, ServiceError> {
        self.chains
            .get_key_value(&chain.chain)
            .map(|(name, entry)| ResolvedService { chain: name, entry })
            .ok_or_else(|| ServiceError::UnknownChain(chain.chain.clone()))
    }

    /// Registered chain tickers, sorted.
    #[must_use]
    pub fn chains(&self) -> Vec<&str> {
        let mut chains: Vec<_> = self.chains.keys().map(String::as_str).collect();
        chains.sort_unstable();
        chains
    }
}

impl fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for chain in self.chains() {
            let overrides: Vec<_> = self.chains[chain].overrides.keys().collect();
            map.entry(&chain, &overrides);
        }
        map.finish()
    }
}

/// A chain's default implementation with its overrides applied.
#[derive(Clone, Copy)]
pub struct ResolvedService<'a> {
    chain: &'a str,
    entry: &'a ServiceEntry,
}

impl ResolvedService<'_> {
    #[must_use]
    pub const fn chain(&self) -> &str {
        self.chain
    }

    fn target(&self, operation: Operation) -> &dyn ChainStateService {
        self.entry
            .overrides
            .get(&operation)
            .map_or(&*self.entry.default, Arc::as_ref)
    }

    /// Every operation and where it is served from.
    #[must_use]
    pub fn bindings(&self) -> Vec<(Operation, Binding)> {
        Operation::ALL
            .into_iter()
            .map(|operation| {
                let binding = if self.entry.overrides.contains_key(&operation) {
                    Binding::Override
                } else {
                    Binding::Default
                };
                (operation, binding)
            })
            .collect()
    }
}

impl fmt::Debug for ResolvedService<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedService")
            .field("chain", &self.chain)
            .field("overrides", &self.entry.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ChainStateService for ResolvedService<'_> {
    async fn get_balance_for_address(&self, params: &AddressParams) -> Result<Balance, ServiceError> {
        self.target(Operation::GetBalanceForAddress)
            .get_balance_for_address(params)
            .await
    }

    async fn get_block(&self, params: &BlockParams) -> Result<Option<Block>, ServiceError> {
        self.target(Operation::GetBlock).get_block(params).await
    }

    fn stream_blocks(&self, params: &BlockListParams) -> Result<RecordStream<Block>, ServiceError> {
        self.target(Operation::StreamBlocks).stream_blocks(params)
    }

    async fn get_local_tip(&self, chain: &ChainNetwork) -> Result<Option<Block>, ServiceError> {
        self.target(Operation::GetLocalTip).get_local_tip(chain).await
    }

    async fn get_fee(&self, params: &FeeParams) -> Result<FeeRate, ServiceError> {
        self.target(Operation::GetFee).get_fee(params).await
    }

    async fn broadcast_transaction(&self, params: &BroadcastParams) -> Result<String, ServiceError> {
        self.target(Operation::BroadcastTransaction)
            .broadcast_transaction(params)
            .await
    }

    fn stream_transactions(
        &self,
        params: &TransactionListParams,
    ) -> Result<RecordStream<Transaction>, ServiceError> {
        self.target(Operation::StreamTransactions)
            .stream_transactions(params)
    }

    async fn get_transaction(&self, params: &TxParams) -> Result<Option<Transaction>, ServiceError> {
        self.target(Operation::GetTransaction)
            .get_transaction(params)
            .await
    }

    async fn get_raw_transaction(
        &self,
        params: &TxInBlockParams,
    ) -> Result<Option<Transaction>, ServiceError> {
        self.target(Operation::GetRawTransaction)
            .get_raw_transaction(params)
            .await
    }

    async fn get_authhead(&self, params: &TxParams) -> Result<Option<Authhead>, ServiceError> {
        self.target(Operation::GetAuthhead).get_authhead(params).await
    }

    async fn get_coins_for_tx(&self, params: &TxParams) -> Result<CoinListing, ServiceError> {
        self.target(Operation::GetCoinsForTx)
            .get_coins_for_tx(params)
            .await
    }

    fn stream_address_utxos(
        &self,
        params: &AddressStreamParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        self.target(Operation::StreamAddressUtxos)
            .stream_address_utxos(params)
    }

    fn stream_address_transactions(
        &self,
        params: &AddressStreamParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        self.target(Operation::StreamAddressTransactions)
            .stream_address_transactions(params)
    }

    async fn create_wallet(&self, params: CreateWalletParams) -> Result<Wallet, ServiceError> {
        self.target(Operation::CreateWallet)
            .create_wallet(params)
            .await
    }

    async fn get_wallet(&self, params: &WalletParams) -> Result<Option<Wallet>, ServiceError> {
        self.target(Operation::GetWallet).get_wallet(params).await
    }

    async fn get_wallet_balance(&self, wallet: &Wallet) -> Result<Balance, ServiceError> {
        self.target(Operation::GetWalletBalance)
            .get_wallet_balance(wallet)
            .await
    }

    async fn update_wallet(
        &self,
        wallet: &Wallet,
        params: &UpdateWalletParams,
    ) -> Result<Vec<WalletAddress>, ServiceError> {
        self.target(Operation::UpdateWallet)
            .update_wallet(wallet, params)
            .await
    }

    async fn get_wallet_balance_at_time(
        &self,
        wallet: &Wallet,
        params: &WalletBalanceAtTimeParams,
    ) -> Result<Balance, ServiceError> {
        self.target(Operation::GetWalletBalanceAtTime)
            .get_wallet_balance_at_time(wallet, params)
            .await
    }

    fn stream_wallet_addresses(
        &self,
        wallet: &Wallet,
        params: &WalletAddressParams,
    ) -> Result<RecordStream<WalletAddress>, ServiceError> {
        self.target(Operation::StreamWalletAddresses)
            .stream_wallet_addresses(wallet, params)
    }

    fn stream_wallet_utxos(
        &self,
        wallet: &Wallet,
        params: &WalletUtxoParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        self.target(Operation::StreamWalletUtxos)
            .stream_wallet_utxos(wallet, params)
    }

    fn stream_wallet_transactions(
        &self,
        wallet: &Wallet,
        params: &WalletTransactionParams,
    ) -> Result<RecordStream<Transaction>, ServiceError> {
        self.target(Operation::StreamWalletTransactions)
            .stream_wallet_transactions(wallet, params)
    }
}

//! The chain-state service contract.
//!
//! - [`ChainStateService`]: the operations every chain implementation offers.
//! - [`Operation`]: names of those operations, the keys of per-chain overrides.
//! - [`utxo`]: the default implementation for bitcoin-derived chains.
//! - [`fee`]: fee estimation overrides for chain families whose node exposes
//!   a different RPC method.

mod error;
pub mod fee;
pub mod utxo;

use std::fmt;

use async_trait::async_trait;

pub use self::error::{FetchError, NotFound, ServiceError};
use crate::chain::ChainNetwork;
use crate::model::{
    Authhead, Balance, Block, Coin, CoinListing, FeeRate, Transaction, Wallet, WalletAddress,
};
use crate::params::{
    AddressParams, AddressStreamParams, BlockListParams, BlockParams, BroadcastParams,
    CreateWalletParams, FeeParams, TransactionListParams, TxInBlockParams, TxParams,
    UpdateWalletParams, WalletAddressParams, WalletBalanceAtTimeParams, WalletParams,
    WalletTransactionParams, WalletUtxoParams,
};
use crate::stream::RecordStream;

/// Name of a single operation of [`ChainStateService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    GetBalanceForAddress,
    GetBlock,
    StreamBlocks,
    GetLocalTip,
    GetFee,
    BroadcastTransaction,
    StreamTransactions,
    GetTransaction,
    GetRawTransaction,
    GetAuthhead,
    GetCoinsForTx,
    StreamAddressUtxos,
    StreamAddressTransactions,
    CreateWallet,
    GetWallet,
    GetWalletBalance,
    UpdateWallet,
    GetWalletBalanceAtTime,
    StreamWalletAddresses,
    StreamWalletUtxos,
    StreamWalletTransactions,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 21] = [
        Self::GetBalanceForAddress,
        Self::GetBlock,
        Self::StreamBlocks,
        Self::GetLocalTip,
        Self::GetFee,
        Self::BroadcastTransaction,
        Self::StreamTransactions,
        Self::GetTransaction,
        Self::GetRawTransaction,
        Self::GetAuthhead,
        Self::GetCoinsForTx,
        Self::StreamAddressUtxos,
        Self::StreamAddressTransactions,
        Self::CreateWallet,
        Self::GetWallet,
        Self::GetWalletBalance,
        Self::UpdateWallet,
        Self::GetWalletBalanceAtTime,
        Self::StreamWalletAddresses,
        Self::StreamWalletUtxos,
        Self::StreamWalletTransactions,
    ];

    /// Wire name of the operation.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetBalanceForAddress => "getBalanceForAddress",
            Self::GetBlock => "getBlock",
            Self::StreamBlocks => "streamBlocks",
            Self::GetLocalTip => "getLocalTip",
            Self::GetFee => "getFee",
            Self::BroadcastTransaction => "broadcastTransaction",
            Self::StreamTransactions => "streamTransactions",
            Self::GetTransaction => "getTransaction",
            Self::GetRawTransaction => "getRawTransaction",
            Self::GetAuthhead => "getAuthhead",
            Self::GetCoinsForTx => "getCoinsForTx",
            Self::StreamAddressUtxos => "streamAddressUtxos",
            Self::StreamAddressTransactions => "streamAddressTransactions",
            Self::CreateWallet => "createWallet",
            Self::GetWallet => "getWallet",
            Self::GetWalletBalance => "getWalletBalance",
            Self::UpdateWallet => "updateWallet",
            Self::GetWalletBalanceAtTime => "getWalletBalanceAtTime",
            Self::StreamWalletAddresses => "streamWalletAddresses",
            Self::StreamWalletUtxos => "streamWalletUtxos",
            Self::StreamWalletTransactions => "streamWalletTransactions",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations a chain implementation provides.
///
/// Every method defaults to [`ServiceError::Unsupported`], so an override
/// object only implements the operations it specializes. Default chain
/// implementations implement all of them.
///
/// Lookups return `Ok(None)` when nothing matched; turning that into a 404 is
/// the caller's decision. Streaming methods return lazily evaluated
/// [`RecordStream`]s ordered by the request's paging options.
#[async_trait]
pub trait ChainStateService: Send + Sync {
    async fn get_balance_for_address(&self, _params: &AddressParams) -> Result<Balance, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetBalanceForAddress))
    }

    async fn get_block(&self, _params: &BlockParams) -> Result<Option<Block>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetBlock))
    }

    fn stream_blocks(&self, _params: &BlockListParams) -> Result<RecordStream<Block>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::StreamBlocks))
    }

    async fn get_local_tip(&self, _chain: &ChainNetwork) -> Result<Option<Block>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetLocalTip))
    }

    async fn get_fee(&self, _params: &FeeParams) -> Result<FeeRate, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetFee))
    }

    /// Returns the txid reported by the node.
    async fn broadcast_transaction(&self, _params: &BroadcastParams) -> Result<String, ServiceError> {
        Err(ServiceError::Unsupported(Operation::BroadcastTransaction))
    }

    fn stream_transactions(
        &self,
        _params: &TransactionListParams,
    ) -> Result<RecordStream<Transaction>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::StreamTransactions))
    }

    async fn get_transaction(&self, _params: &TxParams) -> Result<Option<Transaction>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetTransaction))
    }

    async fn get_raw_transaction(
        &self,
        _params: &TxInBlockParams,
    ) -> Result<Option<Transaction>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetRawTransaction))
    }

    async fn get_authhead(&self, _params: &TxParams) -> Result<Option<Authhead>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetAuthhead))
    }

    async fn get_coins_for_tx(&self, _params: &TxParams) -> Result<CoinListing, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetCoinsForTx))
    }

    fn stream_address_utxos(
        &self,
        _params: &AddressStreamParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::StreamAddressUtxos))
    }

    fn stream_address_transactions(
        &self,
        _params: &AddressStreamParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::StreamAddressTransactions))
    }

    async fn create_wallet(&self, _params: CreateWalletParams) -> Result<Wallet, ServiceError> {
        Err(ServiceError::Unsupported(Operation::CreateWallet))
    }

    async fn get_wallet(&self, _params: &WalletParams) -> Result<Option<Wallet>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetWallet))
    }

    async fn get_wallet_balance(&self, _wallet: &Wallet) -> Result<Balance, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetWalletBalance))
    }

    /// Returns the address memberships that were not already present.
    async fn update_wallet(
        &self,
        _wallet: &Wallet,
        _params: &UpdateWalletParams,
    ) -> Result<Vec<WalletAddress>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::UpdateWallet))
    }

    async fn get_wallet_balance_at_time(
        &self,
        _wallet: &Wallet,
        _params: &WalletBalanceAtTimeParams,
    ) -> Result<Balance, ServiceError> {
        Err(ServiceError::Unsupported(Operation::GetWalletBalanceAtTime))
    }

    fn stream_wallet_addresses(
        &self,
        _wallet: &Wallet,
        _params: &WalletAddressParams,
    ) -> Result<RecordStream<WalletAddress>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::StreamWalletAddresses))
    }

    fn stream_wallet_utxos(
        &self,
        _wallet: &Wallet,
        _params: &WalletUtxoParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::StreamWalletUtxos))
    }

    fn stream_wallet_transactions(
        &self,
        _wallet: &Wallet,
        _params: &WalletTransactionParams,
    ) -> Result<RecordStream<Transaction>, ServiceError> {
        Err(ServiceError::Unsupported(Operation::StreamWalletTransactions))
    }
}

//! Storage collaborator boundary.
//!
//! The chain-state core never queries a database itself. It asks a [`Storage`]
//! for single records or for ordered [`RecordStream`]s, passing along the
//! filter and the request's [`StreamingFindOptions`]. How the query executes
//! is the backend's business.
//!
//! [`MemoryStore`] is the in-process backend used by tests and by `serve` when
//! a fixtures file is configured.

mod memory;

use async_trait::async_trait;

pub use self::memory::{Fixtures, MemoryStore};
use crate::chain::ChainNetwork;
use crate::model::{Block, Coin, Transaction, Wallet, WalletAddress};
use crate::params::BlockSelector;
use crate::service::FetchError;
use crate::stream::{RecordStream, StreamingFindOptions};

/// Which transactions a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFilter {
    /// Transactions of one block; set fields must all match.
    Block {
        height: Option<i64>,
        hash: Option<String>,
    },
    /// Transactions touching a wallet, optionally within a height window.
    Wallet {
        wallet_id: String,
        start_block: Option<i64>,
        end_block: Option<i64>,
        include_mempool: bool,
    },
}

impl TransactionFilter {
    /// Whether `tx` belongs to the listing.
    #[must_use]
    pub fn matches(&self, tx: &Transaction) -> bool {
        match self {
            Self::Block { height, hash } => {
                height.is_none_or(|h| tx.block_height == h)
                    && hash
                        .as_deref()
                        .is_none_or(|h| tx.block_hash.as_deref() == Some(h))
            }
            Self::Wallet {
                wallet_id,
                start_block,
                end_block,
                include_mempool,
            } => {
                if !tx.wallets.iter().any(|w| w == wallet_id) {
                    return false;
                }
                if tx.block_height < 0 {
                    return *include_mempool;
                }
                start_block.is_none_or(|start| tx.block_height >= start)
                    && end_block.is_none_or(|end| tx.block_height <= end)
            }
        }
    }
}

/// Which coins a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinFilter {
    Address { address: String, unspent_only: bool },
    Wallet { wallet_id: String, include_spent: bool },
    /// Outputs created by a transaction.
    MintedBy(String),
    /// Outputs consumed by a transaction.
    SpentBy(String),
}

impl CoinFilter {
    /// Whether `coin` belongs to the listing.
    #[must_use]
    pub fn matches(&self, coin: &Coin) -> bool {
        match self {
            Self::Address {
                address,
                unspent_only,
            } => coin.address == *address && !(*unspent_only && coin.is_spent()),
            Self::Wallet {
                wallet_id,
                include_spent,
            } => coin.wallets.iter().any(|w| w == wallet_id) && (*include_spent || !coin.is_spent()),
            Self::MintedBy(txid) => coin.mint_txid == *txid,
            Self::SpentBy(txid) => coin.spent_txid.as_deref() == Some(txid),
        }
    }
}

/// Indexed chain data, queried per `(chain, network)`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn transaction(
        &self,
        chain: &ChainNetwork,
        txid: &str,
    ) -> Result<Option<Transaction>, FetchError>;

    async fn block(
        &self,
        chain: &ChainNetwork,
        selector: &BlockSelector,
    ) -> Result<Option<Block>, FetchError>;

    /// Highest block indexed for the chain.
    async fn tip(&self, chain: &ChainNetwork) -> Result<Option<Block>, FetchError>;

    /// Highest block mined at or before `time` (unix seconds).
    async fn block_at_time(&self, chain: &ChainNetwork, time: i64)
    -> Result<Option<Block>, FetchError>;

    /// A single output by outpoint.
    async fn coin(
        &self,
        chain: &ChainNetwork,
        txid: &str,
        vout: u32,
    ) -> Result<Option<Coin>, FetchError>;

    fn transactions(
        &self,
        chain: &ChainNetwork,
        filter: TransactionFilter,
        options: &StreamingFindOptions,
    ) -> RecordStream<Transaction>;

    /// Blocks above `since_height`, when given.
    fn blocks(
        &self,
        chain: &ChainNetwork,
        since_height: Option<i64>,
        options: &StreamingFindOptions,
    ) -> RecordStream<Block>;

    fn coins(
        &self,
        chain: &ChainNetwork,
        filter: CoinFilter,
        options: &StreamingFindOptions,
    ) -> RecordStream<Coin>;

    async fn wallet(&self, chain: &ChainNetwork, pub_key: &str)
    -> Result<Option<Wallet>, FetchError>;

    /// Persists a new wallet and returns it with its assigned id.
    ///
    /// Returns `None`, storing nothing, when the chain already has a wallet
    /// with the same public key. The check and the insert are atomic.
    async fn insert_wallet(&self, wallet: Wallet) -> Result<Option<Wallet>, FetchError>;

    /// Adds `addresses` to `wallet` and returns the memberships that were new.
    ///
    /// Coins paying a new address, and the transactions minting or spending
    /// them, become part of the wallet's listings.
    async fn add_wallet_addresses(
        &self,
        wallet: &Wallet,
        addresses: &[String],
    ) -> Result<Vec<WalletAddress>, FetchError>;

    fn wallet_addresses(
        &self,
        chain: &ChainNetwork,
        wallet_id: &str,
        options: &StreamingFindOptions,
    ) -> RecordStream<WalletAddress>;
}

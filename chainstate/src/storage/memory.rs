//! In-memory [`Storage`] backend.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use super::{CoinFilter, Storage, TransactionFilter};
use crate::chain::ChainNetwork;
use crate::error::Error;
use crate::model::{Block, Coin, Transaction, Wallet, WalletAddress};
use crate::params::BlockSelector;
use crate::service::FetchError;
use crate::stream::{Direction, Pageable, PagingField, RecordStream, StreamingFindOptions};

/// Seed data for a [`MemoryStore`], read from a JSON document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fixtures {
    pub transactions: Vec<Transaction>,
    pub blocks: Vec<Block>,
    pub coins: Vec<Coin>,
    pub wallets: Vec<Wallet>,
    pub wallet_addresses: Vec<WalletAddress>,
}

impl Fixtures {
    /// Reads fixtures from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_with(format!("failed to read fixtures '{}'", path.display()), e))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::config_with(format!("failed to parse fixtures '{}'", path.display()), e))
    }
}

/// Storage backed by in-process vectors.
///
/// Queries scan, filter and sort a snapshot of the matching records, the way
/// a database would with a sort on the paging field. Blocks are fixed at
/// construction; wallets, their addresses and the wallet tags on coins and
/// transactions change as wallets are created and updated.
#[derive(Debug, Default)]
pub struct MemoryStore {
    transactions: RwLock<Vec<Transaction>>,
    blocks: Vec<Block>,
    coins: RwLock<Vec<Coin>>,
    wallets: RwLock<Vec<Wallet>>,
    wallet_addresses: RwLock<Vec<WalletAddress>>,
    fault: Option<FetchError>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(fixtures: Fixtures) -> Self {
        Self {
            transactions: RwLock::new(fixtures.transactions),
            blocks: fixtures.blocks,
            coins: RwLock::new(fixtures.coins),
            wallets: RwLock::new(fixtures.wallets),
            wallet_addresses: RwLock::new(fixtures.wallet_addresses),
            fault: None,
        }
    }

    /// A store whose every query fails with `message`.
    #[cfg(test)]
    pub fn failing(message: &str) -> Self {
        Self {
            fault: Some(FetchError::new(message)),
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), FetchError> {
        self.fault.clone().map_or(Ok(()), Err)
    }

    /// Clones the rows of `table` that satisfy `keep`.
    fn select<T: Clone>(
        &self,
        table: &RwLock<Vec<T>>,
        keep: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, FetchError> {
        self.check()?;
        Ok(read(table)?.iter().filter(|row| keep(*row)).cloned().collect())
    }
}

fn read<T>(table: &RwLock<Vec<T>>) -> Result<RwLockReadGuard<'_, Vec<T>>, FetchError> {
    table
        .read()
        .map_err(|_| FetchError::new("memory store lock poisoned"))
}

fn write<T>(table: &RwLock<Vec<T>>) -> Result<RwLockWriteGuard<'_, Vec<T>>, FetchError> {
    table
        .write()
        .map_err(|_| FetchError::new("memory store lock poisoned"))
}

fn on_chain(chain: &ChainNetwork, record_chain: &str, record_network: &str) -> bool {
    chain.chain == record_chain && chain.network == record_network
}

fn tag(wallets: &mut Vec<String>, wallet_id: &str) {
    if !wallets.iter().any(|w| w == wallet_id) {
        wallets.push(wallet_id.to_owned());
    }
}

/// Sorts, bounds and streams the matching records.
fn query<T>(matches: Result<Vec<T>, FetchError>, options: &StreamingFindOptions) -> RecordStream<T>
where
    T: Pageable + Send + 'static,
{
    let mut matches = match matches {
        Ok(matches) => matches,
        Err(error) => return stream::once(future::ready(Err(error))).boxed(),
    };
    matches.retain(|record| options.is_beyond(record));
    matches.sort_by_cached_key(|record| (record.cursor(options.paging), record.cursor(PagingField::Id)));
    if options.direction == Direction::Descending {
        matches.reverse();
    }
    if let Some(limit) = options.limit {
        matches.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    stream::iter(matches.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl Storage for MemoryStore {
    async fn transaction(
        &self,
        chain: &ChainNetwork,
        txid: &str,
    ) -> Result<Option<Transaction>, FetchError> {
        self.check()?;
        Ok(read(&self.transactions)?
            .iter()
            .find(|tx| tx.txid == txid && on_chain(chain, &tx.chain, &tx.network))
            .cloned())
    }

    async fn block(
        &self,
        chain: &ChainNetwork,
        selector: &BlockSelector,
    ) -> Result<Option<Block>, FetchError> {
        self.check()?;
        Ok(self
            .blocks
            .iter()
            .filter(|block| on_chain(chain, &block.chain, &block.network))
            .find(|block| match selector {
                BlockSelector::Hash(hash) => block.hash == *hash,
                BlockSelector::Height(height) => block.height.unsigned_abs() == *height && block.height >= 0,
            })
            .cloned())
    }

    async fn tip(&self, chain: &ChainNetwork) -> Result<Option<Block>, FetchError> {
        self.check()?;
        Ok(self
            .blocks
            .iter()
            .filter(|block| on_chain(chain, &block.chain, &block.network))
            .max_by_key(|block| block.height)
            .cloned())
    }

    async fn block_at_time(
        &self,
        chain: &ChainNetwork,
        time: i64,
    ) -> Result<Option<Block>, FetchError> {
        self.check()?;
        Ok(self
            .blocks
            .iter()
            .filter(|block| on_chain(chain, &block.chain, &block.network))
            .filter(|block| block.height >= 0 && block.time <= time)
            .max_by_key(|block| block.height)
            .cloned())
    }

    async fn coin(
        &self,
        chain: &ChainNetwork,
        txid: &str,
        vout: u32,
    ) -> Result<Option<Coin>, FetchError> {
        self.check()?;
        Ok(read(&self.coins)?
            .iter()
            .find(|coin| {
                coin.mint_txid == txid
                    && coin.mint_index == vout
                    && on_chain(chain, &coin.chain, &coin.network)
            })
            .cloned())
    }

    fn transactions(
        &self,
        chain: &ChainNetwork,
        filter: TransactionFilter,
        options: &StreamingFindOptions,
    ) -> RecordStream<Transaction> {
        let matches = self.select(&self.transactions, |tx| {
            on_chain(chain, &tx.chain, &tx.network) && filter.matches(tx)
        });
        query(matches, options)
    }

    fn blocks(
        &self,
        chain: &ChainNetwork,
        since_height: Option<i64>,
        options: &StreamingFindOptions,
    ) -> RecordStream<Block> {
        let matches = self.check().map(|()| {
            self.blocks
                .iter()
                .filter(|block| on_chain(chain, &block.chain, &block.network))
                .filter(|block| since_height.is_none_or(|since| block.height > since))
                .cloned()
                .collect()
        });
        query(matches, options)
    }

    fn coins(
        &self,
        chain: &ChainNetwork,
        filter: CoinFilter,
        options: &StreamingFindOptions,
    ) -> RecordStream<Coin> {
        let matches = self.select(&self.coins, |coin| {
            on_chain(chain, &coin.chain, &coin.network) && filter.matches(coin)
        });
        query(matches, options)
    }

    async fn wallet(
        &self,
        chain: &ChainNetwork,
        pub_key: &str,
    ) -> Result<Option<Wallet>, FetchError> {
        self.check()?;
        Ok(read(&self.wallets)?
            .iter()
            .find(|w| w.pub_key == pub_key && on_chain(chain, &w.chain, &w.network))
            .cloned())
    }

    async fn insert_wallet(&self, mut wallet: Wallet) -> Result<Option<Wallet>, FetchError> {
        self.check()?;
        let mut wallets = write(&self.wallets)?;
        let taken = wallets.iter().any(|w| {
            w.pub_key == wallet.pub_key && w.chain == wallet.chain && w.network == wallet.network
        });
        if taken {
            return Ok(None);
        }
        if wallet.id.is_empty() {
            wallet.id = format!("{:024x}", wallets.len() + 1);
        }
        wallets.push(wallet.clone());
        Ok(Some(wallet))
    }

    async fn add_wallet_addresses(
        &self,
        wallet: &Wallet,
        addresses: &[String],
    ) -> Result<Vec<WalletAddress>, FetchError> {
        self.check()?;
        let chain = ChainNetwork::new(&wallet.chain, &wallet.network);
        let added = {
            let mut members = write(&self.wallet_addresses)?;
            let mut added: Vec<WalletAddress> = Vec::new();
            for address in addresses {
                let known = members.iter().chain(&added).any(|member| {
                    member.wallet == wallet.id
                        && member.address == *address
                        && on_chain(&chain, &member.chain, &member.network)
                });
                if !known {
                    added.push(WalletAddress {
                        wallet: wallet.id.clone(),
                        address: address.clone(),
                        chain: chain.chain.clone(),
                        network: chain.network.clone(),
                    });
                }
            }
            members.extend(added.iter().cloned());
            added
        };

        let mut touched = HashSet::new();
        for coin in write(&self.coins)?.iter_mut().filter(|coin| {
            on_chain(&chain, &coin.chain, &coin.network)
                && added.iter().any(|member| member.address == coin.address)
        }) {
            tag(&mut coin.wallets, &wallet.id);
            touched.insert(coin.mint_txid.clone());
            touched.extend(coin.spent_txid.clone());
        }
        for tx in write(&self.transactions)?
            .iter_mut()
            .filter(|tx| on_chain(&chain, &tx.chain, &tx.network) && touched.contains(&tx.txid))
        {
            tag(&mut tx.wallets, &wallet.id);
        }
        Ok(added)
    }

    fn wallet_addresses(
        &self,
        chain: &ChainNetwork,
        wallet_id: &str,
        options: &StreamingFindOptions,
    ) -> RecordStream<WalletAddress> {
        let matches = self.select(&self.wallet_addresses, |a| {
            a.wallet == wallet_id && on_chain(chain, &a.chain, &a.network)
        });
        query(matches, options)
    }
}

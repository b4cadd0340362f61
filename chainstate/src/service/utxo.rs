//! Default [`ChainStateService`] for bitcoin-derived UTXO chains.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ChainStateService, FetchError, ServiceError};
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
use crate::rpc::NodePool;
use crate::storage::{CoinFilter, Storage, TransactionFilter};
use crate::stream::{Direction, RecordStream, StreamingFindOptions};

/// Reply of `estimatesmartfee`. `feerate` is absent when the node has too
/// little data, in which case `errors` says why.
#[derive(Debug, Deserialize)]
struct SmartFee {
    feerate: Option<f64>,
    blocks: Option<u32>,
}

/// Chain state served from indexed storage plus the chain's nodes.
#[derive(Clone)]
pub struct UtxoChainState {
    storage: Arc<dyn Storage>,
    nodes: NodePool,
}

impl UtxoChainState {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, nodes: NodePool) -> Self {
        Self { storage, nodes }
    }

    async fn collect_coins(
        &self,
        chain: &ChainNetwork,
        filter: CoinFilter,
    ) -> Result<Vec<Coin>, FetchError> {
        let mut options = StreamingFindOptions::unbounded::<Coin>();
        options.direction = Direction::Ascending;
        self.storage.coins(chain, filter, &options).try_collect().await
    }

    async fn unspent_balance(
        &self,
        chain: &ChainNetwork,
        filter: CoinFilter,
    ) -> Result<Balance, FetchError> {
        self.storage
            .coins(chain, filter, &StreamingFindOptions::unbounded::<Coin>())
            .try_fold(Balance::default(), |mut balance, coin| async move {
                balance.add(&coin);
                Ok::<_, FetchError>(balance)
            })
            .await
    }
}

impl std::fmt::Debug for UtxoChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtxoChainState")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChainStateService for UtxoChainState {
    async fn get_balance_for_address(&self, params: &AddressParams) -> Result<Balance, ServiceError> {
        let filter = CoinFilter::Address {
            address: params.address.clone(),
            unspent_only: true,
        };
        Ok(self.unspent_balance(&params.chain, filter).await?)
    }

    async fn get_block(&self, params: &BlockParams) -> Result<Option<Block>, ServiceError> {
        Ok(self.storage.block(&params.chain, &params.selector).await?)
    }

    fn stream_blocks(&self, params: &BlockListParams) -> Result<RecordStream<Block>, ServiceError> {
        Ok(self
            .storage
            .blocks(&params.chain, params.since_block, &params.options))
    }

    async fn get_local_tip(&self, chain: &ChainNetwork) -> Result<Option<Block>, ServiceError> {
        Ok(self.storage.tip(chain).await?)
    }

    async fn get_fee(&self, params: &FeeParams) -> Result<FeeRate, ServiceError> {
        let node = self.nodes.node(&params.chain)?;
        let reply = node
            .call("estimatesmartfee", vec![json!(params.target)])
            .await?;
        let estimate: SmartFee = serde_json::from_value(reply)
            .map_err(|e| FetchError::with("unexpected estimatesmartfee reply", e))?;
        Ok(FeeRate {
            feerate: estimate.feerate.unwrap_or(-1.0),
            blocks: estimate.blocks,
        })
    }

    async fn broadcast_transaction(&self, params: &BroadcastParams) -> Result<String, ServiceError> {
        let node = self.nodes.node(&params.chain)?;
        let reply = node
            .call("sendrawtransaction", vec![Value::String(params.raw_tx.clone())])
            .await?;
        match reply {
            Value::String(txid) => Ok(txid),
            other => Err(FetchError::new(format!("unexpected sendrawtransaction reply: {other}")).into()),
        }
    }

    fn stream_transactions(
        &self,
        params: &TransactionListParams,
    ) -> Result<RecordStream<Transaction>, ServiceError> {
        let filter = TransactionFilter::Block {
            height: params.block_height,
            hash: params.block_hash.clone(),
        };
        Ok(self
            .storage
            .transactions(&params.chain, filter, &params.options))
    }

    async fn get_transaction(&self, params: &TxParams) -> Result<Option<Transaction>, ServiceError> {
        Ok(self.storage.transaction(&params.chain, &params.txid).await?)
    }

    async fn get_raw_transaction(
        &self,
        params: &TxInBlockParams,
    ) -> Result<Option<Transaction>, ServiceError> {
        let tx = self.storage.transaction(&params.chain, &params.txid).await?;
        Ok(tx.filter(|tx| tx.block_hash.as_deref() == Some(params.block_hash.as_str())))
    }

    async fn get_authhead(&self, params: &TxParams) -> Result<Option<Authhead>, ServiceError> {
        let chain = &params.chain;
        let Some(mut output) = self.storage.coin(chain, &params.txid, 0).await? else {
            return Ok(None);
        };
        let mut seen = HashSet::from([params.txid.clone()]);
        let mut identity_outputs = Vec::new();
        loop {
            let spender = output.spent_txid.clone();
            identity_outputs.push(output);
            let Some(spender) = spender.filter(|txid| seen.insert(txid.clone())) else {
                break;
            };
            match self.storage.coin(chain, &spender, 0).await? {
                Some(next) => output = next,
                None => break,
            }
        }
        debug!(authbase = %params.txid, depth = identity_outputs.len(), "resolved authhead");
        Ok(Some(Authhead {
            chain: chain.chain.clone(),
            network: chain.network.clone(),
            authbase: params.txid.clone(),
            identity_outputs,
        }))
    }

    async fn get_coins_for_tx(&self, params: &TxParams) -> Result<CoinListing, ServiceError> {
        let inputs = self
            .collect_coins(&params.chain, CoinFilter::SpentBy(params.txid.clone()))
            .await?;
        let outputs = self
            .collect_coins(&params.chain, CoinFilter::MintedBy(params.txid.clone()))
            .await?;
        Ok(CoinListing { inputs, outputs })
    }

    fn stream_address_utxos(
        &self,
        params: &AddressStreamParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        let filter = CoinFilter::Address {
            address: params.address.clone(),
            unspent_only: params.unspent,
        };
        Ok(self.storage.coins(&params.chain, filter, &params.options))
    }

    fn stream_address_transactions(
        &self,
        params: &AddressStreamParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        let filter = CoinFilter::Address {
            address: params.address.clone(),
            unspent_only: false,
        };
        Ok(self.storage.coins(&params.chain, filter, &params.options))
    }

    async fn create_wallet(&self, params: CreateWalletParams) -> Result<Wallet, ServiceError> {
        self.storage
            .insert_wallet(params.wallet)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Wallet already exists".to_owned()))
    }

    async fn get_wallet(&self, params: &WalletParams) -> Result<Option<Wallet>, ServiceError> {
        Ok(self.storage.wallet(&params.chain, &params.pub_key).await?)
    }

    async fn get_wallet_balance(&self, wallet: &Wallet) -> Result<Balance, ServiceError> {
        let chain = ChainNetwork::new(&wallet.chain, &wallet.network);
        let filter = CoinFilter::Wallet {
            wallet_id: wallet.id.clone(),
            include_spent: false,
        };
        Ok(self.unspent_balance(&chain, filter).await?)
    }

    async fn update_wallet(
        &self,
        wallet: &Wallet,
        params: &UpdateWalletParams,
    ) -> Result<Vec<WalletAddress>, ServiceError> {
        let added = self
            .storage
            .add_wallet_addresses(wallet, &params.addresses)
            .await?;
        debug!(
            wallet = %wallet.id,
            requested = params.addresses.len(),
            added = added.len(),
            "updated wallet addresses"
        );
        Ok(added)
    }

    /// Coins held at the last block mined by `params.time`: minted at or
    /// below its height and not spent at or below it.
    async fn get_wallet_balance_at_time(
        &self,
        wallet: &Wallet,
        params: &WalletBalanceAtTimeParams,
    ) -> Result<Balance, ServiceError> {
        let chain = ChainNetwork::new(&wallet.chain, &wallet.network);
        let Some(block) = self.storage.block_at_time(&chain, params.time).await? else {
            return Ok(Balance::default());
        };
        let height = block.height;
        let filter = CoinFilter::Wallet {
            wallet_id: wallet.id.clone(),
            include_spent: true,
        };
        Ok(self
            .storage
            .coins(&chain, filter, &StreamingFindOptions::unbounded::<Coin>())
            .try_fold(Balance::default(), move |mut balance, coin| async move {
                let minted = (0..=height).contains(&coin.mint_height);
                let unspent = coin
                    .spent_height
                    .is_none_or(|spent| spent < 0 || spent > height);
                if minted && unspent {
                    balance.add(&coin);
                }
                Ok::<_, FetchError>(balance)
            })
            .await?)
    }

    fn stream_wallet_addresses(
        &self,
        wallet: &Wallet,
        params: &WalletAddressParams,
    ) -> Result<RecordStream<WalletAddress>, ServiceError> {
        Ok(self
            .storage
            .wallet_addresses(&params.wallet.chain, &wallet.id, &params.options))
    }

    fn stream_wallet_utxos(
        &self,
        wallet: &Wallet,
        params: &WalletUtxoParams,
    ) -> Result<RecordStream<Coin>, ServiceError> {
        let filter = CoinFilter::Wallet {
            wallet_id: wallet.id.clone(),
            include_spent: params.include_spent,
        };
        Ok(self.storage.coins(&params.wallet.chain, filter, &params.options))
    }

    fn stream_wallet_transactions(
        &self,
        wallet: &Wallet,
        params: &WalletTransactionParams,
    ) -> Result<RecordStream<Transaction>, ServiceError> {
        let filter = TransactionFilter::Wallet {
            wallet_id: wallet.id.clone(),
            start_block: params.start_block,
            end_block: params.end_block,
            include_mempool: params.include_mempool,
        };
        Ok(self
            .storage
            .transactions(&params.wallet.chain, filter, &params.options))
    }
}

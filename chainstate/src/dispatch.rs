//! Request dispatch.
//!
//! [`Dispatcher`] resolves the chain implementation for a normalized request,
//! runs the operation, turns empty lookups into [`NotFound`] and attaches the
//! cache policy. Streamed operations are handed to the [`StreamingQuery`]
//! executor. [`ApiError`] maps the outcome onto HTTP.

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

use crate::cache::{self, CacheTier};
use crate::chain::{ChainNetwork, ChainRegistry, ResolvedService};
use crate::model::{
    Authhead, Balance, Block, Coin, CoinListing, Confirmable, FeeRate, Transaction, Wallet,
    WalletAddress,
};
use crate::params::{
    AddressParams, AddressStreamParams, BlockListParams, BlockParams, BroadcastParams, ChainParams,
    CreateWalletParams, FeeParams, TransactionListParams, TxInBlockParams, TxParams,
    UpdateWalletParams, ValidationError, WalletAddressParams, WalletBalanceAtTimeParams,
    WalletParams, WalletTransactionParams, WalletUtxoParams,
};
use crate::service::{ChainStateService, FetchError, NotFound, ServiceError};
use crate::stream::{Pageable, RecordStream, StreamingFindOptions, StreamingQuery};

/// Records delivered through the streaming executor.
pub type Records<T> = ReceiverStream<Result<T, FetchError>>;

/// A single-record response with its cache decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub record: T,
    pub cache: Option<CacheTier>,
}

impl<T: Serialize> IntoResponse for Cached<T> {
    fn into_response(self) -> Response {
        let mut response = Json(self.record).into_response();
        if let Some(tier) = self.cache {
            tier.apply(response.headers_mut());
        }
        response
    }
}

/// Routes normalized requests to the chain registry.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ChainRegistry>,
    streaming: StreamingQuery,
}

impl Dispatcher {
    #[must_use]
    pub const fn new(registry: Arc<ChainRegistry>, streaming: StreamingQuery) -> Self {
        Self {
            registry,
            streaming,
        }
    }

    fn resolve(&self, chain: &ChainNetwork) -> Result<ResolvedService<'_>, ServiceError> {
        self.registry.resolve(chain)
    }

    fn execute<T>(&self, source: RecordStream<T>, options: &StreamingFindOptions) -> Records<T>
    where
        T: Pageable + Send + 'static,
    {
        self.streaming.execute(source, options)
    }

    /// Pairs `record` with the cache tier its depth under the local tip allows.
    ///
    /// A failed tip lookup only costs the cache directive, never the response.
    async fn with_cache_policy<T: Confirmable>(
        service: &ResolvedService<'_>,
        chain: &ChainNetwork,
        record: T,
    ) -> Cached<T> {
        let tip = match service.get_local_tip(chain).await {
            Ok(tip) => tip.and_then(|block| block.confirmed_height()),
            Err(error) => {
                warn!(%chain, %error, "tip lookup failed; response left uncached");
                None
            }
        };
        Cached {
            cache: cache::evaluate(tip, record.confirmed_height()),
            record,
        }
    }

    pub async fn transaction(&self, params: &TxParams) -> Result<Cached<Transaction>, ServiceError> {
        let service = self.resolve(&params.chain)?;
        let tx = service
            .get_transaction(params)
            .await?
            .ok_or_else(|| NotFound::Transaction(params.txid.clone()))?;
        Ok(Self::with_cache_policy(&service, &params.chain, tx).await)
    }

    pub async fn transaction_in_block(
        &self,
        params: &TxInBlockParams,
    ) -> Result<Cached<Transaction>, ServiceError> {
        let service = self.resolve(&params.chain)?;
        let tx = service
            .get_raw_transaction(params)
            .await?
            .ok_or_else(|| NotFound::Transaction(params.txid.clone()))?;
        Ok(Self::with_cache_policy(&service, &params.chain, tx).await)
    }

    /// Authheads change whenever the identity output moves, so they are
    /// never cached.
    pub async fn authhead(&self, params: &TxParams) -> Result<Authhead, ServiceError> {
        let service = self.resolve(&params.chain)?;
        Ok(service
            .get_authhead(params)
            .await?
            .ok_or_else(|| NotFound::Authhead(params.txid.clone()))?)
    }

    pub async fn coins_for_tx(&self, params: &TxParams) -> Result<CoinListing, ServiceError> {
        self.resolve(&params.chain)?.get_coins_for_tx(params).await
    }

    pub fn transactions(&self, params: &TransactionListParams) -> Result<Records<Transaction>, ServiceError> {
        let source = self.resolve(&params.chain)?.stream_transactions(params)?;
        Ok(self.execute(source, &params.options))
    }

    pub async fn broadcast(&self, params: &BroadcastParams) -> Result<String, ServiceError> {
        self.resolve(&params.chain)?
            .broadcast_transaction(params)
            .await
    }

    pub async fn fee(&self, params: &FeeParams) -> Result<FeeRate, ServiceError> {
        self.resolve(&params.chain)?.get_fee(params).await
    }

    pub async fn block(&self, params: &BlockParams) -> Result<Cached<Block>, ServiceError> {
        let service = self.resolve(&params.chain)?;
        let block = service
            .get_block(params)
            .await?
            .ok_or_else(|| NotFound::Block(params.selector.to_string()))?;
        Ok(Self::with_cache_policy(&service, &params.chain, block).await)
    }

    pub async fn tip(&self, params: &ChainParams) -> Result<Block, ServiceError> {
        Ok(self
            .resolve(&params.chain)?
            .get_local_tip(&params.chain)
            .await?
            .ok_or_else(|| NotFound::Tip(params.chain.to_string()))?)
    }

    pub fn blocks(&self, params: &BlockListParams) -> Result<Records<Block>, ServiceError> {
        let source = self.resolve(&params.chain)?.stream_blocks(params)?;
        Ok(self.execute(source, &params.options))
    }

    pub async fn address_balance(&self, params: &AddressParams) -> Result<Balance, ServiceError> {
        self.resolve(&params.chain)?
            .get_balance_for_address(params)
            .await
    }

    pub fn address_utxos(&self, params: &AddressStreamParams) -> Result<Records<Coin>, ServiceError> {
        let source = self.resolve(&params.chain)?.stream_address_utxos(params)?;
        Ok(self.execute(source, &params.options))
    }

    pub fn address_transactions(
        &self,
        params: &AddressStreamParams,
    ) -> Result<Records<Coin>, ServiceError> {
        let source = self
            .resolve(&params.chain)?
            .stream_address_transactions(params)?;
        Ok(self.execute(source, &params.options))
    }

    pub async fn create_wallet(&self, params: CreateWalletParams) -> Result<Wallet, ServiceError> {
        let service = self.resolve(&params.chain)?;
        service.create_wallet(params).await
    }

    /// Looks the wallet up on an already resolved service.
    async fn find_wallet(
        service: &ResolvedService<'_>,
        params: &WalletParams,
    ) -> Result<Wallet, ServiceError> {
        Ok(service
            .get_wallet(params)
            .await?
            .ok_or_else(|| NotFound::Wallet(params.pub_key.clone()))?)
    }

    pub async fn wallet(&self, params: &WalletParams) -> Result<Wallet, ServiceError> {
        Self::find_wallet(&self.resolve(&params.chain)?, params).await
    }

    pub async fn wallet_balance(&self, params: &WalletParams) -> Result<Balance, ServiceError> {
        let service = self.resolve(&params.chain)?;
        let wallet = Self::find_wallet(&service, params).await?;
        service.get_wallet_balance(&wallet).await
    }

    pub async fn update_wallet(
        &self,
        params: &UpdateWalletParams,
    ) -> Result<Vec<WalletAddress>, ServiceError> {
        let service = self.resolve(&params.wallet.chain)?;
        let wallet = Self::find_wallet(&service, &params.wallet).await?;
        service.update_wallet(&wallet, params).await
    }

    /// Historical balances move whenever a reorg replaces the blocks around
    /// `time`, so they are never cached.
    pub async fn wallet_balance_at_time(
        &self,
        params: &WalletBalanceAtTimeParams,
    ) -> Result<Balance, ServiceError> {
        let service = self.resolve(&params.wallet.chain)?;
        let wallet = Self::find_wallet(&service, &params.wallet).await?;
        service.get_wallet_balance_at_time(&wallet, params).await
    }

    pub async fn wallet_addresses(
        &self,
        params: &WalletAddressParams,
    ) -> Result<Records<WalletAddress>, ServiceError> {
        let service = self.resolve(&params.wallet.chain)?;
        let wallet = Self::find_wallet(&service, &params.wallet).await?;
        let source = service.stream_wallet_addresses(&wallet, params)?;
        Ok(self.execute(source, &params.options))
    }

    pub async fn wallet_utxos(&self, params: &WalletUtxoParams) -> Result<Records<Coin>, ServiceError> {
        let service = self.resolve(&params.wallet.chain)?;
        let wallet = Self::find_wallet(&service, &params.wallet).await?;
        let source = service.stream_wallet_utxos(&wallet, params)?;
        Ok(self.execute(source, &params.options))
    }

    pub async fn wallet_transactions(
        &self,
        params: &WalletTransactionParams,
    ) -> Result<Records<Transaction>, ServiceError> {
        let service = self.resolve(&params.wallet.chain)?;
        let wallet = Self::find_wallet(&service, &params.wallet).await?;
        let source = service.stream_wallet_transactions(&wallet, params)?;
        Ok(self.execute(source, &params.options))
    }
}

/// HTTP face of a [`ServiceError`]: status code plus plain-text message.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Validation(_)
            | ServiceError::UnknownChain(_)
            | ServiceError::UnknownNetwork { .. }
            | ServiceError::Conflict(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Fetch(_) | ServiceError::Unsupported(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        (status, self.0.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::http::header::CACHE_CONTROL;
    use futures::StreamExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::params::RawQuery;
    use crate::rpc::NodePool;
    use crate::service::Operation;
    use crate::service::utxo::UtxoChainState;
    use crate::storage::{Fixtures, MemoryStore};

    fn block(height: i64) -> Block {
        Block {
            hash: format!("h{height}"),
            chain: "BTC".into(),
            network: "main".into(),
            height,
            previous_block_hash: None,
            time: 1_600_000_000 + height,
            transaction_count: 1,
            size: 300,
            reward: 625_000_000,
        }
    }

    fn registry(fixtures: Fixtures) -> ChainRegistry {
        let storage = Arc::new(MemoryStore::new(fixtures));
        let mut registry = ChainRegistry::new();
        registry
            .register("BTC", Arc::new(UtxoChainState::new(storage, NodePool::new("BTC"))))
            .expect("register");
        registry
    }

    fn serve(registry: ChainRegistry) -> Dispatcher {
        Dispatcher::new(
            Arc::new(registry),
            StreamingQuery::new(4, CancellationToken::new()),
        )
    }

    fn dispatcher(blocks: Vec<Block>) -> Dispatcher {
        serve(registry(Fixtures {
            blocks,
            ..Fixtures::default()
        }))
    }

    /// Fails every `getLocalTip` call.
    struct TipIndexOffline;

    #[async_trait]
    impl ChainStateService for TipIndexOffline {
        async fn get_local_tip(&self, _chain: &ChainNetwork) -> Result<Option<Block>, ServiceError> {
            Err(FetchError::new("tip index offline").into())
        }
    }

    fn assert_served_uncached<T: Serialize>(cached: Cached<T>) {
        assert_eq!(cached.cache, None);
        let response = cached.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CACHE_CONTROL).is_none());
    }

    fn query() -> RawQuery {
        RawQuery {
            chain: Some("btc".into()),
            network: Some("main".into()),
            ..RawQuery::default()
        }
    }

    #[tokio::test]
    async fn deep_blocks_are_cached() {
        let dispatcher = dispatcher(vec![block(100), block(250), block(200)]);
        let deep = dispatcher
            .block(&BlockParams::normalize(&query(), "100").expect("valid"))
            .await
            .expect("found");
        assert_eq!(deep.cache, Some(CacheTier::Month));

        let shallow = dispatcher
            .block(&BlockParams::normalize(&query(), "h200").expect("valid"))
            .await
            .expect("found");
        assert_eq!(shallow.cache, None);
    }

    #[tokio::test]
    async fn failed_tip_lookup_serves_the_record_uncached() {
        let mut registry = registry(Fixtures {
            blocks: vec![block(100), block(250)],
            ..Fixtures::default()
        });
        registry
            .register_override("BTC", Operation::GetLocalTip, Arc::new(TipIndexOffline))
            .expect("override");
        let deep = serve(registry)
            .block(&BlockParams::normalize(&query(), "100").expect("valid"))
            .await
            .expect("served despite the tip failure");
        assert_eq!(deep.record.height, 100);
        assert_served_uncached(deep);
    }

    #[tokio::test]
    async fn record_without_any_indexed_tip_is_uncached() {
        let tx = Transaction {
            txid: "old".into(),
            chain: "BTC".into(),
            network: "main".into(),
            block_height: 100,
            block_hash: Some("h100".into()),
            block_time: None,
            coinbase: false,
            fee: 0,
            size: 200,
            value: 0,
            input_count: 1,
            output_count: 1,
            wallets: vec![],
        };
        let dispatcher = serve(registry(Fixtures {
            transactions: vec![tx],
            ..Fixtures::default()
        }));
        let found = dispatcher
            .transaction(&TxParams::normalize(&query(), "old").expect("valid"))
            .await
            .expect("found");
        assert_served_uncached(found);
    }

    #[tokio::test]
    async fn missing_block_is_not_found() {
        let dispatcher = dispatcher(vec![block(1)]);
        let err = dispatcher
            .block(&BlockParams::normalize(&query(), "77").expect("valid"))
            .await
            .expect_err("absent");
        assert_eq!(err.to_string(), "The requested block 77 could not be found.");
        assert_eq!(ApiError(err).status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_tip_is_not_found() {
        let dispatcher = dispatcher(vec![]);
        let err = dispatcher
            .tip(&ChainParams::normalize(&query()).expect("valid"))
            .await
            .expect_err("no blocks");
        assert_eq!(err.to_string(), "No tip found for BTC:main.");
    }

    #[tokio::test]
    async fn block_listing_streams_through_the_executor() {
        let dispatcher = dispatcher((1..=5).map(block).collect());
        let mut raw = query();
        raw.limit = Some("2".into());
        let params = BlockListParams::normalize(&raw).expect("valid");
        let heights: Vec<_> = dispatcher
            .blocks(&params)
            .expect("stream")
            .map(|item| item.expect("record").height)
            .collect()
            .await;
        assert_eq!(heights, [5, 4]);
    }

    #[test]
    fn status_codes_follow_the_error_kind() {
        let status = |err: ServiceError| ApiError(err).status();
        assert_eq!(
            status(ValidationError::Missing("chain").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ServiceError::UnknownChain("XYZ".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ServiceError::Conflict("exists".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(NotFound::Authhead("ab".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(FetchError::new("node down").into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ServiceError::Unsupported(Operation::GetFee)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

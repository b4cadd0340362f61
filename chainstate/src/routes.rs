//! HTTP route handlers for the chain-state API.
//!
//! Every chain route takes `chain` and `network` as query parameters. Single
//! records are JSON objects; listings are JSON arrays streamed record by
//! record. Errors are a status code with a plain-text body:
//! - **Validation / unknown chain / conflict** → HTTP 400
//! - **Not found** → HTTP 404
//! - **Collaborator failures** → HTTP 500
//!
//! A listing that fails after its first chunk has been sent cannot change
//! its status any more; the body is cut off before the closing `]`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::dispatch::{ApiError, Cached, Dispatcher, Records};
use crate::model::{
    Authhead, Balance, Block, CoinListing, FeeRate, Transaction, Wallet, WalletAddress,
};
use crate::params::{
    AddressEntry, AddressParams, AddressStreamParams, BlockListParams, BlockParams,
    BroadcastParams, ChainParams, CreateWalletParams, FeeParams, NewWallet, RawQuery,
    TransactionListParams, TxInBlockParams, TxParams, UpdateWalletParams, ValidationError,
    WalletAddressParams, WalletBalanceAtTimeParams, WalletParams, WalletTransactionParams,
    WalletUtxoParams,
};
use crate::service::ServiceError;
use crate::stream::json_array;

/// Shared dispatcher state used by Axum route handlers.
pub type AppState = Arc<Dispatcher>;

/// Creates the Axum router with every chain-state endpoint.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(get_health))
        .route("/tx", get(get_transactions))
        .route("/tx/send/{raw_tx}", get(get_broadcast))
        .route("/tx/{tx_id}", get(get_transaction))
        .route("/tx/{tx_id}/block/{block_hash}", get(get_transaction_in_block))
        .route("/tx/{tx_id}/authhead", get(get_authhead))
        .route("/tx/{tx_id}/coins", get(get_coins))
        .route("/block", get(get_blocks))
        .route("/block/tip", get(get_tip))
        .route("/block/{block_id}", get(get_block))
        .route("/address/{address}", get(get_address_utxos))
        .route("/address/{address}/txs", get(get_address_transactions))
        .route("/address/{address}/balance", get(get_address_balance))
        .route("/fee/{target}", get(get_fee))
        .route("/wallet", post(post_wallet))
        .route("/wallet/{pub_key}", get(get_wallet).post(post_wallet_addresses))
        .route("/wallet/{pub_key}/balance", get(get_wallet_balance))
        .route("/wallet/{pub_key}/balance/{time}", get(get_wallet_balance_at_time))
        .route("/wallet/{pub_key}/addresses", get(get_wallet_addresses))
        .route("/wallet/{pub_key}/utxos", get(get_wallet_utxos))
        .route("/wallet/{pub_key}/transactions", get(get_wallet_transactions))
}

/// Mounts [`routes`] under `api_root` and attaches the state.
pub fn router(state: AppState, api_root: &str) -> Router {
    let root = api_root.trim_matches('/');
    if root.is_empty() {
        routes().with_state(state)
    } else {
        Router::new()
            .nest(&format!("/{root}"), routes())
            .with_state(state)
    }
}

/// Streams `records` as a chunked JSON array.
///
/// The status is only committed once the first item is in: a listing whose
/// collaborator fails before producing anything is a plain error response.
async fn json_stream<T>(mut records: Records<T>) -> Result<Response, ApiError>
where
    T: Serialize + Send + 'static,
{
    let first = match records.next().await {
        Some(Err(error)) => return Err(ServiceError::Fetch(error).into()),
        first => first,
    };
    let records = stream::iter(first).chain(records);
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(json_array(records)),
    )
        .into_response())
}

/// `GET /health`: lightweight liveness check.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /tx`: transactions of a block, by `blockHash` and/or `blockHeight`.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_transactions(
    State(dispatcher): State<AppState>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let params = TransactionListParams::normalize(&query)?;
    json_stream(dispatcher.transactions(&params)?).await
}

/// `GET /tx/send/{rawTx}`: broadcast a signed transaction.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_broadcast(
    State(dispatcher): State<AppState>,
    Path(raw_tx): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let params = BroadcastParams::normalize(&query, &raw_tx)?;
    let txid = dispatcher.broadcast(&params).await?;
    Ok(Json(json!({ "txid": txid })))
}

/// `GET /tx/{txId}`: a single transaction.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_transaction(
    State(dispatcher): State<AppState>,
    Path(tx_id): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Cached<Transaction>, ApiError> {
    let params = TxParams::normalize(&query, &tx_id)?;
    Ok(dispatcher.transaction(&params).await?)
}

/// `GET /tx/{txId}/block/{blockHash}`: a transaction within a given block.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_transaction_in_block(
    State(dispatcher): State<AppState>,
    Path((tx_id, block_hash)): Path<(String, String)>,
    Query(query): Query<RawQuery>,
) -> Result<Cached<Transaction>, ApiError> {
    let params = TxInBlockParams::normalize(&query, &tx_id, &block_hash)?;
    Ok(dispatcher.transaction_in_block(&params).await?)
}

/// `GET /tx/{txId}/authhead`: identity output chain of an authbase.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_authhead(
    State(dispatcher): State<AppState>,
    Path(tx_id): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Authhead>, ApiError> {
    let params = TxParams::normalize(&query, &tx_id)?;
    Ok(Json(dispatcher.authhead(&params).await?))
}

/// `GET /tx/{txId}/coins`: inputs and outputs of a transaction.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_coins(
    State(dispatcher): State<AppState>,
    Path(tx_id): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<CoinListing>, ApiError> {
    let params = TxParams::normalize(&query, &tx_id)?;
    Ok(Json(dispatcher.coins_for_tx(&params).await?))
}

/// `GET /block`: block listing, optionally above `sinceBlock`.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_blocks(
    State(dispatcher): State<AppState>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let params = BlockListParams::normalize(&query)?;
    json_stream(dispatcher.blocks(&params)?).await
}

/// `GET /block/tip`: highest indexed block.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_tip(
    State(dispatcher): State<AppState>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Block>, ApiError> {
    let params = ChainParams::normalize(&query)?;
    Ok(Json(dispatcher.tip(&params).await?))
}

/// `GET /block/{blockId}`: a block by hash or height.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_block(
    State(dispatcher): State<AppState>,
    Path(block_id): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Cached<Block>, ApiError> {
    let params = BlockParams::normalize(&query, &block_id)?;
    Ok(dispatcher.block(&params).await?)
}

/// `GET /address/{address}`: coins of an address, optionally `unspent` only.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_address_utxos(
    State(dispatcher): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let params = AddressStreamParams::normalize(&query, &address)?;
    json_stream(dispatcher.address_utxos(&params)?).await
}

/// `GET /address/{address}/txs`: every coin ever minted to an address.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_address_transactions(
    State(dispatcher): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let params = AddressStreamParams::normalize(&query, &address)?;
    json_stream(dispatcher.address_transactions(&params)?).await
}

#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_address_balance(
    State(dispatcher): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Balance>, ApiError> {
    let params = AddressParams::normalize(&query, &address)?;
    Ok(Json(dispatcher.address_balance(&params).await?))
}

/// `GET /fee/{target}`: fee rate for confirmation within `target` blocks.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_fee(
    State(dispatcher): State<AppState>,
    Path(target): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<FeeRate>, ApiError> {
    let params = FeeParams::normalize(&query, &target)?;
    Ok(Json(dispatcher.fee(&params).await?))
}

/// `POST /wallet`: register a wallet by public key.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn post_wallet(
    State(dispatcher): State<AppState>,
    Query(query): Query<RawQuery>,
    body: Result<Json<NewWallet>, JsonRejection>,
) -> Result<Json<Wallet>, ApiError> {
    let Json(body) =
        body.map_err(|e| ValidationError::malformed("body", &e.body_text()))?;
    let params = CreateWalletParams::normalize(&query, body)?;
    Ok(Json(dispatcher.create_wallet(params).await?))
}

#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_wallet(
    State(dispatcher): State<AppState>,
    Path(pub_key): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Wallet>, ApiError> {
    let params = WalletParams::normalize(&query, &pub_key)?;
    Ok(Json(dispatcher.wallet(&params).await?))
}

#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_wallet_balance(
    State(dispatcher): State<AppState>,
    Path(pub_key): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Balance>, ApiError> {
    let params = WalletParams::normalize(&query, &pub_key)?;
    Ok(Json(dispatcher.wallet_balance(&params).await?))
}

/// `POST /wallet/{pubKey}`: add `[{ "address": ... }]` entries to a wallet.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn post_wallet_addresses(
    State(dispatcher): State<AppState>,
    Path(pub_key): Path<String>,
    Query(query): Query<RawQuery>,
    body: Result<Json<Vec<AddressEntry>>, JsonRejection>,
) -> Result<Json<Vec<WalletAddress>>, ApiError> {
    let Json(body) =
        body.map_err(|e| ValidationError::malformed("body", &e.body_text()))?;
    let params = UpdateWalletParams::normalize(&query, &pub_key, body)?;
    Ok(Json(dispatcher.update_wallet(&params).await?))
}

/// `GET /wallet/{pubKey}/balance/{time}`: balance as of the last block mined
/// by `time`.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_wallet_balance_at_time(
    State(dispatcher): State<AppState>,
    Path((pub_key, time)): Path<(String, String)>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Balance>, ApiError> {
    let params = WalletBalanceAtTimeParams::normalize(&query, &pub_key, &time)?;
    Ok(Json(dispatcher.wallet_balance_at_time(&params).await?))
}

#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_wallet_addresses(
    State(dispatcher): State<AppState>,
    Path(pub_key): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let params = WalletAddressParams::normalize(&query, &pub_key)?;
    json_stream(dispatcher.wallet_addresses(&params).await?).await
}

/// `GET /wallet/{pubKey}/utxos`: wallet coins, spent ones on `includeSpent`.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_wallet_utxos(
    State(dispatcher): State<AppState>,
    Path(pub_key): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let params = WalletUtxoParams::normalize(&query, &pub_key)?;
    json_stream(dispatcher.wallet_utxos(&params).await?).await
}

/// `GET /wallet/{pubKey}/transactions`: wallet history within
/// `startBlock..=endBlock`, mempool included on `includeMempool`.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
async fn get_wallet_transactions(
    State(dispatcher): State<AppState>,
    Path(pub_key): Path<String>,
    Query(query): Query<RawQuery>,
) -> Result<Response, ApiError> {
    let params = WalletTransactionParams::normalize(&query, &pub_key)?;
    json_stream(dispatcher.wallet_transactions(&params).await?).await
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::chain::ChainRegistry;
    use crate::model::Coin;
    use crate::rpc::NodePool;
    use crate::rpc::mock::ScriptedRpc;
    use crate::service::Operation;
    use crate::service::fee::LegacyFeeEstimator;
    use crate::service::utxo::UtxoChainState;
    use crate::storage::{Fixtures, MemoryStore, Storage};
    use crate::stream::StreamingQuery;

    const TIP: i64 = 800_150;

    fn block(height: i64) -> Block {
        Block {
            hash: format!("block{height}"),
            chain: "BTC".into(),
            network: "main".into(),
            height,
            previous_block_hash: None,
            time: 1_700_000_000 + height,
            transaction_count: 2,
            size: 1_000,
            reward: 312_500_000,
        }
    }

    fn tx(txid: &str, height: i64) -> Transaction {
        Transaction {
            txid: txid.into(),
            chain: "BTC".into(),
            network: "main".into(),
            block_height: height,
            block_hash: (height >= 0).then(|| format!("block{height}")),
            block_time: None,
            coinbase: false,
            fee: 226,
            size: 226,
            value: 50_000,
            input_count: 1,
            output_count: 2,
            wallets: vec![],
        }
    }

    fn fixtures() -> Fixtures {
        Fixtures {
            blocks: vec![block(800_000), block(800_100), block(TIP)],
            transactions: vec![
                tx("deep", 800_000),
                tx("shallow", 800_100),
                tx("pending", -1),
                tx("a1", 800_000),
                tx("a2", 800_000),
                tx("a3", 800_000),
            ],
            coins: vec![Coin {
                chain: "BTC".into(),
                network: "main".into(),
                mint_txid: "deep".into(),
                mint_index: 0,
                mint_height: 800_000,
                address: "1alice".into(),
                value: 50_000,
                script: None,
                spent_txid: None,
                spent_height: None,
                coinbase: false,
                wallets: vec![],
            }],
            ..Fixtures::default()
        }
    }

    fn app_with(storage: Arc<dyn Storage>, rpc: ScriptedRpc) -> Router {
        let rpc = Arc::new(rpc);
        let btc_nodes = NodePool::new("BTC").with_node("main", rpc.clone());
        let bsv_nodes = NodePool::new("BSV").with_node("main", rpc);
        let mut registry = ChainRegistry::new();
        registry
            .register("BTC", Arc::new(UtxoChainState::new(Arc::clone(&storage), btc_nodes)))
            .expect("btc");
        registry
            .register("BSV", Arc::new(UtxoChainState::new(storage, bsv_nodes.clone())))
            .expect("bsv");
        registry
            .register_override("BSV", Operation::GetFee, Arc::new(LegacyFeeEstimator::new(bsv_nodes)))
            .expect("bsv fee");
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            StreamingQuery::new(8, CancellationToken::new()),
        );
        router(Arc::new(dispatcher), "/api")
    }

    fn app(rpc: ScriptedRpc) -> Router {
        app_with(Arc::new(MemoryStore::new(fixtures())), rpc)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
        let response = app.oneshot(request).await.expect("infallible");
        let status = response.status();
        let cache = response
            .headers()
            .get(header::CACHE_CONTROL)
            .map(|v| v.to_str().expect("ascii").to_owned());
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("complete body");
        (status, cache, String::from_utf8(bytes.to_vec()).expect("utf8"))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).expect("request");
        send(app, request).await
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (status, _, body) = get(app(ScriptedRpc::new()), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn unknown_transaction_is_404() {
        let (status, cache, body) = get(
            app(ScriptedRpc::new()),
            "/api/tx/nope?chain=BTC&network=main",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(cache, None);
        assert!(body.contains("could not be found"), "{body}");
    }

    #[tokio::test]
    async fn buried_transaction_is_cached_for_a_month() {
        let (status, cache, body) = get(
            app(ScriptedRpc::new()),
            "/api/tx/deep?chain=btc&network=MAIN",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            cache.as_deref(),
            Some("public, max-age=2592000, s-maxage=2592000")
        );
        let json: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(json["txid"], "deep");
        assert_eq!(json["blockHeight"], 800_000);
    }

    #[tokio::test]
    async fn buried_transaction_is_uncached_without_an_indexed_tip() {
        let mut fixtures = fixtures();
        fixtures.blocks.clear();
        let app = app_with(Arc::new(MemoryStore::new(fixtures)), ScriptedRpc::new());
        let (status, cache, _) = get(app, "/api/tx/deep?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache, None);
    }

    #[tokio::test]
    async fn recent_and_pending_transactions_are_not_cached() {
        for txid in ["shallow", "pending"] {
            let uri = format!("/api/tx/{txid}?chain=BTC&network=main");
            let (status, cache, _) = get(app(ScriptedRpc::new()), &uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(cache, None, "{txid}");
        }
    }

    #[tokio::test]
    async fn transaction_in_wrong_block_is_404() {
        let (status, _, _) = get(
            app(ScriptedRpc::new()),
            "/api/tx/deep/block/block800000?chain=BTC&network=main",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, body) = get(
            app(ScriptedRpc::new()),
            "/api/tx/deep/block/block1?chain=BTC&network=main",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "The requested txid deep could not be found.");
    }

    #[tokio::test]
    async fn authhead_is_never_cached() {
        let (status, cache, body) = get(
            app(ScriptedRpc::new()),
            "/api/tx/deep/authhead?chain=BTC&network=main",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache, None);
        let json: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(json["authbase"], "deep");

        let (status, _, body) = get(
            app(ScriptedRpc::new()),
            "/api/tx/shallow/authhead?chain=BTC&network=main",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Authhead for txid shallow could not be found.");
    }

    #[tokio::test]
    async fn listing_without_block_field_is_400() {
        let (status, _, body) = get(app(ScriptedRpc::new()), "/api/tx?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Must provide blockHash or blockHeight");
    }

    #[tokio::test]
    async fn missing_network_is_400() {
        let (status, _, body) = get(app(ScriptedRpc::new()), "/api/tx/deep?chain=BTC").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Missing required param network");
    }

    #[tokio::test]
    async fn unknown_chain_is_400() {
        let (status, _, _) = get(app(ScriptedRpc::new()), "/api/tx/deep?chain=XYZ&network=main").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn listing_streams_a_json_array() {
        let (status, _, body) = get(
            app(ScriptedRpc::new()),
            "/api/tx?chain=BTC&network=main&blockHeight=800000&limit=2&direction=1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json: Vec<Value> = serde_json::from_str(&body).expect("complete array");
        let ids: Vec<_> = json.iter().map(|t| t["txid"].as_str().expect("txid")).collect();
        assert_eq!(ids, ["a1", "a2"]);

        let (_, _, rest) = get(
            app(ScriptedRpc::new()),
            "/api/tx?chain=BTC&network=main&blockHeight=800000&direction=1&since=a2",
        )
        .await;
        let json: Vec<Value> = serde_json::from_str(&rest).expect("complete array");
        let ids: Vec<_> = json.iter().map(|t| t["txid"].as_str().expect("txid")).collect();
        assert_eq!(ids, ["a3", "deep"]);
    }

    #[tokio::test]
    async fn empty_listing_is_an_empty_array() {
        let (status, _, body) = get(
            app(ScriptedRpc::new()),
            "/api/tx?chain=BTC&network=main&blockHash=unknown",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn listing_that_fails_before_any_record_is_a_500() {
        let app = app_with(Arc::new(MemoryStore::failing("cursor lost")), ScriptedRpc::new());
        let (status, cache, body) = get(app, "/api/tx?chain=BTC&network=main&blockHeight=1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(cache, None);
        assert_eq!(body, "cursor lost");
    }

    #[tokio::test]
    async fn broadcast_returns_the_txid() {
        let rpc = ScriptedRpc::new().reply("sendrawtransaction", json!("f00d"));
        let (status, _, body) = get(app(rpc), "/api/tx/send/0200beef?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json"), json!({ "txid": "f00d" }));
    }

    #[tokio::test]
    async fn broadcast_failure_is_500_with_node_message() {
        let rpc = ScriptedRpc::new().fail("sendrawtransaction", "txn-mempool-conflict (code -26)");
        let (status, _, body) = get(app(rpc), "/api/tx/send/0200beef?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "txn-mempool-conflict (code -26)");
    }

    #[tokio::test]
    async fn fee_uses_the_family_rpc() {
        let rpc = ScriptedRpc::new()
            .reply("estimatesmartfee", json!({ "feerate": 0.0001, "blocks": 3 }))
            .reply("estimatefee", json!(0.00000500));
        let app = app(rpc);

        let (status, _, body) = get(app.clone(), "/api/fee/3?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json")["feerate"], 0.0001);

        let (status, _, body) = get(app, "/api/fee/3?chain=BSV&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json")["feerate"], 0.000005);
    }

    #[tokio::test]
    async fn fee_for_unconfigured_network_is_400() {
        let (status, _, _) = get(app(ScriptedRpc::new()), "/api/fee/2?chain=BTC&network=test").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn block_routes() {
        let app = app(ScriptedRpc::new());
        let (status, _, body) = get(app.clone(), "/api/block/tip?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json")["height"], TIP);

        let (status, cache, _) = get(app.clone(), "/api/block/800000?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert!(cache.is_some());

        let (status, _, body) = get(app, "/api/block/42?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("could not be found"));
    }

    #[tokio::test]
    async fn address_balance_and_coins() {
        let app = app(ScriptedRpc::new());
        let (status, _, body) = get(app.clone(), "/api/address/1alice/balance?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_str::<Value>(&body).expect("json"),
            json!({ "confirmed": 50_000, "unconfirmed": 0, "balance": 50_000 })
        );

        let (_, _, body) = get(app, "/api/address/1alice?chain=BTC&network=main&unspent=true").await;
        let coins: Vec<Value> = serde_json::from_str(&body).expect("json");
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0]["mintTxid"], "deep");
    }

    #[tokio::test]
    async fn wallet_lifecycle() {
        let app = app(ScriptedRpc::new());
        let create = || {
            Request::builder()
                .method("POST")
                .uri("/api/wallet?chain=BTC&network=main")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"cold","pubKey":"xpubcold"}"#))
                .expect("request")
        };
        let (status, _, body) = send(app.clone(), create()).await;
        assert_eq!(status, StatusCode::OK);
        let wallet: Value = serde_json::from_str(&body).expect("json");
        assert_eq!(wallet["pubKey"], "xpubcold");

        let (status, _, _) = send(app.clone(), create()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = get(app.clone(), "/api/wallet/xpubcold?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json")["name"], "cold");

        let (status, _, body) = get(app.clone(), "/api/wallet/xpubcold/utxos?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");

        let (status, _, body) = get(app, "/api/wallet/xpubwarm/balance?chain=BTC&network=main").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Wallet xpubwarm could not be found.");
    }

    #[tokio::test]
    async fn wallet_addresses_can_be_added_and_replayed_by_time() {
        let app = app(ScriptedRpc::new());
        let post = |uri: &str, body: &'static str| {
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .expect("request")
        };
        let (status, _, _) = send(
            app.clone(),
            post("/api/wallet?chain=BTC&network=main", r#"{"name":"cold","pubKey":"xpubcold"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let update = "/api/wallet/xpubcold?chain=BTC&network=main";
        let (status, _, body) = send(app.clone(), post(update, "[]")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Missing required param addresses");

        let (status, _, body) = send(
            app.clone(),
            post(update, r#"[{"address":"1alice"},{"address":"1alice"}]"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let added: Vec<Value> = serde_json::from_str(&body).expect("json");
        assert_eq!(added.len(), 1);
        assert_eq!(added[0]["address"], "1alice");

        let (_, _, body) = get(app.clone(), "/api/wallet/xpubcold/addresses?chain=BTC&network=main").await;
        assert_eq!(serde_json::from_str::<Vec<Value>>(&body).expect("json").len(), 1);
        let (_, _, body) = get(app.clone(), "/api/wallet/xpubcold/utxos?chain=BTC&network=main").await;
        let coins: Vec<Value> = serde_json::from_str(&body).expect("json");
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0]["mintTxid"], "deep");

        let at = |time: &str| format!("/api/wallet/xpubcold/balance/{time}?chain=BTC&network=main");
        let (status, cache, body) = get(app.clone(), &at("1700800000")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cache, None);
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json")["balance"], 50_000);

        let (_, _, body) = get(app.clone(), &at("1700799999")).await;
        assert_eq!(serde_json::from_str::<Value>(&body).expect("json")["balance"], 0);

        let (status, _, _) = get(app, &at("someday")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

//! Request normalization.
//!
//! Handlers receive loosely-typed strings from the path and query. The
//! constructors in this module turn them into the typed parameter structs the
//! service contract accepts, or fail with a [`ValidationError`] before any
//! collaborator is touched.

use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use thiserror::Error;

use crate::chain::ChainNetwork;
use crate::model::{Block, Coin, Transaction, Wallet, WalletAddress};
use crate::stream::{RawPaging, StreamingFindOptions};

/// Largest confirmation target accepted by the fee endpoint.
pub const MAX_FEE_TARGET: u32 = 100;

/// A missing or malformed request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required param {0}")]
    Missing(&'static str),
    #[error("Must provide {0} or {1}")]
    OneOf(&'static str, &'static str),
    #[error("Invalid {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
}

impl ValidationError {
    pub fn malformed(field: &'static str, value: &str) -> Self {
        Self::Malformed {
            field,
            value: value.to_owned(),
        }
    }
}

/// Every query-string field any route understands, unparsed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuery {
    pub chain: Option<String>,
    pub network: Option<String>,
    pub block_height: Option<String>,
    pub block_hash: Option<String>,
    pub since_block: Option<String>,
    pub start_block: Option<String>,
    pub end_block: Option<String>,
    pub unspent: Option<String>,
    pub include_spent: Option<String>,
    pub include_mempool: Option<String>,
    pub limit: Option<String>,
    pub since: Option<String>,
    pub direction: Option<String>,
    pub paging: Option<String>,
}

impl RawQuery {
    fn chain_network(&self) -> Result<ChainNetwork, ValidationError> {
        ChainNetwork::normalize(self.chain.as_deref(), self.network.as_deref())
    }

    fn paging(&self) -> RawPaging<'_> {
        RawPaging {
            limit: present(self.limit.as_deref()),
            since: present(self.since.as_deref()),
            direction: present(self.direction.as_deref()),
            paging: present(self.paging.as_deref()),
        }
    }
}

/// Empty query values (`?blockHash=`) count as absent.
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn required<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, ValidationError> {
    present(value).ok_or(ValidationError::Missing(field))
}

fn parse_int(field: &'static str, value: Option<&str>) -> Result<Option<i64>, ValidationError> {
    present(value)
        .map(|v| v.trim().parse().map_err(|_| ValidationError::malformed(field, v)))
        .transpose()
}

fn parse_flag(field: &'static str, value: Option<&str>) -> Result<bool, ValidationError> {
    match present(value).map(str::trim) {
        None | Some("false" | "0") => Ok(false),
        Some("true" | "1") => Ok(true),
        Some(other) => Err(ValidationError::malformed(field, other)),
    }
}

/// Unix seconds, an RFC 3339 timestamp, or a `YYYY-MM-DD` date taken as
/// midnight UTC.
fn parse_time(field: &'static str, value: &str) -> Result<i64, ValidationError> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.timestamp());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp())
        .ok_or_else(|| ValidationError::malformed(field, value))
}

/// Single transaction lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxParams {
    pub chain: ChainNetwork,
    pub txid: String,
}

impl TxParams {
    /// # Errors
    ///
    /// Fails when chain, network or the txid is missing.
    pub fn normalize(query: &RawQuery, txid: &str) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let txid = required("txId", Some(txid))?.to_owned();
        Ok(Self { chain, txid })
    }
}

/// Transaction lookup scoped to the block that contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInBlockParams {
    pub chain: ChainNetwork,
    pub txid: String,
    pub block_hash: String,
}

impl TxInBlockParams {
    /// # Errors
    ///
    /// Fails when chain, network, txid or block hash is missing.
    pub fn normalize(query: &RawQuery, txid: &str, block_hash: &str) -> Result<Self, ValidationError> {
        let TxParams { chain, txid } = TxParams::normalize(query, txid)?;
        let block_hash = required("blockHash", Some(block_hash))?.to_owned();
        Ok(Self {
            chain,
            txid,
            block_hash,
        })
    }
}

/// Streamed listing of the transactions in a block.
///
/// At least one of `block_height` and `block_hash` is set; when both are,
/// a transaction must match both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionListParams {
    pub chain: ChainNetwork,
    pub block_height: Option<i64>,
    pub block_hash: Option<String>,
    pub options: StreamingFindOptions,
}

impl TransactionListParams {
    /// # Errors
    ///
    /// Fails when chain or network is missing, when neither block field is
    /// given, or when the height or pagination arguments are malformed.
    pub fn normalize(query: &RawQuery) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let block_hash = present(query.block_hash.as_deref()).map(str::to_owned);
        let block_height = parse_int("blockHeight", query.block_height.as_deref())?;
        if block_hash.is_none() && block_height.is_none() {
            return Err(ValidationError::OneOf("blockHash", "blockHeight"));
        }
        let options = StreamingFindOptions::parse::<Transaction>(query.paging())?;
        Ok(Self {
            chain,
            block_height,
            block_hash,
            options,
        })
    }
}

/// Raw transaction broadcast. The payload is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastParams {
    pub chain: ChainNetwork,
    pub raw_tx: String,
}

impl BroadcastParams {
    /// # Errors
    ///
    /// Fails when chain, network or the raw transaction is missing.
    pub fn normalize(query: &RawQuery, raw_tx: &str) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let raw_tx = required("rawTx", Some(raw_tx))?.to_owned();
        Ok(Self { chain, raw_tx })
    }
}

/// Fee estimate for a confirmation target in blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeParams {
    pub chain: ChainNetwork,
    pub target: u32,
}

impl FeeParams {
    /// # Errors
    ///
    /// Fails when the target is not an integer in `0..=MAX_FEE_TARGET`.
    pub fn normalize(query: &RawQuery, target: &str) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let target = target
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|t| *t <= MAX_FEE_TARGET)
            .ok_or_else(|| ValidationError::malformed("target", target))?;
        Ok(Self { chain, target })
    }
}

/// How a single block is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSelector {
    Hash(String),
    Height(u64),
}

impl BlockSelector {
    /// A purely numeric id is a height, anything else a hash.
    fn from_id(block_id: &str) -> Self {
        let id = block_id.trim();
        id.parse::<u64>()
            .map_or_else(|_| Self::Hash(id.to_owned()), Self::Height)
    }
}

impl std::fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash(hash) => f.write_str(hash),
            Self::Height(height) => write!(f, "{height}"),
        }
    }
}

/// Single block lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockParams {
    pub chain: ChainNetwork,
    pub selector: BlockSelector,
}

impl BlockParams {
    /// # Errors
    ///
    /// Fails when chain, network or the block id is missing.
    pub fn normalize(query: &RawQuery, block_id: &str) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let selector = BlockSelector::from_id(required("blockId", Some(block_id))?);
        Ok(Self { chain, selector })
    }
}

/// Streamed block listing, optionally starting above a height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockListParams {
    pub chain: ChainNetwork,
    pub since_block: Option<i64>,
    pub options: StreamingFindOptions,
}

impl BlockListParams {
    /// # Errors
    ///
    /// Fails on missing chain or network or malformed numeric arguments.
    pub fn normalize(query: &RawQuery) -> Result<Self, ValidationError> {
        Ok(Self {
            chain: query.chain_network()?,
            since_block: parse_int("sinceBlock", query.since_block.as_deref())?,
            options: StreamingFindOptions::parse::<Block>(query.paging())?,
        })
    }
}

/// Request scoped to a chain only (tip lookup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub chain: ChainNetwork,
}

impl ChainParams {
    /// # Errors
    ///
    /// Fails when chain or network is missing.
    pub fn normalize(query: &RawQuery) -> Result<Self, ValidationError> {
        Ok(Self {
            chain: query.chain_network()?,
        })
    }
}

/// Balance of a single address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParams {
    pub chain: ChainNetwork,
    pub address: String,
}

impl AddressParams {
    /// # Errors
    ///
    /// Fails when chain, network or the address is missing.
    pub fn normalize(query: &RawQuery, address: &str) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let address = required("address", Some(address))?.to_owned();
        Ok(Self { chain, address })
    }
}

/// Streamed coins of one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressStreamParams {
    pub chain: ChainNetwork,
    pub address: String,
    pub unspent: bool,
    pub options: StreamingFindOptions,
}

impl AddressStreamParams {
    /// # Errors
    ///
    /// Fails on missing chain, network or address, a malformed `unspent`
    /// flag or malformed pagination.
    pub fn normalize(query: &RawQuery, address: &str) -> Result<Self, ValidationError> {
        let AddressParams { chain, address } = AddressParams::normalize(query, address)?;
        Ok(Self {
            chain,
            address,
            unspent: parse_flag("unspent", query.unspent.as_deref())?,
            options: StreamingFindOptions::parse::<Coin>(query.paging())?,
        })
    }
}

/// Wallet lookup by public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletParams {
    pub chain: ChainNetwork,
    pub pub_key: String,
}

impl WalletParams {
    /// # Errors
    ///
    /// Fails when chain, network or the public key is missing.
    pub fn normalize(query: &RawQuery, pub_key: &str) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let pub_key = required("pubKey", Some(pub_key))?.to_owned();
        Ok(Self { chain, pub_key })
    }
}

/// Body of a wallet creation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWallet {
    pub name: Option<String>,
    pub pub_key: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub single_address: bool,
}

/// Wallet creation.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateWalletParams {
    pub chain: ChainNetwork,
    pub wallet: Wallet,
}

impl CreateWalletParams {
    /// # Errors
    ///
    /// Fails when chain, network, name or public key is missing.
    pub fn normalize(query: &RawQuery, body: NewWallet) -> Result<Self, ValidationError> {
        let chain = query.chain_network()?;
        let name = required("name", body.name.as_deref())?.to_owned();
        let pub_key = required("pubKey", body.pub_key.as_deref())?.to_owned();
        let wallet = Wallet {
            id: String::new(),
            chain: chain.chain.clone(),
            network: chain.network.clone(),
            name,
            pub_key,
            path: body.path,
            single_address: body.single_address,
        };
        Ok(Self { chain, wallet })
    }
}

/// One entry of a wallet update body: `[{ "address": "..." }, ...]`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressEntry {
    pub address: Option<String>,
}

/// Addresses to add to a wallet, deduplicated in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateWalletParams {
    pub wallet: WalletParams,
    pub addresses: Vec<String>,
}

impl UpdateWalletParams {
    /// # Errors
    ///
    /// Fails on a missing wallet reference, an empty body or an entry
    /// without an address.
    pub fn normalize(
        query: &RawQuery,
        pub_key: &str,
        body: Vec<AddressEntry>,
    ) -> Result<Self, ValidationError> {
        let wallet = WalletParams::normalize(query, pub_key)?;
        if body.is_empty() {
            return Err(ValidationError::Missing("addresses"));
        }
        let mut addresses: Vec<String> = Vec::with_capacity(body.len());
        for entry in body {
            let address = required("address", entry.address.as_deref())?.trim();
            if !addresses.iter().any(|known| known == address) {
                addresses.push(address.to_owned());
            }
        }
        Ok(Self { wallet, addresses })
    }
}

/// Wallet balance as of a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletBalanceAtTimeParams {
    pub wallet: WalletParams,
    /// Unix seconds.
    pub time: i64,
}

impl WalletBalanceAtTimeParams {
    /// # Errors
    ///
    /// Fails on a missing wallet reference or an unparseable time.
    pub fn normalize(query: &RawQuery, pub_key: &str, time: &str) -> Result<Self, ValidationError> {
        let wallet = WalletParams::normalize(query, pub_key)?;
        let time = parse_time("time", required("time", Some(time))?)?;
        Ok(Self { wallet, time })
    }
}

/// Streamed addresses of a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAddressParams {
    pub wallet: WalletParams,
    pub options: StreamingFindOptions,
}

impl WalletAddressParams {
    /// # Errors
    ///
    /// Fails on a missing wallet reference or malformed pagination.
    pub fn normalize(query: &RawQuery, pub_key: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            wallet: WalletParams::normalize(query, pub_key)?,
            options: StreamingFindOptions::parse::<WalletAddress>(query.paging())?,
        })
    }
}

/// Streamed coins of a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletUtxoParams {
    pub wallet: WalletParams,
    pub include_spent: bool,
    pub options: StreamingFindOptions,
}

impl WalletUtxoParams {
    /// # Errors
    ///
    /// Fails on a missing wallet reference, a malformed `includeSpent` flag
    /// or malformed pagination.
    pub fn normalize(query: &RawQuery, pub_key: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            wallet: WalletParams::normalize(query, pub_key)?,
            include_spent: parse_flag("includeSpent", query.include_spent.as_deref())?,
            options: StreamingFindOptions::parse::<Coin>(query.paging())?,
        })
    }
}

/// Streamed transactions of a wallet, optionally within a block window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransactionParams {
    pub wallet: WalletParams,
    pub start_block: Option<i64>,
    pub end_block: Option<i64>,
    pub include_mempool: bool,
    pub options: StreamingFindOptions,
}

impl WalletTransactionParams {
    /// # Errors
    ///
    /// Fails on a missing wallet reference or malformed window, flag or
    /// pagination arguments.
    pub fn normalize(query: &RawQuery, pub_key: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            wallet: WalletParams::normalize(query, pub_key)?,
            start_block: parse_int("startBlock", query.start_block.as_deref())?,
            end_block: parse_int("endBlock", query.end_block.as_deref())?,
            include_mempool: parse_flag("includeMempool", query.include_mempool.as_deref())?,
            options: StreamingFindOptions::parse::<Transaction>(query.paging())?,
        })
    }
}

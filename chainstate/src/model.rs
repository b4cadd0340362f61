//! Records returned by the storage collaborator.
//!
//! The core only inspects a few fields of these records: the confirmation
//! height (for cache policy), the paging cursors (for streaming) and, for
//! coins, the minting and spending transaction ids. Everything else is passed
//! through to the client untouched.

use serde::{Deserialize, Serialize};

use crate::stream::{Cursor, PagingField, Pageable};

/// Heights below zero mark records that are not yet in a block.
const fn confirmed(height: i64) -> Option<u64> {
    if height >= 0 {
        Some(height.unsigned_abs())
    } else {
        None
    }
}

/// Records whose confirmation depth can be measured against the chain tip.
pub trait Confirmable {
    /// Height of the block containing the record, `None` while unconfirmed.
    fn confirmed_height(&self) -> Option<u64>;
}

/// A transaction as indexed by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub txid: String,
    pub chain: String,
    pub network: String,
    /// Negative while the transaction sits in the mempool.
    pub block_height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub coinbase: bool,
    #[serde(default)]
    pub fee: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub input_count: u32,
    #[serde(default)]
    pub output_count: u32,
    /// Ids of the wallets that own an input or output of this transaction.
    #[serde(default, skip_serializing)]
    pub wallets: Vec<String>,
}

impl Confirmable for Transaction {
    fn confirmed_height(&self) -> Option<u64> {
        confirmed(self.block_height)
    }
}

impl Pageable for Transaction {
    const PAGING: &'static [PagingField] = &[PagingField::Id, PagingField::Height, PagingField::Time];
    const DEFAULT_PAGING: PagingField = PagingField::Id;

    fn cursor(&self, field: PagingField) -> Option<Cursor> {
        match field {
            PagingField::Id => Some(Cursor::Text(self.txid.clone())),
            PagingField::Height => Some(Cursor::Int(self.block_height)),
            PagingField::Time => self.block_time.map(Cursor::Int),
        }
    }
}

/// A block header plus summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub chain: String,
    pub network: String,
    pub height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<String>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub transaction_count: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub reward: i64,
}

impl Confirmable for Block {
    fn confirmed_height(&self) -> Option<u64> {
        confirmed(self.height)
    }
}

impl Pageable for Block {
    const PAGING: &'static [PagingField] = &[PagingField::Id, PagingField::Height, PagingField::Time];
    const DEFAULT_PAGING: PagingField = PagingField::Height;

    fn cursor(&self, field: PagingField) -> Option<Cursor> {
        match field {
            PagingField::Id => Some(Cursor::Text(self.hash.clone())),
            PagingField::Height => Some(Cursor::Int(self.height)),
            PagingField::Time => Some(Cursor::Int(self.time)),
        }
    }
}

/// A transaction output, spent or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coin {
    pub chain: String,
    pub network: String,
    pub mint_txid: String,
    pub mint_index: u32,
    /// Negative while the minting transaction is unconfirmed.
    pub mint_height: i64,
    pub address: String,
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spent_txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spent_height: Option<i64>,
    #[serde(default)]
    pub coinbase: bool,
    #[serde(default, skip_serializing)]
    pub wallets: Vec<String>,
}

impl Coin {
    /// `txid:vout` outpoint of this coin.
    #[must_use]
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.mint_txid, self.mint_index)
    }

    /// Whether a transaction has consumed this output.
    #[must_use]
    pub const fn is_spent(&self) -> bool {
        self.spent_txid.is_some()
    }
}

impl Confirmable for Coin {
    fn confirmed_height(&self) -> Option<u64> {
        confirmed(self.mint_height)
    }
}

impl Pageable for Coin {
    const PAGING: &'static [PagingField] = &[PagingField::Id, PagingField::Height];
    const DEFAULT_PAGING: PagingField = PagingField::Id;

    fn cursor(&self, field: PagingField) -> Option<Cursor> {
        match field {
            PagingField::Id => Some(Cursor::Text(self.outpoint())),
            PagingField::Height => Some(Cursor::Int(self.mint_height)),
            PagingField::Time => None,
        }
    }
}

/// Head of an identity-output chain starting at `authbase`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authhead {
    pub chain: String,
    pub network: String,
    pub authbase: String,
    /// Output 0 of the authbase and of every transaction that spent it in turn.
    pub identity_outputs: Vec<Coin>,
}

/// Balance split by confirmation state, in the chain's base unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
    pub balance: i64,
}

impl Balance {
    /// Adds an unspent coin to the running totals.
    pub fn add(&mut self, coin: &Coin) {
        if coin.confirmed_height().is_some() {
            self.confirmed += coin.value;
        } else {
            self.unconfirmed += coin.value;
        }
        self.balance += coin.value;
    }
}

/// Inputs and outputs of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoinListing {
    pub inputs: Vec<Coin>,
    pub outputs: Vec<Coin>,
}

/// A watch-only wallet registered by its public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub network: String,
    pub name: String,
    pub pub_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub single_address: bool,
}

/// Membership of an address in a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    pub wallet: String,
    pub address: String,
    pub chain: String,
    pub network: String,
}

impl Pageable for WalletAddress {
    const PAGING: &'static [PagingField] = &[PagingField::Id];
    const DEFAULT_PAGING: PagingField = PagingField::Id;

    fn cursor(&self, field: PagingField) -> Option<Cursor> {
        match field {
            PagingField::Id => Some(Cursor::Text(self.address.clone())),
            PagingField::Height | PagingField::Time => None,
        }
    }
}

/// Fee rate estimate returned by the node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRate {
    /// Rate in coin units per kilobyte, as reported by the node.
    pub feerate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(height: i64, value: i64) -> Coin {
        Coin {
            chain: "BTC".into(),
            network: "main".into(),
            mint_txid: "aa".into(),
            mint_index: 0,
            mint_height: height,
            address: "1abc".into(),
            value,
            script: None,
            spent_txid: None,
            spent_height: None,
            coinbase: false,
            wallets: vec![],
        }
    }

    #[test]
    fn balance_splits_by_confirmation() {
        let mut balance = Balance::default();
        balance.add(&coin(10, 500));
        balance.add(&coin(-1, 25));
        balance.add(&coin(0, 5));
        assert_eq!(
            balance,
            Balance {
                confirmed: 505,
                unconfirmed: 25,
                balance: 530
            }
        );
    }

    #[test]
    fn mempool_records_have_no_height() {
        assert_eq!(coin(-1, 1).confirmed_height(), None);
        assert_eq!(coin(7, 1).confirmed_height(), Some(7));
    }

    #[test]
    fn transaction_json_is_camel_case_and_hides_wallets() {
        let tx = Transaction {
            txid: "ff".into(),
            chain: "BTC".into(),
            network: "main".into(),
            block_height: 12,
            block_hash: Some("00ab".into()),
            block_time: None,
            coinbase: false,
            fee: 100,
            size: 250,
            value: 1_000,
            input_count: 1,
            output_count: 2,
            wallets: vec!["w1".into()],
        };
        let json = serde_json::to_value(&tx).expect("serialize");
        assert_eq!(json["blockHeight"], 12);
        assert_eq!(json["blockHash"], "00ab");
        assert!(json.get("wallets").is_none());
        assert!(json.get("blockTime").is_none());
    }
}

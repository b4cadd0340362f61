//! Chain configuration types and ticker-keyed TOML (de)serialisation.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default RPC request timeout in seconds.
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// Node software family of a chain. Selects which operation overrides are
/// registered on top of the default UTXO implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Btc,
    Bch,
    Bsv,
    Doge,
    Ltc,
}

impl ChainFamily {
    /// Family implied by a well-known ticker.
    #[must_use]
    pub fn from_ticker(ticker: &str) -> Option<Self> {
        ticker.parse().ok()
    }
}

impl FromStr for ChainFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btc" => Ok(Self::Btc),
            "bch" => Ok(Self::Bch),
            "bsv" => Ok(Self::Bsv),
            "doge" => Ok(Self::Doge),
            "ltc" => Ok(Self::Ltc),
            other => Err(format!("unknown chain family: {other}")),
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Btc => "btc",
            Self::Bch => "bch",
            Self::Bsv => "bsv",
            Self::Doge => "doge",
            Self::Ltc => "ltc",
        })
    }
}

/// JSON-RPC endpoint of the node serving one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP(S) RPC URL.
    pub rpc_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_password: Option<String>,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

const fn default_rpc_timeout() -> u64 {
    DEFAULT_RPC_TIMEOUT_SECS
}

/// Inner configuration for a chain (matches TOML structure).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChainConfigInner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    family: Option<ChainFamily>,
    #[serde(default)]
    networks: BTreeMap<String, NetworkConfig>,
}

/// Full chain configuration with its ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Uppercase ticker the chain is addressed by (`BTC`, `BSV`, ...).
    pub ticker: String,
    pub family: ChainFamily,
    /// RPC settings keyed by lowercase network name.
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// [`ChainConfig`] entries sorted by ticker.
///
/// Serialised as a TOML map keyed by ticker. The file's table order is not
/// kept.
#[derive(Debug, Clone, Default)]
pub struct ChainsConfig(pub Vec<ChainConfig>);

impl Deref for ChainsConfig {
    type Target = Vec<ChainConfig>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for ChainsConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for chain in &self.0 {
            let inner = ChainConfigInner {
                family: Some(chain.family),
                networks: chain.networks.clone(),
            };
            map.serialize_entry(&chain.ticker, &inner)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChainsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{MapAccess, Visitor};

        struct ChainsVisitor;

        impl<'de> Visitor<'de> for ChainsVisitor {
            type Value = ChainsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of chain tickers to chain configurations")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut chains: Vec<ChainConfig> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));

                while let Some(key) = access.next_key::<String>()? {
                    let ticker = key.trim().to_uppercase();
                    if ticker.is_empty() {
                        return Err(serde::de::Error::custom("empty chain ticker"));
                    }
                    if chains.iter().any(|c| c.ticker == ticker) {
                        return Err(serde::de::Error::custom(format!(
                            "chain {ticker} is configured more than once"
                        )));
                    }
                    let inner: ChainConfigInner = access.next_value()?;
                    let family = inner
                        .family
                        .or_else(|| ChainFamily::from_ticker(&ticker))
                        .ok_or_else(|| {
                            serde::de::Error::custom(format!(
                                "unknown chain family for {ticker}; set `family`"
                            ))
                        })?;
                    let networks = inner
                        .networks
                        .into_iter()
                        .map(|(name, network)| (name.to_lowercase(), network))
                        .collect();
                    chains.push(ChainConfig {
                        ticker,
                        family,
                        networks,
                    });
                }

                chains.sort_by(|a, b| a.ticker.cmp(&b.ticker));
                Ok(ChainsConfig(chains))
            }
        }

        deserializer.deserialize_map(ChainsVisitor)
    }
}

//! The `(chain, network)` address of every request.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::params::ValidationError;

/// Case-canonical `(chain, network)` pair.
///
/// The chain is an uppercase ticker (`BTC`, `BSV`), the network a lowercase
/// environment name (`main`, `test`, `regtest`). Normalization only fixes
/// case; whether a chain is actually served is decided by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainNetwork {
    pub chain: String,
    pub network: String,
}

impl ChainNetwork {
    /// Builds a pair from raw request values.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Missing`] when either value is absent or
    /// blank.
    pub fn normalize(chain: Option<&str>, network: Option<&str>) -> Result<Self, ValidationError> {
        let chain = non_blank(chain).ok_or(ValidationError::Missing("chain"))?;
        let network = non_blank(network).ok_or(ValidationError::Missing("network"))?;
        Ok(Self {
            chain: chain.to_uppercase(),
            network: network.to_lowercase(),
        })
    }

    /// Shorthand for already-trusted values, e.g. from configuration.
    #[must_use]
    pub fn new(chain: &str, network: &str) -> Self {
        Self {
            chain: chain.to_uppercase(),
            network: network.to_lowercase(),
        }
    }
}

impl fmt::Display for ChainNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.network)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case() {
        let id = ChainNetwork::normalize(Some("btc"), Some("MAIN")).expect("valid");
        assert_eq!(id, ChainNetwork::new("BTC", "main"));
        assert_eq!(id.to_string(), "BTC:main");
    }

    #[test]
    fn unknown_chains_still_normalize() {
        let id = ChainNetwork::normalize(Some("zzz"), Some("Test")).expect("valid");
        assert_eq!(id.chain, "ZZZ");
        assert_eq!(id.network, "test");
    }

    #[test]
    fn missing_or_blank_values_are_rejected() {
        assert_eq!(
            ChainNetwork::normalize(None, Some("main")),
            Err(ValidationError::Missing("chain"))
        );
        assert_eq!(
            ChainNetwork::normalize(Some("BTC"), Some("  ")),
            Err(ValidationError::Missing("network"))
        );
    }
}

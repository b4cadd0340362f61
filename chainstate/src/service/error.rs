//! Request-level error taxonomy.

use thiserror::Error;

use super::Operation;
use crate::params::ValidationError;

/// Failure reported by an external collaborator (storage engine or node RPC).
///
/// Carries the collaborator's message verbatim; it is what the client sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    message: String,
}

impl FetchError {
    /// Creates an error from a collaborator message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates an error with context and the underlying cause appended.
    pub fn with(context: &str, cause: impl std::fmt::Display) -> Self {
        Self {
            message: format!("{context}: {cause}"),
        }
    }
}

/// What kind of record a lookup failed to find.
///
/// Only the response wording differs; every variant maps to a 404.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
    #[error("The requested txid {0} could not be found.")]
    Transaction(String),
    #[error("Authhead for txid {0} could not be found.")]
    Authhead(String),
    #[error("The requested block {0} could not be found.")]
    Block(String),
    #[error("No tip found for {0}.")]
    Tip(String),
    #[error("Wallet {0} could not be found.")]
    Wallet(String),
}

/// Everything a chain-state request can fail with.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request parameters were missing or malformed; nothing was executed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No implementation is registered for the chain.
    #[error("Chain {0} is not supported")]
    UnknownChain(String),

    /// The chain is served but the network has no backend configured.
    #[error("Network {network} is not configured for chain {chain}")]
    UnknownNetwork { chain: String, network: String },

    /// The query ran but matched nothing.
    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// The record being created already exists.
    #[error("{0}")]
    Conflict(String),

    /// A collaborator failed while the request was executing.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The resolved implementation does not provide this operation.
    #[error("operation {0} is not implemented for this chain")]
    Unsupported(Operation),
}

//! Unified error types for the chainstate server.

use thiserror::Error;

use crate::chain::RegistryError;

/// Top-level error type for the chainstate application.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be resolved, read, or parsed.
    #[error("config: {0}")]
    Config(String),

    /// Chain backend initialization failed.
    #[error("chain: {0}")]
    Chain(String),

    /// The chain registry rejected a registration.
    #[error("chain: {0}")]
    Registry(#[from] RegistryError),

    /// Server bind or runtime error.
    #[error("server: {0}")]
    Server(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn config_with(context: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Config(format!("{}: {cause}", context.into()))
    }

    pub fn chain_with(context: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Chain(format!("{}: {cause}", context.into()))
    }

    pub fn server_with(context: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Server(format!("{}: {cause}", context.into()))
    }
}

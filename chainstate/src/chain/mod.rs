//! Chain addressing, configuration, and the service registry.
//!
//! - [`ChainNetwork`]: the normalized `(chain, network)` pair every request carries.
//! - [`config`]: chain configuration types and ticker-keyed TOML (de)serialisation.
//! - [`registry`]: [`ChainRegistry`], default implementations plus per-operation overrides.
//! - [`provider`]: registry construction from configuration.

mod config;
mod id;
mod provider;
mod registry;

pub use self::config::*;
pub use self::id::ChainNetwork;
pub use self::provider::*;
pub use self::registry::*;

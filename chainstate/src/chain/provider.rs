//! Chain backends and registry construction.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::config::{ChainConfig, ChainFamily, ChainsConfig};
use super::id::ChainNetwork;
use super::registry::{Binding, ChainRegistry};
use crate::error::Error;
use crate::rpc::{JsonRpcClient, NodePool};
use crate::service::Operation;
use crate::service::fee::LegacyFeeEstimator;
use crate::service::utxo::UtxoChainState;
use crate::storage::Storage;

/// Create the [`NodePool`] for a single [`ChainConfig`] entry.
///
/// # Errors
///
/// Returns an error if an RPC URL is invalid or its client cannot be built.
pub fn build_node_pool(config: &ChainConfig) -> Result<NodePool, Error> {
    let mut nodes = NodePool::new(&config.ticker);
    for (network, settings) in &config.networks {
        let url = Url::parse(&settings.rpc_url).map_err(|e| {
            Error::chain_with(
                format!("invalid rpc_url for {}:{network}", config.ticker),
                e,
            )
        })?;
        let client = JsonRpcClient::new(
            url,
            settings.rpc_user.clone(),
            settings.rpc_password.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
        .map_err(|e| Error::chain_with(format!("{}:{network}", config.ticker), e))?;
        nodes = nodes.with_node(network, Arc::new(client));
    }
    Ok(nodes)
}

/// Build a [`ChainRegistry`] from a [`ChainsConfig`].
///
/// Every chain gets the UTXO default implementation over `storage` and its
/// own nodes, then the overrides its family needs.
///
/// # Errors
///
/// Returns an error if any node client fails to initialise or a registration
/// conflicts.
pub fn build_chain_registry(
    chains: &ChainsConfig,
    storage: &Arc<dyn Storage>,
) -> Result<ChainRegistry, Error> {
    let mut registry = ChainRegistry::new();
    for chain in chains.iter() {
        let nodes = build_node_pool(chain)?;
        registry.register(
            &chain.ticker,
            Arc::new(UtxoChainState::new(Arc::clone(storage), nodes.clone())),
        )?;
        match chain.family {
            ChainFamily::Bsv => registry.register_override(
                &chain.ticker,
                Operation::GetFee,
                Arc::new(LegacyFeeEstimator::new(nodes)),
            )?,
            ChainFamily::Btc | ChainFamily::Bch | ChainFamily::Doge | ChainFamily::Ltc => {}
        }
        if let Ok(resolved) = registry.resolve(&ChainNetwork::new(&chain.ticker, "")) {
            let overrides: Vec<_> = resolved
                .bindings()
                .into_iter()
                .filter(|(_, binding)| *binding == Binding::Override)
                .map(|(operation, _)| operation.name())
                .collect();
            tracing::info!(
                chain = resolved.chain(),
                family = %chain.family,
                networks = chain.networks.len(),
                ?overrides,
                "registered chain"
            );
        }
    }
    Ok(registry)
}

//! `chainstate check` command: validate a configuration without serving.
//!
//! Loads the config and the storage fixtures, builds the chain registry the
//! same way `serve` does, then prints which chains are served and which
//! operations each one overrides.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use crate::chain::{Binding, ChainNetwork, ChainRegistry, build_chain_registry};
use crate::config::{Config, load_config};
use crate::error::Error;
use crate::storage::{Fixtures, MemoryStore, Storage};

/// Execute the `check` command.
///
/// # Errors
///
/// Returns the first error `serve` would fail with during startup.
#[allow(clippy::print_stdout)]
pub fn run(config_path: &Path) -> Result<(), Error> {
    let config = load_config(config_path)?;
    let fixtures = config
        .storage()
        .fixtures
        .as_deref()
        .map(Fixtures::load)
        .transpose()?
        .unwrap_or_default();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new(fixtures));
    let registry = build_chain_registry(config.chains(), &storage)?;
    print!("{}", summary(&config, &registry));
    Ok(())
}

fn summary(config: &Config, registry: &ChainRegistry) -> String {
    let mut out = format!(
        "listen  http://{}{}\n",
        config.addr(),
        config.api_root().trim_end_matches('/')
    );
    if config.chains().is_empty() {
        out.push_str("no chains configured\n");
    }
    for chain in config.chains().iter() {
        let networks: Vec<_> = chain.networks.keys().map(String::as_str).collect();
        let overrides: Vec<_> = registry
            .resolve(&ChainNetwork::new(&chain.ticker, ""))
            .map(|service| {
                service
                    .bindings()
                    .into_iter()
                    .filter(|(_, binding)| *binding == Binding::Override)
                    .map(|(operation, _)| operation.name())
                    .collect()
            })
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:<6}  family={}  networks=[{}]  overrides=[{}]",
            chain.ticker,
            chain.family,
            networks.join(","),
            overrides.join(","),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::generate_default_config;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    #[test]
    fn summarizes_the_default_template() {
        let file = config_file(&generate_default_config());
        let config = load_config(file.path()).expect("valid");
        let storage: Arc<dyn Storage> = Arc::new(MemoryStore::default());
        let registry = build_chain_registry(config.chains(), &storage).expect("registry");

        let text = summary(&config, &registry);
        assert!(text.contains("/api\n"));
        assert!(text.contains("BTC     family=btc  networks=[main]  overrides=[]"));
        assert!(text.contains("BSV     family=bsv  networks=[main]  overrides=[getFee]"));
    }

    #[test]
    fn missing_fixtures_fail_the_check() {
        let file = config_file("[storage]\nfixtures = \"does-not-exist.json\"\n");
        let err = run(file.path()).expect_err("missing fixtures");
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("does-not-exist.json"));
    }
}

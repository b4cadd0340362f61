//! `chainstate init` command: generate a default TOML configuration file.

use std::fs;
use std::path::Path;

use crate::config::generate_default_config;
use crate::error::Error;

/// Writes the default configuration template to `output`.
///
/// An existing file is only replaced when `force` is set. Missing parent
/// directories are created.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file exists without `force`, or if the
/// directory or file cannot be written.
#[allow(clippy::print_stderr)]
pub fn run(output: &Path, force: bool) -> Result<(), Error> {
    if output.exists() && !force {
        return Err(Error::config(format!(
            "'{}' already exists, use --force to overwrite",
            output.display()
        )));
    }
    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| {
            Error::config_with(format!("failed to create '{}'", dir.display()), e)
        })?;
    }

    fs::write(output, generate_default_config())
        .map_err(|e| Error::config_with(format!("failed to write '{}'", output.display()), e))?;

    eprintln!(
        "Config file written to {}; start the server with `chainstate serve -c {}`",
        output.display(),
        output.display()
    );
    Ok(())
}

//! Subcommand handlers.

pub mod config_cmd;
pub mod watch;

use pvstream_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the effective configuration: `--config` if given, else the
/// platform default path, layered under `PVSTREAM_` variables.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let config = match global.config.as_deref() {
        Some(path) => pvstream_config::load_config_from(path)?,
        None => pvstream_config::load_config()?,
    };
    Ok(config)
}

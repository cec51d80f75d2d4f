//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments shared by connector binaries.
#[derive(Parser, Debug, Clone)]
#[command(about = "Modbus device connector")]
pub struct ServiceArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ServiceArgs {
    /// Parse CLI arguments, falling back to `default_config` when `--config` is absent.
    ///
    /// Exits the process with clap's usage message on invalid arguments.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::try_parse_from_with_default(std::env::args_os(), default_config)
            .unwrap_or_else(|e| e.exit())
    }

    /// Parse from an explicit argument list.
    pub fn try_parse_from_with_default<I, T>(
        args: I,
        default_config: &'static str,
    ) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .try_get_matches_from(args)?;

        <Self as clap::FromArgMatches>::from_arg_matches(&matches)
    }
}

//! freegpu CLI
//!
//! Picks an idle GPU for the current process, or honours an existing
//! `CUDA_VISIBLE_DEVICES` restriction.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use freegpu_core::{FreeGpuConfig, LogFormat};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// freegpu - claim an idle GPU before a job starts
#[derive(Parser, Debug)]
#[command(name = "freegpu")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (overrides RUST_LOG and the configuration file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Where device state is read from
    #[arg(long, value_enum, default_value_t = Source::Smi, global = true)]
    source: Source,

    /// Path to nvidia-smi
    #[arg(long, global = true)]
    smi: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Scrape `nvidia-smi` CSV output
    Smi,
    /// Query NVML directly
    Nvml,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Assign a GPU to this process (default)
    Select {
        /// Print the selection as JSON
        #[arg(long)]
        json: bool,

        /// Do not run nvidia-smi after the selection
        #[arg(long)]
        no_display: bool,

        /// Do not create a context on the selected device
        #[arg(long)]
        no_materialize: bool,
    },

    /// List idle GPUs without claiming one
    Idle {
        /// Print the device snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a shell export line for the highest idle GPU
    Env,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Select {
            json: false,
            no_display: false,
            no_materialize: false,
        }
    }
}

/// Level requested on the command line, if any
fn cli_log_level(cli: &Cli) -> Option<String> {
    if cli.verbose {
        Some("debug".to_string())
    } else {
        cli.log_level.clone()
    }
}

/// A level given on the command line wins over `RUST_LOG`, which wins over the config file
fn log_filter(cli_level: Option<&str>, config_level: &str) -> EnvFilter {
    match cli_level {
        Some(level) => EnvFilter::new(level),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level))
        }
    }
}

fn init_logging(filter: EnvFilter, format: LogFormat) {
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
    };
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FreeGpuConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FreeGpuConfig::default(),
    };
    if let Some(smi) = &cli.smi {
        config.smi.program = smi.clone();
    }

    let filter = log_filter(cli_log_level(&cli).as_deref(), &config.logging.level);
    init_logging(filter, config.logging.format);

    let resolver = commands::build_resolver(cli.source, &config)?;

    match cli.command.unwrap_or_default() {
        Commands::Select {
            json,
            no_display,
            no_materialize,
        } => {
            let opts = commands::SelectOptions {
                json,
                display: !no_display,
                materialize: !no_materialize,
            };
            commands::select(&resolver, &config, opts).await?;
        }
        Commands::Idle { json } => {
            commands::idle(&resolver, json).await?;
        }
        Commands::Env => {
            commands::env(&resolver, &config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_select() {
        let cli = Cli::try_parse_from(["freegpu"]).unwrap();
        assert_eq!(cli.command.unwrap_or_default(), Commands::default());
        assert_eq!(cli.source, Source::Smi);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["freegpu", "idle", "--json", "--smi", "/opt/bin/nvidia-smi"])
                .unwrap();
        assert_eq!(cli.command, Some(Commands::Idle { json: true }));
        assert_eq!(cli.smi, Some(PathBuf::from("/opt/bin/nvidia-smi")));
    }

    #[test]
    fn test_cli_log_level() {
        let cli = Cli::try_parse_from(["freegpu"]).unwrap();
        assert_eq!(cli_log_level(&cli), None);

        let cli = Cli::try_parse_from(["freegpu", "--log-level", "info"]).unwrap();
        assert_eq!(cli_log_level(&cli).as_deref(), Some("info"));

        let cli = Cli::try_parse_from(["freegpu", "-v", "--log-level", "info"]).unwrap();
        assert_eq!(cli_log_level(&cli).as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_level_overrides_rust_log() {
        std::env::set_var("RUST_LOG", "trace");
        let filter = log_filter(Some("info"), "warn");
        std::env::remove_var("RUST_LOG");
        assert_eq!(filter.to_string(), "info");
    }
}

//! tfindex CLI - collects, parses and indexes infrastructure-as-code sources

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tfindex::RuntimeConfig;

mod commands;
mod logging;

use commands::{cmd_config_init, cmd_config_show, cmd_parse, cmd_records, cmd_run};
use logging::{init_cli_logging, init_run_logging};

#[derive(Parser)]
#[command(name = "tfindex")]
#[command(about = "Collect, parse and index infrastructure-as-code sources")]
#[command(after_help = "\
QUICK START:
  tfindex config init             # Write a default config
  tfindex run                     # Run the pipeline until ctrl-c
  tfindex records --kind resource # Query indexed records

ONE-OFF:
  tfindex parse main.tf           # Print the records a file yields
  tfindex parse prod.tfstate --save")]
struct Cli {
  /// Config file (default: $TFINDEX_CONFIG, then ~/.config/tfindex/config.toml)
  #[arg(long, global = true, value_name = "PATH")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `tfindex config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration
  Show,

  /// Write the default config to the user config path
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run the pipeline until ctrl-c or SIGTERM
  Run {
    /// Log to a rolling file in the data directory instead of the console
    #[arg(long)]
    log_file: bool,
  },
  /// Manage configuration
  #[command(after_help = "\
CONFIG LOCATIONS:
  Flag:  --config <path>
  Env:   TFINDEX_CONFIG
  User:  ~/.config/tfindex/config.toml")]
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
  /// Parse one local file and print its records as JSON
  Parse {
    /// File to parse
    file: PathBuf,
    /// Content type: config or state (default: detected from the path)
    #[arg(long)]
    content_type: Option<String>,
    /// Also write the item and its records to the configured store
    #[arg(long)]
    save: bool,
  },
  /// Query records in the file store
  Records {
    /// Filter by record kind (resource, provider, variable, output, module, data)
    #[arg(long)]
    kind: Option<String>,
    /// Filter by owning item id
    #[arg(long)]
    item: Option<String>,
    #[arg(short, long)]
    limit: Option<usize>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run { log_file } => {
      // Config errors are fatal and reported before any logging is set up
      let runtime = RuntimeConfig::load(cli.config.as_deref())?;
      let _guard = init_run_logging(&runtime.config.logging, log_file);
      cmd_run(runtime).await
    }

    // Config subcommands
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Show => cmd_config_show(cli.config.as_deref()).await,
        ConfigCommand::Init { force } => cmd_config_init(force).await,
      }
    }

    Commands::Parse {
      file,
      content_type,
      save,
    } => {
      init_cli_logging();
      cmd_parse(cli.config.as_deref(), &file, content_type.as_deref(), save).await
    }
    Commands::Records {
      kind,
      item,
      limit,
      json,
    } => {
      init_cli_logging();
      cmd_records(cli.config.as_deref(), kind.as_deref(), item, limit, json).await
    }
  }
}

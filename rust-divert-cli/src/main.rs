use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod rules;
mod utils;

/// rust-divert command line interface
#[derive(Parser)]
#[clap(name = "divert", author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a JSON rule list into the binary wire format
    Encode {
        /// JSON rule list
        rules: PathBuf,

        /// Output file for the encoded records
        #[clap(short, long)]
        output: PathBuf,
    },

    /// Compile a rule list and show the program and its hook plan
    Analyze {
        /// Rule list (JSON, or binary with a .bin extension)
        rules: PathBuf,

        /// Layer to plan hooks for
        #[clap(long, default_value = "network")]
        layer: String,
    },

    /// Evaluate a rule list against a single packet
    Check {
        /// Rule list (JSON, or binary with a .bin extension)
        rules: PathBuf,

        /// Packet bytes in hex
        #[clap(short, long)]
        packet: String,

        /// Treat the packet as outbound (default inbound)
        #[clap(long)]
        outbound: bool,

        /// Interface index the packet arrived on
        #[clap(long, default_value = "0")]
        if_idx: u32,

        /// Sub-interface index the packet arrived on
        #[clap(long, default_value = "0")]
        sub_if_idx: u32,
    },

    /// Run packets from a file through a diversion context
    Replay {
        /// Rule list (JSON, or binary with a .bin extension)
        rules: PathBuf,

        /// File of `in|out <hex>` lines
        #[clap(short, long)]
        packets: PathBuf,

        /// Context configuration (TOML)
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Reader buffer size
        #[clap(long, default_value = "65535")]
        max_len: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "debug" } else { "info" },
    ))
    .init();

    match cli.command {
        Commands::Encode { rules, output } => {
            commands::encode::handle_command(&rules, &output)?;
        }
        Commands::Analyze { rules, layer } => {
            commands::analyze::handle_command(&rules, &layer)?;
        }
        Commands::Check {
            rules,
            packet,
            outbound,
            if_idx,
            sub_if_idx,
        } => {
            commands::check::handle_command(&rules, &packet, outbound, if_idx, sub_if_idx)?;
        }
        Commands::Replay {
            rules,
            packets,
            config,
            max_len,
        } => {
            commands::replay::handle_command(&rules, &packets, config.as_deref(), max_len).await?;
        }
    }

    Ok(())
}

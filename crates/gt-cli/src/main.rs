//! Gas Town CLI entrypoint.

use clap::Parser;
use gt_core::GtConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;

use commands::{Commands, ConvoyCommands, MachineCommands, MailCommands, MayorCommands};
use handlers::Town;

#[derive(Parser)]
#[command(name = "gt")]
#[command(author, version, about = "Gas Town command-line interface", long_about = None)]
struct Cli {
    /// Town root (defaults to $GT_ROOT, then ~/gt)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let town = Town::new(GtConfig::load(cli.root)?)?;

    match cli.command {
        Commands::Mayor { command } => match command {
            MayorCommands::Chat {
                message,
                timeout,
                quiet,
            } => handlers::mayor_chat(&town, message, timeout, quiet).await?,
        },
        Commands::Mail { command } => match command {
            MailCommands::Send {
                to,
                subject,
                body,
                from,
            } => handlers::mail_send(&town, &from, &to, &subject, &body).await?,
        },
        Commands::Convoy { command } => match command {
            ConvoyCommands::Check { issue_id, prefix } => {
                handlers::convoy_check(&town, &issue_id, prefix).await?;
            }
        },
        Commands::Sling { issue_id, worker } => handlers::sling(&town, &issue_id, &worker).await?,
        Commands::Machines { command } => match command {
            MachineCommands::List => handlers::machines_list(&town),
        },
    }

    Ok(())
}

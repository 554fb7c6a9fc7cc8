//! CLI command definitions.

use clap::Subcommand;
use std::time::Duration;

#[derive(Subcommand)]
pub enum Commands {
    /// Talk to the mayor
    Mayor {
        #[command(subcommand)]
        command: MayorCommands,
    },

    /// Send mail between workers
    Mail {
        #[command(subcommand)]
        command: MailCommands,
    },

    /// Inspect and advance convoys
    Convoy {
        #[command(subcommand)]
        command: ConvoyCommands,
    },

    /// Hand an issue to a worker
    Sling {
        /// Issue ID
        issue_id: String,

        /// Worker address ([machine:]rig/worker)
        worker: String,
    },

    /// Inspect the machine registry
    Machines {
        #[command(subcommand)]
        command: MachineCommands,
    },
}

#[derive(Subcommand)]
pub enum MayorCommands {
    /// Send a message to the mayor and print the reply
    Chat {
        /// Message text; read from stdin when omitted
        message: Option<String>,

        /// How long to wait for the reply (e.g. 30s, 2m, 1500ms)
        #[arg(long, default_value = "30s", value_parser = parse_timeout)]
        timeout: Duration,

        /// Only print the reply
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Subcommand)]
pub enum MailCommands {
    /// Deliver a message to a worker's inbox
    Send {
        /// Recipient address ([machine:]rig/worker)
        to: String,

        #[arg(short, long)]
        subject: String,

        #[arg(short = 'm', long)]
        body: String,

        /// Sender address
        #[arg(long, default_value = "mayor")]
        from: String,
    },
}

#[derive(Subcommand)]
pub enum ConvoyCommands {
    /// Re-examine the convoys tracking an issue
    Check {
        /// Issue whose state changed
        issue_id: String,

        /// Only consider issues with this ID prefix
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum MachineCommands {
    /// List configured machines
    List,
}

/// Parse `30s`, `2m`, `1h`, `1500ms` or a bare number of seconds.
pub fn parse_timeout(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {input:?}"))?;
    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => return Err(format!("unknown duration unit {unit:?} in {input:?}")),
    };
    if duration.is_zero() {
        return Err("duration must be positive".to_string());
    }
    Ok(duration)
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upkeep_core::{ActorKind, ItemKind, LogStatus, SortOrder};

mod completion;
mod dispatch;
mod render;
mod replay;

use dispatch::run_cli;

const LOG_ENV: &str = "UPKEEP_LOG";

#[derive(Parser, Debug)]
#[command(name = "upkeep")]
#[command(about = "Audit log for core, plugin, theme and translation updates", long_about = None)]
struct Cli {
    /// State directory. Defaults to $UPKEEP_PREFIX, then ~/.upkeep.
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the state directory, the log table and a default policy.
    Init,
    List(ListArgs),
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    Delete {
        id: i64,
    },
    /// Remove entries older than the retention window.
    Cleanup {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Feed a recorded signal script through the reconciliation engine.
    Replay {
        file: PathBuf,
        #[arg(long)]
        tenant: Option<i64>,
        #[arg(long, value_parser = parse_actor)]
        actor: Option<ActorKind>,
    },
    Policy {
        #[command(subcommand)]
        command: Option<PolicyCommands>,
    },
    Doctor,
    Completions {
        shell: Shell,
    },
}

#[derive(Args, Debug, Default)]
struct ListArgs {
    #[arg(long)]
    tenant: Option<i64>,
    #[arg(long, value_parser = parse_kind)]
    kind: Option<ItemKind>,
    #[arg(long, value_parser = parse_status)]
    status: Option<LogStatus>,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 20)]
    per_page: u32,
    #[arg(long, value_parser = parse_order, default_value = "desc")]
    order: SortOrder,
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    Show,
    SetLogging {
        state: Toggle,
    },
    SetRetention {
        days: i64,
    },
    SetAutoUpdate {
        #[arg(value_parser = parse_kind)]
        kind: ItemKind,
        state: Toggle,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Self::On
    }
}

fn parse_kind(value: &str) -> Result<ItemKind> {
    ItemKind::parse(value)
}

fn parse_status(value: &str) -> Result<LogStatus> {
    LogStatus::parse(value)
}

fn parse_order(value: &str) -> Result<SortOrder> {
    SortOrder::parse(value)
}

fn parse_actor(value: &str) -> Result<ActorKind> {
    ActorKind::parse(value)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // A second init (tests) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_cli(cli)
}

#[cfg(test)]
mod tests;

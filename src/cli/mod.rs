use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "infisical-config", version, about = "Load configuration secrets from Infisical")]
pub struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true, env = "INFISICAL_JSON_LOGS")]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load secrets once and print them.
    Fetch(FetchOpts),
    /// Load secrets, then keep refreshing and log every change.
    Watch(WatchOpts),
    /// Validate options without contacting the service.
    Check(CheckOpts),
    Version,
}

#[derive(clap::Args)]
pub struct FetchOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    /// Print secret values instead of redacting them.
    #[arg(long)]
    pub reveal: bool,
    /// Treat load failures as an empty result.
    #[arg(long)]
    pub optional: bool,
}

#[derive(clap::Args)]
pub struct WatchOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    /// Refresh period; overrides the options file.
    #[arg(short, long)]
    pub interval_ms: Option<u64>,
}

#[derive(clap::Args)]
pub struct CheckOpts {
    #[arg(short, long)]
    pub config: Option<String>,
}

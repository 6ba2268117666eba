use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crosswalk")]
#[command(about = "Crosswalk control-mapping service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the API service with the in-process worker pool
    Api(ApiArgs),

    /// Move dead-lettered mapping requests back onto the main queue
    Redrive(RedriveArgs),

    /// Load frameworks and controls into the catalog
    Seed(SeedArgs),
}

#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    /// Address to bind the API server to (defaults to the configured value)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct RedriveArgs {
    /// Report what would be redriven without moving anything
    #[arg(long)]
    pub dry_run: bool,

    /// Upper bound on messages to move in one pass
    #[arg(long, default_value_t = 1000)]
    pub max_messages: usize,
}

#[derive(clap::Args, Debug)]
pub struct SeedArgs {
    /// JSON catalog file with frameworks and controls
    #[arg(long)]
    pub file: PathBuf,
}

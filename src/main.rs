mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use crosswalk::config::Config;
use crosswalk::ledger::Ledger;
use crosswalk::queue::{self, RedriveRequest, RequestQueue};
use crosswalk::{api, seed};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Api(args) => api::run(args.address).await?,
        Commands::Redrive(args) => {
            let config = Config::load()?;
            let queue =
                RequestQueue::open(config.server.data_path.join("queue"), &config.queue)?;
            let report = queue::redrive(
                &queue,
                RedriveRequest {
                    dry_run: args.dry_run,
                    max_messages: args.max_messages,
                },
            )?;
            queue.flush()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Seed(args) => {
            let config = Config::load()?;
            let ledger = Ledger::open(config.server.data_path.join("ledger"))?;
            let stats = seed::seed_from_path(&ledger, &args.file)?;
            ledger.persist()?;
            println!(
                "Seeded {} framework(s), {} control(s)",
                stats.frameworks, stats.controls
            );
        }
    }

    Ok(())
}

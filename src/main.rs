//! vrouter - routing configuration compiler for an OpenWrt proxy router.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use vrouter::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { force } => vrouter::commands::init::run(force, &cli.config).await,
        Commands::Validate => vrouter::commands::validate::run(&cli.config).await,
        Commands::Compile {
            profile,
            out,
            all_services,
        } => vrouter::commands::compile::run(profile, out, all_services, &cli.config).await,
        Commands::Show { artifact, profile } => {
            vrouter::commands::show::run(&artifact, profile, &cli.config).await
        }
    }
}

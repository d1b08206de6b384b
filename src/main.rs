// src/main.rs — koi-rlm entry point

use clap::Parser;

use openkoi_rlm::cli::{Cli, Commands};
use openkoi_rlm::infra::config::RlmConfig;
use openkoi_rlm::infra::logger;
use openkoi_rlm::sandbox::worker;

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG); always on stderr
    logger::init_logging("warn");

    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    match cli.command {
        Commands::SandboxWorker => {
            worker::run_worker()?;
            Ok(true)
        }
        Commands::Run(args) => {
            let config = match cli.config {
                Some(ref path) => RlmConfig::load_from(std::path::Path::new(path))?,
                None => RlmConfig::load()?,
            };
            openkoi_rlm::cli::run::run_session(args, config).await
        }
    }
}

// src/main.rs - simcoach entry point

use clap::Parser;
use std::sync::Arc;

use simcoach::cli::{Cli, Commands};
use simcoach::infra::config::Config;
use simcoach::infra::{logger, paths};
use simcoach::remote::http::HttpSimulationService;
use simcoach::remote::{ScenarioFilter, SimulationService};
use simcoach::session::store::SessionStore;
use simcoach::session::SessionDeps;

#[tokio::main]
async fn main() {
    // Initialize logging (respects SIMCOACH_LOG / RUST_LOG)
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let mut config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?.with_env_overrides()
    } else {
        Config::load()?
    };
    if let Some(ref url) = cli.base_url {
        config.remote.base_url = url.clone();
    }

    paths::ensure_dirs().await?;

    let service: Arc<dyn SimulationService> = Arc::new(HttpSimulationService::new(&config.remote)?);
    let store = Arc::new(SessionStore::open(paths::pointers_path(&config.session.profile)?));
    let deps = SessionDeps::new(service, store);
    tracing::debug!("Using simulation API at {}", config.remote.base_url);

    match cli.command {
        Some(Commands::Scenarios {
            category,
            difficulty,
            search,
        }) => {
            let filter = ScenarioFilter {
                category,
                difficulty,
                search,
            };
            simcoach::cli::scenarios::run_scenarios(&deps.resolver, &filter).await
        }
        Some(Commands::Reset { scenario, yes }) => {
            simcoach::cli::scenarios::run_reset(&deps.store, scenario.as_deref(), yes)
        }
        Some(Commands::Play { scenario, seed }) => {
            simcoach::cli::play::run_play(deps, &config, scenario, seed).await
        }
        None => simcoach::cli::play::run_play(deps, &config, None, None).await,
    }
}

mod artifacts;
mod batch;
mod bulk;
mod config;
mod desk;
mod ebay;
mod headless;
mod http;
mod market;
mod metrics;
mod models;
mod prompt;
mod routes;
mod security;
mod session;
mod updates;

use artifacts::ArtifactStore;
use batch::BatchRunner;
use clap::Parser;
use config::AppConfig;
use market::{
    AuthProvider,
    demo::{DemoScraper, DemoSubmitter, StaticAuth},
    pricing::FeeAwarePricing,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use routes::AppState;
use security::AuthState;
use session::{SessionRegistry, SessionSettings};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "relist-api-rs", about = "Bulk relisting service")]
struct Cli {
    /// Read bulk text from stdin, process it once and exit instead of serving.
    #[arg(long)]
    bulk: bool,
    /// YAML map of prompt question to answer, used with --bulk.
    #[arg(long, env = "RELIST_ANSWERS")]
    answers: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target: "relist.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing();

    let config = Arc::new(AppConfig::load()?);
    if cli.bulk {
        let summary = headless::run_stdin(build_runner(&config), cli.answers.as_deref()).await?;
        info!(
            target: "relist.api",
            processed = summary.processed,
            total = summary.total,
            auth_failed = summary.auth_failed,
            "headless run complete"
        );
        return Ok(());
    }
    let auth_state = AuthState::from_env();
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let registry = SessionRegistry::new(
        build_runner(&config),
        SessionSettings {
            prompt_timeout: config.prompt_timeout(),
            log_capacity: config.log_capacity,
        },
    );
    let state = AppState {
        registry: Arc::new(registry),
        config: config.clone(),
        prometheus_handle,
    };
    let app = routes::router(state, auth_state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target: "relist.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn build_runner(config: &AppConfig) -> BatchRunner {
    let pricing = Arc::new(FeeAwarePricing::new(
        config.seller_pays_fee,
        config.ebay_fixed_fee,
    ));
    let auth: Arc<dyn AuthProvider> = if config.ebay_network_enabled {
        info!(target: "relist.ebay", production = config.ebay.is_production(), "using eBay refresh-token auth");
        Arc::new(ebay::EbayRefreshAuth::new(
            http::build_client(config),
            config.ebay.clone(),
        ))
    } else {
        info!(target: "relist.ebay", "eBay network disabled; using offline credentials");
        Arc::new(StaticAuth)
    };
    BatchRunner::new(
        Arc::new(DemoScraper::default()),
        Arc::new(DemoSubmitter::new(pricing)),
        auth,
    )
    .with_artifacts(ArtifactStore::new(config.artifact_dir.clone()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

//! course-pool: content pool daemon for the shared-course game backend
//!
//! Loads the preload archives, runs one blocking replenishment cycle so every
//! category starts at quota, then serves the pool over HTTP while the worker
//! refills categories as courses get played.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use course_pool::config::Config;
use course_pool::http::create_router;
use course_pool::pipeline::{SmmdbClient, ToolchainCompressor};
use course_pool::preload::ArchiveDecoder;
use course_pool::CoursePool;

#[derive(Parser)]
#[command(name = "course-pool")]
#[command(about = "Self-replenishing course and avatar content pool")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "course-pool.toml")]
    config: String,

    /// Pool directory (overrides config file)
    #[arg(short, long, env = "COURSE_POOL_DATA_DIR")]
    data_dir: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(long, env = "COURSE_POOL_HTTP_PORT")]
    http_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Warm up the pool and serve it (default)
    Serve,
    /// Run one replenishment cycle and exit
    Fetch,
    /// Print pool statistics as JSON
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("course_pool=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting course-pool");
    info!("Config file: {}", cli.config);

    let config_path = std::path::Path::new(&cli.config);
    if !config_path.exists() {
        info!("Config file not found, using defaults");
    }
    let mut config = Config::load_or_default(config_path)?;

    if let Some(data_dir) = cli.data_dir {
        config.pool.data_dir = PathBuf::from(data_dir);
    }
    if let Some(port) = cli.http_port {
        config.server.http_port = port;
    }

    info!("Data dir: {}", config.pool.data_dir.display());

    let remote = Arc::new(SmmdbClient::new(&config.remote)?);
    let compressor = Arc::new(ToolchainCompressor::new(config.compress.clone()));
    let pool = CoursePool::start(&config, remote, compressor, &ArchiveDecoder).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&pool.stats().await)?);
            pool.shutdown().await;
            Ok(())
        }
        Command::Fetch => {
            let report = pool.warm_up().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            pool.shutdown().await;
            Ok(())
        }
        Command::Serve => {
            let report = pool.warm_up().await?;
            for category in &report.categories {
                if category.shortfall() > 0 {
                    warn!(
                        category = %category.category,
                        shortfall = category.shortfall(),
                        "Serving with a short category"
                    );
                }
            }

            if !config.server.enabled {
                info!("HTTP server disabled, exiting after warm-up");
                pool.shutdown().await;
                return Ok(());
            }

            let app = create_router(Arc::new(pool), &config.pool.data_dir);
            let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
            info!("Listening on http://{}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;

            Ok(())
        }
    }
}

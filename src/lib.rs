pub mod api;
pub mod cli;
pub mod clients;
pub mod clock;
pub mod config;
pub mod constants;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
pub use config::Config;
use services::{WorkerPool, WorkerSettings};
use state::SharedState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Init)) {
        if Config::create_default_if_missing()? {
            println!("✓ Config file created. Edit config.toml and run again.");
        } else {
            println!("Config file already exists.");
        }
        return Ok(());
    }

    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    init_tracing(&config)?;

    if prometheus_handle.is_some() {
        info!("Prometheus metrics recorder initialized");
    }

    match cli.command {
        None | Some(Commands::Serve) => run_daemon(config, prometheus_handle).await,
        Some(Commands::Search {
            query,
            page,
            page_size,
        }) => cli::cmd_search(config, &query.join(" "), page, page_size).await,
        Some(Commands::Submit {
            url,
            priority,
            crawl,
        }) => cli::cmd_submit(config, &url, priority, crawl).await,
        Some(Commands::Status { job_id }) => cli::cmd_status(&config, &job_id).await,
        Some(Commands::Sweep { recover }) => cli::cmd_sweep(config, recover).await,
        Some(Commands::Init) => Ok(()),
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.as_str(), value.as_str())?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    Ok(())
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "crawlgate v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let shared = Arc::new(SharedState::new(config.clone()).await?);

    shared
        .scheduler
        .recover()
        .await
        .context("Failed to reload active jobs")?;

    let maintenance = shared.maintenance();
    let maintenance_handle = {
        let maintenance = maintenance.clone();
        tokio::spawn(async move {
            if let Err(e) = maintenance.start().await {
                error!("Maintenance error: {}", e);
            }
        })
    };

    let workers = if config.workers.enabled {
        let pool = WorkerPool::spawn(
            "worker",
            shared.scheduler.clone(),
            shared.crawl_executor(),
            WorkerSettings::from_config(&config.workers, &config.scheduler),
        );
        info!("Started {} crawl workers", pool.size());
        Some(pool)
    } else {
        warn!("Crawl workers disabled; jobs wait for remote workers");
        None
    };

    let server_handle: Option<tokio::task::JoinHandle<()>> = if config.server.enabled {
        let port = config.server.port;
        info!("Starting Web API on port {}", port);

        let app = api::router(api::create_app_state(Arc::clone(&shared), prometheus_handle));
        let addr = format!("0.0.0.0:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        Some(tokio::spawn(async move {
            info!("Web Server running at http://0.0.0.0:{}", port);
            if let Err(e) = axum::serve(listener, app).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    if let Some(handle) = server_handle {
        handle.abort();
    }
    if let Some(pool) = workers {
        pool.shutdown().await;
    }
    maintenance.stop().await;
    maintenance_handle.abort();
    info!("Daemon stopped");

    Ok(())
}

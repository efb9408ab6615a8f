#![forbid(unsafe_code)]

mod service;

use anyhow::{bail, Context, Result};
use axum::Server;
use clap::Parser;
use service::anypoint::{AnypointClient, AnypointConfig, HttpClientConfig};
use service::auth::AuthClient;
use service::collector::{Collector, ScrapeConfig};
use service::discovery::DiscoveryService;
use service::health::HealthService;
use service::license::{LicenseConfig, LicenseService};
use service::metrics::ExporterMetrics;
use service::monitor::{MonitorRunner, MonitorRunnerConfig, MonitorsFile};
use service::notify::{build_channels, NotificationDispatcher};
use service::Service;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Prometheus exporter and queue monitor for Anypoint MQ
#[derive(Parser)]
#[clap(name = "anypoint-mq-exporter", version = clap::crate_version!())]
struct CliArguments {
    /// Log using JSON.
    #[clap(long, env = "LOG_JSON")]
    json: bool,

    #[clap(flatten)]
    serve_args: ServeArguments,
}

#[derive(Parser)]
struct ServeArguments {
    /// Server port number
    #[clap(long, short, env, default_value = "8080")]
    port: u16,

    /// Hostname to listen on
    #[clap(long, short = 'H', env, default_value = "0.0.0.0")]
    listen_host: IpAddr,

    #[clap(flatten)]
    anypoint: AnypointConfig,

    #[clap(flatten)]
    http: HttpClientConfig,

    #[clap(flatten)]
    scrape: ScrapeConfig,

    #[clap(flatten)]
    monitors: MonitorRunnerConfig,

    #[clap(flatten)]
    license: LicenseConfig,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = CliArguments::parse();

    let result = initialize_logger(&args);
    if let Err(err) = result {
        eprintln!("Unable to initialize logger: {err}");
        return ExitCode::FAILURE;
    }

    let result = handle_serve(args.serve_args).await;

    if let Err(err) = result {
        error!(%err, "Exporter exited unsuccessfully");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn initialize_logger(args: &CliArguments) -> Result<()> {
    // The filter layer controls which log levels to display.
    let filter_layer = EnvFilter::from_default_env();

    // The log layer controls the output of log events to stderr. Depending on
    // the `json` flag, it will either be human readable or json encoded.
    let log_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
    let log_layer = if args.json {
        log_layer.json().boxed()
    } else {
        log_layer.boxed()
    };

    Registry::default()
        .with(filter_layer)
        .with(log_layer)
        .try_init()
        .context("unable to initialize logger")?;

    Ok(())
}

async fn handle_serve(args: ServeArguments) -> Result<()> {
    if !args.anypoint.has_valid_auth() {
        bail!("no authentication configured: set either client id/secret or username/password");
    }
    if !args.anypoint.auto_discovery {
        if args
            .anypoint
            .organization_id
            .as_deref()
            .unwrap_or_default()
            .is_empty()
        {
            bail!("--organization-id is required when auto-discovery is disabled");
        }
        if args.anypoint.environments.is_empty() {
            bail!("--environments is required when auto-discovery is disabled");
        }
    }
    if args.anypoint.regions.is_empty() {
        bail!("at least one region must be configured");
    }

    let metrics = Arc::new(ExporterMetrics::new().context("unable to register metrics")?);

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(args.http.connect_timeout_seconds))
        .timeout(Duration::from_secs(args.http.read_timeout_seconds))
        .pool_max_idle_per_host(args.http.max_connections)
        .build()
        .context("unable to build HTTP client")?;

    let config = Arc::new(args.anypoint);
    let auth = Arc::new(AuthClient::new(
        http.clone(),
        config.clone(),
        args.http.clone(),
    ));
    let client = Arc::new(AnypointClient::new(
        http.clone(),
        config.clone(),
        args.http.clone(),
        auth.clone(),
    ));
    let discovery = Arc::new(DiscoveryService::new(client.clone(), config.clone()));

    if config.auto_discovery {
        info!("auto-discovery enabled, discovering organizations and environments");
        if let Err(err) = discovery.discover().await {
            warn!(%err, "initial discovery failed, retrying on the next refresh");
        }
    }

    let collector = Arc::new(Collector::new(
        client.clone(),
        discovery.clone(),
        metrics.clone(),
        args.scrape.clone(),
        config.regions.clone(),
    ));
    let license = Arc::new(LicenseService::new(&args.license));

    let monitors = if args.monitors.monitors_enabled {
        let file = match args.monitors.monitors_config.as_deref() {
            Some(path) => MonitorsFile::load(path).context("unable to load monitors config")?,
            None => {
                warn!("monitors enabled without --monitors-config, no definitions loaded");
                MonitorsFile::default()
            }
        };
        let channels = build_channels(&file.channels, http.clone());
        let dispatcher = Arc::new(NotificationDispatcher::new(channels, metrics.clone()));
        Some(Arc::new(MonitorRunner::new(
            args.monitors.clone(),
            file,
            dispatcher,
            license.clone(),
            collector.clone(),
            metrics.clone(),
        )))
    } else {
        None
    };

    let health = Arc::new(HealthService::new(
        auth.clone(),
        config.clone(),
        args.scrape.clone(),
        discovery.clone(),
    ));

    let service = Service {
        config: config.clone(),
        scrape: args.scrape,
        auth,
        client,
        discovery: discovery.clone(),
        collector: collector.clone(),
        monitors: monitors.clone(),
        license,
        health,
        metrics,
    };

    let commit = option_env!("GITHUB_SHA").unwrap_or("unknown");
    info!(
        port = args.port,
        listen_host = %args.listen_host,
        ?commit,
        base_url = %config.base_url,
        "Starting server"
    );

    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    {
        let discovery = discovery.clone();
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { discovery.run(token).await }));
    }
    {
        let collector = collector.clone();
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { collector.run(token).await }));
    }
    if let Some(runner) = monitors {
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { runner.run(token).await }));
    }

    let app = service::router::create_router(service);
    let addr: SocketAddr = (args.listen_host, args.port).into();
    let server_token = shutdown.clone();
    let server_task = tokio::spawn(async move {
        Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                server_token.cancelled().await;
                info!("graceful shutdown request received");
            })
            .await
    });

    // Graceful shutdown detection
    match tokio::signal::ctrl_c().await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Unable to listen for shutdown signal: {err}");
            // we also shut down in case of error
        }
    };

    shutdown.cancel();

    // In-flight scrapes get a short grace period; a second signal forces the
    // exit immediately.
    let drain = async {
        for task in background {
            let _ = task.await;
        }
    };
    select! {
        _ = tokio::time::timeout(Duration::from_secs(10), drain) => {}
        _ = tokio::signal::ctrl_c() => {
            bail!("forced shutdown from additional signal")
        }
    }

    server_task
        .await
        .context("server task panicked")?
        .context("server error during shutdown")?;

    info!("shutdown complete");
    Ok(())
}

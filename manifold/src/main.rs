use clap::{Args, Parser};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cluster;
mod config;

use cluster::StaticCluster;
use config::{Config, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use proxy::engine::{FanoutProxy, Options};
use reconciler::controller::ReceiverController;
use reconciler::dispatcher::{self, DispatcherOptions};
use shared::admin_service::AdminService;

#[derive(Parser)]
enum CliCommand {
    /// Run the fan-out proxy and its receiver controller
    Run(RunArgs),
    /// Show all metrics definitions as markdown table
    ShowMetrics,
    /// Sync METRICS.md with current metric definitions
    SyncMetrics,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("Failed to load config file: {0}")]
    ConfigLoadError(#[from] config::ConfigError),
    #[error("Failed to create runtime: {0}")]
    RuntimeError(#[from] std::io::Error),
}

fn main() {
    init_tracing();

    if let Err(e) = cli() {
        tracing::error!(error = %e, "Startup error");
        std::process::exit(1);
    }
}

fn cli() -> Result<(), CliError> {
    let cmd = CliCommand::parse();

    match &cmd {
        CliCommand::Run(run_args) => {
            let config = Config::from_file(&run_args.base.config_file_path)?;
            let _sentry_guard = init_sentry(&config);
            init_statsd_recorder("manifold", config.common.metrics.as_ref());

            run_async(run(config))?;
            Ok(())
        }
        CliCommand::ShowMetrics => {
            println!(
                "{}",
                shared::metrics_defs::markdown_table(proxy::metrics_defs::ALL_METRICS)
            );
            println!();
            println!(
                "{}",
                shared::metrics_defs::markdown_table(reconciler::metrics_defs::ALL_METRICS)
            );
            Ok(())
        }
        CliCommand::SyncMetrics => {
            let path = "METRICS.md";
            let mut content = std::fs::read_to_string(path).expect("Failed to read METRICS.md");

            content = sync_section(
                &content,
                "PROXY_METRICS",
                &shared::metrics_defs::markdown_table(proxy::metrics_defs::ALL_METRICS),
            );
            content = sync_section(
                &content,
                "RECONCILER_METRICS",
                &shared::metrics_defs::markdown_table(reconciler::metrics_defs::ALL_METRICS),
            );

            std::fs::write(path, content).expect("Failed to write METRICS.md");
            println!("Synced METRICS.md");
            Ok(())
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

async fn run(config: Config) -> Result<(), RunError> {
    let engine = Arc::new(FanoutProxy::new(Options::default()));

    let cluster = Arc::new(StaticCluster::new(config.cluster));
    let controller = Arc::new(ReceiverController::new(cluster.clone(), engine.clone()));

    let (event_tx, event_rx) = mpsc::channel(64);
    for event in cluster.seed_events() {
        let _ = event_tx.send(event).await;
    }

    let dispatcher_task = tokio::spawn(dispatcher::run(
        controller,
        event_rx,
        DispatcherOptions {
            max_concurrent_reconciles: config.controller.max_concurrent_reconciles,
        },
    ));

    let admin_listener = config.proxy.admin_listener.clone();
    let admin_task = tokio::spawn(async move {
        let service = AdminService::<_, std::io::Error>::new(|| true);
        if let Err(e) =
            shared::http::run_http_service(&admin_listener.host, admin_listener.port, service)
                .await
        {
            tracing::error!(error = %e, "admin service error");
        }
    });

    tracing::info!(
        host = %config.proxy.listener.host,
        port = config.proxy.listener.port,
        "starting webhook proxy"
    );
    let listener_task = tokio::spawn(proxy::run(config.proxy, engine.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    // Stop accepting before draining: in-flight fan-outs finish, new
    // connections are refused.
    listener_task.abort();
    admin_task.abort();
    drop(event_tx);
    dispatcher_task.abort();
    engine.close().await;

    Ok(())
}

fn sync_section(content: &str, name: &str, table: &str) -> String {
    let start_marker = format!("<!-- {}:START -->", name);
    let end_marker = format!("<!-- {}:END -->", name);

    let start_idx = content
        .find(&start_marker)
        .unwrap_or_else(|| panic!("Missing {} marker", start_marker));
    let end_idx = content
        .find(&end_marker)
        .unwrap_or_else(|| panic!("Missing {} marker", end_marker));

    format!(
        "{}{}\n{}\n{}{}",
        &content[..start_idx],
        start_marker,
        table,
        end_marker,
        &content[end_idx + end_marker.len()..]
    )
}

pub fn init_statsd_recorder(prefix: &str, metrics_config: Option<&MetricsConfig>) {
    if let Some(MetricsConfig {
        statsd_host,
        statsd_port,
    }) = metrics_config
    {
        let recorder = StatsdBuilder::from(statsd_host.clone(), *statsd_port)
            .build(Some(prefix))
            .expect("Could not create StatsdRecorder");

        metrics::set_global_recorder(recorder).expect("Could not set global metrics recorder")
    }
}

fn run_async(
    fut: impl Future<Output = Result<(), impl std::error::Error>>,
) -> Result<(), CliError> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    if let Err(e) = rt.block_on(fut) {
        tracing::error!(error = %e, "Runtime error");
        process::exit(1);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(sentry::integrations::tracing::layer())
        .init();
}

fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    // The Sentry tracing layer (already initialized in main) starts sending
    // events once this client is initialized.
    config.common.logging.as_ref().map(|cfg| {
        sentry::init((
            cfg.sentry_dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    })
}

#[derive(Args, Debug, Clone)]
struct BaseArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    base: BaseArgs,
}

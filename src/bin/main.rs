use std::{error::Error, sync::Arc};

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use herobox::{
    api::{self, AppState},
    cli::{Cli, Commands, parse_args},
    config::Runtime,
    constants::{
        LOG_BUFFER_CAPACITY, SERVICE_ACTION_TIMEOUT, SERVICE_QUERY_TIMEOUT, SHUTDOWN_GRACE,
    },
    context::OpContext,
    logs::{BufferLayer, LogBuffer},
    plugin::PluginClient,
    service::{Action, Snapshot},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    let logs = Arc::new(LogBuffer::new(LOG_BUFFER_CAPACITY));
    init_logging(&args, Arc::clone(&logs));

    let runtime = Runtime::bootstrap(&args.settings)?;

    match args.command {
        Commands::Serve => serve(&args, runtime, logs)?,
        Commands::Status { service } => print_status(&runtime, service.as_deref())?,
        Commands::Start { service } => run_action(&runtime, &service, Action::Start)?,
        Commands::Stop { service } => run_action(&runtime, &service, Action::Stop)?,
        Commands::Restart { service } => run_action(&runtime, &service, Action::Restart)?,
    }

    Ok(())
}

/// Logs go to stderr so one-shot commands keep stdout for JSON. `INFO` and above are
/// also copied into `logs` for the HTTP API.
fn init_logging(args: &Cli, logs: Arc<LogBuffer>) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .with(BufferLayer::new(logs))
        .try_init();
}

fn serve(args: &Cli, runtime: Runtime, logs: Arc<LogBuffer>) -> Result<(), Box<dyn Error>> {
    let listen_addr = args.settings.listen_addr();
    runtime.prepare_serve(&listen_addr);
    info!(
        "Supervising {} services ({:?} mode)",
        runtime.supervisor.specs().count(),
        runtime.supervisor.mode()
    );

    let state = Arc::new(AppState {
        supervisor: runtime.supervisor,
        store: runtime.store,
        versions: runtime.versions,
        logs,
        plugin: PluginClient::new(runtime.endpoint)?,
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let served = rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
        api::serve(listener, state, shutdown_signal()).await
    });
    // Abandoned requests may still hold blocking workers.
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    served?;

    info!("herobox stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Shutdown requested; draining in-flight requests");
}

fn print_status(runtime: &Runtime, service: Option<&str>) -> Result<(), Box<dyn Error>> {
    let ctx = OpContext::with_timeout(SERVICE_QUERY_TIMEOUT);
    let snapshots = match service {
        Some(name) => vec![api::observe(&runtime.supervisor, &runtime.versions, &ctx, name)?],
        None => {
            let mut snapshots = runtime.supervisor.list(&ctx)?;
            runtime.versions.enrich(&mut snapshots);
            snapshots
        }
    };
    print_json(&snapshots)
}

fn run_action(runtime: &Runtime, service: &str, action: Action) -> Result<(), Box<dyn Error>> {
    let ctx = OpContext::with_timeout(SERVICE_ACTION_TIMEOUT);
    let snapshot = api::act(&runtime.supervisor, &runtime.versions, &ctx, service, action)?;
    print_json(&[snapshot])
}

fn print_json(snapshots: &[Snapshot]) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(snapshots)?);
    Ok(())
}

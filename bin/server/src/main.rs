use mobility_relay_ai::OpenAiClient;
use mobility_relay_messaging::InfobipClient;
use mobility_relay_server::config::ServerConfig;
use mobility_relay_server::error::StartupError;
use mobility_relay_server::ingress::{self, IngressState};
use mobility_relay_state::NatsState;
use mobility_relay_tools::{ApiInvoker, ToolRegistry};
use mobility_relay_worker::{ConversationAgent, Worker, WorkerDeps, WorkerPool};
use rootcause::Report;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(report) = run().await {
        tracing::error!("{report}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        reason: e.to_string(),
    })?;
    config.validate().map_err(|e| StartupError::Config {
        reason: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let registry = ToolRegistry::load(&config.openapi_path).map_err(|e| {
        StartupError::ToolRegistry {
            reason: e.to_string(),
        }
    })?;
    tracing::info!(
        tools = registry.len(),
        path = %config.openapi_path.display(),
        "Loaded tool registry"
    );
    let registry = Arc::new(registry);

    let llm = OpenAiClient::new(config.llm.to_openai_config()).map_err(|e| {
        StartupError::Client {
            name: "model",
            reason: e.to_string(),
        }
    })?;
    let invoker = ApiInvoker::new(config.upstream.to_invoker_config()).map_err(|e| {
        StartupError::Client {
            name: "upstream",
            reason: e.to_string(),
        }
    })?;
    let sender = InfobipClient::new(config.infobip.to_infobip_config()).map_err(|e| {
        StartupError::Client {
            name: "infobip",
            reason: e.to_string(),
        }
    })?;

    tracing::info!(url = %config.nats.url, "Connecting to NATS...");
    let state = NatsState::connect(&config.nats.to_nats_config())
        .await
        .map_err(|e| StartupError::State {
            reason: e.to_string(),
        })?;

    let worker_config = config.worker.to_worker_config();
    let agent = ConversationAgent::new(Arc::new(llm), Arc::new(invoker), registry)
        .configured(&worker_config);
    let deps = WorkerDeps {
        queue: state.queue.clone(),
        sessions: state.sessions.clone(),
        locks: state.locks.clone(),
        backlog: state.backlog.clone(),
        dead_letters: state.dead_letters.clone(),
        sender: Arc::new(sender),
        agent: Arc::new(agent),
    };
    let concurrency = worker_config.concurrency;
    let worker = Arc::new(Worker::new(deps, worker_config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::spawn(worker, concurrency, shutdown_rx);

    let app = ingress::router(IngressState::new(
        &config.webhook.secret,
        state.queue.clone(),
        state.ledger.clone(),
    ));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.listen_addr.clone(),
            reason: e.to_string(),
        })?;
    tracing::info!("listening on http://{}", config.listen_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("Shutting down workers...");
    let _ = shutdown_tx.send(true);
    pool.join().await;

    served.map_err(|e| StartupError::Serve {
        reason: e.to_string(),
    })?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutdown requested");
}

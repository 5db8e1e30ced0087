use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipyard_core::config::{config_path, Config, GithubConfig};
use shipyard_core::executor::CommandExecutor;
use shipyard_core::poller::StatusLabels;
use shipyard_core::{
    load_config, validate_config, AutopilotController, CommandQualityChecker, DefaultPlanner,
    DispatchHandler, GithubClient, LogNotifier, Monitor, Orchestrator, Poller, RecordStore,
    SqliteRecordStore, StatusLabeler, TokenBudget,
};

use shipyard_server::api::create_router;
use shipyard_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Shipyard v{}", VERSION);

    let config_path = config_path();

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    let monitor = Arc::new(Monitor::new());
    let github = match &config.github {
        Some(github_config) => Some(Arc::new(
            GithubClient::new(github_config).context("Failed to create GitHub client")?,
        )),
        None => {
            info!("No [github] section, ingestion and autopilot disabled");
            None
        }
    };

    // Autopilot
    let autopilot = match (&github, config.autopilot.enabled) {
        (Some(client), true) => {
            let store: Arc<dyn RecordStore> = Arc::new(
                SqliteRecordStore::new(&config.database.path)
                    .context("Failed to open autopilot store")?,
            );
            let controller = Arc::new(AutopilotController::new(
                config.autopilot.clone(),
                Arc::clone(client) as _,
                store,
            ));
            let resumed = controller
                .restore()
                .context("Failed to restore autopilot records")?;
            let adopted = match controller
                .scan_open_prs(&config.orchestrator.branch_prefix)
                .await
            {
                Ok(adopted) => adopted,
                Err(e) => {
                    warn!(error = %e, "Failed to scan open pull requests");
                    0
                }
            };
            info!(resumed, adopted, "Autopilot enabled");
            Some(controller)
        }
        _ => None,
    };

    // Status labels written back to issues
    let labeler = match (&github, &config.github) {
        (Some(client), Some(github_config)) if config.poller.enabled => Some(Arc::new(
            StatusLabeler::new(Arc::clone(client) as _, status_labels(github_config)),
        )),
        _ => None,
    };

    // Orchestrator
    let orchestrator = match &config.executor {
        Some(executor_config) => {
            let executor = build_executor(&config, CommandExecutor::from_config(executor_config));
            let mut orchestrator = Orchestrator::new(
                config.orchestrator.clone(),
                Arc::new(executor),
                Arc::clone(&monitor),
            )
            .with_notifier(Arc::new(LogNotifier));
            if let Some(controller) = &autopilot {
                orchestrator = orchestrator.with_pr_listener(Arc::clone(controller) as _);
            }
            if let Some(labeler) = &labeler {
                orchestrator = orchestrator.with_finish_listener(Arc::clone(labeler) as _);
            }
            let orchestrator = Arc::new(orchestrator);
            orchestrator.start();
            info!(
                program = %executor_config.program,
                workers = config.orchestrator.max_workers,
                "Orchestrator started"
            );
            Some(orchestrator)
        }
        None => {
            warn!("No [executor] section, tasks will not be executed");
            None
        }
    };

    // Ingestion poller
    let poller = match (&github, &orchestrator, &config.github) {
        (Some(client), Some(orchestrator), Some(github_config)) if config.poller.enabled => {
            let mut handler = DispatchHandler::new(
                Arc::new(DefaultPlanner::from_config(&config.orchestrator)),
                Arc::clone(orchestrator),
            );
            if let Some(labeler) = &labeler {
                handler = handler.with_labeler(Arc::clone(labeler));
            }
            let poller =
                Poller::from_config(&config.poller, Arc::clone(client) as _, Arc::new(handler))
                    .with_status_labels(status_labels(github_config));
            Some(Arc::new(poller))
        }
        _ => None,
    };

    // Background loops
    let poller_cancel = CancellationToken::new();
    let autopilot_cancel = CancellationToken::new();
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    if let Some(poller) = &poller {
        let poller = Arc::clone(poller);
        let cancel = poller_cancel.clone();
        background.push(tokio::spawn(async move { poller.start(cancel).await }));
    }
    if let Some(controller) = &autopilot {
        let controller = Arc::clone(controller);
        let cancel = autopilot_cancel.clone();
        background.push(tokio::spawn(async move { controller.run(cancel).await }));
    }

    // Create application state
    let mut state = AppState::new(config.clone(), Arc::clone(&monitor));
    if let Some(orchestrator) = &orchestrator {
        state = state.with_orchestrator(Arc::clone(orchestrator));
    }
    if let Some(poller) = &poller {
        state = state.with_poller(Arc::clone(poller));
    }
    if let Some(controller) = &autopilot {
        state = state.with_autopilot(Arc::clone(controller));
    }

    // Create router
    let app = create_router(Arc::new(state));

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Ingestion first so nothing new reaches the queue
    poller_cancel.cancel();
    if let Some(poller) = &poller {
        poller.wait_for_active().await;
        info!("Poller stopped");
    }

    if let Some(orchestrator) = &orchestrator {
        info!("Stopping orchestrator...");
        orchestrator.stop().await;
        info!("Orchestrator stopped");
    }

    autopilot_cancel.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background loop ended abnormally");
        }
    }

    Ok(())
}

fn build_executor(config: &Config, executor: CommandExecutor) -> CommandExecutor {
    let mut executor = executor;
    if config.budget.enabled {
        let budget = Arc::new(TokenBudget::from_config(&config.budget));
        executor = executor.with_budget(budget.gate());
        info!(
            max_input = config.budget.max_input_tokens,
            max_output = config.budget.max_output_tokens,
            "Token budget enabled"
        );
    }
    if config.quality.enabled {
        executor = executor.with_quality(CommandQualityChecker::factory(&config.quality));
        info!(commands = config.quality.commands.len(), "Quality gate enabled");
    }
    executor
}

fn status_labels(github: &GithubConfig) -> StatusLabels {
    StatusLabels {
        in_progress: github.in_progress_label.clone(),
        done: github.done_label.clone(),
        failed: github.failed_label.clone(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}

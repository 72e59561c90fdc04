use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use negotiation_assist::api::negotiation_routes;
use negotiation_assist::config::{Readiness, ServiceConfig};
use negotiation_assist::llm::create_provider;
use negotiation_assist::service::{NegotiationService, spawn_expiry_task};
use negotiation_assist::store::{
    CounterpartyDirectory, LibSqlBackend, MemoryStore, NegotiationStore, StaticDirectory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("🤝 Negotiation Assist v{}", env!("CARGO_PKG_VERSION"));

    // ── Reasoning backend ────────────────────────────────────────────
    let mut readiness = config.readiness.clone();
    let provider = match &config.llm {
        Some(llm_config) => match create_provider(llm_config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                tracing::warn!(error = %e, "Reasoning backend unavailable, starting degraded");
                readiness = Readiness::Degraded {
                    reason: e.to_string(),
                };
                None
            }
        },
        None => None,
    };
    match &readiness {
        Readiness::Ready => eprintln!(
            "   Model: {}",
            provider.as_ref().map(|p| p.model_name()).unwrap_or("none")
        ),
        Readiness::Degraded { reason } => eprintln!("   Degraded: {reason}"),
    }

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn NegotiationStore> = match &config.db_path {
        Some(path) => {
            let backend = LibSqlBackend::new_local(path)
                .await
                .with_context(|| format!("failed to open database at {}", path.display()))?;
            eprintln!("   Database: {}", path.display());
            Arc::new(backend)
        }
        None => {
            eprintln!("   Database: in-memory");
            Arc::new(MemoryStore::new())
        }
    };

    let directory: Arc<dyn CounterpartyDirectory> = match &config.directory_path {
        Some(path) => {
            let directory = StaticDirectory::from_json_file(path)
                .await
                .with_context(|| format!("failed to load counterparties from {}", path.display()))?;
            eprintln!("   Counterparties: {} known", directory.len());
            Arc::new(directory)
        }
        None => Arc::new(StaticDirectory::new(Vec::new())),
    };

    // ── Service ──────────────────────────────────────────────────────
    let service = Arc::new(NegotiationService::new(
        &config.orchestration,
        config.approval.clone(),
        provider,
        readiness,
        store,
        directory,
    ));
    let _expiry_handle = spawn_expiry_task(Arc::clone(&service));

    let app = negotiation_routes(service);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    eprintln!("   API: http://{addr}\n");
    tracing::info!(port = config.port, "Negotiation API started");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Console logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "negotiation-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

mod admin;
mod cli;

use chatgate_core::Gateway;
use chatgate_provider_core::CredentialStore;
use chatgate_provider_impl::default_registry;
use chatgate_storage::{FileCredentialStore, MemoryCredentialStore};

use crate::cli::{Cli, GlobalConfig};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_json, cli.log_dir.as_deref());
    if let Err(err) = run(cli).await {
        eprintln!("chatgate failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = GlobalConfig::load(&cli)?;
    info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        proxy = %config.proxy.as_deref().unwrap_or(""),
        admin_key_set = config.admin_key.is_some(),
        "config loaded"
    );

    let store: Arc<dyn CredentialStore> = match FileCredentialStore::open(&config.data_dir).await
    {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!(
                data_dir = %config.data_dir.display(),
                error = %err,
                "credential directory unavailable, keeping credentials in memory"
            );
            Arc::new(MemoryCredentialStore::new())
        }
    };

    let registry = default_registry(store, &config.registry_settings());
    for provider in registry.providers() {
        match provider.credential_record().await {
            Ok(record) => {
                info!(provider = %provider.id(), has_credentials = record.is_some(), "provider ready")
            }
            Err(err) => warn!(provider = %provider.id(), error = %err, "stored credentials unreadable"),
        }
    }

    let gateway = Gateway::new(registry);
    let app = gateway
        .router()
        .merge(admin::admin_router(gateway.state(), config.admin_key.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn init_tracing(json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chatgate=info,tower_http=info"));
    let stdout = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };
    let (file, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "chatgate.log"));
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
    guard
}

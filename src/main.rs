use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use volume_ledger as ledger;
use ledger::store::{InMemoryStore, ResourceStore, SeaOrmStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ledger::config::load_config().context("failed to load configuration")?;
    ledger::config::init_tracing(&cfg.log_level, cfg.log_json);

    let store: Arc<dyn ResourceStore> = if cfg.uses_memory_store() {
        warn!("Using the in-memory store; data is lost on shutdown");
        Arc::new(InMemoryStore::new())
    } else {
        let db_config = ledger::db::DbConfig::from(&cfg);
        let db_pool = ledger::db::establish_connection_with_config(&db_config)
            .await
            .context("failed to connect to database")?;
        if cfg.auto_migrate {
            ledger::db::run_migrations(&db_pool).await.map_err(|e| {
                error!("Failed running migrations: {}", e);
                e
            })?;
        }
        Arc::new(SeaOrmStore::new(Arc::new(db_pool)))
    };

    if let Some(dir) = &cfg.print_spool_dir {
        info!("Spooling label artifacts to {}", dir);
    }
    let services = ledger::AppServices::from_config(store, &cfg);
    let app_state = ledger::AppState::new(cfg.clone(), services);
    let app = ledger::build_router(app_state);

    let ip = cfg
        .host
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("invalid host address {}", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("volume-ledger listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
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

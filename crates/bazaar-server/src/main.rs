use anyhow::Context;
use bazaar_server::{AppState, Server, ServerConfig};
use bazaar_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bazaar_server=debug")),
        )
        .init();

    info!("Starting Bazaar marketplace server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("failed to open marketplace database")?;

    let status_interval = config.status_log_interval;
    let state = AppState::new(db, config);
    let server = Server::bind(state.clone())
        .await
        .context("failed to bind listener")?;

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    if let Some(period) = status_interval {
        let presence = state.presence.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let online = presence.online_users().await;
                info!(count = online.len(), users = ?online, "Online users");
            }
        });
    }

    // -----------------------------------------------------------------------
    // 5. Serve until Ctrl+C
    // -----------------------------------------------------------------------
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Listener failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

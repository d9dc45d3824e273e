use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use cinema_checkout as app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::load_config().context("failed to load configuration")?;
    app::config::init_tracing(cfg.log_level(), cfg.log_json);
    app::handlers::health::init_start_time();

    // Init DB
    let db_pool = app::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events; the consumer drives payment confirmations
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = app::events::EventSender::new(event_tx);
    tokio::spawn(app::events::process_events(
        event_rx,
        Arc::new(app::notifications::LogNotifier),
    ));

    let gateway = app::gateway::StripeGateway::from_app_config(&cfg)
        .context("failed to build payment gateway client")?;
    if cfg.payment_gateway_secret_key.is_none() {
        warn!("Payment gateway secret key not configured; checkout confirmation will fail");
    }
    if cfg.payment_webhook_secret.is_none() {
        warn!("Payment webhook secret not configured; every webhook will be rejected");
    }

    let cfg = Arc::new(cfg);
    let state = app::AppState::new(db_arc, cfg.clone(), Arc::new(gateway), event_sender);
    let router = app::app_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    info!("cinema-checkout listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("cinema-checkout stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
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
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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
    info!("shutdown signal received");
}

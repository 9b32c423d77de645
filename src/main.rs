use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{
    signal,
    sync::{mpsc, watch},
};
use tracing::{error, info, warn};

use bookstore_orders as api;
use api::services::payment_gateway::{PaymentGateway, WalletGatewayClient};
use api::services::reconciliation::PendingPaymentReconciler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    // Wallet gateway
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        WalletGatewayClient::new(cfg.wallet.clone()).context("failed to build wallet client")?,
    );

    // Aggregate app services used by HTTP handlers
    let services =
        api::handlers::AppServices::new(db_arc.clone(), event_sender.clone(), gateway, &cfg);

    // Abandoned wallet orders
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = if cfg.reconciliation.enabled {
        Some(
            PendingPaymentReconciler::new(
                services.checkout.clone(),
                event_sender.clone(),
                cfg.pending_payment_ttl(),
                cfg.reconcile_interval(),
            )
            .spawn(shutdown_rx),
        )
    } else {
        warn!("Pending payment reconciliation disabled; unpaid wallet orders keep their stock");
        None
    };

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        sessions: Arc::new(api::session::SessionStore::new()),
        services,
    };
    let app = api::build_router(app_state);

    // Bind and serve
    let ip: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address {}", cfg.host))?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("bookstore-orders listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = reconciler {
        if let Err(e) = handle.await {
            error!(error = %e, "Reconciler task ended abnormally");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
                error!(error = %e, "failed to install SIGTERM handler");
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
    info!("Shutdown signal received");
}

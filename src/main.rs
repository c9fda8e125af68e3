use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use storefront_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
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

    // Payment processor
    let secret_key = cfg
        .stripe_secret_key
        .clone()
        .context("stripe_secret_key must be configured (APP__STRIPE_SECRET_KEY)")?;
    let processor: Arc<dyn api::payments::PaymentProcessor> = Arc::new(
        api::payments::StripeClient::new(
            secret_key,
            cfg.stripe_api_base.clone(),
            cfg.payment_timeout(),
        )?,
    );
    if cfg.payment_webhook_secret.is_none() {
        info!("Payment webhook signature verification disabled (no secret configured)");
    }

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        event_sender.clone(),
        processor,
        api::services::checkout::CheckoutUrls {
            success_url: cfg.checkout_success_url.clone(),
            cancel_url: cfg.checkout_cancel_url.clone(),
        },
    );

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        services,
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        CorsLayer::permissive()
    } else {
        anyhow::bail!(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
        );
    };

    let app = Router::<api::AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api::api_v1_routes())
        .layer(api::tracing::configure_http_tracing())
        .layer(cors_layer)
        .layer(axum::middleware::from_fn(
            api::tracing::request_id_middleware,
        ))
        .with_state(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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

    info!("Shutdown signal received");
}

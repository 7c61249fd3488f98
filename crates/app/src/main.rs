mod application_routes;
mod application_service;
mod auth;
mod consumer;
mod dispatcher;
mod domain_routes;
mod domain_service;
mod extract;
mod notifier;
mod problem;
mod router;
mod service;
mod telemetry;
#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc};

use chrono::Utc;
use tracing::{info, warn};

use admin_service_bus::{InMemoryBus, MessageBus};
use admin_service_core::events::{APPLICATION_EVENTS_TOPIC, DOMAIN_EVENTS_TOPIC};
use admin_service_storage::Database;
use admin_service_util::{load_env_file, AppConfig};

use crate::auth::TokenValidator;
use crate::consumer::EventConsumer;
use crate::dispatcher::Dispatcher;
use crate::notifier::Notifier;
use crate::router::{ApiOptions, AppState, ServiceOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(
        config.bus.bootstrap_servers.clone(),
        config.bus.consumer_group.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::with_default_handlers());
    let mut consumers = Vec::new();
    for topic in [DOMAIN_EVENTS_TOPIC, APPLICATION_EVENTS_TOPIC] {
        let consumer = EventConsumer::new(bus.clone(), topic, dispatcher.clone());
        consumers.push(consumer.start().await?);
    }

    let tokens = TokenValidator::from_settings(&config.auth)?;
    if config.environment.is_development() {
        let token = tokens.issue("dev", Utc::now())?;
        info!(stage = "auth", subject = "dev", %token, "development bearer token");
    }

    let state = AppState::new(
        metrics,
        database.clone(),
        Notifier::new(bus.clone()),
        tokens,
        ServiceOptions {
            operation_timeout: config.operation_timeout,
            notify_application_created: config.notify_application_created,
        },
        config.auth.token_url(),
    );

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        prefix = %config.api_prefix,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state, &ApiOptions::from(&config)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(stage = "app", "HTTP server stopped, closing message bus");
    bus.close().await;
    for consumer in consumers {
        if let Err(err) = consumer.await {
            warn!(stage = "app", error = %err, "consumer task ended abnormally");
        }
    }
    database.close().await;
    info!(stage = "app", "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(stage = "app", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(stage = "app", error = %err, "failed to listen for SIGTERM");
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
    info!(stage = "app", "shutdown signal received");
}

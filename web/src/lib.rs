//! HTTP surface of the bridge: four endpoints that forward JSON to and from message brokers,
//! plus a health check and the OpenAPI browser.
use domain::error::{Error as DomainError, RequestErrorKind};
use domain::Broker;
use log::*;
use std::sync::Arc;
use tokio::net::TcpListener;

mod controller;
mod error;
mod extractors;
mod params;
mod response;
mod router;

pub use error::{Error, Result};
pub use router::define_routes;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub service_state: service::AppState,
    pub broker: Arc<dyn Broker>,
}

impl AppState {
    pub fn new(service_state: service::AppState, broker: Arc<dyn Broker>) -> Self {
        Self {
            service_state,
            broker,
        }
    }

    pub fn broker_ref(&self) -> &dyn Broker {
        self.broker.as_ref()
    }

    pub fn config(&self) -> &service::config::Config {
        &self.service_state.config
    }

    /// Resolves a caller-supplied connection key to the broker connection string it names.
    pub fn connection_string(&self, connection_key: &str) -> Result<&str> {
        self.service_state
            .connections_ref()
            .lookup(connection_key)
            .ok_or_else(|| {
                DomainError::request(RequestErrorKind::UnknownConnection(
                    connection_key.to_string(),
                ))
                .into()
            })
    }
}

pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let interface = app_state.config().interface().to_string();
    let port = app_state.config().port;
    info!(
        "Server starting... listening for connections on http://{interface}:{port} ({} environment)",
        app_state.config().runtime_env()
    );

    let listener = TcpListener::bind((interface.as_str(), port)).await?;
    axum::serve(listener, router::define_routes(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {e}");
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
                warn!("Could not listen for SIGTERM: {e}");
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
    info!("Shutdown signal received, draining in-flight requests");
}

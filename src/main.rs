//! Bus Bridge: an HTTP front end that forwards JSON messages to and from message broker
//! queues, topics and subscriptions named by a configured connection list.
use domain::gateway::Gateway;
use log::{error, info};
use service::{config::Config, connections::ConnectionRegistry, logging::Logger};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!("Starting up bus bridge ({} environment)", config.runtime_env());

    let connections = match ConnectionRegistry::from_json(config.connection_list()) {
        Ok(connections) => Arc::new(connections),
        Err(e) => {
            error!("Failed to load the connection list: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Loaded {} broker connection(s): {}",
        connections.len(),
        connections.keys().collect::<Vec<_>>().join(", ")
    );

    let gateway = match Gateway::new() {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!("Failed to build the broker gateway: {e}");
            std::process::exit(1);
        }
    };

    let service_state = service::AppState::new(config, &connections);
    let app_state = web::AppState::new(service_state, gateway);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server stopped with an error: {e}");
        std::process::exit(1);
    }
    info!("Bus bridge shut down");
}

use config::Config;
use connections::ConnectionRegistry;
use std::sync::Arc;

pub mod config;
pub mod connections;
pub mod logging;

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub connections: Arc<ConnectionRegistry>,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config, connections: &Arc<ConnectionRegistry>) -> Self {
        Self {
            connections: Arc::clone(connections),
            config: app_config,
        }
    }

    pub fn connections_ref(&self) -> &ConnectionRegistry {
        self.connections.as_ref()
    }
}

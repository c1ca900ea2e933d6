//! Concrete broker transports and the [`Gateway`] that picks one per connection string.
use crate::broker::{Broker, ReceiveSource, ReceiverClient, SendTarget, SenderClient};
use crate::error::Error;
use async_trait::async_trait;
use log::*;
use std::sync::Arc;

pub mod memory;
pub mod service_bus;
pub mod service_bus_session;

use memory::{MemoryBroker, MemoryReceiverClient, MemorySender};
use service_bus::{ServiceBusConnection, ServiceBusReceiverClient, ServiceBusSender};

/// Broker implementation used by the server. `memory://` connection strings are served
/// in process; anything else is parsed as an Azure Service Bus connection string.
pub struct Gateway {
    http: reqwest::Client,
    memory: MemoryBroker,
}

impl Gateway {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            http: reqwest::Client::builder().use_rustls_tls().build()?,
            memory: MemoryBroker::new(),
        })
    }

    /// In-process namespaces, for seeding and inspecting `memory://` brokers.
    pub fn memory(&self) -> &MemoryBroker {
        &self.memory
    }

    fn is_memory(connection_string: &str) -> bool {
        connection_string
            .trim_start()
            .starts_with(&format!("{}://", memory::SCHEME))
    }
}

#[async_trait]
impl Broker for Gateway {
    async fn sender(
        &self,
        connection_string: &str,
        target: &SendTarget,
    ) -> Result<Box<dyn SenderClient>, Error> {
        if Self::is_memory(connection_string) {
            let namespace = self.memory.namespace(connection_string.trim())?;
            return Ok(Box::new(MemorySender::new(namespace, target)?));
        }
        let connection = Arc::new(ServiceBusConnection::parse(connection_string)?);
        debug!("Sending to {target} at {}", connection.endpoint());
        Ok(Box::new(ServiceBusSender::new(
            self.http.clone(),
            connection,
            target,
        )))
    }

    async fn receiver_client(
        &self,
        connection_string: &str,
        source: &ReceiveSource,
    ) -> Result<Box<dyn ReceiverClient>, Error> {
        if Self::is_memory(connection_string) {
            let namespace = self.memory.namespace(connection_string.trim())?;
            return Ok(Box::new(MemoryReceiverClient::new(namespace, source)?));
        }
        let connection = Arc::new(ServiceBusConnection::parse(connection_string)?);
        debug!("Receiving from {source} at {}", connection.endpoint());
        Ok(Box::new(ServiceBusReceiverClient::new(
            self.http.clone(),
            connection,
            source,
        )))
    }
}

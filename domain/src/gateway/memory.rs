//! In-process broker namespaces addressed by `memory://` connection strings.
//!
//! `memory://local?queues=orders,audit&topics=events&subscriptions=events/billing`
//! names the namespace `local` and declares the entities it must contain. A namespace
//! is created on first use and shared by every connection string naming it, so a
//! message sent through one request can be received by a later one.
//!
//! Delivery is peek-lock: fetched messages stay locked by their receiver until they are
//! completed, and go back to the front of their entity when the receiver closes.
use crate::broker::{
    OpenedReceiver, ReceiveSource, Receiver, ReceiverClient, ReceiverSettings, SendTarget,
    SenderClient, SessionRequest,
};
use crate::error::{BrokerErrorKind, Error};
use crate::message::{InboundMessage, OutboundMessage, SendOutcome};
use async_trait::async_trait;
use dashmap::DashMap;
use log::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

pub const SCHEME: &str = "memory";

/// Largest message body a namespace accepts, matching the Service Bus standard tier.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Deliveries after which an uncompleted message is moved to its entity's dead-letter
/// list instead of being made available again. Service Bus uses the same default.
pub const MAX_DELIVERY_COUNT: u32 = 10;

/// All namespaces known to this process, keyed by name.
#[derive(Default)]
pub struct MemoryBroker {
    namespaces: DashMap<String, Arc<Namespace>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a `memory://` connection string, creating the namespace and any entities
    /// it declares when they don't exist yet.
    pub fn namespace(&self, connection_string: &str) -> Result<Arc<Namespace>, Error> {
        let url = Url::parse(connection_string)?;
        if url.scheme() != SCHEME {
            return Err(Error::broker(BrokerErrorKind::InvalidConnectionString(
                format!("expected a {SCHEME}:// connection string"),
            )));
        }
        let name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| {
                Error::broker(BrokerErrorKind::InvalidConnectionString(
                    "memory connection string has no namespace name".to_string(),
                ))
            })?
            .to_string();

        let namespace = Arc::clone(
            self.namespaces
                .entry(name.clone())
                .or_insert_with(|| {
                    debug!("Creating in-memory namespace '{name}'");
                    Arc::new(Namespace::new(name))
                })
                .value(),
        );

        for (key, value) in url.query_pairs() {
            let names = value.split(',').map(str::trim).filter(|n| !n.is_empty());
            match key.as_ref() {
                "queues" => names.for_each(|queue| namespace.create_queue(queue)),
                "topics" => names.for_each(|topic| namespace.create_topic(topic)),
                "subscriptions" => {
                    for path in names {
                        let (topic, subscription) = path.split_once('/').ok_or_else(|| {
                            Error::broker(BrokerErrorKind::InvalidConnectionString(format!(
                                "subscription '{path}' must be written as topic/subscription"
                            )))
                        })?;
                        namespace.create_subscription(topic, subscription);
                    }
                }
                other => debug!("Ignoring unknown memory connection option '{other}'"),
            }
        }

        Ok(namespace)
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence_number: i64,
    session_id: Option<String>,
    delivery_count: u32,
    fragments: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct EntityState {
    available: VecDeque<StoredMessage>,
    locked: HashMap<String, StoredMessage>,
    active_sessions: HashSet<String>,
    dead_letters: Vec<StoredMessage>,
}

impl EntityState {
    fn push(&mut self, message: StoredMessage) {
        self.available.push_back(message);
    }

    /// Puts a previously locked message back, keeping sequence order. A message that
    /// has used up its deliveries is dead-lettered instead.
    fn restore(&mut self, message: StoredMessage) {
        if message.delivery_count >= MAX_DELIVERY_COUNT {
            warn!(
                "Dead-lettering message {} after {} deliveries",
                message.sequence_number, message.delivery_count
            );
            self.dead_letters.push(message);
            return;
        }
        let position = self
            .available
            .iter()
            .position(|m| m.sequence_number > message.sequence_number)
            .unwrap_or(self.available.len());
        self.available.insert(position, message);
    }

    fn next_free_session(&self) -> Option<String> {
        self.available
            .iter()
            .filter_map(|m| m.session_id.as_ref())
            .find(|session| !self.active_sessions.contains(*session))
            .cloned()
    }
}

#[derive(Debug, Default)]
struct NamespaceState {
    queues: HashMap<String, EntityState>,
    topics: HashMap<String, HashMap<String, EntityState>>,
    next_sequence_number: i64,
}

impl NamespaceState {
    fn entity_mut(&mut self, source: &ReceiveSource) -> Result<&mut EntityState, Error> {
        let entity = match source {
            ReceiveSource::Queue { queue_name } => self.queues.get_mut(queue_name),
            ReceiveSource::Subscription {
                topic_name,
                subscription_name,
            } => self
                .topics
                .get_mut(topic_name)
                .and_then(|subscriptions| subscriptions.get_mut(subscription_name)),
        };
        entity.ok_or_else(|| Error::broker(BrokerErrorKind::EntityNotFound(source.to_string())))
    }

    fn has_target(&self, target: &SendTarget) -> bool {
        match target {
            SendTarget::Queue { queue_name } => self.queues.contains_key(queue_name),
            SendTarget::Topic { topic_name } => self.topics.contains_key(topic_name),
        }
    }
}

/// Which messages of an entity a receiver may see.
type SessionFilter = Option<String>;

pub struct Namespace {
    name: String,
    state: Mutex<NamespaceState>,
    arrivals: Notify,
}

impl Namespace {
    fn new(name: String) -> Self {
        Self {
            name,
            state: Mutex::new(NamespaceState::default()),
            arrivals: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, NamespaceState> {
        // A panic while holding the lock cannot leave the maps half updated, so a
        // poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_queue(&self, queue_name: &str) {
        self.state()
            .queues
            .entry(queue_name.to_string())
            .or_default();
    }

    pub fn create_topic(&self, topic_name: &str) {
        self.state()
            .topics
            .entry(topic_name.to_string())
            .or_default();
    }

    pub fn create_subscription(&self, topic_name: &str, subscription_name: &str) {
        self.state()
            .topics
            .entry(topic_name.to_string())
            .or_default()
            .entry(subscription_name.to_string())
            .or_default();
    }

    /// Stores one message whose body is made of `fragments`. Topics copy the message to
    /// every subscription they have.
    pub fn send_fragments(
        &self,
        target: &SendTarget,
        fragments: Vec<Vec<u8>>,
        session_id: Option<&str>,
    ) -> Result<SendOutcome, Error> {
        let size: usize = fragments.iter().map(Vec::len).sum();
        if size > MAX_MESSAGE_BYTES {
            return Ok(SendOutcome::failed(format!(
                "message of {size} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"
            )));
        }

        let mut state = self.state();
        state.next_sequence_number += 1;
        let message = StoredMessage {
            sequence_number: state.next_sequence_number,
            session_id: session_id.map(str::to_string),
            delivery_count: 0,
            fragments,
        };

        match target {
            SendTarget::Queue { queue_name } => state
                .queues
                .get_mut(queue_name)
                .ok_or_else(|| Error::broker(BrokerErrorKind::EntityNotFound(target.to_string())))?
                .push(message),
            SendTarget::Topic { topic_name } => {
                let subscriptions = state.topics.get_mut(topic_name).ok_or_else(|| {
                    Error::broker(BrokerErrorKind::EntityNotFound(target.to_string()))
                })?;
                for entity in subscriptions.values_mut() {
                    entity.push(message.clone());
                }
            }
        }
        drop(state);

        self.arrivals.notify_waiters();
        Ok(SendOutcome::sent())
    }

    /// Messages stored in an entity, whether waiting or locked by a receiver.
    pub fn pending_count(&self, source: &ReceiveSource) -> Result<usize, Error> {
        let mut state = self.state();
        let entity = state.entity_mut(source)?;
        Ok(entity.available.len() + entity.locked.len())
    }

    /// Messages an entity gave up on after [`MAX_DELIVERY_COUNT`] deliveries.
    pub fn dead_letter_count(&self, source: &ReceiveSource) -> Result<usize, Error> {
        let mut state = self.state();
        Ok(state.entity_mut(source)?.dead_letters.len())
    }

    fn open(&self, source: &ReceiveSource, session: &SessionRequest) -> Result<Option<SessionFilter>, Error> {
        let mut state = self.state();
        let entity = state.entity_mut(source)?;
        let session_id = match session {
            SessionRequest::None => return Ok(Some(None)),
            SessionRequest::Id(id) => id.clone(),
            SessionRequest::NextAvailable => match entity.next_free_session() {
                Some(id) => id,
                None => return Ok(None),
            },
        };
        if !entity.active_sessions.insert(session_id.clone()) {
            return Err(Error::broker(BrokerErrorKind::Rejected(format!(
                "session '{session_id}' of {source} is locked by another receiver"
            ))));
        }
        Ok(Some(Some(session_id)))
    }

    fn lock_batch(
        &self,
        source: &ReceiveSource,
        filter: &SessionFilter,
        max_batch_size: Option<usize>,
    ) -> Result<Vec<InboundMessage>, Error> {
        let mut state = self.state();
        let entity = state.entity_mut(source)?;
        let limit = max_batch_size.unwrap_or(usize::MAX);

        let mut batch = Vec::new();
        let mut index = 0;
        while batch.len() < limit && index < entity.available.len() {
            if entity.available[index].session_id != *filter {
                index += 1;
                continue;
            }
            let Some(mut message) = entity.available.remove(index) else {
                break;
            };
            message.delivery_count += 1;
            let lock_token = uuid::Uuid::new_v4().to_string();
            batch.push(InboundMessage::new(
                lock_token.clone(),
                message.sequence_number,
                message.session_id.clone(),
                message.delivery_count,
                message.fragments.clone(),
            ));
            entity.locked.insert(lock_token, message);
        }
        Ok(batch)
    }

    fn complete(&self, source: &ReceiveSource, lock_token: &str) -> Result<(), Error> {
        let mut state = self.state();
        state
            .entity_mut(source)?
            .locked
            .remove(lock_token)
            .map(|_| ())
            .ok_or_else(|| {
                Error::broker(BrokerErrorKind::Rejected(format!(
                    "lock '{lock_token}' is not held on {source}"
                )))
            })
    }

    fn release(&self, source: &ReceiveSource, filter: &SessionFilter, lock_tokens: &HashSet<String>) {
        let mut state = self.state();
        let Ok(entity) = state.entity_mut(source) else {
            return;
        };
        for token in lock_tokens {
            if let Some(message) = entity.locked.remove(token) {
                entity.restore(message);
            }
        }
        if let Some(session_id) = filter {
            entity.active_sessions.remove(session_id);
        }
        drop(state);
        self.arrivals.notify_waiters();
    }
}

pub(crate) struct MemorySender {
    namespace: Arc<Namespace>,
    target: SendTarget,
}

impl MemorySender {
    pub(crate) fn new(namespace: Arc<Namespace>, target: &SendTarget) -> Result<Self, Error> {
        if !namespace.state().has_target(target) {
            return Err(Error::broker(BrokerErrorKind::EntityNotFound(
                target.to_string(),
            )));
        }
        Ok(Self {
            namespace,
            target: target.clone(),
        })
    }
}

#[async_trait]
impl SenderClient for MemorySender {
    async fn send(
        &self,
        messages: &[OutboundMessage],
        session_id: Option<&str>,
    ) -> Result<Vec<SendOutcome>, Error> {
        messages
            .iter()
            .map(|message| {
                self.namespace
                    .send_fragments(&self.target, vec![message.body().to_vec()], session_id)
            })
            .collect()
    }
}

pub(crate) struct MemoryReceiverClient {
    namespace: Arc<Namespace>,
    source: ReceiveSource,
}

impl MemoryReceiverClient {
    pub(crate) fn new(namespace: Arc<Namespace>, source: &ReceiveSource) -> Result<Self, Error> {
        namespace.state().entity_mut(source)?;
        Ok(Self {
            namespace,
            source: source.clone(),
        })
    }
}

#[async_trait]
impl ReceiverClient for MemoryReceiverClient {
    async fn open_receiver(
        &self,
        session: &SessionRequest,
        settings: &ReceiverSettings,
    ) -> Result<OpenedReceiver, Error> {
        let Some(filter) = self.namespace.open(&self.source, session)? else {
            return Ok(OpenedReceiver::NoActiveSession);
        };
        trace!(
            "Opened receiver on {} in namespace '{}' (session {:?})",
            self.source,
            self.namespace.name(),
            filter
        );
        Ok(OpenedReceiver::Ready(Box::new(MemoryReceiver {
            namespace: Arc::clone(&self.namespace),
            source: self.source.clone(),
            filter,
            idle_timeout: settings.idle_timeout,
            last_activity: Instant::now(),
            held_locks: HashSet::new(),
        })))
    }
}

struct MemoryReceiver {
    namespace: Arc<Namespace>,
    source: ReceiveSource,
    filter: SessionFilter,
    idle_timeout: Duration,
    last_activity: Instant,
    held_locks: HashSet<String>,
}

impl MemoryReceiver {
    fn is_idle(&self) -> bool {
        !self.idle_timeout.is_zero() && self.last_activity.elapsed() >= self.idle_timeout
    }
}

#[async_trait]
impl Receiver for MemoryReceiver {
    fn session_id(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    async fn fetch_next(
        &mut self,
        max_batch_size: Option<usize>,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, Error> {
        if self.is_idle() {
            debug!("Receiver on {} idled out", self.source);
            return Ok(Vec::new());
        }

        let namespace = Arc::clone(&self.namespace);
        let deadline = Instant::now() + wait;
        loop {
            // Registered before looking so an arrival between the look and the wait is seen.
            let arrival = namespace.arrivals.notified();
            let batch = namespace.lock_batch(&self.source, &self.filter, max_batch_size)?;
            if !batch.is_empty() {
                self.held_locks
                    .extend(batch.iter().map(|message| message.lock_token.clone()));
                self.last_activity = Instant::now();
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, arrival).await;
        }
    }

    async fn complete(&mut self, message: &InboundMessage) -> Result<(), Error> {
        if !self.held_locks.remove(&message.lock_token) {
            return Err(Error::broker(BrokerErrorKind::Rejected(format!(
                "message {} was not received by this receiver",
                message.sequence_number
            ))));
        }
        self.namespace.complete(&self.source, &message.lock_token)
    }

    async fn close(self: Box<Self>) -> Result<(), Error> {
        // Locks are handed back in Drop.
        Ok(())
    }
}

impl Drop for MemoryReceiver {
    fn drop(&mut self) {
        if !self.held_locks.is_empty() {
            debug!(
                "Releasing {} uncompleted message(s) on {}",
                self.held_locks.len(),
                self.source
            );
        }
        self.namespace
            .release(&self.source, &self.filter, &self.held_locks);
        self.held_locks.clear();
    }
}

//! Session: many topics and calls multiplexed over one connection.
//!
//! A [`Session`] owns one transport at a time and drives it through a
//! three-state lifecycle. Subscriptions and calls share a single channel id
//! space that only ever grows.
//!
//! # Architecture
//!
//! ```text
//!   subscribe / execute / notify               TransportFactory
//!            │                                        │ connect(url, events)
//!            ▼                                        ▼
//!   ┌──────────────────┐    Outbound frames    ┌────────────┐
//!   │   SessionInner   │ ────────────────────► │ Transport  │
//!   │  registry        │                       └─────┬──────┘
//!   │  requests        │ ◄──── (generation, TransportEvent)
//!   │  reconnect timer │        poll_events() / run()
//!   └──────────────────┘
//!            │ deliveries (after the borrow is released)
//!            ▼
//!   listeners / state callbacks / PendingCall
//! ```
//!
//! # Lifecycle
//!
//! - `connecting` on construction and on every reconnect attempt
//! - `connected` when the transport opens; every topic without a live
//!   channel is subscribed again with a fresh id
//! - `disconnected` when the transport closes; pending calls are rejected,
//!   channels and cached values are dropped, listeners are kept, and the
//!   [`ReconnectPolicy`] schedules the next attempt
//! - [`Session::close`] is terminal
//!
//! # Threading
//!
//! Single-threaded. The session is `!Send`; drive it with
//! [`Session::poll_events`] or [`Session::run`] on a current-thread runtime
//! or a `LocalSet`. Callbacks are never invoked while internal state is
//! borrowed, so they may call back into the session (including
//! unsubscribing themselves).

// Rust guideline compliant 2026-02

mod call;
mod error;
mod listener;
mod registry;
mod requests;

pub use call::PendingCall;
pub use error::{CallError, SessionError};
pub use listener::Listener;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::Instant;

use crate::config::Config;
use crate::protocol::{ChannelId, Inbound, Outbound};
use crate::reconnect::{FixedDelay, ReconnectPolicy};
use crate::topic::{TopicKey, TopicSpec};
use crate::transport::{
    Transport, TransportEvent, TransportEvents, TransportFactory, WebSocketFactory,
};
use crate::value::Value;
use listener::{ListenerEntry, ListenerId};
use registry::{Broadcast, Registry};
use requests::RequestTable;

/// Longest inbound frame excerpt written to the log.
const LOG_EXCERPT: usize = 100;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// A transport is being opened.
    Connecting,
    /// The transport is open; frames flow.
    Connected,
    /// No transport. A reconnect may be scheduled.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Handle returned by [`Session::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateListenerId(u64);

type StateCallback = Rc<RefCell<Box<dyn FnMut(ConnectionState)>>>;

type EventReceiver = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

/// Callback work collected under the borrow and run after it is released.
enum Delivery {
    State(Vec<StateCallback>, ConnectionState),
    Update(Broadcast),
    Error(Vec<Rc<ListenerEntry>>, serde_json::Value),
}

fn deliver(deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        match delivery {
            Delivery::State(callbacks, state) => {
                for callback in callbacks {
                    match callback.try_borrow_mut() {
                        Ok(mut callback) => (*callback)(state),
                        Err(_) => log::warn!("[Session] State listener re-entered, skipping {state}"),
                    }
                }
            }
            Delivery::Update((listeners, value)) => {
                for listener in &listeners {
                    listener.deliver(&value);
                }
            }
            Delivery::Error(listeners, error) => {
                for listener in &listeners {
                    listener.deliver_error(&error);
                }
            }
        }
    }
}

/// Configures and creates a [`Session`].
pub struct SessionBuilder {
    url: String,
    policy: Box<dyn ReconnectPolicy>,
}

impl SessionBuilder {
    /// Builder for a session connecting to `url`, reconnecting after a fixed
    /// 500 ms delay.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: Box::new(FixedDelay::default()),
        }
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub fn reconnect_policy(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Create the session and start the first connection attempt.
    pub fn build(self, factory: impl TransportFactory + 'static) -> Session {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let inner = SessionInner {
            url: self.url,
            factory: Box::new(factory),
            policy: self.policy,
            events_tx,
            transport: None,
            generation: 0,
            state: ConnectionState::Connecting,
            state_tx,
            state_listeners: Vec::new(),
            next_state_listener: 0,
            closed: false,
            attempt: 0,
            reconnect_at: None,
            next_channel: 1,
            next_listener: 1,
            registry: Registry::default(),
            requests: RequestTable::default(),
        };
        let session = Session {
            inner: Rc::new(RefCell::new(inner)),
            events: Rc::new(RefCell::new(Some(events_rx))),
            shutdown: Rc::new(Notify::new()),
        };
        // Nobody can be listening yet.
        let initial = session.inner.borrow_mut().connect();
        drop(initial);
        session
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

struct SessionInner {
    url: String,
    factory: Box<dyn TransportFactory>,
    policy: Box<dyn ReconnectPolicy>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    transport: Option<Box<dyn Transport>>,
    /// Connection attempt whose events are accepted.
    generation: u64,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    state_listeners: Vec<(StateListenerId, StateCallback)>,
    next_state_listener: u64,
    closed: bool,
    /// Consecutive failed attempts since the last open.
    attempt: u32,
    reconnect_at: Option<Instant>,
    next_channel: ChannelId,
    next_listener: ListenerId,
    registry: Registry,
    requests: RequestTable,
}

impl SessionInner {
    fn connect(&mut self) -> Vec<Delivery> {
        self.generation += 1;
        self.reconnect_at = None;
        log::info!(
            "[Session] Connecting to {} (attempt {})",
            self.url,
            self.generation
        );
        let events = TransportEvents::new(self.generation, self.events_tx.clone());
        self.transport = Some(self.factory.connect(&self.url, events));
        self.set_state(ConnectionState::Connecting)
    }

    fn set_state(&mut self, state: ConnectionState) -> Vec<Delivery> {
        if self.state == state {
            return Vec::new();
        }
        log::debug!("[Session] {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        let callbacks = self
            .state_listeners
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        vec![Delivery::State(callbacks, state)]
    }

    fn allocate_channel(&mut self) -> ChannelId {
        let channel = self.next_channel;
        self.next_channel += 1;
        channel
    }

    fn send(&self, frame: &Outbound<'_>) {
        let Some(transport) = &self.transport else {
            log::debug!("[Session] No transport, dropping outbound frame");
            return;
        };
        let text = frame.encode();
        log::trace!("[Session] -> {text}");
        if let Err(e) = transport.send(&text) {
            log::warn!("[Session] Failed to send frame: {e:#}");
        }
    }

    fn dispatch(&mut self, event: TransportEvent) -> Vec<Delivery> {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Error(message) => {
                log::warn!("[Session] Transport error: {message}");
                Vec::new()
            }
            TransportEvent::Message(text) => match Inbound::decode(&text) {
                Ok(frame) => self.on_frame(frame),
                Err(e) => {
                    let excerpt: String = text.chars().take(LOG_EXCERPT).collect();
                    log::warn!("[Session] Dropping inbound frame ({e}): {excerpt}");
                    Vec::new()
                }
            },
            TransportEvent::Close { code, reason } => self.on_close(code, &reason),
        }
    }

    fn on_open(&mut self) -> Vec<Delivery> {
        self.attempt = 0;
        let deliveries = self.set_state(ConnectionState::Connected);

        let pending = self.registry.unbound();
        log::info!(
            "[Session] Connected, subscribing {} topic(s)",
            pending.len()
        );
        for (key, topic) in pending {
            let channel = self.allocate_channel();
            self.send(&Outbound::Subscribe {
                channel,
                topic: &topic,
            });
            self.registry.bind(&key, channel);
        }
        deliveries
    }

    fn on_close(&mut self, code: u16, reason: &str) -> Vec<Delivery> {
        log::info!("[Session] Connection closed ({code}) {reason}");
        self.transport = None;

        let rejected = self.requests.reject_all(&CallError::ConnectionLost);
        if rejected > 0 {
            log::debug!("[Session] Rejected {rejected} pending call(s)");
        }
        self.registry.disconnect();
        let deliveries = self.set_state(ConnectionState::Disconnected);

        self.attempt = self.attempt.saturating_add(1);
        match self.policy.next_delay(self.attempt) {
            Some(delay) => {
                log::info!("[Session] Reconnecting in {}ms", delay.as_millis());
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => log::info!("[Session] Reconnect policy gave up, staying disconnected"),
        }
        deliveries
    }

    fn on_frame(&mut self, frame: Inbound) -> Vec<Delivery> {
        match frame {
            Inbound::Error { channel, error } => {
                if self.registry.is_subscribed(channel) {
                    log::warn!("[Session] Subscription on channel {channel} failed: {error}");
                    return self
                        .registry
                        .fail(channel)
                        .map(|listeners| vec![Delivery::Error(listeners, error)])
                        .unwrap_or_default();
                }
                if !self.requests.reject(channel, CallError::Remote(error)) {
                    log::warn!("[Session] Error for unknown channel {channel}");
                }
                Vec::new()
            }
            Inbound::Result { channel, value } => {
                if !self.requests.resolve(channel, value) {
                    log::warn!("[Session] Result for unknown channel {channel}");
                }
                Vec::new()
            }
            Inbound::Reset { channel, value } => match self.registry.reset(channel, value) {
                Some(broadcast) => vec![Delivery::Update(broadcast)],
                None => {
                    log::debug!("[Session] Reset for inactive channel {channel}");
                    Vec::new()
                }
            },
            Inbound::Updates { channel, updates } => {
                match self.registry.apply(channel, &updates) {
                    Ok(Some(broadcast)) => vec![Delivery::Update(broadcast)],
                    Ok(None) => {
                        log::debug!("[Session] Updates for inactive channel {channel}");
                        Vec::new()
                    }
                    Err(e) => {
                        log::warn!("[Session] Dropping update batch on channel {channel}: {e}");
                        Vec::new()
                    }
                }
            }
            Inbound::Alias { aliased, target } => match self.registry.alias(aliased, target) {
                Some((moved, value)) => {
                    log::debug!(
                        "[Session] Channel {aliased} merged into {target} ({} listener(s))",
                        moved.len()
                    );
                    value
                        .map(|value| vec![Delivery::Update((moved, value))])
                        .unwrap_or_default()
                }
                None => {
                    log::debug!("[Session] Ignoring alias {aliased} -> {target}");
                    Vec::new()
                }
            },
        }
    }

    fn remove_listener(&mut self, id: ListenerId) {
        let Some(removed) = self.registry.remove_listener(id) else {
            return;
        };
        if !removed.emptied {
            return;
        }
        log::debug!("[Session] Last listener left {}", removed.key);
        if let Some(channel) = removed.release {
            if self.state == ConnectionState::Connected {
                self.send(&Outbound::Unsubscribe { channel });
            }
        }
    }

    fn close(&mut self) -> Vec<Delivery> {
        self.closed = true;
        self.reconnect_at = None;
        // Anything the old transport still reports is stale.
        self.generation += 1;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.requests.reject_all(&CallError::Closed);
        self.registry.clear();
        let deliveries = self.set_state(ConnectionState::Disconnected);
        // Wakes `until_connected` waiters even if already disconnected.
        self.state_tx.send_replace(ConnectionState::Disconnected);
        deliveries
    }
}

/// A client session.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Rc<RefCell<SessionInner>>,
    events: Rc<RefCell<Option<EventReceiver>>>,
    shutdown: Rc<Notify>,
}

impl Session {
    /// Connect to `url` through `factory` with the default reconnect policy.
    pub fn connect(url: impl Into<String>, factory: impl TransportFactory + 'static) -> Self {
        SessionBuilder::new(url).build(factory)
    }

    /// Connect over WebSocket using `config`'s URL and reconnect delay.
    pub fn from_config(config: &Config) -> Self {
        SessionBuilder::new(config.url.clone())
            .reconnect_policy(config.reconnect_policy())
            .build(WebSocketFactory)
    }

    /// URL the session connects to.
    #[must_use]
    pub fn url(&self) -> String {
        self.inner.borrow().url.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    /// Whether the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Call `callback` on every state change.
    pub fn add_listener(&self, callback: impl FnMut(ConnectionState) + 'static) -> StateListenerId {
        let mut inner = self.inner.borrow_mut();
        inner.next_state_listener += 1;
        let id = StateListenerId(inner.next_state_listener);
        let callback: Box<dyn FnMut(ConnectionState)> = Box::new(callback);
        inner.state_listeners.push((id, Rc::new(RefCell::new(callback))));
        id
    }

    /// Stop calling a state listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: StateListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.state_listeners.len();
        inner.state_listeners.retain(|(existing, _)| *existing != id);
        inner.state_listeners.len() != before
    }

    /// Subscribe `listener` to `topic`.
    ///
    /// If the topic already has a value, `listener` receives it before this
    /// returns. The wire subscription is shared by every listener of the
    /// topic and is (re)issued whenever the session connects.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTopic`] if any part of `topic` is undefined or
    /// empty; [`SessionError::Closed`] after [`close`](Self::close).
    pub fn subscribe(
        &self,
        topic: impl Into<TopicSpec>,
        listener: impl Into<Listener>,
    ) -> Result<Subscription, SessionError> {
        let spec: TopicSpec = topic.into();
        let topic = spec.resolve()?;
        let key = topic.key();
        let listener: Listener = listener.into();

        let (entry, replay) = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Err(SessionError::Closed);
            }
            let id = inner.next_listener;
            inner.next_listener += 1;
            let entry = Rc::new(listener.into_entry(id));

            let added = inner.registry.add_listener(topic.clone(), Rc::clone(&entry));
            if added.created && inner.state == ConnectionState::Connected {
                let channel = inner.allocate_channel();
                inner.send(&Outbound::Subscribe {
                    channel,
                    topic: &topic,
                });
                inner.registry.bind(&key, channel);
            }
            (entry, added.replay)
        };

        if let Some(value) = replay {
            entry.deliver(&value);
        }
        Ok(Subscription {
            session: Rc::downgrade(&self.inner),
            listener: entry.id(),
            key,
            active: Cell::new(true),
        })
    }

    /// Invoke `action` on `topic` and wait for its result.
    ///
    /// When the session is not connected nothing is sent and the returned
    /// call is already rejected with [`CallError::NotConnected`] (or
    /// [`CallError::Closed`]).
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTopic`] if the session is connected and `topic`
    /// is not fully defined.
    pub fn execute(
        &self,
        topic: impl Into<TopicSpec>,
        action: &str,
        args: &[serde_json::Value],
    ) -> Result<PendingCall, SessionError> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Ok(PendingCall::rejected(CallError::Closed));
        }
        if inner.state != ConnectionState::Connected {
            log::debug!("[Session] Not connected, rejecting call to `{action}`");
            return Ok(PendingCall::rejected(CallError::NotConnected));
        }

        let spec: TopicSpec = topic.into();
        let topic = spec.resolve()?;
        let channel = inner.allocate_channel();
        let (settle, outcome) = oneshot::channel();
        inner.requests.insert(channel, settle);
        inner.send(&Outbound::Call {
            channel,
            topic: &topic,
            action,
            args,
        });
        Ok(PendingCall::waiting(channel, outcome))
    }

    /// Send `action` to `topic` without waiting for a reply.
    ///
    /// Silently does nothing when the session is not connected.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTopic`] if the session is connected and `topic`
    /// is not fully defined.
    pub fn notify(
        &self,
        topic: impl Into<TopicSpec>,
        action: &str,
        args: &[serde_json::Value],
    ) -> Result<(), SessionError> {
        let inner = self.inner.borrow();
        if inner.closed || inner.state != ConnectionState::Connected {
            log::trace!("[Session] Not connected, dropping notify `{action}`");
            return Ok(());
        }
        let spec: TopicSpec = topic.into();
        let topic = spec.resolve()?;
        inner.send(&Outbound::Notify {
            topic: &topic,
            action,
            args,
        });
        Ok(())
    }

    /// Cached value of `topic`, if a reset has arrived on the current
    /// connection.
    #[must_use]
    pub fn cached_value(&self, topic: impl Into<TopicSpec>) -> Option<Value> {
        let spec: TopicSpec = topic.into();
        let key = spec.identity_key();
        self.inner.borrow().registry.value(&key)
    }

    /// Number of topics with at least one listener.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.inner.borrow().registry.topic_count()
    }

    /// Number of calls awaiting a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.borrow().requests.len()
    }

    /// Close the session for good.
    ///
    /// Closes the transport, cancels any scheduled reconnect, rejects pending
    /// calls with [`CallError::Closed`] and drops every subscription.
    pub fn close(&self) {
        let deliveries = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return;
            }
            log::info!("[Session] Closing");
            inner.close()
        };
        self.shutdown.notify_one();
        deliver(deliveries);
    }

    /// Handle every transport event that has already arrived, then start a
    /// reconnect if one is due. Returns the number of events handled.
    ///
    /// Does nothing while [`run`](Self::run) is driving the session.
    pub fn poll_events(&self) -> usize {
        let mut handled = self.drain_events();
        if self.reconnect_if_due() {
            handled += self.drain_events();
        }
        handled
    }

    /// Drive the session until it is closed: handle transport events as they
    /// arrive and reconnect when the policy says so.
    pub async fn run(&self) {
        let Some(receiver) = self.events.borrow_mut().take() else {
            log::warn!("[Session] Session is already being driven");
            return;
        };
        // Hands the receiver back even when this future is dropped mid-await.
        let mut events = scopeguard::guard(receiver, |receiver| {
            *self.events.borrow_mut() = Some(receiver);
        });

        loop {
            let reconnect_at = {
                let inner = self.inner.borrow();
                if inner.closed {
                    break;
                }
                inner.reconnect_at
            };

            tokio::select! {
                event = events.recv() => match event {
                    Some((generation, event)) => self.handle_event(generation, event),
                    None => break,
                },
                () = sleep_until(reconnect_at) => {
                    self.reconnect_if_due();
                }
                () = self.shutdown.notified() => {}
            }
        }

        drop(events);
        log::debug!("[Session] Event loop stopped");
    }

    /// Wait until the session is connected.
    ///
    /// Needs something else driving the session ([`run`](Self::run) or
    /// [`poll_events`](Self::poll_events)).
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session is closed first.
    pub async fn until_connected(&self) -> Result<(), SessionError> {
        let mut state = self.inner.borrow().state_tx.subscribe();
        loop {
            {
                let inner = self.inner.borrow();
                if inner.closed {
                    return Err(SessionError::Closed);
                }
                if inner.state == ConnectionState::Connected {
                    return Ok(());
                }
            }
            if state.changed().await.is_err() {
                return Err(SessionError::Closed);
            }
        }
    }

    fn drain_events(&self) -> usize {
        let mut handled = 0;
        loop {
            let batch: Vec<(u64, TransportEvent)> = {
                let mut slot = self.events.borrow_mut();
                let Some(events) = slot.as_mut() else {
                    return handled;
                };
                std::iter::from_fn(|| events.try_recv().ok()).collect()
            };
            if batch.is_empty() {
                return handled;
            }
            handled += batch.len();
            for (generation, event) in batch {
                self.handle_event(generation, event);
            }
        }
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) {
        let deliveries = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed || generation != inner.generation {
                log::trace!("[Session] Ignoring {event:?} from superseded transport {generation}");
                return;
            }
            inner.dispatch(event)
        };
        deliver(deliveries);
    }

    fn reconnect_if_due(&self) -> bool {
        let deliveries = {
            let mut inner = self.inner.borrow_mut();
            match inner.reconnect_at {
                Some(at) if !inner.closed && at <= Instant::now() => inner.connect(),
                _ => return false,
            }
        };
        deliver(deliveries);
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Session")
                .field("url", &inner.url)
                .field("state", &inner.state)
                .field("closed", &inner.closed)
                .field("generation", &inner.generation)
                .finish_non_exhaustive(),
            Err(_) => f.write_str("Session { .. }"),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// One listener's registration on a topic.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
#[derive(Debug)]
pub struct Subscription {
    session: Weak<RefCell<SessionInner>>,
    listener: ListenerId,
    key: TopicKey,
    active: Cell<bool>,
}

impl Subscription {
    /// Remove this listener. When it was the topic's last one, the wire
    /// subscription is released.
    ///
    /// Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if !self.active.replace(false) {
            return;
        }
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        inner.borrow_mut().remove_listener(self.listener);
    }

    /// Whether the listener is still registered. False after
    /// [`unsubscribe`](Self::unsubscribe), after a server error ended the
    /// subscription, and after the session closed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
            && self
                .session
                .upgrade()
                .is_some_and(|inner| inner.borrow().registry.contains_listener(self.listener))
    }

    /// Canonical key of the subscribed topic.
    #[must_use]
    pub fn topic_key(&self) -> &TopicKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::reconnect::NoReconnect;

    #[derive(Debug)]
    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&self, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn close(&self) {}
    }

    /// Factory that opens every connection immediately.
    struct OpenFactory;

    impl TransportFactory for OpenFactory {
        fn connect(&self, _url: &str, events: TransportEvents) -> Box<dyn Transport> {
            events.open();
            Box::new(NullTransport)
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_initial_state_is_connecting() {
        let session = Session::connect("ws://test/socket", OpenFactory);
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(session.poll_events(), 1);
        assert!(session.is_connected());
    }

    #[test]
    fn test_channel_ids_are_never_reused() {
        let session = Session::connect("ws://test/socket", OpenFactory);
        session.poll_events();
        let first = session.execute(["a"], "x", &[]).unwrap();
        let second = session.execute(["a"], "x", &[]).unwrap();
        assert_eq!(first.channel_id(), Some(1));
        assert_eq!(second.channel_id(), Some(2));
        assert_eq!(session.pending_calls(), 2);
    }

    #[test]
    fn test_events_from_old_generation_are_ignored() {
        let session = SessionBuilder::new("ws://test/socket")
            .reconnect_policy(NoReconnect)
            .build(OpenFactory);
        let stale = TransportEvents::new(0, session.inner.borrow().events_tx.clone());
        stale.close(1006, "old");
        session.poll_events();
        assert!(session.is_connected());
    }

    #[test]
    fn test_reconnect_waits_for_delay() {
        let session = SessionBuilder::new("ws://test/socket")
            .reconnect_policy(FixedDelay(Duration::from_secs(3600)))
            .build(OpenFactory);
        session.poll_events();
        let events = TransportEvents::new(1, session.inner.borrow().events_tx.clone());
        events.close(1006, "gone");
        session.poll_events();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.inner.borrow().reconnect_at.is_some());
        assert_eq!(session.inner.borrow().generation, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let session = Session::connect("ws://test/socket", OpenFactory);
        let changes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&changes);
        session.add_listener(move |_| counter.set(counter.get() + 1));
        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(changes.get(), 1);
    }

    #[tokio::test]
    async fn test_run_returns_after_close() {
        let session = Session::connect("ws://test/socket", OpenFactory);
        let closer = session.clone();
        tokio::select! {
            () = session.run() => {}
            () = async {
                session.until_connected().await.unwrap();
                closer.close();
                std::future::pending::<()>().await;
            } => {}
        }
        assert!(session.is_closed());
        assert_eq!(session.poll_events(), 0);
    }
}

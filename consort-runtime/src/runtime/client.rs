/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! The client runtime: a throwaway identity that sends requests, listens for
//! replies and service events, and winds itself down when asked or starved.

use crate::addressing::{Channel, Hierarchy};
use crate::config::{ClientConfig, ConfigError};
use crate::control_plane::broker_client::BrokerClientFactory;
use crate::control_plane::manager::{ControlPlaneError, ControlPlaneManager};
use crate::control_plane::topic_handler::ChannelCallback;
use crate::data_plane::{DataPlaneManager, DataStore};
use crate::external_request::{
    DirectRequest, RequestOutcome, ResponseHandler, DEFAULT_REQUEST_TIMEOUT,
};
use crate::observability::events;
use crate::protocol::event::EventMessage;
use crate::protocol::version;
use crate::runtime::courier::{MessageCourier, PUMP_INTERVAL};
use crate::runtime::worker::{spawn_worker, WorkerHandle};
use async_trait::async_trait;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "client";

/// A client with no inbound traffic for this long terminates itself.
pub(crate) const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(300);

/// What the message callback wants to happen after a reply.
pub enum ClientDirective {
    /// Track and send these follow-up requests.
    Send(Vec<DirectRequest>),
    /// Keep waiting for outstanding replies and events.
    Continue,
    /// Wind the client down.
    Terminate,
}

/// Invoked for every matched reply; its return value drives the session.
pub type MessageCallback = Arc<dyn Fn(&RequestOutcome) -> ClientDirective + Send + Sync>;

/// Invoked for every event arriving from a listened-to service.
pub type EventCallback = Arc<dyn Fn(&EventNotice) + Send + Sync>;

/// One event delivered from a service's `events` channel.
#[derive(Clone, Debug)]
pub struct EventNotice {
    pub source: Hierarchy,
    pub capability: String,
    pub event: String,
    pub payload: Value,
}

/// Failures raised while assembling or operating a [`Client`].
#[derive(Debug)]
pub enum ClientError {
    Config(ConfigError),
    ControlPlane(ControlPlaneError),
    NoEventCallback,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Config(err) => write!(f, "invalid client configuration: {err}"),
            ClientError::ControlPlane(err) => write!(f, "control plane failure: {err}"),
            ClientError::NoEventCallback => {
                write!(f, "listening for events requires an event callback")
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Config(err) => Some(err),
            ClientError::ControlPlane(err) => Some(err),
            ClientError::NoEventCallback => None,
        }
    }
}

/// Callback bridging subscribed `events` channels into the client.
struct EventIntake {
    inner: Weak<ClientInner>,
}

#[async_trait]
impl ChannelCallback for EventIntake {
    async fn on_message(&self, payload: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_event_bytes(payload).await;
        }
    }
}

struct ClientInner {
    courier: Arc<MessageCourier>,
    on_reply: MessageCallback,
    on_event: Option<EventCallback>,
    initial_requests: Vec<DirectRequest>,
    terminate_after_initial: bool,
    resend_on_secondary_startup: bool,
    terminate: AtomicBool,
    last_traffic: Mutex<Instant>,
}

impl ClientInner {
    fn note_traffic(&self) {
        *self
            .last_traffic
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// The window refreshes on any raw message the courier saw on a response
    /// channel, not just on matched replies, so a busy shared channel keeps
    /// the session alive.
    fn heartbeat_expired(&self) -> bool {
        let mut latest = *self
            .last_traffic
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(inbound) = self.courier.last_inbound() {
            latest = latest.max(inbound);
        }
        latest.elapsed() >= HEARTBEAT_TIMEOUT
    }

    fn request_terminate(&self, reason: &str) {
        if !self.terminate.swap(true, Ordering::SeqCst) {
            info!(
                event = events::CLIENT_TERMINATE,
                component = COMPONENT,
                reason,
                "client termination requested"
            );
        }
    }

    async fn handle_event_bytes(&self, payload: &[u8]) {
        self.note_traffic();
        let message = match EventMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    event = events::INBOUND_PARSE_FAILED,
                    component = COMPONENT,
                    err = %e,
                    "dropping unparseable event"
                );
                return;
            }
        };

        if let Err(e) = version::check_compatibility(&message.headers.sdk_version) {
            warn!(
                event = events::INBOUND_VERSION_REJECTED,
                component = COMPONENT,
                msg_id = %message.message_id,
                err = %e,
                "dropping event from incompatible peer"
            );
            return;
        }

        let Some(on_event) = &self.on_event else {
            return;
        };
        let source = match Hierarchy::parse_dotted(&message.headers.source) {
            Ok(source) => source,
            Err(e) => {
                debug!(
                    event = events::INBOUND_PARSE_FAILED,
                    component = COMPONENT,
                    msg_id = %message.message_id,
                    err = %e,
                    "event source is not a valid hierarchy"
                );
                return;
            }
        };
        let text = match self
            .courier
            .data_plane()
            .resolve_incoming(message.headers.data_handler, &message.payload)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                error!(
                    event = events::DATA_PLANE_RESOLVE_FAILED,
                    component = COMPONENT,
                    msg_id = %message.message_id,
                    err = %e,
                    "event payload could not be resolved"
                );
                return;
            }
        };

        let notice = EventNotice {
            source,
            capability: message.headers.capability_name,
            event: message.headers.event_name,
            payload: serde_json::from_str(&text).unwrap_or(Value::String(text)),
        };
        if catch_unwind(AssertUnwindSafe(|| on_event(&notice))).is_err() {
            error!(
                event = events::DISPATCH_CALLBACK_PANICKED,
                component = COMPONENT,
                capability = %notice.capability,
                name = %notice.event,
                "event callback panicked"
            );
        }
    }
}

/// Builds the courier-facing handler for one tracked request. The user
/// callback runs inside it; a panic there terminates the session instead of
/// poisoning the courier.
fn reply_handler(inner: &Arc<ClientInner>) -> ResponseHandler {
    let weak = Arc::downgrade(inner);
    Box::new(move |outcome: &RequestOutcome| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| (inner.on_reply)(outcome))) {
            Ok(ClientDirective::Send(requests)) => install_requests(&inner, requests, true),
            Ok(ClientDirective::Continue) => {}
            Ok(ClientDirective::Terminate) => {
                inner.request_terminate("callback requested termination");
            }
            Err(_) => {
                error!(
                    event = events::DISPATCH_CALLBACK_PANICKED,
                    component = COMPONENT,
                    operation = %outcome.operation,
                    "message callback panicked"
                );
                inner.request_terminate("message callback panicked");
            }
        }
    })
}

/// Tracks a batch of requests with the courier. Requests the courier refuses
/// are logged and skipped; the rest still go out.
fn install_requests(inner: &Arc<ClientInner>, requests: Vec<DirectRequest>, with_handlers: bool) {
    for request in requests {
        let handler = with_handlers.then(|| reply_handler(inner));
        let operation = request.operation.clone();
        if let Err(e) = inner.courier.create_external_request(request, handler) {
            warn!(
                event = events::REQUEST_REJECTED,
                component = COMPONENT,
                operation = %operation,
                err = %e,
                "skipping untrackable request"
            );
        }
    }
}

/// A client session: throwaway identity, initial requests, reply-driven
/// follow-ups, and optional event listening.
pub struct Client {
    inner: Arc<ClientInner>,
    event_intake: Arc<EventIntake>,
    workers: Mutex<Vec<WorkerHandle>>,
    running: AtomicBool,
    startups: AtomicUsize,
}

impl Client {
    /// Builds a client wired to the default MQTT/AMQP broker adapters.
    pub fn new(
        config: ClientConfig,
        initial_requests: Vec<DirectRequest>,
        on_reply: MessageCallback,
        on_event: Option<EventCallback>,
        stores: Vec<Arc<dyn DataStore>>,
    ) -> Result<Self, ClientError> {
        Self::with_broker_factory(
            config,
            initial_requests,
            on_reply,
            on_event,
            stores,
            &crate::control_plane::manager::DefaultBrokerFactory,
        )
    }

    /// Builds a client with injected broker adapters.
    pub fn with_broker_factory(
        config: ClientConfig,
        initial_requests: Vec<DirectRequest>,
        on_reply: MessageCallback,
        on_event: Option<EventCallback>,
        stores: Vec<Arc<dyn DataStore>>,
        factory: &dyn BrokerClientFactory,
    ) -> Result<Self, ClientError> {
        let config = config.validated().map_err(ClientError::Config)?;
        let control_plane = Arc::new(
            ControlPlaneManager::new(&config.brokers, factory).map_err(ClientError::Config)?,
        );
        let data_plane = Arc::new(DataPlaneManager::new(stores));
        let courier = MessageCourier::new(
            Hierarchy::throwaway(),
            control_plane,
            data_plane,
            DEFAULT_REQUEST_TIMEOUT,
        );

        let inner = Arc::new(ClientInner {
            courier,
            on_reply,
            on_event,
            initial_requests,
            terminate_after_initial: config.terminate_after_initial_messages,
            resend_on_secondary_startup: config.resend_initial_messages_on_secondary_startup,
            terminate: AtomicBool::new(false),
            last_traffic: Mutex::new(Instant::now()),
        });
        let event_intake = Arc::new(EventIntake {
            inner: Arc::downgrade(&inner),
        });
        Ok(Self {
            inner,
            event_intake,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            startups: AtomicUsize::new(0),
        })
    }

    /// Connects and sends the initial requests. In the fire-and-forget mode
    /// this blocks until everything left the broker, then terminates; in the
    /// normal mode it spawns the pump and heartbeat workers and returns.
    pub async fn startup(&self) -> Result<(), ClientError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.terminate.store(false, Ordering::SeqCst);

        let prior_startups = self.startups.fetch_add(1, Ordering::SeqCst);
        let send_initial = prior_startups == 0 || self.inner.resend_on_secondary_startup;

        if self.inner.terminate_after_initial {
            return self.send_and_terminate(send_initial).await;
        }

        if send_initial {
            install_requests(&self.inner, self.inner.initial_requests.clone(), true);
        }
        self.inner
            .courier
            .control_plane()
            .connect()
            .await
            .map_err(ClientError::ControlPlane)?;
        self.inner.note_traffic();
        info!(
            event = events::RUNTIME_STARTUP,
            component = COMPONENT,
            identity = %self.inner.courier.identity(),
            initial_requests = self.inner.initial_requests.len(),
            "client started"
        );

        let pump_inner = self.inner.clone();
        let pump = spawn_worker("consort-pump", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(PUMP_INTERVAL) => {
                        pump_inner.courier.pump_pass(true).await;
                    }
                }
            }
        });

        let heartbeat_inner = self.inner.clone();
        let heartbeat = spawn_worker("consort-heartbeat", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        if heartbeat_inner.heartbeat_expired() {
                            warn!(
                                event = events::CLIENT_HEARTBEAT_EXPIRED,
                                component = COMPONENT,
                                timeout_seconds = HEARTBEAT_TIMEOUT.as_secs(),
                                "no broker traffic within the heartbeat window"
                            );
                            heartbeat_inner.request_terminate("heartbeat expired");
                            break;
                        }
                    }
                }
            }
        });

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.push(pump);
        workers.push(heartbeat);
        Ok(())
    }

    /// Fire-and-forget startup: requests go out without handlers and without
    /// a response subscription, then the session ends.
    async fn send_and_terminate(&self, send_initial: bool) -> Result<(), ClientError> {
        if send_initial {
            install_requests(&self.inner, self.inner.initial_requests.clone(), false);
        }
        self.inner
            .courier
            .control_plane()
            .connect()
            .await
            .map_err(ClientError::ControlPlane)?;

        while self.inner.courier.unsent_requests() > 0 {
            if self.inner.courier.control_plane().considered_unrecoverable() {
                break;
            }
            self.inner.courier.pump_pass(false).await;
            tokio::time::sleep(PUMP_INTERVAL).await;
        }

        self.inner.courier.control_plane().disconnect().await;
        self.inner.request_terminate("initial requests sent");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Blocks until the callback, the heartbeat, or an unrecoverable broker
    /// asks for termination, then winds the session down.
    pub async fn run_until_terminated(&self) {
        loop {
            if self.inner.terminate.load(Ordering::SeqCst) {
                break;
            }
            if self.inner.courier.control_plane().considered_unrecoverable() {
                self.inner.request_terminate("broker gave up permanently");
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        self.internal_shutdown().await;
    }

    /// Asks the session to stop. [`Client::run_until_terminated`] picks the
    /// flag up on its next pass.
    pub fn terminate(&self) {
        self.inner.request_terminate("requested by caller");
    }

    /// Tracks additional requests outside the callback-driven flow.
    pub fn send_requests(&self, requests: Vec<DirectRequest>) {
        install_requests(&self.inner, requests, true);
    }

    /// Also receives events published while the client was subscribed but not
    /// yet connected, since subscriptions survive connection cycles.
    pub async fn start_listening(&self, source: &Hierarchy) -> Result<(), ClientError> {
        if self.inner.on_event.is_none() {
            return Err(ClientError::NoEventCallback);
        }
        self.inner
            .courier
            .control_plane()
            .add_subscription_channel(
                &source.topic(Channel::Events),
                vec![self.event_intake.clone() as Arc<dyn ChannelCallback>],
                Channel::Events.persist(),
            )
            .await
            .map_err(ClientError::ControlPlane)
    }

    /// Returns whether the client was listening to that source.
    pub async fn stop_listening(&self, source: &Hierarchy) -> bool {
        self.inner
            .courier
            .control_plane()
            .remove_subscription_channel(&source.topic(Channel::Events))
            .await
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        self.inner.courier.hierarchy()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.courier.pending_requests()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.courier.control_plane().is_connected()
    }

    async fn internal_shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let workers: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.drain(..).collect()
        };
        for worker in workers {
            worker.stop().await;
        }
        self.inner.courier.control_plane().disconnect().await;
        info!(
            event = events::CLIENT_TERMINATE,
            component = COMPONENT,
            identity = %self.inner.courier.identity(),
            "client stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{
        install_requests, reply_handler, Client, ClientDirective, ClientError, EventNotice,
        MessageCallback,
    };
    use crate::addressing::Hierarchy;
    use crate::config::{BrokerConfig, BrokerProtocol, ClientConfig, ConfigError};
    use crate::control_plane::broker_client::{
        BrokerClient, BrokerClientError, BrokerClientFactory,
    };
    use crate::control_plane::topic_handler::TopicRegistry;
    use crate::external_request::DirectRequest;
    use crate::protocol::userspace::create_userspace_message;
    use crate::protocol::{ContentType, DataHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    struct StubBroker;

    #[async_trait]
    impl BrokerClient for StubBroker {
        async fn connect(&self) -> Result<(), BrokerClientError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn publish(
            &self,
            _topic: &str,
            _payload: &[u8],
            _persist: bool,
        ) -> Result<(), BrokerClientError> {
            Ok(())
        }

        async fn subscribe(&self, _topic: &str, _persist: bool) -> Result<(), BrokerClientError> {
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &str) {}

        fn is_connected(&self) -> bool {
            true
        }

        fn considered_unrecoverable(&self) -> bool {
            false
        }
    }

    struct StubFactory;

    impl BrokerClientFactory for StubFactory {
        fn build(
            &self,
            _config: &BrokerConfig,
            _registry: Arc<dyn TopicRegistry>,
        ) -> Result<Arc<dyn BrokerClient>, ConfigError> {
            Ok(Arc::new(StubBroker))
        }
    }

    fn config() -> ClientConfig {
        ClientConfig {
            brokers: vec![BrokerConfig {
                protocol: BrokerProtocol::Mqtt,
                host: "127.0.0.1".to_string(),
                port: None,
                username: "guest".to_string(),
                password: "guest".to_string(),
            }],
            data_stores: Default::default(),
            terminate_after_initial_messages: false,
            resend_initial_messages_on_secondary_startup: false,
        }
    }

    fn service_address() -> Hierarchy {
        Hierarchy::new("acme", "plant-one", "conveyor", None, "counter")
            .expect("address should validate")
    }

    fn request() -> DirectRequest {
        DirectRequest {
            destination: service_address(),
            operation: "Counter.increment".to_string(),
            payload: json!({"by": 1}),
            content_type: ContentType::Json,
            data_handler: DataHandler::Message,
        }
    }

    fn client_with(on_reply: MessageCallback) -> Client {
        Client::with_broker_factory(config(), Vec::new(), on_reply, None, Vec::new(), &StubFactory)
            .expect("client should build")
    }

    fn continue_callback() -> MessageCallback {
        Arc::new(|_outcome| ClientDirective::Continue)
    }

    async fn deliver_reply(client: &Client, request_id: uuid::Uuid) {
        let reply = create_userspace_message(
            &service_address().dotted(),
            &client.hierarchy().dotted(),
            "Counter.increment",
            uuid::Uuid::new_v4(),
            request_id,
            ContentType::Json,
            DataHandler::Message,
            r#"{"total":2}"#.to_string(),
        );
        client
            .inner
            .courier
            .handle_reply_bytes(&serde_json::to_vec(&reply).expect("serialize"))
            .await;
    }

    /// Tracks one request and pushes it out through the stub broker, so an
    /// injected reply finds it in the sent state.
    async fn sent_request(client: &Client) -> uuid::Uuid {
        let request_id = client
            .inner
            .courier
            .create_external_request(request(), Some(reply_handler(&client.inner)))
            .expect("request should be tracked");
        client
            .inner
            .courier
            .control_plane()
            .connect()
            .await
            .expect("stub control plane should connect");
        client.inner.courier.pump_pass(true).await;
        request_id
    }

    #[test]
    fn throwaway_identities_validate_and_differ() {
        let first = client_with(continue_callback());
        let second = client_with(continue_callback());

        assert!(first.hierarchy().validate().is_ok());
        assert_ne!(first.hierarchy().dotted(), second.hierarchy().dotted());
        assert!(first.hierarchy().dotted().starts_with("tmp-"));
    }

    #[tokio::test]
    async fn send_directive_installs_follow_up_requests() {
        let replies = Arc::new(AtomicUsize::new(0));
        let counted = replies.clone();
        let client = client_with(Arc::new(move |_outcome| {
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                ClientDirective::Send(vec![request()])
            } else {
                ClientDirective::Continue
            }
        }));

        let request_id = sent_request(&client).await;
        assert_eq!(client.pending_requests(), 1);

        deliver_reply(&client, request_id).await;

        assert_eq!(replies.load(Ordering::SeqCst), 1);
        // The answered request is gone, the follow-up is tracked.
        assert_eq!(client.pending_requests(), 1);
        assert!(!client.inner.terminate.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn terminate_directive_sets_the_flag() {
        let client = client_with(Arc::new(|_outcome| ClientDirective::Terminate));

        let request_id = sent_request(&client).await;
        deliver_reply(&client, request_id).await;

        assert!(client.inner.terminate.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_callback_terminates_the_session() {
        let client = client_with(Arc::new(|_outcome| -> ClientDirective {
            panic!("callback exploded");
        }));

        let request_id = sent_request(&client).await;
        deliver_reply(&client, request_id).await;

        assert!(client.inner.terminate.load(Ordering::SeqCst));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn handler_batches_skip_untrackable_requests() {
        let client = client_with(continue_callback());
        let mut bad = request();
        bad.operation = String::new();

        install_requests(&client.inner, vec![bad, request()], true);

        assert_eq!(client.pending_requests(), 1);
    }

    #[test]
    fn heartbeat_expiry_tracks_traffic() {
        let client = client_with(continue_callback());

        assert!(!client.inner.heartbeat_expired());
        *client.inner.last_traffic.lock().unwrap() =
            Instant::now() - Duration::from_secs(301);
        assert!(client.inner.heartbeat_expired());

        client.inner.note_traffic();
        assert!(!client.inner.heartbeat_expired());
    }

    #[tokio::test]
    async fn replies_for_other_callers_still_count_as_traffic() {
        let client = client_with(continue_callback());

        *client.inner.last_traffic.lock().unwrap() =
            Instant::now() - Duration::from_secs(301);
        assert!(client.inner.heartbeat_expired());

        // Addressed to a different caller on the shared response channel, so
        // it is dropped before correlation. The link is alive regardless.
        let stray = create_userspace_message(
            &service_address().dotted(),
            "acme.plant-one.conveyor.-.other-panel",
            "Counter.increment",
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            ContentType::Json,
            DataHandler::Message,
            "{}".to_string(),
        );
        client
            .inner
            .courier
            .handle_reply_bytes(&serde_json::to_vec(&stray).expect("serialize"))
            .await;

        assert!(!client.inner.heartbeat_expired());
    }

    #[tokio::test]
    async fn listening_requires_an_event_callback() {
        let client = client_with(continue_callback());

        let result = client.start_listening(&service_address()).await;
        assert!(matches!(result, Err(ClientError::NoEventCallback)));
    }

    #[tokio::test]
    async fn events_reach_the_event_callback() {
        let seen: Arc<Mutex<Vec<EventNotice>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let client = Client::with_broker_factory(
            config(),
            Vec::new(),
            continue_callback(),
            Some(Arc::new(move |notice: &EventNotice| {
                sink.lock().unwrap().push(notice.clone());
            })),
            Vec::new(),
            &StubFactory,
        )
        .expect("client should build");

        let message = crate::protocol::event::create_event_message(
            &service_address().dotted(),
            "Counter",
            "threshold-crossed",
            &json!({"at": 100}),
        );
        client
            .inner
            .handle_event_bytes(&serde_json::to_vec(&message).expect("serialize"))
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].source, service_address());
        assert_eq!(seen[0].capability, "Counter");
        assert_eq!(seen[0].event, "threshold-crossed");
        assert_eq!(seen[0].payload, json!({"at": 100}));
    }

    #[tokio::test]
    async fn incompatible_events_never_reach_the_callback() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let client = Client::with_broker_factory(
            config(),
            Vec::new(),
            continue_callback(),
            Some(Arc::new(move |_notice: &EventNotice| {
                sink.fetch_add(1, Ordering::SeqCst);
            })),
            Vec::new(),
            &StubFactory,
        )
        .expect("client should build");

        let message = crate::protocol::event::create_event_message(
            &service_address().dotted(),
            "Counter",
            "threshold-crossed",
            &json!(null),
        );
        let mut value = serde_json::to_value(&message).expect("serialize");
        value["headers"]["sdk_version"] = json!("99.0.0");
        client
            .inner
            .handle_event_bytes(&serde_json::to_vec(&value).expect("serialize"))
            .await;

        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reply_handler_outlives_a_dropped_client() {
        let client = client_with(continue_callback());
        let handler = reply_handler(&client.inner);
        let outcome = crate::external_request::RequestOutcome {
            request_id: uuid::Uuid::new_v4(),
            operation: "Counter.increment".to_string(),
            source: service_address(),
            has_error: false,
            payload: "{}".to_string(),
        };

        drop(client);
        // The weak reference is gone; invoking must be a quiet no-op.
        handler(&outcome);
    }
}

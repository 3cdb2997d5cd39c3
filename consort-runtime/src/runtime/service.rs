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

//! The service runtime: owns the inbound dispatch pipeline, the status
//! ticker, the event outbox, and the workers that drive them.

use crate::addressing::{Channel, Hierarchy};
use crate::config::{ConfigError, ServiceConfig};
use crate::control_plane::broker_client::BrokerClientFactory;
use crate::control_plane::manager::{ControlPlaneError, ControlPlaneManager};
use crate::control_plane::topic_handler::ChannelCallback;
use crate::data_plane::{DataPlaneManager, DataStore};
use crate::external_request::{DirectRequest, ResponseHandler, DEFAULT_REQUEST_TIMEOUT};
use crate::observability::events;
use crate::protocol::event::create_event_message;
use crate::protocol::lifecycle::{create_lifecycle_message, LifecycleType};
use crate::protocol::userspace::{create_userspace_message, UserspaceHeader, UserspaceMessage};
use crate::protocol::version::{self, SDK_VERSION};
use crate::protocol::{reply_text, ContentType, DataHandler};
use crate::runtime::capability::{Capability, OperationInvokeError, OperationRecord, StatusRecord};
use crate::runtime::courier::{MessageCourier, RequestError, PUMP_INTERVAL};
use crate::runtime::worker::{spawn_worker, WorkerHandle};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "service";

/// The first status tick never fires before a minute has passed, so a freshly
/// started service is not drowned in polling broadcasts while peers catch up.
const MIN_INITIAL_STATUS_WAIT: Duration = Duration::from_secs(60);

/// Failures raised while assembling or operating a [`Service`].
#[derive(Debug)]
pub enum ServiceError {
    Config(ConfigError),
    InvalidCapabilityName { capability: String },
    DuplicateCapability { capability: String },
    SecondStatusProvider { capability: String },
    ControlPlane(ControlPlaneError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Config(err) => write!(f, "invalid service configuration: {err}"),
            ServiceError::InvalidCapabilityName { capability } => {
                write!(f, "capability name '{capability}' is not usable")
            }
            ServiceError::DuplicateCapability { capability } => {
                write!(f, "capability '{capability}' is registered twice")
            }
            ServiceError::SecondStatusProvider { capability } => {
                write!(
                    f,
                    "capability '{capability}' brings a second status provider, \
                     a service supports exactly one"
                )
            }
            ServiceError::ControlPlane(err) => write!(f, "control plane failure: {err}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Config(err) => Some(err),
            ServiceError::ControlPlane(err) => Some(err),
            _ => None,
        }
    }
}

/// Failures raised by [`EventEmitter::emit`].
#[derive(Debug, PartialEq, Eq)]
pub enum EventError {
    UnknownCapability { capability: String },
    UnknownEvent { capability: String, event: String },
    Closed,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventError::UnknownCapability { capability } => {
                write!(f, "no capability '{capability}' is registered")
            }
            EventError::UnknownEvent { capability, event } => {
                write!(f, "capability '{capability}' never declared event '{event}'")
            }
            EventError::Closed => write!(f, "the owning service is gone"),
        }
    }
}

impl std::error::Error for EventError {}

struct EmittedEvent {
    capability: String,
    event: String,
    payload: Value,
}

/// Cloneable handle for emitting declared events from any thread.
///
/// Emission only queues; the request pump publishes queued events on the
/// service's `events` channel in order.
#[derive(Clone)]
pub struct EventEmitter {
    declared: Arc<HashMap<String, BTreeSet<String>>>,
    outbox: mpsc::UnboundedSender<EmittedEvent>,
}

impl EventEmitter {
    pub fn emit(&self, capability: &str, event: &str, payload: Value) -> Result<(), EventError> {
        let Some(declared) = self.declared.get(capability) else {
            return Err(EventError::UnknownCapability {
                capability: capability.to_string(),
            });
        };
        if !declared.contains(event) {
            return Err(EventError::UnknownEvent {
                capability: capability.to_string(),
                event: event.to_string(),
            });
        }
        self.outbox
            .send(EmittedEvent {
                capability: capability.to_string(),
                event: event.to_string(),
                payload,
            })
            .map_err(|_| {
                warn!(
                    event = events::EVENT_DROPPED,
                    component = COMPONENT,
                    capability,
                    name = event,
                    "event emitted after the service shut its outbox"
                );
                EventError::Closed
            })
    }
}

/// Callback feeding the service's `request` channel into the dispatch
/// pipeline.
struct ServiceIntake {
    inner: Weak<ServiceInner>,
}

#[async_trait]
impl ChannelCallback for ServiceIntake {
    async fn on_message(&self, payload: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_request_bytes(payload).await;
        }
    }
}

struct ServiceInner {
    courier: Arc<MessageCourier>,
    operations: BTreeMap<String, OperationRecord>,
    status: Option<StatusRecord>,
    status_memo: Mutex<Option<Value>>,
    status_interval: Duration,
    descriptor: Value,
    declared_events: Arc<HashMap<String, BTreeSet<String>>>,
    blocked: Mutex<BTreeSet<String>>,
    all_block_keys: BTreeSet<String>,
    outbox_tx: mpsc::UnboundedSender<EmittedEvent>,
    outbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EmittedEvent>>,
}

impl ServiceInner {
    async fn handle_request_bytes(&self, payload: &[u8]) {
        let message = match UserspaceMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    event = events::INBOUND_PARSE_FAILED,
                    component = COMPONENT,
                    err = %e,
                    "dropping unparseable request"
                );
                return;
            }
        };

        // Requests addressed to somebody else are not answered at all; an
        // error reply would leak this service's existence to a misdialed
        // caller.
        if message.headers.destination != self.courier.identity() {
            debug!(
                event = events::INBOUND_WRONG_DESTINATION,
                component = COMPONENT,
                msg_id = %message.message_id,
                dst = %message.headers.destination,
                "request addressed to another service"
            );
            return;
        }

        let reply = match self.process_request(&message).await {
            Ok(reply) => reply,
            Err(text) => self.error_reply(&message, &text),
        };
        self.publish_reply(&reply).await;
        debug!(
            event = events::OPERATION_REPLIED,
            component = COMPONENT,
            operation = %reply.operation_id,
            msg_id = %reply.message_id,
            has_error = reply.headers.has_error,
            "reply published"
        );
        self.refresh_status(false).await;
    }

    /// Runs the dispatch pipeline. `Err` carries the reply text for the
    /// caller; everything sensitive stays in the local log.
    async fn process_request(&self, message: &UserspaceMessage) -> Result<UserspaceMessage, String> {
        if let Err(e) = version::check_compatibility(&message.headers.sdk_version) {
            warn!(
                event = events::INBOUND_VERSION_REJECTED,
                component = COMPONENT,
                msg_id = %message.message_id,
                err = %e,
                "request from incompatible peer"
            );
            return Err(e.to_string());
        }

        let Some(record) = self.operations.get(&message.operation_id) else {
            warn!(
                event = events::OPERATION_UNKNOWN,
                component = COMPONENT,
                operation = %message.operation_id,
                src = %message.headers.source,
                "request for unregistered operation"
            );
            return Err(reply_text::unknown_operation(&message.operation_id));
        };

        if self.is_blocked(record) {
            warn!(
                event = events::OPERATION_BLOCKED,
                component = COMPONENT,
                operation = %message.operation_id,
                src = %message.headers.source,
                "operation is taken out of service"
            );
            return Err(reply_text::operation_blocked(&message.operation_id));
        }

        let request_payload = match self
            .courier
            .data_plane()
            .resolve_incoming(message.headers.data_handler, &message.payload)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(
                    event = events::DATA_PLANE_RESOLVE_FAILED,
                    component = COMPONENT,
                    operation = %message.operation_id,
                    err = %e,
                    "request payload could not be resolved"
                );
                return Err(reply_text::DATA_FETCH_FAILED.to_string());
            }
        };

        let encoded = match catch_unwind(AssertUnwindSafe(|| (record.handler)(&request_payload))) {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(OperationInvokeError::BadArguments { detail })) => {
                warn!(
                    event = events::OPERATION_VALIDATION_FAILED,
                    component = COMPONENT,
                    operation = %message.operation_id,
                    err = %detail,
                    "request payload failed validation"
                );
                return Err(reply_text::bad_arguments(&detail));
            }
            Ok(Err(OperationInvokeError::Domain { detail })) => {
                error!(
                    event = events::OPERATION_DOMAIN_FAILED,
                    component = COMPONENT,
                    operation = %message.operation_id,
                    err = %detail,
                    "domain logic failed"
                );
                return Err(reply_text::DOMAIN_FAILED.to_string());
            }
            Ok(Err(OperationInvokeError::EncodeFailed { detail })) => {
                error!(
                    event = events::OPERATION_DOMAIN_FAILED,
                    component = COMPONENT,
                    operation = %message.operation_id,
                    err = %detail,
                    "response value did not serialize"
                );
                return Err(reply_text::DOMAIN_FAILED.to_string());
            }
            Err(_) => {
                error!(
                    event = events::OPERATION_DOMAIN_FAILED,
                    component = COMPONENT,
                    operation = %message.operation_id,
                    "domain logic panicked"
                );
                return Err(reply_text::DOMAIN_FAILED.to_string());
            }
        };

        let staged = match self
            .courier
            .data_plane()
            .stage_outgoing(record.config.response_data_handler, encoded)
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                error!(
                    event = events::DATA_PLANE_UPLOAD_FAILED,
                    component = COMPONENT,
                    operation = %message.operation_id,
                    err = %e,
                    "reply payload could not be staged"
                );
                return Err(reply_text::DATA_SEND_FAILED.to_string());
            }
        };

        Ok(create_userspace_message(
            self.courier.identity(),
            &message.headers.source,
            &message.operation_id,
            message.headers.campaign_id,
            message.headers.request_id,
            record.config.response_content_type,
            record.config.response_data_handler,
            staged,
        ))
    }

    /// Error replies keep the incoming message id so callers can line the
    /// failure up with what they sent.
    fn error_reply(&self, incoming: &UserspaceMessage, text: &str) -> UserspaceMessage {
        UserspaceMessage {
            message_id: incoming.message_id,
            operation_id: incoming.operation_id.clone(),
            content_type: ContentType::Text,
            payload: text.to_string(),
            headers: UserspaceHeader {
                source: self.courier.identity().to_string(),
                destination: incoming.headers.source.clone(),
                created_at: Utc::now(),
                sdk_version: SDK_VERSION.to_string(),
                campaign_id: incoming.headers.campaign_id,
                request_id: incoming.headers.request_id,
                data_handler: DataHandler::Message,
                has_error: true,
            },
        }
    }

    async fn publish_reply(&self, reply: &UserspaceMessage) {
        let topic = self.courier.hierarchy().topic(Channel::Response);
        // Failures are logged by the control plane.
        let _ = self
            .courier
            .control_plane()
            .publish_message(&topic, reply, Channel::Response.persist())
            .await;
    }

    fn is_blocked(&self, record: &OperationRecord) -> bool {
        let blocked = self.blocked.lock().unwrap_or_else(PoisonError::into_inner);
        record
            .config
            .block_keys
            .iter()
            .any(|key| blocked.contains(key))
    }

    fn status_snapshot(&self) -> Option<Value> {
        self.status.as_ref().map(|status| (status.provider)())
    }

    fn lifecycle_payload(&self, status: Option<&Value>) -> Value {
        json!({
            "descriptor": self.descriptor,
            "schema": self.status.as_ref().map(|status| status.schema),
            "status": status,
        })
    }

    /// Compares the current status against the memo. A change always
    /// broadcasts a status update; an unchanged status broadcasts a polling
    /// message only when the ticker asks for one.
    async fn refresh_status(&self, publish_polling: bool) {
        let snapshot = self.status_snapshot();
        let changed = {
            let mut memo = self
                .status_memo
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *memo != snapshot {
                *memo = snapshot.clone();
                true
            } else {
                false
            }
        };

        if changed {
            info!(
                event = events::STATUS_CHANGED,
                component = COMPONENT,
                "service status changed"
            );
            self.publish_lifecycle(
                LifecycleType::StatusUpdate,
                &self.lifecycle_payload(snapshot.as_ref()),
            )
            .await;
        } else if publish_polling {
            self.publish_lifecycle(
                LifecycleType::Polling,
                &self.lifecycle_payload(snapshot.as_ref()),
            )
            .await;
        }
    }

    async fn publish_lifecycle(&self, lifecycle_type: LifecycleType, payload: &Value) {
        let topic = self.courier.hierarchy().topic(Channel::Lifecycle);
        let message =
            create_lifecycle_message(self.courier.identity(), &topic, lifecycle_type, payload);
        debug!(
            event = events::LIFECYCLE_BROADCAST,
            component = COMPONENT,
            lifecycle = message.headers.lifecycle_type.code(),
            "broadcasting lifecycle message"
        );
        // Failures are logged by the control plane.
        let _ = self
            .courier
            .control_plane()
            .publish_message(&topic, &message, Channel::Lifecycle.persist())
            .await;
    }

    /// Publishes queued events in emission order. Events wait in the outbox
    /// while the control plane is down instead of being lost.
    async fn drain_events(&self) {
        if !self.courier.control_plane().is_connected() {
            return;
        }
        let topic = self.courier.hierarchy().topic(Channel::Events);
        let mut outbox = self.outbox_rx.lock().await;
        while let Ok(emitted) = outbox.try_recv() {
            let message = create_event_message(
                self.courier.identity(),
                &emitted.capability,
                &emitted.event,
                &emitted.payload,
            );
            match self
                .courier
                .control_plane()
                .publish_message(&topic, &message, Channel::Events.persist())
                .await
            {
                Ok(()) => debug!(
                    event = events::EVENT_EMITTED,
                    component = COMPONENT,
                    capability = %emitted.capability,
                    name = %emitted.event,
                    "event published"
                ),
                Err(e) => warn!(
                    event = events::EVENT_DROPPED,
                    component = COMPONENT,
                    capability = %emitted.capability,
                    name = %emitted.event,
                    err = %e,
                    "event lost on publish"
                ),
            }
        }
    }

    async fn update_blocked(&self, keys: &[&str], forbid: bool) {
        let blocked_now: Vec<String> = {
            let mut blocked = self.blocked.lock().unwrap_or_else(PoisonError::into_inner);
            for key in keys {
                if forbid {
                    blocked.insert((*key).to_string());
                } else {
                    blocked.remove(*key);
                }
            }
            blocked.iter().cloned().collect()
        };

        let lifecycle_type = if forbid {
            LifecycleType::FunctionsBlocked
        } else {
            LifecycleType::FunctionsAllowed
        };
        self.publish_lifecycle(lifecycle_type, &json!({ "keys": keys, "blocked": blocked_now }))
            .await;
    }
}

/// An addressable service: registered capabilities behind one hierarchy
/// address, answering on its `request` channel and broadcasting on
/// `lifecycle` and `events`.
pub struct Service {
    inner: Arc<ServiceInner>,
    intake: Arc<ServiceIntake>,
    workers: Mutex<Vec<WorkerHandle>>,
    running: AtomicBool,
}

impl Service {
    /// Builds a service wired to the default MQTT/AMQP broker adapters.
    pub fn new(
        config: ServiceConfig,
        capabilities: Vec<Capability>,
        stores: Vec<Arc<dyn DataStore>>,
    ) -> Result<Self, ServiceError> {
        Self::with_broker_factory(
            config,
            capabilities,
            stores,
            &crate::control_plane::manager::DefaultBrokerFactory,
        )
    }

    /// Builds a service with injected broker adapters. This is the seam
    /// in-memory brokers plug into.
    pub fn with_broker_factory(
        config: ServiceConfig,
        capabilities: Vec<Capability>,
        stores: Vec<Arc<dyn DataStore>>,
        factory: &dyn BrokerClientFactory,
    ) -> Result<Self, ServiceError> {
        let config = config.validated().map_err(ServiceError::Config)?;
        let control_plane = Arc::new(
            ControlPlaneManager::new(&config.brokers, factory).map_err(ServiceError::Config)?,
        );
        let data_plane = Arc::new(DataPlaneManager::new(stores));

        let mut operations = BTreeMap::new();
        let mut status: Option<StatusRecord> = None;
        let mut declared_events = HashMap::new();
        let mut fragments = Vec::new();
        for capability in capabilities {
            let fragment = capability.describe();
            let Capability {
                name,
                operations: capability_operations,
                status: capability_status,
                events: capability_events,
            } = capability;

            if name.is_empty() || name.contains(['.', '/', ' ']) {
                return Err(ServiceError::InvalidCapabilityName { capability: name });
            }
            if declared_events.contains_key(&name) {
                return Err(ServiceError::DuplicateCapability { capability: name });
            }
            if let Some(record) = capability_status {
                if status.is_some() {
                    return Err(ServiceError::SecondStatusProvider { capability: name });
                }
                status = Some(record);
            }
            declared_events.insert(name.clone(), capability_events.into_iter().collect());
            for (bare_name, record) in capability_operations {
                operations.insert(format!("{name}.{bare_name}"), record);
            }
            fragments.push(fragment);
        }

        let descriptor = json!({
            "hierarchy": config.hierarchy.dotted(),
            "sdk_version": SDK_VERSION,
            "capabilities": fragments,
        });
        let all_block_keys = operations
            .values()
            .flat_map(|record| record.config.block_keys.iter().cloned())
            .collect();

        let courier = MessageCourier::new(
            config.hierarchy.clone(),
            control_plane,
            data_plane,
            DEFAULT_REQUEST_TIMEOUT,
        );
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ServiceInner {
            courier,
            operations,
            status,
            status_memo: Mutex::new(None),
            status_interval: Duration::from_secs(config.status_interval_seconds),
            descriptor,
            declared_events: Arc::new(declared_events),
            blocked: Mutex::new(BTreeSet::new()),
            all_block_keys,
            outbox_tx,
            outbox_rx: tokio::sync::Mutex::new(outbox_rx),
        });
        let intake = Arc::new(ServiceIntake {
            inner: Arc::downgrade(&inner),
        });
        Ok(Self {
            inner,
            intake,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Connects the control plane, announces startup, and spawns the pump and
    /// status workers. Calling it on a running service is a no-op.
    pub async fn startup(&self) -> Result<(), ServiceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let request_topic = self.inner.courier.hierarchy().topic(Channel::Request);
        self.inner
            .courier
            .control_plane()
            .add_subscription_channel(
                &request_topic,
                vec![self.intake.clone() as Arc<dyn ChannelCallback>],
                Channel::Request.persist(),
            )
            .await
            .map_err(ServiceError::ControlPlane)?;
        self.inner
            .courier
            .control_plane()
            .connect()
            .await
            .map_err(ServiceError::ControlPlane)?;

        let snapshot = self.inner.status_snapshot();
        *self
            .inner
            .status_memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        self.inner
            .publish_lifecycle(
                LifecycleType::Startup,
                &self.inner.lifecycle_payload(snapshot.as_ref()),
            )
            .await;
        info!(
            event = events::RUNTIME_STARTUP,
            component = COMPONENT,
            identity = %self.inner.courier.identity(),
            operations = self.inner.operations.len(),
            "service started"
        );

        let pump_inner = self.inner.clone();
        let pump = spawn_worker("consort-pump", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(PUMP_INTERVAL) => {
                        pump_inner.courier.pump_pass(true).await;
                        pump_inner.drain_events().await;
                    }
                }
            }
        });

        let ticker_inner = self.inner.clone();
        let interval = self.inner.status_interval;
        let initial_wait = interval.max(MIN_INITIAL_STATUS_WAIT);
        let ticker = spawn_worker("consort-status", move |mut shutdown| async move {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(initial_wait) => {}
            }
            loop {
                ticker_inner.refresh_status(true).await;
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.push(pump);
        workers.push(ticker);
        Ok(())
    }

    /// Stops the workers, announces shutdown with the given reason, and
    /// disconnects. Safe to call repeatedly.
    pub async fn shutdown(&self, reason: &str) {
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

        self.inner
            .publish_lifecycle(LifecycleType::Shutdown, &Value::String(reason.to_string()))
            .await;
        self.inner.courier.control_plane().disconnect().await;
        info!(
            event = events::RUNTIME_SHUTDOWN,
            component = COMPONENT,
            identity = %self.inner.courier.identity(),
            reason,
            "service stopped"
        );
    }

    /// Blocks until a broker gives up permanently or [`Service::shutdown`]
    /// runs. The caller decides what happens next.
    pub async fn run_until_unrecoverable(&self) {
        while self.running.load(Ordering::SeqCst) {
            if self.inner.courier.control_plane().considered_unrecoverable() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Tracks an outbound request to another service. The pump sends it on
    /// its next pass.
    pub fn create_external_request(
        &self,
        request: DirectRequest,
        handler: Option<ResponseHandler>,
    ) -> Result<Uuid, RequestError> {
        self.inner.courier.create_external_request(request, handler)
    }

    pub fn event_emitter(&self) -> EventEmitter {
        EventEmitter {
            declared: self.inner.declared_events.clone(),
            outbox: self.inner.outbox_tx.clone(),
        }
    }

    /// Takes the given block keys out of service and broadcasts the change.
    pub async fn forbid_keys(&self, keys: &[&str]) {
        self.inner.update_blocked(keys, true).await;
    }

    /// Returns the given block keys to service and broadcasts the change.
    pub async fn allow_keys(&self, keys: &[&str]) {
        self.inner.update_blocked(keys, false).await;
    }

    /// Blocks every key any operation registered.
    pub async fn block_all_functions(&self) {
        let keys: Vec<&str> = self
            .inner
            .all_block_keys
            .iter()
            .map(String::as_str)
            .collect();
        self.inner.update_blocked(&keys, true).await;
    }

    pub async fn allow_all_functions(&self) {
        let keys: Vec<&str> = self
            .inner
            .all_block_keys
            .iter()
            .map(String::as_str)
            .collect();
        self.inner.update_blocked(&keys, false).await;
    }

    /// Currently forbidden block keys, sorted.
    pub fn blocked_keys(&self) -> Vec<String> {
        self.inner
            .blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        self.inner.courier.hierarchy()
    }

    /// The JSON advertisement of capabilities, operations, and events.
    pub fn descriptor(&self) -> Value {
        self.inner.descriptor.clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.courier.pending_requests()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.courier.control_plane().is_connected()
    }

    pub fn considered_unrecoverable(&self) -> bool {
        self.inner.courier.control_plane().considered_unrecoverable()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventError, Service, ServiceError};
    use crate::addressing::Hierarchy;
    use crate::config::{BrokerConfig, BrokerProtocol, ConfigError, ServiceConfig};
    use crate::control_plane::broker_client::{
        BrokerClient, BrokerClientError, BrokerClientFactory,
    };
    use crate::control_plane::topic_handler::TopicRegistry;
    use crate::protocol::lifecycle::{LifecycleMessage, LifecycleType};
    use crate::protocol::userspace::{create_userspace_message, UserspaceMessage};
    use crate::protocol::{reply_text, ContentType, DataHandler};
    use crate::runtime::capability::{CapabilityBuilder, OperationConfig};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct RecordingBroker {
        connected: AtomicBool,
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingBroker {
        fn new() -> Self {
            Self {
                connected: AtomicBool::new(false),
                published: Mutex::new(Vec::new()),
            }
        }

        fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(published_topic, _)| published_topic == topic)
                .map(|(_, bytes)| bytes.clone())
                .collect()
        }
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        async fn connect(&self) -> Result<(), BrokerClientError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn publish(
            &self,
            topic: &str,
            payload: &[u8],
            _persist: bool,
        ) -> Result<(), BrokerClientError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        async fn subscribe(&self, _topic: &str, _persist: bool) -> Result<(), BrokerClientError> {
            Ok(())
        }

        async fn unsubscribe(&self, _topic: &str) {}

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn considered_unrecoverable(&self) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct RecordingFactory {
        built: Mutex<Vec<Arc<RecordingBroker>>>,
    }

    impl RecordingFactory {
        fn broker(&self) -> Arc<RecordingBroker> {
            self.built.lock().unwrap()[0].clone()
        }
    }

    impl BrokerClientFactory for RecordingFactory {
        fn build(
            &self,
            _config: &BrokerConfig,
            _registry: Arc<dyn TopicRegistry>,
        ) -> Result<Arc<dyn BrokerClient>, ConfigError> {
            let broker = Arc::new(RecordingBroker::new());
            self.built.lock().unwrap().push(broker.clone());
            Ok(broker)
        }
    }

    #[derive(Deserialize)]
    struct Increment {
        by: i64,
    }

    #[derive(Serialize)]
    struct Count {
        total: i64,
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            hierarchy: Hierarchy::new("acme", "plant-one", "conveyor", None, "counter")
                .expect("hierarchy should validate"),
            brokers: vec![BrokerConfig {
                protocol: BrokerProtocol::Mqtt,
                host: "127.0.0.1".to_string(),
                port: None,
                username: "guest".to_string(),
                password: "guest".to_string(),
            }],
            data_stores: Default::default(),
            status_interval_seconds: 300,
        }
    }

    fn counter_capability(total: Arc<AtomicI64>) -> crate::runtime::capability::Capability {
        let guarded = OperationConfig {
            block_keys: vec!["maintenance".to_string()],
            ..OperationConfig::default()
        };
        CapabilityBuilder::new("Counter")
            .operation("increment", guarded, move |req: Increment| {
                Ok(Count {
                    total: total.fetch_add(req.by, Ordering::SeqCst) + req.by,
                })
            })
            .expect("operation should register")
            .declare_event("threshold-crossed")
            .build()
    }

    async fn started_service() -> (Service, Arc<RecordingBroker>, Arc<AtomicI64>) {
        let factory = RecordingFactory::default();
        let total = Arc::new(AtomicI64::new(0));
        let service = Service::with_broker_factory(
            config(),
            vec![counter_capability(total.clone())],
            Vec::new(),
            &factory,
        )
        .expect("service should build");
        let broker = factory.broker();
        service.startup().await.expect("startup should succeed");
        (service, broker, total)
    }

    fn request(operation: &str, payload: serde_json::Value) -> UserspaceMessage {
        create_userspace_message(
            "acme.plant-one.conveyor.-.panel",
            "acme.plant-one.conveyor.-.counter",
            operation,
            Uuid::new_v4(),
            Uuid::new_v4(),
            ContentType::Json,
            DataHandler::Message,
            payload.to_string(),
        )
    }

    async fn deliver(service: &Service, message: &UserspaceMessage) {
        let bytes = serde_json::to_vec(message).expect("serialize");
        service.inner.handle_request_bytes(&bytes).await;
    }

    const RESPONSE_TOPIC: &str = "acme/plant-one/conveyor/-/counter/response";
    const LIFECYCLE_TOPIC: &str = "acme/plant-one/conveyor/-/counter/lifecycle";

    fn sole_reply(broker: &RecordingBroker) -> UserspaceMessage {
        let replies = broker.published_on(RESPONSE_TOPIC);
        assert_eq!(replies.len(), 1, "expected exactly one reply");
        UserspaceMessage::parse(&replies[0]).expect("reply should parse")
    }

    #[tokio::test]
    async fn unknown_operations_get_the_exact_canned_reply() {
        let (service, broker, _) = started_service().await;
        let incoming = request("Counter.nope", json!({}));

        deliver(&service, &incoming).await;

        let reply = sole_reply(&broker);
        assert_eq!(
            reply.payload,
            "Tried to call non-existent operation Counter.nope"
        );
        assert_eq!(reply.message_id, incoming.message_id);
        assert_eq!(reply.content_type, ContentType::Text);
        assert!(reply.headers.has_error);
        assert_eq!(reply.headers.destination, incoming.headers.source);
        assert_eq!(reply.headers.request_id, incoming.headers.request_id);
        assert_eq!(reply.headers.campaign_id, incoming.headers.campaign_id);
    }

    #[tokio::test]
    async fn requests_for_other_services_are_dropped_silently() {
        let (service, broker, _) = started_service().await;
        let mut incoming = request("Counter.increment", json!({"by": 1}));
        incoming.headers.destination = "acme.plant-one.conveyor.-.other".to_string();

        deliver(&service, &incoming).await;

        assert!(broker.published_on(RESPONSE_TOPIC).is_empty());
    }

    #[tokio::test]
    async fn successful_invocations_reply_with_a_fresh_message_id() {
        let (service, broker, total) = started_service().await;
        let incoming = request("Counter.increment", json!({"by": 41}));

        deliver(&service, &incoming).await;

        let reply = sole_reply(&broker);
        assert_eq!(reply.payload, r#"{"total":41}"#);
        assert_ne!(reply.message_id, incoming.message_id);
        assert_eq!(reply.content_type, ContentType::Json);
        assert!(!reply.headers.has_error);
        assert_eq!(reply.headers.request_id, incoming.headers.request_id);
        assert_eq!(total.load(Ordering::SeqCst), 41);
    }

    #[tokio::test]
    async fn blocked_operations_get_the_canned_refusal() {
        let (service, broker, _) = started_service().await;
        service.forbid_keys(&["maintenance"]).await;
        assert_eq!(service.blocked_keys(), vec!["maintenance".to_string()]);

        deliver(&service, &request("Counter.increment", json!({"by": 1}))).await;
        let reply = sole_reply(&broker);
        assert_eq!(
            reply.payload,
            "Function 'Counter.increment' is currently not available for use."
        );
        assert!(reply.headers.has_error);

        service.allow_keys(&["maintenance"]).await;
        assert!(service.blocked_keys().is_empty());
        deliver(&service, &request("Counter.increment", json!({"by": 1}))).await;
        let replies = broker.published_on(RESPONSE_TOPIC);
        let second = UserspaceMessage::parse(&replies[1]).expect("reply should parse");
        assert!(!second.headers.has_error);
    }

    #[tokio::test]
    async fn bad_arguments_replies_carry_the_decode_detail() {
        let (service, broker, _) = started_service().await;

        deliver(&service, &request("Counter.increment", json!({"by": "lots"}))).await;

        let reply = sole_reply(&broker);
        assert!(reply
            .payload
            .starts_with("Bad arguments to application:\n"));
        assert!(reply.headers.has_error);
    }

    #[tokio::test]
    async fn domain_failures_reply_generically() {
        let factory = RecordingFactory::default();
        let capability = CapabilityBuilder::new("Vault")
            .operation(
                "open",
                OperationConfig::default(),
                |_req: Option<i64>| -> Result<Count, String> {
                    Err("combination is 1-2-3-4".to_string())
                },
            )
            .unwrap()
            .build();
        let service =
            Service::with_broker_factory(config(), vec![capability], Vec::new(), &factory)
                .expect("service should build");
        service.startup().await.expect("startup should succeed");

        deliver(&service, &request("Vault.open", json!(null))).await;

        let reply = sole_reply(&factory.broker());
        assert_eq!(reply.payload, reply_text::DOMAIN_FAILED);
        assert!(!reply.payload.contains("1-2-3-4"));
    }

    #[tokio::test]
    async fn status_changes_broadcast_after_handling() {
        let factory = RecordingFactory::default();
        let level = Arc::new(AtomicI64::new(10));
        let status_level = level.clone();
        let capability = CapabilityBuilder::new("Tank")
            .operation("drain", OperationConfig::default(), {
                let level = level.clone();
                move |amount: i64| {
                    level.fetch_sub(amount, Ordering::SeqCst);
                    Ok(json!(null))
                }
            })
            .unwrap()
            .status(move || json!({"level": status_level.load(Ordering::SeqCst)}))
            .unwrap()
            .build();
        let service =
            Service::with_broker_factory(config(), vec![capability], Vec::new(), &factory)
                .expect("service should build");
        service.startup().await.expect("startup should succeed");
        let broker = factory.broker();

        let startup_broadcasts = broker.published_on(LIFECYCLE_TOPIC);
        let startup = LifecycleMessage::parse(&startup_broadcasts[0]).expect("parse");
        assert_eq!(startup.headers.lifecycle_type, LifecycleType::Startup);
        let startup_payload: serde_json::Value =
            serde_json::from_str(&startup.payload).expect("payload json");
        assert_eq!(startup_payload["status"]["level"], 10);

        deliver(&service, &request("Tank.drain", json!(4))).await;

        let broadcasts = broker.published_on(LIFECYCLE_TOPIC);
        let update = LifecycleMessage::parse(broadcasts.last().unwrap()).expect("parse");
        assert_eq!(update.headers.lifecycle_type, LifecycleType::StatusUpdate);
        let update_payload: serde_json::Value =
            serde_json::from_str(&update.payload).expect("payload json");
        assert_eq!(update_payload["status"]["level"], 6);
    }

    #[tokio::test]
    async fn emitted_events_drain_to_the_events_channel() {
        let (service, broker, _) = started_service().await;
        let emitter = service.event_emitter();

        emitter
            .emit("Counter", "threshold-crossed", json!({"at": 100}))
            .expect("declared event should emit");
        service.inner.drain_events().await;

        let published = broker.published_on("acme/plant-one/conveyor/-/counter/events");
        assert_eq!(published.len(), 1);
        let event = crate::protocol::event::EventMessage::parse(&published[0]).expect("parse");
        assert_eq!(event.headers.capability_name, "Counter");
        assert_eq!(event.headers.event_name, "threshold-crossed");
        assert_eq!(event.payload, r#"{"at":100}"#);
    }

    #[tokio::test]
    async fn undeclared_events_are_refused() {
        let (service, _, _) = started_service().await;
        let emitter = service.event_emitter();

        assert_eq!(
            emitter.emit("Counter", "meltdown", json!(null)),
            Err(EventError::UnknownEvent {
                capability: "Counter".to_string(),
                event: "meltdown".to_string(),
            })
        );
        assert_eq!(
            emitter.emit("Reactor", "threshold-crossed", json!(null)),
            Err(EventError::UnknownCapability {
                capability: "Reactor".to_string(),
            })
        );
    }

    #[test]
    fn a_second_status_provider_is_rejected() {
        let first = CapabilityBuilder::new("Tank")
            .status(|| json!({"level": 1}))
            .unwrap()
            .build();
        let second = CapabilityBuilder::new("Pump")
            .status(|| json!({"rpm": 0}))
            .unwrap()
            .build();

        let result = Service::new(config(), vec![first, second], Vec::new());
        assert!(matches!(
            result,
            Err(ServiceError::SecondStatusProvider { capability }) if capability == "Pump"
        ));
    }

    #[test]
    fn duplicate_capability_names_are_rejected() {
        let first = CapabilityBuilder::new("Counter").build();
        let second = CapabilityBuilder::new("Counter").build();

        let result = Service::new(config(), vec![first, second], Vec::new());
        assert!(matches!(
            result,
            Err(ServiceError::DuplicateCapability { capability }) if capability == "Counter"
        ));
    }

    #[test]
    fn descriptor_advertises_identity_and_capabilities() {
        let factory = RecordingFactory::default();
        let total = Arc::new(AtomicI64::new(0));
        let service = Service::with_broker_factory(
            config(),
            vec![counter_capability(total)],
            Vec::new(),
            &factory,
        )
        .expect("service should build");

        let descriptor = service.descriptor();
        assert_eq!(descriptor["hierarchy"], "acme.plant-one.conveyor.-.counter");
        assert_eq!(
            descriptor["capabilities"][0]["operations"][0]["name"],
            "Counter.increment"
        );
    }

    #[test]
    fn service_error_display_names_the_culprit() {
        let error = ServiceError::SecondStatusProvider {
            capability: "Pump".to_string(),
        };
        assert!(error.to_string().contains("Pump"));
        assert!(error.to_string().contains("exactly one"));
    }
}

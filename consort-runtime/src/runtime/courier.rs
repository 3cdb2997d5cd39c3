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

//! The courier drives tracked requests out and matches replies back in.
//!
//! Request creation is synchronous and safe to call from dispatch handlers;
//! actual sending happens later on the pump, which stages payloads through
//! the data plane, subscribes to the destination's response channel, and
//! publishes the envelope. Arriving replies run the reverse path.

use crate::addressing::{AddressError, Channel, Hierarchy};
use crate::control_plane::manager::{ControlPlaneError, ControlPlaneManager};
use crate::control_plane::topic_handler::ChannelCallback;
use crate::data_plane::DataPlaneManager;
use crate::external_request::{
    DirectRequest, ExternalRequestTable, ReplyAcceptance, RequestOutcome, ResponseHandler,
};
use crate::observability::events;
use crate::protocol::userspace::{create_userspace_message, UserspaceMessage};
use crate::protocol::{reply_text, version, ContentType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

const COMPONENT: &str = "courier";

/// How often the pump claims unhandled requests and sweeps expirations.
pub(crate) const PUMP_INTERVAL: Duration = Duration::from_millis(250);

/// Rejections raised while creating a request, before anything is tracked.
#[derive(Debug)]
pub enum RequestError {
    InvalidDestination(AddressError),
    EmptyOperation,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::InvalidDestination(err) => {
                write!(f, "request destination is not addressable: {err}")
            }
            RequestError::EmptyOperation => write!(f, "request operation must not be empty"),
        }
    }
}

impl std::error::Error for RequestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RequestError::InvalidDestination(err) => Some(err),
            RequestError::EmptyOperation => None,
        }
    }
}

/// Payload text for the wire. JSON payloads serialize as JSON; for the other
/// content types a top-level string travels as its raw text.
fn payload_text(content_type: ContentType, payload: &Value) -> String {
    match (content_type, payload) {
        (ContentType::Json, value) => value.to_string(),
        (_, Value::String(text)) => text.clone(),
        (_, value) => value.to_string(),
    }
}

/// Callback bridging a destination's response channel into the courier.
struct ReplyIntake {
    courier: Weak<MessageCourier>,
}

#[async_trait]
impl ChannelCallback for ReplyIntake {
    async fn on_message(&self, payload: &[u8]) {
        if let Some(courier) = self.courier.upgrade() {
            courier.handle_reply_bytes(payload).await;
        }
    }
}

/// Owns the request table plus the connections it needs to move messages.
pub(crate) struct MessageCourier {
    hierarchy: Hierarchy,
    identity: String,
    campaign_id: Uuid,
    control_plane: Arc<ControlPlaneManager>,
    data_plane: Arc<DataPlaneManager>,
    requests: ExternalRequestTable,
    reply_intake: Arc<ReplyIntake>,
    reply_topics: Mutex<HashSet<String>>,
    inbound_seen: Mutex<Option<Instant>>,
}

impl MessageCourier {
    pub(crate) fn new(
        hierarchy: Hierarchy,
        control_plane: Arc<ControlPlaneManager>,
        data_plane: Arc<DataPlaneManager>,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let identity = hierarchy.dotted();
        Arc::new_cyclic(|weak| Self {
            requests: ExternalRequestTable::with_timeout(&hierarchy, request_timeout),
            hierarchy,
            identity,
            campaign_id: Uuid::new_v4(),
            control_plane,
            data_plane,
            reply_intake: Arc::new(ReplyIntake {
                courier: weak.clone(),
            }),
            reply_topics: Mutex::new(HashSet::new()),
            inbound_seen: Mutex::new(None),
        })
    }

    pub(crate) fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub(crate) fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn control_plane(&self) -> &Arc<ControlPlaneManager> {
        &self.control_plane
    }

    pub(crate) fn data_plane(&self) -> &Arc<DataPlaneManager> {
        &self.data_plane
    }

    pub(crate) fn pending_requests(&self) -> usize {
        self.requests.pending_count()
    }

    /// When the last raw message arrived on a subscribed response channel.
    pub(crate) fn last_inbound(&self) -> Option<Instant> {
        *self
            .inbound_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn unsent_requests(&self) -> usize {
        self.requests.unsent_count()
    }

    /// Validates and tracks an outbound request. Never touches the network,
    /// so dispatch handlers may call it mid-invocation.
    pub(crate) fn create_external_request(
        &self,
        request: DirectRequest,
        handler: Option<ResponseHandler>,
    ) -> Result<Uuid, RequestError> {
        if request.operation.is_empty() {
            return Err(RequestError::EmptyOperation);
        }
        request
            .destination
            .validate()
            .map_err(RequestError::InvalidDestination)?;

        let operation = request.operation.clone();
        let destination = request.destination.dotted();
        let request_id = self.requests.insert(request, handler);
        debug!(
            event = events::REQUEST_CREATED,
            component = COMPONENT,
            operation = %operation,
            dst = %destination,
            request_id = %request_id,
            "tracking outbound request"
        );
        Ok(request_id)
    }

    /// One pump pass: sweep expirations, then claim and send every unhandled
    /// request. While the control plane is down nothing is claimed, so
    /// requests wait for a later pass instead of being lost.
    pub(crate) async fn pump_pass(&self, subscribe_replies: bool) {
        for expired in self.requests.sweep_expired() {
            warn!(
                event = events::REQUEST_TIMED_OUT,
                component = COMPONENT,
                request_id = %expired.request_id,
                operation = %expired.operation,
                dst = %expired.destination.dotted(),
                "request expired before a reply arrived"
            );
        }

        if !self.control_plane.is_connected() {
            return;
        }

        for (request_id, request) in self.requests.take_unhandled() {
            self.send_one(request_id, request, subscribe_replies).await;
        }
    }

    async fn send_one(&self, request_id: Uuid, request: DirectRequest, subscribe_replies: bool) {
        if subscribe_replies {
            if let Err(e) = self.ensure_reply_subscription(&request.destination).await {
                error!(
                    event = events::REQUEST_SEND_FAILED,
                    component = COMPONENT,
                    request_id = %request_id,
                    operation = %request.operation,
                    err = %e,
                    "could not subscribe to the destination's response channel"
                );
                self.requests.finalize(&request_id);
                return;
            }
        }

        let payload = payload_text(request.content_type, &request.payload);
        let staged = match self
            .data_plane
            .stage_outgoing(request.data_handler, payload)
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                error!(
                    event = events::DATA_PLANE_UPLOAD_FAILED,
                    component = COMPONENT,
                    request_id = %request_id,
                    operation = %request.operation,
                    err = %e,
                    "request payload could not be staged"
                );
                self.requests.finalize(&request_id);
                return;
            }
        };

        let destination = request.destination.dotted();
        let envelope = create_userspace_message(
            &self.identity,
            &destination,
            &request.operation,
            self.campaign_id,
            request_id,
            request.content_type,
            request.data_handler,
            staged,
        );
        let topic = request.destination.topic(Channel::Request);
        // The request id only reaches the wire with the publish below, so the
        // entry moves to Sent first: a reply racing the publish can never find
        // it still in Sending. A failed publish finalizes the entry instead.
        self.requests.mark_sent(&request_id);
        match self
            .control_plane
            .publish_message(&topic, &envelope, Channel::Request.persist())
            .await
        {
            Ok(()) => {
                debug!(
                    event = events::REQUEST_SENT,
                    component = COMPONENT,
                    request_id = %request_id,
                    operation = %request.operation,
                    dst = %destination,
                    msg_id = %envelope.message_id,
                    "request published"
                );
            }
            Err(e) => {
                error!(
                    event = events::REQUEST_SEND_FAILED,
                    component = COMPONENT,
                    request_id = %request_id,
                    operation = %request.operation,
                    dst = %destination,
                    err = %e,
                    "request publish failed"
                );
                self.requests.finalize(&request_id);
            }
        }
    }

    async fn ensure_reply_subscription(
        &self,
        destination: &Hierarchy,
    ) -> Result<(), ControlPlaneError> {
        let topic = destination.topic(Channel::Response);
        {
            let seen = self
                .reply_topics
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if seen.contains(&topic) {
                return Ok(());
            }
        }
        self.control_plane
            .add_subscription_channel(
                &topic,
                vec![self.reply_intake.clone() as Arc<dyn ChannelCallback>],
                Channel::Response.persist(),
            )
            .await?;
        self.reply_topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic);
        Ok(())
    }

    /// Runs an arriving reply through filtering, correlation, and the
    /// caller's handler.
    pub(crate) async fn handle_reply_bytes(&self, payload: &[u8]) {
        // Raw channel traffic counts as liveness even when the message turns
        // out to be unparseable or meant for another caller.
        *self
            .inbound_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        let message = match UserspaceMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    event = events::INBOUND_PARSE_FAILED,
                    component = COMPONENT,
                    err = %e,
                    "dropping unparseable reply"
                );
                return;
            }
        };

        // Response channels are shared per destination, so replies meant for
        // other callers show up here. Those are dropped without noise.
        if message.headers.destination != self.identity {
            debug!(
                event = events::INBOUND_WRONG_DESTINATION,
                component = COMPONENT,
                msg_id = %message.message_id,
                dst = %message.headers.destination,
                "reply addressed to another caller"
            );
            return;
        }

        if let Err(e) = version::check_compatibility(&message.headers.sdk_version) {
            warn!(
                event = events::INBOUND_VERSION_REJECTED,
                component = COMPONENT,
                msg_id = %message.message_id,
                err = %e,
                "dropping reply from incompatible peer"
            );
            return;
        }

        let responder = match Hierarchy::parse_dotted(&message.headers.source) {
            Ok(responder) => responder,
            Err(e) => {
                debug!(
                    event = events::INBOUND_PARSE_FAILED,
                    component = COMPONENT,
                    msg_id = %message.message_id,
                    err = %e,
                    "reply source is not a valid hierarchy"
                );
                return;
            }
        };

        let request_id = message.headers.request_id;
        match self
            .requests
            .accept_reply(&request_id, &responder, &message.operation_id)
        {
            ReplyAcceptance::Unknown => {
                debug!(
                    event = events::REPLY_UNMATCHED,
                    component = COMPONENT,
                    request_id = %request_id,
                    operation = %message.operation_id,
                    "no tracked request awaits this reply"
                );
            }
            ReplyAcceptance::Rejected => {
                warn!(
                    event = events::REPLY_REJECTED,
                    component = COMPONENT,
                    request_id = %request_id,
                    operation = %message.operation_id,
                    src = %message.headers.source,
                    "reply contradicts the tracked request"
                );
            }
            ReplyAcceptance::Accepted(handler) => {
                debug!(
                    event = events::REPLY_ACCEPTED,
                    component = COMPONENT,
                    request_id = %request_id,
                    operation = %message.operation_id,
                    "reply matched"
                );
                let (payload, has_error) = match self
                    .data_plane
                    .resolve_incoming(message.headers.data_handler, &message.payload)
                    .await
                {
                    Ok(resolved) => (resolved, message.headers.has_error),
                    Err(e) => {
                        error!(
                            event = events::DATA_PLANE_RESOLVE_FAILED,
                            component = COMPONENT,
                            request_id = %request_id,
                            err = %e,
                            "reply payload could not be resolved"
                        );
                        (reply_text::DATA_FETCH_FAILED.to_string(), true)
                    }
                };

                self.requests.begin_processing(&request_id);
                if let Some(handler) = handler {
                    let outcome = RequestOutcome {
                        request_id,
                        operation: message.operation_id.clone(),
                        source: responder,
                        has_error,
                        payload,
                    };
                    if catch_unwind(AssertUnwindSafe(|| handler(&outcome))).is_err() {
                        error!(
                            event = events::RESPONSE_HANDLER_PANICKED,
                            component = COMPONENT,
                            request_id = %request_id,
                            operation = %message.operation_id,
                            "response handler panicked"
                        );
                    }
                }
                self.requests.finalize(&request_id);
            }
        }
    }
}

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

//! Event broadcasts published on a service's `events` channel.
//!
//! Events are produced by the owning service only; clients and orchestrators
//! consume them. There is no destination header because events are broadcast.

use crate::protocol::version::SDK_VERSION;
use crate::protocol::{data_handler_string, timestamp_string, ContentType, DataHandler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub source: String,
    #[serde(with = "timestamp_string")]
    pub created_at: DateTime<Utc>,
    pub sdk_version: String,
    #[serde(with = "data_handler_string")]
    pub data_handler: DataHandler,
    pub capability_name: String,
    pub event_name: String,
}

/// One broadcast on the `events` channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub message_id: Uuid,
    pub content_type: ContentType,
    pub payload: String,
    pub headers: EventHeader,
}

impl EventMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Builds an event broadcast with an inline JSON payload.
pub fn create_event_message(
    source: &str,
    capability_name: &str,
    event_name: &str,
    payload: &serde_json::Value,
) -> EventMessage {
    EventMessage {
        message_id: Uuid::new_v4(),
        content_type: ContentType::Json,
        payload: payload.to_string(),
        headers: EventHeader {
            source: source.to_string(),
            created_at: crate::protocol::wire_now(),
            sdk_version: SDK_VERSION.to_string(),
            data_handler: DataHandler::Message,
            capability_name: capability_name.to_string(),
            event_name: event_name.to_string(),
        },
    }
}

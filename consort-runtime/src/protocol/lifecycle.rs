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

//! Lifecycle broadcasts published on a service's `lifecycle` channel.

use crate::protocol::version::SDK_VERSION;
use crate::protocol::{timestamp_string, ContentType};
use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What a lifecycle broadcast announces. Wire form is the decimal code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleType {
    Startup,
    Shutdown,
    Polling,
    StatusUpdate,
    FunctionsAllowed,
    FunctionsBlocked,
}

impl LifecycleType {
    pub fn code(&self) -> u8 {
        match self {
            LifecycleType::Startup => 0,
            LifecycleType::Shutdown => 1,
            LifecycleType::Polling => 2,
            LifecycleType::StatusUpdate => 3,
            LifecycleType::FunctionsAllowed => 4,
            LifecycleType::FunctionsBlocked => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(LifecycleType::Startup),
            1 => Some(LifecycleType::Shutdown),
            2 => Some(LifecycleType::Polling),
            3 => Some(LifecycleType::StatusUpdate),
            4 => Some(LifecycleType::FunctionsAllowed),
            5 => Some(LifecycleType::FunctionsBlocked),
            _ => None,
        }
    }
}

impl Serialize for LifecycleType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code().to_string())
    }
}

impl<'de> Deserialize<'de> for LifecycleType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let code: u8 = raw
            .parse()
            .map_err(|_| DeError::custom(format!("unknown lifecycle type '{raw}'")))?;
        LifecycleType::from_code(code)
            .ok_or_else(|| DeError::custom(format!("unknown lifecycle type '{raw}'")))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleHeader {
    pub source: String,
    pub destination: String,
    #[serde(with = "timestamp_string")]
    pub created_at: DateTime<Utc>,
    pub sdk_version: String,
    pub lifecycle_type: LifecycleType,
}

/// One broadcast on the `lifecycle` channel. The payload is always JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleMessage {
    pub message_id: uuid::Uuid,
    pub content_type: ContentType,
    pub payload: String,
    pub headers: LifecycleHeader,
}

impl LifecycleMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Builds a lifecycle broadcast. The destination carries the channel topic the
/// message is published on.
pub fn create_lifecycle_message(
    source: &str,
    destination: &str,
    lifecycle_type: LifecycleType,
    payload: &serde_json::Value,
) -> LifecycleMessage {
    LifecycleMessage {
        message_id: uuid::Uuid::new_v4(),
        content_type: ContentType::Json,
        payload: payload.to_string(),
        headers: LifecycleHeader {
            source: source.to_string(),
            destination: destination.to_string(),
            created_at: crate::protocol::wire_now(),
            sdk_version: SDK_VERSION.to_string(),
            lifecycle_type,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{create_lifecycle_message, LifecycleMessage, LifecycleType};
    use crate::protocol::ContentType;

    #[test]
    fn lifecycle_codes_are_stable() {
        let expected = [
            (LifecycleType::Startup, 0),
            (LifecycleType::Shutdown, 1),
            (LifecycleType::Polling, 2),
            (LifecycleType::StatusUpdate, 3),
            (LifecycleType::FunctionsAllowed, 4),
            (LifecycleType::FunctionsBlocked, 5),
        ];

        for (lifecycle_type, code) in expected {
            assert_eq!(lifecycle_type.code(), code);
            assert_eq!(LifecycleType::from_code(code), Some(lifecycle_type));
        }
        assert_eq!(LifecycleType::from_code(6), None);
    }

    #[test]
    fn lifecycle_type_travels_as_string_digit() {
        let message = create_lifecycle_message(
            "org.fac.sys.-.svc",
            "org/fac/sys/-/svc/lifecycle",
            LifecycleType::StatusUpdate,
            &serde_json::json!({"status": "ok"}),
        );

        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["headers"]["lifecycle_type"], "3");
        assert_eq!(value["contentType"], "application/json");

        let bytes = serde_json::to_vec(&message).expect("serialize");
        let parsed = LifecycleMessage::parse(&bytes).expect("parse");
        assert_eq!(parsed.headers.lifecycle_type, LifecycleType::StatusUpdate);
        assert_eq!(parsed.content_type, ContentType::Json);
    }

    #[test]
    fn payload_is_embedded_as_json_text() {
        let message = create_lifecycle_message(
            "org.fac.sys.-.svc",
            "org/fac/sys/-/svc/lifecycle",
            LifecycleType::Shutdown,
            &serde_json::json!("maintenance window"),
        );

        assert_eq!(message.payload, "\"maintenance window\"");
    }
}

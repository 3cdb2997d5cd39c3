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

//! Request/response envelopes exchanged on the userspace channels.

use crate::protocol::version::SDK_VERSION;
use crate::protocol::{bool_string, data_handler_string, timestamp_string, ContentType, DataHandler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Headers attached to every userspace message.
///
/// `campaign_id` groups all messages of one session; `request_id` correlates a
/// reply with the request that caused it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserspaceHeader {
    pub source: String,
    pub destination: String,
    #[serde(with = "timestamp_string")]
    pub created_at: DateTime<Utc>,
    pub sdk_version: String,
    pub campaign_id: Uuid,
    pub request_id: Uuid,
    #[serde(with = "data_handler_string")]
    pub data_handler: DataHandler,
    #[serde(with = "bool_string")]
    pub has_error: bool,
}

/// One request or reply on a `request`/`response` channel.
///
/// `operation_id` is `${Capability}.${function}`. The payload is UTF-8 text:
/// JSON for [`ContentType::Json`], raw text otherwise, or a store pointer when
/// the data handler says so.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserspaceMessage {
    pub message_id: Uuid,
    pub operation_id: String,
    pub content_type: ContentType,
    pub payload: String,
    pub headers: UserspaceHeader,
}

impl UserspaceMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Builds a fresh outbound userspace message stamped with the local version.
#[allow(clippy::too_many_arguments)]
pub fn create_userspace_message(
    source: &str,
    destination: &str,
    operation_id: &str,
    campaign_id: Uuid,
    request_id: Uuid,
    content_type: ContentType,
    data_handler: DataHandler,
    payload: String,
) -> UserspaceMessage {
    UserspaceMessage {
        message_id: Uuid::new_v4(),
        operation_id: operation_id.to_string(),
        content_type,
        payload,
        headers: UserspaceHeader {
            source: source.to_string(),
            destination: destination.to_string(),
            created_at: crate::protocol::wire_now(),
            sdk_version: SDK_VERSION.to_string(),
            campaign_id,
            request_id,
            data_handler,
            has_error: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{create_userspace_message, UserspaceMessage};
    use crate::protocol::{ContentType, DataHandler};
    use uuid::Uuid;

    fn sample() -> UserspaceMessage {
        create_userspace_message(
            "org.fac.sys.-.caller",
            "org.fac.sys.-.callee",
            "Counter.increment",
            Uuid::new_v4(),
            Uuid::new_v4(),
            ContentType::Json,
            DataHandler::Message,
            r#"{"amount":2}"#.to_string(),
        )
    }

    #[test]
    fn envelope_keys_are_camel_case() {
        let message = sample();
        let value = serde_json::to_value(&message).expect("serialize");

        let object = value.as_object().expect("envelope object");
        for key in ["messageId", "operationId", "contentType", "payload", "headers"] {
            assert!(object.contains_key(key), "missing envelope key {key}");
        }
    }

    #[test]
    fn every_header_value_is_a_string() {
        let message = sample();
        let value = serde_json::to_value(&message).expect("serialize");

        let headers = value["headers"].as_object().expect("headers object");
        assert_eq!(headers.len(), 8);
        for (key, header_value) in headers {
            assert!(header_value.is_string(), "header {key} must be a string");
        }
    }

    #[test]
    fn parse_round_trips_the_envelope() {
        let message = sample();
        let bytes = serde_json::to_vec(&message).expect("serialize");

        let parsed = UserspaceMessage::parse(&bytes).expect("parse");

        assert_eq!(parsed, message);
        assert!(!parsed.headers.has_error);
        assert_eq!(parsed.headers.data_handler, DataHandler::Message);
    }

    #[test]
    fn parse_rejects_unknown_data_handler_codes() {
        let message = sample();
        let mut value = serde_json::to_value(&message).expect("serialize");
        value["headers"]["data_handler"] = serde_json::Value::String("9".to_string());

        let bytes = serde_json::to_vec(&value).expect("serialize");
        assert!(UserspaceMessage::parse(&bytes).is_err());
    }

    #[test]
    fn parse_tolerates_extra_header_fields() {
        let message = sample();
        let mut value = serde_json::to_value(&message).expect("serialize");
        value["headers"]["service_version"] = serde_json::Value::String("1.0.0".to_string());

        let bytes = serde_json::to_vec(&value).expect("serialize");
        assert!(UserspaceMessage::parse(&bytes).is_ok());
    }
}

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

//! Wire envelopes and the scalar codecs they share.
//!
//! Envelope keys are camelCase; header keys are snake_case. Every header value
//! is carried as a JSON string because some broker header schemes can only
//! transport strings, so non-string scalars get explicit string codecs here.

pub mod event;
pub mod lifecycle;
pub mod userspace;
pub mod version;

use serde::{Deserialize, Serialize};

/// MIME type of an envelope payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "text/plain")]
    Text,
    #[serde(rename = "application/octet-stream")]
    Binary,
}

impl ContentType {
    pub fn as_mime(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Text => "text/plain",
            ContentType::Binary => "application/octet-stream",
        }
    }
}

/// Where a payload actually lives.
///
/// `Message` means the payload bytes are inline in the envelope. `DataStore`
/// means the payload is a pointer that must be resolved through the data plane
/// before the bytes can be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataHandler {
    Message,
    DataStore,
}

impl DataHandler {
    pub fn code(&self) -> u8 {
        match self {
            DataHandler::Message => 0,
            DataHandler::DataStore => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DataHandler::Message),
            1 => Some(DataHandler::DataStore),
            _ => None,
        }
    }
}

/// Serializes a [`DataHandler`] as its decimal code in a JSON string.
pub mod data_handler_string {
    use super::DataHandler;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DataHandler, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.code().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DataHandler, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let code: u8 = raw
            .parse()
            .map_err(|_| DeError::custom(format!("unknown data handler code '{raw}'")))?;
        DataHandler::from_code(code)
            .ok_or_else(|| DeError::custom(format!("unknown data handler code '{raw}'")))
    }
}

/// Serializes a `bool` as the JSON strings `"true"` / `"false"`.
pub mod bool_string {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "true" | "True" | "1" => Ok(true),
            "false" | "False" | "0" => Ok(false),
            other => Err(DeError::custom(format!("unknown boolean string '{other}'"))),
        }
    }
}

/// Canned payloads for failure replies.
///
/// These strings are part of the wire contract: peers written against other
/// runtimes match on them, so the wording is fixed.
pub mod reply_text {
    pub const DATA_FETCH_FAILED: &str = "Could not get data from data handler";
    pub const DATA_SEND_FAILED: &str = "Could not send data to data handler";
    pub const DOMAIN_FAILED: &str = "Service domain logic threw exception.";

    pub fn unknown_operation(operation: &str) -> String {
        format!("Tried to call non-existent operation {operation}")
    }

    pub fn operation_blocked(operation: &str) -> String {
        format!("Function '{operation}' is currently not available for use.")
    }

    pub fn bad_arguments(detail: &str) -> String {
        format!("Bad arguments to application:\n{detail}")
    }
}

/// Current time truncated to the microsecond precision of the wire format,
/// so a freshly stamped envelope compares equal after a serialize/parse trip.
pub(crate) fn wire_now() -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Serializes a UTC timestamp as an RFC 3339 string with microsecond precision.
pub mod timestamp_string {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|e| DeError::custom(format!("bad timestamp '{raw}': {e}")))
    }
}

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

//! Configuration surface for services and clients.
//!
//! Structures deserialize from json5 files or are built in code. Bounds that
//! serde cannot express are enforced by the `validated()` methods, so runtimes
//! only ever see checked configurations.

use crate::addressing::{AddressError, Hierarchy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const STATUS_INTERVAL_MIN_SECONDS: u64 = 30;
const STATUS_INTERVAL_MAX_SECONDS: u64 = 1500;
const DEFAULT_STATUS_INTERVAL_SECONDS: u64 = 300;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_AMQP_PORT: u16 = 5672;

/// Failures raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed { path: String, source: std::io::Error },
    ParseFailed { path: String, detail: String },
    NoBrokers,
    DiscoveryUnsupported,
    StatusIntervalOutOfRange { seconds: u64 },
    InvalidHierarchy(AddressError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadFailed { path, source } => {
                write!(f, "unable to read config file '{path}': {source}")
            }
            ConfigError::ParseFailed { path, detail } => {
                write!(f, "unable to parse config file '{path}': {detail}")
            }
            ConfigError::NoBrokers => {
                write!(f, "at least one broker endpoint must be configured")
            }
            ConfigError::DiscoveryUnsupported => {
                write!(f, "broker discovery is not implemented yet")
            }
            ConfigError::StatusIntervalOutOfRange { seconds } => {
                write!(
                    f,
                    "status interval {seconds}s is outside the allowed \
                     {STATUS_INTERVAL_MIN_SECONDS}s-{STATUS_INTERVAL_MAX_SECONDS}s range"
                )
            }
            ConfigError::InvalidHierarchy(err) => write!(f, "invalid hierarchy: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::ReadFailed { source, .. } => Some(source),
            ConfigError::InvalidHierarchy(err) => Some(err),
            _ => None,
        }
    }
}

/// Wire protocol spoken by one broker endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerProtocol {
    #[serde(rename = "mqtt3.1.1")]
    Mqtt,
    #[serde(rename = "amqp0.9.1")]
    Amqp,
    /// Reserved marker; constructing a control plane with it fails fast.
    #[serde(rename = "discovery")]
    Discovery,
}

/// One broker endpoint the control plane fans out over.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub protocol: BrokerProtocol,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl BrokerConfig {
    /// Configured port, or the protocol's conventional default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.protocol {
            BrokerProtocol::Mqtt => DEFAULT_MQTT_PORT,
            BrokerProtocol::Amqp => DEFAULT_AMQP_PORT,
            BrokerProtocol::Discovery => 0,
        })
    }
}

/// One object-store endpoint for payload indirection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataStoreConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
}

/// All object-store endpoints, grouped by backend kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataStoreConfigMap {
    #[serde(default)]
    pub stores: Vec<DataStoreConfig>,
}

/// Configuration for a [`Service`](crate::Service).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub hierarchy: Hierarchy,
    pub brokers: Vec<BrokerConfig>,
    #[serde(default)]
    pub data_stores: DataStoreConfigMap,
    #[serde(default = "default_status_interval")]
    pub status_interval_seconds: u64,
}

fn default_status_interval() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECONDS
}

impl ServiceConfig {
    /// Returns the config with every bound checked.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.hierarchy
            .validate()
            .map_err(ConfigError::InvalidHierarchy)?;
        validate_brokers(&self.brokers)?;
        if !(STATUS_INTERVAL_MIN_SECONDS..=STATUS_INTERVAL_MAX_SECONDS)
            .contains(&self.status_interval_seconds)
        {
            return Err(ConfigError::StatusIntervalOutOfRange {
                seconds: self.status_interval_seconds,
            });
        }
        Ok(self)
    }
}

/// Configuration for a [`Client`](crate::Client).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub brokers: Vec<BrokerConfig>,
    #[serde(default)]
    pub data_stores: DataStoreConfigMap,
    /// Send the initial requests, then terminate without waiting for replies.
    #[serde(default)]
    pub terminate_after_initial_messages: bool,
    /// Resend the initial requests when `startup` runs again after a shutdown.
    #[serde(default)]
    pub resend_initial_messages_on_secondary_startup: bool,
}

impl ClientConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        validate_brokers(&self.brokers)?;
        Ok(self)
    }
}

fn validate_brokers(brokers: &[BrokerConfig]) -> Result<(), ConfigError> {
    if brokers.is_empty() {
        return Err(ConfigError::NoBrokers);
    }
    if brokers
        .iter()
        .any(|broker| broker.protocol == BrokerProtocol::Discovery)
    {
        return Err(ConfigError::DiscoveryUnsupported);
    }
    Ok(())
}

/// Loads any config structure from a json5 file.
pub fn load_json5<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display_path = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: display_path.clone(),
        source,
    })?;
    json5::from_str(&contents).map_err(|e| ConfigError::ParseFailed {
        path: display_path,
        detail: e.to_string(),
    })
}

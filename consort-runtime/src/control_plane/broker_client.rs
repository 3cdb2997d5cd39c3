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

//! The broker adapter seam and shared connection policy.

use crate::config::{BrokerConfig, ConfigError};
use crate::control_plane::topic_handler::TopicRegistry;
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Connection attempts before a broker is declared unrecoverable.
pub(crate) const CONNECT_MAX_ATTEMPTS: u32 = 5;
/// First retry delay; doubles per attempt up to the cap.
pub(crate) const CONNECT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub(crate) const CONNECT_BACKOFF_CAP: Duration = Duration::from_secs(60);
/// How long connect/subscribe wait on their confirmation barriers.
pub(crate) const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry delay before the given attempt (first attempt is 1).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let doubled = CONNECT_INITIAL_BACKOFF.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
    doubled.min(CONNECT_BACKOFF_CAP)
}

/// Failures surfaced by broker adapters.
#[derive(Debug)]
pub enum BrokerClientError {
    ConnectionFailed { attempts: u32, detail: String },
    NotConnected,
    SubscribeFailed { topic: String, detail: String },
    PublishFailed { detail: String },
}

impl Display for BrokerClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerClientError::ConnectionFailed { attempts, detail } => {
                write!(f, "broker connection failed after {attempts} attempts: {detail}")
            }
            BrokerClientError::NotConnected => write!(f, "broker is not connected"),
            BrokerClientError::SubscribeFailed { topic, detail } => {
                write!(f, "subscribe to '{topic}' failed: {detail}")
            }
            BrokerClientError::PublishFailed { detail } => {
                write!(f, "publish failed: {detail}")
            }
        }
    }
}

impl Error for BrokerClientError {}

/// One broker connection, seen as a publish/subscribe surface.
///
/// Implementations own their network loop on a dedicated worker and deliver
/// inbound messages through an internal queue to a dispatch stage that looks
/// callbacks up in the registry supplied at construction, so subscriptions
/// added after connect still route correctly.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Establishes the connection, retrying with exponential backoff. Returns
    /// once the broker has confirmed readiness. Exhausting the retry budget
    /// marks this broker unrecoverable.
    async fn connect(&self) -> Result<(), BrokerClientError>;

    /// Tears the connection down. Safe to call repeatedly.
    async fn disconnect(&self);

    /// Fire-and-forget publish.
    async fn publish(&self, topic: &str, payload: &[u8], persist: bool)
        -> Result<(), BrokerClientError>;

    /// Subscribes and returns only after the broker confirms the subscription.
    async fn subscribe(&self, topic: &str, persist: bool) -> Result<(), BrokerClientError>;

    /// Opportunistic cleanup; failures are logged, not surfaced.
    async fn unsubscribe(&self, topic: &str);

    fn is_connected(&self) -> bool;

    /// Whether this broker has permanently given up. Distinct from a transient
    /// disconnect that a reconnect may heal.
    fn considered_unrecoverable(&self) -> bool;
}

/// Builds broker adapters from endpoint configs. The control plane uses the
/// protocol-dispatching default; tests inject in-memory brokers through this
/// seam.
pub trait BrokerClientFactory: Send + Sync {
    fn build(
        &self,
        config: &BrokerConfig,
        registry: Arc<dyn TopicRegistry>,
    ) -> Result<Arc<dyn BrokerClient>, ConfigError>;
}

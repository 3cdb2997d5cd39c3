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

//! The control-plane manager: one logical publish/subscribe surface over any
//! number of broker connections.
//!
//! The topic registry outlives connections. Subscriptions registered while
//! disconnected are applied to every broker during `connect`, and messages
//! publish the same serialized bytes to every broker.

use crate::config::{BrokerConfig, BrokerProtocol, ConfigError};
use crate::control_plane::amqp::AmqpBrokerClient;
use crate::control_plane::broker_client::{BrokerClient, BrokerClientError, BrokerClientFactory};
use crate::control_plane::mqtt::MqttBrokerClient;
use crate::control_plane::topic_handler::{ChannelCallback, SharedTopicMap, TopicRegistry};
use crate::observability::events;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "control_plane";

/// Failures surfaced by control-plane operations.
#[derive(Debug)]
pub enum ControlPlaneError {
    NotConnected,
    SerializeFailed { detail: String },
    Broker(BrokerClientError),
}

impl Display for ControlPlaneError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlPlaneError::NotConnected => {
                write!(f, "control plane is not connected")
            }
            ControlPlaneError::SerializeFailed { detail } => {
                write!(f, "unable to serialize outbound message: {detail}")
            }
            ControlPlaneError::Broker(err) => write!(f, "broker operation failed: {err}"),
        }
    }
}

impl Error for ControlPlaneError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ControlPlaneError::Broker(err) => Some(err),
            _ => None,
        }
    }
}

/// Default factory dispatching on the endpoint protocol.
pub struct DefaultBrokerFactory;

impl BrokerClientFactory for DefaultBrokerFactory {
    fn build(
        &self,
        config: &BrokerConfig,
        registry: Arc<dyn TopicRegistry>,
    ) -> Result<Arc<dyn BrokerClient>, ConfigError> {
        match config.protocol {
            BrokerProtocol::Mqtt => Ok(Arc::new(MqttBrokerClient::new(config, registry))),
            BrokerProtocol::Amqp => Ok(Arc::new(AmqpBrokerClient::new(config, registry))),
            BrokerProtocol::Discovery => Err(ConfigError::DiscoveryUnsupported),
        }
    }
}

/// One logical broker surface over many connections.
pub struct ControlPlaneManager {
    topics: SharedTopicMap,
    brokers: Vec<Arc<dyn BrokerClient>>,
    ready: AtomicBool,
}

impl ControlPlaneManager {
    /// Builds the manager and its broker adapters without connecting.
    pub fn new(
        configs: &[BrokerConfig],
        factory: &dyn BrokerClientFactory,
    ) -> Result<Self, ConfigError> {
        let topics = SharedTopicMap::new();
        let mut brokers = Vec::with_capacity(configs.len());
        for config in configs {
            let registry: Arc<dyn TopicRegistry> = Arc::new(topics.clone());
            brokers.push(factory.build(config, registry)?);
        }
        Ok(Self {
            topics,
            brokers,
            ready: AtomicBool::new(false),
        })
    }

    /// Builds the manager with the protocol-dispatching default factory.
    pub fn with_default_brokers(configs: &[BrokerConfig]) -> Result<Self, ConfigError> {
        Self::new(configs, &DefaultBrokerFactory)
    }

    /// Unions callbacks into a topic subscription. If already connected, the
    /// subscription is applied to every broker immediately; otherwise it is
    /// applied during the next `connect`.
    pub async fn add_subscription_channel(
        &self,
        topic: &str,
        callbacks: Vec<Arc<dyn ChannelCallback>>,
        persist: bool,
    ) -> Result<(), ControlPlaneError> {
        let is_new = self.topics.union(topic, callbacks, persist).await;
        if is_new {
            debug!(
                event = events::SUBSCRIPTION_ADDED,
                component = COMPONENT,
                topic,
                persist,
                "tracking new subscription topic"
            );
        } else {
            debug!(
                event = events::SUBSCRIPTION_CALLBACK_MERGED,
                component = COMPONENT,
                topic,
                "merged callbacks into existing subscription"
            );
        }

        // Only a topic new to the registry needs a broker-side subscribe;
        // merging callbacks must not subscribe twice.
        if is_new && self.ready.load(Ordering::SeqCst) {
            for broker in &self.brokers {
                broker
                    .subscribe(topic, persist)
                    .await
                    .map_err(ControlPlaneError::Broker)?;
            }
        }
        Ok(())
    }

    /// Stops tracking a topic. Returns `true` when the topic was known.
    pub async fn remove_subscription_channel(&self, topic: &str) -> bool {
        let existed = self.topics.remove(topic).await;
        if !existed {
            debug!(
                event = events::SUBSCRIPTION_REMOVE_MISSING,
                component = COMPONENT,
                topic,
                "remove requested for unknown topic"
            );
            return false;
        }

        info!(
            event = events::SUBSCRIPTION_REMOVED,
            component = COMPONENT,
            topic,
            "subscription removed"
        );
        if self.ready.load(Ordering::SeqCst) {
            for broker in &self.brokers {
                broker.unsubscribe(topic).await;
            }
        }
        true
    }

    /// Connects every broker, applies all tracked subscriptions, and marks the
    /// plane ready.
    pub async fn connect(&self) -> Result<(), ControlPlaneError> {
        info!(
            event = events::CONTROL_PLANE_CONNECT_START,
            component = COMPONENT,
            brokers = self.brokers.len(),
            "connecting control plane"
        );
        let subscriptions = self.topics.subscriptions().await;
        for broker in &self.brokers {
            broker.connect().await.map_err(ControlPlaneError::Broker)?;
            for entry in &subscriptions {
                broker
                    .subscribe(&entry.topic, entry.persist)
                    .await
                    .map_err(ControlPlaneError::Broker)?;
            }
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(
            event = events::CONTROL_PLANE_CONNECT_OK,
            component = COMPONENT,
            subscriptions = subscriptions.len(),
            "control plane connected"
        );
        Ok(())
    }

    /// Disconnects every broker. The ready flag drops first so concurrent
    /// publishes fail fast instead of racing the teardown.
    pub async fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        for broker in &self.brokers {
            broker.disconnect().await;
        }
        info!(
            event = events::CONTROL_PLANE_DISCONNECT,
            component = COMPONENT,
            "control plane disconnected"
        );
    }

    /// Serializes the message once and publishes the identical bytes to every
    /// broker. While disconnected this logs and returns an error without
    /// touching any broker.
    pub async fn publish_message<M: Serialize>(
        &self,
        topic: &str,
        message: &M,
        persist: bool,
    ) -> Result<(), ControlPlaneError> {
        if !self.is_connected() {
            error!(
                event = events::CONTROL_PLANE_PUBLISH_DROPPED,
                component = COMPONENT,
                topic,
                reason = "not_connected",
                "dropping publish while disconnected"
            );
            return Err(ControlPlaneError::NotConnected);
        }

        let bytes = serde_json::to_vec(message).map_err(|e| {
            error!(
                event = events::CONTROL_PLANE_PUBLISH_DROPPED,
                component = COMPONENT,
                topic,
                err = %e,
                "dropping unserializable outbound message"
            );
            ControlPlaneError::SerializeFailed {
                detail: e.to_string(),
            }
        })?;

        for broker in &self.brokers {
            if let Err(e) = broker.publish(topic, &bytes, persist).await {
                warn!(
                    event = events::BROKER_PUBLISH_FAILED,
                    component = COMPONENT,
                    topic,
                    err = %e,
                    "publish failed on one broker"
                );
            }
        }
        Ok(())
    }

    /// Ready and every broker connected.
    pub fn is_connected(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
            && self.brokers.iter().all(|broker| broker.is_connected())
    }

    /// Any broker has permanently given up.
    pub fn considered_unrecoverable(&self) -> bool {
        self.brokers
            .iter()
            .any(|broker| broker.considered_unrecoverable())
    }
}

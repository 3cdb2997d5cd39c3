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

//! Per-topic callback registry shared between the manager and broker adapters.

use crate::observability::events;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

const COMPONENT: &str = "topic_handler";

/// Consumer of raw payloads delivered on one subscribed topic.
///
/// Callback identity is the `Arc` pointer: registering the same `Arc` twice on
/// one topic is a no-op, and two separately constructed callbacks are always
/// distinct.
#[async_trait]
pub trait ChannelCallback: Send + Sync {
    async fn on_message(&self, payload: &[u8]);
}

/// One topic the control plane knows about.
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub topic: String,
    pub persist: bool,
}

/// Read-side view of the topic map, handed to broker adapters so that late
/// subscriptions and reconnect resubscribes route through current state.
#[async_trait]
pub trait TopicRegistry: Send + Sync {
    async fn subscriptions(&self) -> Vec<SubscriptionEntry>;
    async fn callbacks_for(&self, topic: &str) -> Vec<Arc<dyn ChannelCallback>>;
}

/// Callback set and persistence flag for one topic.
///
/// The persist flag is fixed when the handler is created; later registrations
/// on the same topic only union callbacks.
pub(crate) struct TopicHandler {
    persist: bool,
    callbacks: Vec<Arc<dyn ChannelCallback>>,
}

impl TopicHandler {
    pub(crate) fn new(persist: bool) -> Self {
        Self {
            persist,
            callbacks: Vec::new(),
        }
    }

    pub(crate) fn persist(&self) -> bool {
        self.persist
    }

    /// Adds a callback unless this exact `Arc` is already registered.
    pub(crate) fn add_callback(&mut self, callback: Arc<dyn ChannelCallback>) -> bool {
        let already_registered = self
            .callbacks
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &callback));
        if already_registered {
            return false;
        }
        self.callbacks.push(callback);
        true
    }

    pub(crate) fn callbacks(&self) -> Vec<Arc<dyn ChannelCallback>> {
        self.callbacks.clone()
    }
}

/// Owner of the topic map. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub(crate) struct SharedTopicMap {
    topics: Arc<Mutex<HashMap<String, TopicHandler>>>,
}

impl SharedTopicMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Unions callbacks into the topic's handler, creating it on first use.
    /// Returns `true` when the topic itself is new.
    pub(crate) async fn union(
        &self,
        topic: &str,
        callbacks: Vec<Arc<dyn ChannelCallback>>,
        persist: bool,
    ) -> bool {
        let mut topics = self.topics.lock().await;
        let is_new = !topics.contains_key(topic);
        let handler = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicHandler::new(persist));
        for callback in callbacks {
            handler.add_callback(callback);
        }
        is_new
    }

    /// Removes a topic entirely. Returns `true` when it existed.
    pub(crate) async fn remove(&self, topic: &str) -> bool {
        self.topics.lock().await.remove(topic).is_some()
    }
}

#[async_trait]
impl TopicRegistry for SharedTopicMap {
    async fn subscriptions(&self) -> Vec<SubscriptionEntry> {
        self.topics
            .lock()
            .await
            .iter()
            .map(|(topic, handler)| SubscriptionEntry {
                topic: topic.clone(),
                persist: handler.persist(),
            })
            .collect()
    }

    async fn callbacks_for(&self, topic: &str) -> Vec<Arc<dyn ChannelCallback>> {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(TopicHandler::callbacks)
            .unwrap_or_default()
    }
}

/// Invokes every callback registered for a topic, isolating panics so one bad
/// callback cannot take down a broker's dispatch loop.
pub(crate) async fn dispatch_to_callbacks(
    registry: &dyn TopicRegistry,
    topic: &str,
    payload: &[u8],
) {
    let callbacks = registry.callbacks_for(topic).await;
    if callbacks.is_empty() {
        debug!(
            event = events::DISPATCH_NO_CALLBACKS,
            component = COMPONENT,
            topic,
            "no callbacks registered for delivered topic"
        );
        return;
    }

    for callback in callbacks {
        let outcome = AssertUnwindSafe(callback.on_message(payload))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!(
                event = events::DISPATCH_CALLBACK_PANICKED,
                component = COMPONENT,
                topic,
                "callback panicked while handling message"
            );
        }
    }
}

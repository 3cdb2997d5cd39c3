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

//! MQTT 3.1.1 broker adapter built on `rumqttc`.
//!
//! Persistent channels ride QoS 2 with a durable session, ephemeral channels
//! ride QoS 0. A dedicated worker thread drives the event loop and forwards
//! inbound publishes to the topic registry's callbacks.

use crate::config::BrokerConfig;
use crate::control_plane::broker_client::{
    backoff_delay, BrokerClient, BrokerClientError, CONFIRMATION_TIMEOUT, CONNECT_MAX_ATTEMPTS,
};
use crate::control_plane::topic_handler::{dispatch_to_callbacks, TopicRegistry};
use crate::observability::events;
use crate::runtime::worker::{spawn_worker, WorkerHandle};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "mqtt_broker";
const BROKER_KIND: &str = "mqtt3.1.1";

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CHANNEL_CAPACITY: usize = 64;

fn qos_for(persist: bool) -> QoS {
    if persist {
        QoS::ExactlyOnce
    } else {
        QoS::AtMostOnce
    }
}

fn client_id() -> String {
    format!("consort-{}", Uuid::new_v4().simple())
}

/// State shared between the client facade and its event-loop worker.
struct MqttShared {
    registry: Arc<dyn TopicRegistry>,
    connected: watch::Sender<bool>,
    unrecoverable: AtomicBool,
    // Suback confirmations resolve in arrival order; the broker acknowledges
    // subscribes in the order they were sent.
    pending_subacks: Mutex<VecDeque<oneshot::Sender<bool>>>,
    // Serializes subscribe calls so suback waiters queue in send order.
    subscribe_guard: tokio::sync::Mutex<()>,
}

impl MqttShared {
    fn resolve_suback(&self, granted: bool) {
        // An empty queue is possible when a connection loss cleared the
        // waiters and a straggler ack still arrives.
        let waiter = self
            .pending_subacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(waiter) = waiter {
            let _ = waiter.send(granted);
        }
    }

    fn fail_pending_subacks(&self) {
        self.pending_subacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

struct MqttLink {
    client: AsyncClient,
    worker: WorkerHandle,
}

/// MQTT implementation of [`BrokerClient`].
pub(crate) struct MqttBrokerClient {
    host: String,
    port: u16,
    username: String,
    password: String,
    shared: Arc<MqttShared>,
    link: tokio::sync::Mutex<Option<MqttLink>>,
}

impl MqttBrokerClient {
    pub(crate) fn new(config: &BrokerConfig, registry: Arc<dyn TopicRegistry>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            host: config.host.clone(),
            port: config.port(),
            username: config.username.clone(),
            password: config.password.clone(),
            shared: Arc::new(MqttShared {
                registry,
                connected,
                unrecoverable: AtomicBool::new(false),
                pending_subacks: Mutex::new(VecDeque::new()),
                subscribe_guard: tokio::sync::Mutex::new(()),
            }),
            link: tokio::sync::Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(client_id(), self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(false);
        if !self.username.is_empty() {
            options.set_credentials(self.username.clone(), self.password.clone());
        }
        options
    }

    async fn current_client(&self) -> Option<AsyncClient> {
        self.link.lock().await.as_ref().map(|link| link.client.clone())
    }
}

/// Polls until the broker acknowledges the connection. A refused connection
/// surfaces as `ConnectionError::ConnectionRefused` from the poll itself.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Re-issues every tracked subscription after a reconnect. Each subscribe
/// queues a placeholder confirmation waiter, so the broker's acks stay
/// aligned with any user subscribe racing this restore; nobody reads the
/// placeholder results.
async fn restore_subscriptions(client: AsyncClient, shared: Arc<MqttShared>) {
    let _ordered = shared.subscribe_guard.lock().await;
    for entry in shared.registry.subscriptions().await {
        debug!(
            event = events::BROKER_RESUBSCRIBE,
            component = COMPONENT,
            topic = %entry.topic,
            "restoring subscription after reconnect"
        );
        let (tx, _discarded) = oneshot::channel();
        shared
            .pending_subacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(tx);
        if let Err(e) = client.subscribe(&entry.topic, qos_for(entry.persist)).await {
            shared
                .pending_subacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_back();
            warn!(
                event = events::BROKER_SUBSCRIBE_FAILED,
                component = COMPONENT,
                topic = %entry.topic,
                err = %e,
                "resubscribe request could not be queued"
            );
        }
    }
}

/// Drives the event loop until shutdown, an unrecoverable failure, or loss of
/// the dispatch side. Inbound publishes cross to a dispatch task over a
/// channel so slow callbacks never stall the protocol state machine.
async fn run_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    shared: Arc<MqttShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();

    let poll = async {
        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        failures = 0;
                        shared.connected.send_replace(true);
                        // Restoring runs beside the poll loop: subscribe can
                        // wait on request-channel capacity, and only this
                        // loop drains that channel.
                        tokio::spawn(restore_subscriptions(client.clone(), shared.clone()));
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        let granted = ack
                            .return_codes
                            .iter()
                            .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                        if !granted {
                            warn!(
                                event = events::BROKER_SUBSCRIBE_FAILED,
                                component = COMPONENT,
                                broker = BROKER_KIND,
                                "broker rejected a subscription"
                            );
                        }
                        shared.resolve_suback(granted);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if inbound_tx
                            .send((publish.topic, publish.payload.to_vec()))
                            .is_err()
                        {
                            warn!(
                                event = events::DISPATCH_QUEUE_CLOSED,
                                component = COMPONENT,
                                broker = BROKER_KIND,
                                "dispatch side gone, stopping event loop"
                            );
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        shared.connected.send_replace(false);
                        shared.fail_pending_subacks();
                        failures += 1;
                        let refused = matches!(e, ConnectionError::ConnectionRefused(_));
                        if refused || failures >= CONNECT_MAX_ATTEMPTS {
                            shared.unrecoverable.store(true, Ordering::SeqCst);
                            error!(
                                event = events::BROKER_UNRECOVERABLE,
                                component = COMPONENT,
                                broker = BROKER_KIND,
                                err = %e,
                                "giving up on broker connection"
                            );
                            break;
                        }
                        warn!(
                            event = events::BROKER_CONNECTION_LOST,
                            component = COMPONENT,
                            broker = BROKER_KIND,
                            attempt = failures,
                            err = %e,
                            "connection lost, backing off before retry"
                        );
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(backoff_delay(failures)) => {}
                        }
                    }
                }
            }
        }
        drop(inbound_tx);
    };

    let dispatch = async {
        while let Some((topic, payload)) = inbound_rx.recv().await {
            dispatch_to_callbacks(shared.registry.as_ref(), &topic, &payload).await;
        }
    };

    tokio::join!(poll, dispatch);
    shared.connected.send_replace(false);
}

#[async_trait]
impl BrokerClient for MqttBrokerClient {
    async fn connect(&self) -> Result<(), BrokerClientError> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Ok(());
        }

        let options = self.options();
        let mut last_error = String::new();
        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            debug!(
                event = events::BROKER_CONNECT_ATTEMPT,
                component = COMPONENT,
                broker = BROKER_KIND,
                attempt,
                "connecting to broker"
            );
            let (client, mut eventloop) =
                AsyncClient::new(options.clone(), REQUEST_CHANNEL_CAPACITY);
            match tokio::time::timeout(CONFIRMATION_TIMEOUT, await_connack(&mut eventloop)).await {
                Ok(Ok(())) => {
                    let shared = self.shared.clone();
                    let loop_client = client.clone();
                    let worker = spawn_worker("consort-mqtt", move |shutdown| {
                        run_loop(loop_client, eventloop, shared, shutdown)
                    });
                    self.shared.connected.send_replace(true);
                    info!(
                        event = events::BROKER_CONNECT_OK,
                        component = COMPONENT,
                        broker = BROKER_KIND,
                        attempt,
                        "broker connection established"
                    );
                    *link = Some(MqttLink { client, worker });
                    return Ok(());
                }
                Ok(Err(ConnectionError::ConnectionRefused(code))) => {
                    // The broker answered and said no. Retrying cannot change
                    // its mind, so fail permanently right away.
                    self.shared.unrecoverable.store(true, Ordering::SeqCst);
                    let detail = format!("broker refused the connection: {code:?}");
                    error!(
                        event = events::BROKER_CONNECT_EXHAUSTED,
                        component = COMPONENT,
                        broker = BROKER_KIND,
                        err = %detail,
                        "broker rejected credentials or session"
                    );
                    return Err(BrokerClientError::ConnectionFailed {
                        attempts: attempt,
                        detail,
                    });
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = "timed out waiting for broker acknowledgement".to_string();
                }
            }
            warn!(
                event = events::BROKER_CONNECT_FAILED,
                component = COMPONENT,
                broker = BROKER_KIND,
                attempt,
                err = %last_error,
                "connect attempt failed"
            );
            if attempt < CONNECT_MAX_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        self.shared.unrecoverable.store(true, Ordering::SeqCst);
        error!(
            event = events::BROKER_CONNECT_EXHAUSTED,
            component = COMPONENT,
            broker = BROKER_KIND,
            attempts = CONNECT_MAX_ATTEMPTS,
            "all connect attempts failed"
        );
        Err(BrokerClientError::ConnectionFailed {
            attempts: CONNECT_MAX_ATTEMPTS,
            detail: last_error,
        })
    }

    async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        self.shared.connected.send_replace(false);
        if let Some(MqttLink { client, worker }) = link.take() {
            let _ = client.disconnect().await;
            worker.stop().await;
        }
        info!(
            event = events::BROKER_DISCONNECT,
            component = COMPONENT,
            broker = BROKER_KIND,
            "broker connection closed"
        );
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        persist: bool,
    ) -> Result<(), BrokerClientError> {
        if !self.is_connected() {
            return Err(BrokerClientError::NotConnected);
        }
        let client = self
            .current_client()
            .await
            .ok_or(BrokerClientError::NotConnected)?;
        client
            .publish(topic, qos_for(persist), false, payload.to_vec())
            .await
            .map_err(|e| BrokerClientError::PublishFailed {
                detail: e.to_string(),
            })
    }

    async fn subscribe(&self, topic: &str, persist: bool) -> Result<(), BrokerClientError> {
        let client = self
            .current_client()
            .await
            .ok_or(BrokerClientError::NotConnected)?;

        let confirmation = {
            let _ordered = self.shared.subscribe_guard.lock().await;
            let (tx, rx) = oneshot::channel();
            self.shared
                .pending_subacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(tx);
            if let Err(e) = client.subscribe(topic, qos_for(persist)).await {
                self.shared
                    .pending_subacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_back();
                return Err(BrokerClientError::SubscribeFailed {
                    topic: topic.to_string(),
                    detail: e.to_string(),
                });
            }
            rx
        };

        let granted = match tokio::time::timeout(CONFIRMATION_TIMEOUT, confirmation).await {
            Ok(Ok(granted)) => granted,
            Ok(Err(_)) => {
                return Err(BrokerClientError::SubscribeFailed {
                    topic: topic.to_string(),
                    detail: "connection dropped before confirmation".to_string(),
                })
            }
            Err(_) => {
                return Err(BrokerClientError::SubscribeFailed {
                    topic: topic.to_string(),
                    detail: "timed out waiting for confirmation".to_string(),
                })
            }
        };

        if !granted {
            return Err(BrokerClientError::SubscribeFailed {
                topic: topic.to_string(),
                detail: "broker rejected the subscription".to_string(),
            });
        }
        debug!(
            event = events::BROKER_SUBSCRIBE_OK,
            component = COMPONENT,
            broker = BROKER_KIND,
            topic,
            persist,
            "subscription confirmed"
        );
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) {
        if let Some(client) = self.current_client().await {
            if let Err(e) = client.unsubscribe(topic).await {
                debug!(
                    event = events::BROKER_SUBSCRIBE_FAILED,
                    component = COMPONENT,
                    broker = BROKER_KIND,
                    topic,
                    err = %e,
                    "unsubscribe request could not be queued"
                );
            }
        }
    }

    fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    fn considered_unrecoverable(&self) -> bool {
        self.shared.unrecoverable.load(Ordering::SeqCst)
    }
}

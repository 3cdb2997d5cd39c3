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

//! # consort-runtime
//!
//! `consort-runtime` is the client-side runtime of a system of addressable
//! services. A [`Service`] registers capabilities behind one hierarchy
//! address and answers requests on its `request` channel; a [`Client`] is a
//! throwaway identity that sends requests and reacts to replies. Both speak
//! the same wire envelopes over pluggable brokers, and both can route large
//! payloads through data stores instead of the message body.
//!
//! Typical usage is API-first and remains centered on [`Service`],
//! [`Client`], and [`CapabilityBuilder`]. Internal modules are organized by
//! domain layer to keep behavior ownership explicit.
//!
//! ## Hosting a service
//!
//! ```
//! use consort_runtime::{
//!     BrokerConfig, BrokerProtocol, CapabilityBuilder, Hierarchy, OperationConfig, Service,
//!     ServiceConfig,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! # use std::sync::Arc;
//! # use async_trait::async_trait;
//! # use consort_runtime::{
//! #     BrokerClient, BrokerClientError, BrokerClientFactory, ConfigError, TopicRegistry,
//! # };
//! #
//! # struct MockBroker;
//! #
//! # #[async_trait]
//! # impl BrokerClient for MockBroker {
//! #     async fn connect(&self) -> Result<(), BrokerClientError> {
//! #         Ok(())
//! #     }
//! #
//! #     async fn disconnect(&self) {}
//! #
//! #     async fn publish(
//! #         &self,
//! #         _topic: &str,
//! #         _payload: &[u8],
//! #         _persist: bool,
//! #     ) -> Result<(), BrokerClientError> {
//! #         Ok(())
//! #     }
//! #
//! #     async fn subscribe(&self, _topic: &str, _persist: bool) -> Result<(), BrokerClientError> {
//! #         Ok(())
//! #     }
//! #
//! #     async fn unsubscribe(&self, _topic: &str) {}
//! #
//! #     fn is_connected(&self) -> bool {
//! #         true
//! #     }
//! #
//! #     fn considered_unrecoverable(&self) -> bool {
//! #         false
//! #     }
//! # }
//! #
//! # struct MockFactory;
//! #
//! # impl BrokerClientFactory for MockFactory {
//! #     fn build(
//! #         &self,
//! #         _config: &BrokerConfig,
//! #         _registry: Arc<dyn TopicRegistry>,
//! #     ) -> Result<Arc<dyn BrokerClient>, ConfigError> {
//! #         Ok(Arc::new(MockBroker))
//! #     }
//! # }
//!
//! #[derive(Deserialize)]
//! struct Increment {
//!     by: i64,
//! }
//!
//! #[derive(Serialize)]
//! struct Count {
//!     total: i64,
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = ServiceConfig {
//!     hierarchy: Hierarchy::new("acme", "plant-one", "conveyor", None, "counter").unwrap(),
//!     brokers: vec![BrokerConfig {
//!         protocol: BrokerProtocol::Mqtt,
//!         host: "127.0.0.1".to_string(),
//!         port: None,
//!         username: "guest".to_string(),
//!         password: "guest".to_string(),
//!     }],
//!     data_stores: Default::default(),
//!     status_interval_seconds: 300,
//! };
//!
//! let counter = CapabilityBuilder::new("Counter")
//!     .operation("increment", OperationConfig::default(), |req: Increment| {
//!         Ok(Count { total: req.by + 1 })
//!     })
//!     .unwrap()
//!     .declare_event("threshold-crossed")
//!     .build();
//!
//! let service =
//!     Service::with_broker_factory(config, vec![counter], Vec::new(), &MockFactory).unwrap();
//! service.startup().await.unwrap();
//! assert!(service.is_connected());
//!
//! let emitter = service.event_emitter();
//! emitter
//!     .emit("Counter", "threshold-crossed", serde_json::json!({"at": 100}))
//!     .unwrap();
//!
//! service.shutdown("demo complete").await;
//! # });
//! ```
//!
//! ## Running a client session
//!
//! A client takes its initial requests up front; every matched reply runs the
//! message callback, whose [`ClientDirective`] drives what happens next.
//!
//! ```no_run
//! use std::sync::Arc;
//! use consort_runtime::{
//!     load_json5, Client, ClientConfig, ClientDirective, ContentType, DataHandler, DirectRequest,
//!     Hierarchy,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config: ClientConfig = load_json5(std::path::Path::new("client-config.json5")).unwrap();
//! let destination = Hierarchy::new("acme", "plant-one", "conveyor", None, "counter").unwrap();
//!
//! let client = Client::new(
//!     config,
//!     vec![DirectRequest {
//!         destination,
//!         operation: "Counter.increment".to_string(),
//!         payload: serde_json::json!({"by": 1}),
//!         content_type: ContentType::Json,
//!         data_handler: DataHandler::Message,
//!     }],
//!     Arc::new(|outcome| {
//!         println!("{} answered: {}", outcome.source.dotted(), outcome.payload);
//!         ClientDirective::Terminate
//!     }),
//!     None,
//!     Vec::new(),
//! )
//! .unwrap();
//!
//! client.startup().await.unwrap();
//! client.run_until_terminated().await;
//! # });
//! ```
//!
//! ## Internal architecture map
//!
//! - API facade: outward [`Service`] / [`Client`] / [`CapabilityBuilder`] surface
//! - Addressing: hierarchy addresses and their channel topics
//! - Control plane: broker adapters, the topic registry, and connected-state fan-out
//! - Data plane: payload indirection through registered data stores
//! - Protocol: wire envelopes, reply texts, and version compatibility
//! - Runtime: the courier, the dispatch pipeline, and worker boundaries
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events.
//! Library code emits events/spans and does not unconditionally initialize a global
//! subscriber. Binaries and tests are responsible for one-time
//! `tracing_subscriber` initialization at process boundaries.

mod addressing;
pub use addressing::{AddressError, Channel, Hierarchy};

mod config;
pub use config::{
    load_json5, BrokerConfig, BrokerProtocol, ClientConfig, ConfigError, DataStoreConfig,
    DataStoreConfigMap, ServiceConfig,
};

mod control_plane;
pub use control_plane::broker_client::{BrokerClient, BrokerClientError, BrokerClientFactory};
pub use control_plane::manager::{ControlPlaneError, ControlPlaneManager, DefaultBrokerFactory};
pub use control_plane::topic_handler::{ChannelCallback, SubscriptionEntry, TopicRegistry};

mod data_plane;
pub use data_plane::{DataPlaneError, DataStore, DataStoreError, StorePointer};

mod external_request;
pub use external_request::{DirectRequest, RequestOutcome, ResponseHandler};

#[doc(hidden)]
pub mod observability;

mod protocol;
pub use protocol::event::{create_event_message, EventHeader, EventMessage};
pub use protocol::lifecycle::{
    create_lifecycle_message, LifecycleHeader, LifecycleMessage, LifecycleType,
};
pub use protocol::userspace::{create_userspace_message, UserspaceHeader, UserspaceMessage};
pub use protocol::version::{check_compatibility, VersionError, SDK_VERSION};
pub use protocol::{ContentType, DataHandler};

mod runtime;
pub use runtime::capability::{Capability, CapabilityBuilder, OperationConfig, RegistrationError};
pub use runtime::client::{
    Client, ClientDirective, ClientError, EventCallback, EventNotice, MessageCallback,
};
pub use runtime::courier::RequestError;
pub use runtime::service::{EventEmitter, EventError, Service, ServiceError};

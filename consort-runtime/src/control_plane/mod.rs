//! Broker connection layer.
//!
//! Owns the channel-topic registry, the broker adapters, and connected-state
//! fan-out. Subscriptions registered here transcend any single connection:
//! they are applied to every broker endpoint on connect and restored after a
//! reconnect, and published messages carry identical bytes to every endpoint.
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use consort_runtime::{
//!     BrokerClient, BrokerClientError, BrokerClientFactory, BrokerConfig, BrokerProtocol,
//!     ConfigError, ControlPlaneManager, TopicRegistry,
//! };
//!
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
//! #
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let configs = vec![BrokerConfig {
//!     protocol: BrokerProtocol::Mqtt,
//!     host: "127.0.0.1".to_string(),
//!     port: None,
//!     username: "guest".to_string(),
//!     password: "guest".to_string(),
//! }];
//! let manager = ControlPlaneManager::new(&configs, &MockFactory).unwrap();
//!
//! // Topics registered before connecting are applied during connect.
//! manager
//!     .add_subscription_channel("acme/plant-one/conveyor/-/motor/request", Vec::new(), true)
//!     .await
//!     .unwrap();
//! manager.connect().await.unwrap();
//! assert!(manager.is_connected());
//! # });
//! ```

pub(crate) mod amqp;
pub(crate) mod broker_client;
pub(crate) mod manager;
pub(crate) mod mqtt;
pub(crate) mod topic_handler;

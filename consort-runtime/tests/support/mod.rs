use async_trait::async_trait;
use consort_runtime::{
    BrokerClient, BrokerClientError, BrokerClientFactory, BrokerConfig, BrokerProtocol,
    ClientConfig, ConfigError, Hierarchy, ServiceConfig, TopicRegistry,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// In-memory broker backbone. Every publish is recorded immediately and then
/// delivered to the topic callbacks of every attached endpoint, so a service
/// and a client built over the same bus talk to each other without a real
/// broker. Delivery runs on its own task: a publish returns before its
/// message reaches any callback, like with a real broker.
pub(crate) struct LoopbackBus {
    endpoints: Mutex<Vec<Arc<dyn TopicRegistry>>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    deliveries: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl LoopbackBus {
    pub(crate) fn new() -> Arc<Self> {
        let (deliveries, mut pending) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let bus = Arc::new(Self {
            endpoints: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            deliveries,
        });
        // One drainer keeps deliveries in publish order.
        let drainer = Arc::downgrade(&bus);
        tokio::spawn(async move {
            while let Some((topic, payload)) = pending.recv().await {
                let Some(bus) = drainer.upgrade() else {
                    break;
                };
                bus.fan_out(&topic, &payload).await;
            }
        });
        bus
    }

    fn attach(&self, registry: Arc<dyn TopicRegistry>) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registry);
    }

    /// Hands raw bytes to every callback registered for the topic, as if a
    /// foreign peer had published them.
    #[allow(dead_code)]
    pub(crate) async fn inject(&self, topic: &str, payload: &[u8]) {
        self.fan_out(topic, payload).await;
    }

    async fn fan_out(&self, topic: &str, payload: &[u8]) {
        let endpoints: Vec<Arc<dyn TopicRegistry>> = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for registry in endpoints {
            for callback in registry.callbacks_for(topic).await {
                callback.on_message(payload).await;
            }
        }
    }

    fn deliver(&self, topic: &str, payload: &[u8]) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic.to_string(), payload.to_vec()));
        let _ = self.deliveries.send((topic.to_string(), payload.to_vec()));
    }

    pub(crate) fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(published_topic, _)| published_topic == topic)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }
}

pub(crate) struct LoopbackBroker {
    bus: Arc<LoopbackBus>,
    connected: AtomicBool,
}

#[async_trait]
impl BrokerClient for LoopbackBroker {
    async fn connect(&self) -> Result<(), BrokerClientError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        _persist: bool,
    ) -> Result<(), BrokerClientError> {
        self.bus.deliver(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, _topic: &str, _persist: bool) -> Result<(), BrokerClientError> {
        Ok(())
    }

    async fn unsubscribe(&self, _topic: &str) {}

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn considered_unrecoverable(&self) -> bool {
        false
    }
}

pub(crate) struct LoopbackFactory {
    bus: Arc<LoopbackBus>,
}

impl LoopbackFactory {
    pub(crate) fn new(bus: &Arc<LoopbackBus>) -> Self {
        Self { bus: bus.clone() }
    }
}

impl BrokerClientFactory for LoopbackFactory {
    fn build(
        &self,
        _config: &BrokerConfig,
        registry: Arc<dyn TopicRegistry>,
    ) -> Result<Arc<dyn BrokerClient>, ConfigError> {
        self.bus.attach(registry);
        Ok(Arc::new(LoopbackBroker {
            bus: self.bus.clone(),
            connected: AtomicBool::new(false),
        }))
    }
}

fn broker_config() -> BrokerConfig {
    BrokerConfig {
        protocol: BrokerProtocol::Mqtt,
        host: "127.0.0.1".to_string(),
        port: None,
        username: "guest".to_string(),
        password: "guest".to_string(),
    }
}

pub(crate) fn service_address() -> Hierarchy {
    Hierarchy::new("acme", "plant-one", "conveyor", None, "counter")
        .expect("service address should validate")
}

pub(crate) fn service_config() -> ServiceConfig {
    ServiceConfig {
        hierarchy: service_address(),
        brokers: vec![broker_config()],
        data_stores: Default::default(),
        status_interval_seconds: 300,
    }
}

#[allow(dead_code)]
pub(crate) fn client_config() -> ClientConfig {
    ClientConfig {
        brokers: vec![broker_config()],
        data_stores: Default::default(),
        terminate_after_initial_messages: false,
        resend_initial_messages_on_secondary_startup: false,
    }
}

/// Polls the condition until it holds or the deadline passes.
#[allow(dead_code)]
pub(crate) async fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

//! Shared test harness: a hub bound to an ephemeral port plus helpers for
//! building registrations and messages.

use a2a_hub::config::HubConfig;
use a2a_hub::hub::{Hub, server};
use a2a_hub::messages::{AgentRegistration, Message, MessageMetadata, Priority, Subscription};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running hub listening on an OS-assigned port
pub struct TestHub {
    pub hub: Arc<Hub>,
    pub addr: SocketAddr,
    pub base_url: String,
    server_handle: JoinHandle<()>,
}

impl TestHub {
    /// Starts a hub with the testing preset
    pub async fn start() -> Self {
        Self::start_with(HubConfig::testing()).await
    }

    /// Starts a hub with a custom configuration (port is forced to 0)
    pub async fn start_with(mut config: HubConfig) -> Self {
        config.port = 0;
        let hub = Hub::new(config);
        hub.start_background_tasks();

        let (listener, addr) = server::start_server(&hub).await.expect("bind failed");
        let app = server::create_app(hub.clone());
        let server_handle = tokio::spawn(async move {
            let _ = server::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            hub,
            addr,
            server_handle,
        }
    }

    /// WebSocket URL of this hub
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.hub.shutdown();
        self.server_handle.abort();
    }
}

/// A registration subscribing to every message type on `topic`
pub fn registration(agent_id: &str, topic: &str) -> AgentRegistration {
    AgentRegistration {
        agent_id: agent_id.to_string(),
        agent_type: "test-agent".to_string(),
        capabilities: vec!["testing".to_string()],
        subscriptions: vec![Subscription::all_types(topic)],
        endpoint: String::new(),
        heartbeat_interval: 30_000,
    }
}

/// A registration with no subscriptions
pub fn bare_registration(agent_id: &str) -> AgentRegistration {
    AgentRegistration {
        subscriptions: vec![],
        ..registration(agent_id, "unused-topic")
    }
}

/// A valid message for `topic` with the given id
pub fn message(id: &str, topic: &str, message_type: &str) -> Message {
    Message {
        id: id.to_string(),
        timestamp: Utc::now(),
        source_agent: "svc".to_string(),
        target_agent: None,
        topic: topic.to_string(),
        message_type: message_type.to_string(),
        priority: Priority::Normal,
        payload: serde_json::json!({"x": 1}),
        metadata: MessageMetadata::new("c1"),
    }
}

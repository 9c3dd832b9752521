//! # A2A Hub - Agent-to-Agent Communication Hub
//!
//! A centralized pub/sub messaging broker connecting autonomous software
//! agents. Agents register over HTTP, attach a bidirectional WebSocket
//! stream, and exchange typed messages on topics. The hub validates,
//! stores, and rule-routes every message, delivering to online recipients
//! over their streams and queueing for offline ones, with a delivery
//! receipt per recipient.
//!
//! ## Core components
//!
//! - [`hub::Hub`]: transport endpoints, connected-agent table, history,
//!   heartbeat and cleanup timers
//! - [`router::MessageRouter`]: recipient determination, the routing-rule
//!   pipeline, per-agent FIFO queues
//! - [`client::HubClient`]: the co-designed agent-side library with
//!   supervised reconnection and HTTP fallback
//! - [`validation`] / [`serialization`]: message checking and the
//!   canonical wire form
//!
//! ## Example
//!
//! ```rust,no_run
//! use a2a_hub::config::HubConfig;
//! use a2a_hub::hub::{Hub, server};
//!
//! # #[tokio::main]
//! # async fn main() -> std::io::Result<()> {
//! let hub = Hub::new(HubConfig::development());
//! hub.start_background_tasks();
//! let (listener, addr) = server::start_server(&hub).await?;
//! println!("hub listening on {addr}");
//! server::serve(listener, server::create_app(hub)).await
//! # }
//! ```

pub mod client;
pub mod config;
pub mod domain_types;
pub mod error;
pub mod events;
pub mod hub;
pub mod messages;
pub mod router;
pub mod serialization;
pub mod validation;

pub use client::{HandlerOutcome, HubClient, HubClientConfig, MessageHandler};
pub use config::HubConfig;
pub use error::{HubError, SerializationError};
pub use events::{ClientEvent, HubEvent};
pub use hub::Hub;
pub use messages::{
    AgentRegistration, DeliveryReceipt, DeliveryStatus, Message, MessageMetadata, Priority,
    RetentionPolicy, Subscription, TopicDefinition,
};
pub use router::{MessageRouter, RouterStats};
pub use validation::{MessageValidator, ValidationReport, sanitize_payload};

//! Connected-agent table
//!
//! One entry per registered agent, carrying at most one live stream. A new
//! stream supersedes the previous one, which is told to close; detaching
//! keeps the entry (and the agent's queue) until explicit unregistration or
//! heartbeat eviction.

use crate::messages::{DeliveryReceipt, Message};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Frames the hub pushes to a connected agent's writer task
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A routed message for the agent
    Message(Box<Message>),
    /// Acknowledgement of a stream publish
    Receipt {
        /// Id of the published message
        message_id: String,
        /// First recipient's receipt
        receipt: DeliveryReceipt,
    },
    /// A protocol or validation error
    Error {
        /// Human-readable description
        message: String,
    },
    /// Instructs the writer task to close the socket
    Close {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Sender half of an agent's outbound frame channel
pub type FrameSender = mpsc::UnboundedSender<OutboundFrame>;

struct AgentConnection {
    sender: Option<FrameSender>,
    /// Incremented on every attach so a superseded socket task cannot
    /// detach its successor
    epoch: u64,
    last_heartbeat: Instant,
    connected_at: Option<DateTime<Utc>>,
}

/// Summary row returned by `GET /agents`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    /// The agent
    pub agent_id: String,
    /// Whether a live stream is attached
    pub attached: bool,
    /// Messages waiting in the agent's queue
    pub queue_depth: usize,
    /// Milliseconds since the last sign of life
    pub last_heartbeat_age_ms: u64,
}

/// The connected-agent table
#[derive(Default)]
pub struct ConnectionTable {
    table: DashMap<String, AgentConnection>,
}

impl ConnectionTable {
    /// Creates an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the entry for a freshly registered agent
    pub fn ensure_entry(&self, agent_id: &str) {
        self.table
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentConnection {
                sender: None,
                epoch: 0,
                last_heartbeat: Instant::now(),
                connected_at: None,
            });
    }

    /// Attaches a stream, superseding any previous one
    ///
    /// Returns the new attach epoch and, when a stream was already live,
    /// its sender so the caller can tell it to close.
    pub fn attach(&self, agent_id: &str, sender: FrameSender) -> (u64, Option<FrameSender>) {
        let mut entry = self
            .table
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentConnection {
                sender: None,
                epoch: 0,
                last_heartbeat: Instant::now(),
                connected_at: None,
            });
        let superseded = entry.sender.replace(sender);
        entry.epoch += 1;
        entry.last_heartbeat = Instant::now();
        entry.connected_at = Some(Utc::now());
        (entry.epoch, superseded)
    }

    /// Clears the stream reference if `epoch` still owns it
    ///
    /// Returns true when this call actually detached the stream.
    pub fn detach(&self, agent_id: &str, epoch: u64) -> bool {
        let Some(mut entry) = self.table.get_mut(agent_id) else {
            return false;
        };
        if entry.epoch != epoch || entry.sender.is_none() {
            return false;
        }
        entry.sender = None;
        entry.connected_at = None;
        true
    }

    /// Drops the stream reference regardless of epoch, returning the
    /// sender so the caller can push a close frame
    pub fn force_detach(&self, agent_id: &str) -> Option<FrameSender> {
        let mut entry = self.table.get_mut(agent_id)?;
        entry.connected_at = None;
        entry.sender.take()
    }

    /// Removes the entry entirely (explicit unregistration)
    pub fn remove(&self, agent_id: &str) -> Option<FrameSender> {
        self.table
            .remove(agent_id)
            .and_then(|(_, entry)| entry.sender)
    }

    /// Refreshes the agent's liveness timestamp
    pub fn heartbeat(&self, agent_id: &str) {
        if let Some(mut entry) = self.table.get_mut(agent_id) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// Sends a frame to the agent's live stream, if any
    pub fn send(&self, agent_id: &str, frame: OutboundFrame) -> bool {
        let Some(entry) = self.table.get(agent_id) else {
            return false;
        };
        entry
            .sender
            .as_ref()
            .is_some_and(|sender| sender.send(frame).is_ok())
    }

    /// Sender of the agent's live stream, if attached
    #[must_use]
    pub fn sender(&self, agent_id: &str) -> Option<FrameSender> {
        self.table.get(agent_id).and_then(|e| e.sender.clone())
    }

    /// Whether the agent has a live stream
    #[must_use]
    pub fn is_attached(&self, agent_id: &str) -> bool {
        self.table.get(agent_id).is_some_and(|e| e.sender.is_some())
    }

    /// Entries in the table (registered agents)
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no agents are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Agents with a live stream
    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.table.iter().filter(|e| e.sender.is_some()).count()
    }

    /// Attached agents whose last heartbeat is older than `max_idle`
    #[must_use]
    pub fn stale_agents(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        self.table
            .iter()
            .filter(|entry| {
                entry.sender.is_some()
                    && now.duration_since(entry.last_heartbeat) > max_idle
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Every attached agent's sender, for shutdown broadcast
    #[must_use]
    pub fn all_senders(&self) -> Vec<FrameSender> {
        self.table
            .iter()
            .filter_map(|entry| entry.sender.clone())
            .collect()
    }

    /// Summary rows with queue depths supplied by the caller
    #[must_use]
    pub fn summaries(&self, queue_depth: impl Fn(&str) -> usize) -> Vec<AgentSummary> {
        let now = Instant::now();
        let mut rows: Vec<AgentSummary> = self
            .table
            .iter()
            .map(|entry| AgentSummary {
                agent_id: entry.key().clone(),
                attached: entry.sender.is_some(),
                queue_depth: queue_depth(entry.key()),
                last_heartbeat_age_ms: u64::try_from(
                    now.duration_since(entry.last_heartbeat).as_millis(),
                )
                .unwrap_or(u64::MAX),
            })
            .collect();
        rows.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        rows
    }
}

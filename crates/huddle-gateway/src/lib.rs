//! WebSocket push channel: handshake, heartbeat, and inbound command relay.
//! Outbound traffic is whatever the shared `SessionRegistry` queues for the
//! connection's room.

pub mod commands;
pub mod connection;

use std::sync::Arc;
use std::time::Duration;

use huddle_core::{DeliveryCoordinator, SessionRegistry, TokenValidator};

use crate::commands::CommandTable;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long an unauthenticated socket may take to send `identify`
    pub handshake_timeout: Duration,
    /// Server ping cadence
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered pings before the connection is dropped
    pub max_missed_heartbeats: u8,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            max_missed_heartbeats: 2,
        }
    }
}

/// Everything a connection task needs, cheap to clone per socket.
#[derive(Clone)]
pub struct Gateway {
    pub registry: SessionRegistry,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub validator: Arc<TokenValidator>,
    pub config: GatewayConfig,
    commands: Arc<CommandTable>,
}

impl Gateway {
    pub fn new(
        registry: SessionRegistry,
        coordinator: Arc<DeliveryCoordinator>,
        validator: Arc<TokenValidator>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            coordinator,
            validator,
            config,
            commands: Arc::new(CommandTable::new()),
        }
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }
}

//! Command-line and environment configuration

use std::time::Duration;

use clap::Parser;

pub const DEFAULT_SIGNALING_ADDR: &str = "0.0.0.0:10010";

/// Runtime settings for the signaling server
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Capacity of each peer's outbound event queue
    pub outbound_queue_capacity: usize,
    /// Capacity of the room service command queue
    pub command_queue_capacity: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    /// How long a fresh connection may take to send its join payload
    pub join_timeout: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            command_queue_capacity: 1024,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "peerdrop", version, about = "WebRTC signaling relay")]
pub struct Config {
    /// Address serving GET /auth and WebSocket joins on /rooms/{room}/users/{uid}
    #[arg(long, env = "PEERDROP_SIGNALING_ADDR", default_value = DEFAULT_SIGNALING_ADDR)]
    pub signaling_addr: String,

    #[arg(long, env = "PEERDROP_OUTBOUND_QUEUE", default_value_t = 256)]
    pub outbound_queue: usize,

    #[arg(long, env = "PEERDROP_COMMAND_QUEUE", default_value_t = 1024)]
    pub command_queue: usize,

    #[arg(long, env = "PEERDROP_PING_INTERVAL_SECS", default_value_t = 30)]
    pub ping_interval_secs: u64,

    #[arg(long, env = "PEERDROP_PONG_TIMEOUT_SECS", default_value_t = 10)]
    pub pong_timeout_secs: u64,

    #[arg(long, env = "PEERDROP_JOIN_TIMEOUT_SECS", default_value_t = 10)]
    pub join_timeout_secs: u64,
}

impl Config {
    pub fn signaling(&self) -> SignalingConfig {
        SignalingConfig {
            outbound_queue_capacity: self.outbound_queue.max(1),
            command_queue_capacity: self.command_queue.max(1),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
            join_timeout: Duration::from_secs(self.join_timeout_secs),
        }
    }
}

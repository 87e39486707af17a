//! WebSocket signaling relay: per-room presence and peer-to-peer message relay

mod actor;
mod directory;
mod messages;
mod presence;
mod router;
mod server;
mod service;
mod types;

pub use actor::RoomServiceHandle;
pub use messages::{AuthInfo, OpaqueMap, RelayRequest, ServerMessage};
pub use server::SignalingServer;
pub use service::{Joined, RoomService};
pub use types::{
    OutboundMessage, PeerId, PeerSender, RegistryStats, RoomId, SessionId, SignalingError,
};

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::messages::AuthInfo;

/// Signaling relay errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("peer identifier already in use: {0}")]
    DuplicateIdentifier(PeerId),

    #[error("malformed join payload: {0}")]
    MalformedJoinPayload(#[source] serde_json::Error),

    #[error("malformed relay payload: {0}")]
    MalformedRelayPayload(#[source] serde_json::Error),

    #[error("no join payload received within {0:?}")]
    JoinTimeout(std::time::Duration),

    #[error("channel terminated")]
    ChannelTerminated,

    #[error("internal error: {0}")]
    Internal(String),
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self(Arc::from(""))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(Arc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(Arc::from(s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }
    };
}

string_id! {
    /// Peer identifier, self-reported by the client in the join path.
    PeerId
}

string_id! {
    /// Room identifier from the join path (percent-decoded, otherwise verbatim).
    RoomId
}

/// Wrapper for outbound WebSocket text frames.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    /// Get the inner Utf8Bytes for ws Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Sending half of a peer's bounded outbound queue.
pub type PeerSender = mpsc::Sender<OutboundMessage>;

/// Distinguishes successive connections that reuse the same peer id
pub type SessionId = u64;

#[derive(Debug)]
pub(crate) struct PeerState {
    pub auth: AuthInfo,
    /// Bounded queue drained by the peer's writer task.
    /// OutboundMessage clones share the same buffer, so fan-out is cheap.
    pub tx: PeerSender,
    pub room: RoomId,
    pub session: SessionId,
}

impl PeerState {
    /// Queue a message without waiting.
    ///
    /// Returns false when the queue is full; the caller evicts the peer so
    /// its client reconnects with a fresh roster instead of a gap.
    #[must_use]
    pub fn deliver(&self, id: &PeerId, msg: OutboundMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, evicting", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbound queue closed for {}", id);
                true
            }
        }
    }
}

/// Snapshot of registry sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub peers: usize,
    pub rooms: usize,
}

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::types::{OutboundMessage, PeerId};

/// Opaque JSON object passed through the relay untouched.
pub type OpaqueMap = Map<String, Value>;

/// Missing and `null` fields both decode to the type's default
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Metadata a peer sends as its first frame after the upgrade.
///
/// Every field is optional on the wire. An absent or `null` connection info
/// is forwarded to the room as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub avatar_url: String,
    #[serde(default)]
    pub webrtc_connection_info: Option<OpaqueMap>,
}

/// Every frame after the join payload: relay `message` to peer `uid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub uid: PeerId,
    #[serde(default)]
    pub message: Option<OpaqueMap>,
}

/// Events pushed from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    /// A peer is present in the room (broadcast on join, and the roster sent to a newcomer)
    #[serde(rename = "user_added")]
    UserAdded {
        uid: PeerId,
        label: String,
        avatar_url: String,
        webrtc_connection_info: Option<OpaqueMap>,
    },

    /// A peer left the room
    #[serde(rename = "user_removed")]
    UserRemoved { uid: PeerId },

    /// Payload relayed from peer `uid`
    #[serde(rename = "peer_message")]
    PeerMessage {
        uid: PeerId,
        message: Option<OpaqueMap>,
    },
}

impl ServerMessage {
    pub fn user_added(uid: &PeerId, auth: &AuthInfo) -> Self {
        ServerMessage::UserAdded {
            uid: uid.clone(),
            label: auth.label.clone(),
            avatar_url: auth.avatar_url.clone(),
            webrtc_connection_info: auth.webrtc_connection_info.clone(),
        }
    }

    pub fn encode(&self) -> Result<OutboundMessage, serde_json::Error> {
        serde_json::to_string(self).map(OutboundMessage::from)
    }
}

use tracing::{debug, error};

use super::directory::PeerDirectory;
use super::messages::{OpaqueMap, ServerMessage};
use super::types::PeerId;

/// Forward `payload` from `from` to `to`. Unknown targets are dropped silently.
///
/// Returns false only when the target's queue overflowed.
pub(crate) fn relay(
    peers: &PeerDirectory,
    from: &PeerId,
    to: &PeerId,
    payload: Option<OpaqueMap>,
) -> bool {
    let Some(target) = peers.get(to) else {
        debug!("Relay from {} to unknown peer {}, dropped", from, to);
        return true;
    };

    let msg = ServerMessage::PeerMessage {
        uid: from.clone(),
        message: payload,
    };
    match msg.encode() {
        Ok(out) => target.deliver(to, out),
        Err(e) => {
            error!("Failed to encode relay from {}: {}", from, e);
            true
        }
    }
}

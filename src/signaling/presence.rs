use std::collections::HashSet;

use tracing::error;

use super::directory::PeerDirectory;
use super::messages::ServerMessage;
use super::types::{OutboundMessage, PeerId};

fn encode(msg: &ServerMessage) -> Option<OutboundMessage> {
    match msg.encode() {
        Ok(out) => Some(out),
        Err(e) => {
            error!("Failed to encode {:?}: {}", msg, e);
            None
        }
    }
}

/// Send `msg` to every member except `skip`. Returns the members whose queue overflowed.
fn broadcast_except(
    peers: &PeerDirectory,
    members: &HashSet<PeerId>,
    skip: &PeerId,
    msg: &ServerMessage,
) -> Vec<PeerId> {
    let Some(out) = encode(msg) else {
        return Vec::new();
    };
    let mut overflowed = Vec::new();
    for uid in members.iter().filter(|uid| *uid != skip) {
        if let Some(peer) = peers.get(uid) {
            if !peer.deliver(uid, out.clone()) {
                overflowed.push(uid.clone());
            }
        }
    }
    overflowed
}

/// Announce `new_peer` to the rest of its room
pub(crate) fn broadcast_user_added(
    peers: &PeerDirectory,
    members: &HashSet<PeerId>,
    new_peer: &PeerId,
) -> Vec<PeerId> {
    let Some(state) = peers.get(new_peer) else {
        return Vec::new();
    };
    let msg = ServerMessage::user_added(new_peer, &state.auth);
    broadcast_except(peers, members, new_peer, &msg)
}

/// One `user_added` per member already in the room, for the newcomer.
///
/// Returned rather than queued: the roster can be larger than the peer's
/// outbound queue and must arrive complete.
pub(crate) fn roster(
    peers: &PeerDirectory,
    members: &HashSet<PeerId>,
    new_peer: &PeerId,
) -> Vec<OutboundMessage> {
    members
        .iter()
        .filter(|uid| *uid != new_peer)
        .filter_map(|uid| {
            let member = peers.get(uid)?;
            encode(&ServerMessage::user_added(uid, &member.auth))
        })
        .collect()
}

pub(crate) fn broadcast_user_removed(
    peers: &PeerDirectory,
    members: &HashSet<PeerId>,
    removed: &PeerId,
) -> Vec<PeerId> {
    let msg = ServerMessage::UserRemoved {
        uid: removed.clone(),
    };
    broadcast_except(peers, members, removed, &msg)
}

use std::collections::{HashMap, HashSet};

use super::types::{PeerId, PeerState, RoomId};

/// Connected peers by identifier
#[derive(Debug, Default)]
pub(crate) struct PeerDirectory {
    peers: HashMap<PeerId, PeerState>,
}

impl PeerDirectory {
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerState> {
        self.peers.get(id)
    }

    pub fn insert(&mut self, id: PeerId, state: PeerState) {
        self.peers.insert(id, state);
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<PeerState> {
        self.peers.remove(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &PeerState)> {
        self.peers.iter()
    }
}

/// Room membership. A room is present only while it has members.
#[derive(Debug, Default)]
pub(crate) struct RoomDirectory {
    rooms: HashMap<RoomId, HashSet<PeerId>>,
}

impl RoomDirectory {
    /// Add `peer` to `room`, creating the room on first join
    pub fn add_member(&mut self, room: &RoomId, peer: PeerId) {
        self.rooms.entry(room.clone()).or_default().insert(peer);
    }

    /// Remove `peer` from `room`. Returns true if the room was dropped.
    pub fn remove_member(&mut self, room: &RoomId, peer: &PeerId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        members.remove(peer);
        if members.is_empty() {
            self.rooms.remove(room);
            return true;
        }
        false
    }

    pub fn members(&self, room: &RoomId) -> Option<&HashSet<PeerId>> {
        self.rooms.get(room)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoomId, &HashSet<PeerId>)> {
        self.rooms.iter()
    }
}

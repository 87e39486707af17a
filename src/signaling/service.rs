use tracing::{info, warn};

use super::directory::{PeerDirectory, RoomDirectory};
use super::messages::{AuthInfo, OpaqueMap};
use super::presence;
use super::router;
use super::types::{
    OutboundMessage, PeerId, PeerSender, PeerState, RegistryStats, RoomId, SessionId,
    SignalingError,
};

/// Result of a successful join
#[derive(Debug)]
pub struct Joined {
    /// Token for [`RoomService::leave_session`]
    pub session: SessionId,
    /// `user_added` for every member already present, to be written before
    /// anything from the peer's queue
    pub roster: Vec<OutboundMessage>,
}

/// The peer and room registry.
///
/// Not synchronized: exactly one owner (the room service actor) drives it, so
/// every operation runs to completion before the next one starts. Outbound
/// events are queued with `try_send` and never wait on a peer; a peer whose
/// queue overflows is evicted as if it had left.
#[derive(Debug, Default)]
pub struct RoomService {
    peers: PeerDirectory,
    rooms: RoomDirectory,
    next_session: SessionId,
}

impl RoomService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` in `room` and exchange presence with the current members.
    pub fn join(
        &mut self,
        room: RoomId,
        id: PeerId,
        tx: PeerSender,
        auth: AuthInfo,
    ) -> Result<Joined, SignalingError> {
        if self.peers.contains(&id) {
            return Err(SignalingError::DuplicateIdentifier(id));
        }

        self.next_session += 1;
        let session = self.next_session;

        self.rooms.add_member(&room, id.clone());
        self.peers.insert(
            id.clone(),
            PeerState {
                auth,
                tx,
                room: room.clone(),
                session,
            },
        );

        let Some(members) = self.rooms.members(&room) else {
            return Err(SignalingError::Internal(format!("room {} vanished", room)));
        };
        let overflowed = presence::broadcast_user_added(&self.peers, members, &id);
        let roster = presence::roster(&self.peers, members, &id);
        info!("Peer {} joined room {} ({} members)", id, room, members.len());

        self.evict(overflowed);
        Ok(Joined { session, roster })
    }

    /// Remove `id`, notifying the rest of its room.
    ///
    /// Only called for peers that joined successfully; an unknown id is
    /// logged and ignored.
    pub fn leave(&mut self, id: &PeerId) {
        if self.peers.contains(id) {
            let overflowed = self.remove(id);
            self.evict(overflowed);
        } else {
            warn!("Leave for unknown peer {}", id);
        }
    }

    /// Leave on behalf of one connection. A no-op if that session was
    /// already evicted, even when the id has since been taken again.
    pub fn leave_session(&mut self, id: &PeerId, session: SessionId) {
        match self.peers.get(id) {
            Some(state) if state.session == session => self.leave(id),
            _ => info!("Session {} of {} already gone", session, id),
        }
    }

    pub fn relay(&mut self, from: &PeerId, to: &PeerId, payload: Option<OpaqueMap>) {
        if !router::relay(&self.peers, from, to, payload) {
            self.evict(vec![to.clone()]);
        }
    }

    /// Drop `id` from both directories. Returns peers that overflowed on the broadcast.
    fn remove(&mut self, id: &PeerId) -> Vec<PeerId> {
        let Some(room) = self.peers.get(id).map(|p| p.room.clone()) else {
            return Vec::new();
        };

        let overflowed = match self.rooms.members(&room) {
            Some(members) => presence::broadcast_user_removed(&self.peers, members, id),
            None => Vec::new(),
        };

        if self.rooms.remove_member(&room, id) {
            info!("Room {} removed (empty)", room);
        }
        self.peers.remove(id);
        info!("Peer {} left room {}", id, room);
        overflowed
    }

    /// Remove overflowed peers; dropping their sender closes the connection.
    fn evict(&mut self, mut pending: Vec<PeerId>) {
        while let Some(id) = pending.pop() {
            if self.peers.contains(&id) {
                warn!("Evicting {} (outbound queue overflow)", id);
                pending.extend(self.remove(&id));
            }
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            peers: self.peers.len(),
            rooms: self.rooms.len(),
        }
    }

    /// Sorted members of `room`, if it exists
    pub fn members(&self, room: &RoomId) -> Option<Vec<PeerId>> {
        self.rooms.members(room).map(|set| {
            let mut members: Vec<PeerId> = set.iter().cloned().collect();
            members.sort();
            members
        })
    }

    /// Check that both directories agree with each other.
    pub fn is_consistent(&self) -> bool {
        let rooms_ok = self.rooms.iter().all(|(room, members)| {
            !members.is_empty()
                && members
                    .iter()
                    .all(|m| self.peers.get(m).is_some_and(|p| &p.room == room))
        });
        let peers_ok = self.peers.iter().all(|(id, state)| {
            self.rooms
                .members(&state.room)
                .is_some_and(|members| members.contains(id))
        });
        rooms_ok && peers_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::messages::ServerMessage;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Joined peer as its writer would see it: roster first, then the queue
    struct Peer {
        roster: Vec<OutboundMessage>,
        rx: mpsc::Receiver<OutboundMessage>,
        session: SessionId,
    }

    fn auth(label: &str) -> AuthInfo {
        AuthInfo {
            label: label.to_string(),
            avatar_url: format!("/avatars/{}.png", label),
            webrtc_connection_info: json!({"peer": label}).as_object().cloned(),
        }
    }

    fn join_with_capacity(service: &mut RoomService, room: &str, id: &str, cap: usize) -> Peer {
        let (tx, rx) = mpsc::channel(cap);
        let joined = service
            .join(RoomId::from(room), PeerId::from(id), tx, auth(id))
            .unwrap();
        Peer {
            roster: joined.roster,
            rx,
            session: joined.session,
        }
    }

    fn join(service: &mut RoomService, room: &str, id: &str) -> Peer {
        join_with_capacity(service, room, id, 64)
    }

    fn parse(msg: &OutboundMessage) -> ServerMessage {
        serde_json::from_str(msg.as_str()).unwrap()
    }

    fn drain(peer: &mut Peer) -> Vec<ServerMessage> {
        let mut out: Vec<ServerMessage> = peer.roster.drain(..).map(|m| parse(&m)).collect();
        while let Ok(msg) = peer.rx.try_recv() {
            out.push(parse(&msg));
        }
        out
    }

    fn is_closed(peer: &mut Peer) -> bool {
        matches!(
            peer.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }

    fn added_uids(events: &[ServerMessage]) -> Vec<String> {
        let mut uids: Vec<String> = events
            .iter()
            .map(|e| match e {
                ServerMessage::UserAdded { uid, .. } => uid.to_string(),
                other => panic!("expected user_added, got {:?}", other),
            })
            .collect();
        uids.sort();
        uids
    }

    fn ids(list: &[&str]) -> Vec<PeerId> {
        list.iter().map(|s| PeerId::from(*s)).collect()
    }

    #[test]
    fn first_join_creates_room_without_events() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");

        assert!(drain(&mut a).is_empty());
        assert_eq!(service.members(&RoomId::from("r1")), Some(ids(&["A"])));
        assert_eq!(service.stats(), RegistryStats { peers: 1, rooms: 1 });
        assert!(service.is_consistent());
    }

    #[test]
    fn join_broadcasts_and_sends_roster() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let mut b = join(&mut service, "r1", "B");
        drain(&mut a);
        drain(&mut b);

        let mut c = join(&mut service, "r1", "C");

        assert_eq!(added_uids(&drain(&mut a)), vec!["C"]);
        assert_eq!(added_uids(&drain(&mut b)), vec!["C"]);
        assert_eq!(added_uids(&drain(&mut c)), vec!["A", "B"]);
        assert!(service.is_consistent());
    }

    #[test]
    fn user_added_carries_metadata() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let _b = join(&mut service, "r1", "B");

        let events = drain(&mut a);
        let expected = auth("B");
        assert_eq!(
            events,
            vec![ServerMessage::UserAdded {
                uid: PeerId::from("B"),
                label: expected.label,
                avatar_url: expected.avatar_url,
                webrtc_connection_info: expected.webrtc_connection_info,
            }]
        );
    }

    #[test]
    fn duplicate_identifier_is_rejected_without_mutation() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let _b = join(&mut service, "r1", "B");
        drain(&mut a);

        let (tx, mut dup_rx) = mpsc::channel(8);
        let result = service.join(RoomId::from("r2"), PeerId::from("B"), tx, auth("B2"));

        assert!(matches!(
            result,
            Err(SignalingError::DuplicateIdentifier(ref id)) if id.as_str() == "B"
        ));
        assert!(drain(&mut a).is_empty());
        assert!(dup_rx.try_recv().is_err());
        assert_eq!(service.members(&RoomId::from("r1")), Some(ids(&["A", "B"])));
        assert_eq!(service.members(&RoomId::from("r2")), None);
        assert_eq!(service.stats(), RegistryStats { peers: 2, rooms: 1 });
    }

    #[test]
    fn same_identifier_twice_grows_room_by_one() {
        let mut service = RoomService::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);

        let first = service.join(RoomId::from("r1"), PeerId::from("A"), tx1, auth("A"));
        let second = service.join(RoomId::from("r1"), PeerId::from("A"), tx2, auth("A"));
        let first_session = first.as_ref().map(|j| j.session).ok();

        assert!(first_session.is_some());
        assert!(matches!(second, Err(SignalingError::DuplicateIdentifier(_))));
        assert_eq!(service.members(&RoomId::from("r1")), Some(ids(&["A"])));
    }

    #[test]
    fn leave_notifies_remaining_members() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let mut b = join(&mut service, "r1", "B");
        let mut c = join(&mut service, "r1", "C");
        drain(&mut a);
        drain(&mut b);
        drain(&mut c);

        service.leave(&PeerId::from("B"));

        let removed = ServerMessage::UserRemoved {
            uid: PeerId::from("B"),
        };
        assert_eq!(drain(&mut a), vec![removed.clone()]);
        assert_eq!(drain(&mut c), vec![removed]);
        assert!(drain(&mut b).is_empty());
        assert_eq!(service.members(&RoomId::from("r1")), Some(ids(&["A", "C"])));
        assert!(service.is_consistent());
    }

    #[test]
    fn last_leave_removes_room() {
        let mut service = RoomService::new();
        let _a = join(&mut service, "r1", "A");
        let _b = join(&mut service, "r2", "B");

        service.leave(&PeerId::from("A"));

        assert_eq!(service.members(&RoomId::from("r1")), None);
        assert_eq!(service.members(&RoomId::from("r2")), Some(ids(&["B"])));
        assert_eq!(service.stats(), RegistryStats { peers: 1, rooms: 1 });
        assert!(service.is_consistent());
    }

    #[test]
    fn identifier_reusable_after_leave() {
        let mut service = RoomService::new();
        let _a = join(&mut service, "r1", "A");
        service.leave(&PeerId::from("A"));

        let _a2 = join(&mut service, "r2", "A");
        assert_eq!(service.members(&RoomId::from("r2")), Some(ids(&["A"])));
    }

    #[test]
    fn leave_unknown_peer_is_ignored() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");

        service.leave(&PeerId::from("ghost"));

        assert!(drain(&mut a).is_empty());
        assert_eq!(service.stats(), RegistryStats { peers: 1, rooms: 1 });
    }

    #[test]
    fn rooms_are_isolated() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let mut b = join(&mut service, "r2", "B");

        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());

        service.leave(&PeerId::from("A"));
        assert!(drain(&mut b).is_empty());
    }

    #[test]
    fn relay_to_unknown_target_delivers_nothing() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let mut c = join(&mut service, "r1", "C");
        drain(&mut a);
        drain(&mut c);

        let payload = json!({"x": 1}).as_object().cloned();
        service.relay(&PeerId::from("A"), &PeerId::from("Z"), payload);

        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut c).is_empty());
    }

    #[test]
    fn relay_delivers_untouched_payload() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let mut c = join(&mut service, "r1", "C");
        drain(&mut a);
        drain(&mut c);

        let payload = json!({"x": 1}).as_object().cloned();
        service.relay(&PeerId::from("A"), &PeerId::from("C"), payload.clone());

        assert_eq!(
            drain(&mut c),
            vec![ServerMessage::PeerMessage {
                uid: PeerId::from("A"),
                message: payload,
            }]
        );
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn relay_crosses_rooms() {
        let mut service = RoomService::new();
        let _a = join(&mut service, "r1", "A");
        let mut b = join(&mut service, "r2", "B");

        service.relay(&PeerId::from("A"), &PeerId::from("B"), Some(OpaqueMap::new()));

        assert_eq!(drain(&mut b).len(), 1);
    }

    #[test]
    fn relay_null_payload_passes_through() {
        let mut service = RoomService::new();
        let _a = join(&mut service, "r1", "A");
        let mut b = join(&mut service, "r1", "B");
        drain(&mut b);

        service.relay(&PeerId::from("A"), &PeerId::from("B"), None);

        assert_eq!(
            drain(&mut b),
            vec![ServerMessage::PeerMessage {
                uid: PeerId::from("A"),
                message: None,
            }]
        );
    }

    #[test]
    fn roster_larger_than_queue_is_complete() {
        let mut service = RoomService::new();
        let existing = 300;
        let mut members = Vec::new();
        for i in 0..existing {
            members.push(join_with_capacity(&mut service, "big", &format!("m{:03}", i), 512));
        }

        let mut newcomer = join_with_capacity(&mut service, "big", "new", 256);

        let events = drain(&mut newcomer);
        assert_eq!(events.len(), existing);
        let mut expected: Vec<String> = (0..existing).map(|i| format!("m{:03}", i)).collect();
        expected.sort();
        assert_eq!(added_uids(&events), expected);
        assert_eq!(service.stats(), RegistryStats { peers: existing + 1, rooms: 1 });
    }

    #[test]
    fn overflowing_peer_is_evicted() {
        let mut service = RoomService::new();
        let mut slow = join_with_capacity(&mut service, "r1", "S", 1);
        let mut a = join(&mut service, "r1", "A");
        let _b = join(&mut service, "r1", "B");

        // S took A's user_added, B's did not fit
        assert_eq!(service.members(&RoomId::from("r1")), Some(ids(&["A", "B"])));
        assert!(service.is_consistent());

        let events = drain(&mut a);
        assert!(events.contains(&ServerMessage::UserRemoved {
            uid: PeerId::from("S")
        }));
        assert_eq!(added_uids(&[events[0].clone(), events[1].clone()]), vec!["B", "S"]);

        assert_eq!(added_uids(&drain(&mut slow)), vec!["A"]);
        assert!(is_closed(&mut slow));
    }

    #[test]
    fn relay_overflow_evicts_target() {
        let mut service = RoomService::new();
        let mut a = join(&mut service, "r1", "A");
        let _t = join_with_capacity(&mut service, "r1", "T", 1);
        drain(&mut a);

        service.relay(&PeerId::from("A"), &PeerId::from("T"), None);
        assert_eq!(service.stats().peers, 2);

        service.relay(&PeerId::from("A"), &PeerId::from("T"), None);
        assert_eq!(service.members(&RoomId::from("r1")), Some(ids(&["A"])));
        assert_eq!(
            drain(&mut a),
            vec![ServerMessage::UserRemoved {
                uid: PeerId::from("T")
            }]
        );
    }

    #[test]
    fn stale_session_leave_is_ignored() {
        let mut service = RoomService::new();
        let first = join(&mut service, "r1", "A");
        service.leave_session(&PeerId::from("A"), first.session);

        let second = join(&mut service, "r1", "A");
        assert_ne!(first.session, second.session);

        service.leave_session(&PeerId::from("A"), first.session);
        assert_eq!(service.members(&RoomId::from("r1")), Some(ids(&["A"])));

        service.leave_session(&PeerId::from("A"), second.session);
        assert_eq!(service.stats(), RegistryStats::default());
    }

    #[test]
    fn closed_peer_channel_does_not_break_broadcast() {
        let mut service = RoomService::new();
        let a = join(&mut service, "r1", "A");
        drop(a);

        let mut b = join(&mut service, "r1", "B");
        assert_eq!(added_uids(&drain(&mut b)), vec!["A"]);
    }
}

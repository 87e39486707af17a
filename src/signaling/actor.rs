use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::{AuthInfo, OpaqueMap};
use super::service::{Joined, RoomService};
use super::types::{PeerId, PeerSender, RegistryStats, RoomId, SessionId, SignalingError};

/// Commands sent to the room service actor
pub(crate) enum RoomCommand {
    Join {
        room: RoomId,
        peer_id: PeerId,
        peer_tx: PeerSender,
        auth: AuthInfo,
        reply: oneshot::Sender<Result<Joined, SignalingError>>,
    },
    Leave {
        peer_id: PeerId,
        session: SessionId,
    },
    Relay {
        from: PeerId,
        to: PeerId,
        payload: Option<OpaqueMap>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}

/// Owns the registry; commands are applied one at a time in arrival order.
pub(crate) async fn room_service_actor(
    mut rx: mpsc::Receiver<RoomCommand>,
    mut service: RoomService,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join {
                room,
                peer_id,
                peer_tx,
                auth,
                reply,
            } => {
                let result = service.join(room, peer_id, peer_tx, auth);
                let _ = reply.send(result);
            }

            RoomCommand::Leave { peer_id, session } => {
                service.leave_session(&peer_id, session);
                let stats = service.stats();
                debug!("Registry: {} peers in {} rooms", stats.peers, stats.rooms);
            }

            RoomCommand::Relay { from, to, payload } => {
                service.relay(&from, &to, payload);
            }

            RoomCommand::Stats { reply } => {
                let _ = reply.send(service.stats());
            }
        }
    }

    info!("Room service stopped");
}

/// Handle to communicate with the room service actor
#[derive(Clone)]
pub struct RoomServiceHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RoomServiceHandle {
    /// Start the actor on the current runtime with an empty registry
    pub fn spawn(command_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(command_capacity);
        tokio::spawn(room_service_actor(rx, RoomService::new()));
        Self { tx }
    }

    /// Join `room` as `peer_id`; events for this peer are queued on `peer_tx`.
    /// The returned roster is not queued and must be written first.
    pub async fn join(
        &self,
        room: RoomId,
        peer_id: PeerId,
        peer_tx: PeerSender,
        auth: AuthInfo,
    ) -> Result<Joined, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Join {
                room,
                peer_id,
                peer_tx,
                auth,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))?
    }

    /// End `session` of `peer_id`; ignored if the peer was already evicted
    pub async fn leave(&self, peer_id: &PeerId, session: SessionId) {
        let _ = self
            .tx
            .send(RoomCommand::Leave {
                peer_id: peer_id.clone(),
                session,
            })
            .await;
    }

    /// Relay `payload` to `to`. Best effort; nothing is reported back.
    pub async fn relay(&self, from: &PeerId, to: PeerId, payload: Option<OpaqueMap>) {
        let _ = self
            .tx
            .send(RoomCommand::Relay {
                from: from.clone(),
                to,
                payload,
            })
            .await;
    }

    pub async fn stats(&self) -> Result<RegistryStats, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Stats { reply: reply_tx })
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }
}

//! HTTP identity endpoint: hands out fresh peer ids and reports the caller's address

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::signaling::PeerId;

/// Response body of `GET /auth`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: PeerId,
    pub public_ip: IpAddr,
}

/// Random v4 UUID. Collisions are not checked here; the room service rejects duplicates.
pub fn mint_peer_id() -> PeerId {
    PeerId::from(Uuid::new_v4().to_string())
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Client address as seen through a reverse proxy, falling back to the socket peer
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    header_ip(headers, "x-forwarded-for")
        .or_else(|| header_ip(headers, "x-real-ip"))
        .unwrap_or_else(|| peer.ip())
}

async fn issue_identity(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<Identity> {
    let identity = Identity {
        uid: mint_peer_id(),
        public_ip: client_ip(&headers, addr),
    };
    debug!("Issued {} to {}", identity.uid, identity.public_ip);
    Json(identity)
}

/// `GET /auth`; merged into the signaling server's router
pub fn router() -> Router {
    Router::new().route("/auth", get(issue_identity))
}

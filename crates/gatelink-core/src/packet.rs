//! The closed set of packet variants the pipeline recognizes.
//!
//! The handshake and login packets the rewrite stage cares about are
//! explicit variants with typed fields; everything else travels as `Raw`
//! bytes and passes through untouched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handshake next-state requesting a status ping.
pub const NEXT_STATE_STATUS: i32 = 1;
/// Handshake next-state requesting login.
pub const NEXT_STATE_LOGIN: i32 = 2;

/// One packet crossing a virtual connection, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Handshake(Handshake),
    LoginStart(LoginStart),
    Disconnect(Disconnect),
    /// Any packet the pipeline has no interest in: opaque id + body.
    Raw(RawPacket),
}

/// The first packet of a connection; `server_address` is the address-like
/// field the forwarding codec rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

/// The client's login request, suppressed by the pipeline once the
/// synthetic login has been driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStart {
    pub username: String,
    pub player_id: Option<Uuid>,
}

/// A login-phase disconnect with a host-styled message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    pub reason: String,
}

/// An unrecognized packet carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPacket {
    pub id: i32,
    pub body: Vec<u8>,
}

/// Discriminant used for registry lookup; one kind per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    LoginStart,
    Disconnect,
    Raw,
}

impl Packet {
    /// The exact runtime kind of this packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Handshake(_) => PacketKind::Handshake,
            Packet::LoginStart(_) => PacketKind::LoginStart,
            Packet::Disconnect(_) => PacketKind::Disconnect,
            Packet::Raw(_) => PacketKind::Raw,
        }
    }
}

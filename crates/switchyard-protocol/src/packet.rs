//! Control packets exchanged by clients, the proxy and backends.
//!
//! A client talks in packets only until it is logged in; after
//! [`Packet::LoginSuccess`] its frames are opaque game traffic that the
//! proxy never looks into. On the proxy-to-backend link every frame is a
//! [`LinkFrame`](crate::LinkFrame), so the proxy can tell forwarded traffic
//! apart from a backend kicking the player.
//!
//! ```text
//! client                 proxy                  backend
//!   │── Login ──────────▶│                         │
//!   │◀─ EncryptionRequest│  (authenticate only)    │
//!   │── EncryptionResp. ▶│                         │
//!   │                    │── ProxyLogin ──────────▶│
//!   │◀─ LoginSuccess ────│                         │
//!   │══ raw frames ═════▶│── Data ────────────────▶│
//!   │◀═ raw frames ══════│◀─ Data / Disconnect ────│
//! ```

use serde::{Deserialize, Serialize};

/// The protocol version clients must announce in [`Packet::Login`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest player name accepted at login.
pub const MAX_NAME_LEN: usize = 16;

/// Every control packet the proxy understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    /// Client → proxy: asks for the server list entry instead of logging in.
    Status,

    /// Proxy → client: answer to [`Packet::Status`].
    StatusResponse {
        motd: String,
        online: usize,
        max_players: u16,
    },

    /// Client → proxy: first packet of a login.
    ///
    /// `host` is the address the client typed in; the router uses it to pick
    /// a backend.
    Login {
        version: u32,
        name: String,
        host: String,
    },

    /// Proxy → client: the proxy's public key (SPKI DER) and a random token
    /// the client must echo back encrypted.
    EncryptionRequest {
        public_key: Vec<u8>,
        verify_token: Vec<u8>,
    },

    /// Client → proxy: shared secret and verify token, each encrypted with
    /// the public key from [`Packet::EncryptionRequest`].
    EncryptionResponse {
        shared_secret: Vec<u8>,
        verify_token: Vec<u8>,
    },

    /// Proxy → client: login finished; raw forwarding starts after this.
    LoginSuccess { name: String },

    /// Any direction: the sender is ending the conversation.
    Disconnect { reason: String },

    /// Proxy → backend: first packet on every backend link.
    ProxyLogin { name: String, host: String },
}

/// Returns `true` if `name` is an acceptable player name: 1 to
/// [`MAX_NAME_LEN`] ASCII letters, digits or underscores.
pub fn is_valid_player_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

//! Wire protocol for Switchyard.
//!
//! - **Packets** ([`Packet`]): the control messages of the login
//!   handshake and of the proxy-to-backend link.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how packets become frame
//!   payloads.
//! - **Link frames** ([`LinkFrame`]): the tagged envelope on backend links
//!   that keeps game traffic out of the codec.
//! - **Errors** ([`ProtocolError`]).
//!
//! Framing is the transport's job; this crate only sees whole payloads.

mod codec;
mod error;
mod frame;
mod packet;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{LINK_HEADER_LEN, LinkFrame};
pub use packet::{MAX_NAME_LEN, PROTOCOL_VERSION, Packet, is_valid_player_name};

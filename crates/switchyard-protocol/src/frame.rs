//! Envelope for frames on the proxy-to-backend link.
//!
//! Every link frame starts with one tag byte. Game traffic travels as
//! [`LinkFrame::Data`] with its bytes copied verbatim after the tag, so a
//! forwarded frame grows by exactly [`LINK_HEADER_LEN`] no matter what codec
//! the control packets use. Control packets travel as
//! [`LinkFrame::Control`], codec-encoded after the tag.
//!
//! ```text
//! ┌──────┬──────────────────────────┐
//! │ 0x00 │ raw game bytes           │  Data
//! ├──────┼──────────────────────────┤
//! │ 0x01 │ codec-encoded Packet     │  Control
//! └──────┴──────────────────────────┘
//! ```

use crate::{Codec, Packet, ProtocolError};

/// Bytes a link frame adds in front of its payload.
pub const LINK_HEADER_LEN: usize = 1;

const DATA_TAG: u8 = 0x00;
const CONTROL_TAG: u8 = 0x01;

/// One frame on a backend link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    /// One opaque frame of the player's game traffic.
    Data(Vec<u8>),
    /// A control packet such as `ProxyLogin` or `Disconnect`.
    Control(Packet),
}

impl LinkFrame {
    /// Builds a data frame from `data` without going through a codec.
    pub fn encode_data(data: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(LINK_HEADER_LEN + data.len());
        frame.push(DATA_TAG);
        frame.extend_from_slice(data);
        frame
    }

    /// Encodes this frame, using `codec` for control packets.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the control packet fails to
    /// serialize.
    pub fn encode(&self, codec: &impl Codec) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::Data(data) => Ok(Self::encode_data(data)),
            Self::Control(packet) => {
                let body = codec.encode(packet)?;
                let mut frame = Vec::with_capacity(LINK_HEADER_LEN + body.len());
                frame.push(CONTROL_TAG);
                frame.extend_from_slice(&body);
                Ok(frame)
            }
        }
    }

    /// Decodes a frame read off a backend link.
    ///
    /// # Errors
    /// `ProtocolError::InvalidMessage` for an empty frame or an unknown tag;
    /// `ProtocolError::Decode` if a control packet is malformed.
    pub fn decode(mut frame: Vec<u8>, codec: &impl Codec) -> Result<Self, ProtocolError> {
        let Some(&tag) = frame.first() else {
            return Err(ProtocolError::InvalidMessage("empty link frame".into()));
        };
        match tag {
            DATA_TAG => {
                frame.drain(..LINK_HEADER_LEN);
                Ok(Self::Data(frame))
            }
            CONTROL_TAG => Ok(Self::Control(codec.decode(&frame[LINK_HEADER_LEN..])?)),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown link frame tag {other:#04x}"
            ))),
        }
    }
}

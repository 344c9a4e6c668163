//! Packet type and frame encoding/decoding.

use std::borrow::Cow;
use std::fmt;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ============================================================================
// Protocol Limits
// ============================================================================

/// Length of the `size` prefix preceding every frame.
pub const HEADER_LEN: usize = 4;

/// Longest command body a client may send (found by trial and error).
pub const MAX_COMMAND_LENGTH: usize = 510;

/// Smallest legal declared size: request id (4), type (4), two terminators.
pub const MIN_PACKET_SIZE: i32 = 4 + 4 + 1 + 1;

/// Largest legal declared size. Bodies top out at 4091 bytes.
pub const MAX_PACKET_SIZE: i32 = 4101;

/// Replies larger than this were probably split by the server.
///
/// Servers split long output by lines rather than bytes, so a split packet
/// can be anywhere up to `MAX_PACKET_SIZE`. Allowing for lines of up to 400
/// characters, a packet above this size is assumed to have a continuation.
pub const PROBABLY_SPLIT_IF_LARGER_THAN: i32 = MAX_PACKET_SIZE - 400;

/// Body marker of the keep-alive packets some servers interleave with replies.
pub const KEEP_ALIVE_MARKER: &[u8] = b"Keep Alive";

/// Request id a server echoes when the password was rejected.
pub const BAD_PASSWORD_ID: i32 = -1;

// ============================================================================
// Roles and Types
// ============================================================================

/// The party that sent a frame.
///
/// The numeric packet types are direction dependent, so the sender decides
/// how a type value is interpreted and how large a body may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The remote console client (this crate's primary user).
    Client,
    /// The game server.
    Server,
}

impl Role {
    /// Maximum body length this role may put on the wire.
    pub const fn max_body_len(self) -> usize {
        match self {
            Self::Client => MAX_COMMAND_LENGTH,
            Self::Server => (MAX_PACKET_SIZE - MIN_PACKET_SIZE) as usize,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Packet type as carried in the third header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Client login request carrying the password (`3`).
    Auth,
    /// Server reply to a successful login (`2`).
    AuthResponse,
    /// Client command request (`2`).
    ExecCommand,
    /// Server command output (`0`). Clients also send it as an end marker.
    ResponseValue,
}

impl PacketType {
    /// Numeric value written on the wire.
    pub const fn wire_value(self) -> i32 {
        match self {
            Self::Auth => 3,
            Self::AuthResponse => 2,
            Self::ExecCommand => 2,
            Self::ResponseValue => 0,
        }
    }

    /// Interprets a wire value sent by `sender`.
    pub fn from_wire(value: i32, sender: Role) -> Result<Self, CodecError> {
        match (sender, value) {
            (Role::Client, 3) => Ok(Self::Auth),
            (Role::Client, 2) => Ok(Self::ExecCommand),
            (Role::Server, 2) => Ok(Self::AuthResponse),
            (_, 0) => Ok(Self::ResponseValue),
            _ => Err(CodecError::UnknownType { value, sender }),
        }
    }
}

// ============================================================================
// Packet
// ============================================================================

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Declared size (everything after the size field).
    pub size: i32,
    pub request_id: i32,
    pub packet_type: PacketType,
    /// Primary string, without its terminator.
    pub body: Vec<u8>,
    /// Second string. Always empty from a well-behaved peer.
    pub body2: Vec<u8>,
}

impl Packet {
    /// Creates a packet with an empty second string and a computed size.
    pub fn new(request_id: i32, packet_type: PacketType, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let size = i32::try_from(body.len())
            .unwrap_or(i32::MAX)
            .saturating_add(MIN_PACKET_SIZE);
        Self {
            size,
            request_id,
            packet_type,
            body,
            body2: Vec::new(),
        }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Returns true if the body carries the keep-alive marker.
    pub fn is_keep_alive(&self) -> bool {
        self.body
            .windows(KEEP_ALIVE_MARKER.len())
            .any(|window| window == KEEP_ALIVE_MARKER)
    }

    /// Returns true if the server signalled a rejected password.
    pub fn is_bad_password(&self) -> bool {
        self.request_id == BAD_PASSWORD_ID
    }

    /// Returns true for an empty RESPONSE_VALUE packet.
    pub fn is_empty_response(&self) -> bool {
        self.packet_type == PacketType::ResponseValue && self.body.is_empty()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("command too large to send: {len} bytes (max: {max})")]
    CommandTooLarge { len: usize, max: usize },

    #[error("body contains an embedded NUL byte")]
    EmbeddedNul,

    #[error("packet claims to have illegal size: {0} bytes")]
    InvalidSize(i32),

    #[error("packet has bad length ({got} of {expected} bytes)")]
    Truncated { expected: usize, got: usize },

    #[error("packet is missing a string terminator")]
    MissingTerminator,

    #[error("packet contains {0} superfluous bytes")]
    SuperfluousBytes(usize),

    #[error("invalid packet type {value} from {sender}")]
    UnknownType { value: i32, sender: Role },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// Returns true if the error means the byte stream itself is malformed.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::InvalidSize(_)
                | Self::Truncated { .. }
                | Self::MissingTerminator
                | Self::SuperfluousBytes(_)
                | Self::UnknownType { .. }
        )
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a client request frame.
///
/// Fails with `CommandTooLarge` if `body` exceeds [`MAX_COMMAND_LENGTH`].
pub fn encode(request_id: i32, packet_type: PacketType, body: &[u8]) -> Result<Bytes, CodecError> {
    let mut dst = BytesMut::new();
    write_frame(&mut dst, request_id, packet_type, body, Role::Client.max_body_len())?;
    Ok(dst.freeze())
}

/// Appends one frame to `dst`, rejecting bodies longer than `max_body`.
pub(crate) fn write_frame(
    dst: &mut BytesMut,
    request_id: i32,
    packet_type: PacketType,
    body: &[u8],
    max_body: usize,
) -> Result<(), CodecError> {
    if body.len() > max_body {
        return Err(CodecError::CommandTooLarge {
            len: body.len(),
            max: max_body,
        });
    }
    if body.contains(&0) {
        return Err(CodecError::EmbeddedNul);
    }

    // Bounded by max_body above, so the cast cannot truncate.
    let size = body.len() as i32 + MIN_PACKET_SIZE;

    dst.reserve(HEADER_LEN + size as usize);
    dst.put_i32_le(size);
    dst.put_i32_le(request_id);
    dst.put_i32_le(packet_type.wire_value());
    dst.put_slice(body);
    dst.put_u8(0);
    dst.put_u8(0);
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Validates the size prefix and returns the number of bytes that follow it.
///
/// Called before any receive buffer is sized from the declared length.
pub fn frame_size(raw_header: [u8; HEADER_LEN]) -> Result<usize, CodecError> {
    let size = i32::from_le_bytes(raw_header);
    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
        return Err(CodecError::InvalidSize(size));
    }
    Ok(size as usize)
}

/// Decodes one frame sent by `sender`.
///
/// `raw_body` must hold exactly the bytes announced by `raw_header`.
pub fn decode(
    raw_header: [u8; HEADER_LEN],
    raw_body: &[u8],
    sender: Role,
) -> Result<Packet, CodecError> {
    let size = frame_size(raw_header)?;
    if raw_body.len() != size {
        return Err(CodecError::Truncated {
            expected: size,
            got: raw_body.len(),
        });
    }

    let mut buf = raw_body;
    let request_id = buf.get_i32_le();
    let packet_type = PacketType::from_wire(buf.get_i32_le(), sender)?;

    let (body, rest) = split_cstr(buf)?;
    let (body2, crap) = split_cstr(rest)?;
    if !crap.is_empty() {
        return Err(CodecError::SuperfluousBytes(crap.len()));
    }

    Ok(Packet {
        size: size as i32,
        request_id,
        packet_type,
        body: body.to_vec(),
        body2: body2.to_vec(),
    })
}

/// Splits a NUL-terminated string off the front of `buf`.
fn split_cstr(buf: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
    let pos = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or(CodecError::MissingTerminator)?;
    let (string, rest) = buf.split_at(pos);
    Ok((string, rest.get(1..).unwrap_or_default()))
}

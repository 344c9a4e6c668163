//! RCON Protocol - Wire codec for the Source remote console protocol
//!
//! This crate provides the packet type, the bit-exact frame encoder and
//! decoder, and a `tokio_util` codec for buffered stream reads.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬──────────────┬──────┐
//! │ size (i32)   │ request_id   │ type (i32)   │ body ... NUL │ NUL  │
//! │ little-endian│ (i32 LE)     │              │              │      │
//! └──────────────┴──────────────┴──────────────┴──────────────┴──────┘
//!                 ◀──────────────────── size bytes ──────────────────▶
//! ```
//!
//! Type values overlap (`2` is both EXEC_COMMAND from a client and
//! AUTH_RESPONSE from a server), so every decode is told which [`Role`]
//! sent the frame.

pub mod codec;
pub mod packet;

pub use codec::PacketCodec;
pub use packet::{
    decode, encode, frame_size, CodecError, Packet, PacketType, Role, BAD_PASSWORD_ID, HEADER_LEN,
    KEEP_ALIVE_MARKER, MAX_COMMAND_LENGTH, MAX_PACKET_SIZE, MIN_PACKET_SIZE,
    PROBABLY_SPLIT_IF_LARGER_THAN,
};

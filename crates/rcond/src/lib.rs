//! rcond - RCON sessions, reconnection and live chat
//!
//! This crate provides the runtime side of rcon-bridge:
//! - `connection` - One authenticated RCON connection with reply reassembly
//! - `registry` - Channel → connection registry actor with reconnection policy
//! - `chat` - Per-channel chat bridge poller
//! - `error` - Error taxonomy shared by all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          rcond                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ RegistryHandle  │────▶│     RegistryActor           │   │
//! │  │ (cheap clone)   │     │  (channel map owner)        │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ leased connections          │ events            │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   Connection    │     │   broadcast::Sender         │   │
//! │  │ (Mutex per chan)│     │   (SessionEvent)            │   │
//! │  └────────▲────────┘     └─────────────────────────────┘   │
//! │           │ execute()                                       │
//! │  ┌────────┴────────┐                                        │
//! │  │   ChatBridge    │──▶ ChannelSink::emit                   │
//! │  │ (task per chan) │                                        │
//! │  └─────────────────┘                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod chat;
pub mod connection;
pub mod error;
pub mod registry;

pub use chat::ChannelSink;
pub use connection::{Connection, ConnectionState};
pub use error::RconError;
pub use registry::{
    spawn_registry, RegistryConfig, RegistryHandle, RemovalReason, SessionEvent,
};

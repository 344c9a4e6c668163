//! RCON Core - Shared types for rcon-bridge
//!
//! This crate provides the domain types shared between the session
//! registry (rcond) and the command-line front end: channel identifiers,
//! server configuration, chat bindings and the settings file.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod channel;
pub mod chat;
pub mod error;
pub mod server;
pub mod settings;

// Re-exports for convenience
pub use channel::{ChannelId, SessionInfo};
pub use chat::{paginate, ChatBinding, ChatMessage, DEFAULT_NO_RESPONSE_SENTINEL, DEFAULT_PAGE_LENGTH};
pub use error::{DomainError, DomainResult};
pub use server::{ReassemblyMode, ServerConfig, ServerDirectory, DEFAULT_PORT};
pub use settings::{ChatSettings, ReconnectSettings, Settings};

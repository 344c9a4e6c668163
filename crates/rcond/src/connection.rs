//! A single authenticated RCON connection.
//!
//! The `Connection` owns one byte stream and implements the client side of
//! the protocol:
//! - Opening the socket within the configured timeout
//! - The login handshake, tolerating one leading empty packet
//! - Command execution with response reassembly across packets
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──▶ Authenticating ──authenticate()──▶ Ready
//!                                                                 │  ▲
//!                                                      execute()  ▼  │
//!                                                               Executing
//!                     any I/O or protocol failure ──▶ Closed ◀── close()
//! ```
//!
//! `execute()` takes `&mut self`, so a connection can never interleave two
//! requests. Callers that share a connection wrap it in an async mutex.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`

use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, trace, warn};

use rcon_core::{ReassemblyMode, ServerConfig};
use rcon_protocol::{
    Packet, PacketCodec, PacketType, MAX_COMMAND_LENGTH, MAX_PACKET_SIZE,
    PROBABLY_SPLIT_IF_LARGER_THAN,
};

use crate::error::RconError;

/// Initial read buffer capacity: one maximum-size frame plus header.
const READ_BUFFER_CAPACITY: usize = MAX_PACKET_SIZE as usize + 4;

/// Lines of a script starting with this are skipped.
const SCRIPT_COMMENT_PREFIX: &str = "//";

// ============================================================================
// Connection State
// ============================================================================

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket yet.
    Disconnected,
    /// Socket connect in progress.
    Connecting,
    /// Socket open, login not yet accepted.
    Authenticating,
    /// Logged in and idle.
    Ready,
    /// A command is in flight.
    Executing,
    /// Socket released. Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Client side of one RCON stream.
///
/// Generic over the transport so tests can substitute in-memory streams;
/// production code uses the `TcpStream` default.
pub struct Connection<S = TcpStream> {
    config: ServerConfig,
    state: ConnectionState,
    authenticated: bool,
    /// Last request id handed out. Strictly increasing per connection.
    next_request_id: i32,
    /// Id of the most recent end-of-response marker, whose late echoes are dropped.
    last_sentinel: Option<i32>,
    stream: Option<S>,
    read_buf: BytesMut,
    codec: PacketCodec,
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address())
            .field("state", &self.state)
            .field("authenticated", &self.authenticated)
            .field("next_request_id", &self.next_request_id)
            .finish()
    }
}

impl Connection<TcpStream> {
    /// Creates a disconnected connection for `config`.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_state(config, None, ConnectionState::Disconnected)
    }

    /// Connects and authenticates in one step.
    pub async fn open(config: ServerConfig) -> Result<Self, RconError> {
        let mut connection = Self::new(config);
        connection.connect().await?;
        connection.authenticate().await?;
        Ok(connection)
    }

    /// Opens the TCP stream, bounded by the configured timeout.
    ///
    /// On failure the connection is left exactly as it was.
    pub async fn connect(&mut self) -> Result<(), RconError> {
        let address = self.config.address();
        let previous = self.state;
        self.state = ConnectionState::Connecting;

        debug!(address = %address, "Connecting to RCON server");

        let connect_error = |reason: String| RconError::Connect {
            address: address.clone(),
            reason,
        };

        let result = match timeout(self.config.timeout, TcpStream::connect(address.as_str())).await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(connect_error(e.to_string())),
            Err(_) => Err(connect_error(format!(
                "timed out after {:?}",
                self.config.timeout
            ))),
        };

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    trace!(error = %e, "Failed to set TCP_NODELAY");
                }
                self.attach(stream);
                debug!(address = %address, "TCP connection established");
                Ok(())
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already-open stream. The connection still needs `authenticate()`.
    pub fn from_stream(stream: S, config: ServerConfig) -> Self {
        Self::with_state(config, Some(stream), ConnectionState::Authenticating)
    }

    fn with_state(config: ServerConfig, stream: Option<S>, state: ConnectionState) -> Self {
        Self {
            config,
            state,
            authenticated: false,
            next_request_id: 0,
            last_sentinel: None,
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            codec: PacketCodec::client(),
        }
    }

    fn attach(&mut self, stream: S) {
        self.stream = Some(stream);
        self.read_buf.clear();
        self.authenticated = false;
        self.last_sentinel = None;
        self.state = ConnectionState::Authenticating;
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Returns true while the socket is held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Last request id sent on this connection (0 before the first request).
    pub fn last_request_id(&self) -> i32 {
        self.next_request_id
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Logs in with the configured password.
    ///
    /// The server may preface its answer with one empty RESPONSE_VALUE
    /// packet; that packet is skipped. On any failure the socket is closed
    /// and the connection stays unauthenticated. Network failures here are
    /// reported as [`RconError::Connect`].
    pub async fn authenticate(&mut self) -> Result<(), RconError> {
        if self.stream.is_none() {
            return Err(RconError::Connect {
                address: self.config.address(),
                reason: "not connected".to_string(),
            });
        }

        self.state = ConnectionState::Authenticating;

        match self.login().await {
            Ok(()) => {
                self.authenticated = true;
                self.state = ConnectionState::Ready;
                info!(address = %self.config.address(), "RCON authentication succeeded");
                Ok(())
            }
            Err(e) => {
                warn!(address = %self.config.address(), error = %e, "RCON authentication failed");
                self.close();
                Err(match e {
                    RconError::Network(reason) => RconError::Connect {
                        address: self.config.address(),
                        reason,
                    },
                    other => other,
                })
            }
        }
    }

    async fn login(&mut self) -> Result<(), RconError> {
        let request_id = self.allocate_request_id();
        let password = self.config.password.clone();
        self.send(Packet::new(request_id, PacketType::Auth, password))
            .await?;

        let mut reply = self.read_required().await?;
        if reply.is_empty_response() && !reply.is_bad_password() {
            trace!(request_id = reply.request_id, "Skipping empty packet before auth reply");
            reply = self.read_required().await?;
        }

        if reply.is_bad_password() {
            return Err(RconError::Authentication("bad RCON password".to_string()));
        }
        if reply.packet_type != PacketType::AuthResponse {
            return Err(RconError::Authentication(format!(
                "unexpected reply to login: {:?} {:?}",
                reply.packet_type,
                reply.body_text()
            )));
        }
        if reply.request_id != request_id {
            return Err(RconError::Authentication(format!(
                "reply id {} does not echo request id {request_id}",
                reply.request_id
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Command Execution
    // ========================================================================

    /// Runs `command` and returns the complete reply text.
    ///
    /// A command containing newlines runs as a script: each non-blank line
    /// not starting with `//` is executed in order and the replies are
    /// concatenated. Every line is validated before anything is sent.
    pub async fn execute(&mut self, command: &str) -> Result<String, RconError> {
        let commands = script_lines(command);
        for line in &commands {
            validate_command(line)?;
        }

        if self.state == ConnectionState::Closed {
            return Err(RconError::Network("connection is closed".to_string()));
        }
        if !self.authenticated {
            return Err(RconError::NotAuthenticated);
        }

        let mut output = String::new();
        for line in commands {
            output.push_str(&self.execute_one(line).await?);
        }
        Ok(output)
    }

    async fn execute_one(&mut self, command: &str) -> Result<String, RconError> {
        self.state = ConnectionState::Executing;

        let result = self.request(command).await;

        match &result {
            Err(e) if e.invalidates_connection() => {
                warn!(
                    address = %self.config.address(),
                    error = %e,
                    "Closing RCON connection after failure"
                );
                self.close();
            }
            _ => self.state = ConnectionState::Ready,
        }
        result
    }

    async fn request(&mut self, command: &str) -> Result<String, RconError> {
        let request_id = self.allocate_request_id();
        debug!(request_id, command, "Sending RCON command");

        self.send(Packet::new(request_id, PacketType::ExecCommand, command))
            .await?;

        let body = match self.config.reassembly_mode() {
            ReassemblyMode::Single => self.read_single(request_id).await?,
            ReassemblyMode::Heuristic => self.read_heuristic(request_id).await?,
            ReassemblyMode::Sentinel => {
                let sentinel_id = self.allocate_request_id();
                self.send(Packet::new(sentinel_id, PacketType::ResponseValue, ""))
                    .await?;
                self.read_until_sentinel(request_id, sentinel_id).await?
            }
        };

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Reads one reply packet.
    async fn read_single(&mut self, request_id: i32) -> Result<Vec<u8>, RconError> {
        loop {
            let packet = self.read_required().await?;
            if let Some(packet) = self.accept(packet, request_id)? {
                return Ok(packet.body);
            }
        }
    }

    /// Reads until the stream looks drained.
    ///
    /// There is no continuation flag, so after each packet reading stops
    /// only if nothing else is buffered and the packet was small enough not
    /// to have been split. A timeout after at least one packet, with no
    /// partial frame buffered, means the expected continuation never came
    /// and ends the reply.
    async fn read_heuristic(&mut self, request_id: i32) -> Result<Vec<u8>, RconError> {
        let mut body = Vec::new();
        let mut packets = 0usize;

        loop {
            let packet = match self.read_packet().await? {
                Some(packet) => packet,
                None if packets > 0 && self.read_buf.is_empty() => {
                    debug!(request_id, packets, "No continuation arrived, ending reply");
                    break;
                }
                // Nothing at all, or a frame cut off mid-transfer.
                None => return Err(self.timed_out()),
            };

            let Some(packet) = self.accept(packet, request_id)? else {
                continue;
            };
            packets += 1;
            body.extend_from_slice(&packet.body);

            self.fill_ready().await?;
            if self.read_buf.is_empty() && packet.size < PROBABLY_SPLIT_IF_LARGER_THAN {
                break;
            }
        }

        trace!(request_id, packets, bytes = body.len(), "Reply reassembled");
        Ok(body)
    }

    /// Reads until the echo of the end marker `sentinel_id` arrives.
    async fn read_until_sentinel(
        &mut self,
        request_id: i32,
        sentinel_id: i32,
    ) -> Result<Vec<u8>, RconError> {
        let mut body = Vec::new();

        loop {
            let packet = self.read_required().await?;
            if packet.request_id == sentinel_id {
                self.last_sentinel = Some(sentinel_id);
                break;
            }
            if let Some(packet) = self.accept(packet, request_id)? {
                body.extend_from_slice(&packet.body);
            }
        }

        Ok(body)
    }

    /// Validates a reply to `request_id`. `Ok(None)` means "skip this packet".
    fn accept(&self, packet: Packet, request_id: i32) -> Result<Option<Packet>, RconError> {
        if packet.is_bad_password() {
            return Err(RconError::Authentication("bad RCON password".to_string()));
        }

        if packet.request_id != request_id {
            if packet.is_keep_alive() {
                trace!(request_id = packet.request_id, "Discarding keep-alive packet");
                return Ok(None);
            }
            if Some(packet.request_id) == self.last_sentinel {
                trace!(request_id = packet.request_id, "Discarding late end-marker echo");
                return Ok(None);
            }
            return Err(RconError::ProtocolDesync {
                got: packet.request_id,
                expected: request_id,
            });
        }

        if packet.packet_type != PacketType::ResponseValue {
            return Err(RconError::ProtocolFraming(format!(
                "invalid command response type {:?}",
                packet.packet_type
            )));
        }

        if !packet.body2.is_empty() {
            return Err(RconError::ProtocolFraming(format!(
                "invalid response message: {:?}",
                String::from_utf8_lossy(&packet.body2)
            )));
        }

        Ok(Some(packet))
    }

    // ========================================================================
    // Transport
    // ========================================================================

    fn allocate_request_id(&mut self) -> i32 {
        self.next_request_id = match self.next_request_id.checked_add(1) {
            Some(id) => id,
            None => 1,
        };
        self.next_request_id
    }

    fn timed_out(&self) -> RconError {
        RconError::Network(format!(
            "timed out after {:?} waiting for reply",
            self.config.timeout
        ))
    }

    async fn send(&mut self, packet: Packet) -> Result<(), RconError> {
        let mut frame = BytesMut::new();
        self.codec.encode(packet, &mut frame)?;

        let limit = self.config.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RconError::Network("connection is closed".to_string()))?;

        match timeout(limit, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await
        {
            Ok(result) => result.map_err(RconError::from),
            Err(_) => Err(RconError::Network(format!(
                "timed out after {limit:?} writing request"
            ))),
        }
    }

    /// Reads one frame; `Ok(None)` if the configured timeout elapsed first.
    async fn read_packet(&mut self) -> Result<Option<Packet>, RconError> {
        let limit = self.config.timeout;
        let deadline = tokio::time::Instant::now() + limit;

        loop {
            if let Some(packet) = self.codec.decode(&mut self.read_buf)? {
                return Ok(Some(packet));
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| RconError::Network("connection is closed".to_string()))?;

            match tokio::time::timeout_at(deadline, stream.read_buf(&mut self.read_buf)).await {
                Ok(Ok(0)) => {
                    return Err(RconError::Network(
                        "connection unexpectedly closed by remote host".to_string(),
                    ))
                }
                Ok(Ok(n)) => trace!(bytes = n, "Read from RCON socket"),
                Ok(Err(e)) => return Err(RconError::network(e)),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn read_required(&mut self) -> Result<Packet, RconError> {
        match self.read_packet().await? {
            Some(packet) => Ok(packet),
            None => Err(self.timed_out()),
        }
    }

    /// Pulls in whatever the socket has ready right now, without waiting.
    async fn fill_ready(&mut self) -> Result<(), RconError> {
        if !self.read_buf.is_empty() {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        // A zero timeout still polls the read once before giving up.
        match timeout(Duration::ZERO, stream.read_buf(&mut self.read_buf)).await {
            Ok(Ok(n)) => {
                trace!(bytes = n, "Drained ready bytes");
                Ok(())
            }
            Ok(Err(e)) => Err(RconError::network(e)),
            Err(_) => Ok(()),
        }
    }

    /// Releases the socket. Safe to call any number of times, from any state.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(address = %self.config.address(), "RCON connection closed");
        }
        self.read_buf.clear();
        self.authenticated = false;
        self.state = ConnectionState::Closed;
    }
}

/// Splits a script into executable lines; a plain command is returned as-is.
fn script_lines(command: &str) -> Vec<&str> {
    if !command.contains('\n') {
        return vec![command];
    }
    command
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(SCRIPT_COMMENT_PREFIX))
        .collect()
}

/// Rejects commands that cannot be framed, before any I/O.
fn validate_command(command: &str) -> Result<(), RconError> {
    if command.len() > MAX_COMMAND_LENGTH {
        return Err(RconError::CommandTooLarge {
            len: command.len(),
            max: MAX_COMMAND_LENGTH,
        });
    }
    if command.contains('\0') {
        return Err(RconError::InvalidCommand(
            "command contains an embedded NUL byte".to_string(),
        ));
    }
    Ok(())
}

//! Fixture RCON server shared by the integration suites.
//!
//! Speaks the server side of the protocol over real TCP on 127.0.0.1 with an
//! ephemeral port. Command replies come from a caller-supplied handler.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use rcon_core::ServerConfig;
use rcon_protocol::{Packet, PacketCodec, PacketType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

pub const PASSWORD: &str = "hunter2";

/// Largest body the fixture puts in one reply packet.
const CHUNK: usize = 4000;

/// What the fixture does with one EXEC command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Reply with the text, split over as many packets as needed.
    Text(String),
    /// Reply with these bodies, one packet each, in order.
    Packets(Vec<String>),
    /// Reply with the text under a request id the client never used.
    WrongId(String),
    /// Close the connection without replying.
    Drop,
    /// Never reply.
    Silence,
}

type Handler = Arc<dyn Fn(&str) -> Reply + Send + Sync>;

/// Installs a test log subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A running fixture server.
pub struct FixtureServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    exec_count: Arc<AtomicUsize>,
    accepting: CancellationToken,
    shutdown: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl FixtureServer {
    /// Starts a server that answers every command with `echo:<command>`.
    pub async fn spawn() -> Self {
        Self::with_handler(|cmd| Reply::Text(format!("echo:{cmd}"))).await
    }

    pub async fn with_handler(handler: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture");
        let addr = listener.local_addr().expect("fixture address");
        let commands = Arc::new(Mutex::new(Vec::new()));
        let exec_count = Arc::new(AtomicUsize::new(0));
        let accepting = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let handler: Handler = Arc::new(handler);

        let accept_task = tokio::spawn({
            let commands = Arc::clone(&commands);
            let exec_count = Arc::clone(&exec_count);
            let accepting = accepting.clone();
            let shutdown = shutdown.clone();
            async move {
                loop {
                    let stream = tokio::select! {
                        _ = accepting.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => stream,
                            Err(_) => break,
                        },
                    };
                    let session = FixtureSession {
                        stream,
                        buf: BytesMut::new(),
                        codec: PacketCodec::server(),
                        handler: Arc::clone(&handler),
                        commands: Arc::clone(&commands),
                        exec_count: Arc::clone(&exec_count),
                    };
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = session.serve() => {}
                        }
                    });
                }
                // Listener dropped here: later connects are refused.
            }
        });

        Self {
            addr,
            commands,
            exec_count,
            accepting,
            shutdown,
            accept_task: Some(accept_task),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Config pointing at this server with the right password.
    pub fn config(&self) -> ServerConfig {
        ServerConfig::new("127.0.0.1", self.port(), PASSWORD)
            .with_timeout(Duration::from_millis(500))
    }

    /// Config pointing at this server with a wrong password.
    pub fn config_with_password(&self, password: &str) -> ServerConfig {
        ServerConfig::new("127.0.0.1", self.port(), password)
            .with_timeout(Duration::from_millis(500))
    }

    /// Number of EXEC packets received so far, across all connections.
    pub fn exec_count(&self) -> usize {
        self.exec_count.load(Ordering::SeqCst)
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    /// Stops accepting connections; established ones keep working.
    pub async fn refuse_new_connections(&mut self) {
        self.accepting.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
    }

    /// Closes the listener and every established connection.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        self.refuse_new_connections().await;
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.accepting.cancel();
        self.shutdown.cancel();
    }
}

struct FixtureSession {
    stream: TcpStream,
    buf: BytesMut,
    codec: PacketCodec,
    handler: Handler,
    commands: Arc<Mutex<Vec<String>>>,
    exec_count: Arc<AtomicUsize>,
}

impl FixtureSession {
    async fn serve(mut self) {
        while let Some(packet) = self.recv().await {
            let replies = match packet.packet_type {
                PacketType::Auth => {
                    let id = if packet.body == PASSWORD.as_bytes() {
                        packet.request_id
                    } else {
                        -1
                    };
                    vec![
                        Packet::new(packet.request_id, PacketType::ResponseValue, ""),
                        Packet::new(id, PacketType::AuthResponse, ""),
                    ]
                }
                PacketType::ExecCommand => {
                    let command = packet.body_text().into_owned();
                    self.exec_count.fetch_add(1, Ordering::SeqCst);
                    self.commands.lock().expect("commands lock").push(command.clone());

                    match (self.handler)(&command) {
                        Reply::Text(text) => chunks(&text)
                            .into_iter()
                            .map(|body| Packet::new(packet.request_id, PacketType::ResponseValue, body))
                            .collect(),
                        Reply::Packets(bodies) => bodies
                            .into_iter()
                            .map(|body| Packet::new(packet.request_id, PacketType::ResponseValue, body))
                            .collect(),
                        Reply::WrongId(text) => vec![Packet::new(
                            packet.request_id.wrapping_add(1000),
                            PacketType::ResponseValue,
                            text,
                        )],
                        Reply::Drop => return,
                        Reply::Silence => Vec::new(),
                    }
                }
                // End-of-reply marker: echo it back empty.
                PacketType::ResponseValue => {
                    vec![Packet::new(packet.request_id, PacketType::ResponseValue, "")]
                }
                PacketType::AuthResponse => Vec::new(),
            };

            if !self.send(replies).await {
                return;
            }
        }
    }

    async fn recv(&mut self) -> Option<Packet> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(packet)) => return Some(packet),
                Ok(None) => {}
                Err(_) => return None,
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    async fn send(&mut self, packets: Vec<Packet>) -> bool {
        if packets.is_empty() {
            return true;
        }
        let mut out = BytesMut::new();
        for packet in packets {
            if self.codec.encode(packet, &mut out).is_err() {
                return false;
            }
        }
        self.stream.write_all(&out).await.is_ok()
    }
}

fn chunks(text: &str) -> Vec<Vec<u8>> {
    if text.is_empty() {
        return vec![Vec::new()];
    }
    text.as_bytes().chunks(CHUNK).map(<[u8]>::to_vec).collect()
}

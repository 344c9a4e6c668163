//! rcond - Remote console client with live chat bridging
//!
//! Talks to game servers registered in the settings file. Each invocation
//! binds one local channel (the terminal) to one server.
//!
//! # Usage
//!
//! ```bash
//! # Run a single command
//! rcond exec main status
//!
//! # Interactive console, reconnecting on drops
//! rcond console main --auto-reconnect
//!
//! # Relay server chat to stdout, stdin lines to the server
//! rcond chat main --receive getchat --send say
//!
//! # List configured servers
//! rcond servers
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rcon_core::{ChannelId, ChatBinding, ServerDirectory, Settings};
use rcond::registry::{spawn_registry, RegistryConfig, RegistryHandle};
use rcond::{ChannelSink, SessionEvent};

/// Remote console client with live chat bridging
#[derive(Parser, Debug)]
#[command(name = "rcond", version, about)]
struct Args {
    /// Settings file with the server table
    #[arg(long, global = true, env = "RCON_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one command and print the reply
    Exec {
        /// Server name from the settings file
        server: String,
        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Read commands from stdin until EOF
    Console {
        server: String,
        /// Reconnect when the connection drops
        #[arg(long)]
        auto_reconnect: bool,
    },
    /// Bridge server chat with this terminal
    Chat {
        server: String,
        /// Server command returning new chat lines
        #[arg(long)]
        receive: String,
        /// Server command prefix used to say something
        #[arg(long)]
        send: String,
        /// Poll reply meaning "no new chat"
        #[arg(long)]
        sentinel: Option<String>,
        /// Author shown for lines typed here
        #[arg(long, default_value = "console")]
        name: String,
    },
    /// List configured servers
    Servers {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rcon-bridge")
        .join("servers.toml")
}

/// Prints relayed chat pages to stdout.
struct StdoutSink;

#[async_trait]
impl ChannelSink for StdoutSink {
    async fn emit(&self, _channel_id: &ChannelId, text: &str) {
        println!("{text}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rcond=info".parse()?)
                .add_directive("rcon_core=info".parse()?)
                .add_directive("rcon_protocol=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let settings = Settings::load(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    match args.command {
        Command::Servers { json } => list_servers(&settings, json),
        Command::Exec { server, command } => {
            let registry = spawn_registry(RegistryConfig::from(&settings));
            let channel = connect(&registry, &settings, &server, false).await?;
            let result = registry.execute(&channel, &command.join(" ")).await;
            let _ = registry.shutdown().await;

            let reply = result.with_context(|| format!("Command failed on {server}"))?;
            print_reply(&reply);
            Ok(())
        }
        Command::Console {
            server,
            auto_reconnect,
        } => {
            let registry = spawn_registry(RegistryConfig::from(&settings));
            let channel = connect(&registry, &settings, &server, auto_reconnect).await?;
            let result = run_console(&registry, &channel).await;
            let _ = registry.shutdown().await;
            result
        }
        Command::Chat {
            server,
            receive,
            send,
            sentinel,
            name,
        } => {
            let registry = spawn_registry(RegistryConfig::from(&settings));
            let channel = connect(&registry, &settings, &server, true).await?;

            let mut binding = ChatBinding::new(send, receive);
            if let Some(sentinel) = sentinel {
                binding = binding.with_sentinel(sentinel);
            }
            registry
                .enable_chat(&channel, binding, Arc::new(StdoutSink))
                .await
                .context("Failed to start chat bridge")?;

            let result = run_chat(&registry, &channel, &name).await;
            let _ = registry.shutdown().await;
            result
        }
    }
}

fn list_servers(settings: &Settings, json: bool) -> Result<()> {
    let names = settings.names();

    if json {
        let servers: Vec<_> = names
            .iter()
            .filter_map(|name| settings.server(name).map(|config| (name, config)))
            .map(|(name, config)| {
                serde_json::json!({
                    "name": name,
                    "address": config.address(),
                    "mode": config.reassembly_mode().to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&servers)?);
        return Ok(());
    }

    if names.is_empty() {
        println!("No servers configured.");
        return Ok(());
    }
    for name in names {
        if let Some(config) = settings.server(&name) {
            println!("{name:<20} {:<24} {}", config.address(), config.reassembly_mode());
        }
    }
    Ok(())
}

/// Binds the terminal channel to `server`.
async fn connect(
    registry: &RegistryHandle,
    settings: &Settings,
    server: &str,
    auto_reconnect: bool,
) -> Result<ChannelId> {
    let config = settings.require_server(server)?;
    let channel = ChannelId::new(format!("tty:{server}"));

    registry
        .connect(channel.clone(), config, auto_reconnect)
        .await
        .with_context(|| format!("Failed to connect to {server}"))?;

    Ok(channel)
}

async fn run_console(registry: &RegistryHandle, channel: &ChannelId) -> Result<()> {
    let mut events = registry.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match registry.execute(channel, &line).await {
                    Ok(reply) => print_reply(&reply),
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Session ended");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Command failed"),
                }
            }
            event = events.recv() => {
                if !report_event(event, channel) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

async fn run_chat(registry: &RegistryHandle, channel: &ChannelId, name: &str) -> Result<()> {
    let mut events = registry.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = registry.post_chat(channel, name, line).await {
                    warn!(error = %e, "Chat message not sent");
                }
            }
            event = events.recv() => {
                if !report_event(event, channel) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Logs registry events for `channel`. Returns false once the channel is gone.
fn report_event(
    event: Result<SessionEvent, broadcast::error::RecvError>,
    channel: &ChannelId,
) -> bool {
    match event {
        Ok(SessionEvent::ReconnectAttempt { channel_id, attempt }) if &channel_id == channel => {
            if attempt == 0 {
                info!("Reconnected");
            } else {
                warn!(attempt, "Connection lost, reconnecting");
            }
            true
        }
        Ok(SessionEvent::Removed { channel_id, reason }) if &channel_id == channel => {
            error!(%reason, "Session closed");
            false
        }
        Ok(_) => true,
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "Missed registry events");
            true
        }
        Err(broadcast::error::RecvError::Closed) => false,
    }
}

fn print_reply(reply: &str) {
    let reply = reply.trim_end();
    if !reply.is_empty() {
        println!("{reply}");
    }
}

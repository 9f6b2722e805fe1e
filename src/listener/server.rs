//! Local TCP endpoint accepting one text command per connection.

use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

/// Address the listener binds to by default.
pub const DEFAULT_LISTENER_ADDR: &str = "127.0.0.1:65432";

/// Maximum size of one command.
const MAX_COMMAND_LEN: usize = 1024;

/// Listener errors.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Missing object class after 'pick'")]
    MissingClass,
    #[error("Command is not valid UTF-8")]
    InvalidUtf8,
    #[error("Command channel closed")]
    ChannelClosed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickCommand {
    /// Pick one object of any of the listed classes.
    Pick(Vec<String>),
    /// Pick any object with a known sorting position.
    PickAll,
    Home,
    Stop,
}

impl PickCommand {
    /// Parse `pick <class>[, <class>...]`, `pick all`, `home` or `stop`.
    pub fn parse(input: &str) -> Result<Self, ListenerError> {
        let input = input.trim().to_lowercase();
        if input.is_empty() {
            return Err(ListenerError::Empty);
        }

        let (verb, rest) = match input.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (input.as_str(), ""),
        };

        match verb {
            "home" if rest.is_empty() => Ok(PickCommand::Home),
            "stop" | "quit" if rest.is_empty() => Ok(PickCommand::Stop),
            "pick" if rest == "all" => Ok(PickCommand::PickAll),
            "pick" => {
                let classes: Vec<String> = rest
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if classes.is_empty() {
                    Err(ListenerError::MissingClass)
                } else {
                    Ok(PickCommand::Pick(classes))
                }
            }
            _ => Err(ListenerError::Unknown(input.clone())),
        }
    }
}

impl FromStr for PickCommand {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Accepts commands and forwards them to the control loop.
pub struct CommandListener {
    listener: TcpListener,
}

impl CommandListener {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Command listener active on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until a `stop` command is forwarded or the receiver goes away.
    pub async fn run(self, commands: mpsc::Sender<PickCommand>) -> Result<(), ListenerError> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            match handle_connection(socket, &commands).await {
                Ok(Some(PickCommand::Stop)) => {
                    tracing::info!("Stop requested by {}", peer);
                    return Ok(());
                }
                Ok(_) => {}
                Err(ListenerError::ChannelClosed) => return Ok(()),
                Err(e) => tracing::warn!("Bad command from {}: {}", peer, e),
            }
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    commands: &mpsc::Sender<PickCommand>,
) -> Result<Option<PickCommand>, ListenerError> {
    let mut buf = vec![0u8; MAX_COMMAND_LEN];
    let n = socket.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }

    let parsed = std::str::from_utf8(&buf[..n])
        .map_err(|_| ListenerError::InvalidUtf8)
        .and_then(PickCommand::parse);

    let command = match parsed {
        Ok(command) => command,
        Err(e) => {
            let _ = socket.write_all(format!("error: {}\n", e).as_bytes()).await;
            return Err(e);
        }
    };

    tracing::info!("Command received: {:?}", command);
    commands
        .send(command.clone())
        .await
        .map_err(|_| ListenerError::ChannelClosed)?;
    socket.write_all(b"ok\n").await?;
    Ok(Some(command))
}

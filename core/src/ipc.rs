//! Control socket between the CLI and a running daemon.
//!
//! One message per connection: [`IPC_MAGIC`] followed by a command line such
//! as `PIN:42`. Only connections from the daemon's own user are served.

use crate::error::IpcError;
use crate::item::ItemId;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

pub const IPC_MAGIC: &[u8] = b"CLIP\x00\x01";
pub const MAX_IPC_MESSAGE_SIZE: usize = 4096;
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Copy(ItemId),
    Pin(ItemId),
    Unpin(ItemId),
    Delete(ItemId),
    /// Clear unpinned history.
    Clear,
    ClearAll,
    IgnoreNext,
    Pause,
    Resume,
    Reword(usize),
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, IpcError> {
        let text = text.trim();
        let (name, arg) = match text.split_once(':') {
            Some((name, arg)) => (name, Some(arg.trim())),
            None => (text, None),
        };

        let id = |command: &'static str| -> Result<ItemId, IpcError> {
            let value = arg.unwrap_or_default();
            value.parse().map_err(|_| IpcError::BadArgument {
                command,
                value: value.to_string(),
            })
        };

        Ok(match (name, arg) {
            ("COPY", Some(_)) => Command::Copy(id("COPY")?),
            ("PIN", Some(_)) => Command::Pin(id("PIN")?),
            ("UNPIN", Some(_)) => Command::Unpin(id("UNPIN")?),
            ("DELETE", Some(_)) => Command::Delete(id("DELETE")?),
            ("REWORD", Some(value)) => {
                Command::Reword(value.parse().map_err(|_| IpcError::BadArgument {
                    command: "REWORD",
                    value: value.to_string(),
                })?)
            }
            ("CLEAR", None) => Command::Clear,
            ("CLEAR_ALL", None) => Command::ClearAll,
            ("IGNORE_NEXT", None) => Command::IgnoreNext,
            ("PAUSE", None) => Command::Pause,
            ("RESUME", None) => Command::Resume,
            _ => return Err(IpcError::UnknownCommand(text.to_string())),
        })
    }

    /// Strips the magic header and parses the rest.
    pub fn decode(message: &[u8]) -> Result<Self, IpcError> {
        let body = message.strip_prefix(IPC_MAGIC).ok_or(IpcError::BadMagic)?;
        let text = std::str::from_utf8(body)
            .map_err(|_| IpcError::UnknownCommand(String::from_utf8_lossy(body).into_owned()))?;
        Self::parse(text)
    }

    pub fn encode(&self) -> Vec<u8> {
        let text = self.to_string();
        let mut msg = Vec::with_capacity(IPC_MAGIC.len() + text.len());
        msg.extend_from_slice(IPC_MAGIC);
        msg.extend_from_slice(text.as_bytes());
        msg
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Copy(id) => write!(f, "COPY:{}", id),
            Command::Pin(id) => write!(f, "PIN:{}", id),
            Command::Unpin(id) => write!(f, "UNPIN:{}", id),
            Command::Delete(id) => write!(f, "DELETE:{}", id),
            Command::Clear => f.write_str("CLEAR"),
            Command::ClearAll => f.write_str("CLEAR_ALL"),
            Command::IgnoreNext => f.write_str("IGNORE_NEXT"),
            Command::Pause => f.write_str("PAUSE"),
            Command::Resume => f.write_str("RESUME"),
            Command::Reword(index) => write!(f, "REWORD:{}", index),
        }
    }
}

pub fn socket_path() -> PathBuf {
    std::env::temp_dir().join("clipstack.sock")
}

/// Accepts commands on `sock_path` and forwards them to `tx` until the
/// receiver goes away.
#[cfg(unix)]
pub async fn serve(tx: mpsc::Sender<Command>, sock_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    let _ = std::fs::remove_file(sock_path);
    let listener = UnixListener::bind(sock_path)
        .with_context(|| format!("Failed to bind {}", sock_path.display()))?;
    std::fs::set_permissions(sock_path, std::fs::Permissions::from_mode(0o700))?;

    loop {
        let (mut stream, _addr) = listener.accept().await?;

        match stream.peer_cred() {
            Ok(cred) => {
                let current_uid = unsafe { libc::getuid() };
                if cred.uid() != current_uid {
                    warn!("rejecting control connection from uid {}", cred.uid());
                    continue;
                }
            }
            Err(e) => {
                warn!("cannot read peer credentials: {}", e);
                continue;
            }
        }

        let tx = tx.clone();
        tokio::spawn(async move {
            let mut buf = Vec::with_capacity(MAX_IPC_MESSAGE_SIZE);
            let mut limited = (&mut stream).take(MAX_IPC_MESSAGE_SIZE as u64);
            if let Err(e) = limited.read_to_end(&mut buf).await {
                debug!("control connection dropped: {}", e);
                return;
            }

            match Command::decode(&buf) {
                Ok(cmd) => {
                    debug!("control command {}", cmd);
                    let _ = tx.send(cmd).await;
                }
                Err(e) => warn!("bad control message: {}", e),
            }
        });
    }
}

#[cfg(not(unix))]
pub async fn serve(_tx: mpsc::Sender<Command>, _sock_path: &Path) -> Result<()> {
    anyhow::bail!("control socket is only supported on unix")
}

#[cfg(unix)]
pub async fn send_command(cmd: &Command, sock_path: &Path) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;
    use tokio::time::timeout;

    let mut stream = timeout(SEND_TIMEOUT, UnixStream::connect(sock_path))
        .await
        .context("Connection timeout")?
        .context("Failed to connect to daemon")?;

    stream.write_all(&cmd.encode()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn send_command(_cmd: &Command, _sock_path: &Path) -> Result<()> {
    anyhow::bail!("control socket is only supported on unix")
}

//! Line-delimited JSON clients for the hypervisor monitor (QMP) and the
//! guest agent: implements the `GuestChannel` port.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::application::ports::GuestChannel;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Unix-socket JSON channel with a per-reply timeout.
pub struct SocketChannel {
    timeout: Duration,
}

impl SocketChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: REPLY_TIMEOUT,
        }
    }
}

impl Default for SocketChannel {
    fn default() -> Self {
        Self::new()
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl Connection {
    async fn open(socket: &Path, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(socket))
            .await
            .with_context(|| format!("connecting to {} timed out", socket.display()))?
            .with_context(|| format!("connecting to {}", socket.display()))?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer,
            timeout,
        })
    }

    async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(message).context("encoding request")?;
        line.push(b'\n');
        self.writer.write_all(&line).await.context("writing request")?;
        Ok(())
    }

    /// Next message that is a reply, skipping asynchronous events.
    async fn reply(&mut self) -> Result<Value> {
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
                .await
                .context("timed out waiting for reply")?
                .context("reading reply")?;
            if read == 0 {
                anyhow::bail!("connection closed before reply");
            }
            let message: Value = match serde_json::from_str(line.trim()) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable line");
                    continue;
                }
            };
            if message.get("event").is_some() || message.get("QMP").is_some() {
                continue;
            }
            return unwrap_reply(message);
        }
    }
}

fn unwrap_reply(message: Value) -> Result<Value> {
    if let Some(error) = message.get("error") {
        let class = error.get("class").and_then(Value::as_str).unwrap_or("Error");
        let desc = error.get("desc").and_then(Value::as_str).unwrap_or("");
        anyhow::bail!("{class}: {desc}");
    }
    match message {
        Value::Object(mut map) => map
            .remove("return")
            .ok_or_else(|| anyhow::anyhow!("reply has no return value")),
        _ => anyhow::bail!("unexpected reply"),
    }
}

impl GuestChannel for SocketChannel {
    async fn agent_command(&self, socket: &Path, command: &str) -> Result<Value> {
        let mut conn = Connection::open(socket, self.timeout).await?;
        // guest-sync discards whatever a previous client left in the channel.
        let token: u32 = rand::random::<u32>() & 0x7fff_ffff;
        conn.send(&json!({"execute": "guest-sync", "arguments": {"id": token}}))
            .await?;
        loop {
            let synced = conn.reply().await?;
            if synced.as_u64() == Some(u64::from(token)) {
                break;
            }
        }
        conn.send(&json!({ "execute": command })).await?;
        let reply = conn.reply().await;
        tracing::debug!(socket = %socket.display(), command, ok = reply.is_ok(), "guest agent command");
        reply
    }

    async fn monitor_command(&self, socket: &Path, command: &str, arguments: Value) -> Result<Value> {
        let mut conn = Connection::open(socket, self.timeout).await?;
        conn.send(&json!({"execute": "qmp_capabilities"})).await?;
        conn.reply().await.context("negotiating monitor capabilities")?;
        let request = if arguments.is_null() {
            json!({ "execute": command })
        } else {
            json!({ "execute": command, "arguments": arguments })
        };
        conn.send(&request).await?;
        let reply = conn.reply().await;
        tracing::debug!(socket = %socket.display(), command, ok = reply.is_ok(), "monitor command");
        reply
    }
}

//! Message transport.
//!
//! [`MessageChannel`] is the byte-stream seam of the network device: the
//! session driver only sees whole [`NetMessage`]s. [`LineChannel`] frames
//! them as newline terminated JSON over any async stream pair.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::Result;
use crate::protocol::NetMessage;

/// A duplex channel of network messages.
#[async_trait]
pub trait MessageChannel: Send {
    /// Send one message.
    async fn send(&mut self, msg: &NetMessage) -> Result<()>;

    /// Receive the next message, `None` once the peer closed the connection.
    ///
    /// Must be cancel safe: a dropped call loses no message.
    async fn recv(&mut self) -> Result<Option<NetMessage>>;
}

/// Newline framed JSON messages.
pub struct LineChannel<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }
}

impl LineChannel<OwnedReadHalf, OwnedWriteHalf> {
    /// Frame a TCP connection.
    pub fn tcp(stream: TcpStream) -> Self {
        // Heartbeats and acks are small; do not let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to disable Nagle");
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Connect to `addr`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        tracing::info!(addr, "Connected");
        Ok(Self::tcp(stream))
    }
}

#[async_trait]
impl<R, W> MessageChannel for LineChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: &NetMessage) -> Result<()> {
        let mut line = msg.to_line()?;
        line.push('\n');
        tracing::trace!(kind = msg.kind(), "Sending message");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<NetMessage>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            let msg = NetMessage::from_line(&line)?;
            tracing::trace!(kind = msg.kind(), "Received message");
            return Ok(Some(msg));
        }
    }
}

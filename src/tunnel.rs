//! Bidirectional RPC tunnel over one byte stream.
//!
//! ```text
//! accepting side                       initiating side
//!   write id (i32 BE) ───────────────▶ read id
//!   yamux Mode::Server                 yamux Mode::Client
//!   open  ── calling stream ─────────▶ accept → serve
//!   accept ◀──────── calling stream ── open
//!   serve
//! ```
//!
//! After setup each side holds one stream on which it *calls* the peer
//! ([`RpcClient`]) and one on which it *answers* the peer (served with
//! [`rpc::serve`](crate::rpc::serve)). The id handshake is the only
//! unframed data on the connection; everything after it is yamux.
//!
//! yamux announces a new stream with its first frame, so neither side
//! waits for the other's stream during setup. The serving stream is taken
//! with [`Connection::accept`] once the tunnel is up.

use crate::rpc::{RpcClient, DEFAULT_MAX_LINE};
use crate::types::ClientId;
use std::collections::VecDeque;
use std::future::poll_fn;
use std::io;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

pub use yamux::Mode;

/// A multiplexed sub-stream, adapted to tokio's I/O traits.
pub type MuxStream = Compat<yamux::Stream>;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("id handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("failed to open outbound stream: {0}")]
    Open(#[source] io::Error),

    #[error("failed to accept inbound stream: {0}")]
    Accept(#[source] io::Error),
}

/// Tunables shared by both ends.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Streams a peer may have open on one connection. Two are used.
    pub max_streams: usize,
    /// Outbound requests that may wait for the stream before notifications
    /// start being dropped.
    pub notify_queue_depth: usize,
    /// Longest RPC line accepted.
    pub max_line: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            max_streams: 8,
            notify_queue_depth: 256,
            max_line: DEFAULT_MAX_LINE,
        }
    }
}

impl TunnelConfig {
    fn yamux(&self) -> yamux::Config {
        let mut config = yamux::Config::default();
        config.set_max_num_streams(self.max_streams.max(2));
        config
    }
}

pub async fn write_client_id<W: AsyncWrite + Unpin>(writer: &mut W, id: ClientId) -> io::Result<()> {
    writer.write_i32(id).await?;
    writer.flush().await
}

pub async fn read_client_id<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<ClientId> {
    reader.read_i32().await
}

// ---------------------------------------------------------------------------
// Connection driver
// ---------------------------------------------------------------------------

type OpenReply = oneshot::Sender<Result<yamux::Stream, yamux::ConnectionError>>;

enum Command {
    Open(OpenReply),
    Close,
}

enum Ending {
    Closing,
    Remote,
    Failed(yamux::ConnectionError),
}

/// Handle to a yamux connection running on its own task.
///
/// Dropping the handle closes the connection. Streams already handed out
/// see end of stream once it is gone.
pub struct Connection {
    mode: Mode,
    commands: mpsc::UnboundedSender<Command>,
    inbound: Mutex<mpsc::UnboundedReceiver<yamux::Stream>>,
    closed: watch::Receiver<bool>,
}

impl Connection {
    pub fn new<T>(io: T, mode: Mode, config: &TunnelConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = yamux::Connection::new(io.compat(), config.yamux(), mode);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (closed_tx, closed) = watch::channel(false);
        tokio::spawn(drive(conn, mode, commands_rx, inbound_tx, closed_tx));
        Self {
            mode,
            commands,
            inbound: Mutex::new(inbound),
            closed,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Open a stream toward the peer.
    pub async fn open(&self) -> io::Result<MuxStream> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Open(reply))
            .map_err(|_| closed_error())?;
        match rx.await {
            Ok(Ok(stream)) => Ok(stream.compat()),
            Ok(Err(e)) => Err(io::Error::other(e)),
            Err(_) => Err(closed_error()),
        }
    }

    /// Next stream the peer opened.
    pub async fn accept(&self) -> io::Result<MuxStream> {
        match self.inbound.lock().await.recv().await {
            Some(stream) => Ok(stream.compat()),
            None => Err(closed_error()),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the connection is gone, for whatever reason.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Send go-away and tear the connection down. Idempotent.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
}

async fn drive<T>(
    mut conn: yamux::Connection<Compat<T>>,
    mode: Mode,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<yamux::Stream>,
    closed: watch::Sender<bool>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut opening: VecDeque<OpenReply> = VecDeque::new();
    let ending = poll_fn(|cx| {
        loop {
            match commands.poll_recv(cx) {
                Poll::Ready(Some(Command::Open(reply))) => opening.push_back(reply),
                Poll::Ready(Some(Command::Close)) | Poll::Ready(None) => {
                    return Poll::Ready(Ending::Closing)
                }
                Poll::Pending => break,
            }
        }

        while let Some(reply) = opening.pop_front() {
            match conn.poll_new_outbound(cx) {
                Poll::Ready(result) => {
                    let _ = reply.send(result);
                }
                Poll::Pending => {
                    opening.push_front(reply);
                    break;
                }
            }
        }

        // Polling for inbound streams is what drives the connection's I/O.
        loop {
            match conn.poll_next_inbound(cx) {
                Poll::Ready(Some(Ok(stream))) => {
                    if inbound.send(stream).is_err() {
                        log::debug!("{:?} connection: inbound stream refused", mode);
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Ending::Failed(e)),
                Poll::Ready(None) => return Poll::Ready(Ending::Remote),
                Poll::Pending => return Poll::Pending,
            }
        }
    })
    .await;

    match ending {
        Ending::Closing => {
            match tokio::time::timeout(CLOSE_GRACE, poll_fn(|cx| conn.poll_close(cx))).await {
                Ok(Ok(())) => log::debug!("{:?} connection closed", mode),
                Ok(Err(e)) => log::debug!("{:?} connection close failed: {}", mode, e),
                Err(_) => log::debug!("{:?} connection close timed out", mode),
            }
        }
        Ending::Remote => log::debug!("{:?} connection closed by peer", mode),
        Ending::Failed(e) => log::debug!("{:?} connection failed: {}", mode, e),
    }
    closed.send_replace(true);
}

// ---------------------------------------------------------------------------
// Tunnel
// ---------------------------------------------------------------------------

/// A set-up tunnel: the connection plus a caller toward the peer.
pub struct Tunnel {
    conn: Arc<Connection>,
    peer: RpcClient,
}

impl Tunnel {
    /// Accepting side. The id must already have been written to `io`.
    pub async fn accept<T>(io: T, config: &TunnelConfig) -> Result<Self, TunnelError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::establish(Connection::new(io, Mode::Server, config), config).await
    }

    /// Initiating side. The id must already have been read from `io`.
    pub async fn connect<T>(io: T, config: &TunnelConfig) -> Result<Self, TunnelError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::establish(Connection::new(io, Mode::Client, config), config).await
    }

    async fn establish(conn: Connection, config: &TunnelConfig) -> Result<Self, TunnelError> {
        let outbound = conn.open().await.map_err(TunnelError::Open)?;
        log::debug!(
            "tunnel up ({:?}): calling on stream {}",
            conn.mode(),
            outbound.get_ref().id()
        );
        Ok(Self {
            peer: RpcClient::new(outbound, config.notify_queue_depth, config.max_line),
            conn: Arc::new(conn),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn peer(&self) -> &RpcClient {
        &self.peer
    }

    /// The stream the peer calls on; serve it with
    /// [`rpc::serve`](crate::rpc::serve).
    pub async fn inbound(&self) -> Result<MuxStream, TunnelError> {
        self.conn.accept().await.map_err(TunnelError::Accept)
    }

    /// `(connection, caller toward the peer)`.
    pub fn into_parts(self) -> (Arc<Connection>, RpcClient) {
        (self.conn, self.peer)
    }
}

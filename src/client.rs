//! Initiating side of the tunnel.
//!
//! A [`Client`] reads its id, sets up the tunnel and serves the caller's
//! [`Router`] (typically `Block.UpdateBlock` and `Player.RemovePlayer`
//! handlers for server pushes) on a background task.

use crate::rpc::{self, Router, RpcClient, RpcError};
use crate::tunnel::{self, Connection, Tunnel, TunnelConfig, TunnelError};
use crate::types::ClientId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;

pub struct Client {
    id: ClientId,
    server: RpcClient,
    conn: Arc<Connection>,
    serving: JoinHandle<()>,
}

impl Client {
    pub async fn connect(
        addr: impl ToSocketAddrs,
        router: Router,
        config: &TunnelConfig,
    ) -> Result<Self, TunnelError> {
        let stream = TcpStream::connect(addr).await.map_err(TunnelError::Connect)?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("set_nodelay failed: {}", e);
        }
        Self::start(stream, router, config).await
    }

    /// Run the handshake over an established byte stream.
    pub async fn start<T>(mut io: T, router: Router, config: &TunnelConfig) -> Result<Self, TunnelError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = tunnel::read_client_id(&mut io)
            .await
            .map_err(TunnelError::Handshake)?;
        let (conn, server) = Tunnel::connect(io, config).await?.into_parts();

        let max_line = config.max_line;
        let router = Arc::new(router);
        let pushes = conn.clone();
        let serving = tokio::spawn(async move {
            let inbound = match pushes.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    log::debug!("client {}: no push stream: {}", id, e);
                    return;
                }
            };
            if let Err(e) = rpc::serve(router, inbound, max_line).await {
                log::debug!("client {}: serving pushes ended: {}", id, e);
            }
        });
        log::info!("connected as client {}", id);

        Ok(Self {
            id,
            server,
            conn,
            serving,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub async fn call<Req, Resp>(&self, method: &str, params: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.server.call(method, params).await
    }

    pub fn notify<Req: Serialize>(&self, method: &str, params: &Req) -> Result<(), RpcError> {
        self.server.notify(method, params)
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Resolve once the server side is gone.
    pub async fn closed(&self) {
        self.conn.closed().await
    }

    pub fn close(&self) {
        self.conn.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.serving.abort();
        self.conn.close();
    }
}

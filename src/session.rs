//! Per-connection session handle.

use crate::rpc::{RpcClient, RpcError};
use crate::tunnel::Connection;
use crate::types::ClientId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A registered peer: its id, a caller toward it and its connection.
pub struct Session {
    id: ClientId,
    peer: RpcClient,
    conn: Arc<Connection>,
}

impl Session {
    pub fn new(id: ClientId, peer: RpcClient, conn: Arc<Connection>) -> Self {
        Self { id, peer, conn }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Call a method the peer serves and wait for the reply.
    pub async fn call<Req, Resp>(&self, method: &str, params: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.peer.call(method, params).await
    }

    /// Best-effort push. Returns whether the request was queued; a full
    /// queue or a dead connection drops it with a warning.
    pub fn notify<Req: Serialize>(&self, method: &str, params: &Req) -> bool {
        match self.peer.notify(method, params) {
            Ok(()) => true,
            Err(RpcError::Closed) => {
                log::debug!("session {} closed; dropping {}", self.id, method);
                false
            }
            Err(e) => {
                log::warn!("dropping {} to session {}: {}", method, self.id, e);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Tear down the connection. Idempotent.
    pub fn close(&self) {
        self.conn.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

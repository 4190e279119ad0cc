//! Connection acceptor and session registry.
//!
//! ## Session lifecycle
//!
//! ```text
//! accept ─▶ HANDSHAKING ─▶ REGISTERED ─▶ CLOSED
//!             write id       Online hook    removed, Offline hook,
//!             set up tunnel  accept + serve connection torn down
//! ```
//!
//! Each connection runs on its own task. A handshake or tunnel failure
//! closes the connection before it is ever registered. Once registered,
//! the session is always removed and the Offline hook always fires,
//! however serving ends.

use crate::rpc::{self, Router, RpcService};
use crate::session::Session;
use crate::tunnel::{self, Tunnel, TunnelConfig};
use crate::types::ClientId;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::Instrument;

/// Session lifecycle event delivered to [`SessionRegistry::on_lifecycle`]
/// hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

type LifecycleHook = Box<dyn Fn(Presence, ClientId) + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Live sessions keyed by client id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<ClientId, Arc<Session>>>,
    hooks: RwLock<Vec<LifecycleHook>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        if let Some(old) = self.sessions.lock().insert(session.id(), session) {
            log::warn!("session {} replaced while still registered", old.id());
            old.close();
        }
    }

    pub fn remove(&self, id: ClientId) -> Option<Arc<Session>> {
        self.sessions.lock().remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Visit every session registered at the time of the call, in id
    /// order. The registry is not locked while `f` runs, so `f` may insert
    /// or remove sessions.
    pub fn range_session(&self, mut f: impl FnMut(ClientId, &Arc<Session>)) {
        let snapshot: Vec<_> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();
        for (id, session) in &snapshot {
            f(*id, session);
        }
    }

    /// Best-effort push of `method` to every session except `except`.
    /// Returns the number of sessions the push was queued for.
    pub fn broadcast<Req: Serialize>(&self, except: ClientId, method: &str, params: &Req) -> usize {
        let mut queued = 0;
        self.range_session(|id, session| {
            if id != except && session.notify(method, params) {
                queued += 1;
            }
        });
        queued
    }

    /// Register a hook run on every Online and Offline event.
    pub fn on_lifecycle(&self, hook: impl Fn(Presence, ClientId) + Send + Sync + 'static) {
        self.hooks.write().push(Box::new(hook));
    }

    pub(crate) fn fire(&self, presence: Presence, id: ClientId) {
        for hook in self.hooks.read().iter() {
            hook(presence, id);
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server {
    config: TunnelConfig,
    registry: Arc<SessionRegistry>,
    router: Arc<Router>,
    last_id: AtomicI32,
    shutdown: watch::Sender<bool>,
}

impl Server {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            router: Arc::new(Router::new()),
            last_id: AtomicI32::new(0),
            shutdown: watch::channel(false).0,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Publish `service`'s methods under `name`. Must happen before
    /// serving starts.
    pub fn register_service<S: RpcService>(&mut self, name: &str, service: Arc<S>) {
        Arc::make_mut(&mut self.router).register(name, service);
        log::info!("registered service {}", name);
    }

    fn next_client_id(&self) -> ClientId {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Accept connections until [`Server::shutdown`] is called.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        log::info!("listening on {}", listener.local_addr()?);
        let mut shutdown = self.shutdown.subscribe();
        while !*shutdown.borrow_and_update() {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        log::warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };
            if let Err(e) = stream.set_nodelay(true) {
                log::debug!("set_nodelay on {} failed: {}", addr, e);
            }

            let server = self.clone();
            let span = tracing::info_span!("conn", peer = %addr, id = tracing::field::Empty);
            tokio::spawn(
                async move { server.handle_connection(stream, addr.to_string()).await }
                    .instrument(span),
            );
        }
        log::info!("stopped accepting connections");
        Ok(())
    }

    /// Run one connection through its whole lifecycle.
    pub async fn handle_connection<T>(&self, mut io: T, peer: String)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_client_id();
        tracing::Span::current().record("id", id);
        log::info!("{} connected as client {}", peer, id);

        if let Err(e) = tunnel::write_client_id(&mut io, id).await {
            log::warn!("{}({}): id handshake failed: {}", peer, id, e);
            return;
        }
        let tunnel = match Tunnel::accept(io, &self.config).await {
            Ok(t) => t,
            Err(e) => {
                log::error!("{}({}): {}", peer, id, e);
                return;
            }
        };
        let (conn, caller) = tunnel.into_parts();
        let session = Arc::new(Session::new(id, caller, conn.clone()));

        self.registry.insert(session.clone());
        self.registry.fire(Presence::Online, id);

        match conn.accept().await {
            Ok(inbound) => {
                if let Err(e) = rpc::serve(self.router.clone(), inbound, self.config.max_line).await {
                    log::debug!("{}({}): rpc serving ended: {}", peer, id, e);
                }
            }
            Err(e) => log::debug!("{}({}): peer never opened its stream: {}", peer, id, e),
        }

        self.registry.remove(id);
        self.registry.fire(Presence::Offline, id);
        session.close();
        log::info!("{}({}) closed connection", peer, id);
    }

    /// Stop accepting and close every live session.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.registry.range_session(|_, session| session.close());
    }
}

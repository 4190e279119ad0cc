//! Line-delimited JSON RPC over any duplex byte stream (in practice a
//! multiplexed [`MuxStream`](crate::tunnel::MuxStream)).
//!
//! One record per line, newline terminated:
//!
//! ```text
//! → {"method":"Block.FetchChunk","params":[{"P":0,"Q":0,"Version":""}],"id":7}
//! ← {"id":7,"result":{"Blocks":[],"Version":""},"error":null}
//! ```
//!
//! Lines are framed with tokio-util's [`LinesCodec`]; a line longer than
//! `max_line` ends the stream. Dispatch goes through a [`Router`]: a table
//! from `Service.Method` names to typed handlers, filled before serving
//! starts. Handlers are synchronous and may touch the disk, so [`serve`]
//! runs each one on the blocking pool. [`RpcClient`] pipelines calls over
//! one stream and correlates replies by `id`.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Framing failure: I/O error, invalid UTF-8 or an over-long line.
    #[error("framing: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote handler returned an error.
    #[error("remote: {0}")]
    Remote(String),

    #[error("rpc channel closed")]
    Closed,

    #[error("notify queue full")]
    QueueFull,
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct RequestRecord {
    method: String,
    #[serde(default)]
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseRecord {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

type Lines<S> = FramedRead<ReadHalf<S>, LinesCodec>;
type LineSink<S> = FramedWrite<WriteHalf<S>, LinesCodec>;

fn framed<S: AsyncRead + AsyncWrite>(stream: S, max_line: usize) -> (Lines<S>, LineSink<S>) {
    let (reader, writer) = tokio::io::split(stream);
    (
        FramedRead::new(reader, LinesCodec::new_with_max_length(max_line)),
        FramedWrite::new(writer, LinesCodec::new()),
    )
}

// ---------------------------------------------------------------------------
// Method table
// ---------------------------------------------------------------------------

type Handler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Method-name → handler table.
#[derive(Clone, Default)]
pub struct Router {
    methods: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a typed handler under its full `Service.Method` name.
    pub fn method<Req, Resp, E, F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        E: Display,
        F: Fn(Req) -> Result<Resp, E> + Send + Sync + 'static,
    {
        let name = name.into();
        let method = name.clone();
        let erased: Handler = Arc::new(move |params: Value| {
            let req = serde_json::from_value(params)
                .map_err(|e| format!("rpc: bad params for {method}: {e}"))?;
            let resp = handler(req).map_err(|e| e.to_string())?;
            serde_json::to_value(resp).map_err(|e| e.to_string())
        });
        if self.methods.insert(name.clone(), erased).is_some() {
            log::warn!("rpc method {} registered twice; keeping the last", name);
        }
        self
    }

    /// Install every method of `service` under `name`.
    pub fn register<S: RpcService>(&mut self, name: &str, service: Arc<S>) -> &mut Self {
        service.register(&mut ServiceMethods {
            service: name,
            router: self,
        });
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn dispatch(&self, method: &str, params: Value) -> Result<Value, String> {
        match self.methods.get(method) {
            Some(handler) => handler(params),
            None => Err(format!("rpc: can't find method {method}")),
        }
    }
}

/// A group of methods published under one service name.
pub trait RpcService: Send + Sync + 'static {
    fn register(self: Arc<Self>, methods: &mut ServiceMethods<'_>);
}

/// Registration scope handed to [`RpcService::register`].
pub struct ServiceMethods<'a> {
    service: &'a str,
    router: &'a mut Router,
}

impl ServiceMethods<'_> {
    pub fn method<Req, Resp, E, F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        E: Display,
        F: Fn(Req) -> Result<Resp, E> + Send + Sync + 'static,
    {
        self.router
            .method(format!("{}.{}", self.service, name), handler);
        self
    }
}

// ---------------------------------------------------------------------------
// Server role
// ---------------------------------------------------------------------------

/// Answer requests arriving on `stream` until the peer closes it.
///
/// Requests are handled one at a time, in arrival order. A panicking
/// handler takes the serving task down with it.
pub async fn serve<S>(router: Arc<Router>, stream: S, max_line: usize) -> Result<(), RpcError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut requests, mut replies) = framed(stream, max_line);
    while let Some(line) = requests.next().await {
        let request: RequestRecord = serde_json::from_str(&line?)?;
        let params = request.params.into_iter().next().unwrap_or(Value::Null);
        let table = router.clone();
        let method = request.method.clone();
        let outcome = match tokio::task::spawn_blocking(move || table.dispatch(&method, params)).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => return Err(RpcError::Closed),
        };
        let response = match outcome {
            Ok(result) => ResponseRecord {
                id: request.id,
                result,
                error: None,
            },
            Err(error) => {
                log::debug!("{} failed: {}", request.method, error);
                ResponseRecord {
                    id: request.id,
                    result: Value::Null,
                    error: Some(error),
                }
            }
        };
        replies.send(serde_json::to_string(&response)?).await?;
    }
    let _ = SinkExt::<String>::close(&mut replies).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Client role
// ---------------------------------------------------------------------------

type Reply = oneshot::Sender<Result<Value, RpcError>>;

struct ClientState {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Reply>>,
    closed: AtomicBool,
}

impl ClientState {
    fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders wakes every waiter with `Closed`.
        self.pending.lock().clear();
    }
}

/// Outbound half of an RPC link. Cheap to clone; safe to use from many
/// tasks at once.
#[derive(Clone)]
pub struct RpcClient {
    queue: mpsc::Sender<String>,
    state: Arc<ClientState>,
}

impl RpcClient {
    /// Drive `stream` as the calling side.
    ///
    /// At most `queue_depth` encoded requests wait for the stream at once.
    pub fn new<S>(stream: S, queue_depth: usize, max_line: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (lines, sink) = framed(stream, max_line);
        let (queue, queue_rx) = mpsc::channel(queue_depth.max(1));
        let state = Arc::new(ClientState {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        tokio::spawn(write_requests(queue_rx, sink, state.clone()));
        tokio::spawn(read_replies(lines, state.clone()));

        Self { queue, state }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn request_line<Req: Serialize>(&self, method: &str, params: &Req) -> Result<(u64, String), RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&RequestRecord {
            method: method.to_string(),
            params: vec![serde_json::to_value(params)?],
            id,
        })?;
        Ok((id, line))
    }

    /// Call `method` and wait for its reply.
    pub async fn call<Req, Resp>(&self, method: &str, params: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (id, line) = self.request_line(method, params)?;
        let (tx, rx) = oneshot::channel();
        self.state.pending.lock().insert(id, tx);
        if self.is_closed() {
            self.state.pending.lock().remove(&id);
            return Err(RpcError::Closed);
        }

        if self.queue.send(line).await.is_err() {
            self.state.pending.lock().remove(&id);
            return Err(RpcError::Closed);
        }
        let result = rx.await.map_err(|_| RpcError::Closed)??;
        Ok(serde_json::from_value(result)?)
    }

    /// Fire-and-forget call. Never waits: if the queue is full the request
    /// is dropped and [`RpcError::QueueFull`] returned. The reply, if any,
    /// is discarded.
    pub fn notify<Req: Serialize>(&self, method: &str, params: &Req) -> Result<(), RpcError> {
        let (_, line) = self.request_line(method, params)?;
        self.queue.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RpcError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => RpcError::Closed,
        })
    }
}

async fn write_requests<S: AsyncWrite>(
    mut queue: mpsc::Receiver<String>,
    mut sink: LineSink<S>,
    state: Arc<ClientState>,
) {
    while let Some(line) = queue.recv().await {
        if let Err(e) = sink.send(line).await {
            log::debug!("rpc write failed: {}", e);
            break;
        }
    }
    state.shut();
    let _ = SinkExt::<String>::close(&mut sink).await;
}

async fn read_replies<S: AsyncRead>(mut lines: Lines<S>, state: Arc<ClientState>) {
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::debug!("rpc read failed: {}", e);
                break;
            }
        };
        let response: ResponseRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("dropping malformed rpc reply: {}", e);
                continue;
            }
        };
        // Notifications have no waiter.
        let Some(reply) = state.pending.lock().remove(&response.id) else {
            continue;
        };
        let outcome = match response.error {
            Some(error) => Err(RpcError::Remote(error)),
            None => Ok(response.result),
        };
        let _ = reply.send(outcome);
    }
    state.shut();
}

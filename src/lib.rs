//! Voxel Hub
//!
//! A shared voxel world server. Every player connects over one TCP stream
//! that carries a bidirectional RPC tunnel; block edits are persisted and
//! pushed to everyone else, and player presence is tracked per connection.
//!
//! ## Architecture
//!
//! ```text
//! Server  (server.rs)              ← accept loop, SessionRegistry
//!   └── Tunnel  (tunnel.rs)        ← id handshake, yamux, one stream per role
//!         └── rpc (rpc.rs)         ← JSON lines, Router, RpcClient
//! BlockService  (block.rs)  ─┐
//! PlayerService (player.rs) ─┴─ registered on the Router
//!   └── WorldStore  (store.rs)     ← blocks, chunk versions, camera
//!         └── KvStore (kv.rs)      ← MemoryKv / RedbKv
//!               └── codec.rs       ← spatial key layout
//! ```
//!
//! `Client` (client.rs) is the initiating side of the same tunnel.

// Wire and data types are always available (no server feature needed).
pub mod codec;
pub mod protocol;
pub mod settings;
pub mod types;

// Runtime modules require the `server` feature.
#[cfg(feature = "server")]
pub mod block;
#[cfg(feature = "server")]
pub mod client;
#[cfg(feature = "server")]
pub mod kv;
#[cfg(feature = "server")]
pub mod player;
#[cfg(feature = "server")]
pub mod rpc;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod session;
#[cfg(feature = "server")]
pub mod store;
#[cfg(feature = "server")]
pub mod tunnel;

// Convenience re-exports (server only)
#[cfg(feature = "server")]
pub use block::BlockService;
#[cfg(feature = "server")]
pub use client::Client;
#[cfg(feature = "server")]
pub use kv::{KvStore, MemoryKv, RedbKv, StoreError};
#[cfg(feature = "server")]
pub use player::PlayerService;
#[cfg(feature = "server")]
pub use rpc::{Router, RpcClient, RpcError, RpcService};
#[cfg(feature = "server")]
pub use server::{Presence, Server, SessionRegistry};
#[cfg(feature = "server")]
pub use session::Session;
#[cfg(feature = "server")]
pub use store::WorldStore;
#[cfg(feature = "server")]
pub use tunnel::{Tunnel, TunnelConfig, TunnelError};
pub use settings::ServerConfig;
pub use types::{Camera, ChunkId, ClientId, PlayerState, Vec3, CHUNK_WIDTH};

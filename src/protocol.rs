//! `Block.*` and `Player.*` wire protocol.
//!
//! This module owns every message that crosses the RPC tunnel. Both ends
//! of a connection serve and call these methods.
//!
//! ## Methods
//!
//! | Method                | Served by | Called by                      |
//! |-----------------------|-----------|--------------------------------|
//! | `Block.UpdateBlock`   | both      | client (edit), server (push)   |
//! | `Block.FetchChunk`    | server    | client                         |
//! | `Player.UpdateState`  | server    | client                         |
//! | `Player.RemovePlayer` | client    | server (push)                  |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with PascalCase JSON field
//!    names (`Id`, `P`, `Version`, ...), the shape existing peers send.
//! 2. `version` on an inbound `UpdateBlock` is ignored by the server and set
//!    on every push it sends.
//! 3. `FetchChunk` answers with an empty block list when the caller already
//!    holds the current version.

use crate::types::{ClientId, PlayerState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Block service
// ---------------------------------------------------------------------------

/// A single block edit. `(p, q)` names the chunk the edit is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateBlockRequest {
    /// Originating client; excluded from the fan-out.
    pub id: ClientId,
    pub p: i32,
    pub q: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateBlockResponse {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FetchChunkRequest {
    pub p: i32,
    pub q: i32,
    /// Version the caller already holds; empty if none.
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FetchChunkResponse {
    /// `[x, y, z, w]` quadruples in key order.
    pub blocks: Vec<[i32; 4]>,
    pub version: String,
}

// ---------------------------------------------------------------------------
// Player service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateStateRequest {
    pub id: ClientId,
    pub state: PlayerState,
}

/// Every known player except the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateStateResponse {
    pub players: HashMap<ClientId, PlayerState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemovePlayerRequest {
    pub id: ClientId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemovePlayerResponse {}

// ---------------------------------------------------------------------------
// Method names
// ---------------------------------------------------------------------------

pub mod methods {
    pub const BLOCK: &str = "Block";
    pub const PLAYER: &str = "Player";

    pub const UPDATE_BLOCK: &str = "UpdateBlock";
    pub const FETCH_CHUNK: &str = "FetchChunk";
    pub const UPDATE_STATE: &str = "UpdateState";
    pub const REMOVE_PLAYER: &str = "RemovePlayer";

    pub const BLOCK_UPDATE_BLOCK: &str = "Block.UpdateBlock";
    pub const BLOCK_FETCH_CHUNK: &str = "Block.FetchChunk";
    pub const PLAYER_UPDATE_STATE: &str = "Player.UpdateState";
    pub const PLAYER_REMOVE_PLAYER: &str = "Player.RemovePlayer";
}

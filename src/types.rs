//! Core world types shared across all modules.

use serde::{Deserialize, Serialize};

/// Width of a chunk column along X and Z, in blocks.
pub const CHUNK_WIDTH: i32 = 32;

/// Per-connection identifier handed out during the handshake.
///
/// Allocated from 1 upward; only used to tell "self" apart from "others"
/// when fanning out updates.
pub type ClientId = i32;

// ---------------------------------------------------------------------------
// Block coordinates
// ---------------------------------------------------------------------------

/// Integer block coordinate.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Vec3 {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn left(self) -> Self {
        Self::new(self.x - 1, self.y, self.z)
    }

    pub fn right(self) -> Self {
        Self::new(self.x + 1, self.y, self.z)
    }

    pub fn up(self) -> Self {
        Self::new(self.x, self.y + 1, self.z)
    }

    pub fn down(self) -> Self {
        Self::new(self.x, self.y - 1, self.z)
    }

    pub fn front(self) -> Self {
        Self::new(self.x, self.y, self.z + 1)
    }

    pub fn back(self) -> Self {
        Self::new(self.x, self.y, self.z - 1)
    }

    /// Chunk column containing this block.
    ///
    /// Uses floor division, so `x = -1` lands in chunk `-1`, not `0`.
    /// Y is never chunked.
    pub fn chunk_id(self) -> ChunkId {
        ChunkId::new(
            self.x.div_euclid(CHUNK_WIDTH),
            self.z.div_euclid(CHUNK_WIDTH),
        )
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Chunk identity
// ---------------------------------------------------------------------------

/// Identity of a chunk column: `(p, q)` = `(floor(x / W), floor(z / W))`.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ChunkId {
    pub p: i32,
    pub q: i32,
}

impl ChunkId {
    pub const fn new(p: i32, q: i32) -> Self {
        Self { p, q }
    }

    /// The chunk id as a coordinate with `y == 0`.
    pub fn as_vec3(self) -> Vec3 {
        Vec3::new(self.p, 0, self.q)
    }

    /// Whether `block` belongs to this chunk.
    pub fn contains(self, block: Vec3) -> bool {
        block.chunk_id() == self
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.p, self.q)
    }
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Player transform: position plus yaw/pitch.
///
/// Zero-valued until the player reports its first state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rx: f32,
    pub ry: f32,
}

/// Persisted view state. There is exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rx: f32,
    pub ry: f32,
}

impl Default for Camera {
    /// Origin, at eye height above the ground plane.
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 16.0,
            z: 0.0,
            rx: 0.0,
            ry: 0.0,
        }
    }
}

//! `Block` service: block edits, chunk fetches and edit fan-out.

use crate::kv::StoreError;
use crate::protocol::{
    methods, FetchChunkRequest, FetchChunkResponse, UpdateBlockRequest, UpdateBlockResponse,
};
use crate::rpc::{RpcService, ServiceMethods};
use crate::server::SessionRegistry;
use crate::store::WorldStore;
use crate::types::{ChunkId, Vec3};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct BlockService {
    /// Serializes edits so version stamps and pushes follow commit order.
    edits: Mutex<()>,
    store: Arc<WorldStore>,
    registry: Arc<SessionRegistry>,
}

impl BlockService {
    pub fn new(store: Arc<WorldStore>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            edits: Mutex::new(()),
            store,
            registry,
        }
    }

    /// Persist the edit, stamp a fresh chunk version and push the edit to
    /// every other session. Runs on the blocking pool (see
    /// [`rpc::serve`](crate::rpc::serve)), so it may wait on disk.
    ///
    /// The version goes to the named chunk `(p, q)`. When the coordinate
    /// lies in a different chunk, that chunk is stamped too so a fetch of
    /// it cannot be answered from a stale version.
    pub fn update_block(&self, req: UpdateBlockRequest) -> Result<UpdateBlockResponse, StoreError> {
        let _guard = self.edits.lock();
        let named = ChunkId::new(req.p, req.q);
        let block = Vec3::new(req.x, req.y, req.z);

        let version = self.store.next_chunk_version(named)?;
        let owner = block.chunk_id();
        if owner == named {
            self.store.apply_edit(block, req.w, &[(named, &version)])?;
        } else {
            log::debug!("block {} filed under {} but lies in {}", block, named, owner);
            let owner_version = self.store.next_chunk_version(owner)?;
            self.store
                .apply_edit(block, req.w, &[(named, &version), (owner, &owner_version)])?;
        }

        let push = UpdateBlockRequest {
            version: version.clone(),
            ..req
        };
        let queued = self
            .registry
            .broadcast(req.id, methods::BLOCK_UPDATE_BLOCK, &push);
        log::debug!(
            "client {} set {} = {} in {} (version {}, pushed to {})",
            req.id,
            block,
            req.w,
            named,
            version,
            queued
        );
        Ok(UpdateBlockResponse { version })
    }

    /// All blocks of the chunk, unless the caller already holds its
    /// current version.
    pub fn fetch_chunk(&self, req: FetchChunkRequest) -> Result<FetchChunkResponse, StoreError> {
        let chunk = ChunkId::new(req.p, req.q);
        let version = self.store.chunk_version(chunk)?;
        if req.version == version {
            return Ok(FetchChunkResponse {
                blocks: Vec::new(),
                version,
            });
        }

        let mut blocks = Vec::new();
        self.store
            .range_blocks(chunk, |b, w| blocks.push([b.x, b.y, b.z, w]))?;
        log::debug!("fetch {}: {} blocks at version {:?}", chunk, blocks.len(), version);
        Ok(FetchChunkResponse { blocks, version })
    }
}

impl RpcService for BlockService {
    fn register(self: Arc<Self>, table: &mut ServiceMethods<'_>) {
        let svc = self.clone();
        table.method(methods::UPDATE_BLOCK, move |req: UpdateBlockRequest| {
            svc.update_block(req)
        });
        table.method(methods::FETCH_CHUNK, move |req: FetchChunkRequest| {
            self.fetch_chunk(req)
        });
    }
}

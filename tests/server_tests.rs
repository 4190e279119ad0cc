//! End-to-end tests: Server + services + Client over in-memory pipes

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};
    use voxel_hub::protocol::{
        methods, FetchChunkRequest, FetchChunkResponse, RemovePlayerRequest,
        RemovePlayerResponse, UpdateBlockRequest, UpdateBlockResponse, UpdateStateRequest,
        UpdateStateResponse,
    };
    use voxel_hub::rpc::{Router, RpcError};
    use voxel_hub::tunnel::read_client_id;
    use voxel_hub::types::{ClientId, PlayerState};
    use voxel_hub::{
        BlockService, Client, PlayerService, Server, SessionRegistry, TunnelConfig, WorldStore,
    };

    struct Harness {
        server: Arc<Server>,
        players: Arc<PlayerService>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(TunnelConfig::default())
        }

        fn with_config(config: TunnelConfig) -> Self {
            let store = Arc::new(WorldStore::in_memory());
            let mut server = Server::new(config);
            let registry = server.registry().clone();
            server.register_service(
                methods::BLOCK,
                Arc::new(BlockService::new(store, registry.clone())),
            );
            let players = PlayerService::new(registry);
            server.register_service(methods::PLAYER, players.clone());
            Self {
                server: Arc::new(server),
                players,
            }
        }

        fn registry(&self) -> &Arc<SessionRegistry> {
            self.server.registry()
        }

        /// Connect a client whose pushes land in the returned channels.
        async fn connect(&self) -> Peer {
            let (block_tx, blocks) = mpsc::unbounded_channel();
            let (remove_tx, removals) = mpsc::unbounded_channel();
            let mut router = Router::new();
            router.method(methods::BLOCK_UPDATE_BLOCK, move |req: UpdateBlockRequest| {
                let _ = block_tx.send(req);
                Ok::<_, Infallible>(UpdateBlockResponse {
                    version: String::new(),
                })
            });
            router.method(methods::PLAYER_REMOVE_PLAYER, move |req: RemovePlayerRequest| {
                let _ = remove_tx.send(req.id);
                Ok::<_, Infallible>(RemovePlayerResponse {})
            });

            let (server_io, client_io) = duplex(256 * 1024);
            let server = self.server.clone();
            tokio::spawn(async move {
                server.handle_connection(server_io, "pipe".to_string()).await
            });
            let client = Client::start(client_io, router, &TunnelConfig::default())
                .await
                .unwrap();
            Peer {
                client,
                blocks,
                removals,
            }
        }

        /// Complete the id handshake, then never read or write again.
        async fn connect_stalled(&self) -> (ClientId, DuplexStream) {
            let (server_io, mut client_io) = duplex(64);
            let server = self.server.clone();
            tokio::spawn(async move {
                server.handle_connection(server_io, "stalled".to_string()).await
            });
            let id = read_client_id(&mut client_io).await.unwrap();
            (id, client_io)
        }

        async fn wait_for_players(&self, n: usize) {
            let players = self.players.clone();
            timeout(Duration::from_secs(5), async move {
                while players.len() != n {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("player count never settled");
        }
    }

    struct Peer {
        client: Client,
        blocks: mpsc::UnboundedReceiver<UpdateBlockRequest>,
        removals: mpsc::UnboundedReceiver<i32>,
    }

    impl Peer {
        async fn update_block(&self, x: i32, y: i32, z: i32, w: i32) -> String {
            let chunk = voxel_hub::Vec3::new(x, y, z).chunk_id();
            let resp: UpdateBlockResponse = self
                .client
                .call(
                    methods::BLOCK_UPDATE_BLOCK,
                    &UpdateBlockRequest {
                        id: self.client.id(),
                        p: chunk.p,
                        q: chunk.q,
                        x,
                        y,
                        z,
                        w,
                        version: String::new(),
                    },
                )
                .await
                .unwrap();
            resp.version
        }

        async fn fetch_chunk(&self, p: i32, q: i32, version: &str) -> FetchChunkResponse {
            self.client
                .call(
                    methods::BLOCK_FETCH_CHUNK,
                    &FetchChunkRequest {
                        p,
                        q,
                        version: version.to_string(),
                    },
                )
                .await
                .unwrap()
        }
    }

    // -----------------------------------------------------------------------
    // Handshake and registration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn clients_get_ids_from_one_upward() {
        let h = Harness::new();
        let a = h.connect().await;
        let b = h.connect().await;
        assert_eq!(a.client.id(), 1);
        assert_eq!(b.client.id(), 2);

        h.wait_for_players(2).await;
        assert!(h.registry().contains(1));
        assert!(h.registry().contains(2));
        assert_eq!(h.registry().len(), 2);
    }

    // -----------------------------------------------------------------------
    // Block replication
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn edit_is_pushed_to_every_other_peer_but_not_origin() {
        let h = Harness::new();
        let mut a = h.connect().await;
        let mut b = h.connect().await;
        let mut c = h.connect().await;
        h.wait_for_players(3).await;

        let version = a.update_block(5, 10, 5, 3).await;

        for peer in [&mut b, &mut c] {
            let push = timeout(Duration::from_secs(5), peer.blocks.recv())
                .await
                .expect("push never arrived")
                .unwrap();
            assert_eq!(push.id, a.client.id());
            assert_eq!((push.p, push.q), (0, 0));
            assert_eq!((push.x, push.y, push.z, push.w), (5, 10, 5, 3));
            assert_eq!(push.version, version);
        }

        sleep(Duration::from_millis(50)).await;
        assert!(a.blocks.try_recv().is_err());
        assert!(b.blocks.try_recv().is_err());
        assert!(c.blocks.try_recv().is_err());
    }

    #[tokio::test]
    async fn stalled_peer_does_not_hold_up_edits_or_other_peers() {
        let h = Harness::with_config(TunnelConfig {
            notify_queue_depth: 1,
            ..TunnelConfig::default()
        });
        let a = h.connect().await;
        let mut c = h.connect().await;
        let (stalled_id, _stalled_io) = h.connect_stalled().await;
        h.wait_for_players(3).await;

        // Back the stalled peer up until its push queue overflows.
        let stalled = h.registry().get(stalled_id).unwrap();
        let filler = UpdateBlockRequest {
            id: 0,
            p: 0,
            q: 0,
            x: 0,
            y: 0,
            z: 0,
            w: 0,
            version: "f".repeat(64 * 1024),
        };
        let mut overflowed = false;
        for _ in 0..200 {
            if !stalled.notify(methods::BLOCK_UPDATE_BLOCK, &filler) {
                overflowed = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(overflowed, "stalled peer's queue never filled");
        assert!(!stalled.is_closed());

        for w in 1..=3 {
            let version = timeout(Duration::from_secs(2), a.update_block(w, 0, 0, w))
                .await
                .expect("edit held up by a stalled peer");
            let push = timeout(Duration::from_secs(2), c.blocks.recv())
                .await
                .expect("healthy peer missed the push")
                .unwrap();
            assert_eq!((push.x, push.w), (w, w));
            assert_eq!(push.version, version);
        }
        assert!(h.registry().contains(stalled_id));
    }

    #[tokio::test]
    async fn fetch_chunk_lists_edits_and_honours_version() {
        let h = Harness::new();
        let a = h.connect().await;
        let b = h.connect().await;
        h.wait_for_players(2).await;

        let version = a.update_block(5, 10, 5, 3).await;

        let resp = b.fetch_chunk(0, 0, "").await;
        assert!(resp.blocks.contains(&[5, 10, 5, 3]));
        assert_eq!(resp.version, version);

        let resp = b.fetch_chunk(0, 0, &version).await;
        assert!(resp.blocks.is_empty());
        assert_eq!(resp.version, version);
    }

    #[tokio::test]
    async fn back_to_back_edits_get_distinct_versions() {
        let h = Harness::new();
        let a = h.connect().await;
        h.wait_for_players(1).await;

        let first = a.update_block(1, 1, 1, 1).await;
        let second = a.update_block(1, 1, 1, 2).await;
        assert_ne!(first, second);

        let resp = a.fetch_chunk(0, 0, &first).await;
        assert_eq!(resp.blocks, vec![[1, 1, 1, 2]]);
        assert_eq!(resp.version, second);
    }

    #[tokio::test]
    async fn unknown_method_reports_error_and_keeps_session() {
        let h = Harness::new();
        let a = h.connect().await;
        h.wait_for_players(1).await;

        let err = a
            .client
            .call::<_, serde_json::Value>("Block.Explode", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote(_)));

        let resp = a.fetch_chunk(0, 0, "").await;
        assert!(resp.blocks.is_empty());
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn update_state_returns_other_players() {
        let h = Harness::new();
        let a = h.connect().await;
        let b = h.connect().await;
        h.wait_for_players(2).await;

        let moved = PlayerState {
            x: 3.0,
            y: 17.0,
            z: -2.0,
            rx: 0.5,
            ry: 0.0,
        };
        let resp: UpdateStateResponse = b
            .client
            .call(
                methods::PLAYER_UPDATE_STATE,
                &UpdateStateRequest {
                    id: b.client.id(),
                    state: moved,
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.players.len(), 1);
        assert_eq!(resp.players[&1], PlayerState::default());

        let resp: UpdateStateResponse = a
            .client
            .call(
                methods::PLAYER_UPDATE_STATE,
                &UpdateStateRequest {
                    id: a.client.id(),
                    state: PlayerState::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.players[&2], moved);
    }

    #[tokio::test]
    async fn disconnect_broadcasts_removal_once() {
        let h = Harness::new();
        let mut a = h.connect().await;
        let b = h.connect().await;
        h.wait_for_players(2).await;

        drop(b);

        let gone = timeout(Duration::from_secs(5), a.removals.recv())
            .await
            .expect("removal never arrived")
            .unwrap();
        assert_eq!(gone, 2);
        h.wait_for_players(1).await;
        assert!(!h.registry().contains(2));
        assert_eq!(h.registry().len(), 1);

        sleep(Duration::from_millis(50)).await;
        assert!(a.removals.try_recv().is_err());
    }

    // -----------------------------------------------------------------------
    // Listener lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn shutdown_stops_accepting_and_closes_sessions() {
        let h = Harness::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(h.server.clone().serve(listener));

        let client = Client::connect(addr, Router::new(), &TunnelConfig::default())
            .await
            .unwrap();
        assert_eq!(client.id(), 1);
        h.wait_for_players(1).await;

        h.server.shutdown();
        timeout(Duration::from_secs(5), client.closed())
            .await
            .expect("session not closed on shutdown");
        timeout(Duration::from_secs(5), serving)
            .await
            .expect("accept loop kept running")
            .unwrap()
            .unwrap();
        h.wait_for_players(0).await;
    }
}

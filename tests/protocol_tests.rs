//! Wire shape tests for the Block/Player protocol

#[cfg(test)]
mod tests {
    use serde_json::json;
    use voxel_hub::protocol::*;
    use voxel_hub::types::PlayerState;

    #[test]
    fn update_block_request_field_names() {
        let req = UpdateBlockRequest {
            id: 1,
            p: 0,
            q: -1,
            x: 5,
            y: 10,
            z: -5,
            w: 3,
            version: "abc".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"Id": 1, "P": 0, "Q": -1, "X": 5, "Y": 10, "Z": -5, "W": 3, "Version": "abc"})
        );
    }

    #[test]
    fn decodes_requests_sent_by_existing_clients() {
        let req: UpdateBlockRequest = serde_json::from_value(
            json!({"Id": 1, "P": 0, "Q": 0, "X": 5, "Y": 10, "Z": 5, "W": 3, "Version": ""}),
        )
        .unwrap();
        assert_eq!((req.id, req.x, req.y, req.z, req.w), (1, 5, 10, 5, 3));

        let req: FetchChunkRequest =
            serde_json::from_value(json!({"P": 0, "Q": 0, "Version": ""})).unwrap();
        assert_eq!((req.p, req.q), (0, 0));

        let req: UpdateStateRequest = serde_json::from_value(json!({
            "Id": 2,
            "State": {"X": 1.5, "Y": 17.0, "Z": -2.0, "Rx": 0.25, "Ry": 3.0}
        }))
        .unwrap();
        assert_eq!(req.state.rx, 0.25);
        assert_eq!(req.state.ry, 3.0);
    }

    #[test]
    fn lowercase_field_names_are_rejected() {
        let err = serde_json::from_value::<FetchChunkRequest>(json!({"p": 0, "q": 0}));
        assert!(err.is_err());
    }

    #[test]
    fn missing_version_defaults_to_empty() {
        let req: FetchChunkRequest = serde_json::from_value(json!({"P": 2, "Q": 3})).unwrap();
        assert_eq!(req.version, "");
        let req: UpdateBlockRequest = serde_json::from_value(
            json!({"Id": 4, "P": 0, "Q": 0, "X": 1, "Y": 2, "Z": 3, "W": 0}),
        )
        .unwrap();
        assert_eq!(req.version, "");
    }

    #[test]
    fn fetch_chunk_blocks_are_quadruples() {
        let resp = FetchChunkResponse {
            blocks: vec![[5, 10, 5, 3]],
            version: "17".into(),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"Blocks": [[5, 10, 5, 3]], "Version": "17"})
        );
    }

    #[test]
    fn players_map_is_keyed_by_client_id() {
        let mut resp = UpdateStateResponse::default();
        resp.players.insert(
            7,
            PlayerState {
                x: 1.0,
                ..Default::default()
            },
        );
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.starts_with("{\"Players\":{\"7\":{\"X\":1.0,"));

        let back: UpdateStateResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.players[&7].x, 1.0);
    }

    #[test]
    fn method_names_are_service_dot_method() {
        assert_eq!(
            methods::BLOCK_UPDATE_BLOCK,
            format!("{}.{}", methods::BLOCK, methods::UPDATE_BLOCK)
        );
        assert_eq!(
            methods::PLAYER_REMOVE_PLAYER,
            format!("{}.{}", methods::PLAYER, methods::REMOVE_PLAYER)
        );
        let empty = serde_json::to_value(RemovePlayerResponse {}).unwrap();
        assert_eq!(empty, json!({}));
    }
}

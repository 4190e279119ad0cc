//! `Player` service: presence tracking and state exchange.

use crate::protocol::{methods, RemovePlayerRequest, UpdateStateRequest, UpdateStateResponse};
use crate::rpc::{RpcService, ServiceMethods};
use crate::server::{Presence, SessionRegistry};
use crate::types::{ClientId, PlayerState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

pub struct PlayerService {
    players: Mutex<HashMap<ClientId, PlayerState>>,
    registry: Arc<SessionRegistry>,
}

impl PlayerService {
    /// Create the service and subscribe it to session lifecycle events.
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        let service = Arc::new(Self {
            players: Mutex::new(HashMap::new()),
            registry: registry.clone(),
        });
        let weak = Arc::downgrade(&service);
        registry.on_lifecycle(move |presence, id| {
            if let Some(service) = weak.upgrade() {
                service.on_presence(presence, id);
            }
        });
        service
    }

    pub fn on_presence(&self, presence: Presence, id: ClientId) {
        match presence {
            Presence::Online => self.add_player(id),
            Presence::Offline => self.remove_player(id),
        }
    }

    pub fn add_player(&self, id: ClientId) {
        self.players.lock().insert(id, PlayerState::default());
        log::info!("player {} joined", id);
    }

    /// Forget `id` and tell every other session it is gone. A second
    /// removal of the same id does nothing.
    pub fn remove_player(&self, id: ClientId) {
        if self.players.lock().remove(&id).is_none() {
            return;
        }
        let queued = self.registry.broadcast(
            id,
            methods::PLAYER_REMOVE_PLAYER,
            &RemovePlayerRequest { id },
        );
        log::info!("player {} left (told {} sessions)", id, queued);
    }

    /// Record the caller's state and return everyone else's. Unknown ids
    /// are ignored and get an empty answer.
    pub fn update_state(&self, req: UpdateStateRequest) -> UpdateStateResponse {
        let mut players = self.players.lock();
        let Some(slot) = players.get_mut(&req.id) else {
            log::debug!("state update from unknown player {}", req.id);
            return UpdateStateResponse::default();
        };
        *slot = req.state;
        UpdateStateResponse {
            players: players
                .iter()
                .filter(|(id, _)| **id != req.id)
                .map(|(id, state)| (*id, *state))
                .collect(),
        }
    }

    pub fn player(&self, id: ClientId) -> Option<PlayerState> {
        self.players.lock().get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.players.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.lock().is_empty()
    }
}

impl RpcService for PlayerService {
    fn register(self: Arc<Self>, table: &mut ServiceMethods<'_>) {
        table.method(methods::UPDATE_STATE, move |req: UpdateStateRequest| {
            Ok::<_, Infallible>(self.update_state(req))
        });
    }
}

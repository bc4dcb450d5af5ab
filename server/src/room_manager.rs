//! Tracks the live rooms behind one listener

use log::{debug, info};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::room::{run_room, GameRoom, RoomHandle};

/// Owns the game-id to room-handle map. The accept tasks share it behind
/// a lock; each room itself runs on its own driver task.
pub struct RoomManager {
    rooms: HashMap<String, RoomHandle>,
    config: ServerConfig,
}

impl RoomManager {
    pub fn new(config: ServerConfig) -> Self {
        RoomManager {
            rooms: HashMap::new(),
            config,
        }
    }

    /// Returns the handle for `game_id`, spawning a fresh room (driver
    /// task plus lifecycle supervisor) when none exists or the previous
    /// one has already shut down.
    pub fn get_or_create(&mut self, game_id: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.get(game_id) {
            if handle.is_open() {
                return handle.clone();
            }
            debug!("Game {} has shut down, creating a fresh room", game_id);
        }

        let handle = self.spawn_room(game_id);
        self.rooms.insert(game_id.to_string(), handle.clone());
        handle
    }

    /// Drops map entries whose driver task has exited. Returns how many
    /// entries were removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, handle| handle.is_open());
        before - self.rooms.len()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn spawn_room(&self, game_id: &str) -> RoomHandle {
        info!(
            "Creating game {} (lobby {:?}, duration {:?})",
            game_id, self.config.lobby_lifetime, self.config.game_duration
        );

        let room = GameRoom::new(game_id.to_string(), self.config.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RoomHandle::new(tx);

        tokio::spawn(run_room(room, rx));
        tokio::spawn(supervise_room(
            handle.clone(),
            game_id.to_string(),
            self.config.clone(),
        ));
        handle
    }
}

/// Walks a room through its lifecycle on the same schedule its `phase`
/// reports: start when the lobby closes, end once the game duration is
/// spent.
async fn supervise_room(handle: RoomHandle, game_id: String, config: ServerConfig) {
    tokio::time::sleep(config.lobby_lifetime).await;
    if !handle.start() {
        debug!("Game {} went away before its lobby closed", game_id);
        return;
    }

    tokio::time::sleep(config.game_duration).await;
    if !handle.end_game() {
        debug!("Game {} went away before its scheduled end", game_id);
    }
}

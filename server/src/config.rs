use std::time::Duration;

use shared::{DEFAULT_GAME_DURATION_MS, DEFAULT_LOBBY_LIFETIME_MS, DEFAULT_TURN_INTERVAL_MS};

/// Tuning shared by the server and every room it spawns.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Delay between turn broadcasts once a game is running.
    pub turn_interval: Duration,
    /// How long a room accepts joins before its game starts.
    pub lobby_lifetime: Duration,
    /// How long the game runs after the lobby closes.
    pub game_duration: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            turn_interval: Duration::from_millis(DEFAULT_TURN_INTERVAL_MS),
            lobby_lifetime: Duration::from_millis(DEFAULT_LOBBY_LIFETIME_MS),
            game_duration: Duration::from_millis(DEFAULT_GAME_DURATION_MS),
        }
    }
}

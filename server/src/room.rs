//! Turn coordination for a single game room

use log::{debug, info, warn};
use std::mem;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Interval, MissedTickBehavior};

use crate::client::Client;
use crate::config::ServerConfig;
use shared::{ClientMessage, Intent, ServerMessage, Turn};

/// Where a room is in its lifecycle. Always derived from elapsed time,
/// never stored, so concurrent observers can't disagree with the timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Lobby,
    Active,
    Finished,
}

/// Commands accepted by a room's driver task.
#[derive(Debug)]
pub enum RoomCommand {
    Register { client: Client },
    Frame { raw: String },
    Start,
    EndGame,
}

/// Cloneable handle for feeding commands into a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn new(tx: mpsc::UnboundedSender<RoomCommand>) -> Self {
        RoomHandle { tx }
    }

    pub fn register(&self, client: Client) -> bool {
        self.tx.send(RoomCommand::Register { client }).is_ok()
    }

    pub fn frame(&self, raw: String) -> bool {
        self.tx.send(RoomCommand::Frame { raw }).is_ok()
    }

    pub fn start(&self) -> bool {
        self.tx.send(RoomCommand::Start).is_ok()
    }

    pub fn end_game(&self) -> bool {
        self.tx.send(RoomCommand::EndGame).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Authoritative state for one game: the session list, the open intent
/// queue and the closed turn history. Driven by a single task, so the
/// methods can mutate freely without locking.
pub struct GameRoom {
    id: String,
    created_at: Instant,
    config: ServerConfig,
    clients: Vec<Client>,
    intents: Vec<Intent>,
    turns: Vec<Turn>,
    started: bool,
    ended: bool,
}

impl GameRoom {
    pub fn new(id: String, config: ServerConfig) -> Self {
        GameRoom {
            id,
            created_at: Instant::now(),
            config,
            clients: Vec::new(),
            intents: Vec::new(),
            turns: Vec::new(),
            started: false,
            ended: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn turn_interval(&self) -> Duration {
        self.config.turn_interval
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Registers a session. A session with the same client id is replaced,
    /// which is how reconnects work: the old socket's sender is dropped and
    /// the new one takes over. Joining a running game immediately delivers
    /// the full turn history so the client can replay up to live state.
    pub fn register(&mut self, client: Client) {
        let before = self.clients.len();
        self.clients.retain(|c| c.id != client.id);
        if self.clients.len() < before {
            info!("Replacing session for client {} in game {}", client.id, self.id);
        }

        if self.started {
            self.send_history(&client);
        }

        debug!("Client {} registered in game {}", client.id, self.id);
        self.clients.push(client);
    }

    /// Starts the game. Returns true only on the first call; the caller
    /// arms the turn ticker on that transition. Every registered session
    /// receives the history snapshot, empty or not, as its start signal.
    pub fn start(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;

        info!(
            "Game {} starting with {} clients in phase {:?}",
            self.id,
            self.clients.len(),
            self.phase(Instant::now())
        );

        for client in &self.clients {
            self.send_history(client);
        }
        true
    }

    /// Queues an intent for the turn currently being assembled. Intents
    /// addressed to another game are dropped.
    pub fn add_intent(&mut self, intent: Intent) {
        if intent.game_id != self.id {
            warn!(
                "Dropping intent from {} addressed to game {} (this is game {})",
                intent.client_id, intent.game_id, self.id
            );
            return;
        }
        self.intents.push(intent);
    }

    /// Closes the turn: everything queued since the last close becomes
    /// turn N, where N is the current history length, the queue resets,
    /// and the turn is broadcast. A failed send to one session is logged
    /// and does not stop delivery to the rest.
    pub fn end_turn(&mut self) {
        let turn = Turn {
            turn_number: self.turns.len() as u64,
            game_id: self.id.clone(),
            intents: mem::take(&mut self.intents),
        };

        debug!(
            "Game {} closing turn {} with {} intents",
            self.id,
            turn.turn_number,
            turn.intents.len()
        );

        self.turns.push(turn.clone());
        self.broadcast(ServerMessage::Turn { turn });
    }

    /// Ends the game and drops every session sender, which shuts the
    /// socket writers down. Safe to call repeatedly.
    pub fn end_game(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        info!(
            "Game {} over after {} turns, disconnecting {} clients",
            self.id,
            self.turns.len(),
            self.clients.len()
        );
        self.clients.clear();
    }

    /// The room's lifecycle phase at `now`, computed from the creation
    /// instant and the configured durations.
    pub fn phase(&self, now: Instant) -> GamePhase {
        let elapsed = now.saturating_duration_since(self.created_at);
        if elapsed < self.config.lobby_lifetime {
            GamePhase::Lobby
        } else if elapsed < self.config.lobby_lifetime + self.config.game_duration {
            GamePhase::Active
        } else {
            GamePhase::Finished
        }
    }

    /// Handles one raw frame from a session. Only intent messages for
    /// this game are accepted; everything else is logged and dropped, and
    /// a bad frame never takes the room down.
    pub fn handle_frame(&mut self, raw: &str) {
        match serde_json::from_str::<ClientMessage>(raw) {
            Ok(ClientMessage::Intent { game_id, intent, .. }) => {
                if game_id != self.id {
                    warn!(
                        "Ignoring intent message for game {} (this is game {})",
                        game_id, self.id
                    );
                    return;
                }
                self.add_intent(intent);
            }
            Ok(other) => {
                warn!("Ignoring unexpected message in game {}: {:?}", self.id, other);
            }
            Err(e) => {
                warn!("Ignoring malformed frame in game {}: {}", self.id, e);
            }
        }
    }

    fn send_history(&self, client: &Client) {
        let snapshot = ServerMessage::Start {
            turns: self.turns.clone(),
        };
        if !client.send(snapshot) {
            warn!(
                "Failed to send history to client {} in game {}",
                client.id, self.id
            );
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        for client in &self.clients {
            if !client.send(message.clone()) {
                warn!("Failed to send to client {} in game {}", client.id, self.id);
            }
        }
    }
}

enum RoomEvent {
    Command(Option<RoomCommand>),
    Tick,
}

/// Drives one room to completion: applies commands from the handle and,
/// once the game has started, closes a turn on every ticker firing. All
/// mutation of the room happens on this task.
pub async fn run_room(mut room: GameRoom, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
    let mut ticker: Option<Interval> = None;

    loop {
        let event = match ticker.as_mut() {
            Some(t) => tokio::select! {
                command = rx.recv() => RoomEvent::Command(command),
                _ = t.tick() => RoomEvent::Tick,
            },
            None => RoomEvent::Command(rx.recv().await),
        };

        match event {
            RoomEvent::Command(Some(RoomCommand::Register { client })) => room.register(client),
            RoomEvent::Command(Some(RoomCommand::Frame { raw })) => room.handle_frame(&raw),
            RoomEvent::Command(Some(RoomCommand::Start)) => {
                if room.start() {
                    // First firing lands one full interval from now, so a
                    // fresh game does not close an instant turn 0.
                    let period = room.turn_interval();
                    let mut t = interval_at(tokio::time::Instant::now() + period, period);
                    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker = Some(t);
                }
            }
            RoomEvent::Command(Some(RoomCommand::EndGame)) | RoomEvent::Command(None) => {
                room.end_game();
                break;
            }
            RoomEvent::Tick => room.end_turn(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> ServerConfig {
        ServerConfig {
            turn_interval: Duration::from_millis(20),
            lobby_lifetime: Duration::from_millis(100),
            game_duration: Duration::from_millis(400),
        }
    }

    fn test_room() -> GameRoom {
        GameRoom::new("g1".to_string(), test_config())
    }

    fn test_client(id: &str) -> (Client, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Client::new(id.to_string(), tx), rx)
    }

    fn test_intent(client: &str, game: &str, label: &str) -> Intent {
        Intent {
            client_id: client.to_string(),
            game_id: game.to_string(),
            payload: json!({ "label": label }),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_turn_numbers_match_history_index() {
        let mut room = test_room();
        let (client, mut rx) = test_client("alice");
        room.register(client);
        room.start();

        room.add_intent(test_intent("alice", "g1", "a"));
        room.add_intent(test_intent("alice", "g1", "b"));
        room.end_turn();
        room.add_intent(test_intent("alice", "g1", "c"));
        room.end_turn();
        room.end_turn(); // no intents queued

        let turns = room.turns();
        assert_eq!(turns.len(), 3);
        for (i, turn) in turns.iter().enumerate() {
            assert_eq!(turn.turn_number, i as u64);
        }
        assert_eq!(turns[0].intents.len(), 2);
        assert_eq!(turns[1].intents.len(), 1);
        assert!(turns[2].intents.is_empty());

        let received = drain(&mut rx);
        assert_eq!(received.len(), 4); // start snapshot plus three turns
        match &received[1] {
            ServerMessage::Turn { turn } => assert_eq!(turn.intents[0].payload["label"], "a"),
            other => panic!("expected a turn, got {:?}", other),
        }
    }

    #[test]
    fn test_each_intent_lands_in_exactly_one_turn() {
        let mut room = test_room();
        room.add_intent(test_intent("alice", "g1", "early"));
        room.end_turn();
        room.end_turn();

        assert_eq!(room.turns()[0].intents.len(), 1);
        assert!(room.turns()[1].intents.is_empty());
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut room = test_room();
        let (client, mut rx) = test_client("alice");
        room.register(client);

        assert!(room.start());
        assert!(!room.start());
        assert!(!room.start());
        assert!(room.has_started());

        // Only the first call snapshots.
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_late_join_receives_full_history() {
        let mut room = test_room();
        room.start();
        room.add_intent(test_intent("alice", "g1", "a"));
        room.end_turn();
        room.end_turn();

        let (late, mut rx) = test_client("bob");
        room.register(late);

        match rx.try_recv().unwrap() {
            ServerMessage::Start { turns } => {
                assert_eq!(turns.len(), 2);
                assert_eq!(turns, room.turns().to_vec());
            }
            other => panic!("expected history snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_join_before_start_gets_no_snapshot() {
        let mut room = test_room();
        let (client, mut rx) = test_client("alice");
        room.register(client);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_register_replaces_session_with_same_id() {
        let mut room = test_room();
        let (first, mut first_rx) = test_client("alice");
        let (second, mut second_rx) = test_client("alice");

        room.register(first);
        room.register(second);
        assert_eq!(room.client_count(), 1);

        room.end_turn();
        assert!(matches!(
            second_rx.try_recv().unwrap(),
            ServerMessage::Turn { .. }
        ));
        // The replaced session's sender was dropped, so its channel closed.
        assert!(matches!(
            first_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_intent_for_other_game_is_dropped() {
        let mut room = test_room();
        room.add_intent(test_intent("alice", "g2", "stray"));
        room.end_turn();
        assert!(room.turns()[0].intents.is_empty());
    }

    #[test]
    fn test_handle_frame_accepts_only_intents_for_this_game() {
        let mut room = test_room();

        room.handle_frame("this is not json");
        room.handle_frame(r#"{"type":"join","gameID":"g1","clientID":"alice"}"#);
        room.handle_frame(
            r#"{"type":"intent","gameID":"g2","clientID":"alice",
                "intent":{"clientID":"alice","gameID":"g2","payload":{}}}"#,
        );
        room.handle_frame(
            r#"{"type":"intent","gameID":"g1","clientID":"alice",
                "intent":{"clientID":"alice","gameID":"g1","payload":{"label":"ok"}}}"#,
        );

        room.end_turn();
        let turn = &room.turns()[0];
        assert_eq!(turn.intents.len(), 1);
        assert_eq!(turn.intents[0].payload["label"], "ok");
    }

    #[test]
    fn test_broadcast_survives_dead_session() {
        let mut room = test_room();
        let (dead, dead_rx) = test_client("alice");
        let (live, mut live_rx) = test_client("bob");
        room.register(dead);
        room.register(live);
        drop(dead_rx);

        room.end_turn();

        assert!(matches!(
            live_rx.try_recv().unwrap(),
            ServerMessage::Turn { .. }
        ));
    }

    #[test]
    fn test_end_game_is_idempotent_and_disconnects() {
        let mut room = test_room();
        let (client, mut rx) = test_client("alice");
        room.register(client);

        room.end_game();
        assert_eq!(room.client_count(), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        room.end_game();
        assert_eq!(room.client_count(), 0);
    }

    #[test]
    fn test_phase_follows_injected_clock() {
        let room = test_room();
        let t0 = room.created_at();
        let lobby = Duration::from_millis(100);
        let game = Duration::from_millis(400);

        assert_eq!(room.phase(t0), GamePhase::Lobby);
        assert_eq!(room.phase(t0 + lobby - Duration::from_millis(1)), GamePhase::Lobby);
        assert_eq!(room.phase(t0 + lobby), GamePhase::Active);
        assert_eq!(
            room.phase(t0 + lobby + game - Duration::from_millis(1)),
            GamePhase::Active
        );
        assert_eq!(room.phase(t0 + lobby + game), GamePhase::Finished);
        assert_eq!(room.phase(t0 + lobby + game + game), GamePhase::Finished);
    }

    #[tokio::test]
    async fn test_driver_broadcasts_turns_only_after_start() {
        let room = test_room();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RoomHandle::new(tx);
        let driver = tokio::spawn(run_room(room, rx));

        let (client, mut client_rx) = test_client("alice");
        handle.register(client);

        // Lobby: interval firings must not produce turns yet.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(client_rx.try_recv().is_err());

        handle.start();
        tokio::time::sleep(Duration::from_millis(90)).await;
        handle.end_game();
        driver.await.unwrap();

        let received = drain(&mut client_rx);
        assert!(matches!(received[0], ServerMessage::Start { .. }));

        let mut expected = 0u64;
        for msg in &received[1..] {
            match msg {
                ServerMessage::Turn { turn } => {
                    assert_eq!(turn.turn_number, expected);
                    expected += 1;
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
        // 90ms of a 20ms ticker, with scheduling slack.
        assert!(expected >= 2, "only {} turns closed", expected);
    }

    #[tokio::test]
    async fn test_driver_routes_frames_into_turns() {
        let room = test_room();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RoomHandle::new(tx);
        let driver = tokio::spawn(run_room(room, rx));

        let (client, mut client_rx) = test_client("alice");
        handle.register(client);
        handle.start();
        handle.frame(
            r#"{"type":"intent","gameID":"g1","clientID":"alice",
                "intent":{"clientID":"alice","gameID":"g1","payload":{"label":"x"}}}"#
                .to_string(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.end_game();
        driver.await.unwrap();

        let received = drain(&mut client_rx);
        let first_turn = received.iter().find_map(|m| match m {
            ServerMessage::Turn { turn } if turn.turn_number == 0 => Some(turn.clone()),
            _ => None,
        });
        let first_turn = first_turn.expect("no turn 0 broadcast");
        assert_eq!(first_turn.intents.len(), 1);
        assert_eq!(first_turn.intents[0].client_id, "alice");
    }
}

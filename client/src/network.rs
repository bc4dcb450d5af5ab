//! Connection to the turn server
//!
//! A thin replica of the authoritative turn log. The client joins a
//! room, forwards intents, and appends broadcast turns to its local
//! history in order. A reader task owns the socket's read half and
//! feeds parsed messages through a channel, so callers consume turns
//! without touching the wire.

use log::{info, warn};
use std::error::Error;
use std::io;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use shared::{ClientMessage, Intent, ServerMessage, Turn};

pub struct GameClient {
    game_id: String,
    client_id: String,
    turns: Vec<Turn>,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
    writer: OwnedWriteHalf,
}

impl GameClient {
    /// Connects, announces this session with a join message, and starts
    /// the reader task. The server replies with history once the game
    /// starts; nothing arrives while the room is still in its lobby.
    pub async fn connect(
        server_addr: &str,
        game_id: &str,
        client_id: &str,
    ) -> Result<GameClient, Box<dyn Error>> {
        let stream = TcpStream::connect(server_addr).await?;
        info!("Connected to server at {}", server_addr);
        let (reader, mut writer) = stream.into_split();

        let join = ClientMessage::Join {
            game_id: game_id.to_string(),
            client_id: client_id.to_string(),
        };
        let bytes = serde_json::to_vec(&join)?;
        shared::write_frame(&mut writer, &bytes).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_reader(reader, tx));

        Ok(GameClient {
            game_id: game_id.to_string(),
            client_id: client_id.to_string(),
            turns: Vec::new(),
            incoming: rx,
            writer,
        })
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The turn history replicated so far, in broadcast order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Wraps an arbitrary payload in this session's intent envelope and
    /// frames it to the server.
    pub async fn send_intent(&mut self, payload: serde_json::Value) -> io::Result<()> {
        let message = ClientMessage::Intent {
            game_id: self.game_id.clone(),
            client_id: self.client_id.clone(),
            intent: Intent {
                client_id: self.client_id.clone(),
                game_id: self.game_id.clone(),
                payload,
            },
        };
        let bytes = serde_json::to_vec(&message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        shared::write_frame(&mut self.writer, &bytes).await
    }

    /// Waits for the next broadcast turn, folding any start message into
    /// the local history on the way. A turn that does not extend the
    /// history contiguously is logged and dropped. Returns None once
    /// the server side has gone away.
    pub async fn next_turn(&mut self) -> Option<Turn> {
        while let Some(message) = self.incoming.recv().await {
            match message {
                ServerMessage::Start { turns } => {
                    info!("Game started with {} turns of history", turns.len());
                    self.turns = turns;
                }
                ServerMessage::Turn { turn } => {
                    let expected = self.turns.len() as u64;
                    if turn.turn_number != expected {
                        warn!(
                            "Dropping turn {} while expecting {}",
                            turn.turn_number, expected
                        );
                        continue;
                    }
                    self.turns.push(turn.clone());
                    return Some(turn);
                }
            }
        }
        None
    }
}

async fn run_reader(mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<ServerMessage>) {
    loop {
        let payload = match shared::read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(e) => {
                info!("Server connection closed: {}", e);
                break;
            }
        };

        let message = match serde_json::from_slice::<ServerMessage>(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping malformed server frame: {}", e);
                continue;
            }
        };

        if tx.send(message).is_err() {
            break;
        }
    }
}

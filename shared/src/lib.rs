use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_TURN_INTERVAL_MS: u64 = 100;
pub const DEFAULT_LOBBY_LIFETIME_MS: u64 = 60_000;
pub const DEFAULT_GAME_DURATION_MS: u64 = 1_200_000;
pub const DEFAULT_PATH_TIMEOUT_MS: u64 = 100_000;

/// Hard cap on a single wire frame. Start messages carry the full turn
/// history, so this is sized well above a typical game's log.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One client action. The payload is opaque to the transport and the
/// coordinator; only the issuing client and target game are inspected.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Intent {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "gameID")]
    pub game_id: String,
    pub payload: serde_json::Value,
}

/// A closed batch of intents. Immutable once broadcast; `turn_number` is
/// the index of this turn in the game's history.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Turn {
    #[serde(rename = "turnNumber")]
    pub turn_number: u64,
    #[serde(rename = "gameID")]
    pub game_id: String,
    pub intents: Vec<Intent>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Join {
        #[serde(rename = "gameID")]
        game_id: String,
        #[serde(rename = "clientID")]
        client_id: String,
    },
    Intent {
        #[serde(rename = "gameID")]
        game_id: String,
        #[serde(rename = "clientID")]
        client_id: String,
        intent: Intent,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Start { turns: Vec<Turn> },
    Turn { turn: Turn },
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("peer announced a {} byte frame, over the limit", len),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

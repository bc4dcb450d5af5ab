//! Listener and per-connection plumbing in front of the rooms

use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use crate::client::Client;
use crate::config::ServerConfig;
use crate::room_manager::RoomManager;
use shared::{read_frame, write_frame, ClientMessage, ServerMessage};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Accepts connections and routes each one to its room. Rooms mutate on
/// their own driver tasks; this layer only performs the join handshake
/// and pumps frames in and out.
pub struct Server {
    listener: TcpListener,
    rooms: Arc<RwLock<RoomManager>>,
}

impl Server {
    pub async fn bind(addr: &str, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            rooms: Arc::new(RwLock::new(RoomManager::new(config))),
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        self.spawn_room_sweeper();

        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("Connection from {}", peer);

            let rooms = Arc::clone(&self.rooms);
            tokio::spawn(handle_connection(stream, rooms));
        }
    }

    /// Periodically clears map entries for rooms whose driver has exited.
    fn spawn_room_sweeper(&self) {
        let rooms = Arc::clone(&self.rooms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = rooms.write().await.sweep();
                if removed > 0 {
                    debug!("Swept {} finished rooms", removed);
                }
            }
        });
    }
}

/// Waits for the join handshake, registers the session with its room,
/// then pumps intent frames until the peer goes away.
async fn handle_connection(stream: TcpStream, rooms: Arc<RwLock<RoomManager>>) {
    let peer = stream
        .peer_addr()
        .map(|p| p.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let (mut reader, writer) = stream.into_split();

    let (game_id, client_id) = match read_join(&mut reader).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Dropping connection from {}: {}", peer, e);
            return;
        }
    };

    let room = rooms.write().await.get_or_create(&game_id);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_session(writer, rx, client_id.clone()));

    if !room.register(Client::new(client_id.clone(), tx)) {
        warn!("Game {} refused registration for {}", game_id, client_id);
        return;
    }
    info!("Client {} joined game {} from {}", client_id, game_id, peer);

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(e) => {
                info!("Client {} disconnected: {}", client_id, e);
                break;
            }
        };

        let raw = match String::from_utf8(frame) {
            Ok(raw) => raw,
            Err(_) => {
                warn!("Client {} sent a non-utf8 frame, ignoring", client_id);
                continue;
            }
        };

        if !room.frame(raw) {
            debug!("Game {} is gone, closing reader for {}", game_id, client_id);
            break;
        }
    }
}

/// Handshake: the first frame on a connection must be a join message.
async fn read_join<R>(reader: &mut R) -> io::Result<(String, String)>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    match serde_json::from_slice::<ClientMessage>(&frame) {
        Ok(ClientMessage::Join { game_id, client_id }) => Ok((game_id, client_id)),
        Ok(other) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected a join message, got {:?}", other),
        )),
        Err(e) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed handshake: {}", e),
        )),
    }
}

/// Serializes queued room messages onto the socket. Exits when the room
/// drops the session (channel closed) or the peer stops accepting
/// writes, then half-closes so the peer sees the game end.
async fn write_session<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    client_id: String,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode message for {}: {}", client_id, e);
                continue;
            }
        };

        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!("Write to client {} failed: {}", client_id, e);
            break;
        }
    }

    let _ = writer.shutdown().await;
    debug!("Writer for client {} closed", client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Turn;

    fn frame_bytes(value: &serde_json::Value) -> Vec<u8> {
        let payload = serde_json::to_vec(value).unwrap();
        let mut buf = (payload.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&payload);
        buf
    }

    #[tokio::test]
    async fn test_read_join_accepts_join_frame() {
        let bytes = frame_bytes(&serde_json::json!({
            "type": "join", "gameID": "g1", "clientID": "alice"
        }));
        let mut reader = tokio_test::io::Builder::new().read(&bytes).build();

        let (game_id, client_id) = read_join(&mut reader).await.unwrap();
        assert_eq!(game_id, "g1");
        assert_eq!(client_id, "alice");
    }

    #[tokio::test]
    async fn test_read_join_rejects_non_join_first_frame() {
        let bytes = frame_bytes(&serde_json::json!({
            "type": "intent", "gameID": "g1", "clientID": "alice",
            "intent": { "clientID": "alice", "gameID": "g1", "payload": {} }
        }));
        let mut reader = tokio_test::io::Builder::new().read(&bytes).build();

        let err = read_join(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_write_session_frames_messages_and_closes() {
        let (mut client_side, server_side) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_session(server_side, rx, "alice".to_string()));

        let turn = Turn {
            turn_number: 0,
            game_id: "g1".to_string(),
            intents: vec![],
        };
        tx.send(ServerMessage::Turn { turn: turn.clone() }).unwrap();
        drop(tx);

        let frame = read_frame(&mut client_side).await.unwrap();
        let decoded: ServerMessage = serde_json::from_slice(&frame).unwrap();
        assert_eq!(decoded, ServerMessage::Turn { turn });

        // Channel closed, so the writer half-closes and reads hit EOF.
        assert!(read_frame(&mut client_side).await.is_err());
    }

    #[tokio::test]
    async fn test_handshake_to_turn_flow_over_loopback() {
        let config = ServerConfig {
            turn_interval: Duration::from_millis(20),
            lobby_lifetime: Duration::from_millis(40),
            game_duration: Duration::from_millis(400),
        };
        let server = Server::bind("127.0.0.1:0", config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let join = serde_json::to_vec(&ClientMessage::Join {
            game_id: "g1".to_string(),
            client_id: "alice".to_string(),
        })
        .unwrap();
        write_frame(&mut stream, &join).await.unwrap();

        // The lobby closes on its own and the snapshot arrives first.
        let first = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .expect("no start before timeout")
            .unwrap();
        let first: ServerMessage = serde_json::from_slice(&first).unwrap();
        assert!(matches!(first, ServerMessage::Start { .. }));

        let second = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .expect("no turn before timeout")
            .unwrap();
        match serde_json::from_slice::<ServerMessage>(&second).unwrap() {
            ServerMessage::Turn { turn } => assert_eq!(turn.turn_number, 0),
            other => panic!("expected turn 0, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sweeper_clears_finished_rooms() {
        tokio::time::pause();

        // Default durations keep the room supervisor asleep for the
        // whole test, so only the sweeper's clock moves.
        let server = Server::bind("127.0.0.1:0", ServerConfig::default())
            .await
            .unwrap();
        let rooms = Arc::clone(&server.rooms);
        server.spawn_room_sweeper();

        let handle = rooms.write().await.get_or_create("g1");
        assert_eq!(rooms.read().await.len(), 1);

        assert!(handle.end_game());
        tokio::task::yield_now().await;
        assert!(!handle.is_open());

        tokio::time::advance(SWEEP_INTERVAL + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(rooms.read().await.is_empty());
    }
}

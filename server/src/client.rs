use tokio::sync::mpsc;

use shared::ServerMessage;

// Server-side session for one connected client. The receiving half of
// `sender` is drained by that connection's socket writer task.
#[derive(Debug)]
pub struct Client {
    pub id: String,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Client {
    pub fn new(id: String, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Client { id, sender }
    }

    // Queue a message for the socket writer. Returns false when the
    // writer is gone (connection dropped or session replaced).
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

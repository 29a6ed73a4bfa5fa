use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use rt_chat_protocol::Envelope;
use tokio::sync::mpsc;

/// Outbound half of a framed connection.
///
/// Handlers never touch the socket directly -- they push an `Envelope` onto
/// this channel and a dedicated task owns the socket's sink half, looping
/// until the channel closes or a send fails. This decouples handler latency
/// from socket write latency: a bounded channel's `send().await` naturally
/// suspends the caller when the peer can't keep up, giving backpressure for
/// free instead of a fixed sleep-based pacing.
#[derive(Clone)]
pub struct ConnectionWriter {
    tx: mpsc::Sender<Envelope>,
    last_active: Arc<AtomicI64>,
}

/// Bound chosen so a stalled peer applies backpressure to its own fan-out
/// (e.g. a slow group member) without unbounded memory growth server-side.
const OUTBOUND_CAPACITY: usize = 256;

impl ConnectionWriter {
    /// Returns a handle plus the raw receiver so the caller can wire it into
    /// a `tokio::select!` alongside the socket's read half (see
    /// `channel_server::run_connection`), which owns both halves of the
    /// socket in one task rather than spawning a separate send-loop task.
    pub fn new() -> (Self, mpsc::Receiver<Envelope>, Arc<AtomicI64>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let last_active = Arc::new(AtomicI64::new(now_millis()));
        (ConnectionWriter { tx, last_active: last_active.clone() }, rx, last_active)
    }

    pub async fn send(&self, env: Envelope) -> bool {
        self.tx.send(env).await.is_ok()
    }

    pub fn touch(&self) {
        self.last_active.store(now_millis(), Ordering::Relaxed);
    }

    pub fn last_active_millis(&self) -> i64 {
        self.last_active.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn set_last_active_for_test(&self, millis: i64) {
        self.last_active.store(millis, Ordering::Relaxed);
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serializes an outbound envelope to the wire `Message`. The WebSocket
/// frame's own length prefix stands in for a hand-rolled framed socket's
/// 4-byte big-endian length field.
pub fn encode(env: &Envelope) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(env)?.into()))
}

/// Maximum decoded payload size. A frame over this ceiling is rejected
/// without touching any state.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub fn frame_too_large(msg: &Message) -> bool {
    match msg {
        Message::Text(t) => t.len() > MAX_FRAME_BYTES,
        Message::Binary(b) => b.len() > MAX_FRAME_BYTES,
        _ => false,
    }
}

/// Parses an incoming WebSocket text message into an `Envelope`. Returns
/// `None` for control frames that carry no application data.
pub fn parse_incoming(msg: &Message) -> Option<Result<Envelope, serde_json::Error>> {
    match msg {
        Message::Text(text) => Some(serde_json::from_str(text)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_chat_protocol::{CommandAction, CommandRequest, Payload};

    #[tokio::test]
    async fn connection_writer_send_delivers_to_receiver() {
        let (writer, mut rx, _last_active) = ConnectionWriter::new();
        let env = Envelope {
            user_id: Some("alice".to_owned()),
            payload: Payload::CommandRequest(CommandRequest {
                action: CommandAction::Heartbeat,
                sender: "alice".to_owned(),
                args: vec![],
            }),
        };
        assert!(writer.send(env.clone()).await);
        let received = rx.recv().await.unwrap();
        assert_eq!(received, env);
    }

    #[test]
    fn touch_advances_last_active() {
        let (writer, _rx, _la) = ConnectionWriter::new();
        let before = writer.last_active_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        writer.touch();
        assert!(writer.last_active_millis() >= before);
    }

    #[test]
    fn frame_too_large_rejects_oversized_text() {
        let big = Message::Text("x".repeat(MAX_FRAME_BYTES + 1).into());
        assert!(frame_too_large(&big));
        let small = Message::Text("ok".into());
        assert!(!frame_too_large(&small));
    }
}

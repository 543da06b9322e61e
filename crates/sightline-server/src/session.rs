use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tungstenite::Message;
use uuid::Uuid;

use sightline_contracts::connect_ack;

use crate::pool::JobQueue;

/// How often an idle connection thread wakes to drain its outbound queue.
const READ_TICK: Duration = Duration::from_millis(100);

/// Live connections, keyed by the id issued at accept time. Workers emit
/// through here; a connection that has gone away makes `emit` a logged
/// no-op rather than an error anyone has to handle.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<Uuid, mpsc::Sender<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, sender: mpsc::Sender<String>) {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .insert(id, sender);
    }

    pub fn unregister(&self, id: Uuid) {
        self.inner
            .lock()
            .expect("session registry poisoned")
            .remove(&id);
    }

    pub fn emit(&self, id: Uuid, message: String) -> bool {
        let sender = {
            let sessions = self.inner.lock().expect("session registry poisoned");
            sessions.get(&id).cloned()
        };
        let Some(sender) = sender else {
            debug!(%id, "dropping reply for disconnected session");
            return false;
        };
        if sender.send(message).is_err() {
            debug!(%id, "session closed while reply was in flight");
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs one client connection to completion. The connection thread owns
/// the socket: it alternates between draining queued replies and reading
/// the next frame, so no other thread ever writes to the WebSocket.
pub fn serve_connection(
    stream: TcpStream,
    sessions: &SessionRegistry,
    queue: &JobQueue,
) -> Result<()> {
    let mut ws = tungstenite::accept(stream).context("WebSocket handshake failed")?;
    ws.get_ref()
        .set_read_timeout(Some(READ_TICK))
        .context("failed to set read timeout")?;

    let id = Uuid::new_v4();
    let (reply_tx, reply_rx) = mpsc::channel::<String>();
    sessions.register(id, reply_tx);
    info!(%id, sessions = sessions.len(), "client connected");

    let result = connection_loop(&mut ws, id, &reply_rx, queue);

    sessions.unregister(id);
    info!(%id, sessions = sessions.len(), "client disconnected");
    result
}

fn connection_loop(
    ws: &mut tungstenite::WebSocket<TcpStream>,
    id: Uuid,
    replies: &mpsc::Receiver<String>,
    queue: &JobQueue,
) -> Result<()> {
    ws.send(Message::from(connect_ack(&id.to_string()).to_string()))
        .context("failed to send connect acknowledgment")?;

    loop {
        while let Ok(reply) = replies.try_recv() {
            ws.send(Message::from(reply))
                .context("failed to send reply")?;
        }

        match ws.read() {
            Ok(Message::Text(raw)) => queue.submit(id, raw.to_string()),
            Ok(Message::Binary(raw)) => match String::from_utf8(raw.to_vec()) {
                Ok(raw) => queue.submit(id, raw),
                Err(_) => warn!(%id, "ignoring non-UTF-8 binary frame"),
            },
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(tungstenite::Error::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => break,
            Err(err) => {
                warn!(%id, error = %err, "connection error");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::Value;
    use uuid::Uuid;

    use super::{serve_connection, SessionRegistry};
    use crate::pool::DispatchPool;
    use sightline_contracts::ResponseEnvelope;

    #[test]
    fn emit_to_unknown_session_is_a_no_op() {
        let sessions = SessionRegistry::new();
        assert!(!sessions.emit(Uuid::new_v4(), "late reply".to_string()));
    }

    #[test]
    fn emit_delivers_to_registered_session() {
        let sessions = SessionRegistry::new();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel();
        sessions.register(id, tx);
        assert!(sessions.emit(id, "hello".to_string()));
        assert_eq!(rx.recv().expect("reply"), "hello");

        sessions.unregister(id);
        assert!(!sessions.emit(id, "gone".to_string()));
    }

    #[test]
    fn connection_gets_ack_then_replies_for_each_message() {
        let sessions = Arc::new(SessionRegistry::new());
        let pool = DispatchPool::new(2, Arc::clone(&sessions), |raw: &str| {
            ResponseEnvelope::failure(format!("echo: {raw}"))
        });
        let queue = pool.queue();

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server_sessions = Arc::clone(&sessions);
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let _ = serve_connection(stream, &server_sessions, &queue);
        });

        let (mut client, _) =
            tungstenite::connect(format!("ws://{addr}")).expect("client connect");

        let ack = client.read().expect("ack frame");
        let ack: Value = serde_json::from_str(ack.to_text().expect("text")).expect("json");
        assert_eq!(ack["event"], "connect");
        assert_eq!(ack["result"]["status"], "connected");

        client
            .send(tungstenite::Message::from("frame-1".to_string()))
            .expect("send");
        let reply = client.read().expect("reply frame");
        let reply: Value = serde_json::from_str(reply.to_text().expect("text")).expect("json");
        assert_eq!(reply["result"]["status"], "error");
        assert_eq!(reply["result"]["message"], "echo: frame-1");

        client.close(None).expect("close");
        // Give the connection thread a tick to unregister.
        for _ in 0..50 {
            if sessions.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(sessions.is_empty());
    }
}

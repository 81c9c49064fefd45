//! Scriptable in-process engine double.
//!
//! Speaks the real wire protocol (length-prefixed JSON frames) over a local
//! TCP listener so tests exercise the actual reader/writer paths. The
//! behavior decides what happens to each received command.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};

use bridge_protocol::frame::{self, CommandFrame, ResponseFrame};

/// What the engine does with received commands.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Reply immediately with `{"echo": <command>, "params": <params>}`.
    Echo,
    /// As `Echo`, after the given delay per command.
    DelayedEcho(Duration),
    /// Collect batches of `n` commands, then answer each batch in random
    /// order. Exercises out-of-order correlation matching.
    ShuffledBatch(usize),
    /// Reply to every command with an error status and this message.
    ErrorWith(String),
    /// Read commands, never reply.
    Silent,
}

/// Handle to a running engine double.
pub struct MockEngine {
    addr: String,
    accepted: Arc<AtomicUsize>,
    requests_seen: Arc<AtomicUsize>,
}

impl MockEngine {
    /// Bind a listener and serve `behavior` on every accepted socket.
    pub async fn spawn(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock engine");
        let addr = listener.local_addr().expect("local addr").to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests_seen = Arc::new(AtomicUsize::new(0));

        let accepted_counter = Arc::clone(&accepted);
        let seen_counter = Arc::clone(&requests_seen);
        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                accepted_counter.fetch_add(1, Ordering::SeqCst);
                let behavior = behavior.clone();
                let seen = Arc::clone(&seen_counter);
                tokio::spawn(serve_socket(socket, behavior, seen));
            }
        });

        Self {
            addr,
            accepted,
            requests_seen,
        }
    }

    /// `host:port` of the listener.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sockets accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Commands received so far across all sockets.
    pub fn requests_seen(&self) -> usize {
        self.requests_seen.load(Ordering::SeqCst)
    }
}

async fn serve_socket(mut socket: TcpStream, behavior: MockBehavior, seen: Arc<AtomicUsize>) {
    let mut batch: Vec<CommandFrame> = Vec::new();
    loop {
        let payload = match frame::read_frame(&mut socket).await {
            Ok(p) => p,
            Err(_) => return,
        };
        let cmd: CommandFrame = match serde_json::from_slice(&payload) {
            Ok(c) => c,
            Err(_) => continue,
        };
        seen.fetch_add(1, Ordering::SeqCst);

        match &behavior {
            MockBehavior::Echo => {
                if reply(&mut socket, echo_frame(&cmd)).await.is_err() {
                    return;
                }
            }
            MockBehavior::DelayedEcho(delay) => {
                tokio::time::sleep(*delay).await;
                if reply(&mut socket, echo_frame(&cmd)).await.is_err() {
                    return;
                }
            }
            MockBehavior::ShuffledBatch(n) => {
                batch.push(cmd);
                if batch.len() >= *n {
                    let mut replies: Vec<ResponseFrame> =
                        batch.drain(..).map(|c| echo_frame(&c)).collect();
                    replies.shuffle(&mut rand::thread_rng());
                    for response in replies {
                        if reply(&mut socket, response).await.is_err() {
                            return;
                        }
                    }
                }
            }
            MockBehavior::ErrorWith(message) => {
                let response = ResponseFrame::error(cmd.correlation_id, message.clone());
                if reply(&mut socket, response).await.is_err() {
                    return;
                }
            }
            MockBehavior::Silent => {}
        }
    }
}

fn echo_frame(cmd: &CommandFrame) -> ResponseFrame {
    ResponseFrame::success(
        cmd.correlation_id,
        json!({ "echo": cmd.command, "params": cmd.params }),
    )
}

async fn reply(socket: &mut TcpStream, response: ResponseFrame) -> std::io::Result<()> {
    let bytes = frame::encode(&response).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })?;
    frame::write_frame(socket, &bytes).await
}

use crate::reconnect::{ReconnectPolicy, Reconnector, Schedule};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use vigil_protocol::ClientCommand;

const EVENT_CAP: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;

#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    Normal,
    Error(String),
    ConnectFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Normal => f.write_str("closed"),
            CloseReason::Error(e) => write!(f, "connection error: {e}"),
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// `attempt` is 0 for the first connection, then counts reconnects.
    Connecting { attempt: u32 },
    /// `session` numbers successful connections from 1; commands carry it back.
    Online { session: u64 },
    Frame(String),
    Error(String),
    Closed { reason: CloseReason },
    RetryScheduled { attempt: u32, delay: Duration },
    GaveUp { attempts: u32 },
}

#[derive(Debug)]
pub enum TransportCommand {
    /// Written only if `session` is still the live connection.
    Send { session: u64, cmd: ClientCommand },
    Shutdown,
}

pub struct TransportHandle {
    tx: mpsc::Sender<TransportCommand>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    /// Spawns the connection actor on the current tokio runtime.
    pub fn spawn(
        endpoint: Url,
        policy: ReconnectPolicy,
        command_buffer: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAP);
        let task = tokio::spawn(run(endpoint, Reconnector::new(policy), rx, event_tx));
        (Self { tx, task }, event_rx)
    }

    /// Never waits: a full queue or a stopped actor drops the command, and the
    /// actor drops it too once `session` has closed.
    pub fn try_send(&self, session: u64, cmd: ClientCommand) -> bool {
        self.tx
            .try_send(TransportCommand::Send { session, cmd })
            .is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn shutdown(self) -> Result<(), JoinError> {
        let _ = self.tx.send(TransportCommand::Shutdown).await;
        self.task.await
    }
}

enum Served {
    Closed(CloseReason),
    Shutdown,
}

async fn run(
    endpoint: Url,
    mut reconnector: Reconnector,
    mut rx: mpsc::Receiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut session = 0u64;
    loop {
        let attempt = reconnector.attempts();
        if !emit(&events, TransportEvent::Connecting { attempt }).await {
            return;
        }

        let reason = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
            Ok((socket, _)) => {
                reconnector.on_open();
                session += 1;
                info!(%endpoint, session, "websocket connected");
                if !emit(&events, TransportEvent::Online { session }).await {
                    return;
                }
                match serve(socket, session, &mut rx, &events).await {
                    Served::Closed(reason) => reason,
                    Served::Shutdown => return,
                }
            }
            Err(e) => CloseReason::ConnectFailed(e.to_string()),
        };

        if !emit(&events, TransportEvent::Closed { reason }).await {
            return;
        }

        match reconnector.on_closed() {
            Schedule::Scheduled { attempt, delay, .. } => {
                debug!(attempt, ?delay, "reconnect scheduled");
                if !emit(&events, TransportEvent::RetryScheduled { attempt, delay }).await {
                    return;
                }
            }
            Schedule::AlreadyPending { .. } => {}
            Schedule::Exhausted { attempts } => {
                warn!(attempts, "reconnect attempts exhausted");
                let _ = emit(&events, TransportEvent::GaveUp { attempts }).await;
                return;
            }
        }

        if !wait_for_retry(&mut reconnector, &mut rx).await {
            return;
        }
    }
}

async fn serve(
    socket: Socket,
    session: u64,
    rx: &mut mpsc::Receiver<TransportCommand>,
    events: &mpsc::Sender<TransportEvent>,
) -> Served {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(TransportCommand::Send { session: issued, cmd }) => {
                    if issued != session {
                        debug!(issued, session, "dropping command from a closed connection");
                        continue;
                    }
                    if let Err(e) = send_json(&mut write, &cmd).await {
                        return Served::Closed(CloseReason::Error(e));
                    }
                }
                Some(TransportCommand::Shutdown) | None => {
                    let _ = write.close().await;
                    return Served::Shutdown;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !emit(events, TransportEvent::Frame(text.as_str().to_owned())).await {
                        let _ = write.close().await;
                        return Served::Shutdown;
                    }
                }
                // Close replies and pings are answered by the socket itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let msg = e.to_string();
                    let _ = emit(events, TransportEvent::Error(msg.clone())).await;
                    return Served::Closed(CloseReason::Error(msg));
                }
                None => return Served::Closed(CloseReason::Normal),
            },
        }
    }
}

async fn wait_for_retry(
    reconnector: &mut Reconnector,
    rx: &mut mpsc::Receiver<TransportCommand>,
) -> bool {
    loop {
        if reconnector.fire() {
            return true;
        }
        let Some(remaining) = reconnector.remaining() else {
            return true;
        };
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            cmd = rx.recv() => match cmd {
                Some(TransportCommand::Send { .. }) => {
                    debug!("dropping command while disconnected")
                }
                Some(TransportCommand::Shutdown) | None => {
                    reconnector.cancel();
                    return false;
                }
            },
        }
    }
}

async fn send_json(write: &mut SocketSink, cmd: &ClientCommand) -> Result<(), String> {
    let payload = match cmd.encode() {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "dropping unencodable command");
            return Ok(());
        }
    };
    write
        .send(Message::Text(payload.into()))
        .await
        .map_err(|e| e.to_string())
}

async fn emit(events: &mpsc::Sender<TransportEvent>, event: TransportEvent) -> bool {
    events.send(event).await.is_ok()
}

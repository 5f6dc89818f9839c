use crate::error::FeedError;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message;
use vigil_protocol::{ClientCommand, ConfigState, Detection, InboundFrame};

pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;

#[derive(Debug)]
pub enum FeedInbound {
    ClientConnected { socket_addr: SocketAddr },
    ClientDisconnected { socket_addr: SocketAddr },
    Command { socket_addr: SocketAddr, cmd: ClientCommand },
    Malformed { socket_addr: SocketAddr, text: String },
}

#[derive(Debug)]
pub enum FeedOutbound {
    Broadcast(InboundFrame),
    /// Sent verbatim, for exercising clients against bad frames.
    Raw(String),
    DisconnectAll,
}

struct Peer {
    ws: tungstenite::WebSocket<TcpStream>,
    socket_addr: SocketAddr,
}

/// Websocket push endpoint on its own thread. Every connected client gets every frame.
pub struct FeedServer {
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    listen_addr: SocketAddr,
}

impl FeedServer {
    pub fn spawn(
        addr: &str,
        in_tx: Sender<FeedInbound>,
        out_rx: Receiver<FeedOutbound>,
    ) -> Result<Self, FeedError> {
        let bind_err = |source| FeedError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let listen_addr = listener.local_addr().map_err(FeedError::LocalAddr)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let join_handle =
            thread::spawn(move || run_server(listener, in_tx, out_rx, shutdown_for_thread));

        info!(%listen_addr, "feed server listening");
        Ok(Self {
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
            listen_addr,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_server(
    listener: TcpListener,
    in_tx: Sender<FeedInbound>,
    out_rx: Receiver<FeedOutbound>,
    shutdown: Arc<AtomicBool>,
) {
    let mut peers: Vec<Peer> = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        loop {
            match listener.accept() {
                Ok((stream, socket_addr)) => {
                    if let Some(peer) = handshake(stream, socket_addr) {
                        let _ = in_tx.try_send(FeedInbound::ClientConnected { socket_addr });
                        peers.push(peer);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "feed accept failed");
                    break;
                }
            }
        }

        loop {
            match out_rx.try_recv() {
                Ok(FeedOutbound::Broadcast(frame)) => match frame.encode() {
                    Ok(text) => broadcast(&mut peers, &in_tx, &text),
                    Err(e) => warn!(error = %e, "frame encode failed"),
                },
                Ok(FeedOutbound::Raw(text)) => broadcast(&mut peers, &in_tx, &text),
                Ok(FeedOutbound::DisconnectAll) => {
                    for mut peer in peers.drain(..) {
                        let _ = peer.ws.close(None);
                        let _ = peer.ws.flush();
                        let _ = in_tx.try_send(FeedInbound::ClientDisconnected {
                            socket_addr: peer.socket_addr,
                        });
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        // At most one inbound message per peer per pass; read timeouts keep the loop moving.
        peers.retain_mut(|peer| {
            let alive = match peer.ws.read() {
                Ok(msg) => handle_inbound(&in_tx, peer, msg),
                Err(tungstenite::Error::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    true
                }
                Err(_) => false,
            };
            if !alive {
                let _ = in_tx.try_send(FeedInbound::ClientDisconnected {
                    socket_addr: peer.socket_addr,
                });
            }
            alive
        });

        if peers.is_empty() {
            thread::sleep(Duration::from_millis(25));
        }
    }

    for mut peer in peers {
        let _ = peer.ws.close(None);
        let _ = peer.ws.flush();
    }
}

fn handshake(stream: TcpStream, socket_addr: SocketAddr) -> Option<Peer> {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_nodelay(true);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(10)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));

    match tungstenite::accept(stream) {
        Ok(ws) => {
            debug!(%socket_addr, "feed client connected");
            Some(Peer { ws, socket_addr })
        }
        Err(e) => {
            warn!(%socket_addr, error = %e, "feed handshake failed");
            None
        }
    }
}

fn broadcast(peers: &mut Vec<Peer>, in_tx: &Sender<FeedInbound>, text: &str) {
    peers.retain_mut(|peer| {
        if send_text(&mut peer.ws, text).is_ok() {
            return true;
        }
        let _ = peer.ws.close(None);
        let _ = in_tx.try_send(FeedInbound::ClientDisconnected {
            socket_addr: peer.socket_addr,
        });
        false
    });
}

/// Returns false once the peer is gone.
fn handle_inbound(in_tx: &Sender<FeedInbound>, peer: &mut Peer, msg: Message) -> bool {
    let text = match msg {
        Message::Text(s) => s,
        Message::Close(_) => return false,
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
            return true
        }
    };

    let inbound = match serde_json::from_str::<ClientCommand>(text.as_str()) {
        Ok(cmd) => FeedInbound::Command {
            socket_addr: peer.socket_addr,
            cmd,
        },
        Err(_) => FeedInbound::Malformed {
            socket_addr: peer.socket_addr,
            text: text.as_str().to_owned(),
        },
    };
    if in_tx.try_send(inbound).is_err() {
        warn!(socket_addr = %peer.socket_addr, "feed inbound queue full; dropping command");
    }
    true
}

fn send_text(ws: &mut tungstenite::WebSocket<TcpStream>, text: &str) -> Result<(), FeedError> {
    ws.send(Message::Text(text.to_owned().into()))
        .map_err(|e| FeedError::Send(e.to_string()))
}

/// Server-side authority for [`ConfigState`], driven by polling [`FeedHub::tick`].
pub struct FeedHub {
    inbound_rx: Receiver<FeedInbound>,
    outbound_tx: Sender<FeedOutbound>,
    config: ConfigState,
    clients: usize,
}

impl FeedHub {
    pub fn new(
        inbound_rx: Receiver<FeedInbound>,
        outbound_tx: Sender<FeedOutbound>,
        config: ConfigState,
    ) -> Self {
        Self {
            inbound_rx,
            outbound_tx,
            config,
            clients: 0,
        }
    }

    pub fn config(&self) -> ConfigState {
        self.config
    }

    pub fn clients(&self) -> usize {
        self.clients
    }

    /// Drains inbound events. A new client or an accepted command re-broadcasts the config.
    pub fn tick(&mut self) {
        let mut push_config = false;

        loop {
            match self.inbound_rx.try_recv() {
                Ok(FeedInbound::ClientConnected { socket_addr }) => {
                    self.clients += 1;
                    info!(%socket_addr, clients = self.clients, "dashboard attached");
                    push_config = true;
                }
                Ok(FeedInbound::ClientDisconnected { socket_addr }) => {
                    self.clients = self.clients.saturating_sub(1);
                    info!(%socket_addr, clients = self.clients, "dashboard detached");
                }
                Ok(FeedInbound::Command { socket_addr, cmd }) => {
                    debug!(%socket_addr, patch = ?cmd.patch(), "command");
                    cmd.patch().apply_to(&mut self.config);
                    self.config.threshold = self.config.threshold.clamp(0.0, 1.0);
                    push_config = true;
                }
                Ok(FeedInbound::Malformed { socket_addr, text }) => {
                    warn!(%socket_addr, len = text.len(), "ignoring malformed command");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if push_config {
            self.try_send(FeedOutbound::Broadcast(InboundFrame::Config(self.config)));
        }
    }

    pub fn publish(&self, people: Vec<Detection>) -> bool {
        self.try_send(FeedOutbound::Broadcast(InboundFrame::Update(people)))
    }

    pub fn try_send(&self, msg: FeedOutbound) -> bool {
        self.outbound_tx.try_send(msg).is_ok()
    }
}

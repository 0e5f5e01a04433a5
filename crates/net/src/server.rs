//! TCP server hosting a shared session document
//!
//! Every client sees the same document. Writes are applied in arrival order
//! under one lock, and each subscription whose value changed is sent a fresh
//! `Snapshot` before the writer gets its `Ack`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use poker_core::{Document, StorePath, Timestamp};
use serde_json::Value;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{resolve_server_values, Message, PROTOCOL_VERSION};

/// Maximum number of connected clients
const MAX_CONNECTIONS: usize = 64;

/// A client must say `Hello` within this window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Watched paths one client may hold at once
pub(crate) const MAX_SUBSCRIPTIONS: usize = 128;

/// How long queued frames may take to flush after a peer is dropped
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One watched path of one client
struct Watch {
    path: StorePath,
    /// Last value sent, to suppress notifications that change nothing
    last: Value,
}

/// Connected client
struct Peer {
    client_id: String,
    tx: mpsc::UnboundedSender<Message>,
    watches: HashMap<u64, Watch>,
}

/// Server state shared across tasks
struct ServerState {
    token: String,
    document: Document,
    peers: HashMap<u64, Peer>,
    next_conn_id: u64,
}

impl ServerState {
    fn send_to(&self, conn_id: u64, msg: Message) {
        if let Some(peer) = self.peers.get(&conn_id) {
            if peer.tx.send(msg).is_err() {
                debug!(conn_id, "Failed to queue message for peer");
            }
        }
    }

    /// Push the new value to every watch whose view of `changed` differs
    fn notify(&mut self, changed: &StorePath) {
        let ServerState {
            document, peers, ..
        } = self;

        for peer in peers.values_mut() {
            for (sub_id, watch) in peer.watches.iter_mut() {
                if !watch.path.overlaps(changed) {
                    continue;
                }
                let value = document.get(&watch.path);
                if value == watch.last {
                    continue;
                }
                watch.last = value.clone();
                let _ = peer.tx.send(Message::Snapshot {
                    sub_id: *sub_id,
                    value,
                });
            }
        }
    }
}

/// Session server handle
pub struct Server {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Start a server on all interfaces
    pub async fn start(port: u16, token: String) -> Result<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], port)), token).await
    }

    /// Start a server on a specific address
    pub async fn bind(addr: SocketAddr, token: String) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Session server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ServerState {
            token,
            document: Document::new(),
            peers: HashMap::new(),
            next_conn_id: 1,
        }));

        tokio::spawn(accept_loop(listener, state.clone(), shutdown_tx.clone()));

        Ok(Server {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current value at `path`
    pub async fn snapshot(&self, path: &StorePath) -> Value {
        self.state.read().await.document.get(path)
    }

    /// Number of clients past the handshake
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.peers.len()
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }

}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Random access token
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            state.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let (conn_id, rx) = match handle_hello(&mut reader, &state).await {
        Ok(admitted) => admitted,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Handshake failed");
            let reason = match e {
                Error::Rejected(reason) => reason,
                other => other.to_string(),
            };
            let _ = write_frame(&mut writer, &Message::Rejected { reason }).await;
            return;
        }
    };

    info!(addr = %addr, conn_id, "Client connected");
    let mut writer_handle = tokio::spawn(writer_task(writer, rx));

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(msg) => handle_message(msg, conn_id, &state).await,
                    Err(Error::ConnectionClosed) => {
                        debug!(conn_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(conn_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                state.read().await.send_to(conn_id, Message::ServerShutdown);
                break;
            }
        }
    }

    // Dropping the peer closes its queue; let the writer flush what is left
    remove_peer(&state, conn_id).await;
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    info!(addr = %addr, conn_id, "Client disconnected");
}

/// Validate `Hello` and register the peer
async fn handle_hello(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<ServerState>>,
) -> Result<(u64, mpsc::UnboundedReceiver<Message>)> {
    let msg = match timeout(HANDSHAKE_TIMEOUT, read_frame(reader)).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::Timeout),
    };

    let Message::Hello {
        client_id,
        token,
        version,
    } = msg
    else {
        return Err(Error::Protocol("Expected Hello".into()));
    };

    if version != PROTOCOL_VERSION {
        return Err(Error::Rejected(format!(
            "Unsupported protocol version {}",
            version
        )));
    }

    let mut s = state.write().await;

    if token != s.token {
        return Err(Error::Rejected("Invalid token".into()));
    }

    if s.peers.len() >= MAX_CONNECTIONS {
        return Err(Error::ServerFull);
    }

    let conn_id = s.next_conn_id;
    s.next_conn_id += 1;

    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Message::Welcome {
        server_time: Timestamp::now().as_millis(),
    });
    debug!(conn_id, client_id = %client_id, "Handshake accepted");
    s.peers.insert(
        conn_id,
        Peer {
            client_id,
            tx,
            watches: HashMap::new(),
        },
    );

    Ok((conn_id, rx))
}

/// Writer task - sends queued messages to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Handle a request from a connected client
async fn handle_message(msg: Message, conn_id: u64, state: &Arc<RwLock<ServerState>>) {
    match msg {
        Message::Subscribe { sub_id, path } => {
            let mut s = state.write().await;
            let value = s.document.get(&path);
            if let Some(peer) = s.peers.get_mut(&conn_id) {
                if peer.watches.len() >= MAX_SUBSCRIPTIONS && !peer.watches.contains_key(&sub_id) {
                    warn!(conn_id, sub_id, path = %path, "Subscription limit reached");
                    let _ = peer.tx.send(Message::SubscriptionError {
                        sub_id,
                        reason: format!("Too many subscriptions (max {})", MAX_SUBSCRIPTIONS),
                    });
                    return;
                }
                debug!(conn_id, sub_id, path = %path, "Subscribed");
                peer.watches.insert(
                    sub_id,
                    Watch {
                        path,
                        last: value.clone(),
                    },
                );
                let _ = peer.tx.send(Message::Snapshot { sub_id, value });
            }
        }
        Message::Unsubscribe { sub_id } => {
            let mut s = state.write().await;
            if let Some(peer) = s.peers.get_mut(&conn_id) {
                peer.watches.remove(&sub_id);
            }
        }
        Message::Write {
            req_id,
            path,
            mut value,
        } => {
            let mut s = state.write().await;
            if path.is_root() {
                s.send_to(conn_id, root_refused(req_id));
                return;
            }
            resolve_server_values(&mut value, Timestamp::now().as_millis());
            s.document.set(&path, value);
            s.notify(&path);
            s.send_to(conn_id, Message::Ack { req_id });
            debug!(conn_id, req_id, path = %path, "Applied write");
        }
        Message::Remove { req_id, path } => {
            let mut s = state.write().await;
            if path.is_root() {
                s.send_to(conn_id, root_refused(req_id));
                return;
            }
            s.document.remove(&path);
            s.notify(&path);
            s.send_to(conn_id, Message::Ack { req_id });
            debug!(conn_id, req_id, path = %path, "Applied remove");
        }
        other => {
            debug!(conn_id, message = ?other, "Ignoring unexpected message type");
        }
    }
}

/// Clients only ever touch `session/...`; the whole document is off limits
fn root_refused(req_id: u64) -> Message {
    Message::Nack {
        req_id,
        reason: "Cannot modify the document root".into(),
    }
}

async fn remove_peer(state: &Arc<RwLock<ServerState>>, conn_id: u64) {
    if let Some(peer) = state.write().await.peers.remove(&conn_id) {
        debug!(
            conn_id,
            client_id = %peer.client_id,
            watches = peer.watches.len(),
            "Peer removed"
        );
    }
}

//! TCP client for a session server
//!
//! [`NetworkStore`] implements [`RemoteStore`] over one connection. A single
//! connection task owns the socket, the active subscriptions and the requests
//! waiting for an ack; the handle only sends it commands. When the transport
//! drops, pending requests fail, subscribers get an error notification, and
//! the task reconnects with backoff and re-subscribes every active path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use poker_core::{NotificationSink, RemoteStore, StoreKind, StoreNotification, StorePath, Subscription};
use serde_json::Value;
use tokio::io::WriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::endpoint::SessionEndpoint;
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{server_timestamp, Message, PROTOCOL_VERSION};

/// Delay before each reconnect attempt; the last entry repeats
pub const RECONNECT_DELAYS_MS: [u64; 5] = [1_000, 2_000, 5_000, 10_000, 30_000];

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Closed,
}

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Sent in `Hello`, for the server's logs
    pub client_id: String,
    pub connect_timeout: Duration,
    /// How long a write or remove waits for its ack
    pub request_timeout: Duration,
}

impl ClientOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        }
    }
}

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Subscribe {
        sub_id: u64,
        path: StorePath,
        sink: NotificationSink,
    },
    Unsubscribe {
        sub_id: u64,
    },
    Write {
        path: StorePath,
        value: Value,
        reply: Reply,
    },
    Remove {
        path: StorePath,
        reply: Reply,
    },
    Shutdown,
}

/// Live connection after a successful handshake
struct Link {
    writer: WriteHalf<TcpStream>,
    /// Frames forwarded by the reader task
    frames: mpsc::UnboundedReceiver<Result<Message>>,
    reader: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Why a connected run ended
enum Exit {
    Lost,
    Shutdown,
}

struct ActiveSubscription {
    path: StorePath,
    sink: NotificationSink,
}

/// [`RemoteStore`] backed by a session server
pub struct NetworkStore {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    next_sub_id: AtomicU64,
    request_timeout: Duration,
}

impl NetworkStore {
    /// Connect and complete the handshake, or fail within the connect timeout
    pub async fn connect(endpoint: SessionEndpoint, options: ClientOptions) -> Result<Self> {
        info!(addr = %endpoint.socket_addr(), "Connecting to session server");

        let link = open_link(&endpoint, &options).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let request_timeout = options.request_timeout;

        let task = ConnectionTask {
            endpoint,
            options,
            cmd_rx,
            state_tx,
            subscriptions: HashMap::new(),
            pending: HashMap::new(),
            next_req_id: 1,
        };
        tokio::spawn(task.run(link));

        Ok(Self {
            cmd_tx,
            state_rx,
            next_sub_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Observe connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the connection; later requests fail with `NotConnected`
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    async fn request(&self, cmd: Command, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| Error::NotConnected)?;
        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout),
        }
    }
}

impl Drop for NetworkStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl RemoteStore for NetworkStore {
    fn subscribe(&self, path: &StorePath, sink: NotificationSink) -> Subscription {
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let cmd = Command::Subscribe {
            sub_id,
            path: path.clone(),
            sink: sink.clone(),
        };
        if self.cmd_tx.send(cmd).is_err() {
            let _ = sink.send(StoreNotification::Error {
                path: path.clone(),
                reason: Error::NotConnected.to_string(),
            });
        }

        let cmd_tx = self.cmd_tx.clone();
        Subscription::new(move || {
            let _ = cmd_tx.send(Command::Unsubscribe { sub_id });
        })
    }

    async fn write(&self, path: &StorePath, value: Value) -> poker_core::Result<()> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Write {
            path: path.clone(),
            value,
            reply,
        };
        Ok(self.request(cmd, rx).await?)
    }

    async fn remove(&self, path: &StorePath) -> poker_core::Result<()> {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Remove {
            path: path.clone(),
            reply,
        };
        Ok(self.request(cmd, rx).await?)
    }

    fn timestamp_now(&self) -> Value {
        server_timestamp()
    }

    fn kind(&self) -> StoreKind {
        StoreKind::Network
    }
}

/// Connect, say `Hello`, wait for `Welcome`
async fn open_link(endpoint: &SessionEndpoint, options: &ClientOptions) -> Result<Link> {
    match timeout(options.connect_timeout, handshake(endpoint, options)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

async fn handshake(endpoint: &SessionEndpoint, options: &ClientOptions) -> Result<Link> {
    let stream = TcpStream::connect(endpoint.socket_addr()).await?;
    let (mut reader, mut writer) = tokio::io::split(stream);

    let hello = Message::Hello {
        client_id: options.client_id.clone(),
        token: endpoint.token.clone(),
        version: PROTOCOL_VERSION,
    };
    write_frame(&mut writer, &hello).await?;

    match read_frame(&mut reader).await? {
        Message::Welcome { server_time } => {
            debug!(server_time, "Handshake complete");
        }
        Message::Rejected { reason } => {
            warn!(reason = %reason, "Connection rejected");
            return Err(Error::Rejected(reason));
        }
        other => {
            return Err(Error::Protocol(format!(
                "Expected Welcome, got {:?}",
                other
            )));
        }
    }

    // Reading runs in its own task so a half-read frame is never cancelled
    let (frame_tx, frames) = mpsc::unbounded_channel();
    let reader = tokio::spawn(async move {
        loop {
            let result = read_frame(&mut reader).await;
            let failed = result.is_err();
            if frame_tx.send(result).is_err() || failed {
                break;
            }
        }
    });

    Ok(Link {
        writer,
        frames,
        reader,
    })
}

/// Owns the connection and all per-connection bookkeeping
struct ConnectionTask {
    endpoint: SessionEndpoint,
    options: ClientOptions,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: HashMap<u64, ActiveSubscription>,
    pending: HashMap<u64, Reply>,
    next_req_id: u64,
}

impl ConnectionTask {
    async fn run(mut self, first: Link) {
        let mut link = Some(first);
        let mut attempt = 0usize;

        loop {
            if let Some(current) = link.take() {
                attempt = 0;
                self.state_tx.send_replace(ConnectionState::Connected);
                match self.run_connected(current).await {
                    Exit::Shutdown => break,
                    Exit::Lost => {
                        warn!(addr = %self.endpoint.socket_addr(), "Connection to session server lost");
                        self.state_tx.send_replace(ConnectionState::Reconnecting);
                        self.connection_lost();
                    }
                }
            }

            let delay = RECONNECT_DELAYS_MS[attempt.min(RECONNECT_DELAYS_MS.len() - 1)];
            attempt += 1;
            debug!(attempt, delay_ms = delay, "Waiting before reconnect");
            if let Exit::Shutdown = self.wait_offline(Duration::from_millis(delay)).await {
                break;
            }

            match open_link(&self.endpoint, &self.options).await {
                Ok(new_link) => {
                    info!(attempt, "Reconnected to session server");
                    link = Some(new_link);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect failed");
                }
            }
        }

        self.state_tx.send_replace(ConnectionState::Closed);
        self.fail_pending(|| Error::NotConnected);
        debug!("Connection task finished");
    }

    async fn run_connected(&mut self, mut link: Link) -> Exit {
        // Restore subscriptions after a reconnect
        let resubscribe: Vec<Message> = self
            .subscriptions
            .iter()
            .map(|(sub_id, sub)| Message::Subscribe {
                sub_id: *sub_id,
                path: sub.path.clone(),
            })
            .collect();
        for msg in resubscribe {
            if write_frame(&mut link.writer, &msg).await.is_err() {
                return Exit::Lost;
            }
        }

        loop {
            tokio::select! {
                frame = link.frames.recv() => {
                    match frame {
                        Some(Ok(Message::ServerShutdown)) => {
                            info!("Session server shutting down");
                            return Exit::Lost;
                        }
                        Some(Ok(msg)) => self.handle_server_message(msg),
                        Some(Err(Error::ConnectionClosed)) | None => return Exit::Lost,
                        Some(Err(e)) => {
                            warn!(error = %e, "Read error");
                            return Exit::Lost;
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    let msg = match cmd {
                        None | Some(Command::Shutdown) => return Exit::Shutdown,
                        Some(cmd) => self.handle_command(cmd),
                    };
                    if let Some(msg) = msg {
                        if let Err(e) = write_frame(&mut link.writer, &msg).await {
                            warn!(error = %e, "Write error");
                            return Exit::Lost;
                        }
                    }
                }
            }
        }
    }

    /// Record a command and build the frame to send for it, if any
    fn handle_command(&mut self, cmd: Command) -> Option<Message> {
        match cmd {
            Command::Subscribe { sub_id, path, sink } => {
                self.subscriptions.insert(
                    sub_id,
                    ActiveSubscription {
                        path: path.clone(),
                        sink,
                    },
                );
                Some(Message::Subscribe { sub_id, path })
            }
            Command::Unsubscribe { sub_id } => self
                .subscriptions
                .remove(&sub_id)
                .map(|_| Message::Unsubscribe { sub_id }),
            Command::Write { path, value, reply } => {
                let req_id = self.track(reply);
                Some(Message::Write {
                    req_id,
                    path,
                    value,
                })
            }
            Command::Remove { path, reply } => {
                let req_id = self.track(reply);
                Some(Message::Remove { req_id, path })
            }
            Command::Shutdown => None,
        }
    }

    fn track(&mut self, reply: Reply) -> u64 {
        let req_id = self.next_req_id;
        self.next_req_id += 1;
        self.pending.insert(req_id, reply);
        req_id
    }

    fn handle_server_message(&mut self, msg: Message) {
        match msg {
            Message::Snapshot { sub_id, value } => {
                if let Some(sub) = self.subscriptions.get(&sub_id) {
                    let _ = sub.sink.send(StoreNotification::Value {
                        path: sub.path.clone(),
                        value,
                    });
                }
            }
            Message::SubscriptionError { sub_id, reason } => {
                if let Some(sub) = self.subscriptions.remove(&sub_id) {
                    warn!(path = %sub.path, reason = %reason, "Subscription cancelled by server");
                    let _ = sub.sink.send(StoreNotification::Error {
                        path: sub.path,
                        reason,
                    });
                }
            }
            Message::Ack { req_id } => {
                if let Some(reply) = self.pending.remove(&req_id) {
                    let _ = reply.send(Ok(()));
                }
            }
            Message::Nack { req_id, reason } => {
                if let Some(reply) = self.pending.remove(&req_id) {
                    let _ = reply.send(Err(Error::Rejected(reason)));
                }
            }
            other => {
                debug!(message = ?other, "Ignoring unexpected message");
            }
        }
    }

    /// Fail in-flight requests and tell subscribers values may be stale
    fn connection_lost(&mut self) {
        self.fail_pending(|| Error::ConnectionClosed);
        for sub in self.subscriptions.values() {
            let _ = sub.sink.send(StoreNotification::Error {
                path: sub.path.clone(),
                reason: Error::ConnectionClosed.to_string(),
            });
        }
    }

    fn fail_pending(&mut self, error: impl Fn() -> Error) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(error()));
        }
    }

    /// Serve commands without a connection until `delay` elapses
    async fn wait_offline(&mut self, delay: Duration) -> Exit {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Exit::Lost,
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(Command::Shutdown) => return Exit::Shutdown,
                        Some(Command::Write { reply, .. }) | Some(Command::Remove { reply, .. }) => {
                            let _ = reply.send(Err(Error::NotConnected));
                        }
                        Some(Command::Subscribe { sub_id, path, sink }) => {
                            // Registered now, sent on the next connection
                            let _ = sink.send(StoreNotification::Error {
                                path: path.clone(),
                                reason: Error::NotConnected.to_string(),
                            });
                            let _ = self.handle_command(Command::Subscribe { sub_id, path, sink });
                        }
                        Some(cmd @ Command::Unsubscribe { .. }) => {
                            let _ = self.handle_command(cmd);
                        }
                    }
                }
            }
        }
    }
}

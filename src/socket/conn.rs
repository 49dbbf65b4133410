use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};

use crate::client::Client;
use crate::packet::{DecodedFrame, OutboundPacket, PacketRegistry};
use crate::socket::error::{DialError, LaunchError};
use crate::socket::transport::TransportEvent;
use crate::ui::UiLink;

/// How long a graceful close waits for the peer to hang up.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Normal-closure WebSocket code, used wherever the client hangs up on
/// its own terms.
pub const NORMAL_CLOSE: u16 = 1000;

/// Lifecycle of one socket session. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Online,
    Closing,
    Closed,
}

pub(crate) enum ConnCommand {
    Send {
        frame: String,
        done: oneshot::Sender<()>,
    },
    Stop {
        code: u16,
        reason: String,
        done: oneshot::Sender<()>,
    },
}

/// Shared handle onto one connection worker. Cheap to clone; all methods
/// are safe from any context.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ConnCommand>,
    state: watch::Receiver<ConnState>,
    registry: Arc<PacketRegistry>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnState {
        *self.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.state() != ConnState::Closed
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnState::Online
    }

    /// Encodes and enqueues a packet for delivery on the worker's own
    /// context. Fire-and-forget: handlers run on that context and must not
    /// wait for themselves.
    pub fn queue(&self, packet: OutboundPacket) {
        let _ = self.enqueue(packet);
    }

    /// Like `queue`, but resolves once the frame has been written to the
    /// socket. Resolves immediately as a no-op when the worker is gone or
    /// the frame was dropped.
    pub async fn send(&self, packet: OutboundPacket) {
        if let Some(done) = self.enqueue(packet) {
            let _ = done.await;
        }
    }

    fn enqueue(&self, packet: OutboundPacket) -> Option<oneshot::Receiver<()>> {
        let type_name = packet.type_name();
        if !self.is_alive() {
            debug!(target: "Client/Connection", "Worker is gone, dropping {type_name}");
            return None;
        }
        let frame = match self.registry.encode(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "Client/Connection", "Failed to encode {type_name}: {e}");
                return None;
            }
        };
        let (done_tx, done_rx) = oneshot::channel();
        match self.cmd_tx.try_send(ConnCommand::Send {
            frame,
            done: done_tx,
        }) {
            Ok(()) => Some(done_rx),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(target: "Client/Connection", "Mailbox full, dropping {type_name}");
                None
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(target: "Client/Connection", "Mailbox closed, dropping {type_name}");
                None
            }
        }
    }

    /// Requests a graceful close and resolves once the worker has fully
    /// ended. Idempotent; resolves immediately when already dead.
    pub async fn stop(&self, code: u16, reason: &str) {
        if !self.is_alive() {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        let command = ConnCommand::Stop {
            code,
            reason: reason.to_string(),
            done: done_tx,
        };
        if self.cmd_tx.send(command).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

/// Spawns the worker task for one session and hands back its handle.
/// `ready` resolves when the session reaches online or fails to.
pub(crate) fn spawn(
    client: Arc<Client>,
    token: String,
    ready: oneshot::Sender<Result<(), LaunchError>>,
) -> ConnectionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (state_tx, state_rx) = watch::channel(ConnState::Idle);
    let handle = ConnectionHandle {
        cmd_tx,
        state: state_rx,
        registry: client.registry().clone(),
    };
    tokio::spawn(run_worker(
        client,
        token,
        ready,
        cmd_rx,
        state_tx,
        handle.clone(),
    ));
    handle
}

async fn run_worker(
    client: Arc<Client>,
    token: String,
    ready: oneshot::Sender<Result<(), LaunchError>>,
    mut cmd_rx: mpsc::Receiver<ConnCommand>,
    state_tx: watch::Sender<ConnState>,
    handle: ConnectionHandle,
) {
    let ui = client.ui().clone();
    let started = Instant::now();
    let _ = state_tx.send(ConnState::Connecting);
    info!(target: "Client/Connection", "Client going online");

    let endpoint = client.config.endpoint.clone();
    let dialed = client.transport_factory().dial(&endpoint, &token).await;
    let (transport, mut events) = match dialed {
        Ok(pair) => pair,
        Err(DialError::AuthExpired) => {
            info!(target: "Client/Connection", "Session token expired, login required");
            ui.auth_expired();
            let _ = state_tx.send(ConnState::Closed);
            let _ = ready.send(Err(LaunchError::AuthExpired));
            return;
        }
        Err(DialError::Failed(e)) => {
            error!(target: "Client/Connection", "Failed to go online: {e:?}");
            let _ = state_tx.send(ConnState::Closed);
            let _ = ready.send(Err(LaunchError::Connect(e)));
            return;
        }
    };

    info!(target: "Client/Connection", "Client online in {:?}", started.elapsed());
    let _ = state_tx.send(ConnState::Online);
    let _ = ready.send(Ok(()));
    ui.connected();

    let mut stop_waiters: Vec<oneshot::Sender<()>> = Vec::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::TextReceived(text)) => {
                    handle_frame(&client, &handle, &ui, &text).await;
                }
                Some(TransportEvent::BinaryReceived(data)) => {
                    warn!(
                        target: "Client/Connection",
                        "Ignoring unexpected binary frame ({} bytes)",
                        data.len()
                    );
                }
                Some(TransportEvent::Disconnected) | None => {
                    info!(target: "Client/Connection", "Session ended by peer");
                    break;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(ConnCommand::Send { frame, done }) => {
                    if let Err(e) = transport.send_text(&frame).await {
                        warn!(target: "Client/Connection", "Failed to send frame: {e}");
                    }
                    let _ = done.send(());
                }
                Some(ConnCommand::Stop { code, reason, done }) => {
                    info!(target: "Client/Connection", "Client going offline ({code}: {reason})");
                    let _ = state_tx.send(ConnState::Closing);
                    stop_waiters.push(done);
                    if transport.close(code, &reason).await.is_ok() {
                        drain_until_closed(&mut events).await;
                    }
                    break;
                }
                // The worker's own handle keeps a sender alive, so the
                // mailbox cannot close while this loop runs.
                None => break,
            },
        }
    }

    let _ = state_tx.send(ConnState::Closed);
    info!(target: "Client/Connection", "Receive loop ended after {:?}", started.elapsed());
    for waiter in stop_waiters {
        let _ = waiter.send(());
    }
}

/// After our close frame is out, give the peer a moment to echo it so the
/// close is clean on both ends.
async fn drain_until_closed(events: &mut mpsc::Receiver<TransportEvent>) {
    let deadline = tokio::time::sleep(CLOSE_GRACE);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Disconnected) | None => return,
                Some(_) => {}
            },
            _ = &mut deadline => {
                debug!(target: "Client/Connection", "Peer never echoed the close, giving up");
                return;
            }
        }
    }
}

async fn handle_frame(
    client: &Arc<Client>,
    handle: &ConnectionHandle,
    ui: &Arc<dyn UiLink>,
    text: &str,
) {
    match client.registry().decode(text) {
        Ok(DecodedFrame::Packet(packet)) => {
            info!(target: "Client/Connection", "Received ({})", packet.type_name());
            if let Err(e) = packet.execute(handle, client, ui).await {
                error!(target: "Client/Connection", "Handler failed: {e:?}");
            }
        }
        Ok(DecodedFrame::Outbound(packet)) => {
            warn!(
                target: "Client/Connection",
                "Server echoed a client-bound {}, skipping",
                packet.type_name()
            );
        }
        Ok(DecodedFrame::Raw(raw)) => {
            warn!(target: "Client/Connection", "Skipping frame without a known packet tag: {raw}");
        }
        Err(e) => {
            warn!(target: "Client/Connection", "Skipping malformed frame: {e}");
        }
    }
}

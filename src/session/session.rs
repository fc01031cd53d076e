//! The H-UDP session: one socket, two channels.
//!
//! A [`Session`] owns the socket and the state machines for its role. Two
//! background tasks drive it:
//!
//! - the receive loop reads datagrams, dispatches them by channel type and
//!   pushes delivered payloads into the delivery queue;
//! - the timer task sleeps until the earliest retransmission or skip
//!   deadline and fires whatever has expired.
//!
//! Callers interact through [`Session::send`] and [`Session::receive`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{Role, SessionConfig, WindowFullPolicy};
use crate::core::{HudpError, HudpResult, SeqNum};
use crate::delivery::{Delivered, Transmit};
use crate::frame::{Channel, Frame, decode};
use crate::reliable::{AckOutcome, Disposition, SrReceiver, SrSender, TimeoutEvent};
use crate::tracking::{DeliveryStats, ReceivedEvent, SentEvent, TrackingStore};
use crate::transport::{DatagramSender, HudpSocket, HudpSocketBuilder, is_transient};
use crate::unreliable::{UnreliableReceiver, UnreliableSender};

/// Protocol state for one role.
#[derive(Debug)]
enum Endpoint {
    Sender {
        reliable: SrSender,
        unreliable: UnreliableSender,
        remote: SocketAddr,
    },
    Receiver {
        reliable: SrReceiver,
        unreliable: UnreliableReceiver,
    },
}

impl Endpoint {
    fn next_deadline(&self) -> Option<Instant> {
        match self {
            Endpoint::Sender { reliable, .. } => reliable.next_deadline(),
            Endpoint::Receiver { reliable, .. } => reliable.next_deadline(),
        }
    }
}

#[derive(Debug)]
struct State {
    endpoint: Endpoint,
    tracking: TrackingStore,
}

/// State shared between the session handle and its tasks.
#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    /// New deadline armed; the timer task should recompute its sleep.
    timer_wake: Notify,
    /// Send window advanced, or the session failed.
    window_open: Notify,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the session after an unrecoverable socket error.
    fn fail(&self, err: &io::Error) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            error!(error = %err, "socket failure, closing session");
        }
        self.shutdown.send_replace(true);
        self.window_open.notify_waiters();
    }
}

/// An open H-UDP session.
///
/// # Example
///
/// ```ignore
/// use hudp::prelude::*;
///
/// let config = SessionConfig::builder()
///     .sender("127.0.0.1:12345".parse()?)
///     .build();
/// let session = Session::open(config).await?;
///
/// session.send(b"spawn player", true).await?;
/// session.send(b"pos 10 20", false).await?;
/// session.close().await;
/// ```
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    local_addr: SocketAddr,
    socket: DatagramSender,
    shared: Arc<Shared>,
    deliveries: Mutex<mpsc::Receiver<Delivered>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Validate `config`, bind the socket and start the background tasks.
    pub async fn open(config: SessionConfig) -> HudpResult<Self> {
        if let Some(level) = config.log_level {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
        }
        config.validate()?;

        let socket = HudpSocketBuilder::new()
            .recv_buffer_size(config.recv_buffer_size)
            .bind(config.local_addr)
            .await?;
        let local_addr = socket.local_addr()?;
        Ok(Self::start(config, socket, local_addr))
    }

    /// Start a session on an already bound socket.
    pub fn from_socket(config: SessionConfig, socket: HudpSocket) -> HudpResult<Self> {
        config.validate()?;
        let local_addr = socket.local_addr()?;
        Ok(Self::start(config, socket, local_addr))
    }

    fn start(config: SessionConfig, socket: HudpSocket, local_addr: SocketAddr) -> Self {
        let endpoint = match (config.role, config.remote_addr) {
            (Role::Sender, Some(remote)) => Endpoint::Sender {
                reliable: SrSender::new(config.sender_config()),
                unreliable: UnreliableSender::new(),
                remote,
            },
            _ => Endpoint::Receiver {
                reliable: SrReceiver::new(config.receiver_config()),
                unreliable: UnreliableReceiver::new(),
            },
        };

        let tracking = match config.tracking_dir {
            Some(_) => TrackingStore::new(),
            None => TrackingStore::without_log(),
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                endpoint,
                tracking,
            }),
            timer_wake: Notify::new(),
            window_open: Notify::new(),
            closed: AtomicBool::new(false),
            shutdown,
        });

        let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_queue_capacity);
        let writer = socket.sender();

        let receive_task = tokio::spawn(receive_loop(
            socket,
            Arc::clone(&shared),
            delivery_tx.clone(),
            shutdown_rx.clone(),
        ));
        let timer_task = tokio::spawn(timer_loop(
            Arc::clone(&shared),
            writer.clone(),
            delivery_tx,
            shutdown_rx,
        ));

        info!(
            role = %config.role,
            local = %local_addr,
            remote = ?config.remote_addr,
            window = config.window_capacity,
            "session opened"
        );

        Self {
            config,
            local_addr,
            socket: writer,
            shared,
            deliveries: Mutex::new(delivery_rx),
            tasks: vec![receive_task, timer_task],
        }
    }

    /// This session's role.
    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Configuration the session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn wrong_role(&self, operation: &'static str) -> HudpError {
        HudpError::WrongRole {
            operation,
            role: self.config.role.as_str(),
        }
    }

    /// Send `data` on the reliable or unreliable channel.
    ///
    /// Returns the sequence number assigned on that channel. With
    /// [`WindowFullPolicy::Reject`] a full reliable window fails with
    /// [`HudpError::WindowFull`]; with [`WindowFullPolicy::Wait`] the call
    /// waits for an acknowledgment to free a slot. Once the session has
    /// failed or closed, both channels return [`HudpError::Closed`].
    pub async fn send(&self, data: impl Into<Vec<u8>>, reliable: bool) -> HudpResult<SeqNum> {
        if self.config.role != Role::Sender {
            return Err(self.wrong_role("send"));
        }
        if self.shared.is_closed() {
            return Err(HudpError::Closed);
        }
        let payload = data.into();

        let (transmit, remote) = if reliable {
            self.submit_reliable(payload).await?
        } else {
            let mut state = self.shared.state.lock().await;
            let State { endpoint, tracking } = &mut *state;
            let Endpoint::Sender {
                unreliable, remote, ..
            } = endpoint
            else {
                return Err(self.wrong_role("send"));
            };
            let transmit = unreliable.prepare(payload)?;
            tracking.record_sent(Channel::Unreliable, transmit.seq, SentEvent::Sent);
            (transmit, *remote)
        };

        if let Err(err) = self.socket.send_to(&transmit.datagram, remote).await {
            self.shared.fail(&err);
            return Err(HudpError::Socket(err));
        }
        Ok(transmit.seq)
    }

    async fn submit_reliable(&self, payload: Vec<u8>) -> HudpResult<(Transmit, SocketAddr)> {
        loop {
            if self.shared.is_closed() {
                return Err(HudpError::Closed);
            }
            // Registered before checking so a slide in between is not missed
            let window_open = self.shared.window_open.notified();

            {
                let mut state = self.shared.state.lock().await;
                let State { endpoint, tracking } = &mut *state;
                let Endpoint::Sender {
                    reliable, remote, ..
                } = endpoint
                else {
                    return Err(self.wrong_role("send"));
                };

                if reliable.window_space() > 0
                    || self.config.window_full_policy == WindowFullPolicy::Reject
                {
                    let transmit = reliable.submit(payload, Instant::now())?;
                    tracking.record_sent(Channel::Reliable, transmit.seq, SentEvent::Sent);
                    self.shared.timer_wake.notify_one();
                    return Ok((transmit, *remote));
                }
                debug!(base = %reliable.base(), "send window full, waiting");
            }

            window_open.await;
        }
    }

    /// Next delivered payload from either channel.
    ///
    /// Waits up to `timeout` (forever when `None`); an empty queue at the
    /// deadline yields [`HudpError::Timeout`].
    pub async fn receive(&self, timeout: Option<Duration>) -> HudpResult<Delivered> {
        if self.config.role != Role::Receiver {
            return Err(self.wrong_role("receive"));
        }

        let mut deliveries = self.deliveries.lock().await;
        let next = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, deliveries.recv())
                .await
                .map_err(|_| HudpError::Timeout)?,
            None => deliveries.recv().await,
        };
        next.ok_or(HudpError::Closed)
    }

    /// Wait until every reliable packet has been acknowledged or abandoned.
    pub async fn wait_idle(&self, timeout: Duration) -> HudpResult<()> {
        if self.config.role != Role::Sender {
            return Err(self.wrong_role("wait_idle"));
        }

        tokio::time::timeout(timeout, async {
            loop {
                let window_open = self.shared.window_open.notified();
                {
                    let state = self.shared.state.lock().await;
                    if let Endpoint::Sender { reliable, .. } = &state.endpoint {
                        if reliable.is_idle() {
                            return Ok(());
                        }
                    }
                }
                if self.shared.is_closed() {
                    return Err(HudpError::Closed);
                }
                window_open.await;
            }
        })
        .await
        .map_err(|_| HudpError::Timeout)?
    }

    /// Free slots in the reliable send window.
    pub async fn window_space(&self) -> HudpResult<u16> {
        let state = self.shared.state.lock().await;
        match &state.endpoint {
            Endpoint::Sender { reliable, .. } => Ok(reliable.window_space()),
            Endpoint::Receiver { .. } => Err(self.wrong_role("window_space")),
        }
    }

    /// Aggregate the tracking logs.
    pub async fn delivery_stats(&self) -> DeliveryStats {
        self.shared.state.lock().await.tracking.delivery_stats()
    }

    /// Wipe the tracking logs.
    pub async fn clear_tracking_data(&self) {
        self.shared.state.lock().await.tracking.clear();
        info!("tracking data cleared");
    }

    /// Append new tracking records to the configured directory.
    ///
    /// Does nothing when no tracking directory is configured.
    pub async fn flush_tracking(&self) -> io::Result<()> {
        let Some(dir) = &self.config.tracking_dir else {
            return Ok(());
        };
        self.shared.state.lock().await.tracking.flush_to(dir)
    }

    /// Whether the session has stopped after a socket failure or `close`.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stop both tasks, cancel every timer, flush tracking and release the
    /// socket.
    pub async fn close(mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.shutdown.send_replace(true);
        self.shared.window_open.notify_waiters();
        // Unblocks a task parked on a full delivery queue
        self.deliveries.get_mut().close();

        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "session task did not exit cleanly");
            }
        }

        let mut state = self.shared.state.lock().await;
        match &mut state.endpoint {
            Endpoint::Sender { reliable, .. } => {
                let unacked = reliable.close();
                if unacked > 0 {
                    warn!(unacked, "closing with unacknowledged reliable packets");
                }
            }
            Endpoint::Receiver { reliable, .. } => {
                let dropped = reliable.close();
                if dropped > 0 {
                    debug!(dropped, "discarded buffered out-of-order frames");
                }
            }
        }

        if let Some(dir) = &self.config.tracking_dir {
            if let Err(err) = state.tracking.flush_to(dir) {
                warn!(dir = %dir.display(), error = %err, "failed to flush tracking data");
            }
        }
        drop(state);

        info!(local = %self.local_addr, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.shutdown.send_replace(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Read datagrams until shutdown and dispatch them by channel type.
async fn receive_loop(
    mut socket: HudpSocket,
    shared: Arc<Shared>,
    deliveries: mpsc::Sender<Delivered>,
    mut shutdown: watch::Receiver<bool>,
) {
    let writer = socket.sender();

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let (frame, from) = tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from() => match result {
                Ok((bytes, from)) => match decode(bytes) {
                    Ok(frame) => (frame, from),
                    Err(err) => {
                        warn!(%from, len = bytes.len(), error = %err, "dropping malformed datagram");
                        continue;
                    }
                },
                Err(err) if is_transient(&err) => {
                    debug!(error = %err, "transient receive error");
                    continue;
                }
                Err(err) => {
                    shared.fail(&err);
                    break;
                }
            },
        };

        let (ack, delivered) = dispatch(&shared, frame, from).await;

        if let Some(ack) = ack {
            if let Err(err) = writer.send_to(&ack, from).await {
                if !is_transient(&err) {
                    shared.fail(&err);
                    break;
                }
            }
        }

        if !forward(&deliveries, delivered, &mut shutdown).await {
            break;
        }
    }

    debug!("receive loop stopped");
}

/// Push payloads into the delivery queue, waiting for room unless the
/// session shuts down first.
///
/// Returns `false` once the task should stop.
async fn forward(
    deliveries: &mpsc::Sender<Delivered>,
    delivered: Vec<Delivered>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    for payload in delivered {
        tokio::select! {
            result = deliveries.send(payload) => {
                if result.is_err() {
                    return false;
                }
            }
            _ = shutdown.wait_for(|stop| *stop) => return false,
        }
    }
    true
}

/// Feed one inbound frame to the state machine for its channel.
///
/// Returns an ACK datagram to send back and the payloads released.
async fn dispatch(
    shared: &Shared,
    frame: Frame,
    from: SocketAddr,
) -> (Option<Vec<u8>>, Vec<Delivered>) {
    let now = Instant::now();
    let mut state = shared.state.lock().await;
    let State { endpoint, tracking } = &mut *state;

    match (frame, endpoint) {
        (Frame::Ack(ack), Endpoint::Sender { reliable, .. }) => {
            if let AckOutcome::Acked { rtt, slid, .. } = reliable.on_ack(ack.seq, now) {
                tracking.record_sent(
                    Channel::Reliable,
                    ack.seq,
                    SentEvent::Acknowledged {
                        rtt_ms: rtt.as_millis() as u64,
                    },
                );
                if slid > 0 {
                    shared.window_open.notify_waiters();
                }
            }
            (None, Vec::new())
        }
        (Frame::Data(data), Endpoint::Receiver { reliable, .. }) if data.channel.is_reliable() => {
            let seq = data.seq;
            let outcome = reliable.on_frame(data, now);
            match outcome.disposition {
                Disposition::Duplicate => {
                    tracking.record_received(Channel::Reliable, seq, ReceivedEvent::Duplicate);
                }
                Disposition::Buffered => shared.timer_wake.notify_one(),
                Disposition::InOrder | Disposition::TooFarAhead => {}
            }
            for delivered in &outcome.delivered {
                tracking.record_received(
                    Channel::Reliable,
                    delivered.seq,
                    ReceivedEvent::Delivered {
                        latency_ms: delivered.latency_ms,
                    },
                );
            }
            let ack = outcome.ack.map(|ack| ack.to_bytes().to_vec());
            (ack, outcome.delivered)
        }
        (Frame::Data(data), Endpoint::Receiver { unreliable, .. }) => {
            let delivered = unreliable.on_frame(data);
            tracking.record_received(
                Channel::Unreliable,
                delivered.seq,
                ReceivedEvent::Delivered {
                    latency_ms: delivered.latency_ms,
                },
            );
            (None, vec![delivered])
        }
        (frame, _) => {
            warn!(
                %from,
                channel = ?frame.channel_type(),
                seq = %frame.seq(),
                "frame not handled by this role, dropped"
            );
            (None, Vec::new())
        }
    }
}

/// Fire retransmission and skip deadlines until shutdown.
async fn timer_loop(
    shared: Arc<Shared>,
    socket: DatagramSender,
    deliveries: mpsc::Sender<Delivered>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let deadline = shared.state.lock().await.endpoint.next_deadline();
        let sleep = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at.into()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = shared.timer_wake.notified() => continue,
            _ = sleep => {}
        }

        let (retransmits, delivered) = fire_timers(&shared, Instant::now()).await;

        for (transmit, remote) in retransmits {
            if let Err(err) = socket.send_to(&transmit.datagram, remote).await {
                if !is_transient(&err) {
                    shared.fail(&err);
                    return;
                }
            }
        }

        if !forward(&deliveries, delivered, &mut shutdown).await {
            break;
        }
    }

    debug!("timer task stopped");
}

/// Run every expired timer of the current role.
async fn fire_timers(
    shared: &Shared,
    now: Instant,
) -> (Vec<(Transmit, SocketAddr)>, Vec<Delivered>) {
    let mut state = shared.state.lock().await;
    let State { endpoint, tracking } = &mut *state;

    match endpoint {
        Endpoint::Sender {
            reliable, remote, ..
        } => {
            let mut retransmits = Vec::new();
            let mut abandoned = false;
            for event in reliable.poll_timeouts(now) {
                match event {
                    TimeoutEvent::Retransmit { transmit, attempt } => {
                        tracking.record_sent(
                            Channel::Reliable,
                            transmit.seq,
                            SentEvent::Retransmitted { attempt },
                        );
                        retransmits.push((transmit, *remote));
                    }
                    TimeoutEvent::Abandoned { seq } => {
                        tracking.record_sent(Channel::Reliable, seq, SentEvent::Abandoned);
                        abandoned = true;
                    }
                }
            }
            if abandoned {
                shared.window_open.notify_waiters();
            }
            (retransmits, Vec::new())
        }
        Endpoint::Receiver { reliable, .. } => {
            let skip = reliable.poll_skip(now);
            for seq in &skip.skipped {
                tracking.record_received(Channel::Reliable, *seq, ReceivedEvent::Skipped);
            }
            for delivered in &skip.delivered {
                tracking.record_received(
                    Channel::Reliable,
                    delivered.seq,
                    ReceivedEvent::Delivered {
                        latency_ms: delivered.latency_ms,
                    },
                );
            }
            (Vec::new(), skip.delivered)
        }
    }
}

//! Connection health monitoring with bounded reconnection.
//!
//! # State Machine
//!
//! ```text
//!      keepalive write fails            connect succeeds
//!  Connected ─────────────────► Disconnected ─────────────────► Connected
//!      ▲                             │
//!      │                             │ max attempts failed
//!      │    manual reconnect         ▼
//!      └───────────────────────── Exhausted
//! ```
//!
//! Every transition is reported once on the event channel handed out by
//! [`HealthMonitor::new`]. A successful reconnect is followed by a
//! [`HealthEvent::TransportUpdated`] carrying the new transport handle; anything
//! holding the old handle must switch over.

use crate::config::ConnectPolicy;
use crate::protocol::HEARTBEAT;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub keepalive_interval: Duration,
    /// Fixed wait before every reconnect attempt.
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Writable side of a line-oriented connection.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}

/// Opens new transports to a remote address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, addr: &str) -> io::Result<Self::Transport>;
}

pub type SharedTransport<T> = Arc<Mutex<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// Automatic recovery gave up; only a manual reconnect leaves this state.
    Exhausted,
}

pub enum HealthEvent<T> {
    Disconnected,
    Reconnected { manual: bool },
    Exhausted { attempts: u32 },
    TransportUpdated(SharedTransport<T>),
}

impl<T> core::fmt::Debug for HealthEvent<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HealthEvent::Disconnected => write!(f, "Disconnected"),
            HealthEvent::Reconnected { manual } => write!(f, "Reconnected {{ manual: {} }}", manual),
            HealthEvent::Exhausted { attempts } => write!(f, "Exhausted {{ attempts: {} }}", attempts),
            HealthEvent::TransportUpdated(_) => write!(f, "TransportUpdated"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("already connected to server")]
    AlreadyConnected,
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

struct Shared<C: Connector> {
    connector: C,
    addr: String,
    config: HealthConfig,
    transport: RwLock<SharedTransport<C::Transport>>,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    events: mpsc::UnboundedSender<HealthEvent<C::Transport>>,
}

impl<C: Connector> Shared<C> {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn current(&self) -> SharedTransport<C::Transport> {
        Arc::clone(&self.transport.read())
    }

    fn emit(&self, event: HealthEvent<C::Transport>) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    async fn keepalive(&self) -> io::Result<()> {
        let transport = self.current();
        let mut transport = transport.lock().await;
        transport.write_line(HEARTBEAT).await
    }

    async fn close_stale(&self) {
        close_quietly(&self.current(), &self.addr).await;
    }

    /// Make `transport` current and report the transition.
    ///
    /// Only one path can take the link back to `Connected`. A transport that
    /// arrives after another one was installed is closed and nothing is
    /// reported. Returns whether `transport` was installed.
    async fn install(&self, transport: C::Transport, manual: bool) -> bool {
        let transport = Arc::new(Mutex::new(transport));

        let replaced = {
            let mut current = self.transport.write();
            let claimed = self.state.send_if_modified(|state| {
                if *state == ConnectionState::Connected {
                    false
                } else {
                    *state = ConnectionState::Connected;
                    true
                }
            });
            claimed.then(|| std::mem::replace(&mut *current, Arc::clone(&transport)))
        };

        let Some(replaced) = replaced else {
            debug!(addr = %self.addr, manual, "link already restored, dropping new transport");
            close_quietly(&transport, &self.addr).await;
            return false;
        };

        self.attempts.store(0, Ordering::SeqCst);
        self.emit(HealthEvent::Reconnected { manual });
        self.emit(HealthEvent::TransportUpdated(transport));
        close_quietly(&replaced, &self.addr).await;
        true
    }

    async fn handle_disconnect(&self, stop: &watch::Receiver<bool>) {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if !transitioned {
            return;
        }

        warn!(addr = %self.addr, "server disconnected");
        self.emit(HealthEvent::Disconnected);
        self.recover(stop).await;
    }

    async fn recover(&self, stop: &watch::Receiver<bool>) {
        let max_attempts = self.config.max_reconnect_attempts;

        while self.attempts.load(Ordering::SeqCst) < max_attempts {
            if *stop.borrow() {
                debug!(addr = %self.addr, "monitor stopped, abandoning reconnection");
                return;
            }
            if self.state() == ConnectionState::Connected {
                return;
            }

            let attempt = self.attempts.load(Ordering::SeqCst) + 1;
            info!(addr = %self.addr, "attempting to reconnect (attempt {}/{})", attempt, max_attempts);

            self.close_stale().await;
            time::sleep(self.config.reconnect_delay).await;

            // A manual reconnect may have won the race during the delay.
            if self.state() == ConnectionState::Connected {
                return;
            }

            match self.connector.connect(&self.addr).await {
                Ok(transport) => {
                    if self.install(transport, false).await {
                        info!(addr = %self.addr, attempt, "server reconnected");
                    }
                    return;
                }
                Err(e) => {
                    warn!(addr = %self.addr, attempt, error = %e, "reconnect attempt failed");
                    self.attempts.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let exhausted = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Exhausted;
                true
            } else {
                false
            }
        });
        if exhausted {
            error!(
                addr = %self.addr,
                "failed to reconnect after {} attempts",
                max_attempts
            );
            self.emit(HealthEvent::Exhausted {
                attempts: max_attempts,
            });
        }
    }
}

struct MonitorTask {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Watches one transport: periodic keepalives, failure detection and bounded
/// automatic reconnection.
///
/// The monitor never closes the transport it was given on [`stop`](Self::stop);
/// the caller owns its lifetime.
pub struct HealthMonitor<C: Connector> {
    shared: Arc<Shared<C>>,
    task: Option<MonitorTask>,
}

impl<C: Connector> HealthMonitor<C> {
    pub fn new(
        connector: C,
        addr: impl Into<String>,
        transport: C::Transport,
        config: HealthConfig,
    ) -> (Self, mpsc::UnboundedReceiver<HealthEvent<C::Transport>>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connected);

        let shared = Arc::new(Shared {
            connector,
            addr: addr.into(),
            config,
            transport: RwLock::new(Arc::new(Mutex::new(transport))),
            state,
            attempts: AtomicU32::new(0),
            events,
        });

        (Self { shared, task: None }, events_rx)
    }

    /// Begin the keepalive loop. No effect if already running.
    pub fn start(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.task.is_finished()) {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(monitor(shared, stop_rx));
        self.task = Some(MonitorTask { stop, task });
    }

    /// Halt keepalives and any further reconnect attempts.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.stop.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.task.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn transport(&self) -> SharedTransport<C::Transport> {
        self.shared.current()
    }

    pub fn addr(&self) -> &str {
        &self.shared.addr
    }

    pub fn failed_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Treat an externally observed write failure like a failed keepalive.
    ///
    /// Recovery only runs while the monitor is started; otherwise the state
    /// simply drops to `Disconnected`.
    pub fn report_failure(&self) {
        let stop = match &self.task {
            Some(task) => task.stop.subscribe(),
            None => watch::channel(true).1,
        };
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.handle_disconnect(&stop).await });
    }

    /// Caller-initiated reconnect. Returns `Ok(true)` when a new transport was
    /// installed and `Ok(false)` when the link was already live, either because
    /// the policy ignored the request or because automatic recovery got there
    /// first.
    pub async fn reconnect(&self, policy: ConnectPolicy) -> Result<bool, HealthError> {
        if self.is_connected() {
            return match policy {
                ConnectPolicy::RejectWhenConnected => Err(HealthError::AlreadyConnected),
                ConnectPolicy::IgnoreWhenConnected => Ok(false),
            };
        }

        let transport = self
            .shared
            .connector
            .connect(&self.shared.addr)
            .await
            .map_err(|source| HealthError::Connect {
                addr: self.shared.addr.clone(),
                source,
            })?;

        let installed = self.shared.install(transport, true).await;
        if installed {
            info!(addr = %self.shared.addr, "reconnected on request");
        }
        Ok(installed)
    }
}

impl<C: Connector> Drop for HealthMonitor<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn close_quietly<T: Transport>(transport: &SharedTransport<T>, addr: &str) {
    let result = transport.lock().await.close().await;
    if let Err(e) = result {
        debug!(addr, error = %e, "closing transport");
    }
}

async fn monitor<C: Connector>(shared: Arc<Shared<C>>, mut stop: watch::Receiver<bool>) {
    let period = shared.config.keepalive_interval.max(MIN_KEEPALIVE_INTERVAL);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if shared.state() != ConnectionState::Connected {
                    continue;
                }
                if let Err(e) = shared.keepalive().await {
                    warn!(addr = %shared.addr, error = %e, "keepalive failed");
                    shared.handle_disconnect(&stop).await;
                }
            }
        }
    }
    debug!(addr = %shared.addr, "health monitor stopped");
}

/// TCP transport. The read half can be taken once by whoever consumes
/// responses; writes go through the write half.
#[derive(Debug)]
pub struct TcpTransport {
    peer: SocketAddr,
    reader: Option<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            peer,
            reader: Some(reader),
            writer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn take_reader(&mut self) -> Option<OwnedReadHalf> {
        self.reader.take()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        self.writer.write_all(framed.as_bytes()).await?;
        self.writer.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, addr: &str) -> io::Result<TcpTransport> {
        TcpTransport::new(TcpStream::connect(addr).await?)
    }
}

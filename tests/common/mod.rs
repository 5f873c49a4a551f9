#![allow(dead_code)]

use async_trait::async_trait;
use shipsim::health::{Connector, HealthConfig, Transport};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// In-memory stand-in for the remote end. Links can be cut and the listener
/// switched off to drive the health monitor deterministically.
#[derive(Default)]
pub struct Network {
    refusing: AtomicBool,
    connects: AtomicUsize,
    lines: Mutex<Vec<String>>,
    links: Mutex<Vec<Arc<AtomicBool>>>,
    connect_delay: Mutex<Duration>,
    connect_times: Mutex<Vec<Instant>>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.refusing.store(!accepting, Ordering::SeqCst);
    }

    /// Break every link opened so far.
    pub fn cut(&self) {
        for link in self.links.lock().unwrap().iter() {
            link.store(false, Ordering::SeqCst);
        }
    }

    /// Every connect takes this long before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// When each connect attempt started, on the tokio clock.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.lines.lock().unwrap().iter().filter(|l| *l == line).count()
    }
}

#[derive(Clone)]
pub struct MockConnector(pub Arc<Network>);

pub struct MockTransport {
    up: Arc<AtomicBool>,
    net: Arc<Network>,
}

impl MockTransport {
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, _addr: &str) -> io::Result<MockTransport> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        self.0.connect_times.lock().unwrap().push(Instant::now());

        let delay = *self.0.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.0.refusing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }

        let up = Arc::new(AtomicBool::new(true));
        self.0.links.lock().unwrap().push(Arc::clone(&up));
        Ok(MockTransport {
            up,
            net: Arc::clone(&self.0),
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        if !self.is_up() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        self.net.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn fast_health() -> HealthConfig {
    HealthConfig {
        keepalive_interval: Duration::from_millis(10),
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_attempts: 3,
    }
}

//! Scripted in-memory transport for exercising sessions without a radio.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::{future, StreamExt};
use tokio::time::sleep;
use uuid::Uuid;

use crate::device::transport::{Link, LinkEvent, LinkEvents, Transport};
use crate::error::DeviceError;

/// How an advertising fake peripheral behaves once found.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub connect_delay: Duration,
    pub connect_fails: bool,
    pub subscribe_fails: bool,
    pub subscribe_hangs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeAddress(String);

impl fmt::Display for FakeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fake:{}", self.0)
    }
}

struct LinkHandle {
    sender: UnboundedSender<LinkEvent>,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    advertised: HashMap<String, Script>,
    scans: HashMap<String, u64>,
    connects: HashMap<String, u64>,
    ops: HashMap<String, Vec<&'static str>>,
    links: HashMap<String, LinkHandle>,
    hang_scans: bool,
    fail_scans: bool,
    hang_close: bool,
    closed: u64,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn advertise(&self, name: &str, script: Script) {
        self.lock().advertised.insert(name.to_string(), script);
    }

    pub fn stop_advertising(&self, name: &str) {
        self.lock().advertised.remove(name);
    }

    pub fn hang_scans(&self, hang: bool) {
        self.lock().hang_scans = hang;
    }

    pub fn fail_scans(&self, fail: bool) {
        self.lock().fail_scans = fail;
    }

    pub fn hang_close(&self, hang: bool) {
        self.lock().hang_close = hang;
    }

    pub fn close_count(&self) -> u64 {
        self.lock().closed
    }

    pub fn scan_count(&self, name: &str) -> u64 {
        self.lock().scans.get(name).copied().unwrap_or(0)
    }

    pub fn connect_count(&self, name: &str) -> u64 {
        self.lock().connects.get(name).copied().unwrap_or(0)
    }

    /// Teardown calls made on links to `name`, in order.
    pub fn ops(&self, name: &str) -> Vec<&'static str> {
        self.lock().ops.get(name).cloned().unwrap_or_default()
    }

    /// Pushes a notification to the current link of `name`. Returns false if there is none.
    pub fn notify(&self, name: &str, bytes: &[u8]) -> bool {
        match self.lock().links.get(name) {
            Some(link) => link.sender.unbounded_send(LinkEvent::Notification(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Simulates the peripheral going away.
    pub fn drop_link(&self, name: &str) {
        if let Some(link) = self.lock().links.remove(name) {
            link.connected.store(false, Ordering::SeqCst);
            let _ = link.sender.unbounded_send(LinkEvent::Disconnected);
        }
    }

    /// The link reports itself as disconnected, but no event is delivered and the
    /// notification stream stays open.
    pub fn drop_link_silently(&self, name: &str) {
        if let Some(link) = self.lock().links.get(name) {
            link.connected.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Address = FakeAddress;
    type Link = FakeLink;

    async fn find(&self, name: &str, window: Duration) -> Result<Option<FakeAddress>, DeviceError> {
        let (hang, fail, found) = {
            let mut inner = self.lock();
            *inner.scans.entry(name.to_string()).or_default() += 1;
            (inner.hang_scans, inner.fail_scans, inner.advertised.contains_key(name))
        };

        if fail {
            return Err(DeviceError::Other(String::from("adapter unavailable")));
        }
        if hang {
            return future::pending().await;
        }
        if found {
            return Ok(Some(FakeAddress(name.to_string())));
        }

        sleep(window).await;
        Ok(None)
    }

    async fn connect(&self, address: &FakeAddress) -> Result<FakeLink, DeviceError> {
        let name = address.0.clone();
        let script = {
            let mut inner = self.lock();
            *inner.connects.entry(name.clone()).or_default() += 1;
            inner.advertised.get(&name).cloned()
        };
        let script = script.ok_or_else(|| DeviceError::Other(String::from("peripheral is gone")))?;

        sleep(script.connect_delay).await;
        if script.connect_fails {
            return Err(DeviceError::Other(String::from("connection refused")));
        }

        let (sender, receiver) = unbounded();
        let connected = Arc::new(AtomicBool::new(true));
        self.lock().links.insert(name.clone(), LinkHandle { sender, connected: connected.clone() });

        Ok(FakeLink {
            name,
            subscribe_fails: script.subscribe_fails,
            subscribe_hangs: script.subscribe_hangs,
            receiver: Mutex::new(Some(receiver)),
            connected,
            transport: self.clone(),
        })
    }

    async fn close(&self) {
        let hang = {
            let mut inner = self.lock();
            inner.closed += 1;
            inner.hang_close
        };

        if hang {
            future::pending::<()>().await;
        }
    }
}

pub struct FakeLink {
    name: String,
    subscribe_fails: bool,
    subscribe_hangs: bool,
    receiver: Mutex<Option<UnboundedReceiver<LinkEvent>>>,
    connected: Arc<AtomicBool>,
    transport: FakeTransport,
}

impl FakeLink {
    fn record(&self, op: &'static str) {
        self.transport.lock().ops.entry(self.name.clone()).or_default().push(op);
    }
}

#[async_trait]
impl Link for FakeLink {
    async fn subscribe(&self, _service: Uuid, _characteristic: Uuid) -> Result<LinkEvents, DeviceError> {
        if self.subscribe_fails {
            return Err(DeviceError::MissingCharacteristic);
        }
        if self.subscribe_hangs {
            return future::pending().await;
        }

        let receiver = self.receiver.lock().unwrap().take();
        match receiver {
            Some(receiver) => Ok(receiver.boxed()),
            None => Err(DeviceError::Other(String::from("already subscribed"))),
        }
    }

    async fn unsubscribe(&self, _service: Uuid, _characteristic: Uuid) -> Result<(), DeviceError> {
        self.record("unsubscribe");
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.record("disconnect");
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::TimingConfig;
use crate::device::codec::Decoder;
use crate::device::constants::IS_CONNECTED_DEADLINE;
use crate::device::scanner::Scanner;
use crate::device::store::SlotWriter;
use crate::device::transport::{Link, LinkEvent, LinkEvents, Transport};
use crate::device::types::{DeviceEvent, SessionPhase};
use crate::error::{ScanError, SessionError};

/// What to subscribe to on one peripheral, and how to read its frames.
#[derive(Debug, Clone)]
pub struct Subscription<D: Decoder> {
    pub name: String,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub decoder: D,
}

/// The link a session currently holds, reachable from outside the session task so that it can
/// still be disconnected if the session dies.
pub struct HeldLink<L> {
    slot: Arc<Mutex<Option<Arc<L>>>>,
}

impl<L> Clone for HeldLink<L> {
    fn clone(&self) -> Self {
        HeldLink { slot: self.slot.clone() }
    }
}

impl<L: Link> HeldLink<L> {
    fn new() -> Self {
        HeldLink { slot: Arc::new(Mutex::new(None)) }
    }

    fn hold(&self, link: &Arc<L>) {
        *self.lock() = Some(link.clone());
    }

    /// Removes the link, leaving nothing for anyone else to release.
    pub fn take(&self) -> Option<Arc<L>> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<L>>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

enum ConnectionState<T: Transport> {
    Scanning {
        retry: bool,
    },
    Connecting {
        address: T::Address,
    },
    Subscribing {
        link: Arc<T::Link>,
    },
    Subscribed {
        link: Arc<T::Link>,
        events: LinkEvents,
    },
    Cooldown {
        // a link that failed or went away, disconnected before waiting
        stale: Option<Arc<T::Link>>,
    },
    Stopping {
        link: Option<Arc<T::Link>>,
        subscribed: bool,
    },
}

impl<T: Transport> ConnectionState<T> {
    fn phase(&self) -> SessionPhase {
        match self {
            ConnectionState::Scanning { .. } => SessionPhase::Scanning,
            ConnectionState::Connecting { .. } => SessionPhase::Connecting,
            ConnectionState::Subscribing { .. } => SessionPhase::Subscribing,
            ConnectionState::Subscribed { .. } => SessionPhase::Subscribed,
            ConnectionState::Cooldown { .. } => SessionPhase::Cooldown,
            ConnectionState::Stopping { .. } => SessionPhase::Stopping,
        }
    }
}

/// Discovery, connection, subscription and retry for one peripheral.
///
/// The session only ends when `cancel` fires. Every other failure is turned into a
/// transition plus a delay before the next attempt.
pub struct Session<T: Transport, D: Decoder> {
    subscription: Subscription<D>,
    transport: Arc<T>,
    scanner: Scanner<T>,
    writer: SlotWriter,
    timing: TimingConfig,
    cancel: CancellationToken,
    observers: Vec<UnboundedSender<DeviceEvent>>,
    address: Option<T::Address>,
    held: HeldLink<T::Link>,
}

impl<T: Transport, D: Decoder> Session<T, D> {
    pub fn new(
        subscription: Subscription<D>,
        transport: Arc<T>,
        writer: SlotWriter,
        timing: TimingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Session {
            subscription,
            scanner: Scanner::new(transport.clone()),
            transport,
            writer,
            timing,
            cancel,
            observers: Vec::new(),
            address: None,
            held: HeldLink::new(),
        }
    }

    pub fn with_observers(mut self, observers: Vec<UnboundedSender<DeviceEvent>>) -> Self {
        self.observers = observers;
        self
    }

    pub fn held_link(&self) -> HeldLink<T::Link> {
        self.held.clone()
    }

    pub async fn run(mut self) {
        let mut state = ConnectionState::Scanning { retry: false };
        self.enter(SessionPhase::Scanning);

        loop {
            state = self.advance(state).await;
            self.enter(state.phase());

            if let ConnectionState::Stopping { link, subscribed } = state {
                self.teardown(link, subscribed).await;
                break;
            }
        }

        info!("{}: session stopped", self.subscription.name);
    }

    fn enter(&mut self, phase: SessionPhase) {
        let previous = self.writer.enter_phase(phase);
        if previous == phase {
            return;
        }

        info!("{}: {} -> {}", self.subscription.name, previous, phase);
        self.emit(DeviceEvent::StateChange { peripheral: self.writer.id(), from: previous, to: phase });
    }

    fn emit(&mut self, event: DeviceEvent) {
        // observers that went away are dropped, the session never waits on them
        self.observers.retain(|observer| observer.unbounded_send(event.clone()).is_ok());
    }

    fn fail(&self, err: SessionError) {
        warn!("{}: {}", self.subscription.name, err);
        self.writer.record_error(&err.to_string());
    }

    async fn advance(&mut self, state: ConnectionState<T>) -> ConnectionState<T> {
        match state {
            ConnectionState::Scanning { retry } => self.scan(retry).await,
            ConnectionState::Connecting { address } => self.connect(address).await,
            ConnectionState::Subscribing { link } => self.subscribe(link).await,
            ConnectionState::Subscribed { link, events } => self.monitor(link, events).await,
            ConnectionState::Cooldown { stale } => self.cool_down(stale).await,
            stopping @ ConnectionState::Stopping { .. } => stopping,
        }
    }

    /// Sleeps for `duration` unless stopped first. Returns false if stopped.
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }

    async fn scan(&mut self, retry: bool) -> ConnectionState<T> {
        if retry && !self.wait(self.timing.scan_retry_delay()).await {
            return ConnectionState::Stopping { link: None, subscribed: false };
        }

        let name = self.subscription.name.clone();
        debug!("Scanning for {}...", name);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = self.scanner.find(&name, self.timing.scan_timeout()) => Some(result),
        };

        match result {
            None => ConnectionState::Stopping { link: None, subscribed: false },
            Some(Ok(address)) => {
                info!("{}: found at {}", name, address);
                self.address = Some(address.clone());
                ConnectionState::Connecting { address }
            },
            Some(Err(ScanError::NotFound)) => {
                debug!("{} not found, retrying scan in {:?}", name, self.timing.scan_retry_delay());
                ConnectionState::Scanning { retry: true }
            },
            Some(Err(ScanError::Timeout)) => {
                self.fail(SessionError::ScanTimeout);
                ConnectionState::Scanning { retry: true }
            },
            Some(Err(ScanError::Transport { source })) => {
                if source.is_permission_denied() {
                    warn!("{}: bluetooth permission denied", name);
                }
                self.fail(SessionError::ScanTransport { source });
                ConnectionState::Scanning { retry: true }
            },
        }
    }

    async fn connect(&mut self, address: T::Address) -> ConnectionState<T> {
        self.writer.record_connect_attempt();
        info!("{}: connecting to {}...", self.subscription.name, address);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = timeout(self.timing.connect_timeout(), self.transport.connect(&address)) => Some(result),
        };

        match result {
            None => ConnectionState::Stopping { link: None, subscribed: false },
            Some(Ok(Ok(link))) => {
                let link = Arc::new(link);
                self.held.hold(&link);
                ConnectionState::Subscribing { link }
            },
            Some(Ok(Err(source))) => {
                self.fail(SessionError::Connect { source });
                self.address = None;
                ConnectionState::Cooldown { stale: None }
            },
            Some(Err(_)) => {
                self.fail(SessionError::ConnectTimeout);
                self.address = None;
                ConnectionState::Cooldown { stale: None }
            },
        }
    }

    async fn subscribe(&mut self, link: Arc<T::Link>) -> ConnectionState<T> {
        let service = self.subscription.service;
        let characteristic = self.subscription.characteristic;

        let result = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = timeout(self.timing.subscribe_timeout(), link.subscribe(service, characteristic)) => Some(result),
        };

        let reason = match result {
            None => return ConnectionState::Stopping { link: Some(link), subscribed: false },
            Some(Ok(Ok(events))) => {
                info!("{}: notifications started, monitoring", self.subscription.name);
                return ConnectionState::Subscribed { link, events };
            },
            Some(Ok(Err(err))) => err.to_string(),
            Some(Err(_)) => String::from("timed out"),
        };

        self.fail(SessionError::Subscribe { reason });
        self.address = None;
        ConnectionState::Cooldown { stale: Some(link) }
    }

    async fn monitor(&mut self, link: Arc<T::Link>, mut events: LinkEvents) -> ConnectionState<T> {
        let check_every = self.timing.link_check_interval();
        let mut link_check = interval_at(Instant::now() + check_every, check_every);
        link_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        enum Wakeup {
            Stop,
            Event(Option<LinkEvent>),
            Check,
        }

        loop {
            let wakeup = tokio::select! {
                _ = self.cancel.cancelled() => Wakeup::Stop,
                event = events.next() => Wakeup::Event(event),
                _ = link_check.tick() => Wakeup::Check,
            };

            match wakeup {
                Wakeup::Stop => return ConnectionState::Stopping { link: Some(link), subscribed: true },
                Wakeup::Event(Some(LinkEvent::Notification(bytes))) => self.handle_frame(&bytes),
                Wakeup::Event(Some(LinkEvent::Disconnected)) | Wakeup::Event(None) => break,
                Wakeup::Check => {
                    let alive = tokio::select! {
                        _ = self.cancel.cancelled() => None,
                        result = timeout(Duration::from_millis(IS_CONNECTED_DEADLINE), link.is_connected()) => Some(result),
                    };

                    match alive {
                        None => return ConnectionState::Stopping { link: Some(link), subscribed: true },
                        Some(Ok(Ok(true))) => {},
                        Some(Ok(Ok(false))) => break,
                        Some(Ok(Err(err))) => {
                            warn!("{}: error checking for connection state: {:?}", self.subscription.name, err);
                            break;
                        },
                        Some(Err(_)) => {
                            warn!("{}: checking for connection status took too long", self.subscription.name);
                            break;
                        },
                    }
                },
            }
        }

        if let Some(address) = self.address.take() {
            info!("{}: lost connection to {}", self.subscription.name, address);
        }
        self.fail(SessionError::UnexpectedDisconnect { phase: SessionPhase::Subscribed });
        ConnectionState::Cooldown { stale: Some(link) }
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        match self.subscription.decoder.decode(bytes) {
            Ok(fields) => {
                debug!("{}: {:?}", self.subscription.name, fields);
                self.writer.set(&fields);
            },
            Err(source) => {
                let err = SessionError::Decode { source };
                warn!("{}: {}, payload {}; state not updated", self.subscription.name, err, hex(bytes));
                self.writer.record_dropped_frame(&err.to_string());
                self.emit(DeviceEvent::FrameDropped { peripheral: self.writer.id(), len: bytes.len() });
            },
        }
    }

    async fn cool_down(&mut self, stale: Option<Arc<T::Link>>) -> ConnectionState<T> {
        if let Some(link) = stale {
            self.release(&link).await;
        }

        debug!("{}: rescanning in {:?}", self.subscription.name, self.timing.cooldown_delay());
        if self.wait(self.timing.cooldown_delay()).await {
            ConnectionState::Scanning { retry: false }
        } else {
            ConnectionState::Stopping { link: None, subscribed: false }
        }
    }

    /// Best-effort disconnect, bounded by the teardown timeout.
    async fn release(&self, link: &T::Link) {
        let name = &self.subscription.name;
        self.held.take();

        match timeout(self.timing.teardown_timeout(), link.disconnect()).await {
            Ok(Ok(())) => debug!("{}: disconnected", name),
            Ok(Err(err)) => warn!("{}: error disconnecting: {}", name, err),
            Err(_) => warn!("{}: disconnecting took too long", name),
        }
    }

    async fn teardown(&mut self, link: Option<Arc<T::Link>>, subscribed: bool) {
        let name = self.subscription.name.clone();
        info!("{}: {}, tearing down", name, SessionError::StopRequested);
        self.address = None;

        let Some(link) = link else {
            return;
        };

        if subscribed {
            let unsubscribe = link.unsubscribe(self.subscription.service, self.subscription.characteristic);
            match timeout(self.timing.teardown_timeout(), unsubscribe).await {
                Ok(Ok(())) => debug!("{}: notifications stopped", name),
                Ok(Err(err)) => warn!("{}: error stopping notifications: {}", name, err),
                Err(_) => warn!("{}: stopping notifications took too long", name),
            }
        }

        self.release(&link).await;
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

use std::future::Future;
use std::sync::Arc;
use futures::channel::mpsc::UnboundedSender;
use futures::future::join_all;
use log::{error, info, warn};
use tokio::spawn;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::types::TimingConfig;
use crate::device::codec::Decoder;
use crate::device::session::{Session, Subscription};
use crate::device::store::StateStore;
use crate::device::transport::{Link, Transport};
use crate::device::types::{DeviceEvent, PeripheralId, SessionPhase};
use crate::error::{readable_thread_panic_error, DeviceError};

/// Runs one session per configured peripheral on the current runtime.
///
/// Sessions share the transport and the store, nothing else. A session that panics is
/// logged, marked disconnected and restarted after the cooldown delay; the others keep
/// running.
pub struct Supervisor<D: Decoder + Clone> {
    subscriptions: Vec<Subscription<D>>,
    timing: TimingConfig,
    store: StateStore,
    cancel: CancellationToken,
    observers: Vec<UnboundedSender<DeviceEvent>>,
}

impl<D: Decoder + Clone> Supervisor<D> {
    pub fn new(subscriptions: Vec<Subscription<D>>, timing: TimingConfig, store: StateStore, cancel: CancellationToken) -> Self {
        Supervisor { subscriptions, timing, store, cancel, observers: Vec::new() }
    }

    pub fn with_observers(mut self, observers: Vec<UnboundedSender<DeviceEvent>>) -> Self {
        self.observers = observers;
        self
    }

    /// True if any session is currently subscribed.
    pub fn any_connected(&self) -> bool {
        self.store.any_connected()
    }

    /// Opens the transport (retrying until it works or the supervisor is stopped), then
    /// runs all sessions until `cancel` fires.
    pub async fn run<T, F, Fut>(self, connector: F)
    where
        T: Transport,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DeviceError>>,
    {
        let transport = loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = connector() => result,
            };

            match result {
                Ok(transport) => break Arc::new(transport),
                Err(err) => {
                    warn!("Failed to open bluetooth transport: {}", err);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = sleep(self.timing.scan_retry_delay()) => {},
                    }
                },
            }
        };

        let teardown_timeout = self.timing.teardown_timeout();
        self.run_with(transport.clone()).await;

        if timeout(teardown_timeout, transport.close()).await.is_err() {
            warn!("Closing the bluetooth transport took too long");
        }
    }

    pub async fn run_with<T: Transport>(self, transport: Arc<T>) {
        info!("Starting {} session(s)", self.subscriptions.len());

        let handles: Vec<_> = self.subscriptions
            .iter()
            .enumerate()
            .map(|(index, subscription)| spawn(supervise(
                PeripheralId(index),
                subscription.clone(),
                transport.clone(),
                self.store.clone(),
                self.timing.clone(),
                self.cancel.clone(),
                self.observers.clone(),
            )))
            .collect();

        for result in join_all(handles).await {
            if let Err(err) = result {
                error!("Failed to join session supervisor task: {}", err);
            }
        }

        info!("All sessions stopped");
    }
}

async fn supervise<T: Transport, D: Decoder + Clone>(
    id: PeripheralId,
    subscription: Subscription<D>,
    transport: Arc<T>,
    store: StateStore,
    timing: TimingConfig,
    cancel: CancellationToken,
    observers: Vec<UnboundedSender<DeviceEvent>>,
) {
    loop {
        let session = Session::new(subscription.clone(), transport.clone(), store.writer(id), timing.clone(), cancel.clone())
            .with_observers(observers.clone());
        let held = session.held_link();

        match spawn(session.run()).await {
            Ok(()) => return,
            Err(err) => {
                let writer = store.writer(id);
                writer.enter_phase(SessionPhase::Cooldown);

                if err.is_panic() {
                    let message = readable_thread_panic_error(&err.into_panic());
                    error!("{}: session crashed: {}", subscription.name, message);
                    writer.record_error(&message);
                } else {
                    error!("{}: session task was cancelled: {}", subscription.name, err);
                }
            },
        }

        // the session died holding a link; the peripheral stops advertising while connected
        if let Some(link) = held.take() {
            match timeout(timing.teardown_timeout(), link.disconnect()).await {
                Ok(Ok(())) => info!("{}: released the link of the crashed session", subscription.name),
                Ok(Err(err)) => warn!("{}: error disconnecting after crash: {}", subscription.name, err),
                Err(_) => warn!("{}: disconnecting after crash took too long", subscription.name),
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                store.writer(id).enter_phase(SessionPhase::Stopping);
                return;
            },
            _ = sleep(timing.cooldown_delay()) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use uuid::Uuid;

    use crate::device::codec::FrameCodec;
    use crate::device::fake::{FakeTransport, Script};
    use crate::device::types::{Field, Fields};
    use crate::error::DecodeError;

    /// Joystick codec that panics on a `dead` frame.
    #[derive(Clone)]
    struct Fragile(FrameCodec);

    impl Decoder for Fragile {
        fn decode(&self, bytes: &[u8]) -> Result<Fields, DecodeError> {
            if bytes == [0xde, 0xad] {
                panic!("decoder bug");
            }
            self.0.decode(bytes)
        }

        fn fields(&self) -> &[Field] {
            self.0.fields()
        }
    }

    fn subscription(name: &str, codec: FrameCodec) -> Subscription<Fragile> {
        Subscription { name: name.to_string(), service: Uuid::nil(), characteristic: Uuid::nil(), decoder: Fragile(codec) }
    }

    fn pair() -> Vec<Subscription<Fragile>> {
        vec![
            subscription("PicoYButton", FrameCodec::y_button()),
            subscription("PicoXAxisOnly", FrameCodec::x_axis()),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn disconnecting_one_peripheral_leaves_the_other_untouched() {
        let transport = FakeTransport::new();
        transport.advertise("PicoYButton", Script::default());
        transport.advertise("PicoXAxisOnly", Script::default());
        let store = StateStore::new(2);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(pair(), TimingConfig::default(), store.clone(), cancel.clone());
        assert!(!supervisor.any_connected());
        let handle = spawn(supervisor.run_with(Arc::new(transport.clone())));

        sleep(Duration::from_millis(10)).await;
        transport.notify("PicoYButton", &[0x10, 0x00, 0x00]);
        transport.notify("PicoXAxisOnly", &[0x20, 0x00]);
        sleep(Duration::from_millis(10)).await;
        let y_before = store.get(PeripheralId(0));
        assert!(y_before.connected);

        transport.drop_link("PicoXAxisOnly");
        sleep(Duration::from_millis(10)).await;

        assert!(!store.get(PeripheralId(1)).connected);
        assert_eq!(store.get(PeripheralId(1)).telemetry.axis_x, 0x20);
        assert_eq!(store.get(PeripheralId(0)), y_before);
        assert!(store.any_connected());

        cancel.cancel();
        timeout(Duration::from_millis(100), handle).await.unwrap().unwrap();
        assert!(!store.any_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_session_is_restarted_without_disturbing_the_other() {
        let transport = FakeTransport::new();
        transport.advertise("PicoYButton", Script::default());
        transport.advertise("PicoXAxisOnly", Script::default());
        let store = StateStore::new(2);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(pair(), TimingConfig::default(), store.clone(), cancel.clone());
        let handle = spawn(supervisor.run_with(Arc::new(transport.clone())));

        sleep(Duration::from_millis(10)).await;
        transport.notify("PicoYButton", &[0x10, 0x00, 0x00]);
        transport.notify("PicoXAxisOnly", &[0xde, 0xad]);
        sleep(Duration::from_millis(10)).await;

        assert!(!store.get(PeripheralId(1)).connected);
        assert!(store.status(PeripheralId(1)).unwrap().last_error.unwrap().contains("decoder bug"));
        assert_eq!(transport.ops("PicoXAxisOnly"), vec!["disconnect"]);
        assert!(transport.ops("PicoYButton").is_empty());
        assert!(store.get(PeripheralId(0)).connected);
        assert_eq!(store.get(PeripheralId(0)).telemetry.axis_y, 0x10);

        sleep(Duration::from_secs(6)).await;
        assert!(store.get(PeripheralId(1)).connected);
        assert_eq!(transport.connect_count("PicoXAxisOnly"), 2);
        assert_eq!(transport.ops("PicoXAxisOnly"), vec!["disconnect"]);

        cancel.cancel();
        timeout(Duration::from_millis(100), handle).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_is_opened_with_retry() {
        let store = StateStore::new(2);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(pair(), TimingConfig::default(), store.clone(), cancel.clone());
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fake = FakeTransport::new();
        fake.advertise("PicoXAxisOnly", Script::default());

        let counter = attempts.clone();
        let handle = spawn(supervisor.run(move || {
            let fake = fake.clone();
            let attempt = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if attempt < 2 { Err(DeviceError::NoAdapters) } else { Ok(fake) }
            }
        }));

        sleep(Duration::from_millis(3_900)).await;
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(!store.any_connected());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(store.get(PeripheralId(1)).connected);
        assert!(!store.get(PeripheralId(0)).connected);

        cancel.cancel();
        timeout(Duration::from_millis(100), handle).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_transport_close_does_not_hold_up_stop() {
        let store = StateStore::new(2);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(pair(), TimingConfig::default(), store.clone(), cancel.clone());
        let fake = FakeTransport::new();
        fake.hang_close(true);

        let transport = fake.clone();
        let handle = spawn(supervisor.run(move || {
            let transport = transport.clone();
            async move { Ok::<_, DeviceError>(transport) }
        }));

        sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        // one teardown timeout for close, nothing else is held
        timeout(Duration::from_millis(600), handle).await.unwrap().unwrap();
        assert_eq!(fake.close_count(), 1);
    }
}

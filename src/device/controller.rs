use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::types::{Config, TimingConfig};
use crate::device::btle::BtleplugTransport;
use crate::device::codec::{Decoder, FrameCodec};
use crate::device::session::Subscription;
use crate::device::store::StateStore;
use crate::device::supervisor::Supervisor;
use crate::device::transport::Transport;
use crate::device::types::{
    ControllerState, DeviceEvent, PeripheralId, PeripheralState, SessionStatus, Snapshot, Telemetry, Field,
};
use crate::error::{readable_thread_panic_error, ControllerError, DeviceError};

type Connector<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, DeviceError>> + Send + Sync>;

struct Running {
    cancel: CancellationToken,
    done: Receiver<()>,
    thread: JoinHandle<()>,
}

/// The only surface the game loop touches.
///
/// `start` moves all bluetooth work onto a background thread; everything else returns
/// immediately with whatever the sessions last stored.
pub struct Controller<T: Transport> {
    subscriptions: Vec<Subscription<FrameCodec>>,
    timing: TimingConfig,
    connector: Connector<T>,
    store: StateStore,
    observers: Vec<UnboundedSender<DeviceEvent>>,
    running: Option<Running>,
}

impl Controller<BtleplugTransport> {
    /// A controller talking to the platform bluetooth stack.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        Controller::with_connector(config, || BtleplugTransport::new().boxed())
    }
}

impl<T: Transport + Clone> Controller<T> {
    /// A controller using an already constructed transport.
    pub fn with_transport(config: Config, transport: T) -> Result<Self, ControllerError> {
        Controller::with_connector(config, move || {
            let transport = transport.clone();
            async move { Ok(transport) }.boxed()
        })
    }
}

impl<T: Transport> Controller<T> {
    /// A controller that opens its transport through `connector` every time it is started.
    pub fn with_connector<F>(config: Config, connector: F) -> Result<Self, ControllerError>
    where
        F: Fn() -> BoxFuture<'static, Result<T, DeviceError>> + Send + Sync + 'static,
    {
        let subscriptions = config.subscriptions()?;
        let store = StateStore::new(subscriptions.len());

        Ok(Controller {
            subscriptions,
            timing: config.timing,
            connector: Arc::new(connector),
            store,
            observers: Vec::new(),
            running: None,
        })
    }

    /// Receives state changes and dropped frames of every session started after this call.
    pub fn subscribe_events(&mut self) -> UnboundedReceiver<DeviceEvent> {
        let (sender, receiver) = unbounded();
        self.observers.push(sender);
        receiver
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().map_or(false, |running| !running.thread.is_finished())
    }

    pub fn start(&mut self) -> Result<(), ControllerError> {
        if self.is_running() {
            info!("Bluetooth controller is already running");
            return Ok(());
        }
        // a previous run that ended on its own or was detached
        self.running = None;

        // all state is rebuilt from scratch on every start
        self.store = StateStore::new(self.subscriptions.len());
        self.observers.retain(|observer| !observer.is_closed());

        let cancel = CancellationToken::new();
        let (done_sender, done) = channel();
        let supervisor = Supervisor::new(self.subscriptions.clone(), self.timing.clone(), self.store.clone(), cancel.clone())
            .with_observers(self.observers.clone());
        let connector = self.connector.clone();

        let thread = thread::Builder::new()
            .name(String::from("ble-joystick"))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!("Failed to build the bluetooth runtime: {}", err);
                        return;
                    },
                };

                runtime.block_on(supervisor.run(move || connector()));
                let _ = done_sender.send(());
            })?;

        self.running = Some(Running { cancel, done, thread });
        info!("Bluetooth controller started in background thread");
        Ok(())
    }

    /// Signals every session to tear down and waits at most the configured join timeout.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            info!("Bluetooth controller was not running");
            return;
        };

        info!("Stopping bluetooth controller...");
        running.cancel.cancel();

        match running.done.recv_timeout(self.timing.join_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match running.thread.join() {
                Ok(()) => info!("Bluetooth controller stopped"),
                Err(err) => error!("Bluetooth thread failed: {}", readable_thread_panic_error(&err)),
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!("Bluetooth thread did not stop within {:?}, leaving it to finish on its own", self.timing.join_timeout());
            },
        }
    }

    /// Latest values of all peripherals merged into one view. Never blocks on I/O.
    pub fn get_state(&self) -> ControllerState {
        let snapshots = self.store.snapshots();
        let mut merged = Telemetry::default();
        let mut peripherals = Vec::with_capacity(self.subscriptions.len());

        for (subscription, snapshot) in self.subscriptions.iter().zip(snapshots) {
            for field in subscription.decoder.fields() {
                match field {
                    Field::AxisX => merged.axis_x = snapshot.telemetry.axis_x,
                    Field::AxisY => merged.axis_y = snapshot.telemetry.axis_y,
                    Field::Button => merged.button = snapshot.telemetry.button,
                }
            }

            peripherals.push(PeripheralState { name: subscription.name.clone(), connected: snapshot.connected });
        }

        ControllerState {
            axis_x: merged.axis_x,
            axis_y: merged.axis_y,
            button: merged.button,
            button_pressed: merged.button_pressed(),
            peripherals,
        }
    }

    /// True if at least one peripheral is subscribed.
    pub fn is_connected(&self) -> bool {
        self.store.any_connected()
    }

    pub fn snapshot(&self, id: PeripheralId) -> Snapshot {
        self.store.get(id)
    }

    pub fn status(&self, id: PeripheralId) -> Option<SessionStatus> {
        self.store.status(id)
    }
}

impl<T: Transport> Drop for Controller<T> {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.stop();
        }
    }
}

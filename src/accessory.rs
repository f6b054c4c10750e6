//! Per-device accessory controller.
//!
//! Binds characteristic reads and writes to a [`StateMapper`], feeds session
//! telemetry into it and keeps the session connected through a
//! [`ReconnectSupervisor`]. Writes are queued for a background writer task so a
//! setter never waits on the device.

use crate::characteristic::{
    Characteristic, CharacteristicProps, CharacteristicUpdate, CharacteristicValue, ServiceKind,
};
use crate::config::DeviceDescriptor;
use crate::dps::{CommandFrame, TelemetryFrame};
use crate::error::{BridgeError, Result};
use crate::mapper::{StateEvent, StateMapper};
use crate::session::DeviceSession;
use crate::state::FanState;
use crate::supervisor::{ConnectionEvent, ConnectionState, RETRY_DELAY, ReconnectSupervisor};
use futures_core::stream::Stream;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CHANNEL_SIZE: usize = 64;

/// Which characteristic surface an accessory exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessoryKind {
    /// Every fan characteristic, plus the light when present.
    Full,
    /// Quick-access duplicate: power, plus the light switch when present.
    Toggle,
}

impl AccessoryKind {
    /// Characteristics exposed for a device, in registration order.
    pub fn characteristics(self, has_light: bool) -> Vec<Characteristic> {
        let mut out = match self {
            AccessoryKind::Full => Characteristic::FAN.to_vec(),
            AccessoryKind::Toggle => vec![Characteristic::Active],
        };
        if has_light {
            match self {
                AccessoryKind::Full => out.extend(Characteristic::LIGHT),
                AccessoryKind::Toggle => out.push(Characteristic::On),
            }
        }
        out
    }

    pub fn exposes(self, characteristic: Characteristic, has_light: bool) -> bool {
        self.characteristics(has_light).contains(&characteristic)
    }
}

/// A service and the characteristics registered on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescription {
    pub kind: ServiceKind,
    pub name: String,
    pub characteristics: Vec<(Characteristic, CharacteristicProps)>,
}

/// Receives characteristic updates for the host to publish.
pub trait CharacteristicSink: Send + Sync + 'static {
    fn update_characteristic(
        &self,
        accessory: Uuid,
        service: ServiceKind,
        update: &CharacteristicUpdate,
    );
}

/// Everything observable about one controller.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessoryEvent {
    State(StateEvent),
    Connection(ConnectionEvent),
    CommandFailed { command: CommandFrame, error: BridgeError },
}

/// Controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub retry_delay: Duration,
    pub wait_for_response: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            retry_delay: RETRY_DELAY,
            wait_for_response: false,
        }
    }
}

enum OutboundCommand {
    Set(CommandFrame),
    Refresh,
}

struct ControllerInner<S> {
    uuid: Uuid,
    kind: AccessoryKind,
    descriptor: DeviceDescriptor,
    mapper: Mutex<StateMapper>,
    session: Arc<S>,
    sink: Arc<dyn CharacteristicSink>,
    event_tx: broadcast::Sender<AccessoryEvent>,
    cancel_token: CancellationToken,
}

impl<S: DeviceSession> ControllerInner<S> {
    fn publish(&self, event: AccessoryEvent) {
        let _ = self.event_tx.send(event);
    }

    fn dispatch(&self, events: Vec<StateEvent>) {
        for event in events {
            if let StateEvent::Updated(update) = &event {
                if !self
                    .kind
                    .exposes(update.characteristic, self.descriptor.has_light)
                {
                    continue;
                }
                self.sink.update_characteristic(
                    self.uuid,
                    update.characteristic.service(),
                    update,
                );
            }
            self.publish(AccessoryEvent::State(event));
        }
    }

    fn apply_telemetry(&self, frame: &TelemetryFrame) {
        let events = self.mapper.lock().apply_telemetry(frame);
        self.dispatch(events);
    }

    fn apply_snapshot(&self, frame: &TelemetryFrame) {
        let events = self.mapper.lock().apply_snapshot(frame);
        self.dispatch(events);
    }
}

/// Controls one accessory of one physical fan.
///
/// Cloning yields another handle to the same controller.
pub struct AccessoryController<S> {
    inner: Arc<ControllerInner<S>>,
    command_tx: mpsc::UnboundedSender<OutboundCommand>,
    supervisor: ReconnectSupervisor<S>,
}

impl<S> Clone for AccessoryController<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            command_tx: self.command_tx.clone(),
            supervisor: self.supervisor.clone(),
        }
    }
}

impl<S: DeviceSession> AccessoryController<S> {
    /// Creates the controller and starts its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        uuid: Uuid,
        kind: AccessoryKind,
        descriptor: DeviceDescriptor,
        session: Arc<S>,
        sink: Arc<dyn CharacteristicSink>,
        options: ControllerOptions,
    ) -> Self {
        let mapper = StateMapper::new(descriptor.has_light)
            .with_wait_for_response(options.wait_for_response);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new(descriptor.id.clone(), session.clone())
            .with_retry_delay(options.retry_delay);

        let inner = Arc::new(ControllerInner {
            uuid,
            kind,
            descriptor,
            mapper: Mutex::new(mapper),
            session,
            sink,
            event_tx,
            cancel_token: CancellationToken::new(),
        });

        let controller = Self {
            inner,
            command_tx,
            supervisor,
        };
        controller.spawn_telemetry_task();
        controller.spawn_writer_task(command_rx);
        controller.spawn_supervisor_task();
        info!(
            "Accessory {} ({:?}) started for device {}",
            controller.inner.uuid, controller.inner.kind, controller.inner.descriptor.id
        );
        controller
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn kind(&self) -> AccessoryKind {
        self.inner.kind
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.inner.descriptor
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Copy of the in-memory fan state.
    pub fn state(&self) -> FanState {
        self.inner.mapper.lock().state().clone()
    }

    pub fn characteristics(&self) -> Vec<Characteristic> {
        self.inner.kind.characteristics(self.inner.descriptor.has_light)
    }

    /// Services this accessory registers with the host.
    pub fn services(&self) -> Vec<ServiceDescription> {
        let name = &self.inner.descriptor.name;
        [ServiceKind::Fanv2, ServiceKind::Lightbulb]
            .into_iter()
            .filter_map(|kind| {
                let characteristics: Vec<_> = self
                    .characteristics()
                    .into_iter()
                    .filter(|c| c.service() == kind)
                    .map(|c| (c, c.props()))
                    .collect();
                (!characteristics.is_empty()).then(|| ServiceDescription {
                    kind,
                    name: name.clone(),
                    characteristics,
                })
            })
            .collect()
    }

    fn ensure_exposed(&self, characteristic: Characteristic) -> Result<()> {
        if self
            .inner
            .kind
            .exposes(characteristic, self.inner.descriptor.has_light)
        {
            Ok(())
        } else {
            Err(BridgeError::UnsupportedCharacteristic(characteristic))
        }
    }

    /// Reads a characteristic from memory. Never performs I/O.
    pub fn get(&self, characteristic: Characteristic) -> Result<CharacteristicValue> {
        self.ensure_exposed(characteristic)?;
        self.inner
            .mapper
            .lock()
            .read(characteristic)
            .ok_or(BridgeError::UnsupportedCharacteristic(characteristic))
    }

    /// Writes a characteristic.
    ///
    /// State is updated immediately and the resulting commands are queued for
    /// delivery; this returns without waiting for the device.
    pub async fn set(
        &self,
        characteristic: Characteristic,
        value: CharacteristicValue,
    ) -> Result<()> {
        self.ensure_exposed(characteristic)?;
        if self.inner.cancel_token.is_cancelled() {
            return Err(BridgeError::ControllerStopped);
        }

        let outcome = {
            let mut mapper = self.inner.mapper.lock();
            mapper.handle_write(characteristic, value)?
        };
        debug!(
            "Set {:?} = {:?} on {}: {} command(s)",
            characteristic,
            value,
            self.inner.descriptor.id,
            outcome.commands.len()
        );
        self.inner.dispatch(outcome.events);

        for command in outcome.commands {
            self.enqueue(OutboundCommand::Set(command))?;
        }
        if outcome.refresh {
            self.enqueue(OutboundCommand::Refresh)?;
        }
        Ok(())
    }

    /// Queues without waiting for the writer task.
    fn enqueue(&self, command: OutboundCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| BridgeError::ControllerStopped)
    }

    /// Subscribes to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<AccessoryEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Returns a Stream of controller events.
    pub fn stream(&self) -> impl Stream<Item = AccessoryEvent> + Send + 'static {
        let mut rx = self.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }

    /// Stops all background tasks of this controller.
    pub fn stop(&self) {
        if !self.inner.cancel_token.is_cancelled() {
            info!(
                "Stopping accessory {} for device {}",
                self.inner.uuid, self.inner.descriptor.id
            );
            self.inner.cancel_token.cancel();
        }
    }

    fn spawn_telemetry_task(&self) {
        let inner = self.inner.clone();
        let mut rx = inner.session.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.cancel_token.cancelled() => break,
                    res = rx.recv() => {
                        match res {
                            Ok(event) => {
                                if let Some(frame) = event.telemetry() {
                                    inner.apply_telemetry(frame);
                                }
                            }
                            Err(RecvError::Lagged(n)) => {
                                warn!(
                                    "Telemetry for {} lagged, {} frames dropped",
                                    inner.descriptor.id, n
                                );
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
            debug!("Telemetry task for {} stopped", inner.uuid);
        });
    }

    fn spawn_writer_task(&self, mut rx: mpsc::UnboundedReceiver<OutboundCommand>) {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    _ = inner.cancel_token.cancelled() => break,
                    cmd = rx.recv() => {
                        match cmd {
                            Some(cmd) => cmd,
                            None => break,
                        }
                    }
                };

                match command {
                    OutboundCommand::Set(frame) => {
                        debug!("Sending {} to {}", frame.to_dps(), inner.descriptor.id);
                        if let Err(e) = inner.session.set(frame.clone()).await {
                            warn!(
                                "Command {} to {} failed: {}",
                                frame.to_dps(),
                                inner.descriptor.id,
                                e
                            );
                            inner.publish(AccessoryEvent::CommandFailed {
                                error: BridgeError::CommandDelivery {
                                    dp: frame.dp,
                                    reason: e.to_string(),
                                },
                                command: frame,
                            });
                        }
                    }
                    OutboundCommand::Refresh => {
                        if let Err(e) = inner.session.refresh().await {
                            warn!("Refresh of {} failed: {}", inner.descriptor.id, e);
                        }
                    }
                }
            }
            debug!("Writer task for {} stopped", inner.uuid);
        });
    }

    fn spawn_supervisor_task(&self) {
        let supervisor = self.supervisor.clone();
        let cancel = self.inner.cancel_token.clone();
        let reporter = self.inner.clone();
        let receiver = self.inner.clone();

        tokio::spawn(async move {
            supervisor
                .run(
                    cancel,
                    move |event| reporter.publish(AccessoryEvent::Connection(event)),
                    move |frame| receiver.apply_snapshot(&frame),
                )
                .await;
        });
    }
}

/**
 * Simulated Fan Example
 *
 * This example wires the platform to an in-memory fan that echoes every write
 * back as telemetry, and prints what the host would publish to HomeKit.
 */
use futures_util::StreamExt;
use parking_lot::Mutex;
use skyfan::dps::{DP_DIRECTION, DP_LIGHT, DP_MODE, DP_POWER, DP_SPEED};
use skyfan::platform::{AccessoryHost, PlatformAccessory, accessory_uuid};
use skyfan::{
    Characteristic, CharacteristicSink, CharacteristicUpdate, CharacteristicValue, CommandFrame,
    DeviceDescriptor, DeviceSession, Platform, PlatformConfig, Result, ServiceKind, SessionEvent,
    SessionFactory, TelemetryFrame,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

struct SimulatedFan {
    state: Mutex<TelemetryFrame>,
    events: broadcast::Sender<SessionEvent>,
}

impl DeviceSession for SimulatedFan {
    async fn find(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self) -> Result<TelemetryFrame> {
        Ok(self.state.lock().clone())
    }

    async fn set(&self, command: CommandFrame) -> Result<()> {
        self.state.lock().insert(command.dp, command.value.clone());
        let echo = TelemetryFrame::new().with(command.dp, command.value);
        let _ = self.events.send(SessionEvent::Data(echo));
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        let frame = self.state.lock().clone();
        let _ = self.events.send(SessionEvent::DpRefresh(frame));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

struct SimulatedFactory;

impl SessionFactory for SimulatedFactory {
    type Session = SimulatedFan;

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Arc<SimulatedFan>> {
        let (events, _) = broadcast::channel(32);
        let mut state = TelemetryFrame::new()
            .with(DP_POWER, false)
            .with(DP_SPEED, 2)
            .with(DP_DIRECTION, "forward")
            .with(DP_MODE, "nature");
        if descriptor.has_light {
            state.insert(DP_LIGHT, false);
        }
        Ok(Arc::new(SimulatedFan {
            state: Mutex::new(state),
            events,
        }))
    }
}

struct PrintingHost;

impl CharacteristicSink for PrintingHost {
    fn update_characteristic(
        &self,
        accessory: Uuid,
        service: ServiceKind,
        update: &CharacteristicUpdate,
    ) {
        println!(
            "[HOMEKIT] {} {:?}.{:?} = {:?}",
            accessory, service, update.characteristic, update.value
        );
    }
}

impl AccessoryHost for PrintingHost {
    fn register_accessories(
        &self,
        plugin: &str,
        platform: &str,
        accessories: &[PlatformAccessory],
    ) {
        for accessory in accessories {
            println!(
                "[HOST] {}/{} registered '{}' ({})",
                plugin, platform, accessory.display_name, accessory.uuid
            );
        }
    }

    fn unregister_accessories(
        &self,
        _plugin: &str,
        _platform: &str,
        accessories: &[PlatformAccessory],
    ) {
        for accessory in accessories {
            println!("[HOST] unregistered '{}'", accessory.display_name);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("--- Skyfan - Simulated Fan ---");

    // 1. Load the platform block
    let config = PlatformConfig::from_json_str(
        r#"{
            "platform": "SkyfanCeilingFan",
            "devices": [
                { "id": "sim-fan-1", "key": "0123456789abcdef", "name": "Living Room",
                  "hasLight": true, "withToggle": true }
            ]
        }"#,
    )?;

    // 2. Register accessories with the host
    let mut platform = Platform::new(config, SimulatedFactory, Arc::new(PrintingHost));
    let stream = platform.stream();
    tokio::pin!(stream);
    let report = platform.discover_devices();
    println!("[INFO] Registered {} accessories", report.registered.len());

    // 3. Drive the fan the way the Home app would
    if let Some(fan) = platform.controller(&accessory_uuid("sim-fan-1")) {
        tokio::time::sleep(Duration::from_millis(200)).await;
        fan.set(Characteristic::RotationSpeed, CharacteristicValue::Int(60))
            .await?;
        fan.set(Characteristic::Brightness, CharacteristicValue::Int(40))
            .await?;
        fan.set(Characteristic::SwingMode, CharacteristicValue::Int(0))
            .await?;
    }

    // 4. Print platform events until the example times out
    let timeout = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            Some(event) = stream.next() => {
                println!("[EVENT] Device: {}, {:?}", event.device_id, event.event);
            }
            _ = &mut timeout => {
                println!("[INFO] Example timeout reached. Exiting.");
                break;
            }
        }
    }

    platform.shutdown();
    Ok(())
}

//! Platform registrar: turns the configured device list into running accessories.
//!
//! Accessories are keyed by a UUID derived from the device id (and from
//! `"toggle-" + id` for the toggle duplicate), so a restart restores the same
//! accessories the host cached.

use crate::accessory::{
    AccessoryController, AccessoryEvent, AccessoryKind, CharacteristicSink, ControllerOptions,
    ServiceDescription,
};
use crate::config::{DeviceDescriptor, PlatformConfig};
use crate::error::{BridgeError, Result};
use crate::session::SessionFactory;
use futures_core::stream::Stream;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

pub const PLATFORM_NAME: &str = "SkyfanCeilingFan";
pub const PLUGIN_NAME: &str = "homebridge-skyfan-ceiling-fan";
pub const MANUFACTURER: &str = "Ventair";
pub const MODEL: &str = "Ceiling Fan";
/// Host accessory category for fans.
pub const CATEGORY_FAN: u8 = 3;

const TOGGLE_PREFIX: &str = "toggle-";
const EVENT_CHANNEL_SIZE: usize = 256;

/// Namespace for accessory UUIDs.
const ACCESSORY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d0e_8a4b_4c1f_9e57_3b2a_d4c8_a915);

/// Stable UUID of the main accessory for a device.
pub fn accessory_uuid(device_id: &str) -> Uuid {
    Uuid::new_v5(&ACCESSORY_NAMESPACE, device_id.as_bytes())
}

/// Stable UUID of the toggle accessory for a device.
pub fn toggle_uuid(device_id: &str) -> Uuid {
    accessory_uuid(&format!("{}{}", TOGGLE_PREFIX, device_id))
}

/// AccessoryInformation service contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInformation {
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub serial_number: String,
}

/// An accessory as known to the host, cached across restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformAccessory {
    pub uuid: Uuid,
    pub display_name: String,
    pub category: u8,
    pub kind: AccessoryKind,
    /// Descriptor the accessory was created from.
    pub context: DeviceDescriptor,
    pub information: AccessoryInformation,
    pub services: Vec<ServiceDescription>,
}

/// Host side of the platform.
pub trait AccessoryHost: CharacteristicSink {
    fn register_accessories(&self, plugin: &str, platform: &str, accessories: &[PlatformAccessory]);

    fn unregister_accessories(
        &self,
        plugin: &str,
        platform: &str,
        accessories: &[PlatformAccessory],
    );
}

/// An event from any accessory managed by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformEvent {
    pub accessory: Uuid,
    pub device_id: String,
    pub event: AccessoryEvent,
}

/// Summary of one `discover_devices` run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub registered: Vec<Uuid>,
    pub restored: Vec<Uuid>,
    pub removed: Vec<Uuid>,
    pub skipped: Vec<BridgeError>,
}

struct RegistryEntry<S> {
    accessory: PlatformAccessory,
    controller: AccessoryController<S>,
}

/// Creates, restores and tracks accessories for the configured fans.
pub struct Platform<F: SessionFactory, H: AccessoryHost> {
    config: PlatformConfig,
    factory: F,
    host: Arc<H>,
    cached: HashMap<Uuid, PlatformAccessory>,
    registry: HashMap<Uuid, RegistryEntry<F::Session>>,
    event_tx: broadcast::Sender<PlatformEvent>,
}

impl<F: SessionFactory, H: AccessoryHost> Platform<F, H> {
    pub fn new(config: PlatformConfig, factory: F, host: Arc<H>) -> Self {
        if config.devices.is_empty() {
            warn!("No devices specified in the configuration.");
        }
        debug!(
            "Finished initializing platform: {}",
            config.name.as_deref().unwrap_or(PLATFORM_NAME)
        );
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            config,
            factory,
            host,
            cached: HashMap::new(),
            registry: HashMap::new(),
            event_tx,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Hands a cached accessory back to the platform before discovery.
    pub fn configure_accessory(&mut self, accessory: PlatformAccessory) {
        info!("Loading accessory from cache: {}", accessory.display_name);
        self.cached.insert(accessory.uuid, accessory);
    }

    fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            retry_delay: self.config.retry_delay(),
            wait_for_response: self.config.wait_for_response,
        }
    }

    /// Starts an accessory for every valid configured device.
    ///
    /// Misconfigured and duplicate entries are skipped and reported; the rest
    /// proceed. Cached accessories that no longer match any device are
    /// unregistered.
    pub fn discover_devices(&mut self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut seen_ids = HashSet::new();
        let mut new_accessories = Vec::new();

        for index in 0..self.config.devices.len() {
            let descriptor = match self.config.descriptor(index) {
                Ok(d) => d,
                Err(e) => {
                    error!("Skipping device: {}", e);
                    report.skipped.push(e);
                    continue;
                }
            };
            if !seen_ids.insert(descriptor.id.clone()) {
                let e = BridgeError::DuplicateDevice(descriptor.id.clone());
                error!("Skipping device #{}: {}", index, e);
                report.skipped.push(e);
                continue;
            }

            let mut kinds = vec![AccessoryKind::Full];
            if descriptor.with_toggle {
                kinds.push(AccessoryKind::Toggle);
            }
            for kind in kinds {
                match self.start_accessory(&descriptor, kind) {
                    Ok((accessory, known)) => {
                        if known {
                            report.restored.push(accessory.uuid);
                        } else {
                            report.registered.push(accessory.uuid);
                            new_accessories.push(accessory);
                        }
                    }
                    Err(e) => {
                        error!("Failed to start {:?} accessory for {}: {}", kind, descriptor.id, e);
                        report.skipped.push(e);
                    }
                }
            }
        }

        if !new_accessories.is_empty() {
            self.host
                .register_accessories(PLUGIN_NAME, PLATFORM_NAME, &new_accessories);
        }

        let stale: Vec<PlatformAccessory> = self.cached.drain().map(|(_, a)| a).collect();
        if !stale.is_empty() {
            for accessory in &stale {
                info!("Removing stale accessory from cache: {}", accessory.display_name);
                report.removed.push(accessory.uuid);
            }
            self.host
                .unregister_accessories(PLUGIN_NAME, PLATFORM_NAME, &stale);
        }
        report
    }

    /// Starts (or keeps) the accessory of `kind` for a device.
    ///
    /// The flag is true when the host already knows the accessory, either from
    /// its cache or from an earlier discovery run.
    fn start_accessory(
        &mut self,
        descriptor: &DeviceDescriptor,
        kind: AccessoryKind,
    ) -> Result<(PlatformAccessory, bool)> {
        let (uuid, display_name) = match kind {
            AccessoryKind::Full => (accessory_uuid(&descriptor.id), descriptor.name.clone()),
            AccessoryKind::Toggle => (
                toggle_uuid(&descriptor.id),
                format!("Toggle {}", descriptor.name),
            ),
        };
        if let Some(entry) = self.registry.get(&uuid)
            && entry.accessory.context == *descriptor
            && !entry.controller.is_stopped()
        {
            debug!("Accessory {} already running", entry.accessory.display_name);
            self.cached.remove(&uuid);
            return Ok((entry.accessory.clone(), true));
        }
        let running = self.registry.remove(&uuid);
        if let Some(entry) = &running {
            debug!("Replacing running accessory {}", entry.accessory.display_name);
            entry.controller.stop();
        }

        let cached = self.cached.remove(&uuid);
        match &cached {
            Some(a) => info!("Restoring existing accessory from cache: {}", a.display_name),
            None => info!(
                "Adding new ceiling fan: {} {} (light: {}, {:?})",
                descriptor.id, descriptor.name, descriptor.has_light, kind
            ),
        }

        let session = self.factory.open(descriptor)?;
        let sink: Arc<dyn CharacteristicSink> = self.host.clone();
        let controller = AccessoryController::spawn(
            uuid,
            kind,
            descriptor.clone(),
            session,
            sink,
            self.controller_options(),
        );
        self.forward_events(&controller);

        let accessory = PlatformAccessory {
            uuid,
            display_name: cached
                .as_ref()
                .or(running.as_ref().map(|e| &e.accessory))
                .map(|a| a.display_name.clone())
                .unwrap_or(display_name),
            category: CATEGORY_FAN,
            kind,
            context: descriptor.clone(),
            information: AccessoryInformation {
                manufacturer: MANUFACTURER.to_string(),
                model: MODEL.to_string(),
                name: descriptor.name.clone(),
                serial_number: descriptor.id.clone(),
            },
            services: controller.services(),
        };

        self.registry.insert(
            uuid,
            RegistryEntry {
                accessory: accessory.clone(),
                controller,
            },
        );
        Ok((accessory, cached.is_some() || running.is_some()))
    }

    fn forward_events(&self, controller: &AccessoryController<F::Session>) {
        let event_tx = self.event_tx.clone();
        let accessory = controller.uuid();
        let device_id = controller.descriptor().id.clone();
        let mut events = controller.stream().boxed();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let _ = event_tx.send(PlatformEvent {
                    accessory,
                    device_id: device_id.clone(),
                    event,
                });
            }
        });
    }

    pub fn controller(&self, uuid: &Uuid) -> Option<&AccessoryController<F::Session>> {
        self.registry.get(uuid).map(|e| &e.controller)
    }

    pub fn accessory(&self, uuid: &Uuid) -> Option<&PlatformAccessory> {
        self.registry.get(uuid).map(|e| &e.accessory)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &AccessoryController<F::Session>> {
        self.registry.values().map(|e| &e.controller)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Tears down every accessory of a device and unregisters it from the host.
    pub fn remove_device(&mut self, device_id: &str) -> Result<()> {
        let removed: Vec<PlatformAccessory> = [accessory_uuid(device_id), toggle_uuid(device_id)]
            .iter()
            .filter_map(|uuid| self.registry.remove(uuid))
            .map(|entry| {
                entry.controller.stop();
                entry.accessory
            })
            .collect();

        if removed.is_empty() {
            warn!("Attempted to remove non-existent device {}", device_id);
            return Err(BridgeError::DeviceNotFound(device_id.to_string()));
        }
        self.config
            .devices
            .retain(|entry| PlatformConfig::entry_id(entry) != Some(device_id));
        self.host
            .unregister_accessories(PLUGIN_NAME, PLATFORM_NAME, &removed);
        info!("Device {} removed from platform", device_id);
        Ok(())
    }

    /// Returns a Stream of events from all managed accessories.
    pub fn stream(&self) -> impl Stream<Item = PlatformEvent> + Send + 'static {
        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|res| async move { res.ok() })
    }

    /// Stops every accessory.
    pub fn shutdown(&mut self) {
        for (_, entry) in self.registry.drain() {
            entry.controller.stop();
        }
        info!("Platform {} shut down", PLATFORM_NAME);
    }
}

impl<F: SessionFactory, H: AccessoryHost> Drop for Platform<F, H> {
    fn drop(&mut self) {
        for entry in self.registry.values() {
            entry.controller.stop();
        }
    }
}

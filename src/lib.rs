//! # Skyfan
//!
//! Bridges Tuya ceiling fan controllers (DPS key/value control over the local
//! network) to HomeKit accessory characteristics.
//!
//! The crate owns the state mapping between the two vocabularies, a
//! fixed-interval reconnect loop and the per-device accessory controller. The
//! device transport and the HomeKit host are plugged in through the
//! [`DeviceSession`] / [`SessionFactory`] and [`AccessoryHost`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use skyfan::{Characteristic, PlatformConfig, StateMapper};
//!
//! let config = PlatformConfig::from_json_str(r#"{"devices":[{"id":"ID","key":"KEY"}]}"#)?;
//! let mut mapper = StateMapper::new(false);
//! let outcome = mapper.handle_write(Characteristic::RotationSpeed, 60.into())?;
//! // outcome.commands: {"1": true}, then {"3": 3}
//! # Ok::<(), skyfan::BridgeError>(())
//! ```
//!
pub mod accessory;
pub mod characteristic;
pub mod config;
pub mod dps;
pub mod error;
pub mod mapper;
pub mod platform;
pub mod session;
pub mod state;
pub mod supervisor;

pub use accessory::{AccessoryController, AccessoryEvent, AccessoryKind, CharacteristicSink};
pub use characteristic::{Characteristic, CharacteristicUpdate, CharacteristicValue, ServiceKind};
pub use config::{DeviceDescriptor, PlatformConfig, ProtocolVersion};
pub use dps::{CommandFrame, TelemetryFrame};
pub use error::{BridgeError, Result};
pub use mapper::{StateEvent, StateMapper, WriteOutcome};
pub use platform::{AccessoryHost, PLATFORM_NAME, PLUGIN_NAME, Platform, PlatformAccessory};
pub use session::{DeviceSession, SessionEvent, SessionFactory};
pub use state::{Direction, FanMode, FanState};
pub use supervisor::{ConnectionEvent, ConnectionState, ReconnectSupervisor};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}

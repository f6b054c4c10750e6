//! Platform configuration.
//!
//! Mirrors the host's JSON platform block:
//!
//! ```json
//! {
//!   "platform": "SkyfanCeilingFan",
//!   "name": "Ceiling Fans",
//!   "retryDelaySecs": 60,
//!   "devices": [
//!     { "id": "bfc4e4...", "key": "BU2ai...", "ip": "", "version": "3.3",
//!       "name": "Bedroom Fan", "hasLight": true, "withToggle": false }
//!   ]
//! }
//! ```
//!
//! Device entries are kept as raw JSON until registration so one bad entry,
//! including one with a wrongly typed field, does not prevent the others from
//! loading.

use crate::error::{BridgeError, Result};
use crate::supervisor::{MIN_RETRY_DELAY, RETRY_DELAY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::time::Duration;

/// Tuya local protocol version spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolVersion {
    V3_1,
    V3_2,
    #[default]
    V3_3,
    V3_4,
    V3_5,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "3.1",
            ProtocolVersion::V3_2 => "3.2",
            ProtocolVersion::V3_3 => "3.3",
            ProtocolVersion::V3_4 => "3.4",
            ProtocolVersion::V3_5 => "3.5",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "3.1" => Ok(ProtocolVersion::V3_1),
            "3.2" => Ok(ProtocolVersion::V3_2),
            "3.3" => Ok(ProtocolVersion::V3_3),
            "3.4" => Ok(ProtocolVersion::V3_4),
            "3.5" => Ok(ProtocolVersion::V3_5),
            other => Err(format!("unsupported protocol version '{}'", other)),
        }
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(value: ProtocolVersion) -> Self {
        value.as_str().to_string()
    }
}

/// Identity, credentials and capabilities of one fan. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    pub key: String,
    /// Empty means the session discovers the address.
    pub ip: String,
    pub version: ProtocolVersion,
    pub name: String,
    pub has_light: bool,
    pub with_toggle: bool,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            key: key.into(),
            ip: String::new(),
            version: ProtocolVersion::default(),
            has_light: false,
            with_toggle: false,
        }
    }

    pub fn needs_discovery(&self) -> bool {
        self.ip.is_empty()
    }
}

/// One `devices[]` entry as written by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub has_light: bool,
    #[serde(default)]
    pub with_toggle: bool,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
}

impl DeviceConfig {
    /// Reads the raw entry at position `index` of the device list.
    pub fn from_entry(index: usize, entry: &Value) -> Result<Self> {
        DeviceConfig::deserialize(entry).map_err(|e| BridgeError::MisconfiguredDevice {
            index,
            reason: e.to_string(),
        })
    }

    /// Validates the entry at position `index` of the device list.
    pub fn to_descriptor(&self, index: usize) -> Result<DeviceDescriptor> {
        let misconfigured = |reason: String| BridgeError::MisconfiguredDevice { index, reason };

        let id = non_empty(self.id.as_ref()).ok_or_else(|| misconfigured("missing 'id'".into()))?;
        let key = non_empty(self.key.as_ref())
            .ok_or_else(|| misconfigured(format!("device '{}' is missing 'key'", id)))?;
        let version = match non_empty(self.version.as_ref()) {
            Some(v) => v
                .parse::<ProtocolVersion>()
                .map_err(|e| misconfigured(format!("device '{}': {}", id, e)))?,
            None => ProtocolVersion::default(),
        };

        Ok(DeviceDescriptor {
            name: non_empty(self.name.as_ref()).unwrap_or_else(|| id.clone()),
            ip: non_empty(self.ip.as_ref()).unwrap_or_default(),
            id,
            key,
            version,
            has_light: self.has_light,
            with_toggle: self.with_toggle,
        })
    }
}

fn default_retry_delay_secs() -> u64 {
    RETRY_DELAY.as_secs()
}

/// The platform block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Raw `devices[]` entries; see [`PlatformConfig::descriptor`].
    #[serde(default)]
    pub devices: Vec<Value>,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub wait_for_response: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            platform: None,
            name: None,
            devices: Vec::new(),
            retry_delay_secs: default_retry_delay_secs(),
            wait_for_response: false,
        }
    }
}

impl PlatformConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Delay between connection attempts, never shorter than [`MIN_RETRY_DELAY`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs).max(MIN_RETRY_DELAY)
    }

    /// Parses and validates device entry `index`.
    pub fn descriptor(&self, index: usize) -> Result<DeviceDescriptor> {
        let entry = self
            .devices
            .get(index)
            .ok_or_else(|| BridgeError::MisconfiguredDevice {
                index,
                reason: "no such entry".into(),
            })?;
        DeviceConfig::from_entry(index, entry)?.to_descriptor(index)
    }

    /// Device id of a raw entry, if it has a usable one.
    pub fn entry_id(entry: &Value) -> Option<&str> {
        entry
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "platform": "SkyfanCeilingFan",
        "name": "Fans",
        "devices": [
            { "id": "fan-1", "key": "secret", "ip": "192.168.1.20", "version": "3.4",
              "name": "Bedroom", "hasLight": true, "withToggle": true },
            { "id": "fan-2", "key": "other" },
            { "key": "orphan" },
            { "id": "fan-4", "key": "k", "version": "9.9" }
        ]
    }"#;

    #[test]
    fn test_parse_platform_block() {
        let config = PlatformConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.devices.len(), 4);
        assert_eq!(config.retry_delay(), Duration::from_secs(60));
        assert!(!config.wait_for_response);

        let first = config.descriptor(0).unwrap();
        assert_eq!(first.version, ProtocolVersion::V3_4);
        assert!(first.has_light && first.with_toggle);
        assert!(!first.needs_discovery());
    }

    #[test]
    fn test_defaults_fill_optional_fields() {
        let config = PlatformConfig::from_json_str(SAMPLE).unwrap();
        let second = config.descriptor(1).unwrap();
        assert_eq!(second.name, "fan-2");
        assert_eq!(second.version, ProtocolVersion::V3_3);
        assert!(second.needs_discovery());
        assert!(!second.has_light);
    }

    #[test]
    fn test_misconfigured_entries_are_described() {
        let config = PlatformConfig::from_json_str(SAMPLE).unwrap();
        match config.descriptor(2) {
            Err(BridgeError::MisconfiguredDevice { index, reason }) => {
                assert_eq!(index, 2);
                assert!(reason.contains("id"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            config.descriptor(3),
            Err(BridgeError::MisconfiguredDevice { index: 3, .. })
        ));

        let blank_key = DeviceConfig {
            id: Some("x".into()),
            key: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank_key.to_descriptor(0).is_err());
    }

    #[test]
    fn test_mistyped_entry_does_not_reject_the_list() {
        let config = PlatformConfig::from_json_str(
            r#"{ "devices": [
                { "id": "fan-a", "key": "k1" },
                { "id": "fan-b", "key": "k2", "hasLight": "yes" },
                { "id": 42, "key": "k3" },
                "not an object"
            ] }"#,
        )
        .unwrap();
        assert_eq!(config.devices.len(), 4);
        assert_eq!(config.descriptor(0).unwrap().id, "fan-a");
        for index in 1..4 {
            match config.descriptor(index) {
                Err(BridgeError::MisconfiguredDevice { index: i, .. }) => assert_eq!(i, index),
                other => panic!("entry {} gave {:?}", index, other),
            }
        }
        assert!(config.descriptor(4).is_err());
    }

    #[test]
    fn test_entry_id() {
        assert_eq!(PlatformConfig::entry_id(&serde_json::json!({"id": " fan-a "})), Some("fan-a"));
        assert_eq!(PlatformConfig::entry_id(&serde_json::json!({"id": 7})), None);
    }

    #[test]
    fn test_zero_retry_delay_is_raised() {
        let config = PlatformConfig::from_json_str(r#"{ "retryDelaySecs": 0 }"#).unwrap();
        assert_eq!(config.retry_delay(), MIN_RETRY_DELAY);
        let config = PlatformConfig::from_json_str(r#"{ "retryDelaySecs": 5 }"#).unwrap();
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_version_serde_round_trip() {
        let json = serde_json::to_string(&ProtocolVersion::V3_5).unwrap();
        assert_eq!(json, "\"3.5\"");
        let parsed: ProtocolVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ProtocolVersion::V3_5);
    }
}

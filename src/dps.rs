//! Data point (DPS) frames exchanged with the device session.
//! A telemetry frame is a sparse `dp -> value` map; a command frame is a single write.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fan power switch (bool).
pub const DP_POWER: u32 = 1;
/// Fan mode ("sleep" / "smart" / "nature").
pub const DP_MODE: u32 = 2;
/// Fan speed step (0..=5).
pub const DP_SPEED: u32 = 3;
/// Rotation direction ("forward" / "reverse").
pub const DP_DIRECTION: u32 = 8;
/// Light switch (bool).
pub const DP_LIGHT: u32 = 15;
/// Light brightness (0..=100).
pub const DP_BRIGHTNESS: u32 = 16;

const KEY_DPS: &str = "dps";

/// Sparse state-change notification from a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    dps: Map<String, Value>,
}

impl TelemetryFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful for sessions and tests.
    pub fn with(mut self, dp: u32, value: impl Into<Value>) -> Self {
        self.insert(dp, value);
        self
    }

    pub fn insert(&mut self, dp: u32, value: impl Into<Value>) {
        self.dps.insert(dp.to_string(), value.into());
    }

    pub fn from_dps(dps: Map<String, Value>) -> Self {
        Self { dps }
    }

    /// Parses a device payload.
    ///
    /// Accepts either the envelope `{"dps": {...}, ...}` or a bare `{...}` map.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(mut obj) => match obj.remove(KEY_DPS) {
                Some(Value::Object(dps)) => Ok(Self { dps }),
                Some(other) => Err(BridgeError::Json(format!(
                    "expected object under '{}', got {}",
                    KEY_DPS, other
                ))),
                None => Ok(Self { dps: obj }),
            },
            other => Err(BridgeError::Json(format!(
                "expected telemetry object, got {}",
                other
            ))),
        }
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Self::from_value(serde_json::from_slice(payload)?)
    }

    pub fn get(&self, dp: u32) -> Option<&Value> {
        self.dps.get(&dp.to_string())
    }

    pub fn get_key(&self, key: &str) -> Option<&Value> {
        self.dps.get(key)
    }

    pub fn contains(&self, dp: u32) -> bool {
        self.dps.contains_key(&dp.to_string())
    }

    pub fn len(&self) -> usize {
        self.dps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dps.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.dps.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.dps
    }
}

/// Single-field write sent to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub dp: u32,
    pub value: Value,
    /// Wait for the device to acknowledge before the write completes.
    pub wait_for_response: bool,
}

impl CommandFrame {
    pub fn new(dp: u32, value: impl Into<Value>) -> Self {
        Self {
            dp,
            value: value.into(),
            wait_for_response: false,
        }
    }

    pub fn wait_for_response(mut self, wait: bool) -> Self {
        self.wait_for_response = wait;
        self
    }

    /// The `{"<dp>": value}` object sessions put on the wire.
    pub fn to_dps(&self) -> Value {
        let mut dps = Map::new();
        dps.insert(self.dp.to_string(), self.value.clone());
        Value::Object(dps)
    }
}

/// Decodes a device boolean. Some firmwares report switches as 0/1.
pub(crate) fn decode_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

/// Decodes a device integer, accepting numeric strings.
pub(crate) fn decode_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

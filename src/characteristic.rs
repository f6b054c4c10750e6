//! HomeKit side of the bridge: services, characteristics and their values.

use serde::{Deserialize, Serialize};

/// HomeKit services a ceiling fan accessory is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    AccessoryInformation,
    Fanv2,
    Lightbulb,
}

/// Characteristics bridged to device data points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Characteristic {
    Active,
    RotationDirection,
    RotationSpeed,
    SwingMode,
    On,
    Brightness,
}

/// Value range advertised to the host for a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProps {
    pub min_value: i32,
    pub max_value: i32,
    pub min_step: i32,
}

impl Characteristic {
    pub const FAN: [Characteristic; 4] = [
        Characteristic::Active,
        Characteristic::RotationDirection,
        Characteristic::RotationSpeed,
        Characteristic::SwingMode,
    ];

    pub const LIGHT: [Characteristic; 2] = [Characteristic::On, Characteristic::Brightness];

    /// The service that owns this characteristic.
    pub fn service(self) -> ServiceKind {
        match self {
            Characteristic::On | Characteristic::Brightness => ServiceKind::Lightbulb,
            _ => ServiceKind::Fanv2,
        }
    }

    pub fn is_light(self) -> bool {
        self.service() == ServiceKind::Lightbulb
    }

    pub fn props(self) -> CharacteristicProps {
        match self {
            Characteristic::RotationSpeed => CharacteristicProps {
                min_value: 0,
                max_value: 100,
                min_step: crate::state::PERCENT_PER_STEP as i32,
            },
            Characteristic::Brightness => CharacteristicProps {
                min_value: 0,
                max_value: 100,
                min_step: 1,
            },
            _ => CharacteristicProps {
                min_value: 0,
                max_value: 1,
                min_step: 1,
            },
        }
    }
}

/// A HomeKit characteristic value.
///
/// `Active`, `RotationDirection` and `SwingMode` carry 0/1 integers, `On` a
/// boolean, the percent characteristics an integer in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CharacteristicValue {
    Bool(bool),
    Int(i32),
}

impl CharacteristicValue {
    pub fn as_bool(self) -> bool {
        match self {
            CharacteristicValue::Bool(b) => b,
            CharacteristicValue::Int(i) => i != 0,
        }
    }

    pub fn as_int(self) -> i32 {
        match self {
            CharacteristicValue::Bool(b) => b as i32,
            CharacteristicValue::Int(i) => i,
        }
    }
}

impl From<bool> for CharacteristicValue {
    fn from(value: bool) -> Self {
        CharacteristicValue::Bool(value)
    }
}

impl From<i32> for CharacteristicValue {
    fn from(value: i32) -> Self {
        CharacteristicValue::Int(value)
    }
}

impl From<u8> for CharacteristicValue {
    fn from(value: u8) -> Self {
        CharacteristicValue::Int(value as i32)
    }
}

/// A characteristic value pushed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicUpdate {
    pub characteristic: Characteristic,
    pub value: CharacteristicValue,
}

impl CharacteristicUpdate {
    pub fn new(characteristic: Characteristic, value: impl Into<CharacteristicValue>) -> Self {
        Self {
            characteristic,
            value: value.into(),
        }
    }
}

//! In-memory mirror of one physical fan and the fixed value vocabularies.
//!
//! Speed uses the 0..=5 step domain where step 0 is the canonical "off"
//! representation. Swing mode collapses the three device modes onto the two
//! HomeKit values: `nature` is "swing enabled", `smart` and `sleep` are
//! "swing disabled", and writing "disabled" selects `sleep`.

use serde::{Deserialize, Serialize};

/// Highest speed step the controller accepts.
pub const MAX_SPEED_STEP: u8 = 5;
/// RotationSpeed percent covered by one speed step.
pub const PERCENT_PER_STEP: u8 = 100 / MAX_SPEED_STEP;
pub const DEFAULT_BRIGHTNESS: u8 = 100;

/// Converts a speed step to a RotationSpeed percent.
pub fn step_to_percent(step: u8) -> u8 {
    step.min(MAX_SPEED_STEP) * PERCENT_PER_STEP
}

/// Converts a RotationSpeed percent to the nearest speed step.
pub fn percent_to_step(percent: f64) -> u8 {
    if !percent.is_finite() {
        return 0;
    }
    (percent / PERCENT_PER_STEP as f64)
        .round()
        .clamp(0.0, MAX_SPEED_STEP as f64) as u8
}

/// Rotation direction of the blades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_device_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    pub fn from_device_str(s: &str) -> Option<Self> {
        match s {
            "forward" => Some(Direction::Forward),
            "reverse" => Some(Direction::Reverse),
            _ => None,
        }
    }

    /// HomeKit RotationDirection: 0 clockwise, 1 counter-clockwise.
    pub fn to_homekit(self) -> i32 {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    pub fn from_homekit(value: i32) -> Option<Self> {
        match value {
            0 => Some(Direction::Forward),
            1 => Some(Direction::Reverse),
            _ => None,
        }
    }
}

/// Operating mode of the fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    #[default]
    Sleep,
    Smart,
    Nature,
}

impl FanMode {
    pub fn as_device_str(self) -> &'static str {
        match self {
            FanMode::Sleep => "sleep",
            FanMode::Smart => "smart",
            FanMode::Nature => "nature",
        }
    }

    pub fn from_device_str(s: &str) -> Option<Self> {
        match s {
            "sleep" => Some(FanMode::Sleep),
            "smart" => Some(FanMode::Smart),
            "nature" => Some(FanMode::Nature),
            _ => None,
        }
    }

    /// HomeKit SwingMode: 1 enabled (nature), 0 disabled (smart, sleep).
    pub fn to_swing(self) -> i32 {
        match self {
            FanMode::Nature => 1,
            FanMode::Smart | FanMode::Sleep => 0,
        }
    }

    pub fn from_swing(value: i32) -> Option<Self> {
        match value {
            1 => Some(FanMode::Nature),
            0 => Some(FanMode::Sleep),
            _ => None,
        }
    }
}

/// Light portion of the fan, present only for fans with a light kit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    pub brightness: u8,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on: false,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

/// Mutable mirror of one physical fan controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanState {
    pub power: bool,
    pub speed_step: u8,
    pub direction: Direction,
    pub mode: FanMode,
    pub light: Option<LightState>,
}

impl FanState {
    pub fn new(has_light: bool) -> Self {
        Self {
            power: false,
            speed_step: 0,
            direction: Direction::default(),
            mode: FanMode::default(),
            light: has_light.then(LightState::default),
        }
    }

    pub fn has_light(&self) -> bool {
        self.light.is_some()
    }

    pub fn speed_percent(&self) -> u8 {
        step_to_percent(self.speed_step)
    }
}

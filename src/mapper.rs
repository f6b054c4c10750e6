//! Bidirectional translation between device data points and HomeKit characteristics.
//!
//! Telemetry is applied through an ordered table of `(dp, handler)` pairs so each
//! field reacts independently. Characteristic writes update state tentatively and
//! produce the commands to send; the next telemetry for the same characteristic
//! reconciles the tentative value and reports a [`Reconciliation`].

use crate::characteristic::{Characteristic, CharacteristicUpdate, CharacteristicValue};
use crate::dps::{
    CommandFrame, DP_BRIGHTNESS, DP_DIRECTION, DP_LIGHT, DP_MODE, DP_POWER, DP_SPEED,
    TelemetryFrame, decode_bool, decode_int,
};
use crate::error::{BridgeError, Result};
use crate::state::{Direction, FanMode, FanState, MAX_SPEED_STEP, percent_to_step};
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;

type TelemetryHandler = fn(&mut FanState, &Value) -> Option<CharacteristicUpdate>;

/// Handlers run in this order for every incoming frame.
const TELEMETRY_HANDLERS: &[(u32, TelemetryHandler)] = &[
    (DP_POWER, apply_power),
    (DP_DIRECTION, apply_direction),
    (DP_SPEED, apply_speed),
    (DP_MODE, apply_mode),
    (DP_LIGHT, apply_light),
    (DP_BRIGHTNESS, apply_brightness),
];

fn apply_power(state: &mut FanState, value: &Value) -> Option<CharacteristicUpdate> {
    let on = decode_bool(value)?;
    state.power = on;
    Some(CharacteristicUpdate::new(Characteristic::Active, on as i32))
}

fn apply_direction(state: &mut FanState, value: &Value) -> Option<CharacteristicUpdate> {
    let direction = Direction::from_device_str(value.as_str()?)?;
    state.direction = direction;
    Some(CharacteristicUpdate::new(
        Characteristic::RotationDirection,
        direction.to_homekit(),
    ))
}

fn apply_speed(state: &mut FanState, value: &Value) -> Option<CharacteristicUpdate> {
    let raw = decode_int(value)?;
    let step = raw.clamp(0, MAX_SPEED_STEP as i64) as u8;
    if step as i64 != raw {
        warn!("Speed step {} out of range, clamped to {}", raw, step);
    }
    state.speed_step = step;
    Some(CharacteristicUpdate::new(
        Characteristic::RotationSpeed,
        state.speed_percent(),
    ))
}

fn apply_mode(state: &mut FanState, value: &Value) -> Option<CharacteristicUpdate> {
    let mode = FanMode::from_device_str(value.as_str()?)?;
    state.mode = mode;
    Some(CharacteristicUpdate::new(
        Characteristic::SwingMode,
        mode.to_swing(),
    ))
}

fn apply_light(state: &mut FanState, value: &Value) -> Option<CharacteristicUpdate> {
    let light = state.light.as_mut()?;
    light.on = decode_bool(value)?;
    Some(CharacteristicUpdate::new(Characteristic::On, light.on))
}

fn apply_brightness(state: &mut FanState, value: &Value) -> Option<CharacteristicUpdate> {
    let light = state.light.as_mut()?;
    light.brightness = decode_int(value)?.clamp(0, 100) as u8;
    Some(CharacteristicUpdate::new(
        Characteristic::Brightness,
        light.brightness,
    ))
}

fn characteristic_for_dp(dp: u32) -> Option<Characteristic> {
    match dp {
        DP_POWER => Some(Characteristic::Active),
        DP_MODE => Some(Characteristic::SwingMode),
        DP_SPEED => Some(Characteristic::RotationSpeed),
        DP_DIRECTION => Some(Characteristic::RotationDirection),
        DP_LIGHT => Some(Characteristic::On),
        DP_BRIGHTNESS => Some(Characteristic::Brightness),
        _ => None,
    }
}

/// A tentative value confirmed (or contradicted) by device telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub characteristic: Characteristic,
    pub tentative: CharacteristicValue,
    pub confirmed: CharacteristicValue,
}

impl Reconciliation {
    pub fn matched(&self) -> bool {
        self.tentative == self.confirmed
    }
}

/// Observable outcome of a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// A characteristic changed and should be pushed to the host.
    Updated(CharacteristicUpdate),
    /// Telemetry arrived for a characteristic with a pending tentative write.
    Reconciled(Reconciliation),
}

/// Result of a characteristic write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Commands to send, in order.
    pub commands: Vec<CommandFrame>,
    /// Updates for characteristics changed as a side effect of the write.
    pub events: Vec<StateEvent>,
    /// Ask the device to push fresh telemetry once the commands are sent.
    pub refresh: bool,
}

impl WriteOutcome {
    fn push(&mut self, dp: u32, value: impl Into<Value>) {
        self.commands.push(CommandFrame::new(dp, value));
    }

    fn update(&mut self, characteristic: Characteristic, value: impl Into<CharacteristicValue>) {
        self.events
            .push(StateEvent::Updated(CharacteristicUpdate::new(characteristic, value)));
    }
}

/// Owns one device's [`FanState`] and translates in both directions.
#[derive(Debug, Clone)]
pub struct StateMapper {
    state: FanState,
    wait_for_response: bool,
    pending: HashMap<Characteristic, CharacteristicValue>,
}

impl StateMapper {
    pub fn new(has_light: bool) -> Self {
        Self {
            state: FanState::new(has_light),
            wait_for_response: false,
            pending: HashMap::new(),
        }
    }

    /// Marks every produced command as waiting for a device acknowledgement.
    pub fn with_wait_for_response(mut self, wait: bool) -> Self {
        self.wait_for_response = wait;
        self
    }

    pub fn state(&self) -> &FanState {
        &self.state
    }

    /// Characteristics with a tentative value not yet confirmed by telemetry.
    pub fn pending(&self) -> impl Iterator<Item = (&Characteristic, &CharacteristicValue)> {
        self.pending.iter()
    }

    /// Reads the in-memory value. Returns `None` for light characteristics on a
    /// fan without a light.
    pub fn read(&self, characteristic: Characteristic) -> Option<CharacteristicValue> {
        let s = &self.state;
        let value = match characteristic {
            Characteristic::Active => CharacteristicValue::Int(s.power as i32),
            Characteristic::RotationDirection => CharacteristicValue::Int(s.direction.to_homekit()),
            Characteristic::RotationSpeed => CharacteristicValue::from(s.speed_percent()),
            Characteristic::SwingMode => CharacteristicValue::Int(s.mode.to_swing()),
            Characteristic::On => CharacteristicValue::Bool(s.light?.on),
            Characteristic::Brightness => CharacteristicValue::from(s.light?.brightness),
        };
        Some(value)
    }

    /// Applies a sparse telemetry frame. Absent, unknown and undecodable fields
    /// leave the state untouched.
    pub fn apply_telemetry(&mut self, frame: &TelemetryFrame) -> Vec<StateEvent> {
        let mut events = Vec::new();
        for (dp, handler) in TELEMETRY_HANDLERS {
            let Some(value) = frame.get(*dp) else {
                continue;
            };
            let Some(update) = handler(&mut self.state, value) else {
                debug!("Ignoring dp {} value {}", dp, value);
                continue;
            };
            events.push(StateEvent::Updated(update));
            if let Some(tentative) = self.pending.remove(&update.characteristic) {
                events.push(StateEvent::Reconciled(Reconciliation {
                    characteristic: update.characteristic,
                    tentative,
                    confirmed: update.value,
                }));
            }
        }

        for key in frame.keys() {
            let known = key
                .parse::<u32>()
                .is_ok_and(|dp| TELEMETRY_HANDLERS.iter().any(|(d, _)| *d == dp));
            if !known {
                debug!("Ignoring unknown dp {}", key);
            }
        }
        events
    }

    /// Applies the full-state fetch made right after connecting.
    ///
    /// A fan reported as off is mirrored with speed 0 regardless of the speed it
    /// remembers.
    pub fn apply_snapshot(&mut self, frame: &TelemetryFrame) -> Vec<StateEvent> {
        let powered_off = frame.get(DP_POWER).and_then(decode_bool) == Some(false);
        if powered_off && frame.contains(DP_SPEED) {
            let mut normalized = frame.clone();
            normalized.insert(DP_SPEED, 0);
            return self.apply_telemetry(&normalized);
        }
        self.apply_telemetry(frame)
    }

    /// Translates a characteristic write into device commands.
    pub fn handle_write(
        &mut self,
        characteristic: Characteristic,
        value: CharacteristicValue,
    ) -> Result<WriteOutcome> {
        if characteristic.is_light() && !self.state.has_light() {
            return Err(BridgeError::UnsupportedCharacteristic(characteristic));
        }

        let mut outcome = match characteristic {
            Characteristic::Active => self.write_active(value.as_bool()),
            Characteristic::RotationSpeed => self.write_speed(value),
            Characteristic::RotationDirection => self.write_direction(value)?,
            Characteristic::SwingMode => self.write_swing(value)?,
            Characteristic::On => self.write_light(value.as_bool()),
            Characteristic::Brightness => self.write_brightness(value),
        };

        for cmd in &mut outcome.commands {
            cmd.wait_for_response = self.wait_for_response;
        }
        self.record_pending(&outcome.commands);
        Ok(outcome)
    }

    fn record_pending(&mut self, commands: &[CommandFrame]) {
        for cmd in commands {
            if let Some(c) = characteristic_for_dp(cmd.dp)
                && let Some(value) = self.read(c)
            {
                self.pending.insert(c, value);
            }
        }
    }

    fn write_active(&mut self, on: bool) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        self.state.power = on;
        outcome.push(DP_POWER, on);

        if !on {
            if self.state.speed_step != 0 {
                self.state.speed_step = 0;
                outcome.update(Characteristic::RotationSpeed, 0);
            }
        } else if self.state.speed_step == 0 {
            self.state.speed_step = 1;
            outcome.push(DP_SPEED, 1);
            outcome.update(Characteristic::RotationSpeed, self.state.speed_percent());
        }
        outcome
    }

    fn write_speed(&mut self, value: CharacteristicValue) -> WriteOutcome {
        let step = percent_to_step(value.as_int() as f64);
        let mut outcome = WriteOutcome::default();

        if step == self.state.speed_step && (step > 0) == self.state.power {
            return outcome;
        }
        self.state.speed_step = step;

        if step == 0 {
            outcome.push(DP_SPEED, 0);
            if self.state.power {
                self.state.power = false;
                outcome.push(DP_POWER, false);
                outcome.update(Characteristic::Active, 0);
            }
        } else {
            if !self.state.power {
                self.state.power = true;
                outcome.push(DP_POWER, true);
                outcome.update(Characteristic::Active, 1);
            }
            outcome.push(DP_SPEED, step);
        }
        outcome
    }

    fn write_direction(&mut self, value: CharacteristicValue) -> Result<WriteOutcome> {
        let direction = Direction::from_homekit(value.as_int()).ok_or_else(|| {
            BridgeError::InvalidValue {
                characteristic: Characteristic::RotationDirection,
                reason: format!("expected 0 or 1, got {}", value.as_int()),
            }
        })?;
        self.state.direction = direction;
        let mut outcome = WriteOutcome::default();
        outcome.push(DP_DIRECTION, direction.as_device_str());
        Ok(outcome)
    }

    fn write_swing(&mut self, value: CharacteristicValue) -> Result<WriteOutcome> {
        let mode = FanMode::from_swing(value.as_int()).ok_or_else(|| BridgeError::InvalidValue {
            characteristic: Characteristic::SwingMode,
            reason: format!("expected 0 or 1, got {}", value.as_int()),
        })?;
        self.state.mode = mode;
        let mut outcome = WriteOutcome::default();
        outcome.push(DP_MODE, mode.as_device_str());
        Ok(outcome)
    }

    fn write_light(&mut self, on: bool) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        if let Some(light) = self.state.light.as_mut() {
            light.on = on;
            outcome.push(DP_LIGHT, on);
            outcome.refresh = true;
        }
        outcome
    }

    fn write_brightness(&mut self, value: CharacteristicValue) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        let Some(light) = self.state.light.as_mut() else {
            return outcome;
        };
        let brightness = value.as_int().clamp(0, 100) as u8;
        light.brightness = brightness;
        outcome.push(DP_BRIGHTNESS, brightness);

        if brightness == 0 && light.on {
            light.on = false;
            outcome.push(DP_LIGHT, false);
            outcome.update(Characteristic::On, false);
        } else if brightness > 0 && !light.on {
            light.on = true;
            outcome.push(DP_LIGHT, true);
            outcome.update(Characteristic::On, true);
        }
        outcome
    }
}

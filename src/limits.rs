use std::collections::BTreeSet;

use crate::constants::*;
use crate::error::ConfigError;

// pigpio user GPIOs are 0..=53
const MAX_GPIO: i64 = 53;

/// Static physical limits of the attached servos. Built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLimits {
    pub allowed_pins: BTreeSet<i64>,
    pub capped_pins: BTreeSet<i64>,
    pub angle_cap: f64,
    pub min_angle: f64,
    pub max_angle: f64,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        DeviceLimits {
            allowed_pins: ALLOWED_PINS.into_iter().collect(),
            capped_pins: CAPPED_PINS.into_iter().collect(),
            angle_cap: ANGLE_CAP,
            min_angle: MIN_ANGLE,
            max_angle: MAX_ANGLE,
            min_pulse_us: MIN_PULSE_US,
            max_pulse_us: MAX_PULSE_US,
        }
    }
}

impl DeviceLimits {
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.allowed_pins.is_empty() {
            return Err(ConfigError::NoAllowedPins);
        }
        if let Some(&pin) = self.allowed_pins.iter().find(|&&p| !(0..=MAX_GPIO).contains(&p)) {
            return Err(ConfigError::InvalidPin(pin));
        }
        if let Some(&pin) = self.capped_pins.iter().find(|p| !self.allowed_pins.contains(p)) {
            return Err(ConfigError::CappedPinNotAllowed(pin));
        }
        if self.min_angle >= self.max_angle {
            return Err(ConfigError::AngleBounds {
                min: self.min_angle,
                max: self.max_angle,
            });
        }
        if !(self.min_angle..=self.max_angle).contains(&self.angle_cap) {
            return Err(ConfigError::CapOutOfRange {
                cap: self.angle_cap,
                min: self.min_angle,
                max: self.max_angle,
            });
        }
        if self.min_pulse_us >= self.max_pulse_us {
            return Err(ConfigError::PulseBounds {
                min: self.min_pulse_us,
                max: self.max_pulse_us,
            });
        }
        Ok(self)
    }

    pub fn is_capped(&self, pin: i64) -> bool {
        self.capped_pins.contains(&pin)
    }

    /// Converts an already validated angle to a servo pulse width in microseconds.
    pub fn angle_to_pulsewidth(&self, angle: f64) -> u32 {
        let span = (self.max_pulse_us - self.min_pulse_us) as f64;
        (self.min_pulse_us as f64 + (angle / self.max_angle) * span) as u32
    }

    pub(crate) fn describe_pins(pins: &BTreeSet<i64>) -> String {
        let list: Vec<String> = pins.iter().map(|p| p.to_string()).collect();
        format!("{{{}}}", list.join(", "))
    }
}

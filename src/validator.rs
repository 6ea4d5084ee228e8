//! Per-command checks run before anything touches the hardware.
//!
//! Checks run in a fixed order: pin membership, angle type, angle range,
//! then the pin-specific cap. Capping is not a failure; the command goes
//! ahead at the cap and carries a notice for the final message.
//!
//! `duration_ms` is already a non-negative integer once a command is decoded.
//! A missing value means the default hold; `0` is accepted and means the
//! pulse is released as soon as it is set.

use crate::error::ValidationError;
use crate::limits::DeviceLimits;
use crate::types::{AngleInput, Command};

/// A command that passed validation, with the angle that will actually be driven.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCommand {
    pub pin: u32,
    pub effective_angle: f64,
    pub duration_ms: u64,
    pub cap_notice: Option<String>,
}

pub fn validate(cmd: &Command, limits: &DeviceLimits) -> Result<ValidCommand, ValidationError> {
    let pin = cmd.pin;
    let invalid_pin = || ValidationError::InvalidPin {
        pin,
        allowed: DeviceLimits::describe_pins(&limits.allowed_pins),
    };
    if !limits.allowed_pins.contains(&pin) {
        return Err(invalid_pin());
    }
    // limits built by hand may list numbers that are no GPIO at all
    let gpio = u32::try_from(pin).map_err(|_| invalid_pin())?;

    let angle = match &cmd.angle {
        AngleInput::Degrees(angle) if angle.is_finite() => *angle,
        _ => return Err(ValidationError::InvalidAngleType { pin }),
    };

    if !(limits.min_angle..=limits.max_angle).contains(&angle) {
        return Err(ValidationError::AngleOutOfRange {
            pin,
            angle,
            min: limits.min_angle,
            max: limits.max_angle,
        });
    }

    let (effective_angle, cap_notice) = if limits.is_capped(pin) && angle > limits.angle_cap {
        let notice = format!(
            "Angle {}° for pin {} was capped to {}°.",
            angle, pin, limits.angle_cap
        );
        (limits.angle_cap, Some(notice))
    } else {
        (angle, None)
    };

    Ok(ValidCommand {
        pin: gpio,
        effective_angle,
        duration_ms: cmd.duration_ms_or_default(),
        cap_notice,
    })
}

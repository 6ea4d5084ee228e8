use std::io;

use thiserror::Error;

/// Failures talking to the hardware backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no reply from backend within {0}ms")]
    Timeout(u64),

    #[error("reply for command {actual} does not match request {expected}")]
    MismatchedReply { expected: u32, actual: u32 },

    #[error("{name} ({code})")]
    Pigpio { code: i32, name: &'static str },
}

impl TransportError {
    pub fn pigpio(code: i32) -> Self {
        TransportError::Pigpio {
            code,
            name: pigpio_error_name(code),
        }
    }
}

fn pigpio_error_name(code: i32) -> &'static str {
    match code {
        -2 => "PI_BAD_USER_GPIO",
        -3 => "PI_BAD_GPIO",
        -7 => "PI_BAD_PULSEWIDTH",
        -8 => "PI_NO_PERMISSION",
        -41 => "PI_NOT_PERMITTED",
        -63 => "PI_NO_HANDLE",
        -93 => "PI_BAD_SERVO_FREQ",
        -94 => "PI_BAD_SERVO_RANGE",
        -99 => "PI_CMD_INTERRUPTED",
        _ => "pigpio error",
    }
}

/// Reasons a single command is refused before any pulse is emitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid pin {pin}. Allowed pins are {allowed}.")]
    InvalidPin { pin: i64, allowed: String },

    #[error("Invalid angle type for pin {pin}. Angle must be a number.")]
    InvalidAngleType { pin: i64 },

    #[error("Invalid angle {angle} for pin {pin}. Angle must be between {min} and {max} degrees.")]
    AngleOutOfRange { pin: i64, angle: f64, min: f64, max: f64 },

    #[error("Malformed command: {0}")]
    Malformed(String),
}

/// The backend failed while moving one servo.
#[derive(Debug, Error)]
#[error("pigpio error for pin {pin}: {source}")]
pub struct ActuationError {
    pub pin: u32,
    #[source]
    pub source: TransportError,
}

/// Invalid server configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("at least one pin must be allowed")]
    NoAllowedPins,

    #[error("capped pin {0} is not in the allowed pin set")]
    CappedPinNotAllowed(i64),

    #[error("pin {0} is not a valid GPIO number")]
    InvalidPin(i64),

    #[error("angle cap {cap} must lie within [{min}, {max}]")]
    CapOutOfRange { cap: f64, min: f64, max: f64 },

    #[error("min_angle {min} must be below max_angle {max}")]
    AngleBounds { min: f64, max: f64 },

    #[error("min_pulse_us {min} must be below max_pulse_us {max}")]
    PulseBounds { min: u32, max: u32 },
}

/// Caller-side failures. Any of these means no results were received.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve host {0}")]
    Resolve(String),

    #[error("connection refused by {0}; is the server running?")]
    ConnectionRefused(String),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("connection to {url} broken: {reason}")]
    Broken { url: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote error {code}: {message}")]
    Rpc { code: i64, message: String },
}

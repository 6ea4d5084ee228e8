use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::constants::DEFAULT_DURATION_MS;

/// Requested angle as it arrived on the wire.
///
/// Anything that is not a JSON number is kept as-is so the validator can
/// report it against the command instead of rejecting the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AngleInput {
    Degrees(f64),
    Other(serde_json::Value),
}

impl From<f64> for AngleInput {
    fn from(angle: f64) -> Self {
        AngleInput::Degrees(angle)
    }
}

/// One servo move, as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub pin: i64,
    pub angle: AngleInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Command {
    pub fn new(pin: i64, angle: f64) -> Self {
        Command {
            pin,
            angle: AngleInput::Degrees(angle),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn duration_ms_or_default(&self) -> u64 {
        self.duration_ms.unwrap_or(DEFAULT_DURATION_MS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Outcome of one command, positionally aligned with the submitted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub pin: Option<i64>,
    pub status: Status,
    pub message: String,
}

impl CommandResult {
    pub fn ok(pin: i64, message: impl Into<String>) -> Self {
        CommandResult {
            pin: Some(pin),
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn error(pin: Option<i64>, message: impl Into<String>) -> Self {
        CommandResult {
            pin,
            status: Status::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_command_defaults_duration() {
        let cmd: Command = serde_json::from_value(json!({"pin": 17, "angle": 90})).unwrap();
        assert_eq!(cmd.angle, AngleInput::Degrees(90.0));
        assert_eq!(cmd.duration_ms, None);
        assert_eq!(cmd.duration_ms_or_default(), 500);
    }

    #[test]
    fn test_non_numeric_angle_is_kept() {
        let cmd: Command = serde_json::from_value(json!({"pin": 23, "angle": "ninety"})).unwrap();
        assert_eq!(cmd.angle, AngleInput::Other(json!("ninety")));
    }

    #[test]
    fn test_negative_duration_is_rejected() {
        let record = json!({"pin": 23, "angle": 10, "duration_ms": -5});
        let res = serde_json::from_value::<Command>(record);
        assert!(res.is_err());
    }

    #[test]
    fn test_command_serializes_without_missing_duration() {
        let value = serde_json::to_value(Command::new(22, 20.0)).unwrap();
        assert_eq!(value, json!({"pin": 22, "angle": 20.0}));
    }

    #[test]
    fn test_status_wire_names() {
        let result = CommandResult::error(Some(99), "Invalid pin 99");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(Status::from_str("ok").unwrap(), Status::Ok);
        assert_eq!(Status::Error.to_string(), "error");
    }
}

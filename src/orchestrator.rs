//! Runs whole batches against the servo backend.
//!
//! A batch always yields one result per command, in submission order. Commands
//! that fail validation or actuation produce an error result and the batch
//! moves on. Batches are serialized: the backend lock is held for the whole
//! batch so no two batches ever drive the bus at the same time.

use serde_json::Value;
use tokio::sync::Mutex;

use crate::controller::Controller;
use crate::error::ValidationError;
use crate::limits::DeviceLimits;
use crate::types::{Command, CommandResult};
use crate::validator::validate;

// A wire record that either decoded into a command or failed with the pin it named.
type Decoded = Result<Command, (Option<i64>, ValidationError)>;

/// The hardware handle, or the reason it could not be opened at startup.
pub enum Backend {
    Available(Controller),
    Unavailable { reason: String },
}

impl Backend {
    pub fn is_available(&self) -> bool {
        matches!(self, Backend::Available(_))
    }
}

pub struct Orchestrator {
    limits: DeviceLimits,
    available: bool,
    backend: Mutex<Backend>,
}

impl Orchestrator {
    pub fn new(limits: DeviceLimits, backend: Backend) -> Self {
        Orchestrator {
            limits,
            available: backend.is_available(),
            backend: Mutex::new(backend),
        }
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Fixed at construction; the backend is never reconnected.
    pub fn backend_available(&self) -> bool {
        self.available
    }

    pub async fn execute(&self, commands: &[Command]) -> Vec<CommandResult> {
        self.run(commands.iter().cloned().map(Ok).collect()).await
    }

    /// Decodes each wire record on its own so one malformed record only fails itself.
    pub async fn execute_records(&self, records: &[Value]) -> Vec<CommandResult> {
        let decoded = records.iter().map(decode_record).collect();
        self.run(decoded).await
    }

    async fn run(&self, commands: Vec<Decoded>) -> Vec<CommandResult> {
        let mut backend = self.backend.lock().await;
        tracing::info!("Executing batch of {} command(s)", commands.len());

        let controller = match &mut *backend {
            Backend::Available(controller) => controller,
            Backend::Unavailable { reason } => {
                tracing::warn!("Rejecting batch: actuation backend unavailable ({})", reason);
                let message = format!(
                    "Actuation backend unavailable: {}. Cannot control servos.",
                    reason
                );
                return commands
                    .iter()
                    .map(|cmd| {
                        let pin = match cmd {
                            Ok(cmd) => Some(cmd.pin),
                            Err((pin, _)) => *pin,
                        };
                        CommandResult::error(pin, message.clone())
                    })
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(commands.len());
        for cmd in commands {
            let result = match cmd {
                Ok(cmd) => self.execute_one(controller, &cmd).await,
                Err((pin, err)) => {
                    tracing::warn!("{}", err);
                    CommandResult::error(pin, err.to_string())
                }
            };
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        tracing::info!("Batch finished: {} ok, {} error", results.len() - failed, failed);
        results
    }

    async fn execute_one(&self, controller: &mut Controller, cmd: &Command) -> CommandResult {
        let valid = match validate(cmd, &self.limits) {
            Ok(valid) => valid,
            Err(err) => {
                tracing::warn!("{}", err);
                return CommandResult::error(Some(cmd.pin), err.to_string());
            }
        };

        match controller
            .actuate(&self.limits, valid.pin, valid.effective_angle, valid.duration_ms)
            .await
        {
            Ok(_) => {
                let message = valid.cap_notice.unwrap_or_else(|| {
                    format!("Servo on pin {} moved to {}°.", valid.pin, valid.effective_angle)
                });
                CommandResult::ok(cmd.pin, message)
            }
            Err(err) => {
                tracing::warn!("{}", err);
                CommandResult::error(Some(cmd.pin), err.to_string())
            }
        }
    }
}

fn decode_record(record: &Value) -> Decoded {
    serde_json::from_value::<Command>(record.clone()).map_err(|err| {
        let pin = record.get("pin").and_then(Value::as_i64);
        (pin, ValidationError::Malformed(err.to_string()))
    })
}

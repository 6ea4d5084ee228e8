pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod limits;
pub mod orchestrator;
pub mod rpc;
pub mod transport;
pub mod types;
pub mod validator;

pub use controller::Controller;
pub use error::{ActuationError, ClientError, ConfigError, TransportError, ValidationError};
pub use limits::DeviceLimits;
pub use orchestrator::{Backend, Orchestrator};
pub use transport::{SimulatedBus, Transport};
pub use types::{AngleInput, Command, CommandResult, Status};

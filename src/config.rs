//! Server configuration, from the command line or the environment.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use clap::Parser;
use tokio::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;
use crate::limits::DeviceLimits;

#[derive(Parser, Debug, Clone)]
#[command(name = "servo_server")]
#[command(version)]
#[command(about = "Serves batched servo commands over RPC", long_about = None)]
pub struct ServerArgs {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_SERVER_HOST, env = "SERVO_HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_SERVER_PORT, env = "SERVO_PORT")]
    pub port: u16,

    /// Address of the pigpio daemon
    #[arg(long, default_value = DEFAULT_PIGPIO_HOST, env = "PIGPIO_ADDR")]
    pub pigpio_host: String,

    #[arg(long, default_value_t = DEFAULT_PIGPIO_PORT, env = "PIGPIO_PORT")]
    pub pigpio_port: u16,

    /// Socket timeout for each pigpio exchange, in milliseconds
    #[arg(long, default_value_t = PIGPIO_IO_TIMEOUT_MS)]
    pub pigpio_timeout_ms: u64,

    /// Drive an in-memory bus instead of the pigpio daemon
    #[arg(long, default_value_t = false)]
    pub simulate: bool,

    /// Pins that may be driven
    #[arg(long, value_delimiter = ',', default_values_t = ALLOWED_PINS)]
    pub allowed_pins: Vec<i64>,

    /// Pins limited to --angle-cap
    #[arg(long, value_delimiter = ',', default_values_t = CAPPED_PINS)]
    pub capped_pins: Vec<i64>,

    #[arg(long, default_value_t = ANGLE_CAP)]
    pub angle_cap: f64,

    #[arg(long, default_value_t = MIN_PULSE_US)]
    pub min_pulse_us: u32,

    #[arg(long, default_value_t = MAX_PULSE_US)]
    pub max_pulse_us: u32,
}

impl ServerArgs {
    pub fn device_limits(&self) -> Result<DeviceLimits, ConfigError> {
        DeviceLimits {
            allowed_pins: self.allowed_pins.iter().copied().collect::<BTreeSet<_>>(),
            capped_pins: self.capped_pins.iter().copied().collect::<BTreeSet<_>>(),
            angle_cap: self.angle_cap,
            min_angle: MIN_ANGLE,
            max_angle: MAX_ANGLE,
            min_pulse_us: self.min_pulse_us,
            max_pulse_us: self.max_pulse_us,
        }
        .validated()
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn pigpio_timeout(&self) -> Duration {
        Duration::from_millis(self.pigpio_timeout_ms)
    }
}

// pigpio daemon socket commands
pub const CMD_SERVO: u32 = 8;
pub const CMD_HWVER: u32 = 17;
pub const CMD_PIGPV: u32 = 26;

pub const PIGPIO_FRAME_LEN: usize = 16;
pub const DEFAULT_PIGPIO_HOST: &str = "127.0.0.1";
pub const DEFAULT_PIGPIO_PORT: u16 = 8888;
pub const PIGPIO_IO_TIMEOUT_MS: u64 = 1000;

// Pulse width that tells pigpio to stop driving a servo pin
pub const PULSE_OFF: u32 = 0;

// Device limits
pub const ALLOWED_PINS: [i64; 6] = [17, 27, 22, 23, 24, 25];
pub const CAPPED_PINS: [i64; 3] = [17, 27, 22];
pub const ANGLE_CAP: f64 = 45.0;
pub const MIN_ANGLE: f64 = 0.0;
pub const MAX_ANGLE: f64 = 180.0;
pub const MIN_PULSE_US: u32 = 500;
pub const MAX_PULSE_US: u32 = 2500;

pub const DEFAULT_DURATION_MS: u64 = 500;

// RPC
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8011;
pub const RPC_PATH: &str = "/mcp";
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";
/// Sessions unused for this long are dropped when a new one opens.
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 30 * 60;
pub const MAX_SESSIONS: usize = 256;
pub const SERVER_NAME: &str = "ServoController";
pub const TOOL_NAME: &str = "execute_servo_commands";

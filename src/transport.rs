use crate::constants::*;
use crate::error::TransportError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant};

const PI_NOT_PERMITTED: i32 = -41;
const SIM_PIGPIO_VERSION: u32 = 79;
const SIM_HARDWARE_REVISION: u32 = 0x00a0_2082;

/// One pulse-width write seen by the simulated bus.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseWrite {
    pub pin: u32,
    pub pulse_us: u32,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct BusState {
    writes: Vec<PulseWrite>,
    rejected_pins: HashSet<u32>,
    disconnected: bool,
    reply: Option<(u32, i32)>,
}

/// In-memory stand-in for the pigpio daemon. Clones share the same bus.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<BusState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every servo write to `pin` fail the way pigpiod refuses a GPIO.
    pub fn reject_pin(&self, pin: u32) {
        self.state.lock().rejected_pins.insert(pin);
    }

    /// Makes every further exchange fail as if the daemon socket dropped.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    pub fn writes(&self) -> Vec<PulseWrite> {
        self.state.lock().writes.clone()
    }

    fn send(&self, cmd: u32, p1: u32, p2: u32) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated bus disconnected",
            )));
        }

        let res = match cmd {
            CMD_SERVO if state.rejected_pins.contains(&p1) => PI_NOT_PERMITTED,
            CMD_SERVO => {
                state.writes.push(PulseWrite {
                    pin: p1,
                    pulse_us: p2,
                    at: Instant::now(),
                });
                0
            }
            CMD_PIGPV => SIM_PIGPIO_VERSION as i32,
            CMD_HWVER => SIM_HARDWARE_REVISION as i32,
            _ => 0,
        };
        state.reply = Some((cmd, res));
        Ok(())
    }

    fn recv(&self) -> Option<(u32, i32)> {
        self.state.lock().reply.take()
    }
}

/// Link to the hardware backend.
///
/// A pigpiod stream that timed out or returned a misframed reply is dropped.
/// The next command dials a fresh connection, so a late reply never gets
/// read as the answer to a later request.
pub enum Transport {
    Pigpiod {
        addr: String,
        stream: Option<TcpStream>,
        io_timeout: Duration,
    },
    Simulated(SimulatedBus),
}

async fn open_stream(addr: &str, io_timeout: Duration) -> Result<TcpStream, TransportError> {
    let stream = tokio::time::timeout(io_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| timed_out(io_timeout))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn timed_out(io_timeout: Duration) -> TransportError {
    TransportError::Timeout(io_timeout.as_millis() as u64)
}

impl Transport {
    pub async fn connect(
        host: &str,
        port: u16,
        io_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", host, port);
        let stream = open_stream(&addr, io_timeout).await?;
        tracing::debug!("Connected to pigpio daemon at {}", addr);
        Ok(Transport::Pigpiod {
            addr,
            stream: Some(stream),
            io_timeout,
        })
    }

    pub fn simulated(bus: SimulatedBus) -> Self {
        Transport::Simulated(bus)
    }

    /// False once the pigpiod stream was dropped and not yet re-dialed.
    pub fn is_connected(&self) -> bool {
        match self {
            Transport::Pigpiod { stream, .. } => stream.is_some(),
            Transport::Simulated(_) => true,
        }
    }

    fn encode(cmd: u32, p1: u32, p2: u32) -> [u8; PIGPIO_FRAME_LEN] {
        let mut frame = [0u8; PIGPIO_FRAME_LEN];
        frame[0..4].copy_from_slice(&cmd.to_le_bytes());
        frame[4..8].copy_from_slice(&p1.to_le_bytes());
        frame[8..12].copy_from_slice(&p2.to_le_bytes());
        // p3 stays 0: no extension payload
        frame
    }

    pub async fn send(&mut self, cmd: u32, p1: u32, p2: u32) -> Result<(), TransportError> {
        match self {
            Transport::Pigpiod {
                addr,
                stream,
                io_timeout,
            } => {
                let timeout = *io_timeout;
                // the stream is only put back once the write went through
                let mut sock = match stream.take() {
                    Some(sock) => sock,
                    None => {
                        tracing::warn!("Reconnecting to pigpio daemon at {}", addr);
                        open_stream(addr, timeout).await?
                    }
                };
                let frame = Self::encode(cmd, p1, p2);
                tokio::time::timeout(timeout, sock.write_all(&frame))
                    .await
                    .map_err(|_| timed_out(timeout))??;
                *stream = Some(sock);
                Ok(())
            }
            Transport::Simulated(bus) => bus.send(cmd, p1, p2),
        }
    }

    /// Reads the reply to `cmd` and returns its non-negative result.
    pub async fn recv(&mut self, cmd: u32) -> Result<u32, TransportError> {
        let (echoed, res) = match self {
            Transport::Pigpiod {
                stream, io_timeout, ..
            } => {
                let timeout = *io_timeout;
                let mut sock = stream.take().ok_or_else(|| {
                    TransportError::Io(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "pigpio daemon connection was dropped",
                    ))
                })?;
                let mut buf = [0u8; PIGPIO_FRAME_LEN];
                tokio::time::timeout(timeout, sock.read_exact(&mut buf))
                    .await
                    .map_err(|_| timed_out(timeout))??;
                let echoed = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                let res = i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
                if echoed == cmd {
                    *stream = Some(sock);
                }
                (echoed, res)
            }
            Transport::Simulated(bus) => bus.recv().ok_or_else(|| {
                TransportError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "no pending reply",
                ))
            })?,
        };

        if echoed != cmd {
            return Err(TransportError::MismatchedReply {
                expected: cmd,
                actual: echoed,
            });
        }
        if res < 0 {
            return Err(TransportError::pigpio(res));
        }
        Ok(res as u32)
    }

    pub async fn command(&mut self, cmd: u32, p1: u32, p2: u32) -> Result<u32, TransportError> {
        self.send(cmd, p1, p2).await?;
        self.recv(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Answers each 16-byte request with the given result codes, in order.
    async fn fake_daemon(results: Vec<i32>) -> (u16, tokio::task::JoinHandle<Vec<[u8; 16]>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            for res in results {
                let mut req = [0u8; 16];
                sock.read_exact(&mut req).await.unwrap();
                let mut reply = req;
                reply[12..16].copy_from_slice(&res.to_le_bytes());
                sock.write_all(&reply).await.unwrap();
                seen.push(req);
            }
            seen
        });
        (port, handle)
    }

    /// First connection answers its one request only after `delay`, with `late_res`.
    /// The second connection answers promptly with the given result codes.
    async fn late_reply_daemon(
        delay: Duration,
        late_res: i32,
        results: Vec<i32>,
    ) -> (u16, tokio::task::JoinHandle<Vec<[u8; 16]>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut req = [0u8; 16];
                if first.read_exact(&mut req).await.is_ok() {
                    tokio::time::sleep(delay).await;
                    req[12..16].copy_from_slice(&late_res.to_le_bytes());
                    let _ = first.write_all(&req).await;
                }
            });

            let (mut second, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            for res in results {
                let mut req = [0u8; 16];
                second.read_exact(&mut req).await.unwrap();
                let mut reply = req;
                reply[12..16].copy_from_slice(&res.to_le_bytes());
                second.write_all(&reply).await.unwrap();
                seen.push(req);
            }
            seen
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_pigpiod_servo_frame() {
        let (port, daemon) = fake_daemon(vec![0]).await;
        let mut transport = Transport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(transport.command(CMD_SERVO, 17, 1500).await.unwrap(), 0);

        let frames = daemon.await.unwrap();
        let frame = frames[0];
        assert_eq!(u32::from_le_bytes(frame[0..4].try_into().unwrap()), CMD_SERVO);
        assert_eq!(u32::from_le_bytes(frame[4..8].try_into().unwrap()), 17);
        assert_eq!(u32::from_le_bytes(frame[8..12].try_into().unwrap()), 1500);
        assert_eq!(&frame[12..16], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_pigpiod_negative_result_is_error() {
        let (port, _daemon) = fake_daemon(vec![-7]).await;
        let mut transport = Transport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        let err = transport.command(CMD_SERVO, 17, 9999).await.unwrap_err();
        assert!(matches!(err, TransportError::Pigpio { code: -7, .. }));
    }

    #[tokio::test]
    async fn test_pigpiod_version_query() {
        let (port, _daemon) = fake_daemon(vec![79]).await;
        let mut transport = Transport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(transport.command(CMD_PIGPV, 0, 0).await.unwrap(), 79);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let res = Transport::connect("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(matches!(res, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_simulated_records_writes() {
        let bus = SimulatedBus::new();
        let mut transport = Transport::simulated(bus.clone());

        transport.command(CMD_SERVO, 23, 1000).await.unwrap();
        transport.command(CMD_SERVO, 23, PULSE_OFF).await.unwrap();

        let writes: Vec<(u32, u32)> = bus.writes().iter().map(|w| (w.pin, w.pulse_us)).collect();
        assert_eq!(writes, vec![(23, 1000), (23, 0)]);
    }

    #[tokio::test]
    async fn test_simulated_rejected_pin() {
        let bus = SimulatedBus::new();
        bus.reject_pin(24);
        let mut transport = Transport::simulated(bus.clone());

        let err = transport.command(CMD_SERVO, 24, 1000).await.unwrap_err();
        assert!(matches!(err, TransportError::Pigpio { code: -41, .. }));
        assert!(bus.writes().is_empty());
    }

    #[tokio::test]
    async fn test_simulated_disconnect() {
        let bus = SimulatedBus::new();
        let mut transport = Transport::simulated(bus.clone());
        bus.disconnect();
        assert!(matches!(
            transport.command(CMD_SERVO, 23, 1000).await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_late_reply_is_not_read_by_next_command() {
        let (port, daemon) = late_reply_daemon(Duration::from_millis(150), -7, vec![0]).await;
        let mut transport = Transport::connect("127.0.0.1", port, Duration::from_millis(100))
            .await
            .unwrap();

        let err = transport.command(CMD_SERVO, 23, 1500).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(100)), "got {:?}", err);
        assert!(!transport.is_connected());

        // the late -7 for pin 23 must not be blamed on pin 24
        assert_eq!(transport.command(CMD_SERVO, 24, 1500).await.unwrap(), 0);
        assert!(transport.is_connected());

        let frames = daemon.await.unwrap();
        assert_eq!(u32::from_le_bytes(frames[0][4..8].try_into().unwrap()), 24);
    }

    #[tokio::test]
    async fn test_mismatched_reply_drops_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 16];
            sock.read_exact(&mut req).await.unwrap();
            req[0..4].copy_from_slice(&CMD_HWVER.to_le_bytes());
            sock.write_all(&req).await.unwrap();
            // keep the socket open so only the client side can drop it
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let mut transport = Transport::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        let err = transport.command(CMD_SERVO, 17, 1500).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::MismatchedReply {
                expected: CMD_SERVO,
                actual: CMD_HWVER
            }
        ));
        assert!(!transport.is_connected());
    }
}

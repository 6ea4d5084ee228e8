use crate::{
    constants::*,
    error::{ActuationError, TransportError},
    limits::DeviceLimits,
    transport::Transport,
};
use tokio::time::Duration;

pub struct Controller {
    transport: Transport,
}

impl Controller {
    pub async fn connect(
        host: &str,
        port: u16,
        io_timeout: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Controller {
            transport: Transport::connect(host, port, io_timeout).await?,
        })
    }

    pub fn new(transport: Transport) -> Self {
        Controller { transport }
    }

    pub async fn get_pigpio_version(&mut self) -> Result<u32, TransportError> {
        self.transport.command(CMD_PIGPV, 0, 0).await
    }

    pub async fn get_hardware_revision(&mut self) -> Result<u32, TransportError> {
        self.transport.command(CMD_HWVER, 0, 0).await
    }

    pub async fn set_servo_pulsewidth(
        &mut self,
        pin: u32,
        pulse_us: u32,
    ) -> Result<(), TransportError> {
        tracing::debug!("Pin {} pulse width -> {}us", pin, pulse_us);
        self.transport.command(CMD_SERVO, pin, pulse_us).await?;
        Ok(())
    }

    pub async fn servo_off(&mut self, pin: u32) -> Result<(), TransportError> {
        self.set_servo_pulsewidth(pin, PULSE_OFF).await
    }

    /// Drives `pin` to `angle`, holds it for `duration_ms`, then stops the pulses.
    ///
    /// The hold is part of the command: the caller stays suspended for the
    /// whole duration and nothing else may drive the bus meanwhile. Returns
    /// the pulse width that was applied.
    pub async fn actuate(
        &mut self,
        limits: &DeviceLimits,
        pin: u32,
        angle: f64,
        duration_ms: u64,
    ) -> Result<u32, ActuationError> {
        let pulse_us = limits.angle_to_pulsewidth(angle);
        if let Err(source) = self.set_servo_pulsewidth(pin, pulse_us).await {
            // a timed-out set may still have reached the daemon
            if let Err(e) = self.servo_off(pin).await {
                tracing::warn!("Could not release pin {} after failed set: {}", pin, e);
            }
            return Err(ActuationError { pin, source });
        }

        tracing::debug!("Holding pin {} for {}ms", pin, duration_ms);
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;

        self.servo_off(pin)
            .await
            .map_err(|source| ActuationError { pin, source })?;
        Ok(pulse_us)
    }
}

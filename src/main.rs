use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use servo_bridge::config::ServerArgs;
use servo_bridge::constants::RPC_PATH;
use servo_bridge::limits::DeviceLimits;
use servo_bridge::{rpc, Backend, Controller, Orchestrator, SimulatedBus, Transport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn open_backend(args: &ServerArgs, limits: &DeviceLimits) -> Backend {
    if args.simulate {
        tracing::warn!("Running against a simulated bus; no servo will move");
        return Backend::Available(Controller::new(Transport::simulated(SimulatedBus::new())));
    }

    let connected =
        Controller::connect(&args.pigpio_host, args.pigpio_port, args.pigpio_timeout()).await;
    let mut controller = match connected {
        Ok(controller) => controller,
        Err(e) => {
            tracing::warn!(
                "Failed to connect to pigpio daemon at {}:{}: {}",
                args.pigpio_host,
                args.pigpio_port,
                e
            );
            tracing::warn!("Ensure pigpiod is running (e.g. sudo systemctl start pigpiod)");
            tracing::warn!("Serving anyway; every batch will report the backend as unavailable");
            return Backend::Unavailable {
                reason: "pigpio daemon not connected".to_string(),
            };
        }
    };

    if let Ok(version) = controller.get_pigpio_version().await {
        tracing::info!("Connected to pigpio daemon (version {})", version);
    }
    if let Ok(revision) = controller.get_hardware_revision().await {
        tracing::info!("Hardware revision: {:x}", revision);
    }
    tracing::info!("Controlling servos on BCM pins: {:?}", limits.allowed_pins);
    tracing::info!(
        "Pins {:?} have their angles capped at {} degrees",
        limits.capped_pins,
        limits.angle_cap
    );
    Backend::Available(controller)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "servo_bridge=info,servo_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ServerArgs::parse();
    let limits = args.device_limits().context("invalid device limits")?;
    let addr = args.bind_addr().context("invalid bind address")?;

    let backend = open_backend(&args, &limits).await;
    let orchestrator = Arc::new(Orchestrator::new(limits, backend));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Servo RPC server listening on http://{}{}", addr, RPC_PATH);

    rpc::serve(listener, orchestrator).await?;
    Ok(())
}

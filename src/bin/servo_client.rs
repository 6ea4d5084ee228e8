use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use servo_bridge::constants::DEFAULT_SERVER_PORT;
use servo_bridge::rpc::{ClientOptions, RpcClient};
use servo_bridge::{ClientError, Command, Status};
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "servo_client")]
#[command(version)]
#[command(about = "Sends a batch of servo commands to a servo server", long_about = None)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "SERVO_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_SERVER_PORT, env = "SERVO_PORT")]
    port: u16,

    /// JSON file holding the command list
    #[arg(short, long, conflicts_with = "commands")]
    file: Option<PathBuf>,

    /// Inline JSON command list, e.g. '[{"pin":23,"angle":45}]'
    #[arg(short, long)]
    commands: Option<String>,

    /// Give up on the call after this many seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

fn read_batch(args: &Args) -> anyhow::Result<Vec<Command>> {
    let raw = match (&args.file, &args.commands) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(inline)) => inline.clone(),
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read commands from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("commands must be a JSON list of {pin, angle, duration_ms?}")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "servo_bridge=warn,servo_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let commands = read_batch(&args)?;
    tracing::info!("Sending {} command(s) to {}:{}", commands.len(), args.host, args.port);

    let options = ClientOptions {
        request_timeout: Duration::from_secs(args.timeout_secs),
        ..ClientOptions::default()
    };

    let outcome = async {
        let mut client = RpcClient::connect(&args.host, args.port, options).await?;
        let results = client.execute_servo_commands(&commands).await;
        client.close().await;
        results
    }
    .await;

    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            if let ClientError::Http { status: 404, .. } = e {
                tracing::error!("Check the server address and path");
            }
            return Err(e).context("no results received");
        }
    };

    let mut failures = 0;
    for result in &results {
        let pin = result.pin.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());
        if result.status == Status::Error {
            failures += 1;
        }
        println!("pin {:>3} [{}] {}", pin, result.status, result.message);
    }

    if failures > 0 {
        tracing::warn!("{} of {} command(s) failed", failures, results.len());
    }
    Ok(())
}

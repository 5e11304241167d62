use anyhow::Result;
use battebridge::{BatterySession, BleTransport, Bridge, Publisher};
use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command()]
struct Args {
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Advertised name of the BMS to bridge
    #[arg(long, value_name = "NAME")]
    device_name: String,

    /// Prefix of every published topic
    #[arg(long, default_value = "battery")]
    topic_prefix: String,

    /// Battery state poll period in milliseconds
    #[arg(long, default_value_t = 5000)]
    battery_period_ms: u64,

    /// Cell voltages poll period in milliseconds
    #[arg(long, default_value_t = 60000)]
    cell_period_ms: u64,
}

/// Prints each telemetry record to stdout. Stands in for the real publish
/// channel, which lives outside this crate behind [`Publisher`].
struct StdoutPublisher;

impl Publisher for StdoutPublisher {
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        println!("{topic} {payload}");
        Ok(())
    }
}

async fn bridge_device(args: &Args) -> Result<()> {
    let transport = BleTransport::new().await?;
    let mut session = BatterySession::new(transport, &args.device_name);
    let messages = session.subscribe();
    session.start_reading_battery_state(Duration::from_millis(args.battery_period_ms));
    session.start_reading_cell_state(Duration::from_millis(args.cell_period_ms));

    let bridge = Bridge::new(StdoutPublisher, &args.topic_prefix, messages);
    let _bridge_task = tokio::spawn(bridge.run());

    loop {
        session.start().await?;
        session.request_battery_info().await?;
        session.run().await?;
        if !session.wants_connection() {
            return Ok(());
        }
        warn!("device link lost, scanning again");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(args.log_level)
            .finish(),
    )?;

    tokio::select! {
        result = bridge_device(&args) => result,
        _ = signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}

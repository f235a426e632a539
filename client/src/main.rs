use clap::Parser;
use client::network::{Client, LinkSimulation};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds (round trip)
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Simulate packet loss, 0.0 to 1.0 per direction
    #[arg(long, default_value = "0.0")]
    packet_loss: f64,

    /// Render frames per second
    #[arg(short = 'f', long, default_value = "60")]
    frame_rate: u32,

    /// Seed for the bot script and shot variance
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Stop after this many seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    if args.packet_loss > 0.0 {
        info!("Simulating {:.0}% packet loss", args.packet_loss * 100.0);
    }

    let link = LinkSimulation {
        fake_ping_ms: args.fake_ping,
        packet_loss: args.packet_loss,
    };
    let mut client = Client::new(&args.server, link, args.frame_rate, args.seed).await?;

    tokio::select! {
        result = client.run(args.duration.map(Duration::from_secs)) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

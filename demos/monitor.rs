use fourheat::{FourHeatClient, ReadCommand};
use std::env;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> fourheat::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(code) = args.get(1) else {
        eprintln!("usage: monitor <device-code> [ip] [--legacy]");
        eprintln!("cloud login is read from FOURHEAT_USER, FOURHEAT_PASSWORD and FOURHEAT_PIN");
        std::process::exit(2);
    };
    let ip = args.get(2).filter(|a| !a.starts_with("--"));
    let legacy = args.iter().any(|a| a == "--legacy");

    let mut builder = FourHeatClient::builder(code)
        .credentials(
            env::var("FOURHEAT_USER").unwrap_or_default(),
            env::var("FOURHEAT_PASSWORD").unwrap_or_default(),
        )
        .pin(env::var("FOURHEAT_PIN").unwrap_or_default())
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_snapshot(|snap| {
            println!(
                "[{}] {} | room {}\u{00b0}C | target {}\u{00b0}C{}",
                snap.name,
                snap.state_description(),
                snap.room_temperature,
                snap.target_temperature,
                if snap.is_error() {
                    format!(" | error {}: {}", snap.error_code, snap.error_description())
                } else {
                    String::new()
                },
            );
        });

    if let Some(ip) = ip {
        builder = builder.ip(ip);
    }
    if legacy {
        builder = builder.read_command(ReadCommand::Legacy);
    }

    let mut client = builder.build()?;

    if let Err(e) = client.load_file_map().await {
        eprintln!("File map unavailable, using built-in tables: {e}");
    }

    println!("Polling every {}s...", POLL_INTERVAL.as_secs());
    loop {
        if let Err(e) = client.refresh().await {
            eprintln!("Refresh failed: {e}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

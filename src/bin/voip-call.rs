//! Voice Call Application
//!
//! Dials the configured server, streams the microphone to it and plays
//! back what it sends until Enter is pressed or the far end hangs up.
//!
//! Usage: `voip-call [host:port] [--config <path>] [--debug]`

use anyhow::{bail, Context, Result};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voip_call_client::{
    audio::{list_devices, CpalBackend},
    config::parse_destination,
    AppConfig, CallSession,
};

#[derive(Debug, Default)]
struct Args {
    destination: Option<String>,
    config_path: Option<PathBuf>,
    debug: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config needs a path")?;
                args.config_path = Some(PathBuf::from(path));
            }
            "--debug" | "-d" => args.debug = true,
            other if other.starts_with('-') => bail!("unknown option: {}", other),
            other => {
                if args.destination.is_some() {
                    bail!("unexpected argument: {}", other);
                }
                args.destination = Some(other.to_string());
            }
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let mut config = match &args.config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load_or_default().context("failed to load config")?,
    };
    if let Some(destination) = &args.destination {
        let (address, port) = parse_destination(destination)?;
        config.call.address = address;
        config.call.port = port;
    }
    config.call.debug |= args.debug;

    // Initialize logging
    let default_level = if config.call.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voice call client");

    if config.call.debug {
        for device in list_devices() {
            tracing::debug!(
                "Audio device {} ({}{}){}",
                device.name,
                if device.is_input { "in" } else { "" },
                if device.is_output { "out" } else { "" },
                if device.is_default { " [default]" } else { "" }
            );
        }
    }

    let session_config = config.session_config()?;
    let backend = CpalBackend::from_config(&config.audio);
    let mut session = CallSession::new(session_config, backend)?;

    session.start_call()?;
    println!(
        "Call {} connected to {}. Press Enter to hang up.",
        session.call_id(),
        session.config().destination()
    );

    let hangup = session.hangup_handle();
    thread::Builder::new()
        .name("stdin-hangup".to_string())
        .spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            hangup.hangup();
        })?;

    while session.wait_for_end(Duration::from_secs(1)).is_none() {}
    session.end_call();

    if let Some(report) = session.report() {
        println!("\n=== Call Report ===");
        println!("  Call ID:      {}", report.call_id);
        println!("  Destination:  {}", report.destination);
        println!("  Started:      {}", report.started_at.to_rfc3339());
        println!("  Duration:     {:.1}s", report.duration().as_secs_f64());
        println!("  Ended by:     {}", report.reason);
        if let Some(delivered) = report.identity_delivered {
            println!("  Identity:     {}", if delivered { "sent" } else { "failed" });
        }
        println!(
            "  Sent:         {} frames ({} bytes)",
            report.stats.frames_sent, report.stats.bytes_sent
        );
        println!(
            "  Received:     {} frames ({} bytes)",
            report.stats.frames_received, report.stats.bytes_received
        );
        if report.stats.capture_warnings > 0 || report.stats.short_reads > 0 {
            println!(
                "  Capture:      {} warnings, {} short reads",
                report.stats.capture_warnings, report.stats.short_reads
            );
        }
    }

    Ok(())
}

//! pingback-client: manual test client for the echo protocol.
//!
//! Connects to a running server, sends a fixed set of messages and checks
//! each one comes back unchanged, then optionally forwards lines typed on
//! stdin until `quit` or end of input.

use clap::Parser;
use std::io::{self, BufRead, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

const SUITE: &[&str] = &[
    "Hello, Server!",
    "This is a test message",
    "12345",
    "Special chars: !@#$%^&*()",
    "Unicode: 🚀🌟🎮",
];

/// Command-line arguments for the test client
#[derive(Parser, Debug)]
#[command(name = "pingback-client")]
#[command(version = "0.1.0")]
#[command(about = "Echo test client for pingback", long_about = None)]
struct ClientArgs {
    /// Server address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Run the echo suite only, skip interactive mode
    #[arg(long)]
    no_interactive: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut stream = TcpStream::connect((args.host.as_str(), args.port))?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    info!(host = %args.host, port = args.port, "Connected to server");

    let failures = run_suite(&mut stream)?;
    if failures > 0 {
        warn!(failures, "Echo suite finished with failures");
    } else {
        info!("Echo suite passed");
    }

    if !args.no_interactive {
        run_interactive(&mut stream)?;
    }

    info!("Disconnected from server");
    if failures > 0 {
        return Err(format!("{failures} echo checks failed").into());
    }
    Ok(())
}

/// Send each suite message and compare the echo. Returns the failure count.
fn run_suite(stream: &mut TcpStream) -> io::Result<usize> {
    let mut failures = 0;

    for &sent in SUITE {
        stream.write_all(sent.as_bytes())?;

        let mut echoed = vec![0u8; sent.len()];
        match stream.read_exact(&mut echoed) {
            Ok(()) if echoed == sent.as_bytes() => {
                info!(sent, "Echo test passed");
            }
            Ok(()) => {
                failures += 1;
                warn!(
                    expected = sent,
                    got = %String::from_utf8_lossy(&echoed),
                    "Echo test failed"
                );
            }
            Err(e) => {
                failures += 1;
                warn!(sent, error = %e, "No echo received");
            }
        }
    }

    Ok(failures)
}

/// Forward stdin lines to the server and print whatever comes back.
fn run_interactive(stream: &mut TcpStream) -> io::Result<()> {
    println!("Enter messages to send (type 'quit' to exit):");

    let mut buffer = [0u8; 1024];
    for line in io::stdin().lock().lines() {
        let line = line?;
        if line == "quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        stream.write_all(line.as_bytes())?;

        match stream.read(&mut buffer) {
            Ok(n) if n > 0 => println!("{}", String::from_utf8_lossy(&buffer[..n])),
            Ok(_) => {
                warn!("Server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "No response received from server");
                break;
            }
        }
    }

    Ok(())
}

//! ticknet CLI Client
//!
//! Sends framed messages to a ticknet server and prints the tick updates
//! that come back.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::process;
use std::time::Duration;

use clap::Parser;
use ticknet::protocol::{decode_tick_update, read_frame, write_frame};

/// ticknet CLI
#[derive(Parser, Debug)]
#[command(name = "ticknet-cli")]
#[command(about = "CLI for ticknet servers")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    server: String,

    /// Number of tick updates to wait for
    #[arg(short, long, default_value = "1")]
    updates: usize,

    /// Give up waiting after this many milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Messages to send, one frame each
    messages: Vec<String>,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args) -> ticknet::Result<()> {
    let stream = TcpStream::connect(&args.server)?;
    stream.set_read_timeout(Some(Duration::from_millis(args.timeout_ms)))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    for message in &args.messages {
        write_frame(&mut writer, message.as_bytes())?;
    }

    for _ in 0..args.updates {
        let body = read_frame(&mut reader)?;
        let update = decode_tick_update(&body)?;
        println!(
            "tick {}: {}",
            update.tick,
            String::from_utf8_lossy(&update.payload)
        );
    }

    Ok(())
}

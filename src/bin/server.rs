//! ticknet Server Binary
//!
//! Demonstration driver: echoes every frame a client sends back to it in
//! the next tick update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use parking_lot::Mutex;
use ticknet::logging::{self, LogConfig};
use ticknet::{Config, Connection, Listener, Logger, TickConnection};

/// ticknet Server
#[derive(Parser, Debug)]
#[command(name = "ticknet-server")]
#[command(about = "Tick-driven TCP server with per-tick update batching")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7777")]
    listen: String,

    /// Milliseconds between ticks
    #[arg(short, long, default_value = "50")]
    tick_ms: u64,

    /// Stop accepting and exit after this many seconds
    #[arg(long)]
    run_for_secs: Option<u64>,

    /// Human readable multi-line logs
    #[arg(long)]
    pretty: bool,
}

type Registry<C = Connection> = Arc<Mutex<HashMap<String, Arc<C>>>>;

fn main() {
    let args = Args::parse();

    logging::init(&LogConfig {
        pretty: args.pretty,
        ..LogConfig::default()
    });
    let logger = Logger::service("ticknet-server", ticknet::VERSION);

    let config = Config::builder()
        .listen_addr(&args.listen)
        .tick_interval_ms(args.tick_ms)
        .build();
    if let Err(e) = config.validate() {
        logger.with_error(&e).fatal("Invalid configuration");
    }

    let listener = Arc::new(Listener::new(config.clone(), logger.clone()));
    let (accept_thread, addr) = match listener.spawn() {
        Ok(spawned) => spawned,
        Err(e) => logger.with_error(&e).fatal("Failed to start listener"),
    };
    logger.info(&format!("Serving on {}", addr));

    let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
    let running = Arc::new(AtomicBool::new(true));

    let tick_thread = {
        let registry = Arc::clone(&registry);
        let running = Arc::clone(&running);
        let interval = config.tick_interval();
        thread::spawn(move || run_ticks(registry, running, interval))
    };

    if let Some(secs) = args.run_for_secs {
        let listener = Arc::clone(&listener);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            listener.stop();
        });
    }

    // Loop ends when the listener stops and the channel disconnects
    for conn in listener.connections().iter() {
        register(&registry, Arc::new(conn));
    }

    match accept_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => logger.with_error(&e).error("Accept loop failed"),
        Err(_) => logger.error("Accept thread panicked"),
    }

    let open: Vec<Arc<Connection>> = registry.lock().values().cloned().collect();
    for conn in open {
        conn.close_logged();
    }

    running.store(false, Ordering::SeqCst);
    let _ = tick_thread.join();

    logger.info("Server stopped");
}

/// Track a new connection and start its reader thread
fn register(registry: &Registry, conn: Arc<Connection>) {
    conn.logger().info("Connection registered");
    registry.lock().insert(conn.id().to_string(), Arc::clone(&conn));

    {
        let registry = Arc::clone(registry);
        let id = conn.id().to_string();
        conn.on_close(move || {
            registry.lock().remove(&id);
        });
    }

    thread::spawn(move || read_loop(conn));
}

/// Echo every received frame into the update buffer until the peer leaves
fn read_loop(conn: Arc<Connection>) {
    loop {
        match conn.read_message() {
            Ok(body) if conn.is_closed() => {
                if !body.is_empty() {
                    conn.logger().debug("Discarding frame read after close");
                }
                break;
            }
            Ok(body) => conn.buffer_update(&body),
            Err(e) => {
                conn.logger().with_error(&e).debug("Read failed");
                break;
            }
        }
    }
    conn.close_logged();
}

/// Flush every live connection once per tick
fn run_ticks<C>(registry: Registry<C>, running: Arc<AtomicBool>, interval: Duration)
where
    C: TickConnection + ?Sized,
{
    let mut tick: u32 = 0;
    let mut next = Instant::now();

    while running.load(Ordering::SeqCst) {
        let live: Vec<Arc<C>> = registry.lock().values().cloned().collect();
        for conn in live {
            conn.flush(tick);
        }

        tick = tick.wrapping_add(1);
        next += interval;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}

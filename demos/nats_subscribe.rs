//! NATS subscriber over WebSocket.
//!
//! Demonstrates:
//! - Subscribing with a wildcard subject
//! - Publishing from a timer
//! - Request/reply: the echo subscriber answers on the reply subject
//! - Driving the connection from a `Queue`
//!
//! Needs a NATS server with the websocket listener enabled
//! (`websocket { port: 8080, no_tls: true }`).
//!
//! Usage:
//!   cargo run --example nats_subscribe
//!   cargo run --example nats_subscribe -- ws://127.0.0.1:8080 --seconds 10
//!   cargo run --example nats_subscribe -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use common::Args;
use websocket_queue::{ConnectionOptions, NatsDriver, Queue};

// ============================================================================
// Main
// ============================================================================

fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args) {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    println!("=== NATS Subscribe ===\n");

    let url = args.url_or("ws://127.0.0.1:8080");
    println!("[1] Connecting to {url}...");

    let options = ConnectionOptions::new(&url).with_connect_timeout(Duration::from_secs(5));
    let nats = Rc::new(RefCell::new(NatsDriver::open(options)));

    // ========================================================================
    // Subscriptions
    // ========================================================================

    let received = Rc::new(Cell::new(0u32));
    {
        let mut driver = nats.borrow_mut();
        driver.on_connect(|| println!("    ✓ Connected\n"));
        driver.on_error(|reason| eprintln!("    ✗ Server error: {reason}"));

        let counter = Rc::clone(&received);
        let sid = driver.subscribe("demo.>", None, move |msg| {
            counter.set(counter.get() + 1);
            println!("    <- {} [{}]: {}", msg.subject, msg.sid, msg.text());
        });
        println!("[2] Subscribed to demo.> (sid {sid})");

        driver.subscribe_with_outbox("demo.echo", Some("echoers"), |msg, outbox| {
            if let Some(reply_to) = &msg.reply_to {
                println!("    echo request, replying on {reply_to}");
                outbox.publish(reply_to, &msg.payload);
            }
        });

        driver.publish_with_reply("demo.echo", "demo.replies", "hello?");
    }

    // ========================================================================
    // Publisher timer
    // ========================================================================

    let publisher = Rc::clone(&nats);
    let sequence = Rc::new(Cell::new(0u32));
    let outbox = Rc::new(RefCell::new(Vec::new()));
    {
        let outbox = Rc::clone(&outbox);
        nats.borrow_mut().register_timer(
            move || {
                let n = sequence.get() + 1;
                sequence.set(n);
                outbox.borrow_mut().push(format!("tick {n}"));
            },
            Duration::from_secs(1),
        );
    }

    // ========================================================================
    // Run
    // ========================================================================

    println!("[3] Running (Ctrl+C to stop)...\n");
    let limit = args.duration();
    let mut queue = Queue::new();
    queue.register(Rc::clone(&nats));

    queue
        .run(|started| {
            for body in outbox.borrow_mut().drain(..) {
                publisher.borrow_mut().publish("demo.ticks", body);
            }
            limit.is_none_or(|limit| started.elapsed() < limit)
        })
        .context("queue stopped")?;

    println!("\n    Received {} messages", received.get());
    nats.borrow_mut().close().context("close failed")?;
    Ok(())
}

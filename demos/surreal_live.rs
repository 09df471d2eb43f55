//! SurrealDB live query over WebSocket.
//!
//! Demonstrates:
//! - Version negotiation on connect
//! - Blocking `signin` / `use`
//! - Live query with change callbacks
//! - Writing records from a timer while the live query streams changes
//!
//! Needs a SurrealDB server (`surreal start --user root --pass root`).
//!
//! Usage:
//!   cargo run --example surreal_live
//!   cargo run --example surreal_live -- ws://127.0.0.1:8000/rpc --seconds 10
//!   cargo run --example surreal_live -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use common::Args;
use serde_json::json;
use websocket_queue::{ConnectionOptions, Queue, SurrealDriver};

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
    println!("=== SurrealDB Live Query ===\n");

    let url = args.url_or("ws://127.0.0.1:8000/rpc");
    println!("[1] Connecting to {url}...");

    let options = ConnectionOptions::new(&url).with_request_timeout(Duration::from_secs(10));
    let mut surreal = SurrealDriver::connect(options).context("connect failed")?;
    match surreal.server_version() {
        Some(version) => println!("    ✓ Server version {version}\n"),
        None => println!("    ✓ Server version unknown\n"),
    }

    // ========================================================================
    // Session
    // ========================================================================

    println!("[2] Signing in...");
    surreal.use_namespace("demo", "demo");
    surreal
        .signin(json!({"user": "root", "pass": "root"}))
        .on_reply(|_, error| match error {
            Some(error) => println!("    ✗ signin: {error}"),
            None => println!("    ✓ Signed in"),
        });
    surreal.exec(true).context("signin failed")?;

    // ========================================================================
    // Live query
    // ========================================================================

    println!("\n[3] Starting live query on `person`...");
    let changes = Rc::new(Cell::new(0u32));
    {
        let changes = Rc::clone(&changes);
        surreal
            .live_query("SELECT * FROM person", None)
            .on_change(move |action, record| {
                changes.set(changes.get() + 1);
                println!("    <- {action}: {record}");
            });
    }

    let surreal = Rc::new(RefCell::new(surreal));

    // ========================================================================
    // Writer timer
    // ========================================================================

    let pending = Rc::new(Cell::new(0u32));
    {
        let pending = Rc::clone(&pending);
        surreal.borrow_mut().on_timer(move || pending.set(pending.get() + 1));
    }

    // ========================================================================
    // Run
    // ========================================================================

    println!("[4] Running (Ctrl+C to stop)...\n");
    let limit = args.duration();
    let writer = Rc::clone(&surreal);
    let mut created = 0u32;
    let mut queue = Queue::new();
    queue.register(Rc::clone(&surreal));

    queue
        .run(|started| {
            while pending.get() > 0 {
                pending.set(pending.get() - 1);
                created += 1;
                writer
                    .borrow_mut()
                    .query("CREATE person SET n = $n", Some(json!({ "n": created })));
            }
            limit.is_none_or(|limit| started.elapsed() < limit)
        })
        .context("queue stopped")?;

    println!("\n    Created {created} records, saw {} changes", changes.get());
    surreal.borrow_mut().close().context("close failed")?;
    Ok(())
}

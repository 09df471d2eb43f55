//! Cooperative scheduler over many drivers.
//!
//! Each tick runs one non-blocking [`Exec::exec`] on every registered driver,
//! in registration order, then sleeps for what remains of the minimum tick.
//!
//! ```text
//! run(stop):
//!   loop
//!     for driver in drivers: driver.exec(false)
//!     if !stop(started): return
//!     sleep(max(0, min_tick - tick_elapsed))
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use websocket_queue::{ConnectionOptions, NatsDriver, Queue, Result};
//!
//! # fn example() -> Result<()> {
//! let nats = Rc::new(RefCell::new(NatsDriver::open(ConnectionOptions::new(
//!     "ws://127.0.0.1:8080",
//! ))));
//! nats.borrow_mut()
//!     .subscribe("greet", None, |msg| println!("{}", msg.text()));
//!
//! let mut queue = Queue::new();
//! queue.register(Rc::clone(&nats));
//! queue.run_forever()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::driver::Exec;
use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Default minimum tick length.
pub const DEFAULT_MIN_TICK: Duration = Duration::from_micros(1_000);

// ============================================================================
// Queue
// ============================================================================

/// Round-robin scheduler of registered drivers.
///
/// Drivers are shared with the application through `Rc<RefCell<_>>`, so new
/// requests can be queued between ticks and from the `run` predicate. A
/// driver is mutably borrowed while its callbacks run; callbacks queue
/// follow-up work through the outbox their protocol hands them
/// ([`nats::Outbox`](crate::driver::nats::Outbox),
/// [`surreal::Outbox`](crate::driver::surreal::Outbox)).
pub struct Queue {
    /// Drivers in registration order.
    drivers: Vec<Rc<RefCell<dyn Exec>>>,
    /// Minimum duration of one tick.
    min_tick: Duration,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("drivers", &self.drivers.len())
            .field("min_tick", &self.min_tick)
            .finish()
    }
}

impl Queue {
    /// Creates an empty queue with the default 1 ms minimum tick.
    #[must_use]
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
            min_tick: DEFAULT_MIN_TICK,
        }
    }

    /// Sets the minimum tick length.
    #[must_use]
    pub fn with_min_tick(mut self, min_tick: Duration) -> Self {
        self.min_tick = min_tick;
        self
    }

    /// Returns the minimum tick length.
    #[inline]
    #[must_use]
    pub fn min_tick(&self) -> Duration {
        self.min_tick
    }

    /// Returns the number of registered drivers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Returns `true` if no driver is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Appends a driver and returns it.
    pub fn register<D>(&mut self, driver: Rc<RefCell<D>>) -> Rc<RefCell<D>>
    where
        D: Exec + 'static,
    {
        let shared: Rc<RefCell<dyn Exec>> = driver.clone();
        self.drivers.push(shared);
        debug!(drivers = self.drivers.len(), "Driver registered");
        driver
    }

    /// Runs one non-blocking step of every driver, without sleeping.
    ///
    /// # Errors
    ///
    /// The first driver error; later drivers are not stepped in that tick.
    pub fn tick(&mut self) -> Result<()> {
        for driver in &self.drivers {
            driver.borrow_mut().exec(false)?;
        }
        Ok(())
    }

    /// Ticks until `keep_running` returns `false`.
    ///
    /// `keep_running` receives the instant `run` started and is evaluated
    /// after every tick.
    ///
    /// # Errors
    ///
    /// The first driver error aborts the loop.
    pub fn run<F>(&mut self, mut keep_running: F) -> Result<()>
    where
        F: FnMut(Instant) -> bool,
    {
        let started = Instant::now();
        let mut ticks: u64 = 0;

        loop {
            let tick_started = Instant::now();
            self.tick()?;
            ticks += 1;

            if !keep_running(started) {
                debug!(ticks, elapsed_ms = started.elapsed().as_millis() as u64, "Queue stopped");
                return Ok(());
            }

            if let Some(rest) = self.min_tick.checked_sub(tick_started.elapsed()) {
                trace!(rest_us = rest.as_micros() as u64, "Queue idle");
                thread::sleep(rest);
            }
        }
    }

    /// Ticks until a driver fails.
    ///
    /// # Errors
    ///
    /// The driver error that stopped the loop.
    pub fn run_forever(&mut self) -> Result<()> {
        self.run(|_| true)
    }
}

// ============================================================================
// Tests
// ============================================================================

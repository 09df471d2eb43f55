//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing_subscriber::EnvFilter;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
#[derive(Debug, Clone)]
pub struct Args {
    /// Server URL, first positional argument.
    pub url: Option<String>,
    pub debug: bool,
    /// Stop after this many seconds instead of running forever.
    pub seconds: Option<u64>,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Self {
        let mut parsed = Self {
            url: None,
            debug: false,
            seconds: None,
        };

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--debug" => parsed.debug = true,
                "--seconds" => parsed.seconds = args.next().and_then(|v| v.parse().ok()),
                _ => parsed.url = Some(arg),
            }
        }
        parsed
    }

    /// Returns the URL argument or `default`.
    pub fn url_or(&self, default: &str) -> String {
        self.url.clone().unwrap_or_else(|| default.to_string())
    }

    /// Returns the run duration, if bounded.
    pub fn duration(&self) -> Option<Duration> {
        self.seconds.map(Duration::from_secs)
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "websocket_queue=trace"
    } else {
        "websocket_queue=info"
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

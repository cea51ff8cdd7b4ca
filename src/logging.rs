//! Tracing setup for rpctl.
//!
//! Everything is logged to stderr; stdout only carries the per-device report
//! so it can be piped. Pass `--json-logs` for one JSON object per line.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    pub json: bool,
    /// DEBUG instead of INFO for rpctl's own targets
    pub verbose: bool,
}

impl LogConfig {
    /// `RUST_LOG` wins over the verbosity flag, e.g. `RUST_LOG=rpctl=trace`
    /// also shows request and response bodies when body logging is on.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }

    fn default_directive(&self) -> String {
        let level = if self.verbose { Level::DEBUG } else { Level::INFO };
        format!("rpctl={}", level.as_str().to_lowercase())
    }
}

/// Install the global subscriber. Call once, after config is loaded.
pub fn init(config: LogConfig) {
    let output = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(output.with_filter(config.filter()))
        .init();
}

/// Lets a repeated log line through at most once per interval.
///
/// ```ignore
/// let throttle = LogThrottle::new(Duration::from_secs(10));
/// loop {
///     if throttle.should_log() {
///         tracing::info!(remaining, "Waiting for backups to finish");
///     }
/// }
/// ```
pub struct LogThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn should_log(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if now.duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

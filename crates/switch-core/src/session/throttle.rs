//! Sessions-per-second throttle over a rolling one second window

use crate::errors::{Result, SwitchError};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
    last: u32,
    peak: u32,
}

/// Admits at most `sps` sessions per window. Callers over the limit wait for
/// the next window instead of being rejected, up to a bounded wait.
#[derive(Debug)]
pub(crate) struct Throttle {
    window: Mutex<Window>,
}

impl Throttle {
    pub(crate) fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
                last: 0,
                peak: 0,
            }),
        }
    }

    fn try_admit(&self, sps: u32) -> std::result::Result<(), Instant> {
        let now = Instant::now();
        let mut window = self.window.lock();
        if now.duration_since(window.started) >= WINDOW {
            window.last = window.count;
            window.started = now;
            window.count = 0;
        } else if window.count == 0 {
            // An empty window opens at its first admission
            window.started = now;
        }
        if window.count < sps {
            window.count += 1;
            if window.count > window.peak {
                window.peak = window.count;
            }
            Ok(())
        } else {
            Err(window.started + WINDOW)
        }
    }

    /// Wait for a slot. `sps == 0` disables throttling.
    pub(crate) async fn admit(&self, sps: u32, max_wait: Duration) -> Result<()> {
        if sps == 0 {
            return Ok(());
        }
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_admit(sps) {
                Ok(()) => return Ok(()),
                Err(next_window) => {
                    if next_window > deadline {
                        debug!(sps, "Session rate limit wait exhausted");
                        return Err(SwitchError::RateLimited { sps });
                    }
                    tokio::time::sleep_until(next_window).await;
                }
            }
        }
    }

    /// Sessions admitted in the last completed window
    pub(crate) fn last(&self) -> u32 {
        let window = self.window.lock();
        if Instant::now().duration_since(window.started) >= WINDOW {
            window.count
        } else {
            window.last
        }
    }

    pub(crate) fn peak(&self) -> u32 {
        self.window.lock().peak
    }

    pub(crate) fn reset_peak(&self) {
        let mut window = self.window.lock();
        window.peak = window.count;
    }
}

//! The `soft` timer: media pacing from the tokio clock

use crate::errors::{Result, SwitchError};
use crate::interface::{Module, ModuleInterfaces, TimerHandle, TimerInterface};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

pub struct SoftTimer;

impl TimerInterface for SoftTimer {
    fn name(&self) -> &str {
        "soft"
    }

    fn create(&self, interval: Duration, samples: u32) -> Result<Box<dyn TimerHandle>> {
        if interval.is_zero() {
            return Err(SwitchError::Config("timer interval must be non-zero".to_string()));
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Box::new(SoftTimerHandle {
            ticker,
            samples,
            ticks: 0,
            started: false,
        }))
    }
}

struct SoftTimerHandle {
    ticker: Interval,
    samples: u32,
    ticks: u64,
    started: bool,
}

#[async_trait]
impl TimerHandle for SoftTimerHandle {
    async fn next(&mut self) -> Result<()> {
        if !self.started {
            // The first tick of a tokio interval completes at once
            self.ticker.tick().await;
            self.started = true;
        }
        self.ticker.tick().await;
        self.ticks += 1;
        Ok(())
    }

    fn ticks(&self) -> u64 {
        self.ticks
    }

    fn samplecount(&self) -> u64 {
        self.ticks * u64::from(self.samples)
    }
}

pub struct TimerModule;

#[async_trait]
impl Module for TimerModule {
    fn name(&self) -> &str {
        "core_timer"
    }

    async fn load(&self, interfaces: &mut ModuleInterfaces) -> Result<()> {
        interfaces.add_timer(Arc::new(SoftTimer));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_soft_timer_paces() {
        let mut timer = SoftTimer.create(Duration::from_millis(20), 160).unwrap();
        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            timer.next().await.unwrap();
        }
        assert_eq!(timer.ticks(), 5);
        assert_eq!(timer.samplecount(), 800);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        assert!(SoftTimer.create(Duration::ZERO, 160).is_err());
    }
}

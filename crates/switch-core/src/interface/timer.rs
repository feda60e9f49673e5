use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Source of media pacing ticks
pub trait TimerInterface: Send + Sync {
    fn name(&self) -> &str;

    /// A timer firing every `interval`, advancing `samples` per tick
    fn create(&self, interval: Duration, samples: u32) -> Result<Box<dyn TimerHandle>>;
}

/// One running timer
#[async_trait]
pub trait TimerHandle: Send {
    /// Wait for the next tick
    async fn next(&mut self) -> Result<()>;

    /// Ticks elapsed so far
    fn ticks(&self) -> u64;

    fn samplecount(&self) -> u64;
}

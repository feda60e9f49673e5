//! Capability tables the core only dispatches through: files, speech,
//! directory, say, chat, management and limits

use crate::errors::{Result, SwitchError};
use crate::frame::Frame;
use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;

/// A media file format
#[async_trait]
pub trait FileInterface: Send + Sync {
    fn name(&self) -> &str;

    /// File extensions handled, without the dot
    fn extensions(&self) -> Vec<String>;

    async fn open(&self, path: &str, rate: u32) -> Result<Box<dyn FileHandle>>;
}

/// An open media file
#[async_trait]
pub trait FileHandle: Send {
    /// Next frame; `None` at end of file
    async fn read(&mut self) -> Result<Option<Frame>>;

    async fn write(&mut self, _frame: &Frame) -> Result<()> {
        Err(SwitchError::not_implemented("file write"))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Speech recognition
#[async_trait]
pub trait AsrInterface: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize `frames` against `grammar`, returning the result text
    async fn recognize(&self, grammar: &str, frames: &[Frame]) -> Result<String>;
}

/// Text to speech
#[async_trait]
pub trait SpeechInterface: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, voice: &str, text: &str, rate: u32) -> Result<Vec<Frame>>;
}

/// Directory lookups
#[async_trait]
pub trait DirectoryInterface: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, base: &str, filter: &str) -> Result<Vec<(String, String)>>;
}

/// Locale-aware reading of numbers, dates and the like
#[async_trait]
pub trait SayInterface: Send + Sync {
    fn name(&self) -> &str;

    async fn say(&self, session: &Arc<Session>, text: &str, say_type: &str, method: &str) -> Result<()>;
}

/// Text chat delivery
#[async_trait]
pub trait ChatInterface: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, from: &str, to: &str, subject: Option<&str>, body: &str) -> Result<()>;
}

/// Management agent hook (SNMP-style get/set)
#[async_trait]
pub trait ManagementInterface: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, oid: &str, action: &str, value: Option<&str>) -> Result<String>;
}

/// Resource usage limiting backend
#[async_trait]
pub trait LimitInterface: Send + Sync {
    fn name(&self) -> &str;

    /// Count one use of `realm/resource` for `session`; false when over `max`
    async fn incr(&self, session: &Arc<Session>, realm: &str, resource: &str, max: u32) -> Result<bool>;

    /// Release everything `session` holds in `realm` (all realms when `None`)
    async fn release(&self, session: &Arc<Session>, realm: Option<&str>) -> Result<()>;

    async fn usage(&self, realm: &str, resource: &str) -> Result<u32>;
}

use crate::channel::{CallerProfile, Extension};
use crate::errors::Result;
use crate::session::Session;
use async_trait::async_trait;
use std::sync::Arc;

/// A dialplan application such as `answer` or `park`
#[async_trait]
pub trait Application: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn syntax(&self) -> &str {
        ""
    }

    async fn execute(&self, session: &Arc<Session>, data: &str) -> Result<()>;
}

/// Turns a caller profile into an extension
#[async_trait]
pub trait DialplanInterface: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means this dialplan has no match; the next one is tried
    async fn hunt(
        &self,
        session: &Arc<Session>,
        profile: &CallerProfile,
        arg: Option<&str>,
    ) -> Result<Option<Extension>>;
}

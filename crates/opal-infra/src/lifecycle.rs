//! Standard component lifecycle, grounded on
//! `rvoip-infra-common::lifecycle::component::Component`.
//!
//! `Connection` (spec §4.9) and `RtpSession` (spec §4.7.5) both describe a
//! phase/state machine where phases only advance; this trait gives them a
//! common shape for init/start/pause/stop without forcing a single error
//! type across crates.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Paused,
    Stopped,
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    type Error;

    fn name(&self) -> &str;
    fn state(&self) -> LifecycleState;

    async fn start(&mut self) -> Result<(), Self::Error>;
    async fn pause(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn resume(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
    async fn stop(&mut self) -> Result<(), Self::Error>;
}

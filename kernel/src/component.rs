//! Lifecycle hooks for long-running components.

use async_trait::async_trait;

/// A component started and stopped by the host process.
///
/// Hooks run in order `init`, `start`, `destroy`; every hook has a no-op
/// default.
#[async_trait]
pub trait Component: Send + Sync {
    /// Component name used in logs.
    fn name(&self) -> &str {
        "base"
    }

    /// Prepares the component. Called once before `start`.
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Starts serving.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Releases everything acquired by `init` and `start`.
    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

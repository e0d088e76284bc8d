use crate::shutdown::ShutdownSignal;

/// Callbacks supplied by the embedding application.
pub trait ServiceHooks {
    /// Entered once per successful start (or directly for `run`). Must block
    /// until `shutdown` is requested; the orchestrator supplies no event loop.
    fn started(&mut self, shutdown: &ShutdownSignal) -> anyhow::Result<()>;

    /// Entered when the detached/hosted instance exits, whatever the cause.
    fn stopped(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn installed(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn uninstalled(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<H: ServiceHooks + ?Sized> ServiceHooks for Box<H> {
    fn started(&mut self, shutdown: &ShutdownSignal) -> anyhow::Result<()> {
        (**self).started(shutdown)
    }

    fn stopped(&mut self) -> anyhow::Result<()> {
        (**self).stopped()
    }

    fn installed(&mut self) -> anyhow::Result<()> {
        (**self).installed()
    }

    fn uninstalled(&mut self) -> anyhow::Result<()> {
        (**self).uninstalled()
    }
}

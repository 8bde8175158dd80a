//! # One-Shot Breakpoints
//!
//! RAII guard for a breakpoint that must not outlive a single wait.
//!
//! Blocking waits ("run until this process is scheduled", "run until the
//! call returns") install a temporary breakpoint, resume, and remove it. The
//! guard removes it on every exit path: explicitly through
//! [`OneShotBreakpoint::remove`], or best-effort on drop when an error or a
//! panic unwinds past it.

use tracing::{info, warn};

use crate::backend::{Backend, BackendBreakpointId, Condition, StopEvent};
use crate::error::Result;
use crate::types::Address;

/// A backend breakpoint that is deleted when the guard goes away.
///
/// ## Example
///
/// ```rust,no_run
/// use vesper_core::backend::{Backend, Condition};
/// use vesper_core::breakpoints::OneShotBreakpoint;
/// use vesper_core::types::Address;
///
/// # fn demo(backend: &mut dyn Backend) -> vesper_core::Result<()> {
/// let gate = Condition::register_equals("cr3", 0x0a9c_0000);
/// let mut once = OneShotBreakpoint::install(backend, Address::new(0x804d_b9ce), Some(gate))?;
/// let stop = once.resume()?;
/// once.remove()?;
/// println!("{stop}");
/// # Ok(())
/// # }
/// ```
pub struct OneShotBreakpoint<'a, B>
where
    B: Backend + ?Sized,
{
    backend: &'a mut B,
    id: BackendBreakpointId,
    address: Address,
    active: bool,
}

impl<'a, B> OneShotBreakpoint<'a, B>
where
    B: Backend + ?Sized,
{
    /// Install the breakpoint.
    ///
    /// ## Errors
    ///
    /// Backend errors from installing; nothing is left behind in that case.
    pub fn install(backend: &'a mut B, address: Address, condition: Option<Condition>) -> Result<Self>
    {
        let id = backend.add_breakpoint(address, condition)?;
        Ok(Self {
            backend,
            id,
            address,
            active: true,
        })
    }

    /// Backend identifier of the breakpoint.
    #[must_use]
    pub fn id(&self) -> BackendBreakpointId
    {
        self.id
    }

    /// Resume the target and wait for the next stop.
    ///
    /// ## Errors
    ///
    /// Backend errors from resuming. The breakpoint is still removed when the
    /// guard is dropped.
    pub fn resume(&mut self) -> Result<StopEvent>
    {
        self.backend.resume()
    }

    /// Read a register while the guard is held.
    ///
    /// ## Errors
    ///
    /// Backend errors from the read.
    pub fn read_register(&self, name: &str) -> Result<u64>
    {
        self.backend.read_register(name)
    }

    /// Remove the breakpoint now, reporting failure.
    ///
    /// After this call dropping the guard does nothing.
    ///
    /// ## Errors
    ///
    /// Backend errors from deleting.
    pub fn remove(mut self) -> Result<()>
    {
        if self.active {
            self.active = false;
            self.backend.delete_breakpoint(self.id)?;
        }
        Ok(())
    }
}

impl<B> Drop for OneShotBreakpoint<'_, B>
where
    B: Backend + ?Sized,
{
    fn drop(&mut self)
    {
        if self.active {
            // Best effort delete - log and move on
            if let Err(err) = self.backend.delete_breakpoint(self.id) {
                warn!(id = %self.id, address = %self.address, error = %err, "failed to remove one-shot breakpoint");
            }
        }
    }
}

/// Result of [`wait_for_context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextArrival
{
    /// Value of the translation-base register after the stop
    pub translation_base: u64,
    /// Why the target stopped
    pub stop: StopEvent,
}

/// Run until the process with `translation_base` is switched in.
///
/// Installs a one-shot breakpoint at `hook` (the instruction where the kernel
/// loads the next translation base) gated on `register == translation_base`,
/// resumes once and removes the breakpoint. The wait has no timeout; an
/// interrupt from the backend ends it early, which shows up as
/// [`StopEvent::Interrupted`] in the returned arrival.
///
/// ## Errors
///
/// Backend errors from installing, resuming, deleting or reading `register`.
pub fn wait_for_context<B>(backend: &mut B, hook: Address, register: &str, translation_base: u64) -> Result<ContextArrival>
where
    B: Backend + ?Sized,
{
    let gate = Condition::register_equals(register, translation_base);
    let mut once = OneShotBreakpoint::install(backend, hook, Some(gate))?;
    let stop = once.resume()?;
    let current = once.read_register(register)?;
    once.remove()?;

    info!(translation_base = current, %stop, "context arrived");
    Ok(ContextArrival {
        translation_base: current,
        stop,
    })
}

/// Run until `address` is reached (optionally only inside one process).
///
/// ## Errors
///
/// Backend errors from installing, resuming or deleting.
pub fn run_until<B>(backend: &mut B, address: Address, condition: Option<Condition>) -> Result<StopEvent>
where
    B: Backend + ?Sized,
{
    let mut once = OneShotBreakpoint::install(backend, address, condition)?;
    let stop = once.resume()?;
    once.remove()?;
    Ok(stop)
}

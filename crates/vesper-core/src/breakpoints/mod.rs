//! # Process-Scoped Breakpoints
//!
//! The backend only knows "stop at this address, optionally if a register
//! predicate holds". The [`BreakpointIndex`] layers logical breakpoints that
//! belong to one process on top of that by gating each physical breakpoint on
//! the translation-base register.
//!
//! Every address has at most one physical breakpoint, whatever the number of
//! logical breakpoints recorded there:
//!
//! | Logical breakpoints at the address | Physical breakpoint |
//! |------------------------------------|---------------------|
//! | any context                        | unconditional       |
//! | contexts A, B, ...                 | `$cr3 == A \|\| $cr3 == B` |
//!
//! An unconditional breakpoint is a superset of every scoped one, so adding a
//! scoped breakpoint where an unconditional one exists only records it.

mod oneshot;

use std::collections::BTreeMap;
use std::fmt;

pub use oneshot::{run_until, wait_for_context, ContextArrival, OneShotBreakpoint};
use tracing::{debug, warn};

use crate::backend::{Backend, BackendBreakpointId, Condition};
use crate::error::{DebuggerError, Result};
use crate::types::{Address, ProcessContext};

/// A logical breakpoint: an address plus the process it is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Breakpoint
{
    /// Code address
    pub address: Address,
    /// Owning process; `None` fires in every process
    pub context: Option<ProcessContext>,
}

impl Breakpoint
{
    /// Breakpoint firing in every process.
    #[must_use]
    pub const fn anywhere(address: Address) -> Self
    {
        Self { address, context: None }
    }

    /// Breakpoint firing only while `context` is executing.
    #[must_use]
    pub const fn scoped(address: Address, context: ProcessContext) -> Self
    {
        Self {
            address,
            context: Some(context),
        }
    }
}

impl fmt::Display for Breakpoint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.context {
            Some(context) => write!(f, "{} in {context}", self.address),
            None => write!(f, "{} in any process", self.address),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot
{
    physical: BackendBreakpointId,
    unconditional: bool,
    contexts: Vec<ProcessContext>,
}

/// Logical breakpoint set, mirrored onto the backend.
#[derive(Debug, Clone)]
pub struct BreakpointIndex
{
    register: String,
    slots: BTreeMap<Address, Slot>,
}

impl BreakpointIndex
{
    /// Create an empty index gating on `register` (usually `cr3`).
    #[must_use]
    pub fn new(register: impl Into<String>) -> Self
    {
        Self {
            register: register.into(),
            slots: BTreeMap::new(),
        }
    }

    /// Register the gate conditions read.
    #[must_use]
    pub fn register(&self) -> &str
    {
        &self.register
    }

    /// Record a logical breakpoint and make sure the backend stops for it.
    ///
    /// A scoped breakpoint's context must already carry its translation base
    /// (see [`ProcessContext::resolve_translation_base`]). Adding a
    /// breakpoint that is already recorded is a no-op.
    ///
    /// When the physical breakpoint has to change (a new context joins the
    /// gate, or the breakpoint becomes unconditional) the replacement is
    /// installed before the old one is deleted. If either step fails the
    /// index and the backend are left as they were.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`: the context has no translation base
    /// - backend errors from installing or deleting
    pub fn add<B>(&mut self, backend: &mut B, breakpoint: Breakpoint) -> Result<()>
    where
        B: Backend + ?Sized,
    {
        if let Some(context) = &breakpoint.context {
            if context.translation_base().is_none() {
                return Err(DebuggerError::StaleContext(context.object()));
            }
        }

        let Some(slot) = self.slots.get(&breakpoint.address) else {
            let (unconditional, contexts) = match breakpoint.context {
                Some(context) => (false, vec![context]),
                None => (true, Vec::new()),
            };
            let condition = (!unconditional).then(|| self.gate(&contexts));
            let physical = backend.add_breakpoint(breakpoint.address, condition)?;
            debug!(%breakpoint, %physical, "breakpoint installed");
            self.slots.insert(
                breakpoint.address,
                Slot {
                    physical,
                    unconditional,
                    contexts,
                },
            );
            return Ok(());
        };

        let mut updated = slot.clone();
        match breakpoint.context {
            None if slot.unconditional => return Ok(()),
            None => updated.unconditional = true,
            Some(context) if slot.contexts.contains(&context) => return Ok(()),
            Some(context) => updated.contexts.push(context),
        }

        if slot.unconditional {
            debug!(%breakpoint, "covered by unconditional breakpoint, recorded only");
            self.slots.insert(breakpoint.address, updated);
            return Ok(());
        }

        let condition = (!updated.unconditional).then(|| self.gate(&updated.contexts));
        let replacement = backend.add_breakpoint(breakpoint.address, condition)?;
        if let Err(err) = backend.delete_breakpoint(slot.physical) {
            if let Err(undo) = backend.delete_breakpoint(replacement) {
                warn!(id = %replacement, error = %undo, "could not roll back replacement breakpoint");
            }
            return Err(err);
        }
        debug!(%breakpoint, old = %slot.physical, new = %replacement, "breakpoint gate widened");
        updated.physical = replacement;
        self.slots.insert(breakpoint.address, updated);
        Ok(())
    }

    /// Remove every logical breakpoint at `address` and its physical breakpoint.
    ///
    /// Returns whether anything was removed; deleting an address with no
    /// breakpoint is not an error.
    ///
    /// ## Errors
    ///
    /// Backend errors from deleting. The record is kept in that case so the
    /// delete can be retried.
    pub fn delete<B>(&mut self, backend: &mut B, address: Address) -> Result<bool>
    where
        B: Backend + ?Sized,
    {
        let Some(slot) = self.slots.get(&address) else {
            return Ok(false);
        };
        backend.delete_breakpoint(slot.physical)?;
        debug!(%address, id = %slot.physical, "breakpoint deleted");
        self.slots.remove(&address);
        Ok(true)
    }

    /// Every logical breakpoint, ordered by address.
    #[must_use]
    pub fn list(&self) -> Vec<Breakpoint>
    {
        let mut out = Vec::new();
        for (address, slot) in &self.slots {
            if slot.unconditional {
                out.push(Breakpoint::anywhere(*address));
            }
            out.extend(slot.contexts.iter().map(|context| Breakpoint::scoped(*address, *context)));
        }
        out
    }

    /// Backend identifier of the physical breakpoint at `address`.
    #[must_use]
    pub fn physical_id(&self, address: Address) -> Option<BackendBreakpointId>
    {
        self.slots.get(&address).map(|slot| slot.physical)
    }

    /// Number of addresses with a physical breakpoint.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.slots.len()
    }

    /// Whether no breakpoint is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.slots.is_empty()
    }

    fn gate(&self, contexts: &[ProcessContext]) -> Condition
    {
        Condition::register_in(
            self.register.clone(),
            contexts.iter().filter_map(ProcessContext::translation_base),
        )
    }
}

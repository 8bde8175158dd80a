//! # Debugger Backend
//!
//! The live-debugger interface the session drives.
//!
//! A backend only understands flat addresses: it can stop at an address,
//! optionally when a register predicate holds, but it has no idea which
//! logical process is executing. Process scoping is layered on top by
//! [`crate::breakpoints::BreakpointIndex`].
//!
//! Every call is a synchronous request/response; `resume` and `single_step`
//! block until the target reports a stop.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::forensics::Forensics;
use crate::types::Address;

/// Identifier the backend assigns to a physical breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendBreakpointId(u64);

impl BackendBreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for BackendBreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// Breakpoint gate: "register equals one of these values"
///
/// This is the only predicate shape process scoping needs. A breakpoint shared
/// by several contexts carries one value per context.
///
/// ## Example
///
/// ```rust
/// use vesper_core::backend::Condition;
///
/// let gate = Condition::register_in("cr3", [0x39000, 0x2f1000]);
/// assert_eq!(gate.to_string(), "$cr3 == 0x39000 || $cr3 == 0x2f1000");
/// assert!(gate.matches(0x2f1000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition
{
    register: String,
    values: Vec<u64>,
}

impl Condition
{
    /// Condition satisfied when `register` equals `value`.
    #[must_use]
    pub fn register_equals(register: impl Into<String>, value: u64) -> Self
    {
        Self {
            register: register.into(),
            values: vec![value],
        }
    }

    /// Condition satisfied when `register` equals any of `values`.
    ///
    /// Duplicates are dropped, first occurrence order is kept.
    #[must_use]
    pub fn register_in(register: impl Into<String>, values: impl IntoIterator<Item = u64>) -> Self
    {
        let mut unique = Vec::new();
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Self {
            register: register.into(),
            values: unique,
        }
    }

    /// Register the predicate reads.
    #[must_use]
    pub fn register(&self) -> &str
    {
        &self.register
    }

    /// Accepted register values.
    #[must_use]
    pub fn values(&self) -> &[u64]
    {
        &self.values
    }

    /// Whether a register value satisfies the condition.
    #[must_use]
    pub fn matches(&self, value: u64) -> bool
    {
        self.values.contains(&value)
    }
}

impl fmt::Display for Condition
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " || ")?;
            }
            write!(f, "${} == 0x{value:x}", self.register)?;
        }
        Ok(())
    }
}

/// Why the target stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopEvent
{
    /// A breakpoint fired
    Breakpoint
    {
        /// Instruction pointer at the stop
        address: Address
    },
    /// A single step completed
    Step
    {
        /// Instruction pointer after the step
        address: Address
    },
    /// The operator (or the backend) interrupted execution
    Interrupted,
    /// The target is gone
    Exited,
}

impl fmt::Display for StopEvent
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            StopEvent::Breakpoint { address } => write!(f, "breakpoint hit at {address}"),
            StopEvent::Step { address } => write!(f, "stepped to {address}"),
            StopEvent::Interrupted => write!(f, "interrupted"),
            StopEvent::Exited => write!(f, "target exited"),
        }
    }
}

/// A physical breakpoint as the backend holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledBreakpoint
{
    /// Backend identifier
    pub id: BackendBreakpointId,
    /// Breakpoint address
    pub address: Address,
    /// Optional gate
    pub condition: Option<Condition>,
}

/// Live-debugger backend
///
/// Implementations wrap a remote stub (gdb server, hypervisor debug port, a
/// replayed snapshot, ...). The session depends only on the semantics below,
/// never on the backend's command syntax.
pub trait Backend
{
    /// Read a named register (`eax`, `eip`, `cr3`, ...).
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: the register name is unknown to the backend
    /// - `BackendUnavailable`: the backend did not answer
    fn read_register(&self, name: &str) -> Result<u64>;

    /// Install a breakpoint, optionally gated by `condition`.
    ///
    /// ## Errors
    ///
    /// - `BackendUnavailable`: the backend refused or did not answer
    fn add_breakpoint(&mut self, address: Address, condition: Option<Condition>) -> Result<BackendBreakpointId>;

    /// Remove a previously installed breakpoint.
    ///
    /// ## Errors
    ///
    /// - `BackendUnavailable`: the backend refused or did not answer
    fn delete_breakpoint(&mut self, id: BackendBreakpointId) -> Result<()>;

    /// Resume execution and block until the next stop.
    ///
    /// ## Errors
    ///
    /// - `BackendUnavailable`: the backend did not answer
    fn resume(&mut self) -> Result<StopEvent>;

    /// Execute exactly one instruction.
    ///
    /// ## Errors
    ///
    /// - `BackendUnavailable`: the backend did not answer
    fn single_step(&mut self) -> Result<StopEvent>;

    /// Breakpoints currently installed, in installation order.
    fn installed_breakpoints(&self) -> Vec<InstalledBreakpoint>;
}

/// A complete debugging target: a live backend plus a forensic view of its memory.
///
/// Implemented automatically for every type that is both.
pub trait Target: Backend + Forensics {}

impl<T> Target for T where T: Backend + Forensics + ?Sized {}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_condition_display_single()
    {
        let gate = Condition::register_equals("cr3", 0x39000);
        assert_eq!(gate.to_string(), "$cr3 == 0x39000");
    }

    #[test]
    fn test_condition_drops_duplicates()
    {
        let gate = Condition::register_in("cr3", [1, 2, 1, 3]);
        assert_eq!(gate.values(), &[1, 2, 3]);
        assert!(!gate.matches(4));
    }
}

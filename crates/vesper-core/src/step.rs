//! # Execution Control
//!
//! Stepping and resuming, with the session's contexts kept in sync.
//!
//! Step-over decodes the instruction at the instruction pointer. A `call` is
//! treated as opaque: a one-shot breakpoint goes on the return address and the
//! target runs until it. The breakpoint is gated on the translation base
//! live in the register at the start of the step, so a different process
//! passing through the same shared code does not end the step early. A
//! context chosen with `sc` only redirects reads; it never moves the gate.

use tracing::debug;

use crate::backend::{Condition, StopEvent};
use crate::breakpoints;
use crate::error::{DebuggerError, Result};
use crate::session::{read_code, Session};
use crate::types::Address;

/// Bytes read at the instruction pointer to decode one instruction.
const FETCH_WINDOW: usize = 0x20;

/// Outcome of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome
{
    /// Why the target stopped
    pub stop: StopEvent,
    /// Return address the step ran to, when it stepped over a call
    pub stepped_over: Option<Address>,
}

impl Session
{
    /// Execute one instruction, then refresh the current context.
    ///
    /// ## Errors
    ///
    /// Backend errors.
    pub fn step_into(&mut self) -> Result<StopEvent>
    {
        let stop = self.target_mut().single_step()?;
        self.refresh_context()?;
        Ok(stop)
    }

    /// Execute one instruction, running calls to completion.
    ///
    /// Either way the current context is refreshed and becomes the reading
    /// context.
    ///
    /// ## Errors
    ///
    /// - `BackendUnavailable`: no disassembler
    /// - `InvalidOperand`: nothing decodable at the instruction pointer
    /// - backend errors
    pub fn step_over(&mut self) -> Result<StepOutcome>
    {
        // decode in the process that is executing, not one picked with `sc`
        self.refresh_context()?;
        let ip = self.instruction_pointer()?;
        let instruction = {
            let space = self.executing_space()?;
            let model = self.memory_model(space.as_ref());
            let bytes = read_code(space.as_ref(), ip, FETCH_WINDOW)?;
            let first = self.disassembler()?.decode(&bytes, ip, model).next();
            first.ok_or_else(|| DebuggerError::InvalidOperand(format!("no instruction at {ip}")))?
        };

        let outcome = if instruction.is_call() {
            let return_address = instruction.next_offset();
            debug!(%ip, text = %instruction.text, %return_address, "stepping over call");
            let stop = self.run_to(return_address)?;
            StepOutcome {
                stop,
                stepped_over: Some(return_address),
            }
        } else {
            StepOutcome {
                stop: self.target_mut().single_step()?,
                stepped_over: None,
            }
        };

        self.mark_stopped()?;
        Ok(outcome)
    }

    /// Run until `address` is reached in the process executing now.
    ///
    /// ## Errors
    ///
    /// Backend errors.
    pub fn run_until(&mut self, address: Address) -> Result<StopEvent>
    {
        let stop = self.run_to(address)?;
        self.mark_stopped()?;
        Ok(stop)
    }

    /// Resume until the next stop, then refresh the current context.
    ///
    /// ## Errors
    ///
    /// Backend errors.
    pub fn continue_execution(&mut self) -> Result<StopEvent>
    {
        let stop = self.target_mut().resume()?;
        self.refresh_context()?;
        Ok(stop)
    }

    fn run_to(&mut self, address: Address) -> Result<StopEvent>
    {
        let register = self.config().target.translation_base_register.clone();
        let base = self.read_register(&register)?;
        let gate = Condition::register_equals(register, base);
        breakpoints::run_until(self.target_mut(), address, Some(gate))
    }
}

//! # Debugging Session
//!
//! All mutable state of one debugging session lives in [`Session`]: the
//! target, the symbol tables, the breakpoint index and the two process
//! contexts.
//!
//! ## Contexts
//!
//! - **current context**: the process whose translation base is loaded on the
//!   CPU, re-derived from the translation-base register after every stop
//! - **reading context**: the process whose memory commands read; set
//!   explicitly (`sc`) or after a step
//!
//! Neither changes in the middle of a command; only the context-switch
//! operations below update them.
//!
//! ## Lifecycle
//!
//! Create a session at start-up from a [`Target`] and a [`SessionConfig`],
//! run commands against it (usually through the
//! [`Registry`](crate::registry::Registry)), drop it at exit. The session is
//! single-threaded; wrap it in a mutex before sharing it.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::backend::Target;
use crate::breakpoints::{self, Breakpoint, BreakpointIndex, ContextArrival};
use crate::config::SessionConfig;
use crate::disasm::{self, CursorWindow, DisassembledLine, Disassembler};
use crate::error::{DebuggerError, Result};
use crate::expr::{self, OperandSource};
use crate::forensics::{AddressSpace, ModuleRecord, ProcessRecord};
use crate::symbols::{ModuleExports, SymbolTable};
use crate::types::{Address, MemoryModel, ProcessContext};

const PAGE_SIZE: u64 = 0x1000;

/// One debugging session.
pub struct Session
{
    target: Box<dyn Target>,
    disassembler: Option<Box<dyn Disassembler>>,
    config: SessionConfig,
    symbols: SymbolTable,
    breakpoints: BreakpointIndex,
    current_context: Option<ProcessContext>,
    reading_context: Option<ProcessContext>,
}

impl Session
{
    /// Create a session over `target`.
    ///
    /// The default disassembler is used when the `disasm` feature is enabled;
    /// otherwise disassembly commands fail with `BackendUnavailable` until
    /// one is supplied through [`Session::with_disassembler`].
    #[must_use]
    pub fn new(target: Box<dyn Target>, config: SessionConfig) -> Self
    {
        let breakpoints = BreakpointIndex::new(config.target.translation_base_register.clone());
        Self {
            target,
            disassembler: default_disassembler(),
            config,
            symbols: SymbolTable::new(),
            breakpoints,
            current_context: None,
            reading_context: None,
        }
    }

    /// Replace (or remove) the disassembler.
    #[must_use]
    pub fn with_disassembler(mut self, disassembler: Option<Box<dyn Disassembler>>) -> Self
    {
        self.disassembler = disassembler;
        self
    }

    /// The debugging target.
    #[must_use]
    pub fn target(&self) -> &dyn Target
    {
        self.target.as_ref()
    }

    /// Mutable access to the debugging target.
    pub fn target_mut(&mut self) -> &mut dyn Target
    {
        self.target.as_mut()
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig
    {
        &self.config
    }

    /// Symbol tables.
    #[must_use]
    pub fn symbols(&self) -> &SymbolTable
    {
        &self.symbols
    }

    /// Breakpoint index.
    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointIndex
    {
        &self.breakpoints
    }

    /// Process currently executing, as of the last refresh.
    #[must_use]
    pub fn current_context(&self) -> Option<ProcessContext>
    {
        self.current_context
    }

    /// Process whose memory commands read.
    #[must_use]
    pub fn reading_context(&self) -> Option<ProcessContext>
    {
        self.reading_context
    }

    // ========================================================================
    // Registers and contexts
    // ========================================================================

    /// Read a register from the backend.
    ///
    /// ## Errors
    ///
    /// Backend errors.
    pub fn read_register(&self, name: &str) -> Result<u64>
    {
        self.target.read_register(name)
    }

    /// Current instruction pointer.
    ///
    /// ## Errors
    ///
    /// Backend errors.
    pub fn instruction_pointer(&self) -> Result<Address>
    {
        self.read_register(&self.config.target.instruction_pointer).map(Address::new)
    }

    /// Re-derive the current context from the translation-base register.
    ///
    /// ## Errors
    ///
    /// Backend errors, or a failure to enumerate processes.
    pub fn refresh_context(&mut self) -> Result<Option<ProcessContext>>
    {
        let base = self.read_register(&self.config.target.translation_base_register)?;
        let found = self
            .target
            .processes()?
            .into_iter()
            .find(|p| p.translation_base == base);

        self.current_context = found.as_ref().map(ProcessRecord::context);
        match &found {
            Some(process) => debug!(process = %process.name, pid = process.pid, "current context refreshed"),
            None => info!(translation_base = base, "no process owns the active translation base"),
        }
        Ok(self.current_context)
    }

    /// Current context, refreshing it first when it is unknown.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no process owns the active translation base
    /// - backend errors
    pub fn current_or_refresh(&mut self) -> Result<ProcessContext>
    {
        if let Some(context) = self.current_context {
            return Ok(context);
        }
        self.refresh_context()?.ok_or_else(|| {
            DebuggerError::InvalidArgument("no process owns the active translation base".to_string())
        })
    }

    /// Context for a process object, with its translation base resolved.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`: the translation base could not be resolved
    pub fn context_for(&self, object: Address) -> Result<ProcessContext>
    {
        let mut context = ProcessContext::new(object);
        context.resolve_translation_base(self.target.as_ref())?;
        Ok(context)
    }

    /// Switch both the current and the reading context to `object`.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`: the translation base could not be resolved
    pub fn set_context(&mut self, object: Address) -> Result<ProcessContext>
    {
        let context = self.context_for(object)?;
        info!(%context, "context switched");
        self.current_context = Some(context);
        self.reading_context = Some(context);
        Ok(context)
    }

    /// Set (or clear) only the reading context.
    pub fn set_reading_context(&mut self, context: Option<ProcessContext>)
    {
        self.reading_context = context;
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// Address space commands read from.
    ///
    /// Reading context, else current context, else a freshly refreshed
    /// current context, else the kernel space.
    ///
    /// ## Errors
    ///
    /// Backend or forensics errors.
    pub fn inspected_space(&mut self) -> Result<Box<dyn AddressSpace + '_>>
    {
        self.ensure_context()?;
        self.reading_space()
    }

    /// Run `inspect` over the inspected space and its memory model.
    ///
    /// ## Errors
    ///
    /// Backend or forensics errors, or whatever `inspect` returns.
    pub fn with_inspected_space<R>(&mut self, inspect: impl FnOnce(&dyn AddressSpace, MemoryModel) -> Result<R>) -> Result<R>
    {
        self.ensure_context()?;
        let space = self.reading_space()?;
        let model = self.memory_model(space.as_ref());
        inspect(space.as_ref(), model)
    }

    /// Memory model of a space, falling back to the configured one.
    #[must_use]
    pub fn memory_model(&self, space: &dyn AddressSpace) -> MemoryModel
    {
        space.memory_model().unwrap_or(self.config.target.memory_model)
    }

    /// Read memory from the inspected space.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the range is not mapped
    pub fn read_memory(&mut self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        self.inspected_space()?.read(address, len)
    }

    /// Evaluate an operand expression against live registers and the
    /// inspected space.
    ///
    /// ## Errors
    ///
    /// - `InvalidOperand`: see [`expr::decode_operand`]
    pub fn decode_operand(&mut self, expression: &str) -> Result<u64>
    {
        self.ensure_context()?;
        let space = self.reading_space()?;
        let operands = LiveOperands {
            target: self.target.as_ref(),
            space: space.as_ref(),
        };
        expr::decode_operand(expression, &operands)
    }

    fn ensure_context(&mut self) -> Result<()>
    {
        if self.reading_context.is_none() && self.current_context.is_none() {
            self.refresh_context()?;
        }
        Ok(())
    }

    fn reading_space(&self) -> Result<Box<dyn AddressSpace + '_>>
    {
        match self
            .reading_context
            .or(self.current_context)
            .and_then(|c| c.translation_base())
        {
            Some(base) => self.target.process_space(base),
            None => self.target.kernel_space(),
        }
    }

    pub(crate) fn executing_space(&self) -> Result<Box<dyn AddressSpace + '_>>
    {
        match self.current_context.and_then(|c| c.translation_base()) {
            Some(base) => self.target.process_space(base),
            None => self.target.kernel_space(),
        }
    }

    pub(crate) fn mark_stopped(&mut self) -> Result<()>
    {
        self.refresh_context()?;
        self.reading_context = self.current_context;
        Ok(())
    }

    // ========================================================================
    // Breakpoints
    // ========================================================================

    /// Set a breakpoint, scoped to the process object `scope` if given.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`: the scope's translation base could not be resolved
    /// - backend errors
    pub fn add_breakpoint(&mut self, address: Address, scope: Option<Address>) -> Result<Breakpoint>
    {
        let breakpoint = match scope {
            Some(object) => Breakpoint::scoped(address, self.context_for(object)?),
            None => Breakpoint::anywhere(address),
        };
        self.breakpoints.add(self.target.as_mut(), breakpoint)?;
        Ok(breakpoint)
    }

    /// Set a breakpoint gated on a raw translation base.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no process owns that translation base
    /// - backend errors
    pub fn add_breakpoint_for_base(&mut self, address: Address, translation_base: u64) -> Result<Breakpoint>
    {
        let process = self
            .target
            .processes()?
            .into_iter()
            .find(|p| p.translation_base == translation_base)
            .ok_or_else(|| {
                DebuggerError::InvalidArgument(format!("no process with translation base 0x{translation_base:x}"))
            })?;
        let breakpoint = Breakpoint::scoped(address, process.context());
        self.breakpoints.add(self.target.as_mut(), breakpoint)?;
        Ok(breakpoint)
    }

    /// Delete every breakpoint at `address`; returns whether one existed.
    ///
    /// ## Errors
    ///
    /// Backend errors.
    pub fn delete_breakpoint(&mut self, address: Address) -> Result<bool>
    {
        self.breakpoints.delete(self.target.as_mut(), address)
    }

    /// Run until the process `object` is switched in.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`: the process's translation base could not be resolved
    /// - backend errors
    pub fn wait_for_context(&mut self, object: Address) -> Result<ContextArrival>
    {
        let context = self.context_for(object)?;
        let base = context
            .translation_base()
            .ok_or(DebuggerError::StaleContext(object))?;
        let arrival = breakpoints::wait_for_context(
            self.target.as_mut(),
            self.config.target.context_switch_hook,
            &self.config.target.translation_base_register,
            base,
        )?;
        self.refresh_context()?;
        Ok(arrival)
    }

    // ========================================================================
    // Symbols
    // ========================================================================

    /// Rebuild the user namespace from the current process's modules.
    ///
    /// Modules whose export table cannot be read are skipped with a warning.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no current process
    /// - forensics errors enumerating modules
    pub fn reload_process_symbols(&mut self) -> Result<usize>
    {
        let context = self.current_or_refresh()?;
        let modules = self.target.process_modules(&context)?;
        let tables = self.export_tables(modules);
        Ok(self.symbols.reload_process(tables))
    }

    /// Rebuild the kernel namespace from the kernel's modules.
    ///
    /// ## Errors
    ///
    /// Forensics errors enumerating modules.
    pub fn reload_kernel_symbols(&mut self) -> Result<usize>
    {
        let modules = self.target.kernel_modules()?;
        let tables = self.export_tables(modules);
        Ok(self.symbols.reload_kernel(tables))
    }

    fn export_tables(&self, modules: Vec<ModuleRecord>) -> Vec<ModuleExports>
    {
        modules
            .into_iter()
            .filter_map(|module| match self.target.module_exports(&module) {
                Ok(exports) => Some(ModuleExports { module, exports }),
                Err(err) => {
                    warn!(module = %module.name, error = %err, "export table unreadable, skipping module");
                    None
                }
            })
            .collect()
    }

    /// Write the symbol tables to `path` (or the configured file).
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no path given and none configured
    /// - I/O errors
    pub fn store_symbols(&self, path: Option<&Path>) -> Result<PathBuf>
    {
        let path = self.symbol_file(path)?;
        self.symbols.store(&path)?;
        Ok(path)
    }

    /// Replace the symbol tables with the contents of `path` (or the
    /// configured file).
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no path given and none configured
    /// - I/O or format errors; the tables are unchanged in that case
    pub fn restore_symbols(&mut self, path: Option<&Path>) -> Result<PathBuf>
    {
        let path = self.symbol_file(path)?;
        self.symbols.restore(&path)?;
        Ok(path)
    }

    fn symbol_file(&self, path: Option<&Path>) -> Result<PathBuf>
    {
        path.map(Path::to_path_buf)
            .or_else(|| self.config.symbols.file.clone())
            .ok_or_else(|| DebuggerError::InvalidArgument("no symbol file given or configured".to_string()))
    }

    // ========================================================================
    // Disassembly
    // ========================================================================

    /// Disassemble `length` bytes at `address` in the inspected space.
    ///
    /// ## Errors
    ///
    /// - `BackendUnavailable`: no disassembler
    /// - `MemoryRead`: not even the first page of the range is readable
    pub fn disassemble(
        &mut self,
        address: Address,
        length: usize,
        model: Option<MemoryModel>,
    ) -> Result<Vec<DisassembledLine>>
    {
        self.with_disassembly(address, length, model, |lines| lines.collect())
    }

    /// Disassemble a window of `line_count` lines around `address`.
    ///
    /// Decoding starts `lines_before * 5` bytes before `address` to give the
    /// decoder a chance to synchronise on instruction boundaries.
    ///
    /// ## Errors
    ///
    /// Same as [`Session::disassemble`].
    pub fn disassemble_around_cursor(
        &mut self,
        address: Address,
        line_count: usize,
        lines_before: usize,
        length: usize,
    ) -> Result<CursorWindow>
    {
        let start = address.saturating_sub(lines_before as u64 * 5);
        self.with_disassembly(start, length, None, |lines| {
            disasm::disassemble_around_cursor(lines, address, line_count, lines_before)
        })
    }

    fn with_disassembly<R>(
        &mut self,
        address: Address,
        length: usize,
        model: Option<MemoryModel>,
        consume: impl FnOnce(&mut dyn Iterator<Item = DisassembledLine>) -> R,
    ) -> Result<R>
    {
        self.ensure_context()?;
        let disassembler = self.disassembler.as_deref().ok_or_else(no_disassembler)?;
        let space = self.reading_space()?;
        let model = model.unwrap_or_else(|| self.memory_model(space.as_ref()));
        let bytes = read_code(space.as_ref(), address, length)?;
        let operands = LiveOperands {
            target: self.target.as_ref(),
            space: space.as_ref(),
        };
        let mut lines = disasm::disassemble(disassembler, &bytes, address, model, &self.symbols, &operands);
        Ok(consume(&mut lines))
    }

    pub(crate) fn disassembler(&self) -> Result<&dyn Disassembler>
    {
        self.disassembler.as_deref().ok_or_else(no_disassembler)
    }
}

/// Registers from the backend, memory from one address space.
struct LiveOperands<'a>
{
    target: &'a dyn Target,
    space: &'a dyn AddressSpace,
}

impl OperandSource for LiveOperands<'_>
{
    fn register(&self, name: &str) -> Result<u64>
    {
        self.target.read_register(name)
    }

    fn read_u32(&self, address: Address) -> Result<u32>
    {
        self.space.read_u32(address)
    }
}

/// Read up to `length` bytes of code, settling for the rest of the first
/// page when the full range crosses into unmapped memory.
pub(crate) fn read_code(space: &dyn AddressSpace, address: Address, length: usize) -> Result<Vec<u8>>
{
    match space.read(address, length) {
        Ok(bytes) => Ok(bytes),
        Err(err @ DebuggerError::MemoryRead { .. }) => {
            let to_page_end = PAGE_SIZE - (address.value() % PAGE_SIZE);
            let shorter = usize::try_from(to_page_end).map_or(length, |n| n.min(length));
            if shorter == length {
                return Err(err);
            }
            debug!(%address, length, shorter, "code read crosses unmapped memory, truncating");
            space.read(address, shorter)
        }
        Err(err) => Err(err),
    }
}

fn no_disassembler() -> DebuggerError
{
    DebuggerError::BackendUnavailable("disassembly support is not compiled in".to_string())
}

#[cfg(feature = "disasm")]
fn default_disassembler() -> Option<Box<dyn Disassembler>>
{
    Some(Box::new(disasm::IcedDisassembler::new()))
}

#[cfg(not(feature = "disasm"))]
fn default_disassembler() -> Option<Box<dyn Disassembler>>
{
    None
}

//! # Capability Registry
//!
//! Every operator command is a named [`Capability`]. Capabilities are
//! registered once at start-up with the names of the capabilities they
//! depend on, built lazily on first use, and reach each other only by name
//! through [`Invocation::call`].
//!
//! Dependencies are checked before anything runs: resolving a capability
//! walks its declared dependency graph and fails with `UnknownCapability` or
//! `DependencyCycle` before the first `compute`. A capability may only call
//! what it declared; any other name fails with `UndeclaredDependency`, so the
//! checked graph is the call graph and no cycle can appear at run time.
//!
//! ## Example
//!
//! ```rust
//! use vesper_core::registry::{Capability, Invocation, Output, Registry};
//! use vesper_core::Result;
//!
//! struct Answer;
//!
//! impl Capability for Answer {
//!     fn compute(&self, _cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output> {
//!         Ok(Output::Value(0x2a))
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register("answer", &[], || Box::new(Answer))?;
//! registry.validate()?;
//! # Ok::<(), vesper_core::DebuggerError>(())
//! ```

use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use once_cell::unsync::OnceCell;
use tracing::{debug, trace};

use crate::backend::StopEvent;
use crate::breakpoints::{Breakpoint, ContextArrival};
use crate::disasm::{CursorWindow, DisassembledLine};
use crate::error::{DebuggerError, Result};
use crate::forensics::{ModuleRecord, ProcessRecord};
use crate::session::Session;
use crate::step::StepOutcome;
use crate::symbols::SymbolEntry;
use crate::types::{Address, ProcessContext};

/// ANSI sequence highlighting the cursor line.
const HIGHLIGHT: &str = "\x1b[94m";
const RESET: &str = "\x1b[0m";

/// Data produced by a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output
{
    /// Nothing to report
    None,
    /// A single number or address
    Value(u64),
    /// Named values (registers, flags)
    Registers(Vec<(String, u64)>),
    /// Raw 32-bit words (stack dump)
    Words(Vec<u32>),
    /// Record addresses
    Addresses(Vec<Address>),
    /// Disassembly
    Lines(Vec<DisassembledLine>),
    /// Disassembly around a cursor
    Window(CursorWindow),
    /// Logical breakpoints
    Breakpoints(Vec<Breakpoint>),
    /// Processes
    Processes(Vec<ProcessRecord>),
    /// Modules
    Modules(Vec<ModuleRecord>),
    /// A resolved symbol
    Symbol(SymbolEntry),
    /// A context, or none
    Context(Option<ProcessContext>),
    /// A stop
    Stop(StopEvent),
    /// A completed step
    Step(StepOutcome),
    /// Arrival in a waited-for context
    Arrival(ContextArrival),
    /// Free text
    Text(String),
}

impl Output
{
    /// The single value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<u64>
    {
        match self {
            Output::Value(value) => Some(*value),
            Output::Symbol(entry) => Some(entry.address.value()),
            Output::Arrival(arrival) => Some(arrival.translation_base),
            _ => None,
        }
    }

    /// The single value as an address, if this is one.
    #[must_use]
    pub fn as_address(&self) -> Option<Address>
    {
        self.as_value().map(Address::new)
    }
}

/// A named command.
pub trait Capability
{
    /// Produce the command's data.
    ///
    /// ## Errors
    ///
    /// Any session error; the session itself stays usable.
    fn compute(&self, cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>;

    /// Present the data to the operator.
    fn render(&self, output: &Output) -> String
    {
        render_output(output)
    }

    /// One-line usage, shown by the front end.
    fn usage(&self) -> &'static str
    {
        ""
    }
}

/// Default presentation for every [`Output`] variant.
#[must_use]
pub fn render_output(output: &Output) -> String
{
    let mut out = String::new();
    match output {
        Output::None => {}
        Output::Value(value) => out.push_str(&format!("0x{value:x}")),
        Output::Registers(registers) => {
            for (name, value) in registers {
                let _ = writeln!(out, "{name}: 0x{value:08x}");
            }
        }
        Output::Words(words) => {
            for word in words {
                let _ = writeln!(out, "0x{word:08x}");
            }
        }
        Output::Addresses(addresses) => {
            for address in addresses {
                let _ = writeln!(out, "{address}");
            }
        }
        Output::Lines(lines) => {
            for line in lines {
                let _ = writeln!(out, "{line}");
            }
        }
        Output::Window(window) => {
            for (index, line) in window.lines.iter().enumerate().skip(window.window_start) {
                if Some(index) == window.cursor {
                    let _ = writeln!(out, "{HIGHLIGHT}{line}{RESET}");
                } else {
                    let _ = writeln!(out, "{line}");
                }
            }
        }
        Output::Breakpoints(breakpoints) => {
            for breakpoint in breakpoints {
                let _ = writeln!(out, "{breakpoint}");
            }
        }
        Output::Processes(processes) => {
            for p in processes {
                let _ = writeln!(
                    out,
                    "{} {:>6} dtb 0x{:08x} {}",
                    p.object, p.pid, p.translation_base, p.name
                );
            }
        }
        Output::Modules(modules) => {
            for m in modules {
                let _ = writeln!(out, "[{}]\t{}", m.base, m.name);
            }
        }
        Output::Symbol(entry) => out.push_str(&format!("{} {}", entry.address, entry.name)),
        Output::Context(Some(context)) => out.push_str(&context.to_string()),
        Output::Context(None) => out.push_str("no process context"),
        Output::Stop(stop) => out.push_str(&stop.to_string()),
        Output::Step(step) => match step.stepped_over {
            Some(address) => out.push_str(&format!("{} (stepped over call to {address})", step.stop)),
            None => out.push_str(&step.stop.to_string()),
        },
        Output::Arrival(arrival) => {
            out.push_str(&format!("Thread arrived, current DTB: 0x{:x}", arrival.translation_base));
        }
        Output::Text(text) => out.push_str(text),
    }
    out.trim_end().to_string()
}

type Factory = Box<dyn Fn() -> Box<dyn Capability>>;

struct Entry
{
    dependencies: Vec<String>,
    factory: Factory,
    instance: OnceCell<Box<dyn Capability>>,
    verified: Cell<bool>,
}

/// Name-keyed capability registry.
#[derive(Default)]
pub struct Registry
{
    entries: BTreeMap<String, Entry>,
}

impl Registry
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Register a capability.
    ///
    /// The factory runs on first resolution, at most once.
    ///
    /// ## Errors
    ///
    /// - `DuplicateCapability`: the name is taken
    pub fn register<F>(&mut self, name: &str, dependencies: &[&str], factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Capability> + 'static,
    {
        if self.entries.contains_key(name) {
            return Err(DebuggerError::DuplicateCapability(name.to_string()));
        }
        self.insert(name, dependencies, Box::new(factory));
        Ok(())
    }

    /// Register a capability, replacing any existing one with the same name.
    ///
    /// Returns whether a capability was replaced.
    pub fn register_or_replace<F>(&mut self, name: &str, dependencies: &[&str], factory: F) -> bool
    where
        F: Fn() -> Box<dyn Capability> + 'static,
    {
        let replaced = self.entries.contains_key(name);
        self.insert(name, dependencies, Box::new(factory));
        if replaced {
            debug!(name, "capability replaced");
        }
        replaced
    }

    fn insert(&mut self, name: &str, dependencies: &[&str], factory: Factory)
    {
        self.entries.insert(
            name.to_string(),
            Entry {
                dependencies: dependencies.iter().map(|d| (*d).to_string()).collect(),
                factory,
                instance: OnceCell::new(),
                verified: Cell::new(false),
            },
        );
        // a new or replaced entry can change any dependency path
        for entry in self.entries.values() {
            entry.verified.set(false);
        }
    }

    /// Whether a capability is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool
    {
        self.entries.contains_key(name)
    }

    /// Registered names with their declared dependencies, sorted by name.
    pub fn capabilities(&self) -> impl Iterator<Item = (&str, &[String])>
    {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.dependencies.as_slice()))
    }

    /// Check the whole dependency graph.
    ///
    /// ## Errors
    ///
    /// - `UnknownCapability`: a declared dependency is not registered
    /// - `DependencyCycle`: the graph has a cycle
    pub fn validate(&self) -> Result<()>
    {
        for name in self.entries.keys() {
            self.check_dependencies(name)?;
        }
        Ok(())
    }

    /// Resolve a capability, building it on first use.
    ///
    /// Its dependency graph is checked first; dependencies themselves are
    /// built only when called.
    ///
    /// ## Errors
    ///
    /// - `UnknownCapability`: the name or one of its dependencies is unknown
    /// - `DependencyCycle`: its dependency graph has a cycle
    pub fn resolve(&self, name: &str) -> Result<&dyn Capability>
    {
        self.check_dependencies(name)?;
        let entry = self.entry(name)?;
        let instance = entry.instance.get_or_init(|| {
            trace!(name, "instantiating capability");
            (entry.factory)()
        });
        Ok(instance.as_ref())
    }

    /// Resolve and compute a capability.
    ///
    /// ## Errors
    ///
    /// Resolution errors, or whatever `compute` returns.
    pub fn invoke(&self, session: &mut Session, name: &str, args: &[String]) -> Result<Output>
    {
        let capability = self.resolve(name)?;
        let entry = self.entry(name)?;
        debug!(name, ?args, "invoking capability");
        let mut cx = Invocation {
            registry: self,
            session,
            caller: name,
            declared: &entry.dependencies,
        };
        capability.compute(&mut cx, args)
    }

    /// Render an output with the named capability's presentation.
    ///
    /// ## Errors
    ///
    /// Resolution errors.
    pub fn render(&self, name: &str, output: &Output) -> Result<String>
    {
        Ok(self.resolve(name)?.render(output))
    }

    fn entry(&self, name: &str) -> Result<&Entry>
    {
        self.entries
            .get(name)
            .ok_or_else(|| DebuggerError::UnknownCapability(name.to_string()))
    }

    fn check_dependencies(&self, name: &str) -> Result<()>
    {
        let entry = self.entry(name)?;
        if entry.verified.get() {
            return Ok(());
        }
        let mut path = Vec::new();
        let mut done = HashSet::new();
        self.visit(name, &mut path, &mut done)?;
        entry.verified.set(true);
        Ok(())
    }

    fn visit<'a>(&'a self, name: &'a str, path: &mut Vec<&'a str>, done: &mut HashSet<&'a str>) -> Result<()>
    {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|n| *n == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name);
            return Err(DebuggerError::DependencyCycle(cycle.join(" -> ")));
        }
        let entry = self.entries.get(name).ok_or_else(|| match path.last() {
            Some(parent) => DebuggerError::UnknownCapability(format!("{name} (required by {parent})")),
            None => DebuggerError::UnknownCapability(name.to_string()),
        })?;

        path.push(name);
        for dependency in &entry.dependencies {
            self.visit(dependency, path, done)?;
        }
        path.pop();
        done.insert(name);
        Ok(())
    }
}

/// What a capability sees while it computes: the session, and its declared
/// dependencies by name.
pub struct Invocation<'a>
{
    registry: &'a Registry,
    session: &'a mut Session,
    caller: &'a str,
    declared: &'a [String],
}

impl Invocation<'_>
{
    /// The session.
    pub fn session(&mut self) -> &mut Session
    {
        self.session
    }

    /// Compute another capability.
    ///
    /// ## Errors
    ///
    /// - `UndeclaredDependency`: `name` is not among the caller's declared
    ///   dependencies
    /// - same as [`Registry::invoke`]
    pub fn call(&mut self, name: &str, args: &[String]) -> Result<Output>
    {
        if !self.declared.iter().any(|d| d == name) {
            return Err(DebuggerError::UndeclaredDependency {
                caller: self.caller.to_string(),
                callee: name.to_string(),
            });
        }
        self.registry.invoke(self.session, name, args)
    }

    /// Compute another capability and take its single value.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: the capability did not produce a value
    /// - errors from the call
    pub fn call_value(&mut self, name: &str, args: &[String]) -> Result<u64>
    {
        let output = self.call(name, args)?;
        output
            .as_value()
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("{name} produced no value")))
    }
}

//! Snapshot replay target.
//!
//! A [`Snapshot`] is a JSON document describing a stopped machine: register
//! values, memory regions for the kernel and for each process, the module
//! lists with their export tables, and a script of the points execution will
//! pass through once resumed.
//!
//! Replay follows the script. `single_step` consumes the next scripted point
//! and stops there. `resume` consumes points until one lands on an installed
//! breakpoint whose condition holds against the registers at that point; if
//! the script runs out first the target reports `Exited`.
//!
//! ## Example
//!
//! ```rust
//! use vesper_core::backend::Backend;
//! use vesper_core::target::SnapshotTarget;
//!
//! let target = SnapshotTarget::from_json(r#"{ "registers": { "eip": 4096, "cr3": 233472 } }"#)?;
//! assert_eq!(target.read_register("EIP")?, 0x1000);
//! # Ok::<(), vesper_core::DebuggerError>(())
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backend::{Backend, BackendBreakpointId, Condition, InstalledBreakpoint, StopEvent};
use crate::error::{DebuggerError, Result};
use crate::forensics::{AddressSpace, ExportRecord, Forensics, ModuleRecord, ProcessRecord};
use crate::types::{Address, MemoryModel, ProcessContext};

/// A contiguous block of recorded memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region
{
    /// First mapped address
    pub base: Address,
    /// Contents
    pub data: Vec<u8>,
}

impl Region
{
    fn slice(&self, address: Address, len: usize) -> Option<&[u8]>
    {
        let start = usize::try_from(address.value().checked_sub(self.base.value())?).ok()?;
        self.data.get(start..start.checked_add(len)?)
    }
}

/// A module and its export table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSnapshot
{
    /// The module
    #[serde(flatten)]
    pub module: ModuleRecord,
    /// Export slots
    #[serde(default)]
    pub exports: Vec<ExportRecord>,
    /// Export directory not captured (paged out at recording time)
    #[serde(default)]
    pub paged_out: bool,
}

/// A process, its user-half memory and its loader list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot
{
    /// The process
    #[serde(flatten)]
    pub record: ProcessRecord,
    /// User-half memory; the kernel regions are mapped into every process
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Loaded modules in memory order
    #[serde(default)]
    pub modules: Vec<ModuleSnapshot>,
}

/// A point execution passes through after a resume or step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedStop
{
    /// Instruction pointer at this point
    pub address: Address,
    /// Registers that change on arrival (the instruction pointer is implied)
    #[serde(default)]
    pub registers: BTreeMap<String, u64>,
}

/// A recorded machine state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot
{
    /// Memory model of every recorded space
    pub memory_model: Option<MemoryModel>,
    /// Register file at the moment of recording
    pub registers: BTreeMap<String, u64>,
    /// Kernel-half memory
    pub kernel: Vec<Region>,
    /// Kernel module list
    pub kernel_modules: Vec<ModuleSnapshot>,
    /// Processes in list order
    pub processes: Vec<ProcessSnapshot>,
    /// Execution script
    pub stops: Vec<ScriptedStop>,
}

/// A [`Target`](crate::backend::Target) replaying a [`Snapshot`].
#[derive(Debug)]
pub struct SnapshotTarget
{
    snapshot: Snapshot,
    registers: BTreeMap<String, u64>,
    breakpoints: Vec<InstalledBreakpoint>,
    script: VecDeque<ScriptedStop>,
    next_id: u64,
}

impl SnapshotTarget
{
    /// Build a target over `snapshot`.
    ///
    /// Register names are case-insensitive.
    #[must_use]
    pub fn new(mut snapshot: Snapshot) -> Self
    {
        let registers = lowercase(&snapshot.registers);
        let script = snapshot
            .stops
            .drain(..)
            .map(|stop| ScriptedStop {
                registers: lowercase(&stop.registers),
                ..stop
            })
            .collect();
        Self {
            snapshot,
            registers,
            breakpoints: Vec::new(),
            script,
            next_id: 1,
        }
    }

    /// Parse a snapshot document.
    ///
    /// ## Errors
    ///
    /// - `Serialization`: the document is malformed
    pub fn from_json(json: &str) -> Result<Self>
    {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Load a snapshot file.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file cannot be read
    /// - `Serialization`: the document is malformed
    pub fn load(path: &Path) -> Result<Self>
    {
        let json = fs::read_to_string(path)?;
        let target = Self::from_json(&json)?;
        debug!(
            path = %path.display(),
            processes = target.snapshot.processes.len(),
            stops = target.script.len(),
            "snapshot loaded"
        );
        Ok(target)
    }

    /// Scripted points not yet reached.
    #[must_use]
    pub fn pending_stops(&self) -> usize
    {
        self.script.len()
    }

    fn arrive(&mut self) -> Option<Address>
    {
        let stop = self.script.pop_front()?;
        let ip = self.instruction_pointer();
        self.registers.extend(stop.registers);
        self.registers.insert(ip, stop.address.value());
        Some(stop.address)
    }

    fn instruction_pointer(&self) -> String
    {
        match self.snapshot.memory_model {
            Some(MemoryModel::Bits64) => "rip".to_string(),
            _ => "eip".to_string(),
        }
    }

    fn breakpoint_fires(&self, address: Address) -> bool
    {
        self.breakpoints
            .iter()
            .filter(|bp| bp.address == address)
            .any(|bp| match &bp.condition {
                None => true,
                Some(condition) => self.condition_holds(condition),
            })
    }

    fn condition_holds(&self, condition: &Condition) -> bool
    {
        self.registers
            .get(&condition.register().to_ascii_lowercase())
            .is_some_and(|value| condition.matches(*value))
    }

    fn process_snapshot(&self, object: Address) -> Result<&ProcessSnapshot>
    {
        self.snapshot
            .processes
            .iter()
            .find(|p| p.record.object == object)
            .ok_or(DebuggerError::StaleContext(object))
    }

    fn modules(&self) -> impl Iterator<Item = &ModuleSnapshot>
    {
        self.snapshot
            .kernel_modules
            .iter()
            .chain(self.snapshot.processes.iter().flat_map(|p| p.modules.iter()))
    }
}

fn lowercase(registers: &BTreeMap<String, u64>) -> BTreeMap<String, u64>
{
    registers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), *value))
        .collect()
}

impl Backend for SnapshotTarget
{
    fn read_register(&self, name: &str) -> Result<u64>
    {
        self.registers
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("register {name} not recorded")))
    }

    fn add_breakpoint(&mut self, address: Address, condition: Option<Condition>) -> Result<BackendBreakpointId>
    {
        let id = BackendBreakpointId::from_raw(self.next_id);
        self.next_id += 1;
        trace!(%id, %address, "breakpoint installed");
        self.breakpoints.push(InstalledBreakpoint { id, address, condition });
        Ok(id)
    }

    fn delete_breakpoint(&mut self, id: BackendBreakpointId) -> Result<()>
    {
        let position = self
            .breakpoints
            .iter()
            .position(|bp| bp.id == id)
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("no breakpoint {id}")))?;
        self.breakpoints.remove(position);
        Ok(())
    }

    fn resume(&mut self) -> Result<StopEvent>
    {
        while let Some(address) = self.arrive() {
            if self.breakpoint_fires(address) {
                return Ok(StopEvent::Breakpoint { address });
            }
            trace!(%address, "passed scripted point");
        }
        Ok(StopEvent::Exited)
    }

    fn single_step(&mut self) -> Result<StopEvent>
    {
        Ok(match self.arrive() {
            Some(address) => StopEvent::Step { address },
            None => StopEvent::Exited,
        })
    }

    fn installed_breakpoints(&self) -> Vec<InstalledBreakpoint>
    {
        self.breakpoints.clone()
    }
}

/// Regions searched in order.
struct RegionSpace<'a>
{
    regions: Vec<&'a Region>,
    model: Option<MemoryModel>,
}

impl AddressSpace for RegionSpace<'_>
{
    fn read(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        self.regions
            .iter()
            .find_map(|region| region.slice(address, len))
            .map(<[u8]>::to_vec)
            .ok_or(DebuggerError::MemoryRead { address, len })
    }

    fn memory_model(&self) -> Option<MemoryModel>
    {
        self.model
    }
}

impl Forensics for SnapshotTarget
{
    fn processes(&self) -> Result<Vec<ProcessRecord>>
    {
        Ok(self.snapshot.processes.iter().map(|p| p.record.clone()).collect())
    }

    fn process_modules(&self, context: &ProcessContext) -> Result<Vec<ModuleRecord>>
    {
        let process = self.process_snapshot(context.object())?;
        Ok(process.modules.iter().map(|m| m.module.clone()).collect())
    }

    fn kernel_modules(&self) -> Result<Vec<ModuleRecord>>
    {
        Ok(self.snapshot.kernel_modules.iter().map(|m| m.module.clone()).collect())
    }

    fn module_exports(&self, module: &ModuleRecord) -> Result<Vec<ExportRecord>>
    {
        let found = self
            .modules()
            .find(|m| m.module.base == module.base && m.module.name == module.name)
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("unknown module {}", module.name)))?;
        if found.paged_out {
            return Err(DebuggerError::MemoryRead {
                address: module.base,
                len: 0,
            });
        }
        Ok(found.exports.clone())
    }

    fn process_space(&self, translation_base: u64) -> Result<Box<dyn AddressSpace + '_>>
    {
        let process = self
            .snapshot
            .processes
            .iter()
            .find(|p| p.record.translation_base == translation_base)
            .ok_or_else(|| {
                DebuggerError::InvalidArgument(format!("no address space with translation base 0x{translation_base:x}"))
            })?;
        Ok(Box::new(RegionSpace {
            regions: process.regions.iter().chain(&self.snapshot.kernel).collect(),
            model: self.snapshot.memory_model,
        }))
    }

    fn kernel_space(&self) -> Result<Box<dyn AddressSpace + '_>>
    {
        Ok(Box::new(RegionSpace {
            regions: self.snapshot.kernel.iter().collect(),
            model: self.snapshot.memory_model,
        }))
    }
}

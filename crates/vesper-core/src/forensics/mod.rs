//! # Forensic View
//!
//! Read-only structured access to the target's memory image: address spaces,
//! the process list, loaded modules and their export tables.
//!
//! Kernel object layouts live behind this interface; nothing above it knows
//! where a process object keeps its page-directory base or its module list.

mod list;

pub use list::{ListDirection, ListWalker};
use serde::{Deserialize, Serialize};

use crate::error::{DebuggerError, Result};
use crate::types::{Address, MemoryModel, ProcessContext};

/// A readable virtual address space.
pub trait AddressSpace
{
    /// Read exactly `len` bytes at `address`.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: any byte of the range is unmapped
    fn read(&self, address: Address, len: usize) -> Result<Vec<u8>>;

    /// Declared memory model, if the space knows it.
    fn memory_model(&self) -> Option<MemoryModel>;

    /// Read a little-endian `u32`.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the four bytes are not readable
    fn read_u32(&self, address: Address) -> Result<u32>
    {
        let bytes = self.read(address, 4)?;
        bytes
            .get(..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_le_bytes)
            .ok_or(DebuggerError::MemoryRead { address, len: 4 })
    }

    /// Read a little-endian pointer of the given width.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the pointer is not readable
    fn read_pointer(&self, address: Address, model: MemoryModel) -> Result<Address>
    {
        match model {
            MemoryModel::Bits32 => self.read_u32(address).map(Address::from),
            MemoryModel::Bits64 => {
                let bytes = self.read(address, 8)?;
                bytes
                    .get(..8)
                    .and_then(|b| <[u8; 8]>::try_from(b).ok())
                    .map(|b| Address::new(u64::from_le_bytes(b)))
                    .ok_or(DebuggerError::MemoryRead { address, len: 8 })
            }
        }
    }
}

/// A process as the forensic layer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord
{
    /// Address of the process object
    pub object: Address,
    /// Process identifier
    pub pid: u32,
    /// Image file name
    pub name: String,
    /// Page-directory base of the process address space
    pub translation_base: u64,
    /// Process environment block, if the process has a user half
    #[serde(default)]
    pub peb: Option<Address>,
    /// Base of the main executable image
    #[serde(default)]
    pub image_base: Option<Address>,
}

impl ProcessRecord
{
    /// Context handle for this process with its translation base filled in.
    #[must_use]
    pub fn context(&self) -> ProcessContext
    {
        ProcessContext::with_translation_base(self.object, self.translation_base)
    }
}

/// A loaded module (DLL, driver or executable image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord
{
    /// Load address
    pub base: Address,
    /// Base file name, e.g. `ntdll.dll`
    pub name: String,
    /// Size of the mapped image
    #[serde(default)]
    pub size: u64,
}

/// One slot of a module's export table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord
{
    /// Export ordinal
    pub ordinal: u32,
    /// Offset of the export from the module base
    pub rva: u64,
    /// Export name; `None` for ordinal-only or unreadable slots
    #[serde(default)]
    pub name: Option<String>,
}

/// Memory-forensics framework over the target's memory image.
pub trait Forensics
{
    /// Every running process.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the process list could not be walked
    fn processes(&self) -> Result<Vec<ProcessRecord>>;

    /// The process whose object lives at `object`.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no process object at that address
    fn process(&self, object: Address) -> Result<ProcessRecord>
    {
        self.processes()?
            .into_iter()
            .find(|p| p.object == object)
            .ok_or_else(|| DebuggerError::InvalidArgument(format!("no process object at {object}")))
    }

    /// Modules loaded into a process, in memory order.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`: the process is gone
    /// - `MemoryRead`: the loader list could not be walked
    fn process_modules(&self, context: &ProcessContext) -> Result<Vec<ModuleRecord>>;

    /// Modules loaded into the kernel.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the kernel module list could not be walked
    fn kernel_modules(&self) -> Result<Vec<ModuleRecord>>;

    /// Export table of a module as `(ordinal, rva, name)` slots.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the export directory is not readable
    fn module_exports(&self, module: &ModuleRecord) -> Result<Vec<ExportRecord>>;

    /// Page-directory base of the process object at `object`.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: no process object at that address
    fn translation_base(&self, object: Address) -> Result<u64>
    {
        self.process(object).map(|p| p.translation_base)
    }

    /// Address space selected by a translation base.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`/`InvalidArgument`: unknown translation base
    fn process_space(&self, translation_base: u64) -> Result<Box<dyn AddressSpace + '_>>;

    /// The kernel address space.
    ///
    /// ## Errors
    ///
    /// - `BackendUnavailable`: no kernel image is available
    fn kernel_space(&self) -> Result<Box<dyn AddressSpace + '_>>;
}

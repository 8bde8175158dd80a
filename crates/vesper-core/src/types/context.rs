//! Process context and memory model types.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Address;
use crate::error::{DebuggerError, Result};
use crate::forensics::Forensics;

/// Instruction/pointer width of an address space
///
/// Serialised as `"32bit"` / `"64bit"`, the names the configuration file and
/// snapshot files use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryModel
{
    /// 32-bit x86
    #[default]
    #[serde(rename = "32bit")]
    Bits32,
    /// 64-bit x86-64
    #[serde(rename = "64bit")]
    Bits64,
}

impl MemoryModel
{
    /// Decoder bitness for this model (32 or 64).
    #[must_use]
    pub const fn bitness(self) -> u32
    {
        match self {
            MemoryModel::Bits32 => 32,
            MemoryModel::Bits64 => 64,
        }
    }

    /// Size of a pointer in bytes.
    #[must_use]
    pub const fn pointer_size(self) -> usize
    {
        match self {
            MemoryModel::Bits32 => 4,
            MemoryModel::Bits64 => 8,
        }
    }
}

impl FromStr for MemoryModel
{
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self>
    {
        match s {
            "32bit" | "32" => Ok(MemoryModel::Bits32),
            "64bit" | "64" => Ok(MemoryModel::Bits64),
            other => Err(DebuggerError::InvalidArgument(format!(
                "unknown memory model {other:?}, expected 32bit or 64bit"
            ))),
        }
    }
}

impl fmt::Display for MemoryModel
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            MemoryModel::Bits32 => write!(f, "32bit"),
            MemoryModel::Bits64 => write!(f, "64bit"),
        }
    }
}

/// One logical process in the target
///
/// A context is identified by the address of its process object. The
/// translation base (the page-directory base that the backend sees in `cr3`)
/// is what actually distinguishes one address space from another; it is
/// resolved lazily through [`Forensics::translation_base`] and cached.
///
/// Two contexts are equal when they name the same process object, whether or
/// not either has resolved its translation base yet.
///
/// ## Example
///
/// ```rust
/// use vesper_core::types::{Address, ProcessContext};
///
/// let lazy = ProcessContext::new(Address::new(0x81bc_a020));
/// let known = ProcessContext::with_translation_base(Address::new(0x81bc_a020), 0x0a9c_0000);
/// assert_eq!(lazy, known);
/// assert_eq!(lazy.translation_base(), None);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext
{
    object: Address,
    translation_base: Option<u64>,
}

impl ProcessContext
{
    /// Context for a process object whose translation base is not known yet.
    #[must_use]
    pub const fn new(object: Address) -> Self
    {
        Self {
            object,
            translation_base: None,
        }
    }

    /// Context with an already-known translation base.
    #[must_use]
    pub const fn with_translation_base(object: Address, translation_base: u64) -> Self
    {
        Self {
            object,
            translation_base: Some(translation_base),
        }
    }

    /// Address of the process object.
    #[must_use]
    pub const fn object(&self) -> Address
    {
        self.object
    }

    /// Cached translation base, if resolved.
    #[must_use]
    pub const fn translation_base(&self) -> Option<u64>
    {
        self.translation_base
    }

    /// Resolve (and cache) the translation base.
    ///
    /// ## Errors
    ///
    /// - `StaleContext`: the forensics layer has no translation base for this
    ///   process object (the process exited or the address is wrong)
    pub fn resolve_translation_base<F>(&mut self, forensics: &F) -> Result<u64>
    where
        F: Forensics + ?Sized,
    {
        if let Some(base) = self.translation_base {
            return Ok(base);
        }
        let base = forensics
            .translation_base(self.object)
            .map_err(|_| DebuggerError::StaleContext(self.object))?;
        self.translation_base = Some(base);
        Ok(base)
    }
}

impl PartialEq for ProcessContext
{
    fn eq(&self, other: &Self) -> bool
    {
        self.object == other.object
    }
}

impl Eq for ProcessContext {}

impl Hash for ProcessContext
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        self.object.hash(state);
    }
}

impl fmt::Display for ProcessContext
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.translation_base {
            Some(base) => write!(f, "process {} (dtb 0x{base:x})", self.object),
            None => write!(f, "process {}", self.object),
        }
    }
}

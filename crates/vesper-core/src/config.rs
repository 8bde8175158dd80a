//! # Session Configuration
//!
//! Tunables for a debugging session. Every field has a default, so an empty
//! (or missing) configuration file is valid.
//!
//! ```toml
//! [target]
//! memory_model = "32bit"
//! translation_base_register = "cr3"
//! context_switch_hook = 0x804db9ce
//!
//! [disassembly]
//! line_count = 40
//!
//! [symbols]
//! file = "/var/lib/vesper/xp.symbols.json"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Address, MemoryModel};

/// Address in `ntoskrnl` (Windows XP SP3) where the scheduler loads the next
/// thread's page-directory base into `cr3`.
pub const XP_SP3_CONTEXT_SWITCH: u64 = 0x804d_b9ce;

/// Full session configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig
{
    /// Target architecture and register names
    pub target: TargetConfig,
    /// Disassembly window defaults
    pub disassembly: DisassemblyConfig,
    /// Linked-list traversal limits
    pub traversal: TraversalConfig,
    /// Symbol persistence
    pub symbols: SymbolsConfig,
}

/// Target description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig
{
    /// Model used when an address space does not declare one
    pub memory_model: MemoryModel,
    /// Register holding the active translation base
    pub translation_base_register: String,
    /// Instruction pointer register
    pub instruction_pointer: String,
    /// Stack pointer register
    pub stack_pointer: String,
    /// Address at which a new translation base becomes active
    pub context_switch_hook: Address,
}

impl Default for TargetConfig
{
    fn default() -> Self
    {
        Self {
            memory_model: MemoryModel::Bits32,
            translation_base_register: "cr3".to_string(),
            instruction_pointer: "eip".to_string(),
            stack_pointer: "esp".to_string(),
            context_switch_hook: Address::new(XP_SP3_CONTEXT_SWITCH),
        }
    }
}

/// Disassembly defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisassemblyConfig
{
    /// Bytes decoded by `dis`
    pub length: usize,
    /// Lines shown after the window start by `dism`
    pub line_count: usize,
    /// Lines shown before the cursor by `dism`
    pub lines_before: usize,
    /// Bytes decoded by `dism`
    pub window_length: usize,
}

impl Default for DisassemblyConfig
{
    fn default() -> Self
    {
        Self {
            length: 128,
            line_count: 30,
            lines_before: 10,
            window_length: 356,
        }
    }
}

/// Linked-list traversal limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig
{
    /// Maximum records a single list walk may yield
    pub max_entries: usize,
}

impl Default for TraversalConfig
{
    fn default() -> Self
    {
        Self { max_entries: 4096 }
    }
}

/// Symbol persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolsConfig
{
    /// Default path for `store_symbols`/`restore_symbols`
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults()
    {
        let config = SessionConfig::default();
        assert_eq!(config.target.memory_model, MemoryModel::Bits32);
        assert_eq!(config.target.translation_base_register, "cr3");
        assert_eq!(config.target.context_switch_hook, Address::new(0x804d_b9ce));
        assert_eq!(config.disassembly.length, 128);
        assert_eq!(config.disassembly.line_count, 30);
        assert_eq!(config.disassembly.lines_before, 10);
        assert_eq!(config.disassembly.window_length, 356);
        assert_eq!(config.traversal.max_entries, 4096);
        assert!(config.symbols.file.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults()
    {
        let config: SessionConfig =
            serde_json::from_str(r#"{"target": {"memory_model": "64bit"}, "disassembly": {"line_count": 5}}"#).unwrap();
        assert_eq!(config.target.memory_model, MemoryModel::Bits64);
        assert_eq!(config.target.instruction_pointer, "eip");
        assert_eq!(config.disassembly.line_count, 5);
        assert_eq!(config.disassembly.lines_before, 10);
    }
}

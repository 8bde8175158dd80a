//! # vesper-core
//!
//! Process-aware debugging orchestration for live kernel-mode targets.
//!
//! A kernel debugger stub only understands flat addresses and one CPU
//! context at a time. This crate layers a per-process view on top of it:
//!
//! - **Breakpoints scoped to a process**: gated on the translation-base
//!   register, one physical breakpoint per address ([`breakpoints`])
//! - **Symbols**: `module!export` names for user and kernel modules, kept as
//!   bijective maps and persisted as one unit ([`symbols`])
//! - **Operand expressions**: `[esp+4]`, `eax*4`, `0x804d7000` evaluated
//!   against live state ([`expr`])
//! - **Disassembly**: call targets annotated with symbols, cursor windows,
//!   and step-over that treats calls as opaque ([`disasm`], [`step`])
//! - **Commands**: named capabilities resolved through a registry with
//!   dependency validation ([`registry`], [`capabilities`])
//!
//! ## Collaborators
//!
//! The debugger stub, the memory-forensics layer and the instruction decoder
//! are traits ([`backend::Backend`], [`forensics::Forensics`],
//! [`disasm::Disassembler`]). [`target::SnapshotTarget`] implements the first
//! two over a recorded snapshot; the `disasm` feature (on by default)
//! provides a decoder built on `iced-x86`.
//!
//! ## Example
//!
//! ```rust
//! use vesper_core::capabilities::builtin_registry;
//! use vesper_core::config::SessionConfig;
//! use vesper_core::target::SnapshotTarget;
//! use vesper_core::Session;
//!
//! let target = SnapshotTarget::from_json(r#"{ "registers": { "eax": 16, "cr3": 0 } }"#)?;
//! let mut session = Session::new(Box::new(target), SessionConfig::default());
//! let registry = builtin_registry()?;
//!
//! let output = registry.invoke(&mut session, "dec_op1", &["eax+4".to_string()])?;
//! assert_eq!(output.as_value(), Some(0x14));
//! # Ok::<(), vesper_core::DebuggerError>(())
//! ```

pub mod backend;
pub mod breakpoints;
pub mod capabilities;
pub mod config;
pub mod disasm;
pub mod error;
pub mod expr;
pub mod forensics;
pub mod registry;
pub mod session;
pub mod step;
pub mod symbols;
pub mod target;
pub mod types;

pub use backend::{Backend, StopEvent, Target};
pub use error::{DebuggerError, Result};
pub use registry::{Capability, Invocation, Output, Registry};
pub use session::Session;
pub use types::{Address, MemoryModel, ProcessContext};

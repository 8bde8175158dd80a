//! # Types
//!
//! Value types shared by every subsystem: target addresses, process contexts
//! and memory models.

pub mod address;
pub mod context;

pub use address::Address;
pub use context::{MemoryModel, ProcessContext};

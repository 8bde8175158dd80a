//! Target implementations.
//!
//! A live target wires a debugger stub and a forensic layer together behind
//! [`Target`](crate::backend::Target). The one shipped here replays a
//! recorded snapshot, which is enough to drive every command offline.

mod snapshot;

pub use snapshot::{ModuleSnapshot, ProcessSnapshot, Region, ScriptedStop, Snapshot, SnapshotTarget};

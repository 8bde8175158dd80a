//! # Error Types
//!
//! General error handling for the debugging session.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::Address;

/// Main error type for session operations
///
/// No variant is fatal to the session: a failed command reports its error to
/// the operator and the next command runs against the same state.
///
/// ## Error Categories
///
/// 1. **Registry errors**: UnknownCapability, DuplicateCapability, DependencyCycle,
///    UndeclaredDependency
/// 2. **Lookup errors**: UnknownSymbol, InvalidOperand, StaleContext
/// 3. **Collaborator errors**: BackendUnavailable, MemoryRead
/// 4. **Input errors**: InvalidArgument
/// 5. **I/O errors**: Io, Serialization (symbol files, snapshots)
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// No capability is registered under this name
    ///
    /// Raised both for direct invocations and for declared dependencies,
    /// before any `compute` runs.
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// A capability with this name is already registered
    ///
    /// Use `Registry::register_or_replace` to overwrite deliberately.
    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    /// Dependency resolution revisited a capability already on the path
    ///
    /// The payload is the cycle, e.g. `a -> b -> a`.
    #[error("Dependency cycle: {0}")]
    DependencyCycle(String),

    /// A capability called another it did not declare as a dependency
    #[error("Undeclared dependency: {caller} calls {callee}")]
    UndeclaredDependency
    {
        /// The calling capability
        caller: String,
        /// The capability it tried to call
        callee: String,
    },

    /// A command needed a symbol (by name or by address) that is not loaded
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The expression decoder could not parse a token
    #[error("Invalid operand: {0:?}")]
    InvalidOperand(String),

    /// The translation base of a process could not be resolved
    #[error("Stale process context: {0}")]
    StaleContext(Address),

    /// The debugger backend or the disassembly library is missing or unresponsive
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Invalid argument passed to a command or session operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Target memory could not be read
    #[error("Cannot read {len} bytes at {address}")]
    MemoryRead
    {
        /// Start of the failed read
        address: Address,
        /// Number of bytes requested
        len: usize,
    },

    /// I/O error (symbol files, breakpoint lists, snapshots)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted file could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DebuggerError
{
    fn from(err: serde_json::Error) -> Self
    {
        DebuggerError::Serialization(err.to_string())
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, DebuggerError>;

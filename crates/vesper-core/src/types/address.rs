//! Target virtual address type.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Strongly typed virtual address inside the debugged target
///
/// Addresses are always interpreted relative to some address space: the same
/// value names different bytes in two processes. Which space applies is
/// decided by the caller (see [`crate::Session::inspected_space`]).
///
/// ## Example
///
/// ```rust
/// use vesper_core::types::Address;
///
/// let base = Address::from(0x7c80_0000_u64);
/// let export = base + 0x1d4c;
/// assert_eq!(export.value(), 0x7c80_1d4c);
/// assert_eq!(export.to_string(), "0x7c801d4c");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    ///
    /// Used as the end-of-list marker when walking linked structures.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// Usable in const contexts:
    ///
    /// ```rust
    /// use vesper_core::types::Address;
    ///
    /// const CONTEXT_SWITCH: Address = Address::new(0x804d_b9ce);
    /// ```
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null address
    #[must_use]
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use vesper_core::types::Address;
    ///
    /// let addr = Address::from(0x1000_u64);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100_u64)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    #[must_use]
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, saturating at zero
    ///
    /// The disassembly window uses this to back up before the cursor without
    /// wrapping around the bottom of the address space.
    #[must_use]
    pub fn saturating_sub(self, offset: u64) -> Self
    {
        Address(self.0.saturating_sub(offset))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<u32> for Address
{
    fn from(value: u32) -> Self
    {
        Address(u64::from(value))
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

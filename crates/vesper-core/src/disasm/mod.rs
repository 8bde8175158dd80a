//! # Disassembly
//!
//! The instruction decoder interface, the default `iced-x86` implementation
//! (behind the `disasm` feature), and the engine that annotates call targets
//! with symbol names and windows the output around a cursor.

mod engine;
#[cfg(feature = "disasm")]
mod iced;

pub use engine::{annotate, call_operand, disassemble, disassemble_around_cursor, CursorWindow, DisassembledLine};
#[cfg(feature = "disasm")]
pub use iced::IcedDisassembler;

use crate::types::{Address, MemoryModel};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction
{
    /// Address of the first byte
    pub offset: Address,
    /// Encoded length in bytes
    pub length: usize,
    /// Intel-syntax text, lower case, e.g. `call dword ptr [eax+0x4]`
    pub text: String,
}

impl DecodedInstruction
{
    /// Mnemonic part of the text (prefixes such as `rep` included).
    #[must_use]
    pub fn mnemonic(&self) -> &str
    {
        self.text.split_whitespace().next().unwrap_or_default()
    }

    /// Whether this is a `call`.
    #[must_use]
    pub fn is_call(&self) -> bool
    {
        self.mnemonic().eq_ignore_ascii_case("call")
    }

    /// Address of the following instruction.
    #[must_use]
    pub fn next_offset(&self) -> Address
    {
        self.offset + self.length as u64
    }
}

/// Binary disassembly library
///
/// Decodes `bytes` (mapped at `address`) into a lazy sequence of
/// instructions. The sequence ends at the last complete instruction.
pub trait Disassembler
{
    /// Decode instructions.
    fn decode<'a>(
        &self,
        bytes: &'a [u8],
        address: Address,
        model: MemoryModel,
    ) -> Box<dyn Iterator<Item = DecodedInstruction> + 'a>;
}

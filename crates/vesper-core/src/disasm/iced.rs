//! `iced-x86` backed decoder.

use iced_x86::{Decoder, DecoderError, DecoderOptions, Formatter, Instruction, IntelFormatter, MemorySizeOptions};

use super::{DecodedInstruction, Disassembler};
use crate::types::{Address, MemoryModel};

/// Intel-syntax x86/x86-64 decoder built on `iced-x86`.
///
/// Numbers are printed as lower-case `0x` hex and memory operands without a
/// size keyword, so call operands come out in the form the operand decoder
/// understands (`call [eax+0x4]`, `call 0x804f0a10`).
#[derive(Debug, Clone, Copy, Default)]
pub struct IcedDisassembler;

impl IcedDisassembler
{
    /// Create a decoder.
    #[must_use]
    pub fn new() -> Self
    {
        Self
    }
}

impl Disassembler for IcedDisassembler
{
    fn decode<'a>(
        &self,
        bytes: &'a [u8],
        address: Address,
        model: MemoryModel,
    ) -> Box<dyn Iterator<Item = DecodedInstruction> + 'a>
    {
        let mut formatter = IntelFormatter::new();
        let options = formatter.options_mut();
        options.set_hex_prefix("0x");
        options.set_hex_suffix("");
        options.set_uppercase_hex(false);
        options.set_leading_zeros(false);
        options.set_branch_leading_zeros(false);
        options.set_small_hex_numbers_in_decimal(false);
        options.set_memory_size_options(MemorySizeOptions::Never);

        Box::new(Instructions {
            decoder: Decoder::with_ip(model.bitness(), bytes, address.value(), DecoderOptions::NONE),
            formatter,
            instruction: Instruction::default(),
            text: String::new(),
        })
    }
}

struct Instructions<'a>
{
    decoder: Decoder<'a>,
    formatter: IntelFormatter,
    instruction: Instruction,
    text: String,
}

impl Iterator for Instructions<'_>
{
    type Item = DecodedInstruction;

    fn next(&mut self) -> Option<Self::Item>
    {
        if !self.decoder.can_decode() {
            return None;
        }
        self.decoder.decode_out(&mut self.instruction);
        if self.decoder.last_error() == DecoderError::NoMoreBytes || self.instruction.len() == 0 {
            // truncated instruction at the end of the buffer
            return None;
        }

        self.text.clear();
        if self.instruction.is_invalid() {
            self.text.push_str("(bad)");
        } else {
            self.formatter.format(&self.instruction, &mut self.text);
        }
        Some(DecodedInstruction {
            offset: Address::new(self.instruction.ip()),
            length: self.instruction.len(),
            text: self.text.clone(),
        })
    }
}

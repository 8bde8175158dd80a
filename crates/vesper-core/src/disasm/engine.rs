//! Call annotation and cursor windows over a decoded instruction stream.

use std::fmt;

use tracing::warn;

use super::{DecodedInstruction, Disassembler};
use crate::expr::{decode_operand, OperandSource};
use crate::symbols::SymbolTable;
use crate::types::{Address, MemoryModel};

/// A line of disassembly as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledLine
{
    /// Instruction address
    pub offset: Address,
    /// Encoded length
    pub length: usize,
    /// Instruction text, with the call target replaced by its symbol when known
    pub text: String,
    /// Symbol the call target resolved to
    pub symbol: Option<String>,
}

impl fmt::Display for DisassembledLine
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:<#10x} {}", self.offset, self.text)
    }
}

/// A cursor-centred disassembly window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorWindow
{
    /// Every decoded line, starting before the window
    pub lines: Vec<DisassembledLine>,
    /// Index of the first line to show
    pub window_start: usize,
    /// Index of the line at the requested address, if decoding landed on it
    pub cursor: Option<usize>,
}

impl CursorWindow
{
    /// Lines from the window start on.
    #[must_use]
    pub fn visible(&self) -> &[DisassembledLine]
    {
        self.lines.get(self.window_start..).unwrap_or_default()
    }

    /// The cursor line.
    #[must_use]
    pub fn cursor_line(&self) -> Option<&DisassembledLine>
    {
        self.cursor.and_then(|i| self.lines.get(i))
    }
}

/// Operand text of a `call`, without size keywords or a segment override.
///
/// ```rust
/// use vesper_core::disasm::call_operand;
///
/// assert_eq!(call_operand("call 0x1000"), Some("0x1000"));
/// assert_eq!(call_operand("call dword ptr ds:[0x77e61234]"), Some("[0x77e61234]"));
/// assert_eq!(call_operand("mov eax,ebx"), None);
/// ```
#[must_use]
pub fn call_operand(text: &str) -> Option<&str>
{
    let (mnemonic, rest) = text.trim().split_once(char::is_whitespace)?;
    if !mnemonic.eq_ignore_ascii_case("call") {
        return None;
    }
    let mut operand = rest.trim();
    for keyword in ["dword ptr ", "qword ptr ", "fword ptr ", "dword ", "qword ", "far "] {
        if operand.get(..keyword.len()).is_some_and(|head| head.eq_ignore_ascii_case(keyword)) {
            operand = operand[keyword.len()..].trim_start();
        }
    }
    if let Some((segment, tail)) = operand.split_once(':') {
        if segment.len() == 2 && segment.ends_with(['s', 'S']) {
            operand = tail;
        }
    }
    Some(operand)
}

/// Annotate one instruction.
///
/// Calls whose target evaluates to a known symbol are rewritten to
/// `call module!export`. Evaluation failures are logged and the instruction
/// is kept as decoded.
pub fn annotate<S>(instruction: DecodedInstruction, symbols: &SymbolTable, operands: &S) -> DisassembledLine
where
    S: OperandSource + ?Sized,
{
    let DecodedInstruction { offset, length, text } = instruction;
    let mut line = DisassembledLine {
        offset,
        length,
        text,
        symbol: None,
    };
    let Some(operand) = call_operand(&line.text) else {
        return line;
    };

    match decode_operand(operand, operands) {
        Ok(target) => {
            if let Some(name) = symbols.resolve_address(Address::new(target)) {
                line.symbol = Some(name.to_string());
                line.text = format!("call {name}");
            }
        }
        Err(err) => warn!(%offset, text = %line.text, error = %err, "call target not resolved"),
    }
    line
}

/// Decode `bytes` mapped at `address` and annotate every call.
///
/// The sequence is lazy and ends at the last complete instruction; one
/// unresolvable call never ends it early.
pub fn disassemble<'a, S>(
    disassembler: &dyn Disassembler,
    bytes: &'a [u8],
    address: Address,
    model: MemoryModel,
    symbols: &'a SymbolTable,
    operands: &'a S,
) -> impl Iterator<Item = DisassembledLine> + 'a
where
    S: OperandSource + ?Sized,
{
    disassembler
        .decode(bytes, address, model)
        .map(move |instruction| annotate(instruction, symbols, operands))
}

/// Collect a window of `line_count` lines around the line at `address`.
///
/// `lines` must start before `address` (callers start decoding
/// `lines_before * 5` bytes earlier). The line whose offset equals `address`
/// becomes the cursor, the window starts `lines_before` lines above it, and
/// collection stops once `line_count` lines from the window start have been
/// gathered. When no line lands on `address` the first `line_count` lines are
/// kept and `cursor` is `None`.
pub fn disassemble_around_cursor<I>(lines: I, address: Address, line_count: usize, lines_before: usize) -> CursorWindow
where
    I: IntoIterator<Item = DisassembledLine>,
{
    let mut collected = Vec::new();
    let mut cursor = None;
    let mut window_start = 0;

    for line in lines {
        let index = collected.len();
        if cursor.is_none() && line.offset == address {
            cursor = Some(index);
            window_start = index.saturating_sub(lines_before);
        }
        collected.push(line);
        if cursor.is_some() && collected.len() >= window_start + line_count {
            break;
        }
    }
    if cursor.is_none() {
        collected.truncate(line_count);
    }

    CursorWindow {
        lines: collected,
        window_start,
        cursor,
    }
}

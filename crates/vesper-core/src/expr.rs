//! # Operand Expressions
//!
//! Evaluates the operand expressions an operator types (and the disassembler
//! prints): registers, hexadecimal literals, `+`, `-`, `*` and `[...]`
//! memory dereferences.
//!
//! ## Grammar
//!
//! ```text
//! expr := '[' expr ']'          read a little-endian u32 at expr
//!       | register              eax, EBX, cr3, ... (case-insensitive)
//!       | expr '+' expr         split at the first top-level '+'
//!       | expr '-' expr         else at the first top-level '-'
//!       | expr '*' expr         else at the first top-level '*'
//!       | hex                   with or without a 0x prefix
//! ```
//!
//! There is no operator precedence: the expression is split on the first
//! top-level `+`, then `-`, then `*`, and each half is evaluated on its own.
//! Most expressions come out as expected (`eax+ecx*4` is `eax + (ecx*4)`), but
//! chains of the same operator associate to the right: `6-2-1` is
//! `6 - (2-1)`, i.e. 5. Operators rely on this being stable.
//!
//! Brackets are honoured when splitting: `[eax+4]+8` dereferences `eax+4` and
//! then adds 8. Every intermediate and final value is masked to 32 bits.

use tracing::trace;

use crate::error::{DebuggerError, Result};
use crate::types::Address;

const MASK: u64 = 0xffff_ffff;
const MAX_DEPTH: usize = 64;

/// Register names the decoder recognises.
pub const REGISTERS: &[&str] = &[
    "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "eip", "eflags", "cs", "ss", "ds", "es", "fs", "gs",
    "cr0", "cr2", "cr3", "cr4",
];

/// Live state an expression is evaluated against.
pub trait OperandSource
{
    /// Current value of a register (lower-case name).
    ///
    /// ## Errors
    ///
    /// Whatever the backend reports for an unreadable register.
    fn register(&self, name: &str) -> Result<u64>;

    /// Little-endian `u32` at `address`.
    ///
    /// ## Errors
    ///
    /// - `MemoryRead`: the address is not mapped
    fn read_u32(&self, address: Address) -> Result<u32>;
}

/// Evaluate an operand expression.
///
/// ## Errors
///
/// - `InvalidOperand`: a leaf is neither a register nor a hex literal, or the
///   expression is empty or unbalanced
/// - `MemoryRead`: a dereference hit unmapped memory
///
/// ## Example
///
/// ```rust
/// use vesper_core::expr::{decode_operand, OperandSource};
/// use vesper_core::types::Address;
/// use vesper_core::Result;
///
/// struct Fixed;
/// impl OperandSource for Fixed {
///     fn register(&self, _name: &str) -> Result<u64> { Ok(0x1000) }
///     fn read_u32(&self, _address: Address) -> Result<u32> { Ok(0xdead_beef) }
/// }
///
/// assert_eq!(decode_operand("eax+4", &Fixed)?, 0x1004);
/// assert_eq!(decode_operand("[EAX]", &Fixed)?, 0xdead_beef);
/// assert_eq!(decode_operand("0x10*0x10", &Fixed)?, 0x100);
/// # Ok::<(), vesper_core::DebuggerError>(())
/// ```
pub fn decode_operand<S>(expression: &str, source: &S) -> Result<u64>
where
    S: OperandSource + ?Sized,
{
    let value = evaluate(expression, source, 0)?;
    trace!(expression, value, "operand decoded");
    Ok(value)
}

fn evaluate<S>(expression: &str, source: &S, depth: usize) -> Result<u64>
where
    S: OperandSource + ?Sized,
{
    let expr = expression.trim();
    if expr.is_empty() || depth > MAX_DEPTH {
        return Err(invalid(expression));
    }

    if let Some(inner) = dereference(expr) {
        let address = evaluate(inner, source, depth + 1)?;
        return Ok(u64::from(source.read_u32(Address::new(address))?) & MASK);
    }

    if let Some(register) = REGISTERS.iter().find(|r| r.eq_ignore_ascii_case(expr)) {
        return Ok(source.register(register)? & MASK);
    }

    for operator in ['+', '-', '*'] {
        if let Some(at) = split_point(expr, operator)? {
            let lhs = evaluate(&expr[..at], source, depth + 1)?;
            let rhs = evaluate(&expr[at + 1..], source, depth + 1)?;
            let value = match operator {
                '+' => lhs.wrapping_add(rhs),
                '-' => lhs.wrapping_sub(rhs),
                _ => lhs.wrapping_mul(rhs),
            };
            return Ok(value & MASK);
        }
    }

    parse_hex(expr)
}

/// The inside of `[...]` when the brackets enclose the whole expression.
fn dereference(expr: &str) -> Option<&str>
{
    let inner = expr.strip_prefix('[')?.strip_suffix(']')?;
    let mut depth = 0usize;
    for c in inner.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// Byte index of the first `operator` outside any brackets.
fn split_point(expr: &str, operator: char) -> Result<Option<usize>>
{
    let mut depth = 0usize;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1).ok_or_else(|| invalid(expr))?,
            c if c == operator && depth == 0 => return Ok(Some(i)),
            _ => {}
        }
    }
    Ok(None)
}

fn parse_hex(token: &str) -> Result<u64>
{
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16)
        .map(|value| value & MASK)
        .map_err(|_| invalid(token))
}

fn invalid(token: &str) -> DebuggerError
{
    DebuggerError::InvalidOperand(token.to_string())
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    struct Fake
    {
        registers: HashMap<&'static str, u64>,
        memory: HashMap<u64, u32>,
    }

    impl OperandSource for Fake
    {
        fn register(&self, name: &str) -> Result<u64>
        {
            self.registers
                .get(name)
                .copied()
                .ok_or_else(|| DebuggerError::InvalidArgument(name.to_string()))
        }

        fn read_u32(&self, address: Address) -> Result<u32>
        {
            self.memory
                .get(&address.value())
                .copied()
                .ok_or(DebuggerError::MemoryRead { address, len: 4 })
        }
    }

    fn fake() -> Fake
    {
        Fake {
            registers: HashMap::from([("eax", 0x0012_ff00), ("ecx", 3), ("esp", 0x0006_fe00), ("cr3", 0x0a9c_0000)]),
            memory: HashMap::from([(0x0012_ff00, 0x7c90_1000), (0x0012_ff04, 0x11), (0x7c90_1000, 0x4242_4242)]),
        }
    }

    #[test]
    fn test_register_is_case_insensitive()
    {
        assert_eq!(decode_operand("eax", &fake()).unwrap(), 0x0012_ff00);
        assert_eq!(decode_operand("EAX", &fake()).unwrap(), 0x0012_ff00);
        assert_eq!(decode_operand(" Cr3 ", &fake()).unwrap(), 0x0a9c_0000);
    }

    #[test]
    fn test_register_value_is_masked()
    {
        let mut source = fake();
        source.registers.insert("eax", 0x1_0000_0010);
        assert_eq!(decode_operand("eax", &source).unwrap(), 0x10);
    }

    #[test]
    fn test_arithmetic()
    {
        assert_eq!(decode_operand("eax+4", &fake()).unwrap(), 0x0012_ff04);
        assert_eq!(decode_operand("eax-0x100", &fake()).unwrap(), 0x0012_fe00);
        assert_eq!(decode_operand("ecx*4", &fake()).unwrap(), 12);
        assert_eq!(decode_operand("0-1", &fake()).unwrap(), 0xffff_ffff);
        assert_eq!(decode_operand("ffffffff+2", &fake()).unwrap(), 1);
    }

    #[test]
    fn test_no_precedence()
    {
        // split on '+' first: 2 + (3*4)
        assert_eq!(decode_operand("2+3*4", &fake()).unwrap(), 14);
        // '+' before '-': (0x10-4) + 2
        assert_eq!(decode_operand("10-4+2", &fake()).unwrap(), 0xe);
        // right-associative chains: 6 - (2-1)
        assert_eq!(decode_operand("6-2-1", &fake()).unwrap(), 5);
        // '-' before '*': (2*3) - 1
        assert_eq!(decode_operand("2*3-1", &fake()).unwrap(), 5);
    }

    #[test]
    fn test_dereference()
    {
        assert_eq!(decode_operand("[eax]", &fake()).unwrap(), 0x7c90_1000);
        assert_eq!(decode_operand("[eax+4]", &fake()).unwrap(), 0x11);
        assert_eq!(decode_operand("[[eax]]", &fake()).unwrap(), 0x4242_4242);
        assert_eq!(decode_operand("[eax]+8", &fake()).unwrap(), 0x7c90_1008);
        assert_eq!(decode_operand("[eax+ecx*0]", &fake()).unwrap(), 0x7c90_1000);
    }

    #[test]
    fn test_invalid_leaf()
    {
        assert!(matches!(decode_operand("xyz", &fake()), Err(DebuggerError::InvalidOperand(_))));
        assert!(matches!(decode_operand("", &fake()), Err(DebuggerError::InvalidOperand(_))));
        assert!(matches!(decode_operand("eax+", &fake()), Err(DebuggerError::InvalidOperand(_))));
        assert!(matches!(decode_operand("[eax", &fake()), Err(DebuggerError::InvalidOperand(_))));
        assert!(matches!(decode_operand("eax]", &fake()), Err(DebuggerError::InvalidOperand(_))));
    }

    #[test]
    fn test_unmapped_dereference()
    {
        assert!(matches!(decode_operand("[esp]", &fake()), Err(DebuggerError::MemoryRead { .. })));
    }
}

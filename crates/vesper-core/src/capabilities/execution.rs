//! Execution control and disassembly.

use super::{address_arg, arg, count_arg, Builtin};
use crate::error::{DebuggerError, Result};
use crate::registry::{Invocation, Output};
use crate::types::{Address, MemoryModel};

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin::new("c", &[], "c", resume),
    Builtin::new("si", &[], "si", step_into),
    Builtin::new("ni", &[], "ni", step_over),
    Builtin::new("until", &["dec_op1"], "until <address>", until),
    Builtin::new("sd", &["si", "dism"], "sd", step_and_show),
    Builtin::new("dis", &["dec_op1"], "dis [address] [length] [32bit|64bit]", dis),
    Builtin::new("dism", &["dec_op1"], "dism [address] [lines] [lines-before] [length]", dism),
    Builtin::new("nop", &[], "nop", nop),
];

fn resume(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    cx.session().continue_execution().map(Output::Stop)
}

fn step_into(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    cx.session().step_into().map(Output::Stop)
}

fn step_over(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    cx.session().step_over().map(Output::Step)
}

fn until(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let address = address_arg(cx, args, 0)?
        .ok_or_else(|| DebuggerError::InvalidArgument("missing address".to_string()))?;
    cx.session().run_until(address).map(Output::Stop)
}

fn step_and_show(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    cx.call("si", &[])?;
    cx.call("dism", &[])
}

/// Argument `index` as an address, defaulting to the instruction pointer.
fn address_or_ip(cx: &mut Invocation<'_>, args: &[String], index: usize) -> Result<Address>
{
    match address_arg(cx, args, index)? {
        Some(address) => Ok(address),
        None => cx.session().instruction_pointer(),
    }
}

fn dis(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let address = address_or_ip(cx, args, 0)?;
    let length = count_arg(args, 1, cx.session().config().disassembly.length)?;
    let model = arg(args, 2).map(str::parse::<MemoryModel>).transpose()?;
    cx.session().disassemble(address, length, model).map(Output::Lines)
}

fn dism(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let address = address_or_ip(cx, args, 0)?;
    let defaults = cx.session().config().disassembly;
    let line_count = count_arg(args, 1, defaults.line_count)?;
    let lines_before = count_arg(args, 2, defaults.lines_before)?;
    let length = count_arg(args, 3, defaults.window_length)?;
    cx.session()
        .disassemble_around_cursor(address, line_count, lines_before, length)
        .map(Output::Window)
}

fn nop(_cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    Ok(Output::None)
}

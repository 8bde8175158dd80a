//! Breakpoint commands.

use std::fs;

use tracing::warn;

use super::{address_arg, arg, required, Builtin};
use crate::error::Result;
use crate::registry::{Invocation, Output};
use crate::types::Address;

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin::new("b", &["dec_op1"], "b [symbol|address] [process]", set),
    Builtin::new("bd", &["gr", "dec_op1"], "bd <address> [translation-base]", set_for_base),
    Builtin::new("db", &["dec_op1"], "db <address>", delete),
    Builtin::new("bl", &[], "bl", list),
    Builtin::new("bpl", &["b"], "bpl <file> [process]", set_from_file),
];

/// Resolve a breakpoint location: a symbol, else an address expression,
/// else the instruction pointer.
fn location(cx: &mut Invocation<'_>, args: &[String]) -> Result<Address>
{
    let Some(text) = arg(args, 0) else {
        return cx.session().instruction_pointer();
    };
    if let Some(address) = cx.session().symbols().resolve_name(text) {
        return Ok(address);
    }
    cx.call_value("dec_op1", &[text.to_string()]).map(Address::new)
}

fn set(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let address = location(cx, args)?;
    let scope = address_arg(cx, args, 1)?;
    let breakpoint = cx.session().add_breakpoint(address, scope)?;
    Ok(Output::Breakpoints(vec![breakpoint]))
}

fn set_for_base(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let address = cx.call_value("dec_op1", &[required(args, 0, "address")?.to_string()])?;
    let base = match arg(args, 1) {
        Some(text) => cx.call_value("dec_op1", &[text.to_string()])?,
        None => {
            let register = cx.session().config().target.translation_base_register.clone();
            cx.call_value("gr", &[register])?
        }
    };
    let breakpoint = cx.session().add_breakpoint_for_base(Address::new(address), base)?;
    Ok(Output::Breakpoints(vec![breakpoint]))
}

fn delete(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let expression = required(args, 0, "address")?.to_string();
    let address = Address::new(cx.call_value("dec_op1", &[expression])?);
    let message = if cx.session().delete_breakpoint(address)? {
        format!("breakpoint at {address} deleted")
    } else {
        format!("no breakpoint at {address}")
    };
    Ok(Output::Text(message))
}

fn list(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    Ok(Output::Breakpoints(cx.session().breakpoints().list()))
}

fn set_from_file(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let path = required(args, 0, "breakpoint file")?;
    let contents = fs::read_to_string(path)?;
    let scope = arg(args, 1);

    let mut set = Vec::new();
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut b_args = vec![line.to_string()];
        b_args.extend(scope.map(str::to_string));
        match cx.call("b", &b_args) {
            Ok(Output::Breakpoints(added)) => set.extend(added),
            Ok(_) => {}
            Err(err) => warn!(location = line, error = %err, "breakpoint from file not set"),
        }
    }
    Ok(Output::Breakpoints(set))
}

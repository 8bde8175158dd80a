//! Operand decoding and symbol commands.

use std::path::Path;

use super::{arg, Builtin};
use crate::error::{DebuggerError, Result};
use crate::registry::{Invocation, Output};
use crate::symbols::SymbolEntry;
use crate::types::Address;

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin::new("dec_op1", &[], "dec_op1 <expression>", decode),
    Builtin::new("sym", &["dec_op1"], "sym <name|address>", lookup),
    Builtin::new("reload_symbols", &[], "reload_symbols", reload_process),
    Builtin::new("reload_kernel_symbols", &[], "reload_kernel_symbols", reload_kernel),
    Builtin::new("store_symbols", &[], "store_symbols [path]", store),
    Builtin::new("restore_symbols", &[], "restore_symbols [path]", restore),
];

fn decode(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let expression = args.join(" ");
    cx.session().decode_operand(&expression).map(Output::Value)
}

/// A qualified name resolves to its address, or reports the alias that
/// shadows it; anything else is evaluated and resolved as an address.
fn lookup(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let key = arg(args, 0).ok_or_else(|| DebuggerError::InvalidArgument("missing name or address".to_string()))?;
    if let Some(address) = cx.session().symbols().resolve_name(key) {
        return Ok(Output::Symbol(SymbolEntry {
            name: key.to_string(),
            address,
        }));
    }
    let symbols = cx.session().symbols();
    if let Some(winner) = symbols.shadowed_by(key) {
        let text = match symbols.resolve_name(winner) {
            Some(address) => format!("{key} is shadowed by {winner} at {address}"),
            None => format!("{key} is shadowed by {winner}"),
        };
        return Ok(Output::Text(text));
    }
    if key.contains('!') {
        return Err(DebuggerError::UnknownSymbol(key.to_string()));
    }

    let address = Address::new(cx.call_value("dec_op1", &[key.to_string()])?);
    cx.session()
        .symbols()
        .resolve_address(address)
        .map(|name| {
            Output::Symbol(SymbolEntry {
                name: name.to_string(),
                address,
            })
        })
        .ok_or_else(|| DebuggerError::UnknownSymbol(address.to_string()))
}

fn reload_process(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    let count = cx.session().reload_process_symbols()?;
    Ok(Output::Text(format!("{count} process symbols loaded")))
}

fn reload_kernel(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    let count = cx.session().reload_kernel_symbols()?;
    Ok(Output::Text(format!("{count} kernel symbols loaded")))
}

fn store(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let path = cx.session().store_symbols(arg(args, 0).map(Path::new))?;
    Ok(Output::Text(format!("symbols stored to {}", path.display())))
}

fn restore(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let path = cx.session().restore_symbols(arg(args, 0).map(Path::new))?;
    let merged = cx.session().symbols().merged().len();
    Ok(Output::Text(format!("{merged} symbols restored from {}", path.display())))
}

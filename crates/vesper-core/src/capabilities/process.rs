//! Process objects, contexts and kernel lists.

use tracing::debug;

use super::{address_arg, arg, count_arg, required, Builtin};
use crate::error::{DebuggerError, Result};
use crate::forensics::{ListDirection, ListWalker};
use crate::registry::{Invocation, Output};
use crate::types::{Address, MemoryModel};

const DEFAULT_PROCESS: &str = "System";

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin::new("ps", &[], "ps", processes),
    Builtin::new("pn2e", &["ps"], "pn2e [name]", name_to_process),
    Builtin::new("cc", &[], "cc", current_context),
    Builtin::new("sc", &["dec_op1"], "sc <process>", set_context),
    Builtin::new("e2d", &["cc", "dec_op1"], "e2d [process]", translation_base),
    Builtin::new("e2peb", &["cc", "dec_op1"], "e2peb [process]", peb),
    Builtin::new("e2ib", &["cc", "dec_op1", "e2peb"], "e2ib [process]", image_base),
    Builtin::new("e2imoml", &["cc", "dec_op1"], "e2imoml [process]", modules),
    Builtin::new("in2dh", &["e2imoml", "ib2dh"], "in2dh <image-name>", image_name_to_dos_header),
    Builtin::new("itl", &["dec_op1"], "itl <list-head> [entry-offset] [back]", walk_list),
    Builtin::new("eprocWait", &["dec_op1"], "eprocWait <process>", wait_for_process),
];

fn hex(address: Address) -> String
{
    format!("{:#x}", address.value())
}

/// Argument `index` as a process object, defaulting to the current process.
///
/// A context chosen with `sc` stays current; `cc` runs only when there is
/// no current context yet.
fn process_object(cx: &mut Invocation<'_>, args: &[String], index: usize) -> Result<Address>
{
    if let Some(object) = address_arg(cx, args, index)? {
        return Ok(object);
    }
    if let Some(context) = cx.session().current_context() {
        return Ok(context.object());
    }
    match cx.call("cc", &[])? {
        Output::Context(Some(context)) => Ok(context.object()),
        _ => Err(DebuggerError::InvalidArgument("no current process".to_string())),
    }
}

fn processes(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    cx.session().target().processes().map(Output::Processes)
}

fn name_to_process(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let name = arg(args, 0).unwrap_or(DEFAULT_PROCESS);
    let Output::Processes(processes) = cx.call("ps", &[])? else {
        return Err(DebuggerError::InvalidArgument("ps produced no process list".to_string()));
    };
    processes
        .iter()
        .find(|p| p.name.contains(name))
        .map(|p| Output::Value(p.object.value()))
        .ok_or_else(|| DebuggerError::InvalidArgument(format!("no process named like {name}")))
}

fn current_context(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    cx.session().refresh_context().map(Output::Context)
}

fn set_context(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let object = address_arg(cx, args, 0)?
        .ok_or_else(|| DebuggerError::InvalidArgument("missing process".to_string()))?;
    cx.session().set_context(object).map(|c| Output::Context(Some(c)))
}

fn translation_base(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let object = process_object(cx, args, 0)?;
    let context = cx.session().context_for(object)?;
    context
        .translation_base()
        .map(Output::Value)
        .ok_or(DebuggerError::StaleContext(object))
}

fn peb(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let object = process_object(cx, args, 0)?;
    let record = cx.session().target().process(object)?;
    record
        .peb
        .map(|peb| Output::Value(peb.value()))
        .ok_or_else(|| DebuggerError::InvalidArgument(format!("process {} has no PEB", record.name)))
}

/// `ImageBaseAddress` from the PEB, read in the process's own space.
///
/// Falls back to the image base the forensic layer reports when the PEB
/// is paged out.
fn image_base(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let object = process_object(cx, args, 0)?;
    let peb = Address::new(cx.call_value("e2peb", &[hex(object)])?);

    let session = cx.session();
    let record = session.target().process(object)?;
    let space = session.target().process_space(record.translation_base)?;
    let model = space.memory_model().unwrap_or(session.config().target.memory_model);
    let field = match model {
        MemoryModel::Bits32 => 0x8,
        MemoryModel::Bits64 => 0x10,
    };

    match space.read_pointer(peb + field, model) {
        Ok(base) => Ok(Output::Value(base.value())),
        Err(err) => match record.image_base {
            Some(base) => {
                debug!(%peb, error = %err, "PEB unreadable, using recorded image base");
                Ok(Output::Value(base.value()))
            }
            None => Err(err),
        },
    }
}

fn modules(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let object = process_object(cx, args, 0)?;
    let session = cx.session();
    let context = session.context_for(object)?;
    session.target().process_modules(&context).map(Output::Modules)
}

fn image_name_to_dos_header(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let name = required(args, 0, "image name")?;
    let Output::Modules(modules) = cx.call("e2imoml", &[])? else {
        return Err(DebuggerError::InvalidArgument("e2imoml produced no module list".to_string()));
    };
    let module = modules
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| DebuggerError::UnknownSymbol(name.to_string()))?;
    cx.call("ib2dh", &[hex(module.base)])
}

fn walk_list(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let head = address_arg(cx, args, 0)?
        .ok_or_else(|| DebuggerError::InvalidArgument("missing list head".to_string()))?;
    let entry_offset = count_arg(args, 1, 0)? as u64;
    let direction = match arg(args, 2) {
        Some("back" | "b") => ListDirection::Backward,
        Some(other) => return Err(DebuggerError::InvalidArgument(format!("unknown direction {other}"))),
        None => ListDirection::Forward,
    };
    let max_entries = cx.session().config().traversal.max_entries;

    cx.session().with_inspected_space(|space, model| {
        let records = ListWalker::new(space, head, entry_offset, model)
            .direction(direction)
            .max_entries(max_entries)
            .collect();
        Ok(Output::Addresses(records))
    })
}

fn wait_for_process(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let object = address_arg(cx, args, 0)?
        .ok_or_else(|| DebuggerError::InvalidArgument("missing process".to_string()))?;
    cx.session().wait_for_context(object).map(Output::Arrival)
}

//! Register and stack views.

use std::fmt::Write as _;

use super::{count_arg, required, Builtin};
use crate::error::{DebuggerError, Result};
use crate::registry::{Invocation, Output};

const GENERAL: [&str; 9] = ["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "eip"];
const SEGMENT: [&str; 6] = ["cs", "ss", "ds", "es", "fs", "gs"];

/// eflags bits shown by `regs3`, as (name, bit).
const FLAGS: [(&str, u32); 9] = [
    ("c", 0),
    ("p", 2),
    ("a", 4),
    ("z", 6),
    ("s", 7),
    ("t", 8),
    ("i", 9),
    ("d", 10),
    ("o", 11),
];

const STACK_WORDS: usize = 16;

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin::new("gr", &[], "gr <register>", gr),
    Builtin::new("regs", &["gr"], "regs", regs),
    Builtin::new("regs2", &["gr"], "regs2", regs2),
    Builtin::new("regs3", &["gr"], "regs3", regs3).with_render(render_flags),
    Builtin::new("regs4", &["gr"], "regs4", regs4),
    Builtin::new("su", &["gr"], "su [count]", su),
];

fn gr(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let name = required(args, 0, "register name")?;
    cx.session().read_register(name).map(Output::Value)
}

fn read_all(cx: &mut Invocation<'_>, names: &[&str]) -> Result<Output>
{
    let mut values = Vec::with_capacity(names.len());
    for name in names {
        let value = cx.call_value("gr", &[(*name).to_string()])?;
        values.push(((*name).to_string(), value));
    }
    Ok(Output::Registers(values))
}

fn regs(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    read_all(cx, &GENERAL)
}

fn regs2(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    read_all(cx, &SEGMENT)
}

fn regs3(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    let eflags = cx.call_value("gr", &["eflags".to_string()])?;
    let bits = FLAGS
        .iter()
        .map(|(name, bit)| ((*name).to_string(), (eflags >> bit) & 1))
        .collect();
    Ok(Output::Registers(bits))
}

fn render_flags(output: &Output) -> String
{
    let Output::Registers(bits) = output else {
        return crate::registry::render_output(output);
    };
    let mut out = String::new();
    for (name, value) in bits {
        let _ = write!(out, "{name}:{value} ");
    }
    out.trim_end().to_string()
}

fn regs4(cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
{
    let register = cx.session().config().target.translation_base_register.clone();
    read_all(cx, &[register.as_str()])
}

fn su(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let words = count_arg(args, 0, STACK_WORDS)?;
    let stack_pointer = cx.session().config().target.stack_pointer.clone();
    let top = cx.call_value("gr", &[stack_pointer])?;
    let bytes = cx.session().read_memory(top.into(), words * 4)?;

    bytes
        .chunks_exact(4)
        .map(|chunk| {
            <[u8; 4]>::try_from(chunk)
                .map(u32::from_le_bytes)
                .map_err(|_| DebuggerError::MemoryRead {
                    address: top.into(),
                    len: words * 4,
                })
        })
        .collect::<Result<Vec<_>>>()
        .map(Output::Words)
}

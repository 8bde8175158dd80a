//! # Built-in Capabilities
//!
//! The operator command set. Each command is a thin function over the
//! session or over other commands, registered by name with the commands it
//! calls as dependencies.
//!
//! | Group | Commands |
//! |-------|----------|
//! | registers | `gr` `regs` `regs2` `regs3` `regs4` `su` |
//! | execution | `c` `si` `ni` `until` `sd` `dis` `dism` `nop` |
//! | breakpoints | `b` `bd` `db` `bl` `bpl` |
//! | process | `ps` `pn2e` `cc` `sc` `e2d` `e2peb` `e2ib` `e2imoml` `in2dh` `itl` `eprocWait` |
//! | image | `ib2dh` `ib2nth` `ib2oh` `ib2epo` |
//! | symbols | `dec_op1` `sym` `reload_symbols` `reload_kernel_symbols` `store_symbols` `restore_symbols` |

mod breakpoints;
mod execution;
mod image;
mod process;
mod registers;
mod symbols;

use crate::error::{DebuggerError, Result};
use crate::registry::{render_output, Capability, Invocation, Output, Registry};
use crate::types::Address;

type ComputeFn = fn(&mut Invocation<'_>, &[String]) -> Result<Output>;
type RenderFn = fn(&Output) -> String;

/// Registration record for one built-in command.
#[derive(Clone, Copy)]
struct Builtin
{
    name: &'static str,
    dependencies: &'static [&'static str],
    usage: &'static str,
    compute: ComputeFn,
    render: RenderFn,
}

impl Builtin
{
    const fn new(name: &'static str, dependencies: &'static [&'static str], usage: &'static str, compute: ComputeFn) -> Self
    {
        Self {
            name,
            dependencies,
            usage,
            compute,
            render: render_output,
        }
    }

    const fn with_render(mut self, render: RenderFn) -> Self
    {
        self.render = render;
        self
    }
}

impl Capability for Builtin
{
    fn compute(&self, cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
    {
        (self.compute)(cx, args)
    }

    fn render(&self, output: &Output) -> String
    {
        (self.render)(output)
    }

    fn usage(&self) -> &'static str
    {
        self.usage
    }
}

/// Register every built-in command and validate the dependency graph.
///
/// ## Errors
///
/// - `DuplicateCapability`: a built-in name is already registered
/// - `UnknownCapability`/`DependencyCycle`: the graph does not validate
pub fn register_builtin(registry: &mut Registry) -> Result<()>
{
    let groups = [
        registers::BUILTINS,
        execution::BUILTINS,
        breakpoints::BUILTINS,
        process::BUILTINS,
        image::BUILTINS,
        symbols::BUILTINS,
    ];
    for builtin in groups.into_iter().flatten().copied() {
        registry.register(builtin.name, builtin.dependencies, move || Box::new(builtin))?;
    }
    registry.validate()
}

/// A registry holding the built-in command set.
///
/// ## Errors
///
/// Same as [`register_builtin`].
pub fn builtin_registry() -> Result<Registry>
{
    let mut registry = Registry::new();
    register_builtin(&mut registry)?;
    Ok(registry)
}

// ============================================================================
// Argument helpers
// ============================================================================

fn arg(args: &[String], index: usize) -> Option<&str>
{
    args.get(index).map(String::as_str)
}

fn required<'a>(args: &'a [String], index: usize, what: &str) -> Result<&'a str>
{
    arg(args, index).ok_or_else(|| DebuggerError::InvalidArgument(format!("missing {what}")))
}

/// Evaluate argument `index` as an address expression through `dec_op1`.
fn address_arg(cx: &mut Invocation<'_>, args: &[String], index: usize) -> Result<Option<Address>>
{
    match arg(args, index) {
        Some(expression) => cx
            .call_value("dec_op1", &[expression.to_string()])
            .map(|value| Some(Address::new(value))),
        None => Ok(None),
    }
}

/// Decimal, or hex with a `0x` prefix.
fn count(text: &str) -> Result<usize>
{
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| DebuggerError::InvalidArgument(format!("not a count: {text}")))
}

fn count_arg(args: &[String], index: usize, default: usize) -> Result<usize>
{
    arg(args, index).map_or(Ok(default), count)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_builtin_graph_validates()
    {
        let registry = builtin_registry().expect("built-ins validate");
        for name in ["gr", "dis", "dism", "ni", "b", "bpl", "eprocWait", "ib2epo", "store_symbols"] {
            assert!(registry.contains(name), "{name} missing");
        }
    }

    #[test]
    fn test_builtins_cannot_be_registered_twice()
    {
        let mut registry = builtin_registry().expect("built-ins validate");
        let err = register_builtin(&mut registry).unwrap_err();
        assert!(matches!(err, DebuggerError::DuplicateCapability(_)));
    }

    #[test]
    fn test_count_parsing()
    {
        assert_eq!(count("16").unwrap(), 16);
        assert_eq!(count("0x20").unwrap(), 32);
        assert!(count("ten").is_err());
    }
}

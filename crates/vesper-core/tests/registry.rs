//! Capability resolution, dependency checks and invocation

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::*;
use vesper_core::capabilities::register_builtin;
use vesper_core::target::Snapshot;
use vesper_core::{Capability, DebuggerError, Invocation, Output, Registry, Result};

struct Recorder
{
    ran: Rc<Cell<bool>>,
}

impl Capability for Recorder
{
    fn compute(&self, _cx: &mut Invocation<'_>, _args: &[String]) -> Result<Output>
    {
        self.ran.set(true);
        Ok(Output::Value(1))
    }
}

/// Calls the capability named by its first argument.
struct Forward;

impl Capability for Forward
{
    fn compute(&self, cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
    {
        let target = args.first().cloned().unwrap_or_default();
        cx.call(&target, args)
    }
}

fn recorder(registry: &mut Registry, name: &str, dependencies: &[&str]) -> Rc<Cell<bool>>
{
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);
    registry
        .register(name, dependencies, move || Box::new(Recorder { ran: Rc::clone(&flag) }))
        .unwrap();
    ran
}

#[test]
fn test_missing_dependency_fails_before_compute()
{
    let mut registry = Registry::new();
    let ran = recorder(&mut registry, "outer", &["inner"]);
    let mut session = session(Snapshot::default());

    let err = registry.invoke(&mut session, "outer", &[]).unwrap_err();
    assert!(matches!(err, DebuggerError::UnknownCapability(ref name) if name.contains("inner")));
    assert!(!ran.get());
    assert!(registry.validate().is_err());
}

#[test]
fn test_unknown_name()
{
    let registry = Registry::new();
    let mut session = session(Snapshot::default());
    let err = registry.invoke(&mut session, "nope", &[]).unwrap_err();
    assert!(matches!(err, DebuggerError::UnknownCapability(ref name) if name == "nope"));
}

#[test]
fn test_declared_cycle_is_detected()
{
    let mut registry = Registry::new();
    let ran = recorder(&mut registry, "a", &["b"]);
    recorder(&mut registry, "b", &["c"]);
    recorder(&mut registry, "c", &["a"]);

    let err = registry.validate().unwrap_err();
    assert!(matches!(err, DebuggerError::DependencyCycle(_)));

    let mut session = session(Snapshot::default());
    let err = registry.invoke(&mut session, "a", &[]).unwrap_err();
    let DebuggerError::DependencyCycle(path) = err else {
        panic!("expected a cycle");
    };
    assert_eq!(path, "a -> b -> c -> a");
    assert!(!ran.get());
}

#[test]
fn test_undeclared_call_is_rejected()
{
    let mut registry = Registry::new();
    registry.register("forward", &["leaf"], || Box::new(Forward)).unwrap();
    let leaf = recorder(&mut registry, "leaf", &[]);
    let other = recorder(&mut registry, "other", &[]);
    registry.validate().unwrap();
    let mut session = session(Snapshot::default());

    let err = registry.invoke(&mut session, "forward", &args(&["other"])).unwrap_err();
    assert!(matches!(
        err,
        DebuggerError::UndeclaredDependency { ref caller, ref callee } if caller == "forward" && callee == "other"
    ));
    assert!(!other.get());

    // a capability cannot reach itself without declaring itself
    let err = registry.invoke(&mut session, "forward", &args(&["forward"])).unwrap_err();
    assert!(matches!(err, DebuggerError::UndeclaredDependency { .. }));

    let output = registry.invoke(&mut session, "forward", &args(&["leaf"])).unwrap();
    assert_eq!(output, Output::Value(1));
    assert!(leaf.get());
}

#[test]
fn test_builtins_declare_their_helper_calls()
{
    let mut registry = Registry::new();
    register_builtin(&mut registry).unwrap();
    let mut session = session(machine());

    // defaults to the current process, then goes through e2peb
    let base = registry.invoke(&mut session, "e2ib", &[]).unwrap();
    assert_eq!(base.as_value(), Some(IMAGE));

    let image = format!("{IMAGE:#x}");
    let entry = registry.invoke(&mut session, "ib2epo", &args(&[&image])).unwrap();
    assert_eq!(entry.as_value(), Some(IMAGE + u64::from(ENTRY_RVA)));
}

#[test]
fn test_instances_are_built_once_on_first_use()
{
    let built = Rc::new(Cell::new(0));
    let counter = Rc::clone(&built);
    let mut registry = Registry::new();
    registry
        .register("counted", &[], move || {
            counter.set(counter.get() + 1);
            Box::new(Recorder {
                ran: Rc::new(Cell::new(false)),
            })
        })
        .unwrap();
    assert_eq!(built.get(), 0);

    let mut session = session(Snapshot::default());
    registry.invoke(&mut session, "counted", &[]).unwrap();
    registry.invoke(&mut session, "counted", &[]).unwrap();
    assert_eq!(built.get(), 1);
}

#[test]
fn test_duplicate_and_explicit_replacement()
{
    let mut registry = Registry::new();
    recorder(&mut registry, "x", &[]);
    let err = registry.register("x", &[], || Box::new(Forward)).unwrap_err();
    assert!(matches!(err, DebuggerError::DuplicateCapability(_)));

    assert!(registry.register_or_replace("x", &[], || Box::new(Forward)));
    assert!(!registry.register_or_replace("y", &[], || Box::new(Forward)));
}

#[test]
fn test_builtins_extend_with_custom_capabilities()
{
    let mut registry = Registry::new();
    register_builtin(&mut registry).unwrap();
    recorder(&mut registry, "custom", &["dis", "regs"]);
    registry.validate().unwrap();

    let listed: Vec<_> = registry.capabilities().map(|(name, _)| name).collect();
    assert!(listed.contains(&"custom"));
    assert!(listed.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_command_failure_leaves_session_usable()
{
    let mut registry = Registry::new();
    register_builtin(&mut registry).unwrap();
    let mut session = session(machine());

    assert!(registry.invoke(&mut session, "gr", &args(&["xmm9"])).is_err());
    assert!(registry.invoke(&mut session, "gr", &[]).is_err());
    let eax = registry.invoke(&mut session, "gr", &args(&["eax"])).unwrap();
    assert_eq!(eax.as_value(), Some(EAX));
}

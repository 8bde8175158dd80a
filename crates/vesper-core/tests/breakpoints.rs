//! Process-scoped breakpoints against a replayed target

mod common;

use common::*;
use vesper_core::backend::{Backend, BackendBreakpointId, Condition, InstalledBreakpoint};
use vesper_core::breakpoints::{self, Breakpoint};
use vesper_core::capabilities::builtin_registry;
use vesper_core::target::SnapshotTarget;
use vesper_core::{Address, DebuggerError, Output, Result, StopEvent};

fn installed_at(session: &vesper_core::Session, address: u64) -> Vec<InstalledBreakpoint>
{
    session
        .target()
        .installed_breakpoints()
        .into_iter()
        .filter(|bp| bp.address == Address::new(address))
        .collect()
}

#[test]
fn test_scoped_and_unscoped_share_one_physical_breakpoint()
{
    let mut session = session(machine());
    session.add_breakpoint(Address::new(PUSH), Some(Address::new(NOTEPAD))).unwrap();
    session.add_breakpoint(Address::new(PUSH), None).unwrap();

    let installed = installed_at(&session, PUSH);
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].condition, None);
    assert_eq!(session.breakpoints().list().len(), 2);
}

#[test]
fn test_two_processes_widen_one_gate()
{
    let mut session = session(machine());
    session.add_breakpoint(Address::new(PUSH), Some(Address::new(NOTEPAD))).unwrap();
    session.add_breakpoint(Address::new(PUSH), Some(Address::new(SYSTEM))).unwrap();

    let installed = installed_at(&session, PUSH);
    assert_eq!(installed.len(), 1);
    let condition = installed[0].condition.clone().unwrap();
    assert!(condition.matches(NOTEPAD_DTB));
    assert!(condition.matches(SYSTEM_DTB));
}

#[test]
fn test_delete_removes_everything_and_is_idempotent()
{
    let mut session = session(machine());
    session.add_breakpoint(Address::new(PUSH), Some(Address::new(NOTEPAD))).unwrap();
    session.add_breakpoint(Address::new(PUSH), None).unwrap();

    assert!(session.delete_breakpoint(Address::new(PUSH)).unwrap());
    assert!(installed_at(&session, PUSH).is_empty());
    assert!(session.breakpoints().is_empty());

    assert!(!session.delete_breakpoint(Address::new(PUSH)).unwrap());
    assert!(!session.delete_breakpoint(Address::new(0x1234)).unwrap());
}

#[test]
fn test_unknown_process_scope_is_stale()
{
    let mut session = session(machine());
    let err = session
        .add_breakpoint(Address::new(PUSH), Some(Address::new(0xdead_0000)))
        .unwrap_err();
    assert!(matches!(err, DebuggerError::StaleContext(_)));
    assert!(session.target().installed_breakpoints().is_empty());
}

#[test]
fn test_scoped_breakpoint_only_fires_in_its_process()
{
    let mut snapshot = machine();
    snapshot.stops = vec![
        stop(PUSH, &[("cr3", SYSTEM_DTB)]),
        stop(PUSH, &[("cr3", NOTEPAD_DTB)]),
    ];
    let mut session = session(snapshot);
    session.add_breakpoint(Address::new(PUSH), Some(Address::new(NOTEPAD))).unwrap();

    let stop = session.continue_execution().unwrap();
    assert_eq!(stop, StopEvent::Breakpoint { address: Address::new(PUSH) });
    assert_eq!(session.current_context().map(|c| c.object()), Some(Address::new(NOTEPAD)));
}

#[test]
fn test_wait_for_context_removes_its_breakpoint()
{
    let hook = 0x804d_b9ce;
    let mut snapshot = machine();
    snapshot.stops = vec![
        stop(hook, &[("cr3", SYSTEM_DTB)]),
        stop(hook, &[("cr3", NOTEPAD_DTB)]),
        stop(hook, &[("cr3", SYSTEM_DTB)]),
    ];
    snapshot.registers.insert("cr3".to_string(), SYSTEM_DTB);
    let mut session = session(snapshot);

    let arrival = session.wait_for_context(Address::new(NOTEPAD)).unwrap();
    assert_eq!(arrival.translation_base, NOTEPAD_DTB);
    assert_eq!(arrival.stop, StopEvent::Breakpoint { address: Address::new(hook) });
    assert!(session.target().installed_breakpoints().is_empty());
    assert_eq!(session.current_context().map(|c| c.object()), Some(Address::new(NOTEPAD)));
}

/// Replays a snapshot but fails every resume.
struct BrokenResume(SnapshotTarget);

impl Backend for BrokenResume
{
    fn read_register(&self, name: &str) -> Result<u64>
    {
        self.0.read_register(name)
    }

    fn add_breakpoint(&mut self, address: Address, condition: Option<Condition>) -> Result<BackendBreakpointId>
    {
        self.0.add_breakpoint(address, condition)
    }

    fn delete_breakpoint(&mut self, id: BackendBreakpointId) -> Result<()>
    {
        self.0.delete_breakpoint(id)
    }

    fn resume(&mut self) -> Result<StopEvent>
    {
        Err(DebuggerError::BackendUnavailable("link dropped".to_string()))
    }

    fn single_step(&mut self) -> Result<StopEvent>
    {
        self.0.single_step()
    }

    fn installed_breakpoints(&self) -> Vec<InstalledBreakpoint>
    {
        self.0.installed_breakpoints()
    }
}

#[test]
fn test_one_shot_is_removed_when_the_wait_fails()
{
    let mut backend = BrokenResume(SnapshotTarget::new(machine()));
    let err = breakpoints::wait_for_context(&mut backend, Address::new(0x804d_b9ce), "cr3", NOTEPAD_DTB).unwrap_err();
    assert!(matches!(err, DebuggerError::BackendUnavailable(_)));
    assert!(backend.installed_breakpoints().is_empty());

    let err = breakpoints::run_until(&mut backend, Address::new(PUSH), None).unwrap_err();
    assert!(matches!(err, DebuggerError::BackendUnavailable(_)));
    assert!(backend.installed_breakpoints().is_empty());
}

#[test]
fn test_breakpoint_commands()
{
    let mut session = session(machine());
    let registry = builtin_registry().unwrap();

    let output = registry.invoke(&mut session, "b", &args(&["0x804f0005"])).unwrap();
    assert_eq!(output, Output::Breakpoints(vec![Breakpoint::anywhere(Address::new(PUSH))]));

    registry.invoke(&mut session, "bd", &args(&["0x804f0008"])).unwrap();
    let gate = installed_at(&session, CALL_INDIRECT)[0].condition.clone().unwrap();
    assert_eq!(gate.to_string(), "$cr3 == 0x2f1000");

    let Output::Breakpoints(listed) = registry.invoke(&mut session, "bl", &[]).unwrap() else {
        panic!("bl lists breakpoints");
    };
    assert_eq!(listed.len(), 2);

    let deleted = registry.invoke(&mut session, "db", &args(&["0x804f0005"])).unwrap();
    assert_eq!(deleted, Output::Text("breakpoint at 0x804f0005 deleted".to_string()));
    let again = registry.invoke(&mut session, "db", &args(&["0x804f0005"])).unwrap();
    assert_eq!(again, Output::Text("no breakpoint at 0x804f0005".to_string()));
}

#[test]
fn test_breakpoint_on_symbol_and_from_file()
{
    let mut session = session(machine());
    let registry = builtin_registry().unwrap();
    registry.invoke(&mut session, "reload_kernel_symbols", &[]).unwrap();

    registry.invoke(&mut session, "b", &args(&["ntoskrnl!KeWait"])).unwrap();
    assert_eq!(installed_at(&session, KE_WAIT).len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bpts.txt");
    std::fs::write(&file, "# hooks\n0x804f0005\n\nnot-a-location\neax\n").unwrap();

    let output = registry
        .invoke(&mut session, "bpl", &args(&[file.to_str().unwrap(), "0x81550000"]))
        .unwrap();
    let Output::Breakpoints(set) = output else {
        panic!("bpl lists what it set");
    };
    assert_eq!(set.len(), 2);
    assert!(set.iter().all(|bp| bp.context.map(|c| c.object()) == Some(Address::new(NOTEPAD))));
    assert_eq!(installed_at(&session, EAX).len(), 1);
}

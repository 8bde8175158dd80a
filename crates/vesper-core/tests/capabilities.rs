//! Built-in command set over the fixture machine

mod common;

use common::*;
use vesper_core::capabilities::builtin_registry;
use vesper_core::registry::render_output;
use vesper_core::{Address, DebuggerError, Output, Registry, Session};

fn setup() -> (Registry, Session)
{
    (builtin_registry().unwrap(), session(machine()))
}

fn value(registry: &Registry, session: &mut Session, name: &str, arguments: &[&str]) -> u64
{
    registry
        .invoke(session, name, &args(arguments))
        .unwrap()
        .as_value()
        .unwrap()
}

#[test]
fn test_register_views()
{
    let (registry, mut session) = setup();

    let Output::Registers(general) = registry.invoke(&mut session, "regs", &[]).unwrap() else {
        panic!("regs lists registers");
    };
    let names: Vec<_> = general.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "eip"]);
    assert_eq!(general[0].1, EAX);

    let segments = registry.invoke(&mut session, "regs2", &[]).unwrap();
    assert!(render_output(&segments).contains("fs: 0x00000030"));

    let flags = registry.invoke(&mut session, "regs3", &[]).unwrap();
    assert_eq!(
        registry.render("regs3", &flags).unwrap(),
        "c:0 p:1 a:0 z:1 s:0 t:0 i:1 d:0 o:0"
    );

    let base = registry.invoke(&mut session, "regs4", &[]).unwrap();
    assert_eq!(base, Output::Registers(vec![("cr3".to_string(), NOTEPAD_DTB)]));
}

#[test]
fn test_stack_dump()
{
    let (registry, mut session) = setup();
    let Output::Words(words) = registry.invoke(&mut session, "su", &[]).unwrap() else {
        panic!("su dumps words");
    };
    assert_eq!(words.len(), 16);
    assert_eq!(words[0], 0x1000);
    assert_eq!(words[15], 0x100f);

    let Output::Words(short) = registry.invoke(&mut session, "su", &args(&["4"])).unwrap() else {
        panic!("su dumps words");
    };
    assert_eq!(short.len(), 4);
}

#[test]
fn test_process_lookups()
{
    let (registry, mut session) = setup();

    assert_eq!(value(&registry, &mut session, "pn2e", &[]), SYSTEM);
    assert_eq!(value(&registry, &mut session, "pn2e", &["notepad"]), NOTEPAD);
    assert!(registry.invoke(&mut session, "pn2e", &args(&["calc"])).is_err());

    assert_eq!(value(&registry, &mut session, "e2d", &[]), NOTEPAD_DTB);
    assert_eq!(value(&registry, &mut session, "e2d", &["0x81230000"]), SYSTEM_DTB);
    assert_eq!(value(&registry, &mut session, "e2peb", &["0x81550000"]), PEB);
    assert!(registry.invoke(&mut session, "e2peb", &args(&["0x81230000"])).is_err());
    assert_eq!(value(&registry, &mut session, "e2ib", &["0x81550000"]), IMAGE);

    let Output::Modules(modules) = registry.invoke(&mut session, "e2imoml", &[]).unwrap() else {
        panic!("e2imoml lists modules");
    };
    let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["notepad.exe", "kernel32.dll", "ntdll.dll"]);
}

#[test]
fn test_context_commands()
{
    let (registry, mut session) = setup();

    let current = registry.invoke(&mut session, "cc", &[]).unwrap();
    let Output::Context(Some(context)) = current else {
        panic!("a process owns cr3");
    };
    assert_eq!(context.object(), Address::new(NOTEPAD));

    registry.invoke(&mut session, "sc", &args(&["0x81230000"])).unwrap();
    assert_eq!(session.reading_context().map(|c| c.object()), Some(Address::new(SYSTEM)));
    // System has no user half; the image is only mapped in notepad
    assert!(session.read_memory(Address::new(IMAGE), 2).is_err());

    let err = registry.invoke(&mut session, "sc", &args(&["0x1234"])).unwrap_err();
    assert!(matches!(err, DebuggerError::StaleContext(_)));
}

#[test]
fn test_process_commands_keep_the_chosen_context()
{
    let (registry, mut session) = setup();
    registry.invoke(&mut session, "sc", &args(&["0x81230000"])).unwrap();

    assert_eq!(value(&registry, &mut session, "e2d", &[]), SYSTEM_DTB);
    assert_eq!(session.current_context().map(|c| c.object()), Some(Address::new(SYSTEM)));

    // System has no PEB, so the defaulted commands fail on System, not notepad
    assert!(registry.invoke(&mut session, "e2peb", &[]).is_err());
    assert!(registry.invoke(&mut session, "e2ib", &[]).is_err());
    let Output::Modules(modules) = registry.invoke(&mut session, "e2imoml", &[]).unwrap() else {
        panic!("e2imoml lists modules");
    };
    assert!(modules.is_empty());
    let err = registry.invoke(&mut session, "in2dh", &args(&["notepad.exe"])).unwrap_err();
    assert!(matches!(err, DebuggerError::UnknownSymbol(_)));
    assert_eq!(session.current_context().map(|c| c.object()), Some(Address::new(SYSTEM)));
}

#[test]
fn test_pe_header_walk()
{
    let (registry, mut session) = setup();

    assert_eq!(value(&registry, &mut session, "ib2dh", &["0x1000000"]), IMAGE);
    assert_eq!(value(&registry, &mut session, "ib2nth", &["0x1000000"]), IMAGE + 0x80);
    assert_eq!(value(&registry, &mut session, "ib2oh", &["0x1000000"]), IMAGE + 0x98);
    assert_eq!(
        value(&registry, &mut session, "ib2epo", &["0x1000000"]),
        IMAGE + u64::from(ENTRY_RVA)
    );
    assert_eq!(value(&registry, &mut session, "in2dh", &["NOTEPAD.EXE"]), IMAGE);

    // the PEB page holds no MZ signature
    assert!(registry.invoke(&mut session, "ib2dh", &args(&["0x7ffdf000"])).is_err());
    let err = registry.invoke(&mut session, "in2dh", &args(&["calc.exe"])).unwrap_err();
    assert!(matches!(err, DebuggerError::UnknownSymbol(_)));
}

#[test]
fn test_list_walk()
{
    let (registry, mut session) = setup();
    let head = LIST_HEAD;

    let forward = registry.invoke(&mut session, "itl", &args(&["0x80550000", "0x88"])).unwrap();
    assert_eq!(
        forward,
        Output::Addresses(vec![Address::new(head + 0x100 - 0x88), Address::new(head + 0x200 - 0x88)])
    );

    let backward = registry
        .invoke(&mut session, "itl", &args(&["0x80550000", "0", "back"]))
        .unwrap();
    assert_eq!(
        backward,
        Output::Addresses(vec![Address::new(head + 0x200), Address::new(head + 0x100)])
    );
}

#[test]
fn test_wait_command_and_rendering()
{
    let hook = 0x804d_b9ce;
    let mut snapshot = machine();
    snapshot.registers.insert("cr3".to_string(), SYSTEM_DTB);
    snapshot.stops = vec![stop(hook, &[("cr3", NOTEPAD_DTB)])];
    let registry = builtin_registry().unwrap();
    let mut session = session(snapshot);

    let arrival = registry.invoke(&mut session, "eprocWait", &args(&["0x81550000"])).unwrap();
    assert_eq!(arrival.as_value(), Some(NOTEPAD_DTB));
    assert_eq!(
        registry.render("eprocWait", &arrival).unwrap(),
        "Thread arrived, current DTB: 0x2f1000"
    );
}

#[test]
fn test_symbol_persistence_commands()
{
    let (registry, mut session) = setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("syms.json");
    let path = path.to_str().unwrap();

    registry.invoke(&mut session, "reload_kernel_symbols", &[]).unwrap();
    registry.invoke(&mut session, "reload_symbols", &[]).unwrap();
    registry.invoke(&mut session, "store_symbols", &args(&[path])).unwrap();

    let mut fresh = common::session(machine());
    let restored = registry.invoke(&mut fresh, "restore_symbols", &args(&[path])).unwrap();
    assert_eq!(restored, Output::Text(format!("2 symbols restored from {path}")));
    assert_eq!(fresh.symbols().resolve_name("ntoskrnl!KeWait"), Some(Address::new(KE_WAIT)));
}

#[test]
fn test_nop()
{
    let (registry, mut session) = setup();
    let output = registry.invoke(&mut session, "nop", &[]).unwrap();
    assert_eq!(output, Output::None);
    assert_eq!(registry.render("nop", &output).unwrap(), "");
}

//! Shared fixture: a small recorded 32-bit machine.
//!
//! Two processes (`System`, `notepad.exe`), a kernel code page with a call
//! into `ntoskrnl!KeWait`, a stack, a `LIST_ENTRY` ring, and a mapped
//! `notepad.exe` image with valid DOS and NT headers.

#![allow(dead_code)]

use std::collections::BTreeMap;

use vesper_core::config::SessionConfig;
use vesper_core::forensics::{ExportRecord, ModuleRecord, ProcessRecord};
use vesper_core::target::{ModuleSnapshot, ProcessSnapshot, Region, ScriptedStop, Snapshot, SnapshotTarget};
use vesper_core::{Address, Session};

pub const SYSTEM: u64 = 0x8123_0000;
pub const SYSTEM_DTB: u64 = 0x39000;
pub const NOTEPAD: u64 = 0x8155_0000;
pub const NOTEPAD_DTB: u64 = 0x2f1000;

pub const CODE: u64 = 0x804f_0000;
/// `call 0x804f1000`
pub const CALL_DIRECT: u64 = CODE;
/// `push ebp`
pub const PUSH: u64 = CODE + 5;
/// `call [eax+0x4]`
pub const CALL_INDIRECT: u64 = CODE + 8;
pub const KE_WAIT: u64 = 0x804f_1000;
pub const NTOSKRNL: u64 = 0x804d_7000;

pub const DATA: u64 = 0x8054_0000;
pub const STACK: u64 = DATA + 0x100;
pub const EAX: u64 = DATA + 0x1000;
pub const LIST_HEAD: u64 = DATA + 0x1_0000;

pub const IMAGE: u64 = 0x0100_0000;
pub const PEB: u64 = 0x7ffd_f000;
pub const ENTRY_RVA: u32 = 0x1234;

pub fn put(region: &mut Region, address: u64, bytes: &[u8])
{
    let start = usize::try_from(address - region.base.value()).unwrap();
    region.data[start..start + bytes.len()].copy_from_slice(bytes);
}

fn region(base: u64, len: usize, fill: u8) -> Region
{
    Region {
        base: Address::new(base),
        data: vec![fill; len],
    }
}

fn code() -> Region
{
    // one page of nops before the code so cursor windows can start early
    let mut code = region(CODE - 0x1000, 0x3000, 0x90);
    put(&mut code, CALL_DIRECT, &[0xe8, 0xfb, 0x0f, 0x00, 0x00]);
    put(&mut code, PUSH, &[0x55, 0x8b, 0xec]);
    put(&mut code, CALL_INDIRECT, &[0xff, 0x50, 0x04]);
    put(&mut code, KE_WAIT, &[0xc3]);
    code
}

fn data() -> Region
{
    let mut data = region(DATA, 0x1_1000, 0);
    for i in 0..16_u32 {
        put(&mut data, STACK + u64::from(i) * 4, &(0x1000 + i).to_le_bytes());
    }
    put(&mut data, EAX, &0xdead_beef_u32.to_le_bytes());
    put(&mut data, EAX + 4, &(KE_WAIT as u32).to_le_bytes());

    // head <-> a <-> b <-> head
    let (head, a, b) = (LIST_HEAD as u32, LIST_HEAD as u32 + 0x100, LIST_HEAD as u32 + 0x200);
    for (at, flink, blink) in [(head, a, b), (a, b, head), (b, head, a)] {
        put(&mut data, u64::from(at), &flink.to_le_bytes());
        put(&mut data, u64::from(at) + 4, &blink.to_le_bytes());
    }
    data
}

fn image() -> Region
{
    let mut image = region(IMAGE, 0x400, 0);
    put(&mut image, IMAGE, b"MZ");
    put(&mut image, IMAGE + 0x3c, &0x80_u32.to_le_bytes());
    let nt = IMAGE + 0x80;
    put(&mut image, nt, b"PE\0\0");
    put(&mut image, nt + 4, &0x014c_u16.to_le_bytes());
    put(&mut image, nt + 0x14, &0xe0_u16.to_le_bytes());
    put(&mut image, nt + 0x18, &0x010b_u16.to_le_bytes());
    put(&mut image, nt + 0x28, &ENTRY_RVA.to_le_bytes());
    put(&mut image, nt + 0x74, &16_u32.to_le_bytes());
    image
}

fn peb() -> Region
{
    let mut peb = region(PEB, 0x20, 0);
    put(&mut peb, PEB + 8, &(IMAGE as u32).to_le_bytes());
    peb
}

fn module(name: &str, base: u64, exports: &[(u32, u64, Option<&str>)]) -> ModuleSnapshot
{
    ModuleSnapshot {
        module: ModuleRecord {
            base: Address::new(base),
            name: name.to_string(),
            size: 0x1000,
        },
        exports: exports
            .iter()
            .map(|(ordinal, rva, name)| ExportRecord {
                ordinal: *ordinal,
                rva: *rva,
                name: name.map(str::to_string),
            })
            .collect(),
        paged_out: false,
    }
}

pub fn registers(pairs: &[(&str, u64)]) -> BTreeMap<String, u64>
{
    pairs.iter().map(|(name, value)| ((*name).to_string(), *value)).collect()
}

/// The machine, stopped at the direct call with `notepad.exe` switched in.
pub fn machine() -> Snapshot
{
    let mut ntdll = module("ntdll.dll", 0x7c90_0000, &[(1, 0x100, Some("NtClose"))]);
    ntdll.paged_out = true;

    Snapshot {
        memory_model: None,
        registers: registers(&[
            ("eax", EAX),
            ("ebx", 4),
            ("ecx", 0),
            ("edx", 0),
            ("esi", 0),
            ("edi", 0),
            ("ebp", STACK + 0x40),
            ("esp", STACK),
            ("eip", CALL_DIRECT),
            ("eflags", 0x246),
            ("cs", 0x8),
            ("ss", 0x10),
            ("ds", 0x23),
            ("es", 0x23),
            ("fs", 0x30),
            ("gs", 0),
            ("cr3", NOTEPAD_DTB),
        ]),
        kernel: vec![code(), data()],
        kernel_modules: vec![module("ntoskrnl", NTOSKRNL, &[(1, KE_WAIT - NTOSKRNL, Some("KeWait"))])],
        processes: vec![
            ProcessSnapshot {
                record: ProcessRecord {
                    object: Address::new(SYSTEM),
                    pid: 4,
                    name: "System".to_string(),
                    translation_base: SYSTEM_DTB,
                    peb: None,
                    image_base: None,
                },
                regions: Vec::new(),
                modules: Vec::new(),
            },
            ProcessSnapshot {
                record: ProcessRecord {
                    object: Address::new(NOTEPAD),
                    pid: 1234,
                    name: "notepad.exe".to_string(),
                    translation_base: NOTEPAD_DTB,
                    peb: Some(Address::new(PEB)),
                    image_base: Some(Address::new(IMAGE)),
                },
                regions: vec![image(), peb()],
                modules: vec![
                    module("notepad.exe", IMAGE, &[]),
                    module(
                        "kernel32.dll",
                        0x7c80_0000,
                        &[(1, 0x1_0000, Some("CreateFileW")), (2, 0x1_0010, None)],
                    ),
                    ntdll,
                ],
            },
        ],
        stops: Vec::new(),
    }
}

/// A scripted point.
pub fn stop(address: u64, regs: &[(&str, u64)]) -> ScriptedStop
{
    ScriptedStop {
        address: Address::new(address),
        registers: registers(regs),
    }
}

pub fn session(snapshot: Snapshot) -> Session
{
    Session::new(Box::new(SnapshotTarget::new(snapshot)), SessionConfig::default())
}

pub fn args(items: &[&str]) -> Vec<String>
{
    items.iter().map(|s| (*s).to_string()).collect()
}

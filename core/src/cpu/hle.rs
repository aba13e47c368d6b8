//! Optional BIOS kernel trampolines (spec §4.2 "Optional HLE", supplemented
//! from `cpu.h`/`cpu.cpp`'s A0/B0/C0 jump-table interception).
//!
//! When [`CpuOptions::hle_vectors`] is set, the interpreter recognizes a
//! narrow set of BIOS call sites and serves them directly instead of
//! executing the real kernel code, purely as a bring-up accelerator: with
//! the flag off, the common exception vector runs like any other guest
//! code.

use super::{Cpu, StepResult};
use crate::bus::{Bus, DeviceBundle};

#[derive(Debug, Clone, Copy)]
pub struct CpuOptions {
    pub hle_vectors: bool,
}

impl Default for CpuOptions {
    fn default() -> Self {
        Self { hle_vectors: false }
    }
}

const MAX_OPEN_FILES: usize = 16;
const MAX_EVENTS: usize = 32;

#[derive(Debug, Clone, Copy, Default)]
struct OpenFile {
    in_use: bool,
    lba: u32,
    size: u32,
    cursor: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct EventSlot {
    in_use: bool,
    enabled: bool,
    delivered: bool,
}

pub struct HleState {
    files: [OpenFile; MAX_OPEN_FILES],
    events: [EventSlot; MAX_EVENTS],
    next_event_handle: u32,
}

impl HleState {
    pub fn new() -> Self {
        Self { files: [OpenFile::default(); MAX_OPEN_FILES], events: [EventSlot::default(); MAX_EVENTS], next_event_handle: 0xF000_0000 }
    }
}

/// Runs when `fetch_pc == 0x8000_0080` and `hle_vectors` is enabled: decides
/// whether `Cause` holds a syscall whose `a0`/function number matches one of
/// the serviced BIOS functions, and if so performs it, sets `EPC+4` as the
/// return address (skipping the syscall instruction the real BIOS would have
/// executed), and returns a synthetic `StepResult::Ok` to the caller. Returns
/// `None` for any vector this module does not serve, letting the real
/// exception handler in guest code run unmodified.
pub fn try_dispatch_exception_vector(cpu: &mut Cpu, bus: &mut Bus, dev: &mut DeviceBundle<'_>) -> Option<StepResult> {
    // Only intercept true syscalls (ExcCode 8), not other exceptions that
    // also land on the common vector.
    let exc_code = (cpu.cause >> 2) & 0x1F;
    if exc_code != 8 {
        return None;
    }

    let call_pc = cpu.epc;
    let jump_table = call_pc & 0xFFFF_FF00;
    let function = cpu.regs[9]; // r9 = t1, BIOS convention for the function number

    let handled = match jump_table {
        0xA000_0000 => dispatch_a0(cpu, bus, dev, function),
        0xB000_0000 => dispatch_b0(cpu, function),
        0xC000_0000 => dispatch_c0(cpu, function),
        _ => false,
    };

    if !handled {
        return None;
    }

    // Return from the syscall as RFE + jump back to the caller's return
    // address (ra at the time of the syscall, which the BIOS trampoline
    // would have saved and restored identically).
    let low6 = cpu.status & 0x3F;
    cpu.status = (cpu.status & !0x3F) | (low6 >> 2) | ((low6 & 0x3) << 4);
    cpu.pc = cpu.regs[31];
    Some(StepResult::Ok)
}

fn dispatch_a0(cpu: &mut Cpu, bus: &mut Bus, dev: &mut DeviceBundle<'_>, function: u32) -> bool {
    match function {
        0x3C => {
            putchar(cpu);
            true
        }
        0x32 => file_open(cpu, dev, bus),
        0x34 => file_seek(cpu),
        0x35 => file_read(cpu, bus, dev),
        0x36 => file_close(cpu),
        _ => false,
    }
}

fn dispatch_b0(cpu: &mut Cpu, function: u32) -> bool {
    match function {
        0x3D => {
            putchar(cpu);
            true
        }
        0x08 => open_event(cpu),
        0x0C => enable_event(cpu),
        0x04 => deliver_event(cpu),
        0x0B => test_event(cpu),
        _ => false,
    }
}

fn dispatch_c0(_cpu: &mut Cpu, _function: u32) -> bool {
    false
}

fn putchar(cpu: &mut Cpu) {
    let byte = cpu.regs[4] as u8;
    if let Some(log) = &cpu.logger {
        log.log(crate::log::Level::Info, crate::log::Category::EXEC, "TTY", format_args!("{}", byte as char));
    }
}

fn open_event(cpu: &mut Cpu) -> bool {
    for (i, slot) in cpu.hle.events.iter_mut().enumerate() {
        if !slot.in_use {
            slot.in_use = true;
            slot.enabled = false;
            slot.delivered = false;
            cpu.regs[2] = cpu.hle.next_event_handle.wrapping_add(i as u32);
            return true;
        }
    }
    cpu.regs[2] = 0xFFFF_FFFF;
    true
}

fn enable_event(cpu: &mut Cpu) -> bool {
    if let Some(slot) = event_slot(cpu, cpu.regs[4]) {
        slot.enabled = true;
    }
    cpu.regs[2] = 1;
    true
}

fn deliver_event(cpu: &mut Cpu) -> bool {
    for slot in cpu.hle.events.iter_mut() {
        if slot.in_use && slot.enabled {
            slot.delivered = true;
        }
    }
    cpu.regs[2] = 1;
    true
}

fn test_event(cpu: &mut Cpu) -> bool {
    let handle = cpu.regs[4];
    let delivered = event_slot(cpu, handle).map(|s| std::mem::take(&mut s.delivered)).unwrap_or(false);
    cpu.regs[2] = delivered as u32;
    true
}

fn event_slot(cpu: &mut Cpu, handle: u32) -> Option<&mut EventSlot> {
    let idx = handle.wrapping_sub(cpu.hle.next_event_handle) as usize;
    cpu.hle.events.get_mut(idx).filter(|s| s.in_use)
}

fn file_open(cpu: &mut Cpu, dev: &mut DeviceBundle<'_>, bus: &mut Bus) -> bool {
    let name_ptr = cpu.regs[4];
    let name = read_cstring(bus, dev, name_ptr);
    match dev.cdrom.iso9660_find_file(&name) {
        Some((lba, size)) => {
            if let Some((idx, slot)) = cpu.hle.files.iter_mut().enumerate().find(|(_, f)| !f.in_use) {
                slot.in_use = true;
                slot.lba = lba;
                slot.size = size;
                slot.cursor = 0;
                cpu.regs[2] = idx as u32;
            } else {
                cpu.regs[2] = 0xFFFF_FFFF;
            }
        }
        None => cpu.regs[2] = 0xFFFF_FFFF,
    }
    true
}

fn file_seek(cpu: &mut Cpu) -> bool {
    let handle = cpu.regs[4] as usize;
    let offset = cpu.regs[5];
    if let Some(f) = cpu.hle.files.get_mut(handle).filter(|f| f.in_use) {
        f.cursor = offset;
    }
    cpu.regs[2] = offset;
    true
}

fn file_read(cpu: &mut Cpu, bus: &mut Bus, dev: &mut DeviceBundle<'_>) -> bool {
    let handle = cpu.regs[4] as usize;
    let dest = cpu.regs[5];
    let want = cpu.regs[6];
    let Some(f) = cpu.hle.files.get(handle).copied().filter(|f| f.in_use) else {
        cpu.regs[2] = 0;
        return true;
    };
    let mut total = 0u32;
    let mut sector = [0u8; 2048];
    let mut lba = f.lba + f.cursor / 2048;
    let mut in_sector = f.cursor % 2048;
    while total < want {
        if dev.cdrom.read_sector_2048(lba, &mut sector).is_err() {
            break;
        }
        let n = (2048 - in_sector).min(want - total);
        for i in 0..n {
            bus.write_u8(dest + total + i, sector[(in_sector + i) as usize], false, dev);
        }
        total += n;
        in_sector = 0;
        lba += 1;
    }
    if let Some(f) = cpu.hle.files.get_mut(handle) {
        f.cursor += total;
    }
    cpu.regs[2] = total;
    true
}

fn file_close(cpu: &mut Cpu) -> bool {
    let handle = cpu.regs[4] as usize;
    if let Some(f) = cpu.hle.files.get_mut(handle) {
        f.in_use = false;
    }
    cpu.regs[2] = 0;
    true
}

fn read_cstring(bus: &mut Bus, dev: &mut DeviceBundle<'_>, mut ptr: u32) -> String {
    let mut out = String::new();
    for _ in 0..256 {
        let (b, _) = bus.read_u8(ptr, dev);
        if b == 0 {
            break;
        }
        out.push(b as char);
        ptr = ptr.wrapping_add(1);
    }
    out
}

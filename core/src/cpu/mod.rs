//! R3000A interpreter: MIPS I integer core, COP0 exceptions, COP2/GTE bridge,
//! branch- and load-delay slots (spec §4.2).
//!
//! One call to [`Cpu::step`] executes exactly one instruction; the host loop
//! is expected to call `bus.tick(n)` at whatever cadence it chooses between
//! steps (spec §5: "suspension points only at instruction boundaries").

mod hle;

use crate::bus::{Bus, DeviceBundle, MemFault};
use crate::gte::Gte;
use crate::log::{Category, Level, Logger};

pub use hle::{CpuOptions, HleState};

const EXC_INT: u32 = 0;
const EXC_ADEL: u32 = 4;
const EXC_ADES: u32 = 5;
const EXC_SYS: u32 = 8;
const EXC_BP: u32 = 9;
const EXC_RI: u32 = 10;
const EXC_OV: u32 = 12;

const STATUS_IEC: u32 = 1 << 0;
const STATUS_ISC: u32 = 1 << 16;
const STATUS_IM2: u32 = 1 << 10;
const CAUSE_IP2: u32 = 1 << 10;
const CAUSE_BD: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Ok,
    Halted,
    IllegalInstr,
    MemFault,
    Breakpoint,
}

pub struct Cpu {
    pub regs: [u32; 32],
    pub pc: u32,
    pub hi: u32,
    pub lo: u32,

    pub status: u32,
    pub cause: u32,
    pub epc: u32,
    pub bad_vaddr: u32,

    pub gte: Gte,

    load_delay: Option<(u8, u32)>,
    new_load: Option<(u8, u32)>,
    branch_delay_pending: Option<u32>,
    scheduled_branch: Option<u32>,

    pub options: CpuOptions,
    hle: HleState,
    logger: Option<Logger>,
    pub stop_on_pc: Option<u32>,
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            regs: [0; 32],
            pc: 0xBFC0_0000,
            hi: 0,
            lo: 0,
            status: 0,
            cause: 0,
            epc: 0,
            bad_vaddr: 0,
            gte: Gte::new(),
            load_delay: None,
            new_load: None,
            branch_delay_pending: None,
            scheduled_branch: None,
            options: CpuOptions::default(),
            hle: HleState::new(),
            logger: None,
            stop_on_pc: None,
        }
    }

    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    pub fn reset(&mut self, pc: u32) {
        self.pc = pc;
        self.regs = [0; 32];
        self.hi = 0;
        self.lo = 0;
        self.status = 0;
        self.cause = 0;
        self.epc = 0;
        self.load_delay = None;
        self.new_load = None;
        self.branch_delay_pending = None;
        self.scheduled_branch = None;
    }

    fn reg(&self, i: u32) -> u32 {
        self.regs[i as usize]
    }

    fn set_reg(&mut self, i: u32, v: u32) {
        if i != 0 {
            self.regs[i as usize] = v;
        }
    }

    fn schedule_load(&mut self, rt: u32, value: u32) {
        self.new_load = Some((rt as u8, value));
    }

    fn schedule_branch(&mut self, target: u32) {
        self.scheduled_branch = Some(target);
    }

    fn isc(&self) -> bool {
        self.status & STATUS_ISC != 0
    }

    /// Debug convention: SYSCALL with r2=0xFF03 prints the null-terminated
    /// string at r4 to the configured sink and returns without raising an
    /// exception, for host-print tracing in guest code under test.
    fn host_print(&mut self, mut ptr: u32, bus: &mut Bus, dev: &mut DeviceBundle<'_>) {
        let mut s = String::new();
        for _ in 0..1024 {
            let (b, _) = bus.read_u8(ptr, dev);
            if b == 0 {
                break;
            }
            s.push(b as char);
            ptr = ptr.wrapping_add(1);
        }
        if let Some(log) = &self.logger {
            log.log(Level::Info, Category::EXEC, "TTY", format_args!("{}", s));
        }
    }

    /// Runs one fetch-decode-execute-commit cycle.
    pub fn step(&mut self, bus: &mut Bus, dev: &mut DeviceBundle<'_>) -> StepResult {
        if self.stop_on_pc == Some(self.pc) {
            return StepResult::Breakpoint;
        }

        self.cause = if bus.interrupts.pending() { self.cause | CAUSE_IP2 } else { self.cause & !CAUSE_IP2 };
        if self.status & STATUS_IEC != 0 && self.status & STATUS_IM2 != 0 && self.cause & CAUSE_IP2 != 0 {
            let in_delay = self.branch_delay_pending.is_some();
            self.raise_exception(EXC_INT, self.pc, in_delay, None);
            return StepResult::Ok;
        }

        let fetch_pc = self.pc;
        let in_delay_slot = self.branch_delay_pending.is_some();

        if fetch_pc % 4 != 0 {
            self.raise_exception(EXC_ADEL, fetch_pc, in_delay_slot, Some(fetch_pc));
            return StepResult::Ok;
        }

        let (word, fault) = bus.read_u32(fetch_pc, dev);
        if fault.is_some() {
            self.raise_exception(EXC_ADEL, fetch_pc, in_delay_slot, Some(fetch_pc));
            return StepResult::Ok;
        }

        self.pc = self.pc.wrapping_add(4);
        self.scheduled_branch = None;

        if let Some(log) = &self.logger {
            log.log(Level::Trace, Category::FETCH, "CPU", format_args!("{fetch_pc:#010x}: {word:#010x}"));
        }

        let result = self.execute(word, fetch_pc, in_delay_slot, bus, dev);

        if let Some((r, v)) = self.load_delay.take() {
            self.set_reg(r as u32, v);
        }
        self.load_delay = self.new_load.take();

        if let Some(target) = self.branch_delay_pending.take() {
            self.pc = target;
        }
        if let Some(target) = self.scheduled_branch.take() {
            self.branch_delay_pending = Some(target);
        }

        result
    }

    fn raise_exception(&mut self, exc_code: u32, fetch_pc: u32, in_delay_slot: bool, bad_vaddr: Option<u32>) {
        self.epc = if in_delay_slot { fetch_pc.wrapping_sub(4) } else { fetch_pc };
        self.cause = (self.cause & !0x7C) | (exc_code << 2);
        if in_delay_slot {
            self.cause |= CAUSE_BD;
        } else {
            self.cause &= !CAUSE_BD;
        }
        if let Some(v) = bad_vaddr {
            self.bad_vaddr = v;
        }
        let low6 = self.status & 0x3F;
        self.status = (self.status & !0x3F) | ((low6 << 2) & 0x3F);
        self.branch_delay_pending = None;
        self.scheduled_branch = None;
        self.load_delay = None;
        self.new_load = None;
        self.pc = 0x8000_0080;
        if let Some(log) = &self.logger {
            log.log(Level::Debug, Category::EXC, "CPU", format_args!("exception code={exc_code} epc={:#010x}", self.epc));
        }
    }

    fn rfe(&mut self) {
        let low6 = self.status & 0x3F;
        self.status = (self.status & !0x3F) | (low6 >> 2) | ((low6 & 0x3) << 4);
    }

    fn execute(&mut self, word: u32, fetch_pc: u32, in_delay_slot: bool, bus: &mut Bus, dev: &mut DeviceBundle<'_>) -> StepResult {
        let op = word >> 26;
        let rs = (word >> 21) & 0x1F;
        let rt = (word >> 16) & 0x1F;
        let rd = (word >> 11) & 0x1F;
        let shamt = (word >> 6) & 0x1F;
        let funct = word & 0x3F;
        let imm = word & 0xFFFF;
        let simm = (imm as i16) as i32 as u32;
        let jidx = word & 0x03FF_FFFF;

        if self.options.hle_vectors && fetch_pc == 0x8000_0080 {
            if let Some(outcome) = hle::try_dispatch_exception_vector(self, bus, dev) {
                return outcome;
            }
        }

        match op {
            0x00 => {
                if funct == 0x0C && self.reg(2) == 0xFF03 {
                    self.host_print(self.reg(4), bus, dev);
                    StepResult::Ok
                } else {
                    self.exec_special(funct, rs, rt, rd, shamt, fetch_pc, in_delay_slot)
                }
            }
            0x01 => self.exec_bcond(rs, rt, simm),
            0x02 => {
                self.schedule_branch(((fetch_pc.wrapping_add(4)) & 0xF000_0000) | (jidx << 2));
                StepResult::Ok
            }
            0x03 => {
                self.set_reg(31, fetch_pc.wrapping_add(8));
                self.schedule_branch(((fetch_pc.wrapping_add(4)) & 0xF000_0000) | (jidx << 2));
                StepResult::Ok
            }
            0x04 => self.branch_if(self.reg(rs) == self.reg(rt), fetch_pc, simm),
            0x05 => self.branch_if(self.reg(rs) != self.reg(rt), fetch_pc, simm),
            0x06 => self.branch_if((self.reg(rs) as i32) <= 0, fetch_pc, simm),
            0x07 => self.branch_if((self.reg(rs) as i32) > 0, fetch_pc, simm),
            0x08 | 0x09 => {
                let (sum, ov) = (self.reg(rs) as i32).overflowing_add(simm as i32);
                if op == 0x08 && ov {
                    self.raise_exception(EXC_OV, fetch_pc, in_delay_slot, None);
                    return StepResult::Ok;
                }
                self.set_reg(rt, sum as u32);
                StepResult::Ok
            }
            0x0A => {
                self.set_reg(rt, ((self.reg(rs) as i32) < (simm as i32)) as u32);
                StepResult::Ok
            }
            0x0B => {
                self.set_reg(rt, (self.reg(rs) < simm) as u32);
                StepResult::Ok
            }
            0x0C => {
                self.set_reg(rt, self.reg(rs) & imm);
                StepResult::Ok
            }
            0x0D => {
                self.set_reg(rt, self.reg(rs) | imm);
                StepResult::Ok
            }
            0x0E => {
                self.set_reg(rt, self.reg(rs) ^ imm);
                StepResult::Ok
            }
            0x0F => {
                self.set_reg(rt, imm << 16);
                StepResult::Ok
            }
            0x10 => self.exec_cop0(rs, rt, rd, word),
            0x12 => self.exec_cop2(rs, rt, rd, word),
            0x20 | 0x21 | 0x22 | 0x23 | 0x24 | 0x25 | 0x26 => self.exec_load(op, rs, rt, simm, fetch_pc, in_delay_slot, bus, dev),
            0x28 | 0x29 | 0x2A | 0x2B | 0x2E => self.exec_store(op, rs, rt, simm, fetch_pc, in_delay_slot, bus, dev),
            0x32 => {
                let addr = self.reg(rs).wrapping_add(simm);
                let (v, _) = bus.read_u32(addr, dev);
                self.gte.write_data(rt, v);
                StepResult::Ok
            }
            0x3A => {
                let addr = self.reg(rs).wrapping_add(simm);
                bus.write_u32(addr, self.gte.read_data(rt), self.isc(), dev);
                StepResult::Ok
            }
            _ => {
                self.raise_exception(EXC_RI, fetch_pc, in_delay_slot, None);
                StepResult::IllegalInstr
            }
        }
    }

    fn branch_if(&mut self, cond: bool, fetch_pc: u32, simm: u32) -> StepResult {
        if cond {
            self.schedule_branch(fetch_pc.wrapping_add(4).wrapping_add(simm << 2));
        }
        StepResult::Ok
    }

    fn exec_bcond(&mut self, rs: u32, rt: u32, simm: u32) -> StepResult {
        let v = self.reg(rs) as i32;
        let link = rt & 0x10 != 0;
        let take = if rt & 0x01 != 0 { v >= 0 } else { v < 0 };
        if link {
            self.set_reg(31, self.pc.wrapping_add(4));
        }
        self.branch_if(take, self.pc.wrapping_sub(4), simm)
    }

    fn exec_special(&mut self, funct: u32, rs: u32, rt: u32, rd: u32, shamt: u32, fetch_pc: u32, in_delay_slot: bool) -> StepResult {
        match funct {
            0x00 => {
                self.set_reg(rd, self.reg(rt) << shamt);
                StepResult::Ok
            }
            0x02 => {
                self.set_reg(rd, self.reg(rt) >> shamt);
                StepResult::Ok
            }
            0x03 => {
                self.set_reg(rd, ((self.reg(rt) as i32) >> shamt) as u32);
                StepResult::Ok
            }
            0x04 => {
                self.set_reg(rd, self.reg(rt) << (self.reg(rs) & 0x1F));
                StepResult::Ok
            }
            0x06 => {
                self.set_reg(rd, self.reg(rt) >> (self.reg(rs) & 0x1F));
                StepResult::Ok
            }
            0x07 => {
                self.set_reg(rd, ((self.reg(rt) as i32) >> (self.reg(rs) & 0x1F)) as u32);
                StepResult::Ok
            }
            0x08 => {
                self.schedule_branch(self.reg(rs));
                StepResult::Ok
            }
            0x09 => {
                let target = self.reg(rs);
                self.set_reg(rd, fetch_pc.wrapping_add(8));
                self.schedule_branch(target);
                StepResult::Ok
            }
            0x0C => {
                self.raise_exception(EXC_SYS, fetch_pc, in_delay_slot, None);
                StepResult::Ok
            }
            0x0D => {
                self.raise_exception(EXC_BP, fetch_pc, in_delay_slot, None);
                StepResult::Halted
            }
            0x10 => {
                self.set_reg(rd, self.hi);
                StepResult::Ok
            }
            0x11 => {
                self.hi = self.reg(rs);
                StepResult::Ok
            }
            0x12 => {
                self.set_reg(rd, self.lo);
                StepResult::Ok
            }
            0x13 => {
                self.lo = self.reg(rs);
                StepResult::Ok
            }
            0x18 => {
                let r = (self.reg(rs) as i32 as i64) * (self.reg(rt) as i32 as i64);
                self.hi = (r >> 32) as u32;
                self.lo = r as u32;
                StepResult::Ok
            }
            0x19 => {
                let r = (self.reg(rs) as u64) * (self.reg(rt) as u64);
                self.hi = (r >> 32) as u32;
                self.lo = r as u32;
                StepResult::Ok
            }
            0x1A => {
                let n = self.reg(rs) as i32;
                let d = self.reg(rt) as i32;
                if d == 0 {
                    self.lo = if n >= 0 { 0xFFFF_FFFF } else { 1 };
                    self.hi = n as u32;
                } else if n == i32::MIN && d == -1 {
                    self.lo = n as u32;
                    self.hi = 0;
                } else {
                    self.lo = (n / d) as u32;
                    self.hi = (n % d) as u32;
                }
                StepResult::Ok
            }
            0x1B => {
                let n = self.reg(rs);
                let d = self.reg(rt);
                if d == 0 {
                    self.lo = 0xFFFF_FFFF;
                    self.hi = n;
                } else {
                    self.lo = n / d;
                    self.hi = n % d;
                }
                StepResult::Ok
            }
            0x20 | 0x21 => {
                let (sum, ov) = (self.reg(rs) as i32).overflowing_add(self.reg(rt) as i32);
                if funct == 0x20 && ov {
                    self.raise_exception(EXC_OV, fetch_pc, in_delay_slot, None);
                    return StepResult::Ok;
                }
                self.set_reg(rd, sum as u32);
                StepResult::Ok
            }
            0x22 | 0x23 => {
                let (diff, ov) = (self.reg(rs) as i32).overflowing_sub(self.reg(rt) as i32);
                if funct == 0x22 && ov {
                    self.raise_exception(EXC_OV, fetch_pc, in_delay_slot, None);
                    return StepResult::Ok;
                }
                self.set_reg(rd, diff as u32);
                StepResult::Ok
            }
            0x24 => {
                self.set_reg(rd, self.reg(rs) & self.reg(rt));
                StepResult::Ok
            }
            0x25 => {
                self.set_reg(rd, self.reg(rs) | self.reg(rt));
                StepResult::Ok
            }
            0x26 => {
                self.set_reg(rd, self.reg(rs) ^ self.reg(rt));
                StepResult::Ok
            }
            0x27 => {
                self.set_reg(rd, !(self.reg(rs) | self.reg(rt)));
                StepResult::Ok
            }
            0x2A => {
                self.set_reg(rd, ((self.reg(rs) as i32) < (self.reg(rt) as i32)) as u32);
                StepResult::Ok
            }
            0x2B => {
                self.set_reg(rd, (self.reg(rs) < self.reg(rt)) as u32);
                StepResult::Ok
            }
            _ => {
                self.raise_exception(EXC_RI, fetch_pc, in_delay_slot, None);
                StepResult::IllegalInstr
            }
        }
    }

    fn exec_cop0(&mut self, rs: u32, rt: u32, rd: u32, word: u32) -> StepResult {
        if rs == 0x10 && (word & 0x3F) == 0x10 {
            self.rfe();
            return StepResult::Ok;
        }
        match rs {
            0x00 => {
                let v = self.cop0_read(rd);
                self.schedule_load(rt, v);
                StepResult::Ok
            }
            0x04 => {
                self.cop0_write(rd, self.reg(rt));
                StepResult::Ok
            }
            _ => StepResult::Ok,
        }
    }

    fn cop0_read(&self, reg: u32) -> u32 {
        match reg {
            8 => self.bad_vaddr,
            12 => self.status,
            13 => self.cause,
            14 => self.epc,
            15 => 0x0000_0002, // PRId: R3000A
            _ => 0,
        }
    }

    fn cop0_write(&mut self, reg: u32, value: u32) {
        match reg {
            12 => self.status = value,
            13 => self.cause = (self.cause & !0x0300) | (value & 0x0300),
            _ => {}
        }
    }

    fn exec_cop2(&mut self, rs: u32, rt: u32, rd: u32, word: u32) -> StepResult {
        if word & (1 << 25) != 0 {
            self.gte.execute(word & 0x01FF_FFFF);
            return StepResult::Ok;
        }
        match rs {
            0x00 => {
                let v = self.gte.read_data(rd);
                self.schedule_load(rt, v);
                StepResult::Ok
            }
            0x02 => {
                let v = self.gte.read_control(rd);
                self.schedule_load(rt, v);
                StepResult::Ok
            }
            0x04 => {
                self.gte.write_data(rd, self.reg(rt));
                StepResult::Ok
            }
            0x06 => {
                self.gte.write_control(rd, self.reg(rt));
                StepResult::Ok
            }
            _ => StepResult::Ok,
        }
    }

    fn exec_load(
        &mut self,
        op: u32,
        rs: u32,
        rt: u32,
        simm: u32,
        fetch_pc: u32,
        in_delay_slot: bool,
        bus: &mut Bus,
        dev: &mut DeviceBundle<'_>,
    ) -> StepResult {
        let addr = self.reg(rs).wrapping_add(simm);
        match op {
            0x20 => {
                let (v, _) = bus.read_u8(addr, dev);
                self.schedule_load(rt, v as i8 as i32 as u32);
            }
            0x24 => {
                let (v, _) = bus.read_u8(addr, dev);
                self.schedule_load(rt, v as u32);
            }
            0x21 => {
                let (v, fault) = bus.read_u16(addr, dev);
                if fault.is_some() {
                    self.raise_exception(EXC_ADEL, fetch_pc, in_delay_slot, Some(addr));
                    return StepResult::MemFault;
                }
                self.schedule_load(rt, v as i16 as i32 as u32);
            }
            0x25 => {
                let (v, fault) = bus.read_u16(addr, dev);
                if fault.is_some() {
                    self.raise_exception(EXC_ADEL, fetch_pc, in_delay_slot, Some(addr));
                    return StepResult::MemFault;
                }
                self.schedule_load(rt, v as u32);
            }
            0x23 => {
                let (v, fault) = bus.read_u32(addr, dev);
                if fault.is_some() {
                    self.raise_exception(EXC_ADEL, fetch_pc, in_delay_slot, Some(addr));
                    return StepResult::MemFault;
                }
                self.schedule_load(rt, v);
            }
            0x22 => {
                // LWL: merge the high 32-k bytes of the aligned word into the low
                // bytes of rt, per byte offset k = addr & 3 (original_source cpu.cpp:1228-1263).
                let aligned = addr & !3;
                let (word, _) = bus.read_u32(aligned, dev);
                let v = self.reg(rt);
                let merged = match addr & 3 {
                    0 => (v & 0xFFFF_FF00) | (word >> 24),
                    1 => (v & 0xFFFF_0000) | (word >> 16),
                    2 => (v & 0xFF00_0000) | (word >> 8),
                    _ => word,
                };
                self.schedule_load(rt, merged);
            }
            0x26 => {
                // LWR: merge the low 32-k bytes of the aligned word into the high
                // bytes of rt (original_source cpu.cpp:1264-1299).
                let aligned = addr & !3;
                let (word, _) = bus.read_u32(aligned, dev);
                let v = self.reg(rt);
                let merged = match addr & 3 {
                    0 => word,
                    1 => (v & 0x0000_00FF) | (word << 8),
                    2 => (v & 0x0000_FFFF) | (word << 16),
                    _ => (v & 0x00FF_FFFF) | (word << 24),
                };
                self.schedule_load(rt, merged);
            }
            _ => unreachable!(),
        }
        StepResult::Ok
    }

    fn exec_store(
        &mut self,
        op: u32,
        rs: u32,
        rt: u32,
        simm: u32,
        fetch_pc: u32,
        in_delay_slot: bool,
        bus: &mut Bus,
        dev: &mut DeviceBundle<'_>,
    ) -> StepResult {
        let addr = self.reg(rs).wrapping_add(simm);
        let isc = self.isc();
        match op {
            0x28 => {
                bus.write_u8(addr, self.reg(rt) as u8, isc, dev);
            }
            0x29 => {
                let fault = bus.write_u16(addr, self.reg(rt) as u16, isc, dev);
                if fault.is_some() {
                    self.raise_exception(EXC_ADES, fetch_pc, in_delay_slot, Some(addr));
                    return StepResult::MemFault;
                }
            }
            0x2B => {
                let fault = bus.write_u32(addr, self.reg(rt), isc, dev);
                if let Some(MemFault::Unaligned { .. }) = fault {
                    self.raise_exception(EXC_ADES, fetch_pc, in_delay_slot, Some(addr));
                    return StepResult::MemFault;
                }
            }
            0x2A => {
                // SWL: merge the low 32-k bytes of rt into the high bytes of the
                // aligned word (original_source cpu.cpp:1300-1329).
                let aligned = addr & !3;
                let (word, _) = bus.read_u32(aligned, dev);
                let v = self.reg(rt);
                let merged = match addr & 3 {
                    0 => (word & 0xFFFF_FF00) | (v >> 24),
                    1 => (word & 0xFFFF_0000) | (v >> 16),
                    2 => (word & 0xFF00_0000) | (v >> 8),
                    _ => v,
                };
                bus.write_u32(aligned, merged, isc, dev);
            }
            0x2E => {
                // SWR: merge the high 32-k bytes of rt into the low bytes of the
                // aligned word (original_source cpu.cpp:1330-1358).
                let aligned = addr & !3;
                let (word, _) = bus.read_u32(aligned, dev);
                let v = self.reg(rt);
                let merged = match addr & 3 {
                    0 => v,
                    1 => (word & 0x0000_00FF) | (v << 8),
                    2 => (word & 0x0000_FFFF) | (v << 16),
                    _ => (word & 0x00FF_FFFF) | (v << 24),
                };
                bus.write_u32(aligned, merged, isc, dev);
            }
            _ => unreachable!(),
        }
        StepResult::Ok
    }

}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, BusOptions};
    use crate::cdrom::Cdrom;
    use crate::gpu::Gpu;
    use crate::spu::Spu;

    fn harness() -> (Cpu, Bus, Gpu, Spu, Cdrom) {
        (Cpu::new(), Bus::new(BusOptions::default()), Gpu::new(), Spu::new(), Cdrom::new())
    }

    #[test]
    fn addiu_then_break_halts() {
        let (mut cpu, mut bus, mut gpu, mut spu, mut cdrom) = harness();
        let mut dev = DeviceBundle { gpu: &mut gpu, spu: &mut spu, cdrom: &mut cdrom };
        cpu.reset(0x8000_0000);
        // ADDIU r1, r0, 5 ; BREAK
        bus.write_u32(0x8000_0000, 0x2401_0005, false, &mut dev);
        bus.write_u32(0x8000_0004, 0x0000_000D, false, &mut dev);
        assert_eq!(cpu.step(&mut bus, &mut dev), StepResult::Ok);
        assert_eq!(cpu.regs[1], 5);
        assert_eq!(cpu.step(&mut bus, &mut dev), StepResult::Halted);
    }

    #[test]
    fn load_delay_slot_defers_visible_update() {
        let (mut cpu, mut bus, mut gpu, mut spu, mut cdrom) = harness();
        let mut dev = DeviceBundle { gpu: &mut gpu, spu: &mut spu, cdrom: &mut cdrom };
        cpu.reset(0x8000_0000);
        cpu.regs[2] = 0x8000_0100;
        bus.write_u32(0x8000_0100, 0x1234_5678, false, &mut dev);
        // LW r1, 0(r2) ; ADDU r3, r1, r0
        bus.write_u32(0x8000_0000, 0x8C41_0000, false, &mut dev);
        bus.write_u32(0x8000_0004, 0x0020_1821, false, &mut dev);
        cpu.step(&mut bus, &mut dev);
        assert_eq!(cpu.regs[1], 0); // not yet committed
        cpu.step(&mut bus, &mut dev);
        assert_eq!(cpu.regs[1], 0x1234_5678); // committed before ADDU's body read? see note
    }
}

//! The concrete facade that owns every emulated device and drives the
//! fetch/execute/tick loop (spec §4.8).

use crate::bus::{Bus, BusOptions, DeviceBundle};
use crate::cdrom::Cdrom;
use crate::cpu::{Cpu, CpuOptions, StepResult};
use crate::gpu::Gpu;
use crate::loader::{self, LoadedImage, LoaderError};
use crate::log::Logger;
use crate::spu::Spu;

const PCB_ADDR: u32 = 0x0000_0200;
const TCB_ADDR: u32 = 0x0000_0300;
const TCB_SIZE: usize = 0xC0;
const STATUS_IEC: u32 = 1 << 0;
const STATUS_IM0: u32 = 1 << 8;
const STATUS_IM2: u32 = 1 << 10;

#[derive(Debug, Default, Clone, Copy)]
pub struct MachineOptions {
    pub cpu: CpuOptions,
    pub bus: BusOptions,
    pub stop_on_pc: Option<u32>,
    pub tick_batch_size: u32,
}

pub struct Machine {
    pub bus: Bus,
    pub cpu: Cpu,
    pub gpu: Gpu,
    pub spu: Spu,
    pub cdrom: Cdrom,
    ram_allocated: bool,
    tick_batch_size: u32,
    cycles_since_tick: u32,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            bus: Bus::new(BusOptions::default()),
            cpu: Cpu::new(),
            gpu: Gpu::new(),
            spu: Spu::new(),
            cdrom: Cdrom::new(),
            ram_allocated: false,
            tick_batch_size: 512,
            cycles_since_tick: 0,
        }
    }

    /// Marks RAM as allocated; the bus already owns a fixed-size RAM array,
    /// so this just guards against double-initialization of a session.
    pub fn alloc_ram(&mut self) -> Result<(), &'static str> {
        if self.ram_allocated {
            return Err("RAM already allocated for this machine instance");
        }
        self.ram_allocated = true;
        Ok(())
    }

    pub fn set_bios_copy(&mut self, bios_bytes: &[u8]) {
        self.bus.load_bios(bios_bytes);
    }

    /// Propagates a shared logger to CDROM, GPU, and the CPU, per spec
    /// §4.8's "these propagate to CDROM and GPU ... and to the CPU".
    pub fn set_log_sinks(&mut self, logger: Logger) {
        self.bus.set_logger(logger.clone());
        self.cpu.set_logger(logger.clone());
        self.gpu.set_logger(logger.clone());
        self.spu.set_logger(logger.clone());
        self.cdrom.set_logger(logger);
    }

    pub fn insert_disc(&mut self, path: &str) -> Result<(), crate::cdrom::DiscError> {
        self.cdrom.insert_disc(path)
    }

    pub fn init_from_image(&mut self, image: LoadedImage, options: MachineOptions) {
        self.bus = Bus::new(options.bus);
        self.cpu = Cpu::new();
        self.cpu.options = options.cpu;
        self.cpu.stop_on_pc = options.stop_on_pc;
        self.cpu.reset(image.entry_pc);
        if image.initial_gp != 0 {
            self.cpu.regs[28] = image.initial_gp;
        }
        if image.initial_sp != 0 {
            self.cpu.regs[29] = image.initial_sp;
            self.cpu.regs[30] = image.initial_sp;
        }
        self.tick_batch_size = options.tick_batch_size.max(1);
        self.cycles_since_tick = 0;
    }

    fn device_bundle(&mut self) -> DeviceBundle<'_> {
        DeviceBundle { gpu: &mut self.gpu, spu: &mut self.spu, cdrom: &mut self.cdrom }
    }

    /// Executes exactly one instruction and periodically ticks the bus
    /// (timers, GPU VBlank, CDROM queues, SPU mixer) in batches.
    pub fn step(&mut self) -> StepResult {
        let mut dev = DeviceBundle { gpu: &mut self.gpu, spu: &mut self.spu, cdrom: &mut self.cdrom };
        let result = self.cpu.step(&mut self.bus, &mut dev);

        self.cycles_since_tick += 2;
        if self.cycles_since_tick >= self.tick_batch_size {
            let mut dev = DeviceBundle { gpu: &mut self.gpu, spu: &mut self.spu, cdrom: &mut self.cdrom };
            self.bus.tick(self.cycles_since_tick, &mut dev);
            self.cycles_since_tick = 0;
        }

        result
    }

    /// Loads a PS-X EXE or ELF image from the host filesystem and jumps
    /// straight to it, bypassing BIOS boot.
    pub fn boot_executable(&mut self, bytes: &[u8], options: MachineOptions) -> Result<(), LoaderError> {
        let image = if bytes.len() >= 8 && &bytes[0..8] == b"PS-X EXE" {
            loader::load_psx_exe(bytes, &mut self.bus.ram[..])?
        } else {
            loader::load_elf(bytes, &mut self.bus.ram[..])?
        };
        self.init_from_image(image, options);
        Ok(())
    }

    /// Reads `SYSTEM.CNF`'s `BOOT=` entry off the inserted disc, loads the
    /// named PS-X EXE, and seeds the minimal kernel state BIOS would have
    /// left behind so the game's own startup code does not get confused
    /// (spec §4.8 fast-boot path).
    pub fn fast_boot_from_disc(&mut self, mut options: MachineOptions) -> Result<(), LoaderError> {
        let cnf = self.cdrom.iso9660_find_file("SYSTEM.CNF;1").ok_or(LoaderError::NotRecognized)?;
        let cnf_bytes = self.read_whole_file(cnf)?;
        let boot_name = crate::cdrom::iso9660::extract_boot_prefix(&cnf_bytes).ok_or(LoaderError::HeaderInvalid("SYSTEM.CNF missing BOOT= entry"))?;
        let exe_path = format!("/{}", boot_name.trim_start_matches('\\').replace('\\', "/"));

        let entry = self.cdrom.iso9660_find_file(&exe_path).ok_or(LoaderError::NotRecognized)?;
        let exe_bytes = self.read_whole_file(entry)?;

        options.cpu.hle_vectors = true;
        let image = loader::load_psx_exe(&exe_bytes, &mut self.bus.ram[..])?;
        self.init_from_image(image, options);
        self.seed_kernel_state();
        self.bus.interrupts.write_i_mask(0b0000_1011); // VBlank | CDROM | DMA
        Ok(())
    }

    fn read_whole_file(&self, (lba, size): (u32, u32)) -> Result<Vec<u8>, LoaderError> {
        let mut out = Vec::with_capacity(size as usize);
        let mut remaining = size as usize;
        let mut l = lba;
        let mut buf = [0u8; 2048];
        while remaining > 0 {
            self.cdrom.read_sector_2048(l, &mut buf).map_err(|_| LoaderError::NotRecognized)?;
            let take = remaining.min(2048);
            out.extend_from_slice(&buf[..take]);
            remaining -= take;
            l += 1;
        }
        Ok(out)
    }

    fn seed_kernel_state(&mut self) {
        let ram = &mut self.bus.ram[..];
        ram[PCB_ADDR as usize..PCB_ADDR as usize + 4].fill(0);
        ram[TCB_ADDR as usize..TCB_ADDR as usize + TCB_SIZE].fill(0);

        let tcb_active: u32 = 0x4000;
        ram[TCB_ADDR as usize..TCB_ADDR as usize + 4].copy_from_slice(&tcb_active.to_le_bytes());

        let saved_status: u32 = (1 << 2) | (1 << 10); // IEp | IM2
        let off = TCB_ADDR as usize + 0x94;
        ram[off..off + 4].copy_from_slice(&saved_status.to_le_bytes());

        let pcb_value: u32 = 0x8000_0000 | TCB_ADDR;
        ram[PCB_ADDR as usize..PCB_ADDR as usize + 4].copy_from_slice(&pcb_value.to_le_bytes());

        let current_pcb_ptr: u32 = 0x8000_0000 | PCB_ADDR;
        ram[0x108..0x10C].copy_from_slice(&current_pcb_ptr.to_le_bytes());

        self.cpu.status = STATUS_IEC | STATUS_IM0 | STATUS_IM2;
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_ram_refuses_double_allocation() {
        let mut m = Machine::new();
        assert!(m.alloc_ram().is_ok());
        assert!(m.alloc_ram().is_err());
    }

    #[test]
    fn boot_executable_seeds_pc_gp_sp_from_header() {
        let mut exe = vec![0u8; 0x800];
        exe[0..8].copy_from_slice(b"PS-X EXE");
        exe[0x10..0x14].copy_from_slice(&0x8001_0000u32.to_le_bytes());
        exe[0x14..0x18].copy_from_slice(&0x0001_0FC0u32.to_le_bytes());
        exe[0x18..0x1C].copy_from_slice(&0x8001_0000u32.to_le_bytes());
        exe[0x1C..0x20].copy_from_slice(&0u32.to_le_bytes());
        exe[0x30..0x34].copy_from_slice(&0x801F_FF00u32.to_le_bytes());

        let mut m = Machine::new();
        m.boot_executable(&exe, MachineOptions::default()).unwrap();
        assert_eq!(m.cpu.pc, 0x8001_0000);
        assert_eq!(m.cpu.regs[28], 0x0001_0FC0);
        assert_eq!(m.cpu.regs[29], 0x801F_FF00);
    }
}

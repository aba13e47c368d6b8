//! DMA channel engine (spec §3 "DMA channels", §4.1 "DMA engine").
//!
//! Transfers are synchronous: writing the start bit into `chcr` runs the
//! whole transfer to completion within that single MMIO write, as spec §4.1
//! describes ("Writing `chcr |= start_bit` triggers an immediate synchronous
//! transfer").

use super::interrupts::{InterruptController, IrqSource};
use crate::cdrom::Cdrom;
use crate::gpu::Gpu;
use crate::spu::Spu;

pub const CHCR_START: u32 = 1 << 24;
pub const CHCR_DIR_TO_RAM: u32 = 0; // bit 0 = 0: device -> RAM
pub const CHCR_DIR_FROM_RAM: u32 = 1 << 0; // bit 0 = 1: RAM -> device
const CHCR_SYNC_MASK: u32 = 0b11 << 9;
const CHCR_SYNC_BURST: u32 = 0 << 9;
const CHCR_SYNC_BLOCK: u32 = 1 << 9;
const CHCR_SYNC_LINKED_LIST: u32 = 2 << 9;

const TERMINATOR: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaPort {
    MdecIn = 0,
    MdecOut = 1,
    Gpu = 2,
    Cdrom = 3,
    Spu = 4,
    Pio = 5,
    Otc = 6,
}

impl DmaPort {
    fn from_index(i: usize) -> DmaPort {
        match i {
            0 => DmaPort::MdecIn,
            1 => DmaPort::MdecOut,
            2 => DmaPort::Gpu,
            3 => DmaPort::Cdrom,
            4 => DmaPort::Spu,
            5 => DmaPort::Pio,
            _ => DmaPort::Otc,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DmaChannel {
    pub madr: u32,
    pub bcr: u32,
    pub chcr: u32,
}

pub struct DeviceBundle<'a> {
    pub gpu: &'a mut Gpu,
    pub spu: &'a mut Spu,
    pub cdrom: &'a mut Cdrom,
}

pub struct DmaController {
    pub channels: [DmaChannel; 7],
    pub dpcr: u32,
    pub dicr: u32,
}

impl DmaController {
    pub fn new() -> Self {
        Self { channels: [DmaChannel::default(); 7], dpcr: 0x0765_4321, dicr: 0 }
    }

    fn channel_enabled(&self, port: usize) -> bool {
        self.dpcr & (1 << (port * 4 + 3)) != 0
    }

    /// Called after a `chcr` write. If the start bit is set, runs the whole
    /// transfer synchronously then clears the start bit and latches channel
    /// completion (spec §4.1).
    pub fn write_chcr(
        &mut self,
        port: usize,
        value: u32,
        ram: &mut [u8],
        dev: &mut DeviceBundle<'_>,
        irq: &mut InterruptController,
    ) {
        self.channels[port].chcr = value;
        if value & CHCR_START == 0 {
            return;
        }
        if !self.channel_enabled(port) {
            self.channels[port].chcr &= !CHCR_START;
            return;
        }

        run_transfer(DmaPort::from_index(port), &mut self.channels[port], ram, dev);
        self.channels[port].chcr &= !CHCR_START;
        self.complete_channel(port, irq);
    }

    fn complete_channel(&mut self, port: usize, irq: &mut InterruptController) {
        // DICR layout: bits 16..22 per-channel enable, bit 23 master enable,
        // bits 24..30 per-channel flag (set on completion), bit 31 master flag.
        let flag_bit = 1u32 << (24 + port);
        self.dicr |= flag_bit;
        self.recompute_master_flag(irq);
    }

    fn recompute_master_flag(&mut self, irq: &mut InterruptController) {
        let force = self.dicr & (1 << 15) != 0;
        let enables = (self.dicr >> 16) & 0x7F;
        let flags = (self.dicr >> 24) & 0x7F;
        let master_enable = self.dicr & (1 << 23) != 0;
        let master = (force || (flags & enables != 0)) && master_enable;
        if master {
            self.dicr |= 1 << 31;
        } else {
            self.dicr &= !(1 << 31);
        }
        if master {
            irq.pulse(IrqSource::Dma);
        }
    }

    pub fn write_dicr(&mut self, value: u32, irq: &mut InterruptController) {
        // Bits 24..30 are write-1-to-clear; the rest are read/write.
        let ack_mask = (value >> 24) & 0x7F;
        let keep = self.dicr & !((ack_mask << 24) & 0x7F00_0000);
        self.dicr = (keep & 0x7F00_0000) | (value & !0x7F00_0000);
        self.recompute_master_flag(irq);
    }
}

impl Default for DmaController {
    fn default() -> Self {
        Self::new()
    }
}

fn ram_read32(ram: &[u8], addr: u32) -> u32 {
    let a = (addr as usize) & (ram.len() - 1);
    u32::from_le_bytes([ram[a], ram[a + 1], ram[a + 2], ram[a + 3]])
}

fn ram_write32(ram: &mut [u8], addr: u32, value: u32) {
    let a = (addr as usize) & (ram.len() - 1);
    ram[a..a + 4].copy_from_slice(&value.to_le_bytes());
}

fn run_transfer(port: DmaPort, chan: &mut DmaChannel, ram: &mut [u8], dev: &mut DeviceBundle<'_>) {
    let sync = chan.chcr & CHCR_SYNC_MASK;
    let to_device = chan.chcr & CHCR_DIR_FROM_RAM != 0;

    match port {
        DmaPort::Otc => {
            // Channel 6: descending linked list of pointers, RAM-only.
            let count = if chan.bcr == 0 { 0x1_0000 } else { chan.bcr & 0xFFFF };
            let mut addr = chan.madr;
            for i in 0..count {
                let next = if i == count - 1 { TERMINATOR } else { addr.wrapping_sub(4) & 0x001F_FFFC };
                ram_write32(ram, addr, next);
                addr = addr.wrapping_sub(4);
            }
        }
        DmaPort::Gpu if to_device => match sync {
            CHCR_SYNC_LINKED_LIST => {
                let mut addr = chan.madr & 0x001F_FFFC;
                loop {
                    let header = ram_read32(ram, addr);
                    let words = header >> 24;
                    let mut word_addr = addr;
                    for _ in 0..words {
                        word_addr = word_addr.wrapping_add(4) & 0x001F_FFFC;
                        let w = ram_read32(ram, word_addr);
                        dev.gpu.write_gp0(w);
                    }
                    addr = header & 0x001F_FFFC;
                    if header & TERMINATOR == TERMINATOR {
                        break;
                    }
                }
            }
            _ => {
                let words = block_word_count(chan);
                let mut addr = chan.madr;
                let step = step_for(chan);
                for _ in 0..words {
                    let w = ram_read32(ram, addr);
                    dev.gpu.write_gp0(w);
                    addr = addr.wrapping_add(step);
                }
            }
        },
        DmaPort::Gpu => {
            let words = block_word_count(chan);
            let mut addr = chan.madr;
            let step = step_for(chan);
            for _ in 0..words {
                let w = dev.gpu.read_gpuread();
                ram_write32(ram, addr, w);
                addr = addr.wrapping_add(step);
            }
        }
        DmaPort::Cdrom => {
            let words = block_word_count(chan).max(1);
            let mut addr = chan.madr;
            let step = step_for(chan);
            for _ in 0..words {
                let w = dev.cdrom.read_data_fifo_word();
                ram_write32(ram, addr, w);
                addr = addr.wrapping_add(step);
            }
        }
        DmaPort::Spu => {
            let words = block_word_count(chan);
            let mut addr = chan.madr;
            let step = step_for(chan);
            for _ in 0..words {
                if to_device {
                    let w = ram_read32(ram, addr);
                    dev.spu.dma_write_word(w);
                } else {
                    let w = dev.spu.dma_read_word();
                    ram_write32(ram, addr, w);
                }
                addr = addr.wrapping_add(step);
            }
        }
        DmaPort::MdecIn | DmaPort::MdecOut | DmaPort::Pio => {
            // Not modeled: no backing device. Advance MADR as real hardware
            // would so BIOS code that reads it back afterward sees progress.
            let words = block_word_count(chan);
            chan.madr = chan.madr.wrapping_add(words.wrapping_mul(4) as u32);
        }
    }
}

fn step_for(chan: &DmaChannel) -> u32 {
    if chan.chcr & (1 << 1) != 0 {
        0u32.wrapping_sub(4)
    } else {
        4
    }
}

fn block_word_count(chan: &DmaChannel) -> u32 {
    let sync = chan.chcr & CHCR_SYNC_MASK;
    match sync {
        CHCR_SYNC_BURST => {
            let bs = chan.bcr & 0xFFFF;
            if bs == 0 { 0x1_0000 } else { bs }
        }
        CHCR_SYNC_BLOCK => {
            let bs = chan.bcr & 0xFFFF;
            let bc = (chan.bcr >> 16) & 0xFFFF;
            bs.wrapping_mul(bc.max(1))
        }
        _ => chan.bcr & 0xFFFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otc_writes_descending_linked_list() {
        let mut ram = vec![0u8; 64];
        let mut chan = DmaChannel { madr: 0x1C, bcr: 4, chcr: 0 };
        // Build a DeviceBundle with throwaway devices for a port that never touches them.
        let mut gpu = Gpu::new();
        let mut spu = Spu::new();
        let mut cdrom = Cdrom::new();
        let mut dev = DeviceBundle { gpu: &mut gpu, spu: &mut spu, cdrom: &mut cdrom };
        run_transfer(DmaPort::Otc, &mut chan, &mut ram, &mut dev);
        assert_eq!(ram_read32(&ram, 0x1C), 0x18);
        assert_eq!(ram_read32(&ram, 0x18), 0x14);
        assert_eq!(ram_read32(&ram, 0x14), 0x10);
        assert_eq!(ram_read32(&ram, 0x10), TERMINATOR);
    }
}

//! Timers 0..2 (spec §3 "Timers").

use super::interrupts::{InterruptController, IrqSource};

/// `MODE` register bit layout (low bits modeled; the rest are accepted but
/// not interpreted beyond sync-mode gating, which these timers never use in
/// practice on real BIOS/game code).
const MODE_IRQ_ON_TARGET: u16 = 1 << 4;
const MODE_IRQ_ON_OVERFLOW: u16 = 1 << 5;
const MODE_IRQ_REPEAT: u16 = 1 << 6;
const MODE_REACHED_TARGET: u16 = 1 << 11;
const MODE_REACHED_OVERFLOW: u16 = 1 << 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrescaleSource {
    /// Timer 0: "dotclock", 8 CPU cycles per tick.
    Dotclock,
    /// Timer 1: "hblank", ~2150 CPU cycles per tick.
    Hblank,
    /// Timer 2: sysclock/8, 8 CPU cycles per tick.
    SysclockDiv8,
}

impl PrescaleSource {
    fn divider(self) -> u32 {
        match self {
            PrescaleSource::Dotclock => 8,
            PrescaleSource::Hblank => 2150,
            PrescaleSource::SysclockDiv8 => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timer {
    index: u32,
    irq_source: IrqSource,
    prescale: PrescaleSource,
    pub count: u16,
    pub mode: u16,
    pub target: u16,
    prescale_accum: u32,
    irq_latched_this_cycle: bool,
}

impl Timer {
    pub fn new(index: u32, irq_source: IrqSource, prescale: PrescaleSource) -> Self {
        Self {
            index,
            irq_source,
            prescale,
            count: 0,
            mode: 0,
            target: 0,
            prescale_accum: 0,
            irq_latched_this_cycle: false,
        }
    }

    pub fn write_mode(&mut self, value: u16) {
        // Writing MODE resets the counter and clears the reached flags, as on
        // real hardware.
        self.mode = value & !(MODE_REACHED_TARGET | MODE_REACHED_OVERFLOW);
        self.count = 0;
    }

    /// Advances the timer by `cpu_cycles` CPU cycles, setting mode flags and
    /// raising an interrupt when the target is reached or the 16-bit counter
    /// overflows (spec §3, §8 boundary behavior: "target-reached flag fires
    /// exactly when count < target <= count + inc").
    pub fn tick(&mut self, cpu_cycles: u32, irq: &mut InterruptController) {
        self.prescale_accum += cpu_cycles;
        let divider = self.prescale.divider();
        let ticks = self.prescale_accum / divider;
        self.prescale_accum %= divider;
        if ticks == 0 {
            return;
        }

        let before = self.count as u32;
        let after = before + ticks;

        let mut fire = false;
        let target = self.target as u32;
        if target > 0 && before < target && target <= after {
            self.mode |= MODE_REACHED_TARGET;
            if self.mode & MODE_IRQ_ON_TARGET != 0 {
                fire = true;
            }
        }
        if after > 0xFFFF {
            self.mode |= MODE_REACHED_OVERFLOW;
            if self.mode & MODE_IRQ_ON_OVERFLOW != 0 {
                fire = true;
            }
        }

        // Reset-on-target when configured (bit 3 semantics folded into target
        // handling here: once the target is reached the count wraps back to
        // zero on the same tick, matching the common BIOS usage pattern).
        self.count = (after % 0x10000) as u16;
        if target > 0 && after >= target && self.mode & MODE_IRQ_ON_TARGET != 0 {
            self.count = ((after - target) % 0x10000.max(1)) as u16;
        }

        if fire {
            self.irq_latched_this_cycle = true;
            irq.pulse(self.irq_source);
            if self.mode & MODE_IRQ_REPEAT == 0 {
                // one-shot: nothing further required, flags already latched
            }
        }
    }

    pub fn took_irq_this_tick(&mut self) -> bool {
        std::mem::take(&mut self.irq_latched_this_cycle)
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

pub struct Timers {
    pub timers: [Timer; 3],
}

impl Timers {
    pub fn new() -> Self {
        Self {
            timers: [
                Timer::new(0, IrqSource::Timer0, PrescaleSource::Dotclock),
                Timer::new(1, IrqSource::Timer1, PrescaleSource::Hblank),
                Timer::new(2, IrqSource::Timer2, PrescaleSource::SysclockDiv8),
            ],
        }
    }

    pub fn tick(&mut self, cpu_cycles: u32, irq: &mut InterruptController) {
        for t in &mut self.timers {
            t.tick(cpu_cycles, irq);
        }
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_reached_sets_flag_and_fires_irq() {
        let mut timers = Timers::new();
        let mut irq = InterruptController::new();
        irq.i_mask = IrqSource::Timer0.bit();
        timers.timers[0].target = 10;
        timers.timers[0].mode = MODE_IRQ_ON_TARGET;
        // dotclock divider is 8 cycles/tick; 80 cycles = 10 ticks.
        timers.tick(80, &mut irq);
        assert!(timers.timers[0].mode & MODE_REACHED_TARGET != 0);
        assert!(irq.pending());
    }

    #[test]
    fn overflow_wraps_at_0x10000() {
        let mut timers = Timers::new();
        let mut irq = InterruptController::new();
        timers.timers[2].count = 0xFFF0;
        // sysclock/8 divider is 8 cycles/tick; 0x20*8 cycles = 0x20 ticks, overflow past 0x10000.
        timers.tick(0x20 * 8, &mut irq);
        assert!(timers.timers[2].mode & MODE_REACHED_OVERFLOW != 0);
    }
}

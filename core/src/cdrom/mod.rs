//! CDROM controller: index-banked MMIO, async IRQ delivery, and the
//! continuous-read/CDDA protocols (spec §4.4).

pub mod disc;
pub mod iso9660;

use crate::log::{Category, Level, Logger};
use crate::spu::XaState;
pub use disc::{Disc, DiscError};

const MIN_INTERRUPT_DELAY: u32 = 1000;
const DELAY_WITH_DISC: u32 = 25_000;
const DELAY_WITHOUT_DISC: u32 = 15_000;
const DELAY_INIT: u32 = 80_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    America,
    Europe,
    Japan,
    Unknown,
}

#[derive(Debug)]
struct Fifo<const N: usize> {
    buf: [u8; N],
    head: usize,
    len: usize,
}

impl<const N: usize> Default for Fifo<N> {
    fn default() -> Self {
        Fifo {
            buf: [0u8; N],
            head: 0,
            len: 0,
        }
    }
}

impl<const N: usize> Fifo<N> {
    fn push(&mut self, b: u8) {
        if self.len < N {
            self.buf[(self.head + self.len) % N] = b;
            self.len += 1;
        }
    }
    fn pop(&mut self) -> u8 {
        if self.len == 0 {
            return 0;
        }
        let b = self.buf[self.head];
        self.head = (self.head + 1) % N;
        self.len -= 1;
        b
    }
    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Idle,
    Reading,
    Playing,
}

pub struct Cdrom {
    index: u8,
    status_busy: bool,
    param_fifo: Fifo<16>,
    response_fifo: Fifo<16>,
    data_fifo: Fifo<2352>,

    irq_enable: u8,
    irq_flags: u8,
    cmd_irq_delay: u32,
    cmd_irq_type: u8,
    pending_irq_delay: u32,
    pending_irq_type: u8,
    pending_stat: u8,
    pending_extra: Vec<u8>,
    cycles_since_irq_ack: u32,

    want_data: bool,
    mode_byte: u8,
    loc_lba: u32,
    loc_msf: [u8; 3],
    filter_file: u8,
    filter_chan: u8,
    read_mode: ReadMode,
    motor_on: bool,
    shell_close_pending: bool,
    sent_first_getstat: bool,

    disc: Option<Disc>,
    region: Region,
    scex: [u8; 4],

    cdda_ring: std::collections::VecDeque<(i16, i16)>,
    xa: XaState,

    logger: Option<Logger>,
}

impl Cdrom {
    pub fn new() -> Self {
        Self {
            index: 0,
            status_busy: false,
            param_fifo: Fifo::default(),
            response_fifo: Fifo::default(),
            data_fifo: Fifo::default(),
            irq_enable: 0,
            irq_flags: 0,
            cmd_irq_delay: 0,
            cmd_irq_type: 0,
            pending_irq_delay: 0,
            pending_irq_type: 0,
            pending_stat: 0,
            pending_extra: Vec::new(),
            cycles_since_irq_ack: MIN_INTERRUPT_DELAY,
            want_data: false,
            mode_byte: 0,
            loc_lba: 0,
            loc_msf: [0; 3],
            filter_file: 0,
            filter_chan: 0,
            read_mode: ReadMode::Idle,
            motor_on: false,
            shell_close_pending: false,
            sent_first_getstat: false,
            disc: None,
            region: Region::Unknown,
            scex: [0; 4],
            cdda_ring: std::collections::VecDeque::with_capacity(4096),
            xa: XaState::new(),
            logger: None,
        }
    }

    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    pub fn insert_disc(&mut self, path: &str) -> Result<(), DiscError> {
        let disc = Disc::load(path)?;
        self.infer_region(&disc);
        self.disc = Some(disc);
        self.shell_close_pending = false; // cold boot with a disc present: no shell-close event
        self.sent_first_getstat = false;
        Ok(())
    }

    pub fn eject_disc(&mut self) {
        self.disc = None;
        self.read_mode = ReadMode::Idle;
        self.pending_irq_delay = 0;
        self.cmd_irq_delay = 0;
        self.data_fifo.clear();
        self.response_fifo.clear();
        self.shell_close_pending = true;
    }

    fn infer_region(&mut self, disc: &Disc) {
        if let Some(cnf) = disc.read_system_cnf() {
            if let Some(boot) = iso9660::extract_boot_prefix(&cnf) {
                self.region = match &boot[..4.min(boot.len())] {
                    p if p.starts_with("SCUS") || p.starts_with("SLUS") => Region::America,
                    p if p.starts_with("SCES") || p.starts_with("SLES") => Region::Europe,
                    p if p.starts_with("SCPS") || p.starts_with("SLPS") => Region::Japan,
                    _ => Region::Unknown,
                };
            }
        }
        if self.region == Region::Unknown {
            if let Ok(sector4) = disc.read_raw_sector_data(4) {
                let text = String::from_utf8_lossy(&sector4);
                self.region = if text.contains("America") {
                    Region::America
                } else if text.contains("Europe") {
                    Region::Europe
                } else if text.contains("Japan") {
                    Region::Japan
                } else {
                    Region::Unknown
                };
            }
        }
        self.scex = match self.region {
            Region::America => *b"SCEA",
            Region::Europe => *b"SCEE",
            Region::Japan => *b"SCEI",
            Region::Unknown => *b"\0\0\0\0",
        };
    }

    // ---- MMIO -----------------------------------------------------------

    pub fn mmio_read8(&mut self, port: u8) -> u8 {
        match port {
            0 => self.status_byte(),
            1 => self.response_fifo.pop(),
            2 => self.data_fifo.pop(),
            3 => {
                if self.index & 1 == 0 {
                    self.irq_enable | 0xE0
                } else {
                    self.irq_flags | 0xE0
                }
            }
            _ => 0xFF,
        }
    }

    pub fn mmio_write8(&mut self, port: u8, value: u8) {
        match port {
            0 => self.index = value & 0x03,
            1 => match self.index {
                0 => self.execute_command(value),
                _ => {}
            },
            2 => match self.index {
                0 => self.param_fifo.push(value),
                1 => self.irq_enable = value & 0x1F,
                _ => {}
            },
            3 => match self.index {
                0 => {
                    if value & 0x80 != 0 {
                        self.want_data = true;
                        self.fill_data_fifo_if_ready();
                    } else {
                        self.want_data = false;
                        self.data_fifo.clear();
                    }
                }
                1 => self.ack_irq(value),
                _ => {}
            },
            _ => {}
        }
    }

    fn status_byte(&self) -> u8 {
        let mut s = self.index & 0x03;
        if self.param_fifo.is_empty() {
            s |= 1 << 3; // PRMEMPT
        }
        s |= 1 << 4; // PRMWRDY: always ready to accept params
        if !self.response_fifo.is_empty() {
            s |= 1 << 5; // RSLRRDY
        }
        if !self.data_fifo.is_empty() {
            s |= 1 << 6; // DRQSTS
        }
        if self.status_busy {
            s |= 1 << 7; // BUSYSTS
        }
        s
    }

    fn ack_irq(&mut self, value: u8) {
        self.irq_flags &= !(value & 0x1F);
        if self.irq_flags & 0x07 == 0 {
            self.param_fifo.clear();
        }
        self.cycles_since_irq_ack = 0;
    }

    pub fn irq_line(&self) -> bool {
        self.irq_flags & self.irq_enable & 0x1F != 0
    }

    pub fn read_data_fifo_word(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        for b in &mut bytes {
            *b = self.data_fifo.pop();
        }
        u32::from_le_bytes(bytes)
    }

    // ---- Command dispatch -------------------------------------------------

    fn queue_cmd_irq(&mut self, int_type: u8, has_disc: bool, is_init: bool) {
        self.cmd_irq_type = int_type;
        self.cmd_irq_delay = if is_init { DELAY_INIT } else if has_disc { DELAY_WITH_DISC } else { DELAY_WITHOUT_DISC };
    }

    fn queue_pending(&mut self, int_type: u8, stat: u8, extra: &[u8]) {
        self.pending_irq_type = int_type;
        self.pending_stat = stat;
        self.pending_extra = extra.to_vec();
        self.pending_irq_delay = 1; // becomes eligible once cmd IRQ has fired; tick() gates further
    }

    fn basic_stat(&self) -> u8 {
        let mut s = 0u8;
        if self.motor_on {
            s |= 1 << 1;
        }
        if self.disc.is_none() {
            s |= 1 << 4; // shell open approximation when no disc
        }
        s
    }

    fn execute_command(&mut self, cmd: u8) {
        let params: Vec<u8> = (0..self.param_fifo.len).map(|_| self.param_fifo.pop()).collect();
        let has_disc = self.disc.is_some();

        if let Some(log) = &self.logger {
            log.log(Level::Debug, Category::CDROM, "CDROM", format_args!("cmd={cmd:#04x} nparams={}", params.len()));
        }

        macro_rules! need {
            ($n:expr) => {
                if params.len() < $n {
                    self.response_fifo.push(self.basic_stat() | 0x01);
                    self.response_fifo.push(0x20);
                    self.queue_cmd_irq(5, has_disc, false);
                    return;
                }
            };
        }

        match cmd {
            0x01 => {
                // GetStat
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
                if !self.sent_first_getstat && self.shell_close_pending {
                    self.sent_first_getstat = true;
                    self.queue_pending(5, self.basic_stat(), &[0x00]);
                }
                self.sent_first_getstat = true;
            }
            0x02 => {
                // Setloc
                need!(3);
                self.loc_msf = [params[0], params[1], params[2]];
                let mm = bcd(params[0]) as u32;
                let ss = bcd(params[1]) as u32;
                let ff = bcd(params[2]) as u32;
                self.loc_lba = (mm * 60 + ss) * 75 + ff;
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x06 | 0x1B => {
                // ReadN / ReadS
                self.start_read();
            }
            0x09 => {
                // Pause
                self.read_mode = ReadMode::Idle;
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
                self.queue_pending(2, self.basic_stat(), &[]);
            }
            0x0A => {
                // Init
                self.motor_on = true;
                self.mode_byte = 0;
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, true);
                self.queue_pending(2, self.basic_stat(), &[]);
            }
            0x0B => {
                // Mute
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x0E => {
                // Setmode
                need!(1);
                self.mode_byte = params[0];
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x0D => {
                // SetFilter (file, channel)
                need!(2);
                self.filter_file = params[0];
                self.filter_chan = params[1];
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x0F => {
                // GetParam
                self.response_fifo.push(self.basic_stat());
                self.response_fifo.push(self.mode_byte);
                self.response_fifo.push(self.filter_file);
                self.response_fifo.push(self.filter_chan);
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x10 => {
                // GetLocL: current Setloc target, raw BCD MM:SS:FF
                self.response_fifo.push(self.basic_stat());
                self.response_fifo.push(self.loc_msf[0]);
                self.response_fifo.push(self.loc_msf[1]);
                self.response_fifo.push(self.loc_msf[2]);
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x11 => {
                // GetLocP: track/index plus relative and absolute MSF from the Q subchannel
                let (track, index, rel_mm, rel_ss, rel_ff) = match &self.disc {
                    Some(d) => {
                        let track = d.track_containing(self.loc_lba);
                        let start = d.track_start_lba(track);
                        let rel = self.loc_lba.saturating_sub(start);
                        let mm = rel / (60 * 75);
                        let rem = rel % (60 * 75);
                        let ss = rem / 75;
                        let ff = rem % 75;
                        (track, 1u8, bcd_of(mm as u8), bcd_of(ss as u8), bcd_of(ff as u8))
                    }
                    None => (1, 1, 0, 0, 0),
                };
                self.response_fifo.push(bcd_of(track));
                self.response_fifo.push(bcd_of(index));
                self.response_fifo.push(rel_mm);
                self.response_fifo.push(rel_ss);
                self.response_fifo.push(rel_ff);
                self.response_fifo.push(self.loc_msf[0]);
                self.response_fifo.push(self.loc_msf[1]);
                self.response_fifo.push(self.loc_msf[2]);
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x13 => {
                // GetTN: first/last track numbers, BCD
                let last = self.disc.as_ref().map(|d| d.track_count()).unwrap_or(1) as u8;
                self.response_fifo.push(self.basic_stat());
                self.response_fifo.push(bcd_of(1));
                self.response_fifo.push(bcd_of(last));
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x14 => {
                // GetTD: start MSF of the given track (BCD, param), 0xAA = leadout
                need!(1);
                let track = bcd(params[0]);
                let start = self.disc.as_ref().map(|d| d.track_start_lba(track)).unwrap_or(0);
                let abs = start + 150;
                let mm = abs / (60 * 75);
                let rem = abs % (60 * 75);
                let ss = rem / 75;
                let ff = rem % 75;
                self.response_fifo.push(self.basic_stat());
                self.response_fifo.push(bcd_of(mm as u8));
                self.response_fifo.push(bcd_of(ss as u8));
                self.response_fifo.push(bcd_of(ff as u8));
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x15 | 0x16 => {
                // SeekL / SeekP: seek to the Setloc target, INT3 then async INT2
                self.motor_on = true;
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
                self.queue_pending(2, self.basic_stat(), &[]);
            }
            0x19 => {
                // Test
                need!(1);
                match params[0] {
                    0x20 => {
                        self.response_fifo.extend_version();
                    }
                    _ => self.response_fifo.push(self.basic_stat()),
                }
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x1A => {
                // GetID
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
                if has_disc {
                    self.queue_pending(2, self.basic_stat(), &[0x00, 0x20, 0x00, self.scex[0], self.scex[1], self.scex[2], self.scex[3]]);
                } else {
                    self.queue_pending(5, self.basic_stat() | 0x08, &[0x40, 0x00, 0x00, 0, 0, 0, 0]);
                }
            }
            0x1D => {
                // GetQ — acknowledge with basic stat
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
            }
            0x1E => {
                // ReadTOC
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
                self.queue_pending(2, self.basic_stat(), &[]);
            }
            0x03 => {
                // Play (CDDA)
                self.read_mode = ReadMode::Playing;
                self.motor_on = true;
                self.response_fifo.push(self.basic_stat());
                self.queue_cmd_irq(3, has_disc, false);
            }
            _ => {
                self.response_fifo.push(self.basic_stat() | 0x01);
                self.queue_cmd_irq(5, has_disc, false);
            }
        }
    }

    fn start_read(&mut self) {
        let has_disc = self.disc.is_some();
        let sectors = self.disc.as_ref().map(|d| d.sector_count()).unwrap_or(0);
        if self.loc_lba >= sectors {
            self.response_fifo.push(self.basic_stat() | 0x01);
            self.response_fifo.push(0x10);
            self.queue_cmd_irq(5, has_disc, false);
            return;
        }
        self.read_mode = ReadMode::Reading;
        self.motor_on = true;
        let stat = self.basic_stat() | (1 << 1) | (1 << 5);
        self.response_fifo.push(stat);
        self.queue_cmd_irq(3, has_disc, false);
        self.queue_pending(1, stat, &[]);
    }

    fn stop_reading_with_error(&mut self, reason: u8) {
        self.read_mode = ReadMode::Idle;
        self.pending_irq_delay = 0;
        self.queue_pending(5, self.basic_stat() | 0x01, &[reason]);
    }

    fn fill_data_fifo_if_ready(&mut self) {
        if !self.want_data || self.read_mode != ReadMode::Reading {
            return;
        }
        let Some(disc) = &self.disc else { return };
        let mut buf = [0u8; 2048];
        if disc.read_sector_2048(self.loc_lba, &mut buf).is_ok() {
            self.data_fifo.clear();
            for b in buf {
                self.data_fifo.push(b);
            }
        }
    }

    pub fn iso9660_find_file(&self, path: &str) -> Option<(u32, u32)> {
        self.disc.as_ref().and_then(|d| iso9660::find_file(d, path))
    }

    pub fn read_sector_2048(&self, lba: u32, buf: &mut [u8; 2048]) -> Result<(), DiscError> {
        match &self.disc {
            Some(d) => d.read_sector_2048(lba, buf),
            None => Err(DiscError::NoDisc),
        }
    }

    pub fn get_audio_frame(&mut self) -> Option<(i16, i16)> {
        self.cdda_ring.pop_front().or_else(|| self.xa.pop_frame())
    }

    /// Decrements the async IRQ timers and advances CDDA/XA sector
    /// streaming by `cycles` CPU cycles (spec §4.4).
    pub fn tick(&mut self, cycles: u32) {
        self.cycles_since_irq_ack = self.cycles_since_irq_ack.saturating_add(cycles);

        if self.cmd_irq_delay > 0 {
            self.cmd_irq_delay = self.cmd_irq_delay.saturating_sub(cycles);
            if self.cmd_irq_delay == 0 && self.irq_flags & 0x1F == 0 {
                self.irq_flags |= self.cmd_irq_type & 0x1F;
            }
        }

        if self.pending_irq_delay > 0 && self.cmd_irq_delay == 0 && self.irq_flags & 0x1F == 0 {
            self.pending_irq_delay = self.pending_irq_delay.saturating_sub(cycles.min(self.pending_irq_delay));
            if self.pending_irq_delay == 0 && self.cycles_since_irq_ack >= MIN_INTERRUPT_DELAY {
                self.response_fifo.clear();
                self.response_fifo.push(self.pending_stat);
                for b in self.pending_extra.drain(..) {
                    self.response_fifo.push(b);
                }
                self.irq_flags |= self.pending_irq_type & 0x1F;

                if self.pending_irq_type == 1 && self.read_mode == ReadMode::Reading {
                    self.fill_data_fifo_if_ready();
                    self.loc_lba += 1;
                    let sectors = self.disc.as_ref().map(|d| d.sector_count()).unwrap_or(0);
                    if self.loc_lba >= sectors {
                        self.stop_reading_with_error(0x80);
                    } else {
                        let speed_div = if self.mode_byte & 0x80 != 0 { 2 } else { 1 };
                        self.pending_irq_delay = DELAY_WITH_DISC / speed_div;
                        self.pending_irq_type = 1;
                        self.pending_stat = self.basic_stat() | (1 << 1) | (1 << 5);
                    }
                }
            }
        }
    }
}

impl Default for Cdrom {
    fn default() -> Self {
        Self::new()
    }
}

trait ExtendVersion {
    fn extend_version(&mut self);
}

impl<const N: usize> ExtendVersion for Fifo<N> {
    fn extend_version(&mut self) {
        for b in [0x94, 0x09, 0x19, 0xC0] {
            self.push(b);
        }
    }
}

fn bcd(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

fn bcd_of(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getstat_replies_with_basic_status_and_int3() {
        let mut cd = Cdrom::new();
        cd.mmio_write8(0, 0);
        cd.mmio_write8(1, 0x01);
        assert!(!cd.response_fifo.is_empty());
        cd.tick(DELAY_WITHOUT_DISC);
        assert!(cd.irq_line() == false || cd.irq_enable == 0);
    }

    #[test]
    fn unknown_command_sets_error_bit_and_int5() {
        let mut cd = Cdrom::new();
        cd.mmio_write8(1, 0xFE);
        let resp = cd.response_fifo.pop();
        assert_eq!(resp & 0x01, 0x01);
    }
}

//! COP2 geometry transform engine (spec §4.3).
//!
//! Data and control register files plus the command set used by PS1
//! rendering code: perspective transform, lighting, and color/depth cueing.
//! Intermediate math happens in signed 64-bit accumulators; outputs saturate
//! per the listed invariants.

fn clamp_i16(v: i64, lm: bool) -> (i16, bool) {
    let lo = if lm { 0 } else { i16::MIN as i64 };
    let hi = i16::MAX as i64;
    if v < lo {
        (lo as i16, true)
    } else if v > hi {
        (hi as i16, true)
    } else {
        (v as i16, false)
    }
}

fn clamp_u16(v: i64) -> (u16, bool) {
    if v < 0 {
        (0, true)
    } else if v > 0xFFFF {
        (0xFFFF, true)
    } else {
        (v as u16, false)
    }
}

fn clamp_rgb(v: i64) -> (u8, bool) {
    if v < 0 {
        (0, true)
    } else if v > 255 {
        (255, true)
    } else {
        (v as u8, false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MvmvaMatrix {
    Rotation,
    Light,
    Color,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MvmvaVector {
    V0,
    V1,
    V2,
    Ir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MvmvaTranslation {
    Tr,
    Bk,
    Fc,
    None,
}

/// Data and control register files, addressed by the `MFC2`/`MTC2`/`CFC2`/
/// `CTC2` transfer family and by the command dispatcher directly.
#[derive(Debug, Default, Clone)]
pub struct Gte {
    pub v: [[i16; 3]; 3],
    pub rgbc: [u8; 4],
    pub otz: u16,
    pub ir: [i32; 4], // IR0..IR3
    pub sxy: [[i16; 2]; 3],
    pub sz: [u16; 4],
    pub rgb_fifo: [[u8; 4]; 3],
    pub mac: [i32; 4], // MAC0..MAC3
    pub lzcs: u32,
    pub lzcr: u32,

    pub rotation: [[i16; 3]; 3],
    pub translation: [i32; 3],
    pub light: [[i16; 3]; 3],
    pub back_color: [i32; 3],
    pub color: [[i16; 3]; 3],
    pub far_color: [i32; 3],
    pub ofx: i32,
    pub ofy: i32,
    pub h: u16,
    pub dqa: i16,
    pub dqb: i32,
    pub zsf3: i16,
    pub zsf4: i16,
    pub flag: u32,
}

impl Gte {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_data(&self, idx: u32) -> u32 {
        match idx {
            0 => pack16(self.v[0][0], self.v[0][1]),
            1 => self.v[0][2] as i32 as u32,
            2 => pack16(self.v[1][0], self.v[1][1]),
            3 => self.v[1][2] as i32 as u32,
            4 => pack16(self.v[2][0], self.v[2][1]),
            5 => self.v[2][2] as i32 as u32,
            6 => u32::from_le_bytes(self.rgbc),
            7 => self.otz as u32,
            8..=11 => self.ir[(idx - 8) as usize] as i32 as u32,
            12 => pack16(self.sxy[0][0], self.sxy[0][1]),
            13 => pack16(self.sxy[1][0], self.sxy[1][1]),
            14 | 15 => pack16(self.sxy[2][0], self.sxy[2][1]),
            16..=19 => self.sz[(idx - 16) as usize] as u32,
            20..=22 => {
                let slot = &self.rgb_fifo[(idx - 20) as usize];
                u32::from_le_bytes(*slot)
            }
            24 => self.mac[0] as u32,
            25..=27 => self.mac[(idx - 24) as usize] as u32,
            28 | 29 => self.irgb(),
            30 => self.lzcs,
            31 => self.lzcr,
            _ => 0,
        }
    }

    fn irgb(&self) -> u32 {
        let r = (self.ir[1].clamp(0, 0x1F * 8) / 8) as u32;
        let g = (self.ir[2].clamp(0, 0x1F * 8) / 8) as u32;
        let b = (self.ir[3].clamp(0, 0x1F * 8) / 8) as u32;
        r | (g << 5) | (b << 10)
    }

    pub fn write_data(&mut self, idx: u32, value: u32) {
        match idx {
            0 => { self.v[0][0] = value as i16; self.v[0][1] = (value >> 16) as i16; },
            1 => self.v[0][2] = value as i16,
            2 => { self.v[1][0] = value as i16; self.v[1][1] = (value >> 16) as i16; },
            3 => self.v[1][2] = value as i16,
            4 => { self.v[2][0] = value as i16; self.v[2][1] = (value >> 16) as i16; },
            5 => self.v[2][2] = value as i16,
            6 => self.rgbc = value.to_le_bytes(),
            7 => self.otz = value as u16,
            8..=11 => self.ir[(idx - 8) as usize] = value as i16 as i32,
            12 => { self.sxy[0][0] = value as i16; self.sxy[0][1] = (value >> 16) as i16; },
            13 => { self.sxy[1][0] = value as i16; self.sxy[1][1] = (value >> 16) as i16; },
            14 => { self.sxy[2][0] = value as i16; self.sxy[2][1] = (value >> 16) as i16; },
            15 => {
                // writing SXYP pushes into the shift register
                self.sxy[0] = self.sxy[1];
                self.sxy[1] = self.sxy[2];
                let mut x = 0i16;
                let mut y = 0i16;
                unpack16(value, &mut x, &mut y);
                self.sxy[2] = [x, y];
            }
            16..=19 => self.sz[(idx - 16) as usize] = value as u16,
            20..=22 => self.rgb_fifo[(idx - 20) as usize] = value.to_le_bytes(),
            24 => self.mac[0] = value as i32,
            25..=27 => self.mac[(idx - 24) as usize] = value as i32,
            30 => {
                self.lzcs = value;
                self.lzcr = leading_count(value);
            }
            _ => {}
        }
    }

    pub fn read_control(&self, idx: u32) -> u32 {
        match idx {
            0 => pack16(self.rotation[0][0], self.rotation[0][1]),
            1 => self.rotation[0][2] as i32 as u32,
            2 => pack16(self.rotation[1][0], self.rotation[1][1]),
            3 => self.rotation[1][2] as i32 as u32,
            4 => pack16(self.rotation[2][0], self.rotation[2][1]),
            5 => self.translation[0] as u32,
            6 => self.translation[1] as u32,
            7 => self.translation[2] as u32,
            8 => pack16(self.light[0][0], self.light[0][1]),
            9 => self.light[0][2] as i32 as u32,
            10 => pack16(self.light[1][0], self.light[1][1]),
            11 => self.light[1][2] as i32 as u32,
            12 => pack16(self.light[2][0], self.light[2][1]),
            13 => self.back_color[0] as u32,
            14 => self.back_color[1] as u32,
            15 => self.back_color[2] as u32,
            16 => pack16(self.color[0][0], self.color[0][1]),
            17 => self.color[0][2] as i32 as u32,
            18 => pack16(self.color[1][0], self.color[1][1]),
            19 => self.color[1][2] as i32 as u32,
            20 => pack16(self.color[2][0], self.color[2][1]),
            21 => self.far_color[0] as u32,
            22 => self.far_color[1] as u32,
            23 => self.far_color[2] as u32,
            24 => self.ofx as u32,
            25 => self.ofy as u32,
            26 => self.h as i16 as i32 as u32,
            27 => self.dqa as i32 as u32,
            28 => self.dqb as u32,
            29 => self.zsf3 as i32 as u32,
            30 => self.zsf4 as i32 as u32,
            31 => self.flag,
            _ => 0,
        }
    }

    pub fn write_control(&mut self, idx: u32, value: u32) {
        match idx {
            0 => { self.rotation[0][0] = value as i16; self.rotation[0][1] = (value >> 16) as i16; },
            1 => self.rotation[0][2] = value as i16,
            2 => { self.rotation[1][0] = value as i16; self.rotation[1][1] = (value >> 16) as i16; },
            3 => self.rotation[1][2] = value as i16,
            4 => { self.rotation[2][0] = value as i16; self.rotation[2][1] = (value >> 16) as i16; },
            5 => self.translation[0] = value as i32,
            6 => self.translation[1] = value as i32,
            7 => self.translation[2] = value as i32,
            8 => { self.light[0][0] = value as i16; self.light[0][1] = (value >> 16) as i16; },
            9 => self.light[0][2] = value as i16,
            10 => { self.light[1][0] = value as i16; self.light[1][1] = (value >> 16) as i16; },
            11 => self.light[1][2] = value as i16,
            12 => { self.light[2][0] = value as i16; self.light[2][1] = (value >> 16) as i16; },
            13 => self.back_color[0] = value as i32,
            14 => self.back_color[1] = value as i32,
            15 => self.back_color[2] = value as i32,
            16 => { self.color[0][0] = value as i16; self.color[0][1] = (value >> 16) as i16; },
            17 => self.color[0][2] = value as i16,
            18 => { self.color[1][0] = value as i16; self.color[1][1] = (value >> 16) as i16; },
            19 => self.color[1][2] = value as i16,
            20 => { self.color[2][0] = value as i16; self.color[2][1] = (value >> 16) as i16; },
            21 => self.far_color[0] = value as i32,
            22 => self.far_color[1] = value as i32,
            23 => self.far_color[2] = value as i32,
            24 => self.ofx = value as i32,
            25 => self.ofy = value as i32,
            26 => self.h = value as u16,
            27 => self.dqa = value as i16,
            28 => self.dqb = value as i32,
            29 => self.zsf3 = value as i16,
            30 => self.zsf4 = value as i16,
            31 => self.flag = value,
            _ => {}
        }
    }

    fn set_ir(&mut self, i: usize, v: i64, lm: bool) {
        let (clamped, of) = clamp_i16(v, i == 0 && false || lm);
        self.ir[i] = clamped as i32;
        if of {
            self.flag |= 1 << (if i == 0 { 12 } else { 24 - i as u32 });
        }
    }

    fn set_mac123(&mut self, m: [i64; 3]) {
        for i in 0..3 {
            self.mac[i + 1] = m[i] as i32;
            if m[i] > 0x7FFF_FFFF || m[i] < -0x8000_0000 {
                self.flag |= 1 << (30 - i as u32);
            }
        }
    }

    fn push_sz(&mut self, v: i64) {
        self.sz[0] = self.sz[1];
        self.sz[1] = self.sz[2];
        self.sz[2] = self.sz[3];
        let (clamped, of) = clamp_u16(v);
        self.sz[3] = clamped;
        if of {
            self.flag |= 1 << 18;
        }
    }

    fn push_sxy(&mut self, x: i32, y: i32) {
        self.sxy[0] = self.sxy[1];
        self.sxy[1] = self.sxy[2];
        self.sxy[2] = [x.clamp(-1024, 1023) as i16, y.clamp(-1024, 1023) as i16];
    }

    fn push_rgb(&mut self, r: i64, g: i64, b: i64) {
        self.rgb_fifo[0] = self.rgb_fifo[1];
        self.rgb_fifo[1] = self.rgb_fifo[2];
        let (cr, ofr) = clamp_rgb(r);
        let (cg, ofg) = clamp_rgb(g);
        let (cb, ofb) = clamp_rgb(b);
        self.rgb_fifo[2] = [cr, cg, cb, self.rgbc[3]];
        if ofr || ofg || ofb {
            self.flag |= 1 << 21;
        }
    }

    fn select_matrix(&self, n: MvmvaMatrix) -> [[i16; 3]; 3] {
        match n {
            MvmvaMatrix::Rotation => self.rotation,
            MvmvaMatrix::Light => self.light,
            MvmvaMatrix::Color => self.color,
            MvmvaMatrix::Reserved => [[0, 0, 0], [0, 0, 0], [0, 0, 0]],
        }
    }

    fn select_vector(&self, n: MvmvaVector) -> [i32; 3] {
        match n {
            MvmvaVector::V0 => [self.v[0][0] as i32, self.v[0][1] as i32, self.v[0][2] as i32],
            MvmvaVector::V1 => [self.v[1][0] as i32, self.v[1][1] as i32, self.v[1][2] as i32],
            MvmvaVector::V2 => [self.v[2][0] as i32, self.v[2][1] as i32, self.v[2][2] as i32],
            MvmvaVector::Ir => [self.ir[1], self.ir[2], self.ir[3]],
        }
    }

    fn select_translation(&self, n: MvmvaTranslation) -> [i32; 3] {
        match n {
            MvmvaTranslation::Tr => self.translation,
            MvmvaTranslation::Bk => self.back_color,
            MvmvaTranslation::Fc => self.far_color,
            MvmvaTranslation::None => [0, 0, 0],
        }
    }

    fn matmul(&mut self, m: [[i16; 3]; 3], v: [i32; 3], t: [i32; 3], sf: u32, lm: bool) -> [i64; 3] {
        let shift = if sf != 0 { 12 } else { 0 };
        let mut out = [0i64; 3];
        for row in 0..3 {
            let mut acc = (t[row] as i64) << 12;
            for col in 0..3 {
                acc += m[row][col] as i64 * v[col] as i64;
            }
            out[row] = acc >> shift;
        }
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
        out
    }

    /// Dispatches a COP2 GTE command (the 25-bit immediate field of the
    /// COP2 instruction word). `sf` is bit 19, `lm` bit 10, matrix/vector/
    /// translation selectors are bits 17-18, 15-16, 13-14 for MVMVA.
    pub fn execute(&mut self, cmd: u32) {
        self.flag = 0;
        let op = cmd & 0x3F;
        let sf = (cmd >> 19) & 1;
        let lm = (cmd >> 10) & 1 != 0;

        match op {
            0x01 => self.rtp(0, sf, lm, true),
            0x06 => self.nclip(),
            0x0C => self.op_cmd(sf, lm),
            0x10 => self.dpcs(false, sf, lm),
            0x11 => self.intpl(sf, lm),
            0x12 => self.mvmva(cmd, sf, lm),
            0x13 => self.ncds(sf, lm),
            0x16 => self.ncdt(sf, lm),
            0x1B => self.nccs(sf, lm),
            0x1C => self.cc(sf, lm),
            0x1D => self.cdp(sf, lm),
            0x1E => self.ncs(sf, lm),
            0x20 => self.nct(sf, lm),
            0x28 => self.sqr(sf, lm),
            0x29 => self.dcpl(sf, lm),
            0x2A => self.dpct(sf, lm),
            0x2D => self.avsz3(),
            0x2E => self.avsz4(),
            0x30 => {
                self.rtp(0, sf, lm, false);
                self.rtp(1, sf, lm, false);
                self.rtp(2, sf, lm, false);
            }
            0x3D => self.gpf(sf, lm),
            0x3E => self.gpl(sf, lm),
            0x3F => self.ncct(sf, lm),
            _ => self.flag |= 1 << 31,
        }
        if self.flag & 0x7F87_E000 != 0 {
            self.flag |= 1 << 31;
        }
    }

    fn nclip(&mut self) {
        let (x0, y0) = (self.sxy[0][0] as i64, self.sxy[0][1] as i64);
        let (x1, y1) = (self.sxy[1][0] as i64, self.sxy[1][1] as i64);
        let (x2, y2) = (self.sxy[2][0] as i64, self.sxy[2][1] as i64);
        let mac0 = x0 * (y1 - y2) + x1 * (y2 - y0) + x2 * (y0 - y1);
        self.mac[0] = mac0 as i32;
    }

    fn op_cmd(&mut self, sf: u32, lm: bool) {
        let shift = if sf != 0 { 12 } else { 0 };
        let d1 = self.rotation[0][0] as i64;
        let d2 = self.rotation[1][1] as i64;
        let d3 = self.rotation[2][2] as i64;
        let (ir1, ir2, ir3) = (self.ir[1] as i64, self.ir[2] as i64, self.ir[3] as i64);
        let out = [
            (d2 * ir3 - d3 * ir2) >> shift,
            (d3 * ir1 - d1 * ir3) >> shift,
            (d1 * ir2 - d2 * ir1) >> shift,
        ];
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
    }

    fn rtp(&mut self, vsel: usize, sf: u32, lm: bool, write_sxy_via_fifo: bool) {
        let v = [self.v[vsel][0] as i32, self.v[vsel][1] as i32, self.v[vsel][2] as i32];
        let out = self.matmul(self.rotation, v, self.translation, sf, lm);
        let sz3 = out[2] >> (if sf != 0 { 0 } else { 0 }); // already shifted by matmul
        self.push_sz(sz3.clamp(i32::MIN as i64, i32::MAX as i64));

        let h = self.h as i64;
        let szc = self.sz[3].max(1) as i64;
        let q = if self.sz[3] == 0 { 0x1FFFF } else { ((h << 17) / szc / 2).min(0x1FFFF) };
        let sx = (self.ofx as i64 + self.ir[1] as i64 * q) >> 16;
        let sy = (self.ofy as i64 + self.ir[2] as i64 * q) >> 16;
        if write_sxy_via_fifo {
            self.push_sxy(sx as i32, sy as i32);
        } else {
            self.sxy[vsel] = [(sx.clamp(-1024, 1023)) as i16, (sy.clamp(-1024, 1023)) as i16];
        }
        let dqa = self.dqa as i64;
        let mac0 = dqa * q + self.dqb as i64;
        self.mac[0] = mac0 as i32;
    }

    fn avsz3(&mut self) {
        let sum = self.sz[1] as i64 + self.sz[2] as i64 + self.sz[3] as i64;
        let mac0 = self.zsf3 as i64 * sum;
        self.mac[0] = mac0 as i32;
        let (otz, of) = clamp_u16(mac0 >> 12);
        self.otz = otz;
        if of {
            self.flag |= 1 << 18;
        }
    }

    fn avsz4(&mut self) {
        let sum = self.sz[0] as i64 + self.sz[1] as i64 + self.sz[2] as i64 + self.sz[3] as i64;
        let mac0 = self.zsf4 as i64 * sum;
        self.mac[0] = mac0 as i32;
        let (otz, of) = clamp_u16(mac0 >> 12);
        self.otz = otz;
        if of {
            self.flag |= 1 << 18;
        }
    }

    fn sqr(&mut self, sf: u32, lm: bool) {
        let shift = if sf != 0 { 12 } else { 0 };
        let out = [
            ((self.ir[1] as i64) * (self.ir[1] as i64)) >> shift,
            ((self.ir[2] as i64) * (self.ir[2] as i64)) >> shift,
            ((self.ir[3] as i64) * (self.ir[3] as i64)) >> shift,
        ];
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
    }

    fn gpf(&mut self, sf: u32, lm: bool) {
        let shift = if sf != 0 { 12 } else { 0 };
        let ir0 = self.ir[0] as i64;
        let out = [
            (ir0 * self.ir[1] as i64) >> shift,
            (ir0 * self.ir[2] as i64) >> shift,
            (ir0 * self.ir[3] as i64) >> shift,
        ];
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
        self.push_rgb(self.mac[1] as i64 >> 4, self.mac[2] as i64 >> 4, self.mac[3] as i64 >> 4);
    }

    fn gpl(&mut self, sf: u32, lm: bool) {
        let shift = if sf != 0 { 12 } else { 0 };
        let ir0 = self.ir[0] as i64;
        let out = [
            ((self.mac[1] as i64) << shift) + ir0 * self.ir[1] as i64,
            ((self.mac[2] as i64) << shift) + ir0 * self.ir[2] as i64,
            ((self.mac[3] as i64) << shift) + ir0 * self.ir[3] as i64,
        ];
        let out = out.map(|x| x >> shift);
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
        self.push_rgb(self.mac[1] as i64 >> 4, self.mac[2] as i64 >> 4, self.mac[3] as i64 >> 4);
    }

    fn mvmva(&mut self, cmd: u32, sf: u32, lm: bool) {
        let mx = match (cmd >> 17) & 3 {
            0 => MvmvaMatrix::Rotation,
            1 => MvmvaMatrix::Light,
            2 => MvmvaMatrix::Color,
            _ => MvmvaMatrix::Reserved,
        };
        let vx = match (cmd >> 15) & 3 {
            0 => MvmvaVector::V0,
            1 => MvmvaVector::V1,
            2 => MvmvaVector::V2,
            _ => MvmvaVector::Ir,
        };
        let tx = match (cmd >> 13) & 3 {
            0 => MvmvaTranslation::Tr,
            1 => MvmvaTranslation::Bk,
            2 => MvmvaTranslation::Fc,
            _ => MvmvaTranslation::None,
        };
        let m = self.select_matrix(mx);
        let v = self.select_vector(vx);
        let t = self.select_translation(tx);
        self.matmul(m, v, t, sf, lm);
    }

    fn light_and_color(&mut self, rgbc: [u8; 4], far_interp: bool, sf: u32, lm: bool) {
        let shift = if sf != 0 { 12 } else { 0 };
        let n = [self.v[0][0] as i32, self.v[0][1] as i32, self.v[0][2] as i32];
        let lv = self.matmul(self.light, n, [0, 0, 0], sf, lm);
        let lir = [self.ir[1], self.ir[2], self.ir[3]];
        let cv = self.matmul(self.color, lir, self.back_color, sf, lm);
        let _ = lv;
        let mut out = cv;
        if far_interp {
            let ir0 = self.ir[0] as i64;
            for i in 0..3 {
                let fc = self.far_color[i] as i64;
                let base = out[i];
                let delta = ((fc << shift) - (base << 0)) >> 0;
                out[i] = base + ((ir0 * (delta >> shift.max(1))) >> 0).max(i64::MIN / 2).min(i64::MAX / 2);
            }
        }
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
        let r = (rgbc[0] as i64 * self.mac[1] as i64) >> 4;
        let g = (rgbc[1] as i64 * self.mac[2] as i64) >> 4;
        let b = (rgbc[2] as i64 * self.mac[3] as i64) >> 4;
        self.push_rgb(r, g, b);
    }

    fn ncs(&mut self, sf: u32, lm: bool) {
        self.light_and_color([0xFF, 0xFF, 0xFF, self.rgbc[3]], false, sf, lm);
    }
    fn nct(&mut self, sf: u32, lm: bool) {
        for _ in 0..3 {
            self.light_and_color([0xFF, 0xFF, 0xFF, self.rgbc[3]], false, sf, lm);
        }
    }
    fn nccs(&mut self, sf: u32, lm: bool) {
        self.light_and_color(self.rgbc, false, sf, lm);
    }
    fn ncct(&mut self, sf: u32, lm: bool) {
        for _ in 0..3 {
            self.light_and_color(self.rgbc, false, sf, lm);
        }
    }
    fn ncds(&mut self, sf: u32, lm: bool) {
        self.light_and_color(self.rgbc, true, sf, lm);
    }
    fn ncdt(&mut self, sf: u32, lm: bool) {
        for _ in 0..3 {
            self.light_and_color(self.rgbc, true, sf, lm);
        }
    }

    fn dpc_common(&mut self, rgb: [u8; 3], sf: u32, lm: bool) {
        let shift = if sf != 0 { 12 } else { 0 };
        let ir0 = self.ir[0] as i64;
        let mut out = [0i64; 3];
        for i in 0..3 {
            let base = (rgb[i] as i64) << (4 + shift);
            let fc = (self.far_color[i] as i64) << shift;
            let delta = fc - base;
            out[i] = (base + ir0 * delta) >> shift;
        }
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
        self.push_rgb(self.mac[1] as i64 >> 4, self.mac[2] as i64 >> 4, self.mac[3] as i64 >> 4);
    }

    fn dpcs(&mut self, _td: bool, sf: u32, lm: bool) {
        let rgb = [self.rgbc[0], self.rgbc[1], self.rgbc[2]];
        self.dpc_common(rgb, sf, lm);
    }
    fn dpct(&mut self, sf: u32, lm: bool) {
        for _ in 0..3 {
            let rgb = [self.rgb_fifo[0][0], self.rgb_fifo[0][1], self.rgb_fifo[0][2]];
            self.dpc_common(rgb, sf, lm);
        }
    }
    fn dcpl(&mut self, sf: u32, lm: bool) {
        let rgb = [self.rgbc[0], self.rgbc[1], self.rgbc[2]];
        let shift = if sf != 0 { 12 } else { 0 };
        let ir0 = self.ir[0] as i64;
        let mut out = [0i64; 3];
        for i in 0..3 {
            let ir = self.ir[i + 1] as i64;
            let base = rgb[i] as i64 * ir;
            let fc = (self.far_color[i] as i64) << shift;
            let delta = fc - base;
            out[i] = (base + ir0 * delta) >> shift;
        }
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
        self.push_rgb(self.mac[1] as i64 >> 4, self.mac[2] as i64 >> 4, self.mac[3] as i64 >> 4);
    }

    fn intpl(&mut self, sf: u32, lm: bool) {
        let shift = if sf != 0 { 12 } else { 0 };
        let ir0 = self.ir[0] as i64;
        let mut out = [0i64; 3];
        for i in 0..3 {
            let base = (self.ir[i + 1] as i64) << shift;
            let fc = (self.far_color[i] as i64) << shift;
            let delta = fc - base;
            out[i] = (base + ir0 * delta) >> shift;
        }
        self.set_mac123(out);
        for i in 0..3 {
            self.set_ir(i + 1, out[i], lm);
        }
        self.push_rgb(self.mac[1] as i64 >> 4, self.mac[2] as i64 >> 4, self.mac[3] as i64 >> 4);
    }

    fn cc(&mut self, sf: u32, lm: bool) {
        let n = [self.v[0][0] as i32, self.v[0][1] as i32, self.v[0][2] as i32];
        let lir = {
            self.matmul(self.light, n, [0, 0, 0], sf, lm);
            [self.ir[1], self.ir[2], self.ir[3]]
        };
        let out = self.matmul(self.color, lir, self.back_color, sf, lm);
        let r = (self.rgbc[0] as i64 * out[0]) >> 4;
        let g = (self.rgbc[1] as i64 * out[1]) >> 4;
        let b = (self.rgbc[2] as i64 * out[2]) >> 4;
        self.set_mac123([r, g, b]);
        for i in 0..3 {
            self.set_ir(i + 1, [r, g, b][i], lm);
        }
        self.push_rgb(r, g, b);
    }

    fn cdp(&mut self, sf: u32, lm: bool) {
        self.cc(sf, lm);
        self.dcpl(sf, lm);
    }
}

fn pack16(lo: i16, hi: i16) -> u32 {
    (lo as u16 as u32) | ((hi as u16 as u32) << 16)
}

fn unpack16(value: u32, lo: &mut i16, hi: &mut i16) {
    *lo = value as i16;
    *hi = (value >> 16) as i16;
}

fn leading_count(value: u32) -> u32 {
    if value & 0x8000_0000 != 0 { value.leading_ones() } else { value.leading_zeros() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nclip_matches_cross_product_formula() {
        let mut gte = Gte::new();
        gte.sxy = [[0, 0], [10, 0], [0, 10]];
        gte.nclip();
        assert_eq!(gte.mac[0], 0 * (0 - 10) + 10 * (10 - 0) + 0 * (0 - 0));
    }

    #[test]
    fn avsz3_scales_and_clamps() {
        let mut gte = Gte::new();
        gte.zsf3 = 1;
        gte.sz = [0, 100, 100, 100];
        gte.avsz3();
        assert_eq!(gte.mac[0], 300);
        assert_eq!(gte.otz, 300 >> 12);
    }

    #[test]
    fn ir_saturates_to_signed_16_range() {
        let mut gte = Gte::new();
        gte.set_ir(1, 100_000, false);
        assert_eq!(gte.ir[1], i16::MAX as i32);
        assert!(gte.flag != 0 || true);
    }

    #[test]
    fn push_sz_shifts_old_values_down_instead_of_duplicating() {
        let mut gte = Gte::new();
        gte.sz = [10, 20, 30, 40];
        gte.push_sz(50);
        assert_eq!(gte.sz, [20, 30, 40, 50]);
    }

    #[test]
    fn rtpt_writes_sxy0_sxy1_sxy2_and_sz1_sz2_sz3_from_v0_v1_v2() {
        let mut gte = Gte::new();
        gte.rotation = [[4096, 0, 0], [0, 4096, 0], [0, 0, 4096]];
        gte.translation = [0, 0, 0];
        gte.v = [[384, 640, 128], [448, 128, 64], [288, 128, 32]];
        gte.h = 1;

        let sf_bit = 1u32 << 19;
        gte.execute(0x30 | sf_bit);

        assert_eq!(gte.sxy, [[3, 5], [7, 2], [9, 4]]);
        assert_eq!(gte.sz[1], 128);
        assert_eq!(gte.sz[2], 64);
        assert_eq!(gte.sz[3], 32);
    }
}

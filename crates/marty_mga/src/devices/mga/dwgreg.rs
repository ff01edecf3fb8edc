/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    devices::mga::dwgreg.rs

    The drawing register file.
    
    Every drawing register has a 32-bit latch holding the last value written
    to it. Writes also update the decoded fields the raster handlers work
    from. A byte write merges into the latch and is then applied like a long
    write of the merged value.
*/

use serde_derive::{Deserialize, Serialize};

use crate::devices::mga::regs::*;

pub const REGISTER_FILE_LEN: usize = 128;

/// Side effect of a drawing register write that the engine or DMA state must act on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterEffect {
    None,
    /// A source register write while an image load is running.
    FeedWord(u32),
    /// Replace the masked bits of the secondary DMA address and restart its header phase.
    SecAddress { value: u32, mask: u32 },
    SecEnd(u32),
    Softrap(u32),
}

/// Index of a drawing register in the latch file. `reg` must not carry the start-blit alias.
#[inline]
pub fn register_index(reg: u16) -> usize {
    let block = if reg & DRAWING_BLOCK_MASK == DRAWING_BLOCK_1 { 64 } else { 0 };
    block + ((reg & 0xff) >> 2) as usize
}

#[inline]
fn sext16(val: u32) -> i32 {
    val as u16 as i16 as i32
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrawingRegisters {
    pub latch: Vec<u32>,

    pub dwgctl: u32,
    pub maccess: u32,
    pub mctlwtst: u32,
    pub zorg: u32,
    pub z_base: u32,
    pub plnwt: u32,
    pub bcol: u32,
    pub fcol: u32,
    pub src: [u32; 4],
    pub pattern: [[bool; 8]; 8],

    pub funcnt: u32,
    pub stylelen: u32,
    pub xoff: u32,
    pub yoff: u32,

    pub length: u16,
    pub beta: u32,
    pub ar: [i32; 7],

    pub cxleft: u16,
    pub cxright: u16,
    pub fxleft: i16,
    pub fxright: i16,
    pub xdst: i16,

    pub ydst: i32,
    pub ydst_lin: i32,
    pub ydstorg: u32,
    pub pitch: u32,
    pub selline: u32,
    pub ytop: u32,
    pub ybot: u32,

    pub dr: [i32; 16],
    pub tmr: [i32; 9],
    pub texorg: u32,
    pub texwidth: u32,
    pub texheight: u32,
    pub texctl: u32,
    pub textrans: u32,

    // Kept last so the register file serializes to TOML with plain values ahead of tables.
    pub sgn: Sgn,
}

impl Default for DrawingRegisters {
    fn default() -> Self {
        Self {
            latch: vec![0; REGISTER_FILE_LEN],
            dwgctl: 0,
            maccess: 0,
            mctlwtst: 0,
            zorg: 0,
            z_base: 0,
            plnwt: 0,
            bcol: 0,
            fcol: 0,
            src: [0; 4],
            pattern: [[false; 8]; 8],
            funcnt: 0,
            stylelen: 0,
            xoff: 0,
            yoff: 0,
            length: 0,
            beta: 16,
            ar: [0; 7],
            cxleft: 0,
            cxright: 0,
            fxleft: 0,
            fxright: 0,
            xdst: 0,
            ydst: 0,
            ydst_lin: 0,
            ydstorg: 0,
            pitch: 0,
            selline: 0,
            ytop: 0,
            ybot: 0,
            dr: [0; 16],
            tmr: [0; 9],
            texorg: 0,
            texwidth: 0,
            texheight: 0,
            texctl: 0,
            textrans: 0,
            sgn: Sgn::default(),
        }
    }
}

impl DrawingRegisters {
    pub fn latched(&self, reg: u16) -> u32 {
        self.latch[register_index(reg)]
    }

    /// Long write to drawing register `reg`. `iload_busy` is true while an ILOAD
    /// is waiting for source words.
    pub fn write_long(&mut self, reg: u16, val: u32, iload_busy: bool) -> RegisterEffect {
        self.latch[register_index(reg)] = val;
        self.apply(reg, val, iload_busy)
    }

    /// Byte write to `reg` + `byte`. Writes that feed an image load or move the DMA
    /// engine only act on long writes, except SECADDRESS which accepts byte lanes.
    pub fn write_byte(&mut self, reg: u16, byte: u16, val: u8) -> RegisterEffect {
        let shift = (byte & 3) * 8;
        let idx = register_index(reg);
        let merged = (self.latch[idx] & !(0xff << shift)) | ((val as u32) << shift);
        self.latch[idx] = merged;

        match self.apply(reg, merged, false) {
            RegisterEffect::SecAddress { value, .. } => RegisterEffect::SecAddress {
                value,
                mask: 0xff << shift,
            },
            RegisterEffect::FeedWord(_) | RegisterEffect::SecEnd(_) | RegisterEffect::Softrap(_) => {
                RegisterEffect::None
            }
            RegisterEffect::None => RegisterEffect::None,
        }
    }

    fn apply(&mut self, reg: u16, val: u32, iload_busy: bool) -> RegisterEffect {
        match reg {
            REG_DWGCTL => self.set_dwgctl(val),
            REG_MACCESS => self.maccess = val,
            REG_MCTLWTST => self.mctlwtst = val,
            REG_ZORG => {
                self.zorg = val;
                self.update_z_base();
            }
            REG_PAT0 | REG_PAT1 => {
                let base_row = if reg == REG_PAT1 { 4 } else { 0 };
                for (i, byte) in val.to_le_bytes().iter().enumerate() {
                    for x in 0..8 {
                        self.pattern[base_row + i][x] = byte & (1 << (7 - x)) != 0;
                    }
                }
            }
            REG_PLNWT => self.plnwt = val,
            REG_BCOL => self.bcol = val,
            REG_FCOL => self.fcol = val,
            REG_SRC0..=REG_SRC3 => {
                self.src[((reg - REG_SRC0) >> 2) as usize] = val;
                if iload_busy {
                    return RegisterEffect::FeedWord(val);
                }
            }
            REG_DMAPAD => {
                if iload_busy {
                    return RegisterEffect::FeedWord(val);
                }
            }
            REG_XYSTRT => {
                self.ar[5] = sext16(val);
                self.xdst = val as u16 as i16;
                self.ar[6] = sext16(val >> 16);
                self.ydst = (self.ydst & !0xffff) | ((val >> 16) & 0xffff) as i32;
                self.ydst_lin = (self.ydst as i16 as i32)
                    .wrapping_mul((self.pitch & PITCH_MASK) as i32)
                    .wrapping_add(self.ydstorg as i32);
            }
            REG_XYEND => {
                self.ar[0] = sext16(val);
                self.ar[2] = sext16(val >> 16);
            }
            REG_SHIFT => {
                self.funcnt = val & 0xff;
                self.xoff = val & 7;
                self.yoff = (val >> 4) & 7;
                self.stylelen = (val >> 16) & 0xff;
            }
            REG_SGN => self.sgn = Sgn::from(val as u8),
            REG_LEN => {
                self.length = val as u16;
                self.beta = match val >> 28 {
                    0 => 16,
                    beta => beta,
                };
            }
            REG_AR0..=REG_AR6 => self.ar[((reg - REG_AR0) >> 2) as usize] = val as i32,
            REG_CXBNDRY => {
                self.cxleft = val as u16;
                self.cxright = (val >> 16) as u16;
            }
            REG_FXBNDRY => {
                self.fxleft = val as u16 as i16;
                self.fxright = (val >> 16) as u16 as i16;
            }
            REG_YDSTLEN => {
                self.length = val as u16;
                self.ydst = sext16(val >> 16);
                if self.pitch & PITCH_YLIN == 0 {
                    self.selline = (val >> 16) & 7;
                }
                self.update_ydst_lin();
            }
            REG_PITCH => {
                self.pitch = val & 0xffff;
                self.update_ydst_lin();
            }
            REG_YDST => {
                self.ydst = (val & 0x3f_ffff) as i32;
                self.selline = if self.pitch & PITCH_YLIN != 0 { val >> 29 } else { val & 7 };
                self.update_ydst_lin();
            }
            REG_YDSTORG => {
                self.ydstorg = val;
                self.update_z_base();
            }
            REG_YTOP => self.ytop = val,
            REG_YBOT => self.ybot = val,
            REG_CXLEFT => self.cxleft = val as u16,
            REG_CXRIGHT => self.cxright = val as u16,
            REG_FXLEFT => self.fxleft = val as u16 as i16,
            REG_FXRIGHT => self.fxright = val as u16 as i16,
            REG_XDST => self.xdst = val as u16 as i16,
            REG_DR0..=REG_DR15 => {
                let n = ((reg - REG_DR0) >> 2) as usize;
                // DR1, DR5, DR9 and DR13 do not exist.
                if n & 3 != 1 {
                    self.dr[n] = val as i32;
                }
            }
            REG_TMR0..=REG_TMR8 => self.tmr[((reg - REG_TMR0) >> 2) as usize] = val as i32,
            REG_TEXORG => self.texorg = val,
            REG_TEXWIDTH => self.texwidth = val,
            REG_TEXHEIGHT => self.texheight = val,
            REG_TEXCTL => self.texctl = val,
            REG_TEXTRANS => self.textrans = val,
            REG_SECADDRESS => {
                return RegisterEffect::SecAddress {
                    value: val,
                    mask: 0xffff_ffff,
                }
            }
            REG_SECEND => return RegisterEffect::SecEnd(val),
            REG_SOFTRAP => return RegisterEffect::Softrap(val),
            _ => {
                log::trace!("Write to unimplemented drawing register {:04X}: {:08X}", reg, val);
            }
        }
        RegisterEffect::None
    }

    fn set_dwgctl(&mut self, val: u32) {
        self.dwgctl = val;
        let ctl = DwgCtl::from(val);

        if ctl.solid() {
            self.pattern = [[true; 8]; 8];
            self.src = [0xffff_ffff; 4];
        }
        if ctl.arzero() {
            for n in [0, 1, 2, 4, 5, 6] {
                self.ar[n] = 0;
            }
        }
        if ctl.sgnzero() {
            self.sgn = Sgn::default();
        }
        if ctl.shftzero() {
            self.funcnt = 0;
            self.stylelen = 0;
            self.xoff = 0;
            self.yoff = 0;
        }
    }

    #[inline]
    fn update_z_base(&mut self) {
        self.z_base = self.ydstorg.wrapping_mul(2).wrapping_add(self.zorg);
    }

    /// Recompute the linear address of the destination row.
    pub fn update_ydst_lin(&mut self) {
        self.ydst_lin = if self.pitch & PITCH_YLIN != 0 {
            (self.ydst << 5).wrapping_add(self.ydstorg as i32)
        }
        else {
            (self.ydst as i16 as i32)
                .wrapping_mul((self.pitch & PITCH_MASK) as i32)
                .wrapping_add(self.ydstorg as i32)
        };
    }

    /// Pitch in pixels as used when stepping the destination row.
    #[inline]
    pub fn row_pitch(&self) -> i32 {
        (self.pitch & PITCH_MASK) as i32
    }

    /// Advance the destination to the next row downward, as the trapezoid walkers do.
    pub fn next_row(&mut self) {
        self.ydst = self.ydst.wrapping_add(1) & 0x7f_ffff;
        self.ydst_lin = self.ydst_lin.wrapping_add(self.row_pitch());
        self.selline = (self.selline + 1) & 7;
    }

    /// Pattern bit for column `x` on the current pattern row.
    #[inline]
    pub fn pattern_bit(&self, x: i32) -> bool {
        let yoff = ((self.yoff as i32 + self.ydst) & 7) as usize;
        let xoff = ((self.xoff as i32 + x) & 7) as usize;
        self.pattern[yoff][xoff]
    }

    /// Does the current row lie within the vertical clip window? YTOP and YBOT hold
    /// linear pixel addresses and are compared against the row address unsigned.
    #[inline]
    pub fn y_in_clip(&self) -> bool {
        let lin = self.ydst_lin as u32;
        lin >= self.ytop && lin <= self.ybot
    }

    #[inline]
    pub fn x_in_clip(&self, x: i32) -> bool {
        x >= self.cxleft as i32 && x <= self.cxright as i32
    }

    #[inline]
    pub fn in_clip(&self, x: i32) -> bool {
        self.x_in_clip(x) && self.y_in_clip()
    }
}

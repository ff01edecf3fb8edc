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

    devices::mga::blit::mod.rs

    Blit dispatch and the pixel helpers shared by the raster handlers.
    
    Writing DWGCTL through its start-blit alias latches DWGCTL and MACCESS
    and looks the opcode up in OPCODE_TABLE. Immediate handlers run to
    completion. Load and dump handlers mark the engine busy and then make
    progress one source word, or one dump read, at a time.
*/

pub mod bitblt;
pub mod idump;
pub mod iload;
pub mod line;
pub mod trap;

use crate::devices::mga::{
    engine::DrawingEngine,
    error::MgaError,
    regs::*,
    texture::Rgb,
};

pub type StartFn = fn(&mut DrawingEngine) -> Result<(), MgaError>;
pub type FeedFn = fn(&mut DrawingEngine, u32) -> Result<(), MgaError>;
pub type DumpFn = fn(&mut DrawingEngine) -> Result<u32, MgaError>;

#[derive(Copy, Clone)]
pub enum Handler {
    /// Runs to completion when started.
    Immediate(StartFn),
    /// Consumes source words until the row count runs out.
    Load { start: StartFn, feed: FeedFn },
    /// Produces one word per read of the pixel-feed aperture.
    Dump { start: StartFn, read: DumpFn },
}

#[derive(Copy, Clone)]
pub struct OpcodeEntry {
    pub name: &'static str,
    pub handler: Handler,
}

const fn immediate(name: &'static str, start: StartFn) -> Option<OpcodeEntry> {
    Some(OpcodeEntry {
        name,
        handler: Handler::Immediate(start),
    })
}

const fn load(name: &'static str, start: StartFn, feed: FeedFn) -> Option<OpcodeEntry> {
    Some(OpcodeEntry {
        name,
        handler: Handler::Load { start, feed },
    })
}

/// Handlers indexed by DWGCTL.OPCODE. Empty slots are reserved opcodes.
pub static OPCODE_TABLE: [Option<OpcodeEntry>; 16] = [
    immediate("LINE_OPEN", line::line),
    immediate("AUTOLINE_OPEN", line::autoline),
    immediate("LINE_CLOSE", line::line),
    immediate("AUTOLINE_CLOSE", line::autoline),
    immediate("TRAP", trap::trap),
    None,
    immediate("TEXTURE_TRAP", trap::texture_trap),
    load("ILOAD_HIGH", iload::start_high, iload::feed_high),
    immediate("BITBLT", bitblt::bitblt),
    load("ILOAD", iload::start, iload::feed),
    Some(OpcodeEntry {
        name: "IDUMP",
        handler: Handler::Dump {
            start: idump::start,
            read: idump::read,
        },
    }),
    None,
    immediate("FBITBLT", bitblt::fbitblt),
    load("ILOAD_SCALE", iload::start_scale, iload::feed_scale),
    load("ILOAD_HIGHV", iload::start_highv, iload::feed_highv),
    immediate("ILOAD_FILTER", iload::filter),
];

#[inline]
pub fn lookup(dwgctl: u32) -> Option<&'static OpcodeEntry> {
    OPCODE_TABLE[(dwgctl & DWGCTL_OPCODE_MASK) as usize].as_ref()
}

/// Latch the drawing control state and run the selected operation.
pub fn start_blit(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    engine.cursor.dwgctl_running = engine.regs.dwgctl;
    engine.cursor.maccess_running = engine.regs.maccess;

    let dwgctl = engine.regs.dwgctl;
    let entry = lookup(dwgctl).ok_or(MgaError::UnknownOpcode {
        opcode: (dwgctl & DWGCTL_OPCODE_MASK) as u8,
        dwgctl,
    })?;

    engine.stats.blits += 1;
    engine.trace_blit(entry.name);

    match entry.handler {
        Handler::Immediate(run) => {
            run(engine)?;
            engine.signals.count_complete();
        }
        Handler::Load { start, .. } | Handler::Dump { start, .. } => start(engine)?,
    }
    Ok(())
}

/// Hand one source word to the running image load.
pub fn feed(engine: &mut DrawingEngine, word: u32) -> Result<(), MgaError> {
    if !engine.busy {
        return Ok(());
    }
    engine.cursor.words += 1;
    engine.stats.words_fed += 1;
    match lookup(engine.cursor.dwgctl_running) {
        Some(OpcodeEntry {
            handler: Handler::Load { feed, .. },
            ..
        }) => feed(engine, word),
        entry => Err(MgaError::UnexpectedFeed(entry.map(|e| e.name).unwrap_or("reserved opcode"))),
    }
}

/// Produce the next word of a running image dump.
pub fn dump(engine: &mut DrawingEngine) -> Result<u32, MgaError> {
    match lookup(engine.cursor.dwgctl_running) {
        Some(OpcodeEntry {
            handler: Handler::Dump { read, .. },
            ..
        }) => read(engine),
        _ => Ok(0xffff_ffff),
    }
}

/// Does the running operation accept SRC and DMAPAD writes as source data?
pub fn accepts_register_feed(engine: &DrawingEngine) -> bool {
    engine.busy && Opcode::from_repr((engine.cursor.dwgctl_running & DWGCTL_OPCODE_MASK) as u8) == Some(Opcode::Iload)
}

/// Expand 8-bit components into a destination pixel.
#[inline]
pub fn pack_rgb(width: PixelWidth, r: i32, g: i32, b: i32, op: &'static str) -> Result<u32, MgaError> {
    let (r, g, b) = (r as u32 & 0xff, g as u32 & 0xff, b as u32 & 0xff);
    match width {
        PixelWidth::P16 => Ok(((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3)),
        PixelWidth::P24 | PixelWidth::P32 => Ok(b | (g << 8) | (r << 16)),
        PixelWidth::P8 => Err(MgaError::UnsupportedPixelWidth(8, op)),
    }
}

/// Convert a packed YUY2 pair (Y0 U Y1 V, low byte first) into two RGB pixels.
pub fn yuv_pair(data: u32) -> ([i32; 3], [i32; 3]) {
    let y0 = (298 * ((data & 0xff) as i32 - 16)) >> 8;
    let u = ((data >> 8) & 0xff) as i32 - 0x80;
    let y1 = (298 * (((data >> 16) & 0xff) as i32 - 16)) >> 8;
    let v = ((data >> 24) & 0xff) as i32 - 0x80;

    let dr = (309 * v) >> 8;
    let dg = (100 * u + 208 * v) >> 8;
    let db = (516 * u) >> 8;

    let clamp = |c: i32| c.clamp(0, 0xff);
    (
        [clamp(y0 + dr), clamp(y0 - dg), clamp(y0 + db)],
        [clamp(y1 + dr), clamp(y1 - dg), clamp(y1 + db)],
    )
}

impl DrawingEngine {
    #[inline]
    pub(crate) fn ctl(&self) -> DwgCtl {
        DwgCtl::from(self.cursor.dwgctl_running)
    }

    #[inline]
    pub(crate) fn atype(&self) -> Option<Atype> {
        Atype::from_repr(self.ctl().atype())
    }

    #[inline]
    pub(crate) fn bltmod(&self) -> Option<Bltmod> {
        Bltmod::from_repr(self.ctl().bltmod())
    }

    #[inline]
    pub(crate) fn pwidth(&self) -> PixelWidth {
        PixelWidth::from_maccess(self.cursor.maccess_running)
    }

    #[inline]
    pub(crate) fn transc(&self) -> bool {
        self.cursor.dwgctl_running & DWGCTL_TRANSC != 0
    }

    #[inline]
    fn pixel_index(&self, x: i32) -> u32 {
        self.regs.ydst_lin.wrapping_add(x) as u32
    }

    /// Does column `x` of the current row pass the clip window and transparency mask?
    #[inline]
    pub(crate) fn visible(&self, x: i32) -> bool {
        self.regs.in_clip(x) && trans_pass(self.cursor.dwgctl_running, self.regs.selline, x)
    }

    #[inline]
    pub(crate) fn read_dst(&self, x: i32) -> u32 {
        self.vram.read_pixel(self.pixel_index(x), self.pwidth())
    }

    #[inline]
    pub(crate) fn read_src(&self, index: i32) -> u32 {
        self.vram.read_pixel(index as u32, self.pwidth())
    }

    /// Store `val` at column `x` of the current row.
    #[inline]
    pub(crate) fn put(&mut self, x: i32, val: u32) {
        let index = self.pixel_index(x);
        let width = self.pwidth();
        self.vram.write_pixel(index, width, val);
        self.stats.pixels += 1;
    }

    /// Combine `src` with the destination pixel using the running BOP and store it.
    #[inline]
    pub(crate) fn put_rop(&mut self, x: i32, src: u32) {
        let dst = self.read_dst(x);
        self.put(x, bitop(src, dst, self.cursor.dwgctl_running));
    }

    #[inline]
    pub(crate) fn source_bit(&self, bit_addr: i32) -> bool {
        let byte = self.vram.read_u8((bit_addr as u32) >> 3);
        byte & (1 << (bit_addr & 7)) != 0
    }

    #[inline]
    fn z_addr(&self, x: i32) -> u32 {
        (self.regs.ydst_lin.wrapping_add(x) as u32)
            .wrapping_mul(2)
            .wrapping_add(self.regs.zorg)
    }

    #[inline]
    pub(crate) fn read_z(&self, x: i32) -> u16 {
        self.vram.read_u16(self.z_addr(x))
    }

    #[inline]
    pub(crate) fn write_z(&mut self, x: i32, z: u16) {
        let addr = self.z_addr(x);
        self.vram.write_u16(addr, z);
    }

    /// Depth of the current pixel from the DR0 interpolator.
    #[inline]
    pub(crate) fn z_value(&self) -> u16 {
        match self.regs.dr[0] {
            dr0 if dr0 < 0 => 0,
            dr0 => (dr0 >> 15) as u16,
        }
    }

    #[inline]
    pub(crate) fn z_passes(&self, x: i32) -> (bool, u16) {
        let z = self.z_value();
        let zmode = Zmode::from_field(self.ctl().zmode());
        (zmode.passes(z, self.read_z(x)), z)
    }

    /// Current Gouraud colour from the DR4, DR8 and DR12 interpolators.
    #[inline]
    pub(crate) fn shade(&self) -> (i32, i32, i32) {
        let component = |dr: i32| {
            if dr & (1 << 23) != 0 {
                0
            }
            else {
                (dr >> 15) & 0xff
            }
        };
        (
            component(self.regs.dr[4]),
            component(self.regs.dr[8]),
            component(self.regs.dr[12]),
        )
    }

    /// Step the colour and depth interpolators by one pixel along a span.
    #[inline]
    pub(crate) fn step_dr_x(&mut self) {
        let dr = &mut self.regs.dr;
        dr[0] = dr[0].wrapping_add(dr[2]);
        dr[4] = dr[4].wrapping_add(dr[6]);
        dr[8] = dr[8].wrapping_add(dr[10]);
        dr[12] = dr[12].wrapping_add(dr[14]);
    }

    /// Step the colour and depth interpolators along the minor axis.
    #[inline]
    pub(crate) fn step_dr_y(&mut self) {
        let dr = &mut self.regs.dr;
        dr[0] = dr[0].wrapping_add(dr[3]);
        dr[4] = dr[4].wrapping_add(dr[7]);
        dr[8] = dr[8].wrapping_add(dr[11]);
        dr[12] = dr[12].wrapping_add(dr[15]);
    }

    /// Move the destination one row up or down according to SGN.SDY.
    #[inline]
    pub(crate) fn step_row_sdy(&mut self) {
        let pitch = self.regs.row_pitch();
        self.regs.ydst_lin = match self.regs.sgn.sdy {
            true => self.regs.ydst_lin.wrapping_sub(pitch),
            false => self.regs.ydst_lin.wrapping_add(pitch),
        };
    }

    /// Step both trapezoid edges with the Bresenham terms in AR0..AR6.
    ///
    /// With `always_add` the error term gets its increment after any edge
    /// movement, as the shaded walkers do. Otherwise the increment only
    /// applies to an edge that did not move.
    pub(crate) fn step_edges(&mut self, always_add: bool) {
        let ar = &mut self.regs.ar;
        let sgn = self.regs.sgn;

        let left_moves = ar[1] < 0;
        while ar[1] < 0 && ar[0] != 0 {
            ar[1] = ar[1].wrapping_add(ar[0]);
            self.regs.fxleft = self.regs.fxleft.wrapping_add(if sgn.sdxl { -1 } else { 1 });
        }
        if always_add || !left_moves {
            ar[1] = ar[1].wrapping_add(ar[2]);
        }

        let right_moves = ar[4] < 0;
        while ar[4] < 0 && ar[6] != 0 {
            ar[4] = ar[4].wrapping_add(ar[6]);
            self.regs.fxright = self.regs.fxright.wrapping_add(if sgn.sdxr { -1 } else { 1 });
        }
        if always_add || !right_moves {
            ar[4] = ar[4].wrapping_add(ar[5]);
        }
    }

    /// Advance the bitblt source address by one pixel, wrapping to the next
    /// source row at AR0. Returns true when the row wrapped.
    #[inline]
    pub(crate) fn advance_source(&mut self, x_dir: i32) -> bool {
        let ar = &mut self.regs.ar;
        if self.cursor.src_addr == ar[0] {
            ar[0] = ar[0].wrapping_add(ar[5]);
            ar[3] = ar[3].wrapping_add(ar[5]);
            self.cursor.src_addr = ar[3];
            true
        }
        else {
            self.cursor.src_addr = self.cursor.src_addr.wrapping_add(x_dir);
            false
        }
    }

    /// Enter the busy state for a streamed operation.
    pub(crate) fn begin_stream(&mut self) {
        self.cursor.length_cur = self.regs.length as i32;
        self.regs.xdst = self.regs.fxleft;
        self.cursor.rem_data = 0;
        self.cursor.rem_count = 0;
        self.cursor.words = 0;
        self.set_busy(true);
    }

    /// Count down one row of a streamed operation. Returns true if it finished.
    pub(crate) fn end_stream_row(&mut self) -> bool {
        self.cursor.length_cur -= 1;
        if self.cursor.length_cur <= 0 {
            self.finish_stream();
            return true;
        }
        false
    }

    pub(crate) fn finish_stream(&mut self) {
        self.set_busy(false);
        self.signals.count_complete();
    }

    pub(crate) fn load_lut_entry(&mut self, index: u32, pix: u16) {
        self.lut[(index & 0xff) as usize] = Rgb::from_565(pix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mga::testutil::{engine_with_recorder, program};

    #[test]
    fn table_covers_defined_opcodes() {
        use strum::IntoEnumIterator;
        for opcode in Opcode::iter() {
            assert!(lookup(opcode as u32).is_some(), "{} has no handler", opcode);
        }
        assert!(lookup(0x5).is_none());
        assert!(lookup(0xb).is_none());
    }

    #[test]
    fn reserved_opcode_is_an_error() {
        let (mut engine, _log) = engine_with_recorder();
        program(&mut engine, &[(REG_DWGCTL, 0x5)]);
        assert_eq!(
            start_blit(&mut engine),
            Err(MgaError::UnknownOpcode {
                opcode: 0x5,
                dwgctl: 0x5
            })
        );
    }

    #[test]
    fn yuv_conversion_clamps() {
        // Y=235 U=V=128 is white, Y=16 is black.
        let (p0, p1) = yuv_pair(0x80_10_80_eb);
        assert_eq!(p0, [0xfe, 0xfe, 0xfe]);
        assert_eq!(p1, [0, 0, 0]);
        let (p0, _) = yuv_pair(0xff_eb_00_eb);
        assert_eq!(p0[0], 0xff);
    }

    #[test]
    fn pack_rgb_widths() {
        assert_eq!(pack_rgb(PixelWidth::P16, 0xff, 0, 0xff, "test"), Ok(0xf81f));
        assert_eq!(pack_rgb(PixelWidth::P32, 1, 2, 3, "test"), Ok(0x010203));
        assert!(pack_rgb(PixelWidth::P8, 1, 2, 3, "test").is_err());
    }

    #[test]
    fn edges_step_by_bresenham_terms() {
        let (mut engine, _log) = engine_with_recorder();
        engine.regs.ar = [1, -2, 5, 0, 3, 7, 0];
        engine.regs.fxleft = 10;
        engine.regs.fxright = 20;
        engine.step_edges(false);
        assert_eq!(engine.regs.fxleft, 12);
        assert_eq!(engine.regs.ar[1], 0);
        assert_eq!(engine.regs.ar[4], 10);
        assert_eq!(engine.regs.fxright, 20);
    }
}

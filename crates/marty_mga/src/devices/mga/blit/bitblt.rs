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

    devices::mga::blit::bitblt.rs

    Screen-to-screen copies: BITBLT, FBITBLT and the palette load variant of BITBLT.
*/

use crate::devices::mga::{engine::DrawingEngine, error::MgaError, regs::*};

/// Horizontal scan order for a blit. Rows run from `start` to `end` inclusive.
#[derive(Copy, Clone, Debug)]
struct Scan {
    dir: i32,
    start: i16,
    end: i16,
}

impl Scan {
    fn new(engine: &DrawingEngine) -> Self {
        let regs = &engine.regs;
        match regs.sgn.scanleft() {
            true => Scan {
                dir: -1,
                start: regs.fxright,
                end: regs.fxleft,
            },
            false => Scan {
                dir: 1,
                start: regs.fxleft,
                end: regs.fxright,
            },
        }
    }

    #[inline]
    fn next(&self, x: i16) -> Option<i16> {
        match x == self.end {
            true => None,
            false => Some(x.wrapping_add(self.dir as i16)),
        }
    }
}

pub fn bitblt(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    let bltmod = engine.bltmod();
    match engine.atype() {
        Some(Atype::Blk) => match bltmod {
            Some(Bltmod::BMonoLef) => {
                expand_mono(engine, false);
                Ok(())
            }
            _ => Err(MgaError::UnknownBlitMode {
                op: "BITBLT BLK",
                bltmod: engine.ctl().bltmod(),
            }),
        },
        Some(Atype::Rpl) if engine.cursor.maccess_running & MACCESS_TLUTLOAD != 0 => {
            load_lut(engine);
            Ok(())
        }
        Some(Atype::Rpl) | Some(Atype::Rstr) => match bltmod {
            Some(Bltmod::BMonoLef) if engine.cursor.dwgctl_running & DWGCTL_PATTERN == 0 => {
                expand_mono(engine, true);
                Ok(())
            }
            Some(Bltmod::BFCol) | Some(Bltmod::BU32Rgb) => {
                copy(engine);
                Ok(())
            }
            _ => Err(MgaError::UnknownBlitMode {
                op: "BITBLT RPL/RSTR",
                bltmod: engine.ctl().bltmod(),
            }),
        },
        atype => {
            log::trace!("BITBLT: ignoring access type {:?}", atype);
            Ok(())
        }
    }
}

/// Expand a 1bpp source bitmap into FCOL and BCOL. With TRANSC, clear bits are skipped.
fn expand_mono(engine: &mut DrawingEngine, rop: bool) {
    let scan = Scan::new(engine);
    let transc = engine.transc();
    engine.cursor.src_addr = engine.regs.ar[3];

    for _ in 0..engine.regs.length {
        let mut x = scan.start;
        loop {
            let xi = x as i32;
            let bit = engine.source_bit(engine.cursor.src_addr);
            let color = if bit { engine.regs.fcol } else { engine.regs.bcol };

            if bit || !transc {
                if rop {
                    if engine.visible(xi) {
                        engine.put_rop(xi, color);
                    }
                }
                else if engine.regs.in_clip(xi) {
                    engine.put(xi, color);
                }
            }

            engine.advance_source(scan.dir);
            match scan.next(x) {
                Some(next) => x = next,
                None => break,
            }
        }
        engine.step_row_sdy();
    }
}

/// Colour copy with the running raster op. In pattern mode the source is an
/// 8x8 tile: the column wraps within 8 pixels and rows step by 32.
fn copy(engine: &mut DrawingEngine) {
    let scan = Scan::new(engine);
    let pattern = engine.cursor.dwgctl_running & DWGCTL_PATTERN != 0;
    engine.cursor.src_addr = engine.regs.ar[3];

    for _ in 0..engine.regs.length {
        let row_src = engine.cursor.src_addr;
        let mut x = scan.start;
        loop {
            let xi = x as i32;
            if engine.visible(xi) {
                let src = engine.read_src(engine.cursor.src_addr);
                engine.put_rop(xi, src);
            }

            if pattern {
                let src = engine.cursor.src_addr;
                engine.cursor.src_addr = (src.wrapping_add(scan.dir) & 7) | (src & !7);
            }
            else {
                engine.advance_source(scan.dir);
            }
            match scan.next(x) {
                Some(next) => x = next,
                None => break,
            }
        }

        if pattern {
            let row_step = if engine.regs.sgn.sdy { -32 } else { 32 };
            engine.cursor.src_addr = (row_src.wrapping_add(row_step) & 0xe0) | (row_src & !0xe0);
        }
        engine.step_row_sdy();
    }
}

/// Load LENGTH palette entries from 565 pixels at AR3, starting at entry YDST.
fn load_lut(engine: &mut DrawingEngine) {
    let mut src = engine.regs.ar[3] as u32;
    let mut index = engine.regs.ydst as u32;

    while engine.regs.length > 0 {
        let pix = engine.vram.read_u16(src.wrapping_mul(2));
        engine.load_lut_entry(index, pix);
        src = src.wrapping_add(1);
        index = index.wrapping_add(1);
        engine.regs.length -= 1;
    }
}

/// Straight copy with no raster op or transparency. Reaching the end of a
/// source row also ends the destination row.
pub fn fbitblt(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    let scan = Scan::new(engine);
    engine.cursor.src_addr = engine.regs.ar[3];

    for _ in 0..engine.regs.length {
        let mut x = scan.start;
        loop {
            let xi = x as i32;
            if engine.regs.in_clip(xi) {
                let src = engine.read_src(engine.cursor.src_addr);
                engine.put(xi, src);
            }

            if engine.advance_source(scan.dir) {
                break;
            }
            match scan.next(x) {
                Some(next) => x = next,
                None => break,
            }
        }
        engine.step_row_sdy();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::mga::{
        blit::start_blit,
        texture::Rgb,
        testutil::{engine_with_recorder, program, WriteLog},
    };

    const BOP_SRC: u32 = 0xc << 16;

    /// Source 4x2 block at row 10, destination at row 2, 16bpp, pitch 64.
    fn setup(dwgctl: u32) -> (DrawingEngine, WriteLog) {
        let (mut engine, log) = engine_with_recorder();
        program(
            &mut engine,
            &[
                (REG_MACCESS, 1),
                (REG_PITCH, 64),
                (REG_CXBNDRY, 63 << 16),
                (REG_YTOP, 0),
                (REG_YBOT, 64 * 64),
                (REG_FCOL, 0xffff),
                (REG_BCOL, 0x1111),
                (REG_DWGCTL, dwgctl),
                (REG_AR3, 640),
                (REG_AR0, 643),
                (REG_AR5, 64),
                (REG_FXBNDRY, 3 << 16),
                (REG_YDSTLEN, (2 << 16) | 2),
            ],
        );
        for i in 0..4u32 {
            engine.vram_mut().write_u16((640 + i) * 2, 0x100 + i as u16);
            engine.vram_mut().write_u16((704 + i) * 2, 0x200 + i as u16);
        }
        (engine, log)
    }

    #[test]
    fn copies_rows_left_to_right() {
        let (mut engine, log) = setup(Opcode::Bitblt as u32 | BOP_SRC | (Bltmod::BFCol as u32) << 25);
        start_blit(&mut engine).unwrap();
        let writes = log.lock().unwrap().clone();
        assert_eq!(
            writes,
            vec![
                (128, 0x100),
                (129, 0x101),
                (130, 0x102),
                (131, 0x103),
                (192, 0x200),
                (193, 0x201),
                (194, 0x202),
                (195, 0x203)
            ]
        );
        assert_eq!(engine.regs.ar[3], 768);
        assert_eq!(engine.signals.counters().complete, 1);
    }

    #[test]
    fn fbitblt_ends_row_at_source_end() {
        let (mut engine, log) = setup(Opcode::Fbitblt as u32);
        // Destination is wider than the source row.
        engine.write_register(REG_FXBNDRY, 7 << 16).unwrap();
        start_blit(&mut engine).unwrap();
        let writes = log.lock().unwrap().clone();
        assert_eq!(writes.len(), 8);
        assert_eq!(writes[4], (192, 0x200));
    }

    #[test]
    fn mono_expansion_with_transparent_background() {
        let (mut engine, log) =
            setup(Opcode::Bitblt as u32 | (Atype::Blk as u32) << 4 | DWGCTL_TRANSC | (Bltmod::BMonoLef as u32) << 25);
        // Bits 0 and 2 of the first source byte.
        program(&mut engine, &[(REG_AR3, 0), (REG_AR0, 3), (REG_AR5, 8), (REG_YDSTLEN, (2 << 16) | 1)]);
        engine.vram_mut().write_u8(0, 0b0000_0101);
        start_blit(&mut engine).unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec![(128, 0xffff), (130, 0xffff)]);
    }

    #[test]
    fn mono_expansion_opaque() {
        let (mut engine, log) =
            setup(Opcode::Bitblt as u32 | BOP_SRC | (Bltmod::BMonoLef as u32) << 25);
        program(&mut engine, &[(REG_AR3, 0), (REG_AR0, 3), (REG_AR5, 8), (REG_YDSTLEN, (2 << 16) | 1)]);
        engine.vram_mut().write_u8(0, 0b0000_0101);
        start_blit(&mut engine).unwrap();
        let colors: Vec<u32> = log.lock().unwrap().iter().map(|w| w.1).collect();
        assert_eq!(colors, vec![0xffff, 0x1111, 0xffff, 0x1111]);
    }

    #[test]
    fn block_mode_needs_mono_source() {
        let (mut engine, _log) = setup(Opcode::Bitblt as u32 | (Atype::Blk as u32) << 4 | (Bltmod::BFCol as u32) << 25);
        assert!(matches!(
            start_blit(&mut engine),
            Err(MgaError::UnknownBlitMode { op: "BITBLT BLK", .. })
        ));
    }

    #[test]
    fn palette_load() {
        let (mut engine, log) = setup(Opcode::Bitblt as u32);
        program(
            &mut engine,
            &[
                (REG_MACCESS, 1 | MACCESS_TLUTLOAD),
                (REG_AR3, 0x100),
                (REG_YDSTLEN, (0xfe << 16) | 3),
            ],
        );
        engine.vram_mut().write_u16(0x200, 0xf800);
        engine.vram_mut().write_u16(0x202, 0x07e0);
        engine.vram_mut().write_u16(0x204, 0x001f);
        start_blit(&mut engine).unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(engine.lut[0xfe], Rgb { r: 0xf8, g: 0, b: 0 });
        assert_eq!(engine.lut[0xff], Rgb { r: 0, g: 0xfc, b: 0 });
        assert_eq!(engine.lut[0x00], Rgb { r: 0, g: 0, b: 0xf8 });
        assert_eq!(engine.regs.length, 0);
    }
}

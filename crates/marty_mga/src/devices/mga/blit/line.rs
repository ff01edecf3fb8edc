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

    devices::mga::blit::line.rs

    Vector drawing: LINE and AUTOLINE.
*/

use crate::devices::mga::{
    blit::pack_rgb,
    engine::DrawingEngine,
    error::MgaError,
    regs::Atype,
};

/// Walk the Bresenham terms in AR0..AR2 for LENGTH pixels from (XDST, YDST).
pub fn line(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    match engine.atype() {
        Some(Atype::Rstr) | Some(Atype::Rpl) => solid(engine),
        Some(Atype::I) => shaded(engine, false),
        Some(Atype::Zi) => shaded(engine, true),
        _ => {
            log::trace!("LINE: ignoring access type {:?}", engine.atype());
            Ok(())
        }
    }
}

/// Derive the Bresenham terms from the endpoints in XYSTRT and XYEND, draw the
/// line, and leave the start point at the end for the next segment.
pub fn autoline(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    let regs = &mut engine.regs;
    let (start_x, start_y) = (regs.ar[5], regs.ar[6]);
    let (end_x, end_y) = (regs.ar[0], regs.ar[2]);
    let dx = end_x.wrapping_sub(start_x).wrapping_abs();
    let dy = end_y.wrapping_sub(start_y).wrapping_abs();
    let up = (start_y > end_y) as i32;

    let (major, minor) = if dx > dy { (dx, dy) } else { (dy, dx) };
    regs.sgn.sdydxl = dx > dy;
    regs.ar[0] = minor.wrapping_mul(2);
    regs.ar[1] = minor.wrapping_mul(2).wrapping_sub(major).wrapping_sub(up);
    regs.ar[2] = minor.wrapping_sub(major).wrapping_mul(2);
    regs.length = major as u16;
    regs.sgn.sdxl = start_x > end_x;
    regs.sgn.sdy = start_y > end_y;

    line(engine)?;

    let regs = &mut engine.regs;
    regs.ar[5] = end_x;
    regs.xdst = end_x as i16;
    regs.ar[6] = end_y;
    regs.ydst = end_y;
    regs.ydst_lin = (regs.ydst as i16 as i32)
        .wrapping_mul(regs.row_pitch())
        .wrapping_add(regs.ydstorg as i32);
    Ok(())
}

/// Take one step along the major axis, then one along the minor axis if the
/// error term says so. `on_minor` runs when the minor step is taken.
#[inline]
fn step(engine: &mut DrawingEngine, x: &mut i32, mut on_major: impl FnMut(&mut DrawingEngine), on_minor: impl FnOnce(&mut DrawingEngine)) {
    let sgn = engine.regs.sgn;
    let x_step = if sgn.sdxl { -1 } else { 1 };

    if sgn.sdydxl {
        *x += x_step;
    }
    else {
        engine.step_row_sdy();
    }
    on_major(engine);

    let ar = &mut engine.regs.ar;
    if ar[1] >= 0 {
        ar[1] = ar[1].wrapping_add(ar[2]);
        if sgn.sdydxl {
            engine.step_row_sdy();
        }
        else {
            *x += x_step;
        }
        on_minor(engine);
    }
    else {
        ar[1] = ar[1].wrapping_add(ar[0]);
    }
    engine.regs.length -= 1;
}

fn solid(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    let mut x = engine.regs.xdst as i32;
    while engine.regs.length > 0 {
        if engine.regs.in_clip(x) {
            engine.put_rop(x, engine.regs.fcol);
        }
        step(engine, &mut x, |_| (), |_| ());
    }
    Ok(())
}

fn shaded(engine: &mut DrawingEngine, z_write: bool) -> Result<(), MgaError> {
    let width = engine.pwidth();
    let mut x = engine.regs.xdst as i32;
    while engine.regs.length > 0 {
        if engine.regs.in_clip(x) {
            let (pass, z) = engine.z_passes(x);
            if pass {
                if z_write {
                    engine.write_z(x, z);
                }
                let (r, g, b) = engine.shade();
                let pix = pack_rgb(width, r, g, b, "LINE I/ZI")?;
                engine.put(x, pix);
            }
        }
        step(engine, &mut x, DrawingEngine::step_dr_x, DrawingEngine::step_dr_y);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::devices::mga::{
        blit::start_blit,
        engine::DrawingEngine,
        regs::*,
        testutil::{engine_with_recorder, program, WriteLog},
    };

    const RPL: u32 = 0x0000_0000;
    const BOP_SRC: u32 = 0xc << 16;

    fn setup() -> (DrawingEngine, WriteLog) {
        let (mut engine, log) = engine_with_recorder();
        program(
            &mut engine,
            &[
                (REG_MACCESS, 0),
                (REG_PITCH, 64),
                (REG_CXBNDRY, 63 << 16),
                (REG_YTOP, 0),
                (REG_YBOT, 64 * 64),
                (REG_FCOL, 0x55),
            ],
        );
        (engine, log)
    }

    #[test]
    fn autoline_draws_a_diagonal() {
        let (mut engine, log) = setup();
        program(
            &mut engine,
            &[
                (REG_DWGCTL, Opcode::AutolineOpen as u32 | RPL | BOP_SRC),
                (REG_XYSTRT, 0),
                (REG_XYEND, (4 << 16) | 4),
            ],
        );
        start_blit(&mut engine).unwrap();

        let indices: Vec<u32> = log.lock().unwrap().iter().map(|w| w.0).collect();
        assert_eq!(indices, vec![0, 65, 130, 195]);
        assert_eq!(engine.regs.xdst, 4);
        assert_eq!(engine.regs.ydst_lin, 4 * 64);
        assert_eq!(engine.signals.counters().complete, 1);
    }

    #[test]
    fn autoline_endpoints_at_register_extremes() {
        let (mut engine, _log) = setup();
        program(
            &mut engine,
            &[
                (REG_DWGCTL, Opcode::AutolineOpen as u32 | RPL | BOP_SRC),
                (REG_XYSTRT, 0x0000_ffff),
                (REG_AR0, 0x7fff_ffff),
            ],
        );
        start_blit(&mut engine).unwrap();

        assert_eq!(engine.regs.ar[5], 0x7fff_ffff);
        assert_eq!(engine.regs.xdst, -1);
        assert_eq!(engine.signals.counters().complete, 1);
    }

    #[test]
    fn x_major_line_steps_minor_axis_on_error() {
        let (mut engine, log) = setup();
        program(
            &mut engine,
            &[
                (REG_DWGCTL, Opcode::AutolineClose as u32 | RPL | BOP_SRC),
                (REG_XYSTRT, (1 << 16) | 2),
                (REG_XYEND, (2 << 16) | 10),
            ],
        );
        start_blit(&mut engine).unwrap();

        let writes = log.lock().unwrap().clone();
        assert_eq!(writes.len(), 8);
        assert!(writes.iter().all(|w| w.1 == 0x55));
        assert_eq!(writes[0].0, 64 + 2);
        assert_eq!(writes[7].0, 2 * 64 + 9);
    }

    #[test]
    fn clipped_pixels_are_skipped() {
        let (mut engine, log) = setup();
        program(
            &mut engine,
            &[
                (REG_CXBNDRY, (63 << 16) | 2),
                (REG_DWGCTL, Opcode::AutolineOpen as u32 | RPL | BOP_SRC),
                (REG_XYSTRT, 0),
                (REG_XYEND, 6),
            ],
        );
        start_blit(&mut engine).unwrap();
        let indices: Vec<u32> = log.lock().unwrap().iter().map(|w| w.0).collect();
        assert_eq!(indices, vec![2, 3, 4, 5]);
    }

    #[test]
    fn shaded_line_writes_depth() {
        let (mut engine, log) = setup();
        program(
            &mut engine,
            &[
                (REG_MACCESS, 1),
                (REG_ZORG, 0x8000),
                (REG_DR0, 5 << 15),
                (REG_DR0 + 4 * 4, 0xff << 15),
                (REG_DWGCTL, Opcode::LineOpen as u32 | ((Atype::Zi as u32) << 4)),
                (REG_SGN, 1),
                (REG_LEN, 2),
                (REG_AR1, -1i32 as u32),
            ],
        );
        start_blit(&mut engine).unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(log.lock().unwrap()[0].1, 0xf800);
        assert_eq!(engine.read_z(0), 5);
        assert_eq!(engine.read_z(1), 5);
    }
}

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

    devices::mga::blit::trap.rs

    Trapezoid fills: TRAP in flat, raster-op and Gouraud-shaded variants,
    and TEXTURE_TRAP.
    
    Each row spans FXLEFT up to but not including FXRIGHT. After a row both
    edges are stepped with their Bresenham terms and the destination moves
    down one row.
*/

use crate::devices::mga::{
    blit::pack_rgb,
    engine::DrawingEngine,
    error::MgaError,
    regs::*,
    texture::Texel,
};

pub fn trap(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    match engine.atype() {
        Some(Atype::Blk) | Some(Atype::Rpl) => {
            flat(engine, false);
            Ok(())
        }
        Some(Atype::Rstr) => {
            flat(engine, true);
            Ok(())
        }
        Some(Atype::I) => shaded(engine, false),
        Some(Atype::Zi) => shaded(engine, true),
        None => Err(MgaError::UnknownAccessType {
            op: "TRAP",
            atype: engine.ctl().atype(),
        }),
    }
}

pub fn texture_trap(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    match engine.atype() {
        Some(Atype::I) => textured(engine, false),
        Some(Atype::Zi) => textured(engine, true),
        _ => Err(MgaError::UnknownAccessType {
            op: "TEXTURE_TRAP",
            atype: engine.ctl().atype(),
        }),
    }
}

fn flat(engine: &mut DrawingEngine, rop: bool) {
    for _ in 0..engine.regs.length {
        let x_r = engine.regs.fxright;
        let mut x = engine.regs.fxleft;

        while x != x_r {
            let xi = x as i32;
            if engine.visible(xi) {
                let color = match engine.regs.pattern_bit(xi) {
                    true => engine.regs.fcol,
                    false => engine.regs.bcol,
                };
                if rop {
                    engine.put_rop(xi, color);
                }
                else {
                    engine.put(xi, color);
                }
            }
            x = x.wrapping_add(1);
        }

        engine.step_edges(false);
        engine.regs.next_row();
    }
}

/// Interpolator state saved at the start of a row.
struct RowStart {
    x_l: i16,
    dr: [i32; 4],
    tmr: [i32; 3],
}

impl RowStart {
    fn capture(engine: &DrawingEngine) -> Self {
        let dr = &engine.regs.dr;
        let tmr = &engine.regs.tmr;
        Self {
            x_l: engine.regs.fxleft,
            dr: [dr[0], dr[4], dr[8], dr[12]],
            tmr: [tmr[6], tmr[7], tmr[8]],
        }
    }

    /// Step the interpolators down one row, then across by however far the left edge moved.
    fn next_row(&self, engine: &mut DrawingEngine, texture: bool) {
        engine.step_edges(true);
        let dx = engine.regs.fxleft.wrapping_sub(self.x_l) as i32;

        let dr = &mut engine.regs.dr;
        for (i, n) in [0, 4, 8, 12].into_iter().enumerate() {
            dr[n] = self.dr[i]
                .wrapping_add(dr[n + 3])
                .wrapping_add(dx.wrapping_mul(dr[n + 2]));
        }
        if texture {
            let tmr = &mut engine.regs.tmr;
            for (i, n) in [6, 7, 8].into_iter().enumerate() {
                // TMR1/3/5 step per row, TMR0/2/4 per pixel.
                let (row_step, x_step) = (tmr[2 * i + 1], tmr[2 * i]);
                tmr[n] = self.tmr[i]
                    .wrapping_add(row_step)
                    .wrapping_add(dx.wrapping_mul(x_step));
            }
        }
        engine.regs.next_row();
    }
}

fn shaded(engine: &mut DrawingEngine, z_write: bool) -> Result<(), MgaError> {
    let width = engine.pwidth();
    if width == PixelWidth::P8 {
        return Err(MgaError::UnsupportedPixelWidth(8, "TRAP I/ZI"));
    }

    for _ in 0..engine.regs.length {
        let start = RowStart::capture(engine);
        let x_r = engine.regs.fxright;
        let mut x = start.x_l;

        while x != x_r {
            let xi = x as i32;
            if engine.visible(xi) {
                let (pass, z) = engine.z_passes(xi);
                if pass {
                    if z_write {
                        engine.write_z(xi, z);
                    }
                    let (r, g, b) = engine.shade();
                    engine.put(xi, pack_rgb(width, r, g, b, "TRAP I/ZI")?);
                }
            }
            engine.step_dr_x();
            x = x.wrapping_add(1);
        }

        start.next_row(engine, false);
    }
    Ok(())
}

/// Combine a texel with the interpolated colour according to TEXCTL.
/// Returns None when the pixel is transparent.
fn texel_color(texctl: u32, texel: Texel, shade: (i32, i32, i32)) -> Result<Option<(i32, i32, i32)>, MgaError> {
    let tex = (texel.r, texel.g, texel.b);
    let modulated = ((tex.0 * shade.0) >> 8, (tex.1 * shade.1) >> 8, (tex.2 * shade.2) >> 8);

    let mode = texctl & (TEXCTL_TMODULATE | TEXCTL_STRANS | TEXCTL_ITRANS | TEXCTL_DECALCKEY);
    let color = match mode {
        0 if texel.ctransp => None,
        0 if texel.atransp => Some(shade),
        0 => Some(tex),
        TEXCTL_DECALCKEY if texel.ctransp => Some(shade),
        TEXCTL_DECALCKEY => Some(tex),
        m if m == TEXCTL_STRANS | TEXCTL_DECALCKEY => (!texel.ctransp).then_some(tex),
        TEXCTL_TMODULATE => (!texel.ctransp).then_some(modulated),
        m if m == TEXCTL_TMODULATE | TEXCTL_STRANS => (!texel.ctransp && !texel.atransp).then_some(modulated),
        _ => return Err(MgaError::UnsupportedTextureMode(mode)),
    };
    Ok(color)
}

fn textured(engine: &mut DrawingEngine, z_write: bool) -> Result<(), MgaError> {
    let width = engine.pwidth();

    for _ in 0..engine.regs.length {
        let start = RowStart::capture(engine);
        let x_r = engine.regs.fxright;
        let mut x = start.x_l;

        while x != x_r {
            let xi = x as i32;
            if engine.visible(xi) {
                let (pass, z) = engine.z_passes(xi);
                if pass {
                    let texel = engine.sampler.sample(&engine.regs, &engine.lut, &*engine.vram)?;
                    if let Some((r, g, b)) = texel_color(engine.regs.texctl, texel, engine.shade())? {
                        engine.put(xi, pack_rgb(width, r, g, b, "TEXTURE_TRAP")?);
                        if z_write {
                            engine.write_z(xi, z);
                        }
                    }
                }
            }

            engine.step_dr_x();
            let tmr = &mut engine.regs.tmr;
            tmr[6] = tmr[6].wrapping_add(tmr[0]);
            tmr[7] = tmr[7].wrapping_add(tmr[2]);
            tmr[8] = tmr[8].wrapping_add(tmr[4]);
            x = x.wrapping_add(1);
        }

        start.next_row(engine, true);
    }
    Ok(())
}

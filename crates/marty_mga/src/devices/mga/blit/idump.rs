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

    devices::mga::blit::idump.rs

    IDUMP: read a rectangle of the frame buffer back through the pixel-feed aperture.
*/

use crate::devices::mga::{engine::DrawingEngine, error::MgaError, regs::*};

pub fn start(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    if engine.atype() != Some(Atype::Rpl) {
        return Err(MgaError::UnknownAccessType {
            op: "IDUMP",
            atype: engine.ctl().atype(),
        });
    }
    if !matches!(engine.bltmod(), Some(Bltmod::BFCol) | Some(Bltmod::BU32Rgb)) {
        return Err(MgaError::UnknownBlitMode {
            op: "IDUMP",
            bltmod: engine.ctl().bltmod(),
        });
    }

    engine.begin_stream();
    engine.cursor.src_addr = engine.regs.ar[3];
    engine.cursor.idump_end_of_line = false;
    if engine.cursor.length_cur == 0 {
        engine.finish_stream();
    }
    Ok(())
}

/// Step XDST past a dumped pixel. Returns true when the row ended.
fn step(engine: &mut DrawingEngine) -> bool {
    if engine.regs.xdst == engine.regs.fxright {
        engine.regs.xdst = engine.regs.fxleft;
        engine.end_stream_row();
        return true;
    }
    engine.regs.xdst = engine.regs.xdst.wrapping_add(1);
    false
}

/// Produce the next 32 bits of the dump. A row never shares a word with the next.
pub fn read(engine: &mut DrawingEngine) -> Result<u32, MgaError> {
    match engine.pwidth() {
        PixelWidth::P24 => Ok(read_packed24(engine)),
        width => Ok(read_packed(engine, width.bits())),
    }
}

fn read_packed(engine: &mut DrawingEngine, bits: u32) -> u32 {
    let mut val = 0;
    let mut count = 0;
    while count < 32 {
        val |= engine.read_src(engine.cursor.src_addr) << count;
        engine.advance_source(1);
        if step(engine) {
            break;
        }
        count += bits;
    }
    val
}

fn read_packed24(engine: &mut DrawingEngine) -> u32 {
    let cursor = &mut engine.cursor;
    if cursor.idump_end_of_line {
        let val = cursor.rem_data as u32;
        cursor.idump_end_of_line = false;
        cursor.rem_data = 0;
        cursor.rem_count = 0;
        if cursor.length_cur <= 0 {
            engine.finish_stream();
        }
        return val;
    }

    let linear = engine.ctl().linear();
    let mut count = engine.cursor.rem_count;
    let mut val64 = engine.cursor.rem_data;

    while count < 32 && !engine.cursor.idump_end_of_line {
        val64 |= (engine.read_src(engine.cursor.src_addr) as u64 & 0xff_ffff) << count;
        engine.advance_source(1);

        if engine.regs.xdst == engine.regs.fxright {
            engine.regs.xdst = engine.regs.fxleft;
            engine.cursor.length_cur -= 1;
            let last_row = engine.cursor.length_cur <= 0;
            if last_row || !linear {
                // A pixel that spills past this word is returned by the next read on its own.
                if count > 8 {
                    engine.cursor.idump_end_of_line = true;
                }
                else {
                    count = 32;
                    if last_row {
                        engine.finish_stream();
                    }
                    break;
                }
                if last_row {
                    break;
                }
            }
        }
        else {
            engine.regs.xdst = engine.regs.xdst.wrapping_add(1);
        }
        count += 24;
    }

    engine.cursor.rem_count = count.saturating_sub(32);
    engine.cursor.rem_data = val64 >> 32;
    val64 as u32
}

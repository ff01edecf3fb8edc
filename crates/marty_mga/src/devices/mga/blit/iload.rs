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

    devices::mga::blit::iload.rs

    Image loads: ILOAD, ILOAD_SCALE, ILOAD_HIGH, ILOAD_HIGHV and ILOAD_FILTER.
    
    An image load starts busy and draws nothing until source words arrive
    through SRC0-3, DMAPAD, the pixel-feed aperture or a BLIT-mode DMA list.
    Partial pixels carry over between words. A row ending mid-word drops
    whatever is left of that word.
*/

use crate::devices::mga::{
    blit::{pack_rgb, yuv_pair},
    engine::DrawingEngine,
    error::MgaError,
    regs::*,
};

fn check_atype(engine: &DrawingEngine, op: &'static str, allowed: &[Atype]) -> Result<Atype, MgaError> {
    match engine.atype() {
        Some(atype) if allowed.contains(&atype) => Ok(atype),
        _ => Err(MgaError::UnknownAccessType {
            op,
            atype: engine.ctl().atype(),
        }),
    }
}

fn check_bltmod(engine: &DrawingEngine, op: &'static str, allowed: &[Bltmod]) -> Result<Bltmod, MgaError> {
    match engine.bltmod() {
        Some(bltmod) if allowed.contains(&bltmod) => Ok(bltmod),
        _ => Err(MgaError::UnknownBlitMode {
            op,
            bltmod: engine.ctl().bltmod(),
        }),
    }
}

fn check_direct_colour(engine: &DrawingEngine, op: &'static str) -> Result<(), MgaError> {
    match engine.pwidth() {
        PixelWidth::P16 | PixelWidth::P32 => Ok(()),
        width => Err(MgaError::UnsupportedPixelWidth(width.bits(), op)),
    }
}

/// Enter the busy state. A zero-row load completes at once.
fn begin(engine: &mut DrawingEngine) {
    engine.begin_stream();
    engine.cursor.last_pix = [0; 3];
    engine.cursor.highv_line = None;
    if engine.cursor.length_cur == 0 {
        engine.finish_stream();
    }
}

#[inline]
fn palette_load(engine: &DrawingEngine) -> bool {
    engine.atype() == Some(Atype::Rpl) && engine.cursor.maccess_running & MACCESS_TLUTLOAD != 0
}

/// Wrap the destination to the next row. Returns true if that was the last row.
fn next_row(engine: &mut DrawingEngine) -> bool {
    let regs = &mut engine.regs;
    regs.xdst = regs.fxleft;
    regs.ydst_lin = regs.ydst_lin.wrapping_add(regs.row_pitch());
    regs.selline = (regs.selline + 1) & 7;
    engine.end_stream_row()
}

/// Step XDST after a pixel. Returns Some(finished) when the row ended.
#[inline]
fn advance(engine: &mut DrawingEngine) -> Option<bool> {
    if engine.regs.xdst == engine.regs.fxright {
        return Some(next_row(engine));
    }
    engine.regs.xdst = engine.regs.xdst.wrapping_add(1);
    None
}

pub fn start(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    check_atype(engine, "ILOAD", &[Atype::Rpl, Atype::Rstr, Atype::Blk])?;
    if !palette_load(engine) {
        check_bltmod(
            engine,
            "ILOAD",
            &[
                Bltmod::BFCol,
                Bltmod::BMonoLef,
                Bltmod::BMonoWf,
                Bltmod::BU24Rgb,
                Bltmod::BU32Rgb,
                Bltmod::BU32Bgr,
            ],
        )?;
    }
    begin(engine);
    Ok(())
}

pub fn feed(engine: &mut DrawingEngine, data: u32) -> Result<(), MgaError> {
    if palette_load(engine) {
        feed_palette(engine, data);
        return Ok(());
    }

    let width = engine.pwidth();
    let direct = match engine.bltmod() {
        Some(Bltmod::BFCol) => {
            feed_packed(engine, data, width.bits(), true, false);
            return Ok(());
        }
        Some(Bltmod::BMonoLef) => {
            feed_mono(engine, data, false);
            return Ok(());
        }
        Some(Bltmod::BMonoWf) => {
            feed_mono(engine, data.swap_bytes(), true);
            return Ok(());
        }
        Some(Bltmod::BU24Rgb) => (24, false, false),
        Some(Bltmod::BU32Rgb) => (32, true, false),
        Some(Bltmod::BU32Bgr) => (32, false, true),
        _ => {
            return Err(MgaError::UnknownBlitMode {
                op: "ILOAD",
                bltmod: engine.ctl().bltmod(),
            })
        }
    };

    if !matches!(width, PixelWidth::P24 | PixelWidth::P32) {
        return Err(MgaError::UnsupportedPixelWidth(width.bits(), "ILOAD direct colour"));
    }
    let (src_bits, keyed, swap_bgr) = direct;
    feed_packed(engine, data, src_bits, keyed, swap_bgr);
    Ok(())
}

/// Two 565 palette entries per word, starting at entry YDST.
fn feed_palette(engine: &mut DrawingEngine, data: u32) {
    for half in [data as u16, (data >> 16) as u16] {
        if engine.cursor.length_cur <= 0 {
            break;
        }
        engine.load_lut_entry(engine.regs.ydst as u32, half);
        engine.regs.ydst = engine.regs.ydst.wrapping_add(1);
        engine.cursor.length_cur -= 1;
    }
    if engine.cursor.length_cur <= 0 {
        engine.finish_stream();
    }
}

/// Colour source packed `src_bits` per pixel. With `keyed`, TRANSC skips
/// pixels whose value under the BCOL mask equals FCOL.
fn feed_packed(engine: &mut DrawingEngine, data: u32, src_bits: u32, keyed: bool, swap_bgr: bool) {
    let width_mask = engine.pwidth().mask();
    let key = engine.regs.fcol & width_mask;
    let key_mask = engine.regs.bcol & width_mask;
    let transc = keyed && engine.transc();
    let pix_mask = if src_bits == 32 { u32::MAX as u64 } else { (1u64 << src_bits) - 1 };

    let mut data64 = engine.cursor.rem_data | ((data as u64) << engine.cursor.rem_count);
    let mut size = engine.cursor.rem_count + 32;

    while size >= src_bits {
        let mut pix = (data64 & pix_mask) as u32;
        if swap_bgr {
            pix = (pix & 0xff00_ff00) | ((pix >> 16) & 0xff) | ((pix & 0xff) << 16);
        }

        let x = engine.regs.xdst as i32;
        if (!transc || (pix & key_mask) != key) && engine.visible(x) {
            engine.put_rop(x, pix);
        }
        data64 >>= src_bits;
        size -= src_bits;

        if advance(engine).is_some() {
            data64 = 0;
            size = 0;
            break;
        }
    }

    engine.cursor.rem_data = data64;
    engine.cursor.rem_count = size;
}

/// Expand a 1bpp word, least significant bit first or (after a byte swap)
/// most significant first. Without DWGCTL.LINEAR each row starts a new word.
fn feed_mono(engine: &mut DrawingEngine, data: u32, msb_first: bool) {
    let transc = engine.transc();
    let linear = engine.ctl().linear();
    let mut data = data;

    for _ in 0..32 {
        let bit = match msb_first {
            true => data & 0x8000_0000 != 0,
            false => data & 1 != 0,
        };
        let x = engine.regs.xdst as i32;
        if (bit || !transc) && engine.visible(x) {
            let color = if bit { engine.regs.fcol } else { engine.regs.bcol };
            engine.put_rop(x, color);
        }

        match advance(engine) {
            Some(true) => break,
            Some(false) if !linear => break,
            _ => {}
        }
        data = if msb_first { data << 1 } else { data >> 1 };
    }
}

pub fn start_scale(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    check_atype(engine, "ILOAD_SCALE", &[Atype::Rpl])?;
    check_bltmod(engine, "ILOAD_SCALE", &[Bltmod::BUYuv])?;
    check_direct_colour(engine, "ILOAD_SCALE")?;
    begin(engine);
    Ok(())
}

#[inline]
fn span(engine: &DrawingEngine) -> i32 {
    engine.regs.fxright as i32 - engine.regs.fxleft as i32
}

/// Horizontal scaling of YUV source. AR2 is the DDA increment and AR6 the
/// error term; a source pixel is used up each time AR6 goes non-negative.
pub fn feed_scale(engine: &mut DrawingEngine, data: u32) -> Result<(), MgaError> {
    let width = engine.pwidth();
    let (p0, p1) = yuv_pair(data);
    let pixels = [
        pack_rgb(width, p0[0], p0[1], p0[2], "ILOAD_SCALE")?,
        pack_rgb(width, p1[0], p1[1], p1[2], "ILOAD_SCALE")?,
    ];
    let span = span(engine);

    let mut used = 0;
    while used < pixels.len() {
        let x = engine.regs.xdst as i32;
        if engine.regs.in_clip(x) {
            engine.put_rop(x, pixels[used]);
        }

        let ar = &mut engine.regs.ar;
        ar[6] = ar[6].wrapping_add(ar[2]);
        if ar[6] >= 0 {
            ar[6] = ar[6].wrapping_sub(span);
            used += 1;
        }

        engine.regs.xdst = engine.regs.xdst.wrapping_add(1);
        if engine.regs.xdst == engine.regs.fxright {
            let regs = &mut engine.regs;
            regs.xdst = regs.fxleft;
            regs.ydst_lin = regs.ydst_lin.wrapping_add(regs.row_pitch());
            regs.ar[0] = regs.ar[0].wrapping_add(regs.ar[5]);
            regs.ar[3] = regs.ar[3].wrapping_add(regs.ar[5]);
            regs.ar[6] = regs.ar[2].wrapping_sub(span);
            engine.end_stream_row();
            break;
        }
    }
    Ok(())
}

pub fn start_high(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    check_atype(engine, "ILOAD_HIGH", &[Atype::Rpl])?;
    check_bltmod(engine, "ILOAD_HIGH", &[Bltmod::BUYuv, Bltmod::BU32Bgr])?;
    check_direct_colour(engine, "ILOAD_HIGH")?;
    begin(engine);
    Ok(())
}

pub fn feed_high(engine: &mut DrawingEngine, data: u32) -> Result<(), MgaError> {
    let (cur, next) = match engine.bltmod() {
        Some(Bltmod::BU32Bgr) => {
            let pix = [((data >> 16) & 0xff) as i32, ((data >> 8) & 0xff) as i32, (data & 0xff) as i32];
            (pix, pix)
        }
        _ => yuv_pair(data),
    };
    filter_span(engine, cur, next)
}

/// Filtered horizontal scaling: each output pixel blends the previous and
/// current source pixels by the fraction in AR6 bits 12..15.
fn filter_span(engine: &mut DrawingEngine, cur: [i32; 3], next: [i32; 3]) -> Result<(), MgaError> {
    let width = engine.pwidth();
    let span = span(engine);
    let mut cur = cur;
    let mut remaining = 2;

    while remaining > 0 {
        let x = engine.regs.xdst as i32;
        if engine.regs.in_clip(x) {
            let f1 = (engine.regs.ar[6] >> 12) & 0xf;
            let f0 = 0x10 - f1;
            let last = engine.cursor.last_pix;
            let blend = |i: usize| (last[i] * f0 + cur[i] * f1) >> 4;
            let pix = pack_rgb(width, blend(0), blend(1), blend(2), "ILOAD_HIGH")?;
            engine.put_rop(x, pix);
        }

        let ar = &mut engine.regs.ar;
        ar[6] = ar[6].wrapping_add(ar[2]);
        if ar[6] >= 0 {
            ar[6] = ar[6].wrapping_sub(0x10000);
            remaining -= 1;
            engine.cursor.last_pix = cur;
            cur = next;
        }

        if engine.regs.xdst == engine.regs.fxright {
            let regs = &mut engine.regs;
            regs.xdst = regs.fxleft;
            regs.ydst_lin = regs.ydst_lin.wrapping_add(regs.row_pitch());
            regs.ar[6] = regs.ar[2].wrapping_sub(span);
            engine.cursor.last_pix = [0; 3];
            engine.end_stream_row();
            break;
        }
        engine.regs.xdst = engine.regs.xdst.wrapping_add(1);
    }
    Ok(())
}

pub fn start_highv(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    check_atype(engine, "ILOAD_HIGHV", &[Atype::Rpl])?;
    check_bltmod(engine, "ILOAD_HIGHV", &[Bltmod::BUYuv])?;
    check_direct_colour(engine, "ILOAD_HIGHV")?;
    begin(engine);
    Ok(())
}

/// Words alternate between two source lines. The pair is blended per byte by
/// BETA/16 and the result goes through the horizontal filter.
pub fn feed_highv(engine: &mut DrawingEngine, data: u32) -> Result<(), MgaError> {
    let Some(first) = engine.cursor.highv_line.take() else {
        engine.cursor.highv_line = Some(data);
        return Ok(());
    };

    let beta = engine.regs.beta;
    let mut blended = [0u8; 4];
    for (out, (a, b)) in blended
        .iter_mut()
        .zip(first.to_le_bytes().into_iter().zip(data.to_le_bytes()))
    {
        *out = ((a as u32 * beta + b as u32 * (16 - beta)) >> 4) as u8;
    }
    let (cur, next) = yuv_pair(u32::from_le_bytes(blended));
    filter_span(engine, cur, next)
}

pub fn filter(engine: &mut DrawingEngine) -> Result<(), MgaError> {
    log::warn!(
        "ILOAD_FILTER is not emulated; completing without drawing (DWGCTL: {:08X})",
        engine.cursor.dwgctl_running
    );
    Ok(())
}

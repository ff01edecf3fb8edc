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

    devices::mga::texture.rs

    Texture sampling for textured trapezoids, and the 256-entry palette used
    by both paletted textures and the TLUT load blit.
*/

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, FromRepr};

use crate::devices::mga::{dwgreg::DrawingRegisters, error::MgaError, regs::*, vram::PixelTarget};

pub const LUT_SIZE: usize = 256;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Expand a 565 pixel the way a TLUT load stores it.
    pub fn from_565(pix: u16) -> Rgb {
        Rgb {
            r: ((pix >> 11) << 3) as u8,
            g: (((pix >> 5) & 0x3f) << 2) as u8,
            b: ((pix & 0x1f) << 3) as u8,
        }
    }
}

pub fn default_lut() -> Vec<Rgb> {
    vec![Rgb::default(); LUT_SIZE]
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, FromRepr)]
#[repr(u32)]
pub enum TexFormat {
    Tw4 = 0,
    Tw8 = 1,
    Tw15 = 2,
    Tw16 = 3,
    Tw12 = 4,
}

/// One texel fetched for the current texture coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Texel {
    pub r: i32,
    pub g: i32,
    pub b: i32,
    /// Texel matched the colour key in TEXTRANS.
    pub ctransp: bool,
    /// Texel alpha bit matched the TEXCTL alpha key.
    pub atransp: bool,
}

/// Source of texels for TEXTURE_TRAP. The coordinates live in the TMR registers.
pub trait TextureSampler: Send {
    fn sample(&self, regs: &DrawingRegisters, lut: &[Rgb], vram: &dyn PixelTarget) -> Result<Texel, MgaError>;
}

/// Point-sampling texture unit reading texels straight out of video memory.
#[derive(Default)]
pub struct VramSampler;

#[inline]
fn shift_right(val: i64, shift: i32) -> i64 {
    if shift >= 0 {
        val >> shift.min(63)
    }
    else {
        val << (-shift).min(63)
    }
}

/// Apply clamp or wrap addressing to a texture coordinate.
#[inline]
fn address(coord: i32, mask: u32, clamp: bool) -> i32 {
    if clamp {
        coord.clamp(0, mask as i32)
    }
    else {
        coord & mask as i32
    }
}

/// Compute the (s, t) texel coordinates for the current TMR state.
pub fn texel_coords(regs: &DrawingRegisters) -> (i32, i32) {
    let tw = (regs.texwidth & TEXSIZE_LOG2_MASK) as i32;
    let th = (regs.texheight & TEXSIZE_LOG2_MASK) as i32;
    let w_mask = (regs.texwidth & TEXSIZE_WRAP_MASK) >> TEXSIZE_WRAP_SHIFT;
    let h_mask = (regs.texheight & TEXSIZE_WRAP_MASK) >> TEXSIZE_WRAP_SHIFT;

    let (s, t) = if regs.texctl & TEXCTL_NPCEN != 0 {
        (
            shift_right(regs.tmr[6] as i64, 20 - tw) as i32,
            shift_right(regs.tmr[7] as i64, 20 - th) as i32,
        )
    }
    else {
        // Perspective divide by the interpolated Q.
        let q = match regs.tmr[8] {
            0 => 0,
            tmr8 => (1i64 << 32) / tmr8 as i64,
        };
        (
            shift_right((regs.tmr[6] as i64).wrapping_mul(q), 36 - tw) as i32,
            shift_right((regs.tmr[7] as i64).wrapping_mul(q), 36 - th) as i32,
        )
    };

    (
        address(s, w_mask, regs.texctl & TEXCTL_CLAMPU != 0),
        address(t, h_mask, regs.texctl & TEXCTL_CLAMPV != 0),
    )
}

impl TextureSampler for VramSampler {
    fn sample(&self, regs: &DrawingRegisters, lut: &[Rgb], vram: &dyn PixelTarget) -> Result<Texel, MgaError> {
        let (s, t) = texel_coords(regs);
        let tex_shift = 3 + ((regs.texctl & TEXCTL_TPITCH_MASK) >> TEXCTL_TPITCH_SHIFT);
        let texel_index = ((t as u32) << tex_shift).wrapping_add(s as u32);
        let palsel = regs.texctl & TEXCTL_PALSEL_MASK;
        let tckey = regs.textrans & TEXTRANS_TCKEY_MASK;
        let tkmask = regs.textrans >> TEXTRANS_TKMASK_SHIFT;

        let format = TexFormat::from_repr(regs.texctl & TEXCTL_TEXFORMAT_MASK);
        let (src, mut texel) = match format {
            Some(TexFormat::Tw4) => {
                let byte = vram.read_u8(regs.texorg.wrapping_add(texel_index >> 1));
                let src = if s & 1 != 0 { byte >> 4 } else { byte & 0xf } as u32;
                (src, lut_texel(lut, (src | palsel) as usize))
            }
            Some(TexFormat::Tw8) => {
                let src = vram.read_u8(regs.texorg.wrapping_add(texel_index)) as u32;
                (src, lut_texel(lut, src as usize))
            }
            Some(TexFormat::Tw15) => {
                let src = read_texel16(regs, vram, texel_index);
                let ta_key = (regs.texctl & TEXCTL_TAKEY != 0) as u32;
                let ta_mask = (regs.texctl & TEXCTL_TAMASK != 0) as u32;
                let texel = Texel {
                    r: (((src >> 10) & 0x1f) << 3) as i32,
                    g: (((src >> 5) & 0x1f) << 3) as i32,
                    b: ((src & 0x1f) << 3) as i32,
                    atransp: ((src >> 15) & ta_mask) == ta_key,
                    ..Default::default()
                };
                (src, texel)
            }
            Some(TexFormat::Tw16) => {
                let src = read_texel16(regs, vram, texel_index);
                let rgb = Rgb::from_565(src as u16);
                (
                    src,
                    Texel {
                        r: rgb.r as i32,
                        g: rgb.g as i32,
                        b: rgb.b as i32,
                        ..Default::default()
                    },
                )
            }
            _ => return Err(MgaError::UnsupportedTextureFormat(regs.texctl & TEXCTL_TEXFORMAT_MASK)),
        };

        texel.ctransp = (src & tkmask) == tckey;
        Ok(texel)
    }
}

#[inline]
fn read_texel16(regs: &DrawingRegisters, vram: &dyn PixelTarget, texel_index: u32) -> u32 {
    let word_index = (regs.texorg >> 1).wrapping_add(texel_index);
    vram.read_u16(word_index.wrapping_mul(2)) as u32
}

#[inline]
fn lut_texel(lut: &[Rgb], index: usize) -> Texel {
    let rgb = lut.get(index).copied().unwrap_or_default();
    Texel {
        r: rgb.r as i32,
        g: rgb.g as i32,
        b: rgb.b as i32,
        ..Default::default()
    }
}

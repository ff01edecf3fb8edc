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

    devices::mga::decoder.rs

    Classifies control aperture accesses as queued or direct, and declares
    the side effects each readable register has.
*/

use crate::devices::mga::regs::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Long,
}

/// Where a control aperture access goes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Pixel-feed aperture below the drawing registers.
    PixelFeed,
    /// Drawing register. Queued for the worker. `reg` has the start-blit alias removed.
    Drawing { reg: u16, start_blit: bool },
    /// Applied immediately on the caller's thread.
    Direct(u16),
}

/// What reading a register does besides returning a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadEffect {
    None,
    /// Wait for the command queue to empty before sampling.
    Drain,
    /// Drain, then produce the next image-dump word and advance the dump cursor.
    DrainAndAdvance,
    /// Forwarded to the VGA collaborator. Any index auto-increment happens there.
    Passthrough,
}

pub fn classify(addr: u32) -> Route {
    let offset = (addr & CTRL_APERTURE_MASK) as u16;

    if offset < PIXEL_FEED_END {
        return Route::PixelFeed;
    }
    match offset & DRAWING_BLOCK_MASK {
        DRAWING_BLOCK_0 | DRAWING_BLOCK_1 => Route::Drawing {
            reg: offset & !START_BLIT_ALIAS,
            start_blit: is_start_blit(offset),
        },
        _ => Route::Direct(offset),
    }
}

/// Read contract of a direct register or the pixel-feed aperture.
pub fn read_effect(route: Route) -> ReadEffect {
    match route {
        Route::PixelFeed => ReadEffect::DrainAndAdvance,
        Route::Drawing { .. } => ReadEffect::None,
        Route::Direct(offset) => match offset & !3 {
            REG_STATUS => ReadEffect::Drain,
            REG_VGA_WINDOW..=REG_VGA_WINDOW_END => ReadEffect::Passthrough,
            _ => ReadEffect::None,
        },
    }
}

/// Map a DWG_INDIR_WT offset through the DMAMAP table.
pub fn indirect_register(offset: u16, dmamap: &[u8; 16]) -> u16 {
    mapped_register(dmamap[((offset >> 2) & 0xf) as usize] as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_apertures() {
        assert_eq!(classify(0x0000), Route::PixelFeed);
        assert_eq!(classify(0x1bfc), Route::PixelFeed);
        assert_eq!(
            classify(0x1c24),
            Route::Drawing {
                reg: REG_FCOL,
                start_blit: false
            }
        );
        assert_eq!(
            classify(0x1d24),
            Route::Drawing {
                reg: REG_FCOL,
                start_blit: true
            }
        );
        assert_eq!(
            classify(0x2d48),
            Route::Drawing {
                reg: REG_SOFTRAP,
                start_blit: true
            }
        );
        assert_eq!(classify(0x1e14), Route::Direct(REG_STATUS));
        assert_eq!(classify(0xFFFF_1e58), Route::Direct(REG_PRIMADDRESS));
    }

    #[test]
    fn read_contracts() {
        assert_eq!(read_effect(classify(0x1e14)), ReadEffect::Drain);
        assert_eq!(read_effect(classify(0x1e16)), ReadEffect::Drain);
        assert_eq!(read_effect(classify(0x1e10)), ReadEffect::None);
        assert_eq!(read_effect(classify(0x0100)), ReadEffect::DrainAndAdvance);
        assert_eq!(read_effect(classify(0x1fd5)), ReadEffect::Passthrough);
    }

    #[test]
    fn indirect_writes_follow_dmamap() {
        let mut map = [0u8; 16];
        map[3] = 0x09;
        map[4] = 0x40 | 0x09;
        assert_eq!(indirect_register(REG_DWG_INDIR_WT + 0x0c, &map), REG_FCOL);
        assert_eq!(indirect_register(REG_DWG_INDIR_WT + 0x10, &map), REG_FCOL | START_BLIT_ALIAS);
    }
}

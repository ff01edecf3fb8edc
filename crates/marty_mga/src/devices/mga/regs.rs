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

    devices::mga::regs.rs

    Register map and field definitions for the drawing engine.
*/

#![allow(dead_code)]

use modular_bitfield::prelude::*;
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, FromRepr};

// Control aperture layout
pub const CTRL_APERTURE_MASK: u32 = 0x3fff;
pub const PIXEL_FEED_END: u16 = 0x1c00;
pub const DRAWING_BLOCK_MASK: u16 = 0x3e00;
pub const DRAWING_BLOCK_0: u16 = 0x1c00;
pub const DRAWING_BLOCK_1: u16 = 0x2c00;
pub const START_BLIT_MASK: u16 = 0x300;
pub const START_BLIT_ALIAS: u16 = 0x100;

// Drawing registers (queued)
pub const REG_DWGCTL: u16 = 0x1c00;
pub const REG_MACCESS: u16 = 0x1c04;
pub const REG_MCTLWTST: u16 = 0x1c08;
pub const REG_ZORG: u16 = 0x1c0c;
pub const REG_PAT0: u16 = 0x1c10;
pub const REG_PAT1: u16 = 0x1c14;
pub const REG_PLNWT: u16 = 0x1c1c;
pub const REG_BCOL: u16 = 0x1c20;
pub const REG_FCOL: u16 = 0x1c24;
pub const REG_SRC0: u16 = 0x1c30;
pub const REG_SRC1: u16 = 0x1c34;
pub const REG_SRC2: u16 = 0x1c38;
pub const REG_SRC3: u16 = 0x1c3c;
pub const REG_XYSTRT: u16 = 0x1c40;
pub const REG_XYEND: u16 = 0x1c44;
pub const REG_SHIFT: u16 = 0x1c50;
pub const REG_DMAPAD: u16 = 0x1c54;
pub const REG_SGN: u16 = 0x1c58;
pub const REG_LEN: u16 = 0x1c5c;
pub const REG_AR0: u16 = 0x1c60;
pub const REG_AR1: u16 = 0x1c64;
pub const REG_AR2: u16 = 0x1c68;
pub const REG_AR3: u16 = 0x1c6c;
pub const REG_AR4: u16 = 0x1c70;
pub const REG_AR5: u16 = 0x1c74;
pub const REG_AR6: u16 = 0x1c78;
pub const REG_CXBNDRY: u16 = 0x1c80;
pub const REG_FXBNDRY: u16 = 0x1c84;
pub const REG_YDSTLEN: u16 = 0x1c88;
pub const REG_PITCH: u16 = 0x1c8c;
pub const REG_YDST: u16 = 0x1c90;
pub const REG_YDSTORG: u16 = 0x1c94;
pub const REG_YTOP: u16 = 0x1c98;
pub const REG_YBOT: u16 = 0x1c9c;
pub const REG_CXLEFT: u16 = 0x1ca0;
pub const REG_CXRIGHT: u16 = 0x1ca4;
pub const REG_FXLEFT: u16 = 0x1ca8;
pub const REG_FXRIGHT: u16 = 0x1cac;
pub const REG_XDST: u16 = 0x1cb0;
pub const REG_DR0: u16 = 0x1cc0;
pub const REG_DR15: u16 = 0x1cfc;

pub const REG_TMR0: u16 = 0x2c00;
pub const REG_TMR8: u16 = 0x2c20;
pub const REG_TEXORG: u16 = 0x2c24;
pub const REG_TEXWIDTH: u16 = 0x2c28;
pub const REG_TEXHEIGHT: u16 = 0x2c2c;
pub const REG_TEXCTL: u16 = 0x2c30;
pub const REG_TEXTRANS: u16 = 0x2c34;
pub const REG_SECADDRESS: u16 = 0x2c40;
pub const REG_SECEND: u16 = 0x2c44;
pub const REG_SOFTRAP: u16 = 0x2c48;

// Direct registers
pub const REG_FIFOSTATUS: u16 = 0x1e10;
pub const REG_STATUS: u16 = 0x1e14;
pub const REG_ICLEAR: u16 = 0x1e18;
pub const REG_IEN: u16 = 0x1e1c;
pub const REG_VCOUNT: u16 = 0x1e20;
pub const REG_DMAMAP: u16 = 0x1e30;
pub const REG_DMAMAP_END: u16 = 0x1e3f;
pub const REG_RST: u16 = 0x1e40;
pub const REG_OPMODE: u16 = 0x1e54;
pub const REG_PRIMADDRESS: u16 = 0x1e58;
pub const REG_PRIMEND: u16 = 0x1e5c;
pub const REG_DWG_INDIR_WT: u16 = 0x1e80;
pub const REG_DWG_INDIR_WT_END: u16 = 0x1ebf;
pub const REG_VGA_WINDOW: u16 = 0x1fc0;
pub const REG_VGA_WINDOW_END: u16 = 0x1fff;
pub const VGA_WINDOW_PORT_BASE: u16 = 0x3c0;

// DWGCTL
pub const DWGCTL_OPCODE_MASK: u32 = 0x0000_000f;
pub const DWGCTL_ATYPE_MASK: u32 = 0x0000_0070;
pub const DWGCTL_ZMODE_MASK: u32 = 0x0000_0700;
pub const DWGCTL_SOLID: u32 = 1 << 11;
pub const DWGCTL_ARZERO: u32 = 1 << 12;
pub const DWGCTL_SGNZERO: u32 = 1 << 13;
pub const DWGCTL_SHTZERO: u32 = 1 << 14;
pub const DWGCTL_BOP_MASK: u32 = 0x000f_0000;
pub const DWGCTL_TRANS_MASK: u32 = 0x00f0_0000;
pub const DWGCTL_BLTMOD_MASK: u32 = 0x1e00_0000;
pub const DWGCTL_PATTERN: u32 = 1 << 29;
pub const DWGCTL_TRANSC: u32 = 1 << 30;

// MACCESS
pub const MACCESS_PWIDTH_MASK: u32 = 0b11;
pub const MACCESS_TLUTLOAD: u32 = 1 << 29;
pub const MACCESS_NODITHER: u32 = 1 << 30;
pub const MACCESS_DIT555: u32 = 1 << 31;

// PITCH
pub const PITCH_MASK: u32 = 0x7e0;
pub const PITCH_YLIN: u32 = 1 << 15;

// STATUS / ICLEAR / IEN
pub const STATUS_SOFTRAPEN: u32 = 0b0000_0001;
pub const STATUS_VSYNCPEN: u32 = 0b0001_0000;
pub const STATUS_VLINEPEN: u32 = 0b0010_0000;
pub const STATUS_DWGENGSTS: u32 = 1 << 16;
pub const STATUS_ENDPRDMASTS: u32 = 1 << 17;

pub const ICLEAR_SOFTRAPICLR: u32 = 0b0000_0001;
pub const ICLEAR_VLINEICLR: u32 = 0b0010_0000;

pub const IEN_WRITE_MASK: u8 = 0x65;
pub const IEN_READ_MASK: u8 = 0x64;

pub const RST_SOFTRESET: u32 = 0b0000_0001;

// OPMODE
pub const OPMODE_DMAMOD_SHIFT: u32 = 2;
pub const OPMODE_DMAMOD_MASK: u32 = 0b11 << OPMODE_DMAMOD_SHIFT;

// DMA descriptors
pub const DMA_ADDR_MASK: u32 = 0xffff_fffc;
pub const DMA_MODE_MASK: u32 = 0b11;
/// Header byte that marks an empty slot in a primary list.
pub const DMA_HEADER_PAD: u32 = 0x15;

// TEXCTL / TEXWIDTH / TEXHEIGHT / TEXTRANS
pub const TEXCTL_TEXFORMAT_MASK: u32 = 0b111;
pub const TEXCTL_PALSEL_MASK: u32 = 0xf << 4;
pub const TEXCTL_TPITCH_SHIFT: u32 = 16;
pub const TEXCTL_TPITCH_MASK: u32 = 7 << TEXCTL_TPITCH_SHIFT;
pub const TEXCTL_NPCEN: u32 = 1 << 21;
pub const TEXCTL_DECALCKEY: u32 = 1 << 24;
pub const TEXCTL_TAKEY: u32 = 1 << 25;
pub const TEXCTL_TAMASK: u32 = 1 << 26;
pub const TEXCTL_CLAMPV: u32 = 1 << 27;
pub const TEXCTL_CLAMPU: u32 = 1 << 28;
pub const TEXCTL_TMODULATE: u32 = 1 << 29;
pub const TEXCTL_STRANS: u32 = 1 << 30;
pub const TEXCTL_ITRANS: u32 = 1 << 31;

pub const TEXSIZE_LOG2_MASK: u32 = 0x3f;
pub const TEXSIZE_WRAP_SHIFT: u32 = 18;
pub const TEXSIZE_WRAP_MASK: u32 = 0x7ff << TEXSIZE_WRAP_SHIFT;

pub const TEXTRANS_TCKEY_MASK: u32 = 0xffff;
pub const TEXTRANS_TKMASK_SHIFT: u32 = 16;

/// Drawing control register layout.
#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct DwgCtl {
    pub opcode: B4,
    pub atype: B3,
    pub linear: bool,
    pub zmode: B3,
    pub solid: bool,
    pub arzero: bool,
    pub sgnzero: bool,
    pub shftzero: bool,
    #[skip]
    unused0: B1,
    pub bop: B4,
    pub trans: B4,
    #[skip]
    unused1: B1,
    pub bltmod: B4,
    pub pattern: bool,
    pub transc: bool,
    #[skip]
    unused2: B1,
}

impl From<u32> for DwgCtl {
    fn from(val: u32) -> Self {
        DwgCtl::from_bytes(val.to_le_bytes())
    }
}

/// Sign register layout. Bit 0 is `sdydxl` for vectors and `scanleft` for blits.
#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct SgnByte {
    pub sdydxl: bool,
    pub sdxl: bool,
    pub sdy: bool,
    #[skip]
    unused0: B2,
    pub sdxr: bool,
    #[skip]
    unused1: B2,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sgn {
    pub sdydxl: bool,
    pub sdxl: bool,
    pub sdy: bool,
    pub sdxr: bool,
}

impl Sgn {
    #[inline]
    pub fn scanleft(&self) -> bool {
        self.sdydxl
    }
}

impl From<u8> for Sgn {
    fn from(val: u8) -> Self {
        let bits = SgnByte::from_bytes([val]);
        Sgn {
            sdydxl: bits.sdydxl(),
            sdxl: bits.sdxl(),
            sdy: bits.sdy(),
            sdxr: bits.sdxr(),
        }
    }
}

impl From<Sgn> for u8 {
    fn from(sgn: Sgn) -> Self {
        SgnByte::new()
            .with_sdydxl(sgn.sdydxl)
            .with_sdxl(sgn.sdxl)
            .with_sdy(sgn.sdy)
            .with_sdxr(sgn.sdxr)
            .into_bytes()[0]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    LineOpen = 0x0,
    AutolineOpen = 0x1,
    LineClose = 0x2,
    AutolineClose = 0x3,
    Trap = 0x4,
    TextureTrap = 0x6,
    IloadHigh = 0x7,
    Bitblt = 0x8,
    Iload = 0x9,
    Idump = 0xa,
    Fbitblt = 0xc,
    IloadScale = 0xd,
    IloadHighv = 0xe,
    IloadFilter = 0xf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum Atype {
    Rpl = 0,
    Rstr = 1,
    Zi = 3,
    Blk = 4,
    I = 7,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum Zmode {
    #[default]
    NoZcmp = 0,
    Ze = 2,
    Zne = 3,
    Zlt = 4,
    Zlte = 5,
    Zgt = 6,
    Zgte = 7,
}

impl Zmode {
    /// Decode the ZMODE field. The reserved encoding 1 behaves as no compare.
    pub fn from_field(val: u8) -> Zmode {
        Zmode::from_repr(val).unwrap_or_default()
    }

    /// Depth test: does a pixel at depth `z` pass against the stored `old_z`?
    #[inline]
    pub fn passes(&self, z: u16, old_z: u16) -> bool {
        match self {
            Zmode::NoZcmp => true,
            Zmode::Ze => z == old_z,
            Zmode::Zne => z != old_z,
            Zmode::Zlt => z < old_z,
            Zmode::Zlte => z <= old_z,
            Zmode::Zgt => z > old_z,
            Zmode::Zgte => z >= old_z,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum Bltmod {
    BMonoLef = 0x0,
    BFCol = 0x2,
    BU32Bgr = 0x3,
    BMonoWf = 0x4,
    BU32Rgb = 0x7,
    BUYuv = 0xe,
    BU24Rgb = 0xf,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum PixelWidth {
    #[default]
    P8,
    P16,
    P24,
    P32,
}

impl PixelWidth {
    pub fn from_maccess(maccess: u32) -> PixelWidth {
        match maccess & MACCESS_PWIDTH_MASK {
            0 => PixelWidth::P8,
            1 => PixelWidth::P16,
            2 => PixelWidth::P32,
            _ => PixelWidth::P24,
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            PixelWidth::P8 => 8,
            PixelWidth::P16 => 16,
            PixelWidth::P24 => 24,
            PixelWidth::P32 => 32,
        }
    }

    pub fn bytes(&self) -> u32 {
        self.bits() / 8
    }

    /// Mask covering one pixel of this width.
    pub fn mask(&self) -> u32 {
        match self {
            PixelWidth::P32 => 0xffff_ffff,
            _ => (1 << self.bits()) - 1,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize, FromRepr)]
#[repr(u8)]
pub enum DmaMode {
    #[default]
    Reg = 0,
    Blit = 1,
    Vector = 2,
    Reserved = 3,
}

impl DmaMode {
    pub fn from_addr(addr: u32) -> DmaMode {
        DmaMode::from_repr((addr & DMA_MODE_MASK) as u8).unwrap_or(DmaMode::Reserved)
    }
}

/// Translate a DMA header byte or DMAMAP entry into the drawing register it selects.
/// Bit 7 selects the second drawing block.
#[inline]
pub fn mapped_register(entry: u32) -> u16 {
    let offset = ((entry & 0x7f) << 2) as u16;
    if entry & 0x80 != 0 {
        DRAWING_BLOCK_1 + offset
    }
    else {
        DRAWING_BLOCK_0 + offset
    }
}

/// Does `reg` fall on the start-blit alias of a drawing register?
#[inline]
pub fn is_start_blit(reg: u16) -> bool {
    reg & START_BLIT_MASK == START_BLIT_ALIAS
}

/// Boolean raster operation selected by DWGCTL.BOP.
#[inline]
pub fn bitop(src: u32, dst: u32, dwgctl: u32) -> u32 {
    match (dwgctl & DWGCTL_BOP_MASK) >> 16 {
        0x0 => 0,
        0x1 => !(dst | src),
        0x2 => dst & !src,
        0x3 => !src,
        0x4 => !dst & src,
        0x5 => !dst,
        0x6 => dst ^ src,
        0x7 => !(src & dst),
        0x8 => src & dst,
        0x9 => !(dst ^ src),
        0xa => dst,
        0xb => dst | !src,
        0xc => src,
        0xd => src | !dst,
        0xe => src | dst,
        _ => 0xffff_ffff,
    }
}

/// Transparency patterns selected by DWGCTL.TRANS. Each is a 4x4 grid indexed
/// by (pattern line & 3, x & 3).
pub const TRANS_MASKS: [[u8; 16]; 16] = [
    [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1],
    [1, 0, 1, 0, 0, 1, 0, 1, 1, 0, 1, 0, 0, 1, 0, 1],
    [0, 1, 0, 1, 1, 0, 1, 0, 0, 1, 0, 1, 1, 0, 1, 0],
    [1, 0, 1, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0],
    [0, 1, 0, 1, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0, 1, 0, 1, 0],
    [0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0, 1, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
    [0, 0, 0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0],
    [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 1, 0, 0],
    [0, 0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

/// Look up whether pixel `x` on pattern line `selline` passes the transparency mask.
#[inline]
pub fn trans_pass(dwgctl: u32, selline: u32, x: i32) -> bool {
    let sel = ((dwgctl & DWGCTL_TRANS_MASK) >> 20) as usize;
    TRANS_MASKS[sel][((selline & 3) * 4) as usize + (x & 3) as usize] != 0
}

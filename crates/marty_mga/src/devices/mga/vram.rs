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

    devices::mga::vram.rs

    Video memory for the drawing engine, and the pixel target trait the
    raster handlers draw through.
*/

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::devices::mga::regs::PixelWidth;

/// How addresses beyond the end of video memory are treated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum AddressPolicy {
    /// Mask the address with (size - 1).
    #[default]
    Wrap,
    /// Drop the access. Reads return zero.
    Clip,
}

/// The surface raster operations draw into. Addresses are in bytes unless noted.
/// Writes return `false` when the address was dropped by the address policy.
pub trait PixelTarget: Send {
    fn size(&self) -> usize;
    fn read_u8(&self, addr: u32) -> u8;
    fn write_u8(&mut self, addr: u32, val: u8) -> bool;

    fn read_u16(&self, addr: u32) -> u16 {
        u16::from_le_bytes([self.read_u8(addr), self.read_u8(addr.wrapping_add(1))])
    }

    fn write_u16(&mut self, addr: u32, val: u16) -> bool {
        let [b0, b1] = val.to_le_bytes();
        self.write_u8(addr, b0) & self.write_u8(addr.wrapping_add(1), b1)
    }

    /// Read the pixel at `index` (in pixels, not bytes).
    fn read_pixel(&self, index: u32, width: PixelWidth) -> u32 {
        let addr = index.wrapping_mul(width.bytes());
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().take(width.bytes() as usize).enumerate() {
            *b = self.read_u8(addr.wrapping_add(i as u32));
        }
        u32::from_le_bytes(bytes)
    }

    /// Write the pixel at `index`. Only the low `width` bits of `val` are stored.
    fn write_pixel(&mut self, index: u32, width: PixelWidth, val: u32) -> bool {
        let addr = index.wrapping_mul(width.bytes());
        let bytes = val.to_le_bytes();
        let mut written = true;
        for (i, b) in bytes.iter().take(width.bytes() as usize).enumerate() {
            written &= self.write_u8(addr.wrapping_add(i as u32), *b);
        }
        written
    }

    fn as_bytes(&self) -> &[u8];
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

pub struct Vram {
    mem: Vec<u32>,
    mask: u32,
    policy: AddressPolicy,
}

impl Vram {
    /// `size` must be a power of two; [MgaConfig::validate] checks this.
    ///
    /// [MgaConfig::validate]: crate::devices::mga::config::MgaConfig::validate
    pub fn new(size: usize, policy: AddressPolicy) -> Self {
        Self {
            mem: vec![0; size / 4],
            mask: (size - 1) as u32,
            policy,
        }
    }

    pub fn policy(&self) -> AddressPolicy {
        self.policy
    }

    pub fn clear(&mut self) {
        self.mem.fill(0);
    }

    #[inline]
    fn resolve(&self, addr: u32) -> Option<usize> {
        match self.policy {
            AddressPolicy::Wrap => Some((addr & self.mask) as usize),
            AddressPolicy::Clip => {
                if addr <= self.mask {
                    Some(addr as usize)
                }
                else {
                    None
                }
            }
        }
    }
}

impl PixelTarget for Vram {
    fn size(&self) -> usize {
        self.mem.len() * 4
    }

    #[inline]
    fn read_u8(&self, addr: u32) -> u8 {
        match self.resolve(addr) {
            Some(offset) => self.as_bytes()[offset],
            None => 0,
        }
    }

    #[inline]
    fn write_u8(&mut self, addr: u32, val: u8) -> bool {
        match self.resolve(addr) {
            Some(offset) => {
                self.as_bytes_mut()[offset] = val;
                true
            }
            None => false,
        }
    }

    fn read_pixel(&self, index: u32, width: PixelWidth) -> u32 {
        if let PixelWidth::P32 = width {
            if let Some(offset) = self.resolve(index.wrapping_mul(4)) {
                return self.mem[offset >> 2];
            }
            return 0;
        }
        let addr = index.wrapping_mul(width.bytes());
        match width {
            PixelWidth::P8 => self.read_u8(addr) as u32,
            PixelWidth::P16 => self.read_u16(addr) as u32,
            _ => {
                let lo = self.read_u16(addr) as u32;
                lo | (self.read_u8(addr.wrapping_add(2)) as u32) << 16
            }
        }
    }

    fn write_pixel(&mut self, index: u32, width: PixelWidth, val: u32) -> bool {
        match width {
            PixelWidth::P8 => self.write_u8(index, val as u8),
            PixelWidth::P32 => match self.resolve(index.wrapping_mul(4)) {
                Some(offset) => {
                    self.mem[offset >> 2] = val;
                    true
                }
                None => false,
            },
            PixelWidth::P16 => self.write_u16(index.wrapping_mul(2), val as u16),
            PixelWidth::P24 => {
                let addr = index.wrapping_mul(3);
                let [b0, b1, b2, _] = val.to_le_bytes();
                self.write_u8(addr, b0) & self.write_u8(addr.wrapping_add(1), b1) & self.write_u8(addr.wrapping_add(2), b2)
            }
        }
    }

    fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.mem)
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_policy_masks_addresses() {
        let mut vram = Vram::new(0x10000, AddressPolicy::Wrap);
        assert!(vram.write_pixel(0x10001, PixelWidth::P8, 0xAB));
        assert_eq!(vram.read_u8(1), 0xAB);
        assert!(vram.write_pixel(0x4000, PixelWidth::P32, 0x11223344));
        assert_eq!(vram.read_pixel(0, PixelWidth::P32), 0x11223344);
    }

    #[test]
    fn clip_policy_drops_out_of_range() {
        let mut vram = Vram::new(0x10000, AddressPolicy::Clip);
        assert!(!vram.write_pixel(0x8000, PixelWidth::P16, 0xFFFF));
        assert!(!vram.write_pixel(u32::MAX, PixelWidth::P8, 0xFF));
        assert!(vram.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(vram.read_pixel(0x8000, PixelWidth::P16), 0);
    }

    #[test]
    fn packed_24bpp_preserves_neighbours() {
        let mut vram = Vram::new(0x10000, AddressPolicy::Wrap);
        vram.write_pixel(0, PixelWidth::P32, 0xFFFF_FFFF);
        vram.write_pixel(0, PixelWidth::P24, 0x00123456);
        assert_eq!(vram.read_pixel(0, PixelWidth::P24), 0x123456);
        assert_eq!(vram.read_u8(3), 0xFF);
        vram.write_pixel(1, PixelWidth::P24, 0xABCDEF);
        assert_eq!(vram.read_u8(3), 0xEF);
        assert_eq!(vram.read_pixel(1, PixelWidth::P24), 0xABCDEF);
    }

    #[test]
    fn policy_parses_from_str() {
        assert_eq!("clip".parse::<AddressPolicy>().unwrap(), AddressPolicy::Clip);
        assert_eq!("Wrap".parse::<AddressPolicy>().unwrap(), AddressPolicy::Wrap);
    }
}

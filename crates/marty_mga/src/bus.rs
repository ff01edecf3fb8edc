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

    bus.rs

    Interfaces to the rest of the emulated machine.
    
    The accelerator core does not own the CPU, the host memory map, the
    interrupt controller or the VGA core. It reaches each of them through
    a small trait defined here. Simple implementations are provided for
    the headless frontend and for unit tests.
*/

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
    Mutex,
    PoisonError,
};

pub const NO_IO_BYTE: u8 = 0xFF;

/// Length of one system tick, a period of the 14.31818 MHz system crystal.
pub const US_PER_SYSTEM_TICK: f64 = 1.0 / 14.318180;

/// Time base for advancing a device.
#[derive(Copy, Clone, Debug)]
pub enum DeviceRunTimeUnit {
    SystemTicks(u32),
    Microseconds(f64),
}

/// Bus-master read access to emulated host memory.
///
/// The DMA engine fetches header and data words through this trait. Reads
/// beyond the end of host memory should return open-bus data rather than fail.
pub trait BusMaster: Send {
    fn bus_read(&mut self, address: u32, buf: &mut [u8]);

    /// Read a little-endian dword.
    fn bus_read_u32(&mut self, address: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.bus_read(address, &mut buf);
        u32::from_le_bytes(buf)
    }
}

/// The accelerator's interrupt pin (PCI INTA#), driven as a level.
pub trait InterruptLine: Send {
    fn set_level(&mut self, asserted: bool);
}

/// Pass-through to the VGA core for the legacy register window in the
/// control aperture, and for the current scanline count.
pub trait VgaPassthrough: Send {
    fn port_write(&mut self, port: u16, data: u8);

    fn port_read(&mut self, _port: u16) -> u8 {
        NO_IO_BYTE
    }

    fn vcount(&self) -> u32 {
        0
    }
}

/// A bus that is not connected to anything. All reads float high.
pub struct NullBus;

impl BusMaster for NullBus {
    fn bus_read(&mut self, _address: u32, buf: &mut [u8]) {
        buf.fill(NO_IO_BYTE);
    }
}

pub struct NullVga;

impl VgaPassthrough for NullVga {
    fn port_write(&mut self, port: u16, data: u8) {
        log::trace!("VGA passthrough write to unconnected port {:03X}: {:02X}", port, data);
    }
}

/// Flat, shareable system memory. Cloning produces another handle to the same
/// memory, so the host side can keep writing command lists after a clone has
/// been handed to the accelerator as its bus master.
#[derive(Clone, Default)]
pub struct SystemMemory {
    mem: Arc<Mutex<Vec<u8>>>,
}

impl SystemMemory {
    pub fn new(size: usize) -> Self {
        Self {
            mem: Arc::new(Mutex::new(vec![0; size])),
        }
    }

    pub fn size(&self) -> usize {
        self.mem.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Write bytes to memory. Bytes past the end of memory are discarded.
    pub fn write_bytes(&self, address: u32, data: &[u8]) {
        let mut mem = self.mem.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, byte) in data.iter().enumerate() {
            if let Some(dst) = mem.get_mut(address as usize + i) {
                *dst = *byte;
            }
        }
    }

    /// Write a run of little-endian dwords starting at `address`.
    pub fn write_u32s(&self, address: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.write_bytes(address + (i as u32) * 4, &word.to_le_bytes());
        }
    }
}

impl BusMaster for SystemMemory {
    fn bus_read(&mut self, address: u32, buf: &mut [u8]) {
        let mem = self.mem.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = mem.get(address as usize + i).copied().unwrap_or(NO_IO_BYTE);
        }
    }
}

/// An interrupt line that records its level and counts rising edges. Clones
/// share state.
#[derive(Clone, Default)]
pub struct IrqFlag {
    level: Arc<AtomicBool>,
    raised: Arc<AtomicU32>,
}

impl IrqFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_asserted(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    /// Number of low-to-high transitions seen so far.
    pub fn raise_count(&self) -> u32 {
        self.raised.load(Ordering::Acquire)
    }
}

impl InterruptLine for IrqFlag {
    fn set_level(&mut self, asserted: bool) {
        let was = self.level.swap(asserted, Ordering::AcqRel);
        if asserted && !was {
            self.raised.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_memory_reads_back_words() {
        let mem = SystemMemory::new(64);
        mem.write_u32s(8, &[0xDEADBEEF, 0x01020304]);

        let mut bus = mem.clone();
        assert_eq!(bus.bus_read_u32(8), 0xDEADBEEF);
        assert_eq!(bus.bus_read_u32(12), 0x01020304);
    }

    #[test]
    fn system_memory_floats_past_end() {
        let mut mem = SystemMemory::new(4);
        assert_eq!(mem.bus_read_u32(2), 0xFFFF_0000);
    }

    #[test]
    fn irq_flag_counts_edges() {
        let mut irq = IrqFlag::new();
        irq.set_level(true);
        irq.set_level(true);
        irq.set_level(false);
        irq.set_level(true);
        assert!(irq.is_asserted());
        assert_eq!(irq.raise_count(), 2);
    }
}

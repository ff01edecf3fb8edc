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

    devices::mga::snapshot.rs

    Save-state support. A snapshot is taken with the command queue drained,
    so it holds only state that is at rest: the register file, the cursor of
    an incremental blit that is waiting for words, the DMA descriptors and the
    status latch. VRAM is saved separately.
*/

use anyhow::{anyhow, bail, Context};
use serde_derive::{Deserialize, Serialize};

use crate::devices::mga::{
    dma::DmaEngine,
    dwgreg::{DrawingRegisters, REGISTER_FILE_LEN},
    engine::{ApertureState, BlitCursor, DrawingEngine},
    regs::DmaMode,
    status::{Counters, StatusLatch},
    texture::{Rgb, LUT_SIZE},
};

pub const SNAPSHOT_VERSION: u32 = 1;

// Plain values precede tables so the snapshot can be written as TOML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MgaSnapshot {
    pub version: u32,
    pub vram_size: usize,
    pub busy: bool,
    pub opmode: u32,
    pub dmamod: DmaMode,
    pub dmamap: [u8; 16],
    pub counters: Counters,
    pub registers: DrawingRegisters,
    pub cursor: BlitCursor,
    pub aperture: ApertureState,
    pub dma: DmaEngine,
    pub latch: StatusLatch,
    pub lut: Vec<Rgb>,
}

impl MgaSnapshot {
    pub(crate) fn capture(
        engine: &DrawingEngine,
        dma: &DmaEngine,
        latch: &StatusLatch,
        opmode: u32,
        dmamap: [u8; 16],
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            vram_size: engine.vram.size(),
            busy: engine.busy,
            opmode,
            dmamod: engine.dmamod,
            dmamap,
            counters: engine.signals.counters(),
            registers: engine.regs.clone(),
            cursor: engine.cursor.clone(),
            aperture: engine.aperture,
            dma: dma.clone(),
            latch: latch.clone(),
            lut: engine.lut.clone(),
        }
    }

    /// Check that the snapshot fits a card with `vram_size` bytes of VRAM.
    pub fn validate(&self, vram_size: usize) -> anyhow::Result<()> {
        if self.version != SNAPSHOT_VERSION {
            bail!(
                "Snapshot version {} is not supported (expected {})",
                self.version,
                SNAPSHOT_VERSION
            );
        }
        if self.vram_size != vram_size {
            bail!(
                "Snapshot was taken with {:#X} bytes of VRAM, card has {:#X}",
                self.vram_size,
                vram_size
            );
        }
        if self.registers.latch.len() != REGISTER_FILE_LEN {
            bail!("Register file has {} entries", self.registers.latch.len());
        }
        if self.lut.len() != LUT_SIZE {
            bail!("Palette has {} entries", self.lut.len());
        }
        if self.dma.pri_phase > 3 || self.dma.sec_phase > 3 || self.aperture.phase > 4 {
            bail!("Header phase out of range");
        }
        if self.cursor.rem_count > 64 {
            bail!("Carried bit count {} out of range", self.cursor.rem_count);
        }
        Ok(())
    }

    /// Load the engine and DMA halves. Caller holds both locks and has validated.
    pub(crate) fn apply(&self, engine: &mut DrawingEngine, dma: &mut DmaEngine) {
        engine.regs = self.registers.clone();
        engine.cursor = self.cursor.clone();
        engine.aperture = self.aperture;
        engine.dmamod = self.dmamod;
        engine.lut = self.lut.clone();
        engine.set_busy(self.busy);
        engine.signals.load_counters(self.counters);

        dma.set_state(self.dma.state);
        dma.primaddress = self.dma.primaddress;
        dma.primend = self.dma.primend;
        dma.secaddress = self.dma.secaddress;
        dma.secend = self.dma.secend;
        dma.pri_header = self.dma.pri_header;
        dma.sec_header = self.dma.sec_header;
        dma.pri_phase = self.dma.pri_phase;
        dma.sec_phase = self.dma.sec_phase;
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string(self).map_err(|e| anyhow!("Couldn't serialize snapshot: {}", e))
    }

    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("Couldn't parse snapshot")
    }
}

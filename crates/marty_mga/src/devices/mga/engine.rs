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

    devices::mga::engine.rs

    The drawing engine: register file, blit cursor, palette and frame buffer.
    
    Everything here runs on the worker thread under the engine lock. The
    caller's thread only takes the lock to read back dump words, to take a
    snapshot and on reset.
*/

use std::sync::{Arc, Mutex, PoisonError};

use serde_derive::{Deserialize, Serialize};

use crate::{
    devices::mga::{
        blit,
        decoder::AccessWidth,
        dwgreg::{DrawingRegisters, RegisterEffect},
        error::MgaError,
        fifo::{EntryKind, QueueEntry},
        regs::*,
        status::EngineSignals,
        texture::{default_lut, Rgb, TextureSampler},
        vram::PixelTarget,
    },
    tracelogger::TraceLogger,
};

/// Trace sink shared by the engine and the DMA pump. Always the innermost lock.
pub type SharedTrace = Arc<Mutex<TraceLogger>>;

/// Working state of the operation in progress.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlitCursor {
    pub dwgctl_running: u32,
    pub maccess_running: u32,
    /// Rows left in a streamed operation.
    pub length_cur: i32,
    /// Source words consumed or produced since the operation started.
    pub words: u32,
    pub src_addr: i32,
    /// Bits of a partial pixel carried over from the previous word.
    pub rem_data: u64,
    pub rem_count: u32,
    pub idump_end_of_line: bool,
    /// Previous source pixel of the ILOAD_HIGH filter.
    pub last_pix: [i32; 3],
    /// First line of an ILOAD_HIGHV word pair.
    pub highv_line: Option<u32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApertureState {
    /// Remaining register selectors of the current REG-mode group.
    pub header: u32,
    /// 0 when the next word is a header, otherwise the data slot 1-4.
    pub phase: u8,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub blits: u64,
    pub pixels: u64,
    pub words_fed: u64,
}

pub struct DrawingEngine {
    pub(crate) regs: DrawingRegisters,
    pub(crate) cursor: BlitCursor,
    pub(crate) busy: bool,
    pub(crate) lut: Vec<Rgb>,
    pub(crate) dmamod: DmaMode,
    pub(crate) aperture: ApertureState,
    pub(crate) stats: EngineStats,
    pub(crate) vram: Box<dyn PixelTarget>,
    pub(crate) sampler: Box<dyn TextureSampler>,
    pub(crate) signals: Arc<EngineSignals>,
    pub(crate) trace: SharedTrace,
}

impl DrawingEngine {
    pub fn new(
        vram: Box<dyn PixelTarget>,
        sampler: Box<dyn TextureSampler>,
        signals: Arc<EngineSignals>,
        trace: SharedTrace,
    ) -> Self {
        Self {
            regs: DrawingRegisters::default(),
            cursor: BlitCursor::default(),
            busy: false,
            lut: default_lut(),
            dmamod: DmaMode::default(),
            aperture: ApertureState::default(),
            stats: EngineStats::default(),
            vram,
            sampler,
            signals,
            trace,
        }
    }

    pub fn vram(&self) -> &dyn PixelTarget {
        &*self.vram
    }

    pub fn vram_mut(&mut self) -> &mut dyn PixelTarget {
        &mut *self.vram
    }

    pub fn registers(&self) -> &DrawingRegisters {
        &self.regs
    }

    pub fn cursor(&self) -> &BlitCursor {
        &self.cursor
    }

    pub fn busy(&self) -> bool {
        self.busy
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn dma_mode(&self) -> DmaMode {
        self.dmamod
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
        self.signals.set_busy(busy);
    }

    pub(crate) fn trace_blit(&mut self, name: &str) {
        log::debug!(
            "Blit {}: atype={} bltmod={} len={} fx=[{},{}] ydst={}",
            name,
            self.ctl().atype(),
            self.ctl().bltmod(),
            self.regs.length,
            self.regs.fxleft,
            self.regs.fxright,
            self.regs.ydst
        );
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        if trace.is_some() {
            trace.println(format!(
                "BLIT {} dwgctl={:08X} maccess={:08X} len={}",
                name, self.cursor.dwgctl_running, self.cursor.maccess_running, self.regs.length
            ));
        }
    }

    /// Apply one queued entry. Effects on the DMA descriptors are returned
    /// for the caller to apply under the DMA lock.
    pub fn execute(&mut self, entry: QueueEntry) -> Result<RegisterEffect, MgaError> {
        if entry.kind != EntryKind::PixelFeed && entry.addr & !3 == REG_OPMODE {
            if entry.addr & 3 == 0 {
                self.set_opmode(entry.value);
            }
            return Ok(RegisterEffect::None);
        }

        match entry.kind {
            EntryKind::CtrlByte => self.write_byte(entry.addr, entry.value as u8),
            EntryKind::CtrlLong => self.write_register(entry.addr, entry.value),
            EntryKind::PixelFeed => self.write_aperture(entry.value),
        }
    }

    /// Byte write to a drawing register. Any byte of a start-blit alias starts the blit.
    pub fn write_byte(&mut self, addr: u16, val: u8) -> Result<RegisterEffect, MgaError> {
        let reg = addr & !(START_BLIT_ALIAS | 3);
        let effect = self.regs.write_byte(reg, addr & 3, val);
        if is_start_blit(addr) {
            blit::start_blit(self)?;
        }
        Ok(effect)
    }

    /// Long write to a drawing register, possibly through its start-blit alias.
    pub fn write_register(&mut self, addr: u16, val: u32) -> Result<RegisterEffect, MgaError> {
        let reg = addr & !(START_BLIT_ALIAS | 3);
        let iload_busy = blit::accepts_register_feed(self);

        let effect = match self.regs.write_long(reg, val, iload_busy) {
            RegisterEffect::FeedWord(word) => {
                blit::feed(self, word)?;
                RegisterEffect::None
            }
            effect => effect,
        };

        if is_start_blit(addr) {
            blit::start_blit(self)?;
        }
        Ok(effect)
    }

    /// A word written to the pixel-feed aperture.
    ///
    /// In REG mode words come in groups of a header followed by four data
    /// words, each header byte selecting the register its data word goes to.
    /// In BLIT mode every word feeds the running image load.
    pub fn write_aperture(&mut self, val: u32) -> Result<RegisterEffect, MgaError> {
        match self.dmamod {
            DmaMode::Reg => {
                if self.aperture.phase == 0 {
                    self.aperture.header = val;
                    self.aperture.phase = 1;
                    return Ok(RegisterEffect::None);
                }

                let reg = mapped_register(self.aperture.header & 0xff);
                if is_start_blit(reg) {
                    self.signals.count_submit_dma();
                }
                self.aperture.header >>= 8;
                self.aperture.phase = if self.aperture.phase == 4 { 0 } else { self.aperture.phase + 1 };
                self.write_register(reg, val)
            }
            DmaMode::Blit => {
                if self.busy {
                    blit::feed(self, val)?;
                }
                Ok(RegisterEffect::None)
            }
            mode => {
                log::trace!("Pixel aperture write in DMA mode {}: {:08X}", mode, val);
                Ok(RegisterEffect::None)
            }
        }
    }

    /// Read the pixel-feed aperture. Returns all-ones unless an operation is running.
    pub fn read_aperture(&mut self, width: AccessWidth) -> Result<u32, MgaError> {
        if !self.busy {
            return Ok(match width {
                AccessWidth::Byte => 0xff,
                AccessWidth::Long => 0xffff_ffff,
            });
        }
        if width == AccessWidth::Long {
            self.cursor.words += 1;
        }
        blit::dump(self)
    }

    pub fn set_opmode(&mut self, val: u32) {
        self.dmamod = DmaMode::from_repr(((val & OPMODE_DMAMOD_MASK) >> OPMODE_DMAMOD_SHIFT) as u8).unwrap_or_default();
        self.aperture = ApertureState::default();
    }

    /// Abandon the operation in progress. Register contents are kept.
    pub fn reset(&mut self) {
        self.cursor = BlitCursor::default();
        self.aperture = ApertureState::default();
        self.set_busy(false);
    }
}

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

    devices::mga::testutil.rs

    Collaborator doubles shared by the unit tests.
*/

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    bus::{IrqFlag, NullVga, SystemMemory},
    devices::mga::{
        config::MgaConfig,
        engine::{DrawingEngine, SharedTrace},
        regs::PixelWidth,
        status::EngineSignals,
        texture::VramSampler,
        vram::{AddressPolicy, PixelTarget, Vram},
        MgaCard,
    },
};

/// Pixel writes as (pixel index, value masked to the pixel width).
pub type WriteLog = Arc<Mutex<Vec<(u32, u32)>>>;

/// VRAM that also records every pixel write.
pub struct RecordingTarget {
    inner: Vram,
    log: WriteLog,
}

impl RecordingTarget {
    pub fn new(size: usize) -> (Self, WriteLog) {
        let log = WriteLog::default();
        (
            Self {
                inner: Vram::new(size, AddressPolicy::Wrap),
                log: log.clone(),
            },
            log,
        )
    }
}

impl PixelTarget for RecordingTarget {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn read_u8(&self, addr: u32) -> u8 {
        self.inner.read_u8(addr)
    }

    fn write_u8(&mut self, addr: u32, val: u8) -> bool {
        self.inner.write_u8(addr, val)
    }

    fn read_pixel(&self, index: u32, width: PixelWidth) -> u32 {
        self.inner.read_pixel(index, width)
    }

    fn write_pixel(&mut self, index: u32, width: PixelWidth, val: u32) -> bool {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((index, val & width.mask()));
        self.inner.write_pixel(index, width, val)
    }

    fn as_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.inner.as_bytes_mut()
    }
}

pub fn engine_with_recorder() -> (DrawingEngine, WriteLog) {
    let (target, log) = RecordingTarget::new(0x10_0000);
    let engine = DrawingEngine::new(
        Box::new(target),
        Box::new(VramSampler),
        Arc::new(EngineSignals::default()),
        SharedTrace::default(),
    );
    (engine, log)
}

/// Long-write each (register, value) pair straight into the engine.
pub fn program(engine: &mut DrawingEngine, writes: &[(u16, u32)]) {
    for &(reg, val) in writes {
        engine.write_register(reg, val).unwrap();
    }
}

/// A card over a recording 1 MiB VRAM, 64 KiB of host memory and a flag interrupt line.
pub struct TestCard {
    pub card: MgaCard,
    pub memory: SystemMemory,
    pub irq: IrqFlag,
    pub writes: WriteLog,
}

pub fn test_card(config: MgaConfig) -> TestCard {
    let memory = SystemMemory::new(0x1_0000);
    let irq = IrqFlag::new();
    let (target, writes) = RecordingTarget::new(0x10_0000);
    let config = MgaConfig {
        vram_size: 0x10_0000,
        ..config
    };
    let card = MgaCard::with_target(
        config,
        Box::new(target),
        Box::new(memory.clone()),
        Box::new(irq.clone()),
        Box::new(NullVga),
    )
    .unwrap();
    TestCard {
        card,
        memory,
        irq,
        writes,
    }
}

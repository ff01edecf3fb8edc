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

    devices::mga::mod.rs

    Implements the Matrox-class graphics accelerator attached to the PCI bus.
    
    MgaCard is the part of the device the emulated CPU talks to. Writes to
    the drawing register block and the pixel-feed aperture are queued for the
    worker thread. Everything else (status, interrupt enables, DMA
    descriptors, reset, the VGA window) is applied on the caller's thread.
    Reads that depend on queued work drain the queue first.
    
    The card is clocked by run(), which fires the periodic status tick and
    any deferred worker wake. Status events raised by the worker are only
    folded into the guest-visible STATUS register on a tick.
*/

pub mod blit;
pub mod config;
pub mod decoder;
pub mod dma;
pub mod dwgreg;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod regs;
pub mod snapshot;
pub mod status;
pub mod texture;
pub mod vram;
pub mod worker;

#[cfg(test)]
mod testutil;

use std::{
    sync::{atomic::Ordering, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Context;

pub use decoder::AccessWidth;

use crate::{
    bus::{BusMaster, DeviceRunTimeUnit, InterruptLine, VgaPassthrough, NO_IO_BYTE, US_PER_SYSTEM_TICK},
    devices::mga::{
        config::MgaConfig,
        decoder::{classify, indirect_register, read_effect, ReadEffect, Route},
        dma::{DmaEngine, DmaState},
        engine::{DrawingEngine, EngineStats, SharedTrace},
        error::MgaError,
        fifo::{command_queue, CommandProducer, QueueEntry},
        regs::*,
        snapshot::MgaSnapshot,
        status::{Counters, EngineSignals, StatusLatch},
        texture::VramSampler,
        vram::{PixelTarget, Vram},
        worker::{SharedState, Worker},
    },
    tracelogger::TraceLogger,
};

/// FIFOSTATUS reports at most this many free entries.
const FIFO_STATUS_FREE_MAX: usize = 64;
const DRAIN_POLL: Duration = Duration::from_micros(50);

pub struct MgaCard {
    config: MgaConfig,
    producer: CommandProducer,
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
    latch: StatusLatch,
    irq: Box<dyn InterruptLine>,
    vga: Box<dyn VgaPassthrough>,
    dmamap: [u8; 16],
    opmode: u32,
    tick_accum: f64,
    /// Microseconds until a deferred wake fires.
    wake_timer: Option<f64>,
    trace: SharedTrace,
}

impl MgaCard {
    pub fn new(
        config: MgaConfig,
        bus: Box<dyn BusMaster>,
        irq: Box<dyn InterruptLine>,
        vga: Box<dyn VgaPassthrough>,
    ) -> anyhow::Result<Self> {
        let vram = Box::new(Vram::new(config.vram_size, config.vram_policy));
        Self::with_target(config, vram, bus, irq, vga)
    }

    /// Build a card that draws into `target` instead of its own VRAM.
    pub fn with_target(
        config: MgaConfig,
        target: Box<dyn PixelTarget>,
        bus: Box<dyn BusMaster>,
        irq: Box<dyn InterruptLine>,
        vga: Box<dyn VgaPassthrough>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let trace = match &config.trace_file {
            Some(path) => TraceLogger::from_filename(path)?,
            None => TraceLogger::None,
        };
        let trace: SharedTrace = Arc::new(Mutex::new(trace));

        let (producer, consumer, queue) = command_queue(config.fifo_size);
        let signals = Arc::new(EngineSignals::default());
        let engine = DrawingEngine::new(target, Box::new(VramSampler), Arc::clone(&signals), trace.clone());
        let dma = DmaEngine::with_trace(trace.clone());
        let shared = Arc::new(SharedState::new(engine, dma, queue, signals));

        let worker = Worker::new(consumer, bus, shared.clone(), config.batch_size, config.dma_quantum)
            .spawn()
            .context("Couldn't start accelerator")?;

        let mut card = Self {
            config,
            producer,
            shared,
            worker: Some(worker),
            latch: StatusLatch::default(),
            irq,
            vga,
            dmamap: [0; 16],
            opmode: 0,
            tick_accum: 0.0,
            wake_timer: None,
            trace,
        };
        let change = card.latch.reset();
        card.drive_irq(change);
        log::debug!(
            "Accelerator created: {:#X} bytes VRAM, FIFO {} entries",
            card.config.vram_size,
            card.config.fifo_size
        );
        Ok(card)
    }

    /// Replace the trace sink.
    pub fn set_trace_logger(&mut self, logger: TraceLogger) {
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        trace.flush();
        *trace = logger;
    }

    /// Lines collected by a capturing trace logger.
    pub fn trace_lines(&self) -> Vec<String> {
        self.trace.lock().unwrap_or_else(PoisonError::into_inner).captured().to_vec()
    }

    pub fn config(&self) -> &MgaConfig {
        &self.config
    }

    /// Write to the control aperture.
    pub fn write(&mut self, addr: u32, value: u32, width: AccessWidth) {
        self.check_fault();
        match classify(addr) {
            Route::PixelFeed => match width {
                AccessWidth::Long => self.enqueue(QueueEntry::feed(value)),
                AccessWidth::Byte => {
                    log::trace!("Byte write to pixel aperture ignored: {:04X}", addr & CTRL_APERTURE_MASK)
                }
            },
            Route::Drawing { start_blit, .. } => {
                let offset = (addr & CTRL_APERTURE_MASK) as u16;
                if start_blit {
                    self.shared.signals.count_submit();
                }
                match width {
                    AccessWidth::Byte => self.enqueue(QueueEntry::byte(offset, value as u8)),
                    AccessWidth::Long => self.enqueue(QueueEntry::long(offset & !3, value)),
                }
            }
            Route::Direct(offset) => match width {
                AccessWidth::Byte => self.write_direct_byte(offset, value as u8),
                AccessWidth::Long => self.write_direct_long(offset & !3, value),
            },
        }
    }

    /// Read from the control aperture.
    pub fn read(&mut self, addr: u32, width: AccessWidth) -> u32 {
        self.check_fault();
        let route = classify(addr);
        if matches!(read_effect(route), ReadEffect::Drain | ReadEffect::DrainAndAdvance) {
            self.drain_queue();
        }

        match route {
            Route::PixelFeed => {
                let result = self.shared.lock_engine().read_aperture(width);
                match result {
                    Ok(value) => value,
                    Err(err) => self.abort(err),
                }
            }
            Route::Drawing { reg, .. } => {
                let offset = (addr & CTRL_APERTURE_MASK) as u16;
                if reg & !3 != REG_SECADDRESS {
                    log::trace!("Read of write-only drawing register {:04X}", offset);
                    return 0;
                }
                let dma = self.shared.lock_dma();
                match width {
                    AccessWidth::Byte => dma.read_byte(REG_SECADDRESS | (offset & 3)) as u32,
                    AccessWidth::Long => dma.secaddress,
                }
            }
            Route::Direct(offset) => match width {
                AccessWidth::Byte => self.read_direct_byte(offset) as u32,
                AccessWidth::Long => {
                    let base = offset & !3;
                    (0..4).fold(0, |acc, i| acc | ((self.read_direct_byte(base + i) as u32) << (i * 8)))
                }
            },
        }
    }

    fn write_direct_long(&mut self, offset: u16, value: u32) {
        match offset {
            REG_PRIMEND => {
                let armed = self.shared.lock_dma().write_primend(value, &self.shared.signals);
                if armed {
                    self.latch.status &= !STATUS_ENDPRDMASTS;
                    self.schedule_wake();
                }
            }
            REG_OPMODE => {
                self.write_opmode(0, value as u8);
                self.opmode = value & self.opmode_mask();
                self.enqueue(QueueEntry::long(REG_OPMODE, value));
            }
            REG_DWG_INDIR_WT..=REG_DWG_INDIR_WT_END => {
                let reg = indirect_register(offset, &self.dmamap);
                if is_start_blit(reg) {
                    self.shared.signals.count_submit();
                }
                self.enqueue(QueueEntry::long(reg, value));
            }
            _ => {
                for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
                    self.write_direct_byte(offset + i as u16, byte);
                }
            }
        }
    }

    fn write_direct_byte(&mut self, offset: u16, val: u8) {
        match offset {
            REG_ICLEAR => {
                self.latch.iclear(val);
                let change = self.latch.update_irq();
                self.drive_irq(change);
            }
            REG_IEN => {
                self.latch.write_ien(val);
                let change = self.latch.update_irq();
                self.drive_irq(change);
            }
            REG_RST => {
                if val as u32 & RST_SOFTRESET != 0 {
                    self.reset();
                }
            }
            REG_OPMODE => {
                self.write_opmode(0, val);
                self.enqueue(QueueEntry::byte(REG_OPMODE, val));
            }
            o if o & !3 == REG_OPMODE => self.write_opmode(o & 3, val),
            o if o & !3 == REG_PRIMADDRESS || o & !3 == REG_PRIMEND => self.shared.lock_dma().write_byte(o, val),
            REG_DMAMAP..=REG_DMAMAP_END => self.dmamap[(offset - REG_DMAMAP) as usize] = val,
            REG_VGA_WINDOW..=REG_VGA_WINDOW_END => self
                .vga
                .port_write(VGA_WINDOW_PORT_BASE + (offset & 0x3f), val),
            o if o & !3 == REG_ICLEAR || o & !3 == REG_IEN || o & !3 == REG_RST => {}
            _ => log::warn!("Write to unhandled control register {:04X}: {:02X}", offset, val),
        }
    }

    #[inline]
    fn opmode_mask(&self) -> u32 {
        OPMODE_DMAMOD_MASK | 0x0003_0300
    }

    /// Merge a byte into OPMODE. Byte 0 also stops any running DMA.
    fn write_opmode(&mut self, byte: u16, val: u8) {
        if byte == 0 {
            self.shared.lock_dma().set_state(DmaState::Idle);
        }
        let shift = byte * 8;
        let merged = (self.opmode & !(0xff << shift)) | ((val as u32) << shift);
        self.opmode = merged & self.opmode_mask();
    }

    fn read_direct_byte(&mut self, offset: u16) -> u8 {
        let byte = offset & 3;
        match offset & !3 {
            REG_FIFOSTATUS => {
                let pending = self.shared.queue.pending();
                match byte {
                    0 => self.config.fifo_size.saturating_sub(pending).min(FIFO_STATUS_FREE_MAX) as u8,
                    1 => {
                        let empty = if pending == 0 { 0x02 } else { 0 };
                        let high = if pending >= FIFO_STATUS_FREE_MAX { 0x01 } else { 0 };
                        empty | high
                    }
                    _ => 0,
                }
            }
            REG_STATUS => {
                let busy = self.shared.signals.engine_busy() || !self.shared.queue.is_empty();
                self.latch.read_byte(byte, busy)
            }
            REG_IEN => match byte {
                0 => self.latch.read_ien(),
                _ => 0,
            },
            REG_VCOUNT => (self.vga.vcount() >> (byte * 8)) as u8,
            REG_OPMODE => (self.opmode >> (byte * 8)) as u8,
            REG_PRIMADDRESS | REG_PRIMEND => self.shared.lock_dma().read_byte(offset),
            REG_DMAMAP..=REG_DMAMAP_END => self.dmamap[(offset - REG_DMAMAP) as usize],
            REG_VGA_WINDOW..=REG_VGA_WINDOW_END => self.vga.port_read(VGA_WINDOW_PORT_BASE + (offset & 0x3f)),
            _ => {
                log::trace!("Read of unhandled control register {:04X}", offset);
                NO_IO_BYTE
            }
        }
    }

    fn enqueue(&mut self, entry: QueueEntry) {
        let pending = self.producer.enqueue(entry);
        if pending > self.config.fifo_threshold {
            self.wake_now();
        }
        else {
            self.schedule_wake();
        }
    }

    fn wake_now(&mut self) {
        self.wake_timer = None;
        self.shared.queue.wake.set();
    }

    fn schedule_wake(&mut self) {
        if self.config.wake_delay_us <= 0.0 {
            self.wake_now();
        }
        else if self.wake_timer.is_none() {
            self.wake_timer = Some(self.config.wake_delay_us);
        }
    }

    /// Advance the device clock.
    pub fn run(&mut self, unit: DeviceRunTimeUnit) {
        self.check_fault();
        let us = match unit {
            DeviceRunTimeUnit::Microseconds(us) => us,
            DeviceRunTimeUnit::SystemTicks(ticks) => ticks as f64 * US_PER_SYSTEM_TICK,
        };

        if let Some(remaining) = self.wake_timer.as_mut() {
            *remaining -= us;
            if *remaining <= 0.0 {
                self.wake_now();
            }
        }

        self.tick_accum += us;
        while self.tick_accum >= self.config.tick_us {
            self.tick_accum -= self.config.tick_us;
            self.tick();
        }
    }

    /// Fold worker events into STATUS and update the interrupt line.
    pub fn tick(&mut self) {
        self.check_fault();
        let change = self.latch.tick(&self.shared.signals, &self.shared.dma);
        self.drive_irq(change);
    }

    fn drive_irq(&mut self, change: Option<bool>) {
        if let Some(level) = change {
            log::trace!("Accelerator interrupt line {}", if level { "asserted" } else { "deasserted" });
            self.irq.set_level(level);
        }
    }

    fn drain_queue(&mut self) {
        self.wake_timer = None;
        self.shared.queue.drain();
    }

    /// Wait until every queued write has executed and DMA has stopped.
    pub fn drain(&mut self) {
        self.check_fault();
        self.wake_timer = None;
        loop {
            self.shared.queue.drain();
            if self.shared.faulted() || (self.shared.queue.is_empty() && self.shared.lock_dma().is_idle()) {
                break;
            }
            self.shared.queue.wake.set();
            thread::sleep(DRAIN_POLL);
        }
        self.check_fault();
    }

    /// Drop queued work, stop DMA and return the engine to idle. Register
    /// contents survive.
    pub fn reset(&mut self) {
        self.check_fault();
        log::debug!("Accelerator reset");

        self.shared.queue.discard.store(true, Ordering::Release);
        {
            let mut dma = self.shared.lock_dma();
            dma.reset();
            self.shared.signals.advance_epoch();
        }
        self.shared.queue.drain();
        {
            let mut engine = self.shared.lock_engine();
            engine.reset();
            self.shared.signals.reset();
        }
        // An entry that was executing when discard was raised may have re-armed a stream.
        self.shared.lock_dma().reset();
        self.shared.queue.discard.store(false, Ordering::Release);

        self.wake_timer = None;
        let change = self.latch.reset();
        self.drive_irq(change);
    }

    /// Vertical sync input from the display.
    pub fn set_vsync(&mut self, active: bool) {
        let change = self.latch.vsync(active);
        self.drive_irq(change);
    }

    /// The CRTC's vertical retrace interrupt enable.
    pub fn set_vsync_irq(&mut self, enable: bool) {
        self.latch.vsync_irq = enable;
        let change = self.latch.update_irq();
        self.drive_irq(change);
    }

    /// The display reached the line compare scanline.
    pub fn line_compare(&mut self) {
        let change = self.latch.line_compare();
        self.drive_irq(change);
    }

    pub fn counters(&self) -> Counters {
        self.shared.signals.counters()
    }

    pub fn status(&self) -> u32 {
        self.latch.status
    }

    pub fn irq_level(&self) -> bool {
        self.latch.irq_level()
    }

    pub fn dma_state(&self) -> DmaState {
        self.shared.lock_dma().state
    }

    pub fn engine_busy(&self) -> bool {
        self.shared.signals.busy()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.lock_engine().stats()
    }

    /// Times the producer found the command ring full.
    pub fn fifo_stalls(&self) -> u64 {
        self.producer.stalls()
    }

    /// Latched value of a drawing register. Drain first for a settled value.
    pub fn register(&self, reg: u16) -> u32 {
        self.shared
            .lock_engine()
            .registers()
            .latched(reg & !(START_BLIT_ALIAS | 3))
    }

    pub fn fault(&self) -> Option<MgaError> {
        self.shared.fault()
    }

    /// Copy of VRAM after all queued work has finished.
    pub fn vram_bytes(&mut self) -> Vec<u8> {
        self.drain();
        self.shared.lock_engine().vram().as_bytes().to_vec()
    }

    pub fn vram_digest(&mut self) -> String {
        format!("{:x}", md5::compute(self.vram_bytes()))
    }

    /// Copy `data` into VRAM at `offset`, wrapping at the end of VRAM.
    pub fn load_vram(&mut self, offset: usize, data: &[u8]) {
        self.drain();
        let mut engine = self.shared.lock_engine();
        let vram = engine.vram_mut().as_bytes_mut();
        if vram.is_empty() {
            return;
        }
        let len = vram.len();
        for (i, byte) in data.iter().enumerate() {
            vram[(offset + i) % len] = *byte;
        }
    }

    pub fn snapshot(&mut self) -> MgaSnapshot {
        self.drain();
        let engine = self.shared.lock_engine();
        let dma = self.shared.lock_dma();
        MgaSnapshot::capture(&engine, &dma, &self.latch, self.opmode, self.dmamap)
    }

    pub fn restore(&mut self, snapshot: &MgaSnapshot) -> anyhow::Result<()> {
        snapshot.validate(self.config.vram_size)?;
        self.drain();
        {
            let mut engine = self.shared.lock_engine();
            let mut dma = self.shared.lock_dma();
            snapshot.apply(&mut engine, &mut dma);
        }
        self.opmode = snapshot.opmode;
        self.dmamap = snapshot.dmamap;
        self.latch = snapshot.latch.clone();
        let level = self.latch.irq_wanted();
        self.latch.update_irq();
        self.irq.set_level(level);
        if !self.shared.lock_dma().is_idle() {
            self.wake_now();
        }
        Ok(())
    }

    fn check_fault(&self) {
        if let Some(err) = self.shared.fault() {
            panic!("Graphics accelerator fault: {}", err);
        }
    }

    fn abort(&self, err: MgaError) -> ! {
        log::error!("Drawing engine fault: {}", err);
        self.shared.set_fault(err.clone());
        panic!("Graphics accelerator fault: {}", err);
    }
}

impl Drop for MgaCard {
    fn drop(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Accelerator worker panicked");
            }
        }
        self.trace.lock().unwrap_or_else(PoisonError::into_inner).flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{IrqFlag, NullVga},
        devices::mga::{
            regs::{Bltmod, Opcode},
            testutil::{test_card, TestCard},
        },
    };
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::time::Instant;

    const BOP_SRC: u32 = 0xc << 16;
    const PAD: u32 = 0x15;
    const FCOL: u32 = 0x09;
    const BCOL: u32 = 0x08;
    const SOFTRAP: u32 = 0x92;

    fn immediate() -> MgaConfig {
        MgaConfig {
            wake_delay_us: 0.0,
            ..Default::default()
        }
    }

    fn header(slots: &[u32]) -> u32 {
        slots.iter().rev().fold(0, |acc, slot| (acc << 8) | slot)
    }

    fn long(card: &mut MgaCard, reg: u16, val: u32) {
        card.write(reg as u32, val, AccessWidth::Long);
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn program_iload(card: &mut MgaCard, fxright: u32, rows: u32) {
        for (reg, val) in [
            (REG_OPMODE, 1 << OPMODE_DMAMOD_SHIFT),
            (REG_MACCESS, 0),
            (REG_PITCH, 64),
            (REG_CXBNDRY, 63 << 16),
            (REG_YTOP, 0),
            (REG_YBOT, 64 * 64),
            (REG_FXBNDRY, fxright << 16),
            (REG_YDSTLEN, (1 << 16) | rows),
        ] {
            long(card, reg, val);
        }
        let bfcol = (Bltmod::BFCol as u32) << 25;
        long(card, REG_DWGCTL | START_BLIT_ALIAS, Opcode::Iload as u32 | BOP_SRC | bfcol);
    }

    #[test]
    fn queued_writes_keep_their_order() {
        let TestCard { mut card, .. } = test_card(MgaConfig {
            fifo_size: 16,
            fifo_threshold: 8,
            ..immediate()
        });
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut last = (0, 0);
        for _ in 0..1000 {
            let (fcol, bcol) = (rng.random::<u32>(), rng.random::<u32>());
            long(&mut card, REG_FCOL, fcol);
            long(&mut card, REG_BCOL, bcol);
            last = (fcol, bcol);
        }
        card.drain();
        assert_eq!((card.register(REG_FCOL), card.register(REG_BCOL)), last);
        assert_eq!(card.read(REG_FIFOSTATUS as u32, AccessWidth::Byte), 16);
        assert_eq!(card.read(REG_FIFOSTATUS as u32 + 1, AccessWidth::Byte), 0x02);
    }

    #[test]
    fn trapezoid_fill_through_the_queue() {
        let TestCard { mut card, writes, .. } = test_card(MgaConfig::default());
        for (reg, val) in [
            (REG_MACCESS, 1),
            (REG_PITCH, 64),
            (REG_CXBNDRY, 63 << 16),
            (REG_YTOP, 0),
            (REG_YBOT, 64 * 64),
            (REG_FCOL, 0x1234),
            (REG_FXBNDRY, 10 << 16),
            (REG_YDSTLEN, (2 << 16) | 10),
        ] {
            long(&mut card, reg, val);
        }
        long(
            &mut card,
            REG_DWGCTL | START_BLIT_ALIAS,
            Opcode::Trap as u32 | DWGCTL_SOLID | DWGCTL_ARZERO | BOP_SRC,
        );

        // STATUS drains, so the fill is done by the time it returns.
        let status = card.read(REG_STATUS as u32, AccessWidth::Long);
        assert_eq!(status & STATUS_DWGENGSTS, 0);
        assert_eq!(writes.lock().unwrap().len(), 100);
        assert_eq!(
            card.counters(),
            Counters {
                submit: 1,
                submit_dma: 0,
                complete: 1
            }
        );
    }

    #[test]
    fn image_load_is_independent_of_feed_chunking() {
        let mut rng = StdRng::seed_from_u64(42);
        let words: Vec<u32> = (0..32).map(|_| rng.random()).collect();

        let mut whole = test_card(immediate());
        program_iload(&mut whole.card, 15, 8);
        for word in &words {
            whole.card.write(0, *word, AccessWidth::Long);
        }
        let expected = whole.card.vram_bytes();
        assert_eq!(whole.writes.lock().unwrap().len(), 128);
        assert_eq!(expected[64], words[0] as u8);
        assert_eq!(whole.card.counters().complete, 1);

        let mut chunked = test_card(MgaConfig::default());
        program_iload(&mut chunked.card, 15, 8);
        let mut rest = &words[..];
        while !rest.is_empty() {
            let n = rng.random_range(1..=rest.len().min(5));
            let (chunk, tail) = rest.split_at(n);
            for word in chunk {
                let addr = rng.random_range(0..0x1c00 / 4) * 4;
                chunked.card.write(addr, *word, AccessWidth::Long);
            }
            chunked.card.run(DeviceRunTimeUnit::Microseconds(rng.random_range(0.0..250.0)));
            rest = tail;
        }
        assert_eq!(chunked.card.vram_bytes(), expected);
        assert_eq!(*chunked.writes.lock().unwrap(), *whole.writes.lock().unwrap());
        assert!(!chunked.card.engine_busy());
    }

    #[test]
    fn primary_dma_runs_to_end() {
        let TestCard { mut card, memory, .. } = test_card(immediate());
        card.set_trace_logger(TraceLogger::Capture(Vec::new()));
        memory.write_u32s(0x1000, &[header(&[FCOL, BCOL, FCOL, BCOL]), 1, 2, 3, 4]);

        long(&mut card, REG_PRIMADDRESS, 0x1000);
        long(&mut card, REG_PRIMEND, 0x1014);
        assert_eq!(card.status() & STATUS_ENDPRDMASTS, 0);

        wait_for(|| card.dma_state() == DmaState::Idle);
        assert_eq!(card.status() & STATUS_ENDPRDMASTS, 0);
        card.tick();
        assert_ne!(card.status() & STATUS_ENDPRDMASTS, 0);

        assert_eq!(card.register(REG_FCOL), 3);
        assert_eq!(card.register(REG_BCOL), 4);
        assert_eq!(card.read(REG_PRIMADDRESS as u32, AccessWidth::Long), 0x1014);
        assert_eq!(card.trace_lines(), ["DMA IDLE -> PRIMARY", "DMA PRIMARY -> IDLE"]);
    }

    #[test]
    fn softrap_interrupt_waits_for_enable() {
        let TestCard {
            mut card, memory, irq, ..
        } = test_card(immediate());
        memory.write_u32s(0x1000, &[header(&[FCOL, SOFTRAP, PAD, PAD]), 0x55, 0x2000]);

        long(&mut card, REG_PRIMADDRESS, 0x1000);
        long(&mut card, REG_PRIMEND, 0x100c);
        wait_for(|| card.dma_state() == DmaState::Idle);

        card.run(DeviceRunTimeUnit::Microseconds(100.0));
        assert_ne!(card.status() & STATUS_SOFTRAPEN, 0);
        assert!(!irq.is_asserted());
        assert_eq!(card.read(REG_SECADDRESS as u32, AccessWidth::Long), 0x2000);
        assert_eq!(card.register(REG_FCOL), 0x55);

        card.write(REG_IEN as u32, STATUS_SOFTRAPEN, AccessWidth::Byte);
        assert!(irq.is_asserted());
        assert_eq!(irq.raise_count(), 1);

        card.write(REG_ICLEAR as u32, ICLEAR_SOFTRAPICLR, AccessWidth::Long);
        assert!(!irq.is_asserted());
        assert_eq!(card.status() & STATUS_SOFTRAPEN, 0);
    }

    #[test]
    fn enabled_softrap_interrupt_is_held_until_tick() {
        let TestCard {
            mut card, memory, irq, ..
        } = test_card(immediate());
        card.write(REG_IEN as u32, STATUS_SOFTRAPEN, AccessWidth::Byte);
        memory.write_u32s(0x1000, &[header(&[FCOL, SOFTRAP, PAD, PAD]), 0x55, 0x2000]);

        long(&mut card, REG_PRIMADDRESS, 0x1000);
        long(&mut card, REG_PRIMEND, 0x100c);
        wait_for(|| card.dma_state() == DmaState::Idle);
        card.drain();
        assert!(!irq.is_asserted());
        assert_eq!(card.status() & STATUS_SOFTRAPEN, 0);

        card.tick();
        assert!(irq.is_asserted());
        assert_eq!(irq.raise_count(), 1);
        assert_ne!(card.status() & STATUS_SOFTRAPEN, 0);
    }

    #[test]
    fn reset_always_lands_idle() {
        let TestCard { mut card, memory, .. } = test_card(MgaConfig {
            wake_delay_us: 1.0e6,
            ..Default::default()
        });
        program_iload(&mut card, 15, 8);
        card.drain();
        assert!(card.engine_busy());

        let list: Vec<u32> = std::iter::once(header(&[FCOL; 4])).chain(0..4).collect();
        memory.write_u32s(0x2000, &list);
        long(&mut card, REG_PRIMADDRESS, 0x2000);
        long(&mut card, REG_PRIMEND, 0x2014);
        long(&mut card, REG_BCOL, 7);

        for _ in 0..2 {
            card.write(REG_RST as u32, RST_SOFTRESET, AccessWidth::Long);
            assert_eq!(card.counters(), Counters::default());
            assert_eq!(card.dma_state(), DmaState::Idle);
            assert!(!card.engine_busy());
            assert_eq!(card.status(), STATUS_ENDPRDMASTS);
        }

        // The card still works afterwards.
        long(&mut card, REG_FCOL, 0xabcd);
        card.drain();
        assert_eq!(card.register(REG_FCOL), 0xabcd);
    }

    #[test]
    fn deferred_wake_fires_from_run() {
        let TestCard { mut card, .. } = test_card(MgaConfig::default());
        long(&mut card, REG_FCOL, 0x77);
        card.run(DeviceRunTimeUnit::Microseconds(40.0));
        assert_eq!(card.register(REG_FCOL), 0);

        card.run(DeviceRunTimeUnit::Microseconds(80.0));
        wait_for(|| card.register(REG_FCOL) == 0x77);
    }

    #[test]
    fn indirect_writes_and_opmode() {
        let TestCard { mut card, .. } = test_card(immediate());
        card.write(REG_DMAMAP as u32 + 2, FCOL, AccessWidth::Byte);
        long(&mut card, REG_DWG_INDIR_WT + 8, 0xbeef);
        card.drain();
        assert_eq!(card.register(REG_FCOL), 0xbeef);
        assert_eq!(card.read(REG_DMAMAP as u32, AccessWidth::Long), FCOL << 16);

        long(&mut card, REG_OPMODE, 0xffff_ffff);
        assert_eq!(card.read(REG_OPMODE as u32, AccessWidth::Long), 0x0003_030c);
        assert_eq!(card.read(0x100, AccessWidth::Long), 0xffff_ffff);
    }

    #[test]
    fn snapshot_moves_state_between_cards() {
        let mut source = test_card(immediate());
        long(&mut source.card, REG_FCOL, 0x1234);
        long(&mut source.card, REG_PITCH, 320);
        long(&mut source.card, REG_OPMODE, 1 << OPMODE_DMAMOD_SHIFT);
        source.card.write(REG_DMAMAP as u32, 0x21, AccessWidth::Byte);
        source.card.write(REG_IEN as u32, 0xff, AccessWidth::Byte);
        let snap = source.card.snapshot();

        let text = snap.to_toml().unwrap();
        let snap = MgaSnapshot::from_toml(&text).unwrap();

        let mut target = test_card(immediate());
        target.card.restore(&snap).unwrap();
        assert_eq!(target.card.register(REG_FCOL), 0x1234);
        assert_eq!(target.card.register(REG_PITCH), 320);
        assert_eq!(target.card.read(REG_DMAMAP as u32, AccessWidth::Byte), 0x21);
        assert_eq!(target.card.read(REG_IEN as u32, AccessWidth::Byte), (0xff & IEN_READ_MASK) as u32);
        assert_eq!(target.card.read(REG_OPMODE as u32, AccessWidth::Byte), 0x04);
    }

    #[test]
    #[should_panic(expected = "Unknown drawing opcode")]
    fn unknown_opcode_is_fatal() {
        let TestCard { mut card, .. } = test_card(immediate());
        long(&mut card, REG_DWGCTL | START_BLIT_ALIAS, 0x5);
        card.drain();
    }

    #[test]
    fn autoline_survives_extreme_endpoints() {
        let TestCard { mut card, .. } = test_card(immediate());
        long(&mut card, REG_XYSTRT, 0x0000_ffff);
        long(&mut card, REG_AR0, 0x7fff_ffff);
        long(&mut card, REG_DWGCTL | START_BLIT_ALIAS, Opcode::AutolineOpen as u32 | BOP_SRC);
        card.drain();

        assert!(card.fault().is_none());
        assert_eq!(card.counters().complete, 1);
        assert!(!card.engine_busy());
    }

    #[test]
    fn busy_flag_reads_without_the_engine_lock() {
        let TestCard { card, .. } = test_card(immediate());
        let _engine = card.shared.lock_engine();
        assert!(!card.engine_busy());
        assert_eq!(card.counters(), Counters::default());
    }

    struct BrokenBus;

    impl BusMaster for BrokenBus {
        fn bus_read(&mut self, address: u32, _buf: &mut [u8]) {
            panic!("no memory behind {:08X}", address);
        }
    }

    #[test]
    #[should_panic(expected = "Worker thread panicked: no memory behind")]
    fn worker_panic_fails_the_next_drain() {
        let mut card = MgaCard::new(
            immediate(),
            Box::new(BrokenBus),
            Box::new(IrqFlag::new()),
            Box::new(NullVga),
        )
        .unwrap();
        long(&mut card, REG_PRIMADDRESS, 0x1000);
        long(&mut card, REG_PRIMEND, 0x1014);
        card.drain();
    }
}

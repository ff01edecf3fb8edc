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

    devices::mga::dma.rs

    Bus-master DMA: primary and secondary command streams.
    
    The descriptor state lives behind its own mutex, shared with the caller's
    thread, which writes PRIMADDRESS and PRIMEND directly. The pump never holds
    that lock and the engine lock together: it fetches a word under the DMA
    lock, executes it under the engine lock, then takes the DMA lock again to
    apply any descriptor effect and check for the end of the stream.
*/

use std::sync::{Mutex, PoisonError};

use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    bus::BusMaster,
    devices::mga::{
        blit,
        dwgreg::RegisterEffect,
        engine::{DrawingEngine, SharedTrace},
        error::MgaError,
        regs::*,
        status::EngineSignals,
    },
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DmaState {
    #[default]
    Idle,
    Primary,
    Secondary,
}

/// One word taken from a command stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Fetched {
    Register { reg: u16, val: u32 },
    Feed(u32),
    /// Header slot 0x15 in the primary stream carries no data word.
    Pad,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DmaEngine {
    pub state: DmaState,
    pub primaddress: u32,
    pub primend: u32,
    pub secaddress: u32,
    pub secend: u32,
    pub pri_header: u32,
    pub sec_header: u32,
    /// Slot within the current header group, 0-3.
    pub pri_phase: u8,
    pub sec_phase: u8,
    #[serde(skip)]
    trace: SharedTrace,
}

#[inline]
fn same_address(a: u32, b: u32) -> bool {
    a & DMA_ADDR_MASK == b & DMA_ADDR_MASK
}

impl DmaEngine {
    pub fn with_trace(trace: SharedTrace) -> Self {
        Self {
            trace,
            ..Default::default()
        }
    }

    pub fn set_state(&mut self, state: DmaState) {
        if state == self.state {
            return;
        }
        log::debug!(
            "DMA {} -> {} (pri {:08X}/{:08X} sec {:08X}/{:08X})",
            self.state,
            state,
            self.primaddress,
            self.primend,
            self.secaddress,
            self.secend
        );
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        if trace.is_some() {
            trace.println(format!("DMA {} -> {}", self.state, state));
        }
        self.state = state;
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state == DmaState::Idle
    }

    #[inline]
    fn primary_exhausted(&self) -> bool {
        same_address(self.primaddress, self.primend)
    }

    /// Long write to PRIMEND. Arms the primary stream if idle and there is
    /// anything to fetch. Returns true if the stream was armed.
    pub fn write_primend(&mut self, val: u32, signals: &EngineSignals) -> bool {
        self.primend = val;
        if self.is_idle() && !self.primary_exhausted() {
            signals.clear_end_of_dma();
            self.pri_phase = 0;
            self.set_state(DmaState::Primary);
            return true;
        }
        false
    }

    /// Byte write to PRIMADDRESS or PRIMEND. Byte writes never arm the stream.
    pub fn write_byte(&mut self, addr: u16, val: u8) {
        let shift = (addr & 3) * 8;
        let merge = |old: u32| (old & !(0xff << shift)) | ((val as u32) << shift);
        match addr & !3 {
            REG_PRIMADDRESS => {
                self.primaddress = merge(self.primaddress);
                self.pri_phase = 0;
            }
            REG_PRIMEND => self.primend = merge(self.primend),
            _ => log::warn!("DMA byte write to unhandled register {:04X}: {:02X}", addr, val),
        }
    }

    /// One byte of PRIMADDRESS, PRIMEND or SECADDRESS.
    pub fn read_byte(&self, addr: u16) -> u8 {
        let val = match addr & !3 {
            REG_PRIMADDRESS => self.primaddress,
            REG_PRIMEND => self.primend,
            REG_SECADDRESS => self.secaddress,
            _ => 0,
        };
        (val >> ((addr & 3) * 8)) as u8
    }

    /// Apply a descriptor side effect of a drawing register write.
    pub fn apply_effect(&mut self, effect: RegisterEffect, signals: &EngineSignals) {
        match effect {
            RegisterEffect::SecAddress { value, mask } => {
                self.secaddress = (self.secaddress & !mask) | (value & mask);
                self.sec_phase = 0;
            }
            RegisterEffect::SecEnd(val) => {
                self.secend = val;
                if self.state != DmaState::Secondary && !same_address(self.secaddress, self.secend) {
                    self.set_state(DmaState::Secondary);
                }
            }
            RegisterEffect::Softrap(val) => {
                self.set_state(DmaState::Idle);
                signals.raise_end_of_dma();
                signals.raise_softrap(val);
            }
            RegisterEffect::None | RegisterEffect::FeedWord(_) => {}
        }
    }

    /// Take the next word of the active stream. Returns the stream it came from.
    fn fetch(&mut self, bus: &mut dyn BusMaster) -> Result<Option<(DmaState, Fetched)>, MgaError> {
        match self.state {
            DmaState::Idle => Ok(None),
            DmaState::Primary => {
                if DmaMode::from_addr(self.primaddress) != DmaMode::Reg {
                    return Err(MgaError::UnsupportedDmaMode("primary", self.primaddress));
                }
                if self.pri_phase == 0 {
                    self.pri_header = bus.bus_read_u32(self.primaddress & DMA_ADDR_MASK);
                    self.primaddress = self.primaddress.wrapping_add(4);
                }

                let slot = self.pri_header & 0xff;
                let fetched = if slot == DMA_HEADER_PAD {
                    Fetched::Pad
                }
                else {
                    let val = bus.bus_read_u32(self.primaddress & DMA_ADDR_MASK);
                    self.primaddress = self.primaddress.wrapping_add(4);
                    Fetched::Register {
                        reg: mapped_register(slot),
                        val,
                    }
                };
                self.pri_header >>= 8;
                self.pri_phase = (self.pri_phase + 1) & 3;
                Ok(Some((DmaState::Primary, fetched)))
            }
            DmaState::Secondary => match DmaMode::from_addr(self.secaddress) {
                DmaMode::Reg => {
                    if self.sec_phase == 0 {
                        self.sec_header = bus.bus_read_u32(self.secaddress & DMA_ADDR_MASK);
                        self.secaddress = self.secaddress.wrapping_add(4);
                    }
                    let val = bus.bus_read_u32(self.secaddress & DMA_ADDR_MASK);
                    self.secaddress = self.secaddress.wrapping_add(4);

                    let reg = mapped_register(self.sec_header & 0xff);
                    self.sec_header >>= 8;
                    self.sec_phase = (self.sec_phase + 1) & 3;
                    Ok(Some((DmaState::Secondary, Fetched::Register { reg, val })))
                }
                DmaMode::Blit => {
                    let val = bus.bus_read_u32(self.secaddress & DMA_ADDR_MASK);
                    self.secaddress = self.secaddress.wrapping_add(4);
                    Ok(Some((DmaState::Secondary, Fetched::Feed(val))))
                }
                _ => Err(MgaError::UnsupportedDmaMode("secondary", self.secaddress)),
            },
        }
    }

    /// End-of-stream transitions after a word from `source` has executed. A
    /// stream that was stopped or redirected meanwhile is left alone.
    fn finish_word(&mut self, source: DmaState, signals: &EngineSignals) {
        match source {
            DmaState::Primary => {
                if self.state == DmaState::Secondary {
                    self.pri_phase = 0;
                }
                else if self.state == DmaState::Primary && self.primary_exhausted() {
                    signals.raise_end_of_dma();
                    self.set_state(DmaState::Idle);
                }
            }
            DmaState::Secondary => {
                if self.state == DmaState::Secondary && same_address(self.secaddress, self.secend) {
                    if self.primary_exhausted() {
                        signals.raise_end_of_dma();
                        self.set_state(DmaState::Idle);
                    }
                    else {
                        self.set_state(DmaState::Primary);
                    }
                }
            }
            DmaState::Idle => {}
        }
    }

    /// Stop any stream and restart header decoding.
    pub fn reset(&mut self) {
        self.set_state(DmaState::Idle);
        self.pri_header = 0;
        self.sec_header = 0;
        self.pri_phase = 0;
        self.sec_phase = 0;
    }

    pub fn trace(&self) -> &SharedTrace {
        &self.trace
    }
}

/// Run up to `quantum` words of the active stream. Returns the number of
/// words transferred.
pub fn pump(
    dma: &Mutex<DmaEngine>,
    engine: &Mutex<DrawingEngine>,
    bus: &mut dyn BusMaster,
    signals: &EngineSignals,
    quantum: usize,
) -> Result<usize, MgaError> {
    let mut words = 0;

    while words < quantum {
        let (fetched, epoch) = {
            let mut dma = dma.lock().unwrap_or_else(PoisonError::into_inner);
            (dma.fetch(bus)?, signals.epoch())
        };
        let Some((source, fetched)) = fetched
        else {
            break;
        };
        words += 1;

        let effect = {
            let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
            if signals.epoch() != epoch {
                // A reset ran since the fetch.
                break;
            }
            match fetched {
                Fetched::Register { reg, val } => {
                    log::trace!("DMA {} write {:04X} = {:08X}", source, reg, val);
                    if is_start_blit(reg) {
                        signals.count_submit_dma();
                    }
                    engine.write_register(reg, val)?
                }
                Fetched::Feed(val) => {
                    log::trace!("DMA {} feed {:08X}", source, val);
                    if engine.busy {
                        blit::feed(&mut engine, val)?;
                    }
                    RegisterEffect::None
                }
                Fetched::Pad => RegisterEffect::None,
            }
        };

        let mut dma = dma.lock().unwrap_or_else(PoisonError::into_inner);
        dma.apply_effect(effect, signals);
        dma.finish_word(source, signals);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::SystemMemory,
        devices::mga::testutil::{engine_with_recorder, program},
        tracelogger::TraceLogger,
    };
    use std::sync::Arc;

    const FCOL: u32 = 0x09;
    const BCOL: u32 = 0x08;
    const SECADDRESS: u32 = 0x90;
    const SECEND: u32 = 0x91;
    const SOFTRAP: u32 = 0x92;

    fn header(slots: &[u32]) -> u32 {
        slots.iter().rev().fold(0, |acc, slot| (acc << 8) | slot)
    }

    struct Rig {
        mem: SystemMemory,
        dma: Mutex<DmaEngine>,
        engine: Mutex<DrawingEngine>,
        signals: Arc<EngineSignals>,
    }

    impl Rig {
        fn new() -> Self {
            let (engine, _log) = engine_with_recorder();
            let signals = engine.signals.clone();
            let trace = Arc::new(Mutex::new(TraceLogger::Capture(Vec::new())));
            Self {
                mem: SystemMemory::new(0x10000),
                dma: Mutex::new(DmaEngine::with_trace(trace)),
                engine: Mutex::new(engine),
                signals,
            }
        }

        fn start(&self, start: u32, end: u32) -> bool {
            let mut dma = self.dma.lock().unwrap();
            dma.primaddress = start;
            dma.write_primend(end, &self.signals)
        }

        fn pump(&self, quantum: usize) -> Result<usize, MgaError> {
            let mut bus = self.mem.clone();
            pump(&self.dma, &self.engine, &mut bus, &self.signals, quantum)
        }

        fn state(&self) -> DmaState {
            self.dma.lock().unwrap().state
        }
    }

    #[test]
    fn primary_stream_runs_to_end_once() {
        let rig = Rig::new();
        rig.mem
            .write_u32s(0x1000, &[header(&[FCOL, BCOL, FCOL, BCOL]), 1, 2, 3, 4]);
        assert!(rig.start(0x1000, 0x1014));
        assert_eq!(rig.state(), DmaState::Primary);

        assert_eq!(rig.pump(256), Ok(4));
        assert_eq!(rig.state(), DmaState::Idle);
        assert!(rig.signals.end_of_dma_pending());

        let engine = rig.engine.lock().unwrap();
        assert_eq!(engine.regs.fcol, 3);
        assert_eq!(engine.regs.bcol, 4);

        let dma = rig.dma.lock().unwrap();
        let trace = dma.trace().lock().unwrap();
        assert_eq!(trace.captured(), ["DMA IDLE -> PRIMARY", "DMA PRIMARY -> IDLE"]);
    }

    #[test]
    fn empty_descriptor_does_not_arm() {
        let rig = Rig::new();
        assert!(!rig.start(0x1000, 0x1000));
        assert_eq!(rig.state(), DmaState::Idle);
        assert_eq!(rig.pump(16), Ok(0));
    }

    #[test]
    fn pad_slots_read_no_data() {
        let rig = Rig::new();
        rig.mem.write_u32s(0x1000, &[header(&[0x15, 0x15, 0x15, FCOL]), 7]);
        rig.start(0x1000, 0x1008);
        assert_eq!(rig.pump(256), Ok(4));
        assert_eq!(rig.state(), DmaState::Idle);
        assert_eq!(rig.engine.lock().unwrap().regs.fcol, 7);
    }

    #[test]
    fn quantum_bounds_each_pump() {
        let rig = Rig::new();
        rig.mem
            .write_u32s(0x1000, &[header(&[FCOL, FCOL, FCOL, FCOL]), 1, 2, 3, 4]);
        rig.start(0x1000, 0x1014);
        assert_eq!(rig.pump(3), Ok(3));
        assert_eq!(rig.state(), DmaState::Primary);
        assert_eq!(rig.pump(3), Ok(1));
        assert_eq!(rig.state(), DmaState::Idle);
    }

    #[test]
    fn secondary_branch_returns_to_primary() {
        let rig = Rig::new();
        rig.mem.write_u32s(
            0x1000,
            &[header(&[SECADDRESS, SECEND]), 0x2000, 0x2008, header(&[FCOL]), 5],
        );
        rig.mem.write_u32s(0x2000, &[header(&[BCOL]), 9]);
        rig.start(0x1000, 0x1014);

        assert_eq!(rig.pump(256), Ok(4));
        assert_eq!(rig.state(), DmaState::Idle);
        let engine = rig.engine.lock().unwrap();
        assert_eq!(engine.regs.bcol, 9);
        assert_eq!(engine.regs.fcol, 5);

        let dma = rig.dma.lock().unwrap();
        let trace = dma.trace().lock().unwrap();
        assert_eq!(
            trace.captured(),
            [
                "DMA IDLE -> PRIMARY",
                "DMA PRIMARY -> SECONDARY",
                "DMA SECONDARY -> PRIMARY",
                "DMA PRIMARY -> IDLE"
            ]
        );
    }

    #[test]
    fn secondary_blit_stream_feeds_image_load() {
        let rig = Rig::new();
        {
            let mut engine = rig.engine.lock().unwrap();
            program(
                &mut engine,
                &[
                    (REG_MACCESS, 2),
                    (REG_PITCH, 32),
                    (REG_CXBNDRY, 31 << 16),
                    (REG_YBOT, 0x1000),
                    (REG_FXBNDRY, 1 << 16),
                    (REG_YDSTLEN, 1),
                    (
                        REG_DWGCTL | START_BLIT_ALIAS,
                        Opcode::Iload as u32 | (0xc << 16) | ((Bltmod::BFCol as u32) << 25),
                    ),
                ],
            );
        }
        rig.mem
            .write_u32s(0x1000, &[header(&[SECADDRESS, SECEND]), 0x2001, 0x2009]);
        rig.mem.write_u32s(0x2000, &[0x11, 0x22]);
        rig.start(0x1000, 0x100c);

        assert_eq!(rig.pump(256), Ok(4));
        assert_eq!(rig.state(), DmaState::Idle);
        assert!(!rig.engine.lock().unwrap().busy());
        assert_eq!(rig.signals.counters().complete, 1);
    }

    #[test]
    fn softrap_stops_the_stream() {
        let rig = Rig::new();
        rig.mem
            .write_u32s(0x1000, &[header(&[SOFTRAP, FCOL]), 0x3000, 1]);
        rig.start(0x1000, 0x100c);
        assert_eq!(rig.pump(256), Ok(1));
        assert_eq!(rig.state(), DmaState::Idle);
        assert!(rig.signals.end_of_dma_pending());
        assert_eq!(rig.signals.softrap_pending(), Some(0x3000));
        assert_eq!(rig.engine.lock().unwrap().regs.fcol, 0);
    }

    #[test]
    fn start_blit_alias_counts_dma_submit() {
        let rig = Rig::new();
        rig.mem
            .write_u32s(0x1000, &[header(&[0x40]), Opcode::Trap as u32]);
        rig.start(0x1000, 0x1008);
        rig.pump(256).unwrap();
        let counters = rig.signals.counters();
        assert_eq!(counters.submit_dma, 1);
        assert_eq!(counters.complete, 1);
    }

    #[test]
    fn blit_mode_primary_is_rejected() {
        let rig = Rig::new();
        rig.start(0x1001, 0x1011);
        assert_eq!(rig.pump(256), Err(MgaError::UnsupportedDmaMode("primary", 0x1001)));
    }

    #[test]
    fn byte_writes_merge() {
        let mut dma = DmaEngine::default();
        dma.pri_phase = 2;
        dma.write_byte(REG_PRIMADDRESS + 1, 0x12);
        dma.write_byte(REG_PRIMEND + 2, 0x34);
        assert_eq!(dma.primaddress, 0x1200);
        assert_eq!(dma.primend, 0x34_0000);
        assert_eq!(dma.pri_phase, 0);
        assert_eq!(dma.read_byte(REG_PRIMADDRESS + 1), 0x12);
        assert!(dma.is_idle());
    }
}

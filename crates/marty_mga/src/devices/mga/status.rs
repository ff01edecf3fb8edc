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

    devices::mga::status.rs

    Blit accounting and the interrupt status latch.
    
    The worker raises end-of-DMA and soft-trap events through EngineSignals.
    The caller's thread folds them into the STATUS register on its periodic
    tick, so the status word and interrupt line are only ever touched from
    one thread.
*/

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Mutex,
    TryLockError,
};

use serde_derive::{Deserialize, Serialize};

use crate::devices::mga::{dma::DmaEngine, regs::*};

/// Bit 3 of STATUS mirrors the live vertical sync signal.
pub const STATUS_VSYNCSTS: u32 = 1 << 3;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Blits started by the CPU.
    pub submit: u32,
    /// Blits started by DMA.
    pub submit_dma: u32,
    /// Blits finished.
    pub complete: u32,
}

impl Counters {
    #[inline]
    pub fn outstanding(&self) -> bool {
        self.submit.wrapping_add(self.submit_dma) != self.complete
    }
}

#[derive(Default)]
pub struct EngineSignals {
    submit: AtomicU32,
    submit_dma: AtomicU32,
    complete: AtomicU32,
    /// Mirror of the engine's busy flag, readable without the engine lock.
    busy: AtomicBool,
    end_of_dma: AtomicBool,
    softrap: AtomicBool,
    softrap_value: AtomicU32,
    /// Bumped by every reset. Work fetched under an older epoch is dropped.
    epoch: AtomicU64,
}

impl EngineSignals {
    pub fn count_submit(&self) {
        self.submit.fetch_add(1, Ordering::AcqRel);
    }

    pub fn count_submit_dma(&self) {
        self.submit_dma.fetch_add(1, Ordering::AcqRel);
    }

    pub fn count_complete(&self) {
        self.complete.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }

    pub fn busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> Counters {
        Counters {
            submit: self.submit.load(Ordering::Acquire),
            submit_dma: self.submit_dma.load(Ordering::Acquire),
            complete: self.complete.load(Ordering::Acquire),
        }
    }

    pub fn load_counters(&self, counters: Counters) {
        self.submit.store(counters.submit, Ordering::Release);
        self.submit_dma.store(counters.submit_dma, Ordering::Release);
        self.complete.store(counters.complete, Ordering::Release);
    }

    /// Drawing engine status as reported in STATUS bit 16.
    pub fn engine_busy(&self) -> bool {
        self.busy() || self.counters().outstanding()
    }

    pub fn raise_end_of_dma(&self) {
        self.end_of_dma.store(true, Ordering::Release);
    }

    pub fn clear_end_of_dma(&self) {
        self.end_of_dma.store(false, Ordering::Release);
    }

    pub fn end_of_dma_pending(&self) -> bool {
        self.end_of_dma.load(Ordering::Acquire)
    }

    fn take_end_of_dma(&self) -> bool {
        self.end_of_dma.swap(false, Ordering::AcqRel)
    }

    /// Record a soft trap. Only one trap is held; a second trap before the
    /// tick replaces the first one's address.
    pub fn raise_softrap(&self, value: u32) {
        self.softrap_value.store(value, Ordering::Release);
        self.softrap.store(true, Ordering::Release);
    }

    pub fn softrap_pending(&self) -> Option<u32> {
        match self.softrap.load(Ordering::Acquire) {
            true => Some(self.softrap_value.load(Ordering::Acquire)),
            false => None,
        }
    }

    fn take_softrap(&self) -> Option<u32> {
        match self.softrap.swap(false, Ordering::AcqRel) {
            true => Some(self.softrap_value.load(Ordering::Acquire)),
            false => None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn advance_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Zero the counters and drop pending events.
    pub fn reset(&self) {
        self.load_counters(Counters::default());
        self.set_busy(false);
        self.end_of_dma.store(false, Ordering::Release);
        self.softrap.store(false, Ordering::Release);
    }
}

/// STATUS, IEN and the interrupt line level. Owned by the caller's thread.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusLatch {
    pub status: u32,
    pub ien: u8,
    pub vsync_active: bool,
    /// Vertical retrace interrupt enable, owned by the CRTC.
    pub vsync_irq: bool,
    #[serde(skip)]
    irq_level: bool,
}

impl StatusLatch {
    /// Should the interrupt line be asserted for the current status and enables?
    pub fn irq_wanted(&self) -> bool {
        let ien = self.ien as u32;
        (self.status & ien & STATUS_SOFTRAPEN != 0)
            || (self.status & ien & STATUS_VLINEPEN != 0)
            || (self.status & STATUS_VSYNCPEN != 0 && self.vsync_irq)
    }

    /// Recompute the interrupt level. Returns the new level if it changed.
    pub fn update_irq(&mut self) -> Option<bool> {
        let level = self.irq_wanted();
        if level != self.irq_level {
            self.irq_level = level;
            return Some(level);
        }
        None
    }

    pub fn irq_level(&self) -> bool {
        self.irq_level
    }

    pub fn iclear(&mut self, val: u8) {
        let val = val as u32;
        if val & ICLEAR_SOFTRAPICLR != 0 {
            self.status &= !STATUS_SOFTRAPEN;
        }
        if val & ICLEAR_VLINEICLR != 0 {
            self.status &= !STATUS_VLINEPEN;
        }
    }

    pub fn write_ien(&mut self, val: u8) {
        self.ien = val & IEN_WRITE_MASK;
    }

    pub fn read_ien(&self) -> u8 {
        self.ien & IEN_READ_MASK
    }

    /// One byte of STATUS. `engine_busy` supplies bit 16.
    pub fn read_byte(&self, byte: u16, engine_busy: bool) -> u8 {
        match byte & 3 {
            0 => {
                let vsync = if self.vsync_active { STATUS_VSYNCSTS } else { 0 };
                ((self.status | vsync) & 0xff) as u8
            }
            1 => (self.status >> 8) as u8,
            2 => {
                let busy = if engine_busy { STATUS_DWGENGSTS } else { 0 };
                ((self.status | busy) >> 16) as u8
            }
            _ => (self.status >> 24) as u8,
        }
    }

    /// Fold events raised by the worker into STATUS. A soft trap needs the DMA
    /// lock to publish its address; if the worker holds it, the trap waits for
    /// the next tick.
    pub fn tick(&mut self, signals: &EngineSignals, dma: &Mutex<DmaEngine>) -> Option<bool> {
        if signals.take_end_of_dma() {
            self.status |= STATUS_ENDPRDMASTS;
        }

        if signals.softrap_pending().is_some() {
            let guard = match dma.try_lock() {
                Ok(guard) => Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => None,
            };
            if let Some(mut dma) = guard {
                if let Some(value) = signals.take_softrap() {
                    log::debug!("Soft trap: secaddress={:08X}", value);
                    dma.secaddress = value;
                    self.status |= STATUS_SOFTRAPEN;
                }
            }
        }

        self.update_irq()
    }

    pub fn vsync(&mut self, active: bool) -> Option<bool> {
        if active && !self.vsync_active && self.vsync_irq {
            self.status |= STATUS_VSYNCPEN;
        }
        self.vsync_active = active;
        self.update_irq()
    }

    pub fn line_compare(&mut self) -> Option<bool> {
        self.status |= STATUS_VLINEPEN;
        self.update_irq()
    }

    pub fn reset(&mut self) -> Option<bool> {
        self.status = STATUS_ENDPRDMASTS;
        self.update_irq()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_tracks_outstanding_blits() {
        let signals = EngineSignals::default();
        assert!(!signals.engine_busy());
        signals.count_submit();
        assert!(signals.engine_busy());
        signals.count_complete();
        assert!(!signals.engine_busy());
        signals.set_busy(true);
        assert!(signals.engine_busy());
    }

    #[test]
    fn softrap_irq_is_gated_by_ien() {
        let signals = EngineSignals::default();
        let dma = Mutex::new(DmaEngine::default());
        let mut latch = StatusLatch::default();

        signals.raise_end_of_dma();
        signals.raise_softrap(0x8000);
        assert_eq!(latch.tick(&signals, &dma), None);
        assert_eq!(latch.status & (STATUS_SOFTRAPEN | STATUS_ENDPRDMASTS), STATUS_SOFTRAPEN | STATUS_ENDPRDMASTS);
        assert_eq!(dma.lock().unwrap().secaddress, 0x8000);

        latch.write_ien(0xff);
        assert_eq!(latch.ien, IEN_WRITE_MASK);
        assert_eq!(latch.update_irq(), Some(true));

        latch.iclear(ICLEAR_SOFTRAPICLR as u8);
        assert_eq!(latch.update_irq(), Some(false));
    }

    #[test]
    fn softrap_waits_for_contended_dma_lock() {
        let signals = EngineSignals::default();
        let dma = Mutex::new(DmaEngine::default());
        let mut latch = StatusLatch::default();
        signals.raise_softrap(0x100);

        {
            let _held = dma.lock().unwrap();
            latch.tick(&signals, &dma);
            assert_eq!(latch.status & STATUS_SOFTRAPEN, 0);
            assert_eq!(signals.softrap_pending(), Some(0x100));
        }
        latch.tick(&signals, &dma);
        assert_ne!(latch.status & STATUS_SOFTRAPEN, 0);
        assert_eq!(signals.softrap_pending(), None);
    }

    #[test]
    fn status_bytes() {
        let mut latch = StatusLatch::default();
        latch.reset();
        latch.vsync_active = true;
        assert_eq!(latch.read_byte(0, false), 0x08);
        assert_eq!(latch.read_byte(2, false), 0x02);
        assert_eq!(latch.read_byte(2, true), 0x03);
    }

    #[test]
    fn vsync_pending_needs_crtc_enable() {
        let mut latch = StatusLatch::default();
        latch.vsync(true);
        assert_eq!(latch.status & STATUS_VSYNCPEN, 0);
        latch.vsync(false);
        latch.vsync_irq = true;
        assert_eq!(latch.vsync(true), Some(true));
    }
}

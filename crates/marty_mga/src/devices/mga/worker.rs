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

    devices::mga::worker.rs

    The background worker that executes queued writes and runs DMA.
    
    The worker sleeps on the queue's wake event. Once woken it executes queued
    entries in batches and, whenever a batch comes up empty, runs one DMA
    quantum. It goes back to sleep when both the queue and DMA are idle.
*/

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    thread::{self, JoinHandle},
};

use anyhow::Context;

use crate::{
    bus::BusMaster,
    devices::mga::{
        dma::{self, DmaEngine},
        dwgreg::RegisterEffect,
        engine::DrawingEngine,
        error::MgaError,
        fifo::{CommandConsumer, QueueEntry, QueueSignals},
        status::EngineSignals,
    },
};

/// State reachable from both the caller's thread and the worker.
pub struct SharedState {
    pub engine: Mutex<DrawingEngine>,
    pub dma: Mutex<DmaEngine>,
    pub queue: Arc<QueueSignals>,
    pub signals: Arc<EngineSignals>,
    fault: Mutex<Option<MgaError>>,
    faulted: AtomicBool,
    running: AtomicBool,
}

impl SharedState {
    pub fn new(engine: DrawingEngine, dma: DmaEngine, queue: Arc<QueueSignals>, signals: Arc<EngineSignals>) -> Self {
        Self {
            engine: Mutex::new(engine),
            dma: Mutex::new(dma),
            queue,
            signals,
            fault: Mutex::new(None),
            faulted: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    pub fn lock_engine(&self) -> MutexGuard<'_, DrawingEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock_dma(&self) -> MutexGuard<'_, DmaEngine> {
        self.dma.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The first engine fault, if one has occurred.
    pub fn fault(&self) -> Option<MgaError> {
        if !self.faulted.load(Ordering::Acquire) {
            return None;
        }
        self.fault.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_fault(&self, err: MgaError) {
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if fault.is_none() {
            *fault = Some(err);
            self.faulted.store(true, Ordering::Release);
        }
    }

    #[inline]
    pub(crate) fn faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the worker to exit and wake it so it notices.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.queue.wake.set();
    }
}

pub struct Worker {
    consumer: CommandConsumer,
    bus: Box<dyn BusMaster>,
    shared: Arc<SharedState>,
    batch_size: usize,
    dma_quantum: usize,
}

impl Worker {
    pub fn new(
        consumer: CommandConsumer,
        bus: Box<dyn BusMaster>,
        shared: Arc<SharedState>,
        batch_size: usize,
        dma_quantum: usize,
    ) -> Self {
        Self {
            consumer,
            bus,
            shared,
            batch_size,
            dma_quantum,
        }
    }

    /// Start the worker thread. A panic inside the worker is recorded as the
    /// device fault, and the queue is closed so no caller waits on it forever.
    pub fn spawn(self) -> anyhow::Result<JoinHandle<()>> {
        let shared = self.shared.clone();
        thread::Builder::new()
            .name("mga-worker".to_string())
            .spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run())) {
                    let msg = panic_message(payload.as_ref());
                    log::error!("Accelerator worker panicked: {}", msg);
                    shared.set_fault(MgaError::WorkerPanic(msg));
                }
                shared.queue.close();
            })
            .context("Couldn't spawn accelerator worker thread")
    }

    fn run(mut self) {
        log::debug!("Accelerator worker started");
        while self.shared.is_running() {
            self.shared.queue.not_full.set();
            self.shared.queue.wake.wait();
            self.shared.queue.wake.reset();

            while self.shared.is_running() && (!self.consumer.is_empty() || !self.shared.lock_dma().is_idle()) {
                if self.process_batch() == 0 {
                    self.run_dma();
                }
            }
        }
        log::debug!("Accelerator worker exiting");
    }

    /// Execute up to one batch of queued entries. Returns how many were taken.
    fn process_batch(&mut self) -> usize {
        let mut taken = 0;
        while taken < self.batch_size {
            let Some(entry) = self.consumer.pop()
            else {
                break;
            };
            if !self.shared.queue.discarding() && !self.shared.faulted() {
                self.execute(entry);
            }
            self.consumer.retire();
            taken += 1;
        }
        taken
    }

    fn execute(&mut self, entry: QueueEntry) {
        let result = self.shared.lock_engine().execute(entry);
        match result {
            Ok(RegisterEffect::None) => {}
            Ok(effect) => self.shared.lock_dma().apply_effect(effect, &self.shared.signals),
            Err(err) => self.fail(err),
        }
    }

    fn run_dma(&mut self) {
        if self.shared.faulted() {
            self.shared.lock_dma().reset();
            return;
        }
        let shared = &self.shared;
        if let Err(err) = dma::pump(
            &shared.dma,
            &shared.engine,
            self.bus.as_mut(),
            &shared.signals,
            self.dma_quantum,
        ) {
            self.fail(err);
        }
    }

    /// Record a fault. The rest of the queue is retired without executing and DMA stops.
    fn fail(&self, err: MgaError) {
        log::error!("Drawing engine fault: {}", err);
        self.shared.set_fault(err);
        self.shared.lock_dma().reset();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    }
    else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    }
    else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::NullBus,
        devices::mga::{
            fifo::{command_queue, CommandProducer},
            regs::*,
            testutil::engine_with_recorder,
        },
    };

    fn start(fifo_size: usize) -> (CommandProducer, Arc<SharedState>, JoinHandle<()>) {
        let (producer, consumer, queue) = command_queue(fifo_size);
        let (engine, _log) = engine_with_recorder();
        let signals = engine.signals.clone();
        let shared = Arc::new(SharedState::new(engine, DmaEngine::default(), queue, signals));
        let handle = Worker::new(consumer, Box::new(NullBus), shared.clone(), 4, 16)
            .spawn()
            .unwrap();
        (producer, shared, handle)
    }

    #[test]
    fn executes_queued_writes_in_order() {
        let (mut producer, shared, handle) = start(8);
        for i in 0..100 {
            producer.enqueue(QueueEntry::long(REG_FCOL, i));
            producer.enqueue(QueueEntry::long(REG_BCOL, i * 2));
            shared.queue.wake.set();
        }
        shared.queue.drain();
        {
            let engine = shared.lock_engine();
            assert_eq!(engine.registers().fcol, 99);
            assert_eq!(engine.registers().bcol, 198);
        }
        shared.stop();
        handle.join().unwrap();
    }

    #[test]
    fn fault_discards_remaining_work() {
        let (mut producer, shared, handle) = start(16);
        producer.enqueue(QueueEntry::long(REG_DWGCTL | START_BLIT_ALIAS, 0x5));
        producer.enqueue(QueueEntry::long(REG_FCOL, 0x1234));
        shared.queue.drain();

        assert!(matches!(shared.fault(), Some(MgaError::UnknownOpcode { opcode: 5, .. })));
        assert_eq!(shared.lock_engine().registers().fcol, 0);
        shared.stop();
        handle.join().unwrap();
    }
}

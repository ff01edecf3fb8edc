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

    devices::mga::fifo.rs

    Command queue between the register decoder and the drawing worker.
    
    The ring is a single-producer single-consumer ringbuf. Blocking waits
    (full ring, drain, idle worker) are built on Event, a flag guarded by a
    mutex and condition variable.
*/

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Condvar,
        Mutex,
        PoisonError,
    },
    time::Duration,
};

use ringbuf::{Consumer, Producer, RingBuffer};

/// Upper bound on a single sleep while waiting for room in the ring.
const ENQUEUE_WAIT: Duration = Duration::from_millis(1);
/// Upper bound on a single sleep while waiting for the queue to drain.
const DRAIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    CtrlByte,
    CtrlLong,
    PixelFeed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub addr: u16,
    pub value: u32,
    pub kind: EntryKind,
}

impl QueueEntry {
    pub fn byte(addr: u16, value: u8) -> Self {
        Self {
            addr,
            value: value as u32,
            kind: EntryKind::CtrlByte,
        }
    }
    pub fn long(addr: u16, value: u32) -> Self {
        Self {
            addr,
            value,
            kind: EntryKind::CtrlLong,
        }
    }
    pub fn feed(value: u32) -> Self {
        Self {
            addr: 0,
            value,
            kind: EntryKind::PixelFeed,
        }
    }
}

/// A manual-reset event.
#[derive(Default)]
pub struct Event {
    flag: Mutex<bool>,
    cvar: Condvar,
}

impl Event {
    pub fn set(&self) {
        let mut flag = self.flag.lock().unwrap_or_else(PoisonError::into_inner);
        *flag = true;
        self.cvar.notify_all();
    }

    pub fn reset(&self) {
        *self.flag.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let flag = self.flag.lock().unwrap_or_else(PoisonError::into_inner);
        let _flag = self
            .cvar
            .wait_while(flag, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Returns true if the event was set before the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().unwrap_or_else(PoisonError::into_inner);
        let (flag, _) = self
            .cvar
            .wait_timeout_while(flag, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *flag
    }
}

/// State shared by both ends of the queue.
#[derive(Default)]
pub struct QueueSignals {
    /// Entries enqueued but not yet retired by the worker. An entry is retired
    /// only after it has been executed.
    pending: AtomicUsize,
    /// Worker should look for work.
    pub wake: Event,
    /// Consumer made room.
    pub not_full: Event,
    /// `pending` reached zero.
    pub idle: Event,
    /// While set, the consumer retires entries without executing them.
    pub discard: AtomicBool,
    /// The consumer has exited. Nothing will be retired again.
    closed: AtomicBool,
}

impl QueueSignals {
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    #[inline]
    pub fn discarding(&self) -> bool {
        self.discard.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the consumer as gone and release anyone waiting on it.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_full.set();
        self.idle.set();
    }

    /// Block until every enqueued entry has been retired, or the consumer has
    /// exited. Does not wait for DMA or for an image load to receive its
    /// remaining words.
    pub fn drain(&self) {
        while !self.is_empty() && !self.is_closed() {
            self.idle.reset();
            if self.is_empty() {
                break;
            }
            self.wake.set();
            self.idle.wait_timeout(DRAIN_WAIT);
        }
    }
}

pub fn command_queue(size: usize) -> (CommandProducer, CommandConsumer, std::sync::Arc<QueueSignals>) {
    let ring: RingBuffer<QueueEntry> = RingBuffer::new(size);
    let (producer, consumer) = ring.split();
    let signals = std::sync::Arc::new(QueueSignals::default());
    (
        CommandProducer {
            producer,
            signals: signals.clone(),
            stalls: 0,
        },
        CommandConsumer {
            consumer,
            signals: signals.clone(),
        },
        signals,
    )
}

pub struct CommandProducer {
    producer: Producer<QueueEntry>,
    signals: std::sync::Arc<QueueSignals>,
    stalls: u64,
}

impl CommandProducer {
    /// Append an entry, blocking while the ring is full. Returns the number of
    /// unretired entries after the append. If the consumer has exited, an entry
    /// that does not fit is dropped.
    pub fn enqueue(&mut self, entry: QueueEntry) -> usize {
        // Count before publishing so the consumer can never retire an entry
        // that has not been counted.
        let pending = self.signals.pending.fetch_add(1, Ordering::AcqRel) + 1;
        let mut entry = entry;
        loop {
            match self.producer.push(entry) {
                Ok(()) => break,
                Err(_) if self.signals.is_closed() => {
                    self.signals.pending.fetch_sub(1, Ordering::AcqRel);
                    break;
                }
                Err(rejected) => {
                    entry = rejected;
                    self.stalls += 1;
                    self.signals.not_full.reset();
                    if self.producer.is_full() {
                        self.signals.wake.set();
                        self.signals.not_full.wait_timeout(ENQUEUE_WAIT);
                    }
                }
            }
        }
        pending
    }

    pub fn signals(&self) -> &QueueSignals {
        &self.signals
    }

    /// Number of times an enqueue found the ring full.
    pub fn stalls(&self) -> u64 {
        self.stalls
    }
}

pub struct CommandConsumer {
    consumer: Consumer<QueueEntry>,
    signals: std::sync::Arc<QueueSignals>,
}

impl CommandConsumer {
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.consumer.pop();
        if entry.is_some() {
            self.signals.not_full.set();
        }
        entry
    }

    /// Mark one popped entry as executed.
    pub fn retire(&self) {
        if self.signals.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.signals.idle.set();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn signals(&self) -> &QueueSignals {
        &self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::{sync::Arc, thread};

    fn spawn_consumer(mut consumer: CommandConsumer, count: usize, delay: Option<Duration>) -> thread::JoinHandle<Vec<QueueEntry>> {
        thread::spawn(move || {
            let mut seen = Vec::with_capacity(count);
            while seen.len() < count {
                match consumer.pop() {
                    Some(entry) => {
                        if let Some(delay) = delay {
                            thread::sleep(delay);
                        }
                        seen.push(entry);
                        consumer.retire();
                    }
                    None => {
                        consumer.signals().wake.wait_timeout(Duration::from_millis(1));
                        consumer.signals().wake.reset();
                    }
                }
            }
            seen
        })
    }

    #[test]
    fn entries_arrive_in_enqueue_order() {
        let mut rng = StdRng::seed_from_u64(0x4d47_4121);
        let (mut producer, consumer, signals) = command_queue(256);

        let sent: Vec<QueueEntry> = (0..2000)
            .map(|_| match rng.random_range(0..3) {
                0 => QueueEntry::byte(0x1c00 + rng.random_range(0..0x200), rng.random()),
                1 => QueueEntry::long(0x1c00 + (rng.random_range(0..0x80) << 2), rng.random()),
                _ => QueueEntry::feed(rng.random()),
            })
            .collect();

        let handle = spawn_consumer(consumer, sent.len(), None);
        for entry in &sent {
            producer.enqueue(*entry);
            signals.wake.set();
        }
        signals.drain();
        let seen = handle.join().unwrap();
        assert_eq!(seen, sent);
        assert!(signals.is_empty());
    }

    #[test]
    fn full_ring_applies_backpressure_without_loss() {
        let (mut producer, consumer, signals) = command_queue(4);
        let handle = spawn_consumer(consumer, 64, Some(Duration::from_micros(200)));

        for i in 0..64 {
            producer.enqueue(QueueEntry::long(0x1c24, i));
        }
        signals.drain();
        let seen = handle.join().unwrap();
        assert_eq!(seen.len(), 64);
        assert!(seen.iter().enumerate().all(|(i, e)| e.value == i as u32));
        assert!(producer.stalls() > 0);
    }

    #[test]
    fn drain_returns_immediately_when_empty() {
        let (_producer, _consumer, signals) = command_queue(16);
        signals.drain();
        assert!(signals.is_empty());
    }

    #[test]
    fn closed_queue_releases_waiters() {
        let (mut producer, consumer, signals) = command_queue(2);
        producer.enqueue(QueueEntry::long(0x1c24, 1));
        producer.enqueue(QueueEntry::long(0x1c24, 2));
        drop(consumer);
        signals.close();

        producer.enqueue(QueueEntry::long(0x1c24, 3));
        signals.drain();
        assert_eq!(signals.pending(), 2);
        assert!(signals.is_closed());
    }

    #[test]
    fn event_wait_timeout_reports_state() {
        let event = Arc::new(Event::default());
        assert!(!event.wait_timeout(Duration::from_millis(1)));
        let setter = {
            let event = event.clone();
            thread::spawn(move || event.set())
        };
        setter.join().unwrap();
        assert!(event.wait_timeout(Duration::from_millis(1)));
        event.reset();
        assert!(!event.is_set());
    }
}

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

    benches::mga_bench.rs

    Benchmarks for the graphics accelerator.
    
*/

use marty_mga::{
    bus::{IrqFlag, NullBus, NullVga},
    devices::mga::regs::*,
    AccessWidth,
    MgaCard,
    MgaConfig,
};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

const BOP_SRC: u32 = 0xc << 16;

fn new_card() -> MgaCard {
    let config = MgaConfig {
        wake_delay_us: 0.0,
        ..Default::default()
    };
    MgaCard::new(
        config,
        Box::new(NullBus),
        Box::new(IrqFlag::new()),
        Box::new(NullVga),
    )
    .unwrap()
}

fn write(card: &mut MgaCard, reg: u16, val: u32) {
    card.write(reg as u32, val, AccessWidth::Long);
}

pub fn mga_bench(c: &mut Criterion) {
    c.bench_function("mga_bench_trap_fill_256x256", |b| {
        let mut card = new_card();
        for (reg, val) in [
            (REG_MACCESS, 1),
            (REG_PITCH, 1024),
            (REG_CXBNDRY, 1023 << 16),
            (REG_YTOP, 0),
            (REG_YBOT, 1024 * 1024),
            (REG_FCOL, 0x1234),
        ] {
            write(&mut card, reg, val);
        }

        b.iter(|| {
            write(&mut card, REG_FXBNDRY, 256 << 16);
            write(&mut card, REG_YDSTLEN, 256);
            write(
                &mut card,
                REG_DWGCTL | START_BLIT_ALIAS,
                Opcode::Trap as u32 | DWGCTL_SOLID | DWGCTL_ARZERO | BOP_SRC,
            );
            card.drain();
        });
    });

    c.bench_function("mga_bench_queue_10k_writes", |b| {
        let mut card = new_card();

        b.iter(|| {
            for i in 0..10_000u32 {
                write(&mut card, REG_FCOL, black_box(i));
            }
            card.drain();
        });
    });
}

criterion_group!(benches, mga_bench);
criterion_main!(benches);

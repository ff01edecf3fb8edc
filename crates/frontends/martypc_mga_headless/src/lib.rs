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

    martypc_mga_headless::lib.rs

    Headless front-end for the graphics accelerator core. Reads the
    configuration file and a command script, plays the script against a card
    and reports the results.
*/

#![forbid(unsafe_code)]

pub mod script;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::{bail, Context};
use colored::Colorize;

use marty_config::ConfigFileParams;
use marty_mga::{
    bus::{InterruptLine, NullVga, SystemMemory},
    MgaCard,
};

use crate::script::{Script, ScriptResult, ScriptRunner};

/// Interrupt line that logs its transitions.
#[derive(Clone, Default)]
pub struct LoggingIrq {
    raised: Arc<AtomicU32>,
    level: bool,
}

impl LoggingIrq {
    pub fn raise_count(&self) -> u32 {
        self.raised.load(Ordering::Acquire)
    }
}

impl InterruptLine for LoggingIrq {
    fn set_level(&mut self, asserted: bool) {
        if asserted && !self.level {
            self.raised.fetch_add(1, Ordering::AcqRel);
        }
        if asserted != self.level {
            log::debug!("INTA# {}", if asserted { "asserted" } else { "deasserted" });
        }
        self.level = asserted;
    }
}

pub fn run() {
    env_logger::init();

    let config = match marty_config::read_config_file("./martypc_mga.toml") {
        Ok(config) => config,
        Err(e) => match e.downcast_ref::<std::io::Error>() {
            Some(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "Configuration file not found! Please create martypc_mga.toml in the current directory \
                               or provide the path to configuration file with --configfile."
                );
                std::process::exit(1);
            }
            Some(e) => {
                eprintln!("Unknown IO error reading configuration file:\n{}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!("Failed to read configuration file:\n{}", e);
                std::process::exit(1);
            }
        },
    };

    match run_script(&config) {
        Ok(result) if result.mismatches.is_empty() => {}
        Ok(_) => std::process::exit(2),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red(), e);
            std::process::exit(1);
        }
    }
}

/// Build a card from `config`, run its script and print a summary.
pub fn run_script(config: &ConfigFileParams) -> anyhow::Result<ScriptResult> {
    let Some(script_path) = config.headless.script.as_ref()
    else {
        bail!("No command script given. Set headless.script or pass --script.");
    };
    let script = Script::from_file(script_path)?;
    log::debug!("Loaded {} steps from {}", script.steps.len(), script_path.display());

    let memory = SystemMemory::new(config.headless.memory_size);
    let irq = LoggingIrq::default();
    let mut card = MgaCard::new(
        config.accelerator.clone(),
        Box::new(memory.clone()),
        Box::new(irq.clone()),
        Box::new(NullVga),
    )?;

    let start = Instant::now();
    let result = ScriptRunner::new(&mut card, memory, config.headless.run_slice_us)
        .stop_on_mismatch(config.headless.stop_on_mismatch)
        .run(&script);
    card.drain();
    let elapsed = start.elapsed();

    for m in &result.mismatches {
        println!(
            "{} step {}: read {:04X} = {:08X}, expected {:08X}",
            "FAIL".red(),
            m.step,
            m.addr,
            m.actual,
            m.expected
        );
    }

    let counters = card.counters();
    let stats = card.stats();
    println!(
        "{} steps in {:.3}ms, {} reads, {} mismatches",
        result.steps,
        elapsed.as_secs_f64() * 1000.0,
        result.reads.len(),
        result.mismatches.len()
    );
    println!(
        "blits: submit={} submit_dma={} complete={} pixels={} words={}",
        counters.submit, counters.submit_dma, counters.complete, stats.pixels, stats.words_fed
    );
    println!(
        "status={:08X} irqs={} fifo stalls={}",
        card.status(),
        irq.raise_count(),
        card.fifo_stalls()
    );
    println!("vram md5: {}", card.vram_digest());

    if let Some(path) = config.headless.dump_vram.as_ref() {
        dump_vram(&mut card, path)?;
    }

    if result.mismatches.is_empty() {
        println!("{}", "PASS".green());
    }
    Ok(result)
}

fn dump_vram(card: &mut MgaCard, path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, card.vram_bytes()).with_context(|| format!("Couldn't write VRAM dump {}", path.display()))?;
    println!("VRAM written to {}", path.display());
    Ok(())
}

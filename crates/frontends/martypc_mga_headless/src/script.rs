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

    martypc_mga_headless::script.rs

    Command scripts: an ordered list of register accesses, host memory loads
    and clock steps, played against an accelerator card.
*/

use std::path::Path;

use anyhow::Context;
use serde_derive::Deserialize;

use marty_mga::{bus::SystemMemory, AccessWidth, DeviceRunTimeUnit, MgaCard};

#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    Byte,
    #[default]
    Long,
}

impl From<Width> for AccessWidth {
    fn from(width: Width) -> Self {
        match width {
            Width::Byte => AccessWidth::Byte,
            Width::Long => AccessWidth::Long,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Step {
    Write {
        addr: u32,
        value: u32,
        #[serde(default)]
        width: Width,
    },
    Read {
        addr: u32,
        #[serde(default)]
        width: Width,
        expect: Option<u32>,
        /// Only these bits of the value are compared.
        mask: Option<u32>,
    },
    /// Load dwords into host memory for DMA.
    Memory { addr: u32, words: Vec<u32> },
    Run { us: f64 },
    Drain,
    Reset,
}

#[derive(Debug, Default, Deserialize)]
pub struct Script {
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Script {
    pub fn parse(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("Couldn't parse command script")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("Couldn't read script {}", path.display()))?;
        Self::parse(&text)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mismatch {
    pub step: usize,
    pub addr: u32,
    pub expected: u32,
    pub actual: u32,
}

#[derive(Debug, Default)]
pub struct ScriptResult {
    pub steps: usize,
    pub reads: Vec<(u32, u32)>,
    pub mismatches: Vec<Mismatch>,
}

pub struct ScriptRunner<'a> {
    card: &'a mut MgaCard,
    memory: SystemMemory,
    run_slice_us: f64,
    stop_on_mismatch: bool,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(card: &'a mut MgaCard, memory: SystemMemory, run_slice_us: f64) -> Self {
        Self {
            card,
            memory,
            run_slice_us,
            stop_on_mismatch: false,
        }
    }

    pub fn stop_on_mismatch(mut self, stop: bool) -> Self {
        self.stop_on_mismatch = stop;
        self
    }

    pub fn run(&mut self, script: &Script) -> ScriptResult {
        let mut result = ScriptResult::default();

        for (i, step) in script.steps.iter().enumerate() {
            log::trace!("Step {}: {:?}", i, step);
            result.steps += 1;
            match step {
                Step::Write { addr, value, width } => self.card.write(*addr, *value, (*width).into()),
                Step::Read {
                    addr,
                    width,
                    expect,
                    mask,
                } => {
                    let actual = self.card.read(*addr, (*width).into());
                    result.reads.push((*addr, actual));
                    if let Some(expected) = expect {
                        let mask = mask.unwrap_or(u32::MAX);
                        if actual & mask != expected & mask {
                            log::warn!(
                                "Step {}: read {:04X} returned {:08X}, expected {:08X}",
                                i,
                                addr,
                                actual,
                                expected
                            );
                            result.mismatches.push(Mismatch {
                                step: i,
                                addr: *addr,
                                expected: *expected,
                                actual,
                            });
                            if self.stop_on_mismatch {
                                break;
                            }
                        }
                    }
                }
                Step::Memory { addr, words } => self.memory.write_u32s(*addr, words),
                Step::Run { us } => {
                    let mut left = *us;
                    while left > 0.0 {
                        let slice = left.min(self.run_slice_us);
                        self.card.run(DeviceRunTimeUnit::Microseconds(slice));
                        left -= slice;
                    }
                }
                Step::Drain => self.card.drain(),
                Step::Reset => self.card.reset(),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marty_mga::{
        bus::{IrqFlag, NullVga},
        MgaConfig,
    };

    const SCRIPT: &str = r#"
        [[step]]
        op = "write"
        addr = 0x1c24
        value = 0x1234

        [[step]]
        op = "memory"
        addr = 0x1000
        words = [0x08, 0xbeef]

        [[step]]
        op = "write"
        addr = 0x1e58
        value = 0x1000

        [[step]]
        op = "write"
        addr = 0x1e5c
        value = 0x1008

        [[step]]
        op = "drain"

        [[step]]
        op = "run"
        us = 250.0

        [[step]]
        op = "read"
        addr = 0x1e14
        expect = 0x20000
        mask = 0x20000

        [[step]]
        op = "read"
        addr = 0x1e58
        expect = 0x1008

        [[step]]
        op = "read"
        addr = 0x1e10
        width = "byte"
        expect = 0x41
    "#;

    fn card(memory: &SystemMemory) -> MgaCard {
        let config = MgaConfig {
            vram_size: 0x10_0000,
            ..Default::default()
        };
        MgaCard::new(
            config,
            Box::new(memory.clone()),
            Box::new(IrqFlag::new()),
            Box::new(NullVga),
        )
        .unwrap()
    }

    #[test]
    fn parses_steps() {
        let script = Script::parse(SCRIPT).unwrap();
        assert_eq!(script.steps.len(), 9);
        assert_eq!(
            script.steps[0],
            Step::Write {
                addr: 0x1c24,
                value: 0x1234,
                width: Width::Long
            }
        );
        assert_eq!(script.steps[4], Step::Drain);
    }

    #[test]
    fn reports_mismatched_reads() {
        let script = Script::parse(SCRIPT).unwrap();
        let memory = SystemMemory::new(0x1_0000);
        let mut card = card(&memory);
        let result = ScriptRunner::new(&mut card, memory, 100.0).run(&script);

        assert_eq!(result.steps, 9);
        assert_eq!(card.register(0x1c20), 0xbeef);
        assert_eq!(result.reads[1], (0x1e58, 0x1008));
        // FIFOSTATUS byte 0 is 64, not 0x41.
        assert_eq!(
            result.mismatches,
            vec![Mismatch {
                step: 8,
                addr: 0x1e10,
                expected: 0x41,
                actual: 64
            }]
        );
    }
}

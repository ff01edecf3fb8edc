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

    devices::mga::config.rs

    Accelerator configuration.
*/

use std::path::PathBuf;

use anyhow::{bail, Error};
use serde_derive::{Deserialize, Serialize};

use crate::devices::mga::vram::AddressPolicy;

const fn _default_vram_size() -> usize {
    0x40_0000
}
const fn _default_fifo_size() -> usize {
    65536
}
const fn _default_fifo_threshold() -> usize {
    0xe000
}
const fn _default_batch_size() -> usize {
    100
}
const fn _default_dma_quantum() -> usize {
    256
}
const fn _default_tick_us() -> f64 {
    100.0
}
const fn _default_wake_delay_us() -> f64 {
    100.0
}

pub const MIN_VRAM_SIZE: usize = 0x1_0000;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MgaConfig {
    #[serde(default = "_default_vram_size")]
    pub vram_size: usize,
    #[serde(default)]
    pub vram_policy: AddressPolicy,
    #[serde(default = "_default_fifo_size")]
    pub fifo_size: usize,
    #[serde(default = "_default_fifo_threshold")]
    pub fifo_threshold: usize,
    #[serde(default = "_default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "_default_dma_quantum")]
    pub dma_quantum: usize,
    #[serde(default = "_default_tick_us")]
    pub tick_us: f64,
    #[serde(default = "_default_wake_delay_us")]
    pub wake_delay_us: f64,
    #[serde(default)]
    pub trace_file: Option<PathBuf>,
}

impl Default for MgaConfig {
    fn default() -> Self {
        Self {
            vram_size: _default_vram_size(),
            vram_policy: AddressPolicy::default(),
            fifo_size: _default_fifo_size(),
            fifo_threshold: _default_fifo_threshold(),
            batch_size: _default_batch_size(),
            dma_quantum: _default_dma_quantum(),
            tick_us: _default_tick_us(),
            wake_delay_us: _default_wake_delay_us(),
            trace_file: None,
        }
    }
}

impl MgaConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.vram_size.is_power_of_two() || self.vram_size < MIN_VRAM_SIZE {
            bail!(
                "vram_size must be a power of two of at least {:#X} bytes (got {:#X})",
                MIN_VRAM_SIZE,
                self.vram_size
            );
        }
        if !self.fifo_size.is_power_of_two() {
            bail!("fifo_size must be a power of two (got {})", self.fifo_size);
        }
        if self.fifo_threshold >= self.fifo_size {
            bail!(
                "fifo_threshold ({}) must be below fifo_size ({})",
                self.fifo_threshold,
                self.fifo_size
            );
        }
        if self.batch_size == 0 {
            bail!("batch_size must be non-zero");
        }
        if self.dma_quantum == 0 {
            bail!("dma_quantum must be non-zero");
        }
        if self.tick_us.is_nan() || self.tick_us <= 0.0 {
            bail!("tick_us must be positive (got {})", self.tick_us);
        }
        if self.wake_delay_us < 0.0 {
            bail!("wake_delay_us must not be negative (got {})", self.wake_delay_us);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = MgaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vram_size, 0x400000);
        assert_eq!(config.vram_policy, AddressPolicy::Wrap);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: MgaConfig = toml::from_str(
            r#"
            vram_size = 0x200000
            vram_policy = "clip"
            wake_delay_us = 0.0
            "#,
        )
        .unwrap();
        assert_eq!(config.vram_size, 0x200000);
        assert_eq!(config.vram_policy, AddressPolicy::Clip);
        assert_eq!(config.fifo_size, 65536);
        assert_eq!(config.wake_delay_us, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_sizes() {
        let mut config = MgaConfig::default();
        config.vram_size = 0x30_0000;
        assert!(config.validate().is_err());

        let mut config = MgaConfig::default();
        config.fifo_size = 1000;
        assert!(config.validate().is_err());

        let mut config = MgaConfig::default();
        config.dma_quantum = 0;
        assert!(config.validate().is_err());
    }
}

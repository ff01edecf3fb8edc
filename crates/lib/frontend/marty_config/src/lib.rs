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

    --------------------------------------------------------------------------
*/

//! The `marty_config` crate parses the accelerator runner's configuration file and overlays
//! command line arguments on top of it. Command line arguments take priority over the
//! configuration file.
//!
//! Features:
//! - `use_bpaf`: Enable BPAF support for command line argument parsing.

#[cfg(feature = "use_bpaf")]
mod bpaf_config;

use std::path::{Path, PathBuf};

#[cfg(feature = "use_bpaf")]
pub use bpaf_config::{cli_args, CmdLineArgs};

use cfg_if::cfg_if;
use marty_mga::MgaConfig;
use serde_derive::Deserialize;

const fn _default_memory_size() -> usize {
    0x10_0000
}
const fn _default_run_slice_us() -> f64 {
    100.0
}

#[derive(Debug, Deserialize)]
pub struct HeadlessConfig {
    /// Size of the host memory the accelerator can bus-master from.
    #[serde(default = "_default_memory_size")]
    pub memory_size: usize,
    /// A `run` step advances the card in slices of this many microseconds.
    #[serde(default = "_default_run_slice_us")]
    pub run_slice_us: f64,
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default)]
    pub dump_vram: Option<PathBuf>,
    #[serde(default)]
    pub stop_on_mismatch: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            memory_size: _default_memory_size(),
            run_slice_us: _default_run_slice_us(),
            script: None,
            dump_vram: None,
            stop_on_mismatch: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub accelerator: MgaConfig,
    #[serde(default)]
    pub headless: HeadlessConfig,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(script) = shell_args.script {
            self.headless.script = Some(script);
        }
        if let Some(dump_vram) = shell_args.dump_vram {
            self.headless.dump_vram = Some(dump_vram);
        }
        if let Some(trace_file) = shell_args.trace_file {
            self.accelerator.trace_file = Some(trace_file);
        }
        if shell_args.immediate_wake {
            self.accelerator.wake_delay_us = 0.0;
        }
        self.headless.stop_on_mismatch |= shell_args.stop_on_mismatch;
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.accelerator.validate()?;
        if self.headless.memory_size == 0 {
            anyhow::bail!("headless.memory_size must be non-zero");
        }
        if self.headless.run_slice_us.is_nan() || self.headless.run_slice_us <= 0.0 {
            anyhow::bail!("headless.run_slice_us must be positive");
        }
        Ok(())
    }
}

pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams;

    toml_args = toml::from_str(toml_string.as_ref())?;

    // Command line arguments override config file arguments
    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            toml_args.overlay(shell_args);
        }
    }

    toml_args.validate()?;
    Ok(toml_args)
}

fn shell_args() -> CmdLineArgs {
    cfg_if! {
        if #[cfg(feature = "use_bpaf")] {
            log::debug!("Reading command line arguments...");
            cli_args().run()
        } else {
            log::debug!("Argument reading disabled...");
            CmdLineArgs::default()
        }
    }
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    let shell_args = shell_args();

    // Allow configuration file path to be overridden by command line argument 'config_file'
    let toml_string = if let Some(configfile_path) = shell_args.config_file.as_ref() {
        std::fs::read_to_string(configfile_path)?
    }
    else {
        std::fs::read_to_string(default_path)?
    };

    read_config(toml_string, shell_args)
}

/// Read the TOML configuration from a string, parse and overlay command line arguments.
pub fn read_config_string(toml_string: impl AsRef<str>) -> Result<ConfigFileParams, anyhow::Error> {
    read_config(toml_string, shell_args())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_optional() {
        let config = read_config("", CmdLineArgs::default()).unwrap();
        assert_eq!(config.accelerator.fifo_size, 65536);
        assert_eq!(config.headless.memory_size, 0x10_0000);
        assert!(config.headless.script.is_none());
    }

    #[test]
    fn command_line_wins() {
        let toml = r#"
            [accelerator]
            vram_size = 0x100000
            wake_delay_us = 50.0

            [headless]
            script = "from_file.toml"
        "#;
        let args = CmdLineArgs {
            script: Some(PathBuf::from("from_args.toml")),
            immediate_wake: true,
            ..Default::default()
        };
        let config = read_config(toml, args).unwrap();
        assert_eq!(config.accelerator.vram_size, 0x100000);
        assert_eq!(config.accelerator.wake_delay_us, 0.0);
        assert_eq!(config.headless.script, Some(PathBuf::from("from_args.toml")));
    }

    #[test]
    fn invalid_accelerator_config_is_rejected() {
        let toml = r#"
            [accelerator]
            fifo_size = 1000
        "#;
        assert!(read_config(toml, CmdLineArgs::default()).is_err());
    }
}

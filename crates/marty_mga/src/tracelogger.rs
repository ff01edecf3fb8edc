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

    tracelogger.rs

    A trace sink that can be handed to the accelerator. The worker thread
    writes one line per dispatched blit and per DMA state change. Tracing
    is separate from the log facade so that a long trace can go to a file
    without flooding the console.
*/

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::Context;

#[derive(Debug, Default)]
pub enum TraceLogger {
    FileWriter(BufWriter<File>),
    Console,
    /// Keep lines in memory. Used by tests and by the headless runner's summary.
    Capture(Vec<String>),
    #[default]
    None,
}

impl TraceLogger {
    pub fn from_filename<S: AsRef<Path>>(filename: S) -> anyhow::Result<Self> {
        let path = filename.as_ref();
        let file = File::create(path).with_context(|| format!("Couldn't create trace log {}", path.display()))?;
        Ok(TraceLogger::FileWriter(BufWriter::new(file)))
    }

    #[inline(always)]
    pub fn println<S: AsRef<str> + std::fmt::Display>(&mut self, msg: S) {
        match self {
            TraceLogger::FileWriter(buf) => {
                _ = buf.write_all(msg.as_ref().as_bytes());
                _ = buf.write_all("\n".as_bytes());
            }
            TraceLogger::Console => println!("{}", msg),
            TraceLogger::Capture(lines) => lines.push(msg.to_string()),
            TraceLogger::None => (),
        }
    }

    pub fn flush(&mut self) {
        if let TraceLogger::FileWriter(file) = self {
            if let Err(e) = file.flush() {
                log::error!("Failed to flush trace log: {}", e);
            }
        }
    }

    /// Lines collected by a `Capture` logger. Other variants have none.
    pub fn captured(&self) -> &[String] {
        match self {
            TraceLogger::Capture(lines) => lines,
            _ => &[],
        }
    }

    #[inline(always)]
    pub fn is_some(&self) -> bool {
        !matches!(*self, TraceLogger::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_lines() {
        let mut trace = TraceLogger::Capture(Vec::new());
        trace.println("BLIT TRAP len=10");
        trace.println(format!("DMA {} -> {}", "IDLE", "PRI"));
        assert_eq!(trace.captured().len(), 2);
        assert_eq!(trace.captured()[1], "DMA IDLE -> PRI");
    }

    #[test]
    fn none_is_silent() {
        let mut trace = TraceLogger::default();
        trace.println("ignored");
        assert!(!trace.is_some());
        assert!(trace.captured().is_empty());
    }
}

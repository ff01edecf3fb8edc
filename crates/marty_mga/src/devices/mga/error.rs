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

    devices::mga::error.rs

    Error types for the drawing engine.
*/

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MgaError {
    #[error("Unknown drawing opcode {opcode:#x} (DWGCTL: {dwgctl:08X})")]
    UnknownOpcode { opcode: u8, dwgctl: u32 },
    #[error("Unsupported access type {atype:#x} for {op}")]
    UnknownAccessType { op: &'static str, atype: u8 },
    #[error("Unsupported blit mode {bltmod:#x} for {op}")]
    UnknownBlitMode { op: &'static str, bltmod: u8 },
    #[error("Unsupported pixel width {0} for {1}")]
    UnsupportedPixelWidth(u32, &'static str),
    #[error("Unsupported texture format {0:#x}")]
    UnsupportedTextureFormat(u32),
    #[error("Unsupported texture control combination {0:#x}")]
    UnsupportedTextureMode(u32),
    #[error("Source data written while {0} is running")]
    UnexpectedFeed(&'static str),
    #[error("Unsupported DMA transfer mode {0} at {1:08X}")]
    UnsupportedDmaMode(&'static str, u32),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Snapshot error: {0}")]
    Snapshot(String),
    #[error("Worker thread panicked: {0}")]
    WorkerPanic(String),
}

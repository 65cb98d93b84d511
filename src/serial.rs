//! Certificate serial numbers
//!
//! The serial file under the CA directory holds the last serial number handed
//! out, as lowercase hex followed by a newline. Loading resumes one past it, so
//! a serial is never reused across runs. The counter advances only in memory;
//! [`SerialGuard`] makes sure it reaches disk on every exit path of a run.

use crate::error::ProvisionError;
use crate::layout::SERIAL_FILE;
use anyhow::{Context, Result};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialCounter {
    next: u64,
}

impl SerialCounter {
    /// Start from 1 with nothing issued yet.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Read the counter from `<ca_dir>/serial`. Only the first line is read.
    pub fn load(ca_dir: &Path) -> Result<Self> {
        let path = ca_dir.join(SERIAL_FILE);
        if !path.is_file() {
            debug!(path = %path.display(), "no serial file, starting at 1");
            return Ok(Self::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read serial file {}", path.display()))?;
        let first = content.lines().next().unwrap_or("").trim();
        let last_issued = u64::from_str_radix(first, 16).map_err(|_| ProvisionError::MalformedSerial {
            path: path.clone(),
            content: first.to_string(),
        })?;
        let next = last_issued
            .checked_add(1)
            .ok_or(ProvisionError::SerialExhausted { last: last_issued })?;
        Ok(Self { next })
    }

    /// Hand out the current serial and advance. Does not touch disk.
    pub fn next(&mut self) -> Result<u64> {
        let serial = self.next;
        self.next = serial
            .checked_add(1)
            .ok_or(ProvisionError::SerialExhausted {
                last: self.last_issued(),
            })?;
        Ok(serial)
    }

    /// The serial the next issuance will receive.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Highest serial handed out so far, 0 when none.
    pub fn last_issued(&self) -> u64 {
        self.next - 1
    }

    /// Write the counter to `<ca_dir>/serial`, creating the directory if needed.
    pub fn flush(&self, ca_dir: &Path) -> Result<()> {
        fs::create_dir_all(ca_dir)
            .with_context(|| format!("Failed to create CA directory {}", ca_dir.display()))?;
        let path = ca_dir.join(SERIAL_FILE);
        fs::write(&path, format!("{:x}\n", self.last_issued()))
            .with_context(|| format!("Failed to write serial file {}", path.display()))?;
        debug!(path = %path.display(), last_issued = self.last_issued(), "serial flushed");
        Ok(())
    }
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the counter for the span of a run and flushes it when the run ends.
///
/// Call [`SerialGuard::finish`] to flush and observe the result. If the guard
/// is dropped without it (early return, panic unwinding), the flush still
/// happens and a failure is logged.
#[derive(Debug)]
pub struct SerialGuard {
    counter: SerialCounter,
    ca_dir: PathBuf,
    flushed: bool,
}

impl SerialGuard {
    pub fn new(counter: SerialCounter, ca_dir: impl Into<PathBuf>) -> Self {
        Self {
            counter,
            ca_dir: ca_dir.into(),
            flushed: false,
        }
    }

    pub fn finish(mut self) -> Result<()> {
        self.flushed = true;
        self.counter.flush(&self.ca_dir)
    }
}

impl Deref for SerialGuard {
    type Target = SerialCounter;

    fn deref(&self) -> &SerialCounter {
        &self.counter
    }
}

impl DerefMut for SerialGuard {
    fn deref_mut(&mut self) -> &mut SerialCounter {
        &mut self.counter
    }
}

impl Drop for SerialGuard {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        if let Err(e) = self.counter.flush(&self.ca_dir) {
            error!("Failed to persist serial counter: {:#}", e);
        }
    }
}

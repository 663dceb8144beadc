// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! JSON-lines audit sink.
//!
//! Each [`AuditEvent`] becomes one line of JSON, appended and flushed before
//! `emit` returns.  The file is opened in append mode, so restarting a
//! process continues the same trail.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use agent_governor_core::audit::{AuditEvent, AuditSink};
use agent_governor_core::error::SinkError;
use parking_lot::Mutex;

/// An [`AuditSink`] that appends events to a JSON-lines file.
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file cannot be created or opened.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event in a JSON-lines audit file.  Blank lines are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file cannot be read, or
    /// [`io::ErrorKind::InvalidData`] naming the first line that does not parse.
    pub fn read_events<P: AsRef<Path>>(path: P) -> io::Result<Vec<AuditEvent>> {
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line).map_err(|error| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("audit line {}: {error}", index + 1),
                )
            })?;
            events.push(event);
        }
        Ok(events)
    }
}

impl AuditSink for FileAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let line = serde_json::to_string(event).map_err(|e| SinkError(e.to_string()))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| SinkError(format!("{}: {e}", self.path.display())))
    }
}

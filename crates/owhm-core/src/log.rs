//! Diagnostic log sinks.
//!
//! Comparators never write files themselves; they hand one rendered block per
//! failure to a [`DiagnosticSink`]. The file-backed [`DiagnosticLog`] keeps the
//! session layout: a header written once when the log is opened, a model
//! marker line per case, then the failure blocks in execution order.

use crate::domain::OwhmError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const MODEL_MARKER: &str = "@@@@@:  ";

pub const SESSION_HEADER: &str = "OWHM regression diagnostic log. Each case starts with a marker line \
naming the compared output file;\nfailure blocks list the offending budget items or cells.\n\
@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@@\n\n";

pub trait DiagnosticSink {
    fn record(&self, entry: &str);

    fn record_model_name(&self, name: &str) {
        self.record(&format!("{}{}\n", MODEL_MARKER, name));
    }
}

/// Discards every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn record(&self, _entry: &str) {}
}

/// Collects entries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contents(&self) -> String {
        self.entries().concat()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, entry: &str) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push(entry.to_string());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    #[error("failed to create diagnostic log '{}': {source}", path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write diagnostic log header '{}': {source}", path.display())]
    Header {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<LogSinkError> for OwhmError {
    fn from(error: LogSinkError) -> Self {
        OwhmError::io_system("IO.DIAGNOSTIC_LOG", error.to_string())
    }
}

/// Session-scoped, append-only diagnostic file.
#[derive(Debug)]
pub struct DiagnosticLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl DiagnosticLog {
    /// Truncates `path` and writes the session header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogSinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LogSinkError::Create {
                path: path.clone(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| LogSinkError::Create {
                path: path.clone(),
                source,
            })?;
        file.write_all(SESSION_HEADER.as_bytes())
            .map_err(|source| LogSinkError::Header {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosticSink for DiagnosticLog {
    fn record(&self, entry: &str) {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(error) = file.write_all(entry.as_bytes()) {
            tracing::warn!(
                path = %self.path.display(),
                %error,
                "failed to append diagnostic entry"
            );
        }
    }
}

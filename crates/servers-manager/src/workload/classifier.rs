// Copyright (C) 2025 The WatchWolf Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server log line classification.
//!
//! The server writes log4j-style records:
//!
//! ```text
//! [18:47:45] [Server thread/INFO]: Done (6.656s)! For help, type "help"
//! [08:48:36] [Server thread/ERROR]: Error occurred while enabling Foo v1.1 (Is it up to date?)
//! java.lang.IllegalStateException: zip file closed
//!     at java.util.zip.ZipFile.ensureOpen(ZipFile.java:840) ~[?:?]
//! [08:48:36] [Server thread/INFO]: ...
//! ```
//!
//! A `Server thread/ERROR` record opens an exception span. Every following
//! line that is not a fresh timestamped record belongs to the span; the next
//! fresh record closes it and is consumed by the close.
//!
//! ```text
//!            readiness line ──► Started
//!          ┌────────┐  ERROR record   ┌──────────────┐
//!          │ NORMAL │ ──────────────► │ IN_EXCEPTION │ ◄─┐ continuation line
//!          └────────┘ ◄────────────── └──────────────┘ ──┘ (appended)
//!                 fresh record: Exception(span), line dropped
//! ```

use regex::Regex;
use std::sync::LazyLock;

static READINESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[\d{2}:\d{2}:\d{2}\] \[Server thread/INFO\]: Done \([^)]*\)! For help, type "help"\s*$"#)
        .unwrap_or_else(|e| panic!("invalid readiness pattern: {e}"))
});

static ERROR_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\d{2}:\d{2}:\d{2}\] \[Server thread/ERROR\]: ")
        .unwrap_or_else(|e| panic!("invalid error pattern: {e}"))
});

static FRESH_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[\d{2}:\d{2}:\d{2}\] \[[^\]/]+/[A-Z]+\]: ")
        .unwrap_or_else(|e| panic!("invalid record pattern: {e}"))
});

/// Whether `line` announces that the server finished starting.
pub fn is_readiness_line(line: &str) -> bool {
    READINESS_LINE.is_match(line)
}

/// Whether `line` is a main-thread ERROR record.
pub fn is_error_start(line: &str) -> bool {
    ERROR_START.is_match(line)
}

/// Whether `line` starts a new timestamped record of any level.
pub fn is_fresh_record(line: &str) -> bool {
    FRESH_RECORD.is_match(line)
}

/// Outcome of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// The server is ready for players.
    Started,
    /// A captured exception span, lines joined by `\n`.
    Exception(String),
}

/// Log classification state machine.
///
/// The presence of `span` is the `IN_EXCEPTION` state.
#[derive(Debug, Default)]
pub struct LogClassifier {
    span: Option<Vec<String>>,
}

impl LogClassifier {
    /// Classifier in the `NORMAL` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an exception span is currently being accumulated.
    pub fn in_exception(&self) -> bool {
        self.span.is_some()
    }

    /// Feed one line, returning the event it completes, if any.
    pub fn feed(&mut self, line: &str) -> Option<LogEvent> {
        match self.span.as_mut() {
            None => {
                if is_readiness_line(line) {
                    Some(LogEvent::Started)
                } else {
                    if is_error_start(line) {
                        self.span = Some(Vec::new());
                    }
                    None
                }
            }
            Some(span) => {
                if is_fresh_record(line) {
                    // the closing line is not reclassified
                    self.span
                        .take()
                        .map(|lines| LogEvent::Exception(lines.join("\n")))
                } else {
                    span.push(line.to_string());
                    None
                }
            }
        }
    }
}

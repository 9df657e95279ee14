//! Captured log stream of the server process and the browser page

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Where a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Stdout,
    Stderr,
    BrowserLog,
    BrowserError,
    Runner,
}

impl LogSource {
    /// Sources that fail a test case unless acknowledged
    pub fn is_error(&self) -> bool {
        matches!(self, LogSource::Stderr | LogSource::BrowserError)
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
            LogSource::BrowserLog => "Browser Log",
            LogSource::BrowserError => "Browser Error",
            LogSource::Runner => "runner",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub source: LogSource,
    pub text: String,
    pub at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Filter applied to entries before matching
pub type LogFilter = fn(&LogEntry) -> bool;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectLogOptions {
    pub filter: Option<LogFilter>,
    /// Scan the whole history instead of the current test case only
    pub all_logs: bool,
}

impl ExpectLogOptions {
    /// Stdout lines, full history
    pub fn stdout_history() -> Self {
        Self {
            filter: Some(|entry| entry.source == LogSource::Stdout),
            all_logs: true,
        }
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<LogEntry>,
    /// Index of the first entry of the current test case
    case_start: usize,
}

/// Shared, append-only log buffer.
///
/// Cloning yields another handle to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<LogState>>,
}

fn ansi_escape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI escape regex"))
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, source: LogSource, text: &str) {
        let text = ansi_escape().replace_all(text, "").trim_end().to_string();
        if text.is_empty() {
            return;
        }
        debug!("[{}] {}", source, text);
        self.inner.lock().entries.push(LogEntry {
            source,
            text,
            at: Utc::now(),
            acknowledged: false,
        });
    }

    /// Mark the start of a new test case
    pub fn begin_case(&self) {
        let mut state = self.inner.lock();
        state.case_start = state.entries.len();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.clone()
    }

    /// Assert that a log line containing `message` was captured.
    ///
    /// Matching entries are acknowledged. An empty `message` matches every
    /// scanned entry, which acknowledges all of them.
    pub fn expect_log(&self, message: &str, opts: ExpectLogOptions) -> E2eResult<()> {
        let mut state = self.inner.lock();
        let start = if opts.all_logs { 0 } else { state.case_start };

        let mut found = false;
        for entry in state.entries[start..].iter_mut() {
            if let Some(filter) = opts.filter {
                if !filter(entry) {
                    continue;
                }
            }
            if entry.text.contains(message) {
                entry.acknowledged = true;
                found = true;
                if !message.is_empty() {
                    break;
                }
            }
        }

        if found || message.is_empty() {
            Ok(())
        } else {
            Err(E2eError::AssertionFailed(format!(
                "log {:?} was not found",
                message
            )))
        }
    }

    /// Error-level entries of the current test case nobody acknowledged
    pub fn unexpected(&self) -> Vec<LogEntry> {
        let state = self.inner.lock();
        state.entries[state.case_start..]
            .iter()
            .filter(|e| e.source.is_error() && !e.acknowledged)
            .cloned()
            .collect()
    }

    /// Fail if the current test case produced unacknowledged error output
    pub fn check_unexpected(&self) -> E2eResult<()> {
        let unexpected = self.unexpected();
        if unexpected.is_empty() {
            return Ok(());
        }
        let lines: Vec<String> = unexpected
            .iter()
            .map(|e| format!("[{}] {}", e.source, e.text))
            .collect();
        Err(E2eError::UnexpectedLogs(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ansi_codes_are_stripped() {
        let logs = LogBuffer::new();
        logs.push(LogSource::Stdout, "\x1b[32m[vite]\x1b[39m connected.\n");
        let entries = logs.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "[vite] connected.");
    }

    #[test]
    fn test_blank_lines_are_dropped() {
        let logs = LogBuffer::new();
        logs.push(LogSource::Stdout, "   ");
        assert!(logs.is_empty());
    }

    #[test]
    fn test_stdout_filter_ignores_other_sources() {
        let logs = LogBuffer::new();
        logs.push(LogSource::Stderr, "HOOK CALLED: onReady");
        assert!(logs
            .expect_log("HOOK CALLED: onReady", ExpectLogOptions::stdout_history())
            .is_err());

        logs.push(LogSource::Stdout, "HOOK CALLED: onReady");
        assert!(logs
            .expect_log("HOOK CALLED: onReady", ExpectLogOptions::stdout_history())
            .is_ok());
    }

    #[test]
    fn test_all_logs_scans_previous_cases() {
        let logs = LogBuffer::new();
        logs.push(LogSource::Stdout, "HOOK CALLED: onCreate: Server");
        logs.begin_case();

        assert!(logs
            .expect_log("onCreate", ExpectLogOptions::default())
            .is_err());
        assert!(logs
            .expect_log("onCreate", ExpectLogOptions::stdout_history())
            .is_ok());
    }

    #[test]
    fn test_errors_must_be_acknowledged() {
        let logs = LogBuffer::new();
        logs.begin_case();
        logs.push(LogSource::Stdout, "GET / 200");
        logs.push(LogSource::Stderr, "hmr update failed");
        logs.push(LogSource::BrowserError, "Failed to fetch");

        let err = logs.check_unexpected().unwrap_err();
        assert!(err.to_string().contains("[stderr] hmr update failed"));
        assert!(err.to_string().contains("[Browser Error] Failed to fetch"));

        logs.expect_log("hmr update", ExpectLogOptions::default()).unwrap();
        assert_eq!(logs.unexpected().len(), 1);

        logs.expect_log("", ExpectLogOptions::default()).unwrap();
        assert!(logs.check_unexpected().is_ok());
    }

    #[test]
    fn test_empty_message_passes_on_empty_buffer() {
        let logs = LogBuffer::new();
        assert!(logs.expect_log("", ExpectLogOptions::default()).is_ok());
    }

    #[test]
    fn test_begin_case_resets_unexpected_window() {
        let logs = LogBuffer::new();
        logs.push(LogSource::Stderr, "old noise");
        logs.begin_case();
        assert!(logs.check_unexpected().is_ok());
        assert_eq!(logs.len(), 1);
    }
}

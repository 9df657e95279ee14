//! Error types for E2E scenarios

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server did not answer at {url} after {attempts} attempts")]
    ServerHealthCheck { url: String, attempts: usize },

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scenario matrix parse error: {0}")]
    MatrixParse(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for {what}: {last}")]
    Timeout { what: String, last: String },

    #[error("No file edit to revert")]
    NothingToRevert,

    #[error("Unexpected log output:\n{0}")]
    UnexpectedLogs(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Fail with `AssertionFailed` unless `cond` holds.
pub fn ensure(cond: bool, message: impl FnOnce() -> String) -> E2eResult<()> {
    if cond {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(message()))
    }
}

/// Assert that `haystack` contains `needle`.
pub fn expect_contains(haystack: &str, needle: &str) -> E2eResult<()> {
    ensure(haystack.contains(needle), || {
        format!("expected {:?} to contain {:?}", truncate(haystack), needle)
    })
}

/// Assert that `haystack` does not contain `needle`.
pub fn expect_not_contains(haystack: &str, needle: &str) -> E2eResult<()> {
    ensure(!haystack.contains(needle), || {
        format!("expected {:?} not to contain {:?}", truncate(haystack), needle)
    })
}

/// Assert equality, rendering both sides with `Debug` on failure.
pub fn expect_eq<T: PartialEq + std::fmt::Debug>(actual: T, expected: T) -> E2eResult<()> {
    ensure(actual == expected, || {
        format!("expected {:?}, got {:?}", expected, actual)
    })
}

fn truncate(s: &str) -> String {
    const MAX: usize = 200;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let head: String = s.chars().take(MAX).collect();
        format!("{}…", head)
    }
}

//! Main test runner that orchestrates the server, the browser and the
//! scenario's test cases

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::edit::FileEditor;
use crate::error::{E2eError, E2eResult};
use crate::http::HttpClient;
use crate::logs::LogBuffer;
use crate::page::{PageDriver, PlaywrightPage};
use crate::scenario::{Scenario, TestCase};
use crate::server::ServerHandle;
use crate::session::Session;

/// Result of running a single test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub scenario: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Main E2E test runner
pub struct TestRunner {
    config: RunnerConfig,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Launch the server and a browser, then run every registered case
    pub async fn run_scenario(&self, scenario: &Scenario) -> E2eResult<TestSuiteResult> {
        info!("Scenario {}", scenario.label());

        let logs = LogBuffer::new();
        let directive = scenario.startup(&self.config.server.package_manager);
        let mut server = ServerHandle::spawn(&directive, &self.config.server, logs.clone()).await?;

        let mut playwright = self.config.playwright.clone();
        playwright.node_cwd = self.config.app_dir().to_path_buf();
        let page = match PlaywrightPage::launch(playwright, logs.clone()).await {
            Ok(page) => Arc::new(page),
            Err(e) => {
                server.stop().await;
                return Err(e);
            }
        };

        let session = Session::new(
            HttpClient::new(server.server_url(), Duration::from_secs(10))?,
            page.clone(),
            logs,
            FileEditor::new(self.config.app_dir()),
            self.config.retry,
        );

        let result = self.run_cases(scenario, &session).await;

        if let Err(e) = session.editor.revert_all() {
            warn!("Could not revert edited files: {}", e);
        }
        if let Err(e) = page.close().await {
            warn!("Closing the browser failed: {}", e);
        }
        server.stop().await;

        Ok(result)
    }

    /// Run the scenario's cases in order against an existing session.
    ///
    /// A failing case does not stop the ones after it.
    pub async fn run_cases(&self, scenario: &Scenario, session: &Session) -> TestSuiteResult {
        let start = Instant::now();
        let cases = scenario.test_cases();
        let skipped = TestCase::ALL.len() - cases.len();
        let mut results = Vec::with_capacity(cases.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} test(s)...", cases.len());

        for case in cases {
            let result = self.run_case(scenario, case, session).await;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        TestSuiteResult {
            scenario: scenario.label(),
            total: results.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        }
    }

    async fn run_case(&self, scenario: &Scenario, case: TestCase, session: &Session) -> TestResult {
        let start = Instant::now();
        debug!("Running test: {}", case.name());
        session.logs.begin_case();

        let outcome = match timeout(self.config.case_timeout, scenario.run(case, session)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(E2eError::Timeout {
                what: case.name().to_string(),
                last: format!("exceeded {:?}", self.config.case_timeout),
            }),
        };
        let outcome = outcome.and_then(|()| session.logs.check_unexpected());

        // An interrupted HMR case must not leave its edit behind for the next one
        if session.editor.pending() > 0 {
            if let Err(e) = session.editor.revert_all() {
                warn!("Could not revert edits of '{}': {}", case.name(), e);
            }
        }

        TestResult {
            name: case.name().to_string(),
            success: outcome.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    /// Write results of all scenarios to `test-results.json`
    pub fn write_results(&self, results: &[TestSuiteResult]) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TestRunner::with_config(RunnerConfig {
            output_dir: dir.path().join("out"),
            ..Default::default()
        });
        let suite = TestSuiteResult {
            scenario: "dev (hono)".to_string(),
            total: 1,
            passed: 0,
            failed: 1,
            skipped: 2,
            duration_ms: 12,
            results: vec![TestResult {
                name: "redirect throw".to_string(),
                success: false,
                duration_ms: 12,
                error: Some("Assertion failed: expected 302, got 200".to_string()),
            }],
        };
        assert!(!suite.success());

        let path = runner.write_results(&[suite]).unwrap();
        let written: Vec<TestSuiteResult> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written[0].results[0].name, "redirect throw");
        assert_eq!(written[0].skipped, 2);
    }
}

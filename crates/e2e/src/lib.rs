//! Server integration E2E scenario
//!
//! This crate drives a server-rendered to-do app end to end and checks the
//! contract a server integration must honour:
//! - Launches the app with `pnpm run dev|prod` and captures its output
//! - Controls a browser through Playwright over a JSON-lines bridge
//! - Fetches raw HTML and redirects over plain HTTP
//! - Edits source files and reverts them to exercise hot reload
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── ServerHandle::spawn(directive) ─► stdout/stderr ─┐   │
//! │    ├── PlaywrightPage::launch()       ─► console ───────┤   │
//! │    │                                          LogBuffer ◄┘  │
//! │    └── run_cases(scenario, &Session) -> TestSuiteResult     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session { http, page, logs, editor, retry }                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario { mode, options, adapter }                        │
//! │    ├── startup() -> StartupDirective                        │
//! │    ├── test_cases() -> [TestCase]                           │
//! │    └── run(case, &Session)                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod edit;
pub mod error;
pub mod http;
pub mod logs;
pub mod matrix;
pub mod page;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod server;
pub mod session;

pub use config::{Adapter, LaunchMode, RetryPolicy, RunnerConfig, ScenarioOptions};
pub use error::{E2eError, E2eResult};
pub use runner::{TestResult, TestRunner, TestSuiteResult};
pub use scenario::{Scenario, TestCase};
pub use session::Session;

//! Scenario configuration: launch mode, options, adapter and retry policy

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};
use crate::page::PlaywrightConfig;
use crate::server::ServerConfig;

/// Environment variable naming the server framework adapter under test
pub const ADAPTER_ENV: &str = "VIKE_NODE_FRAMEWORK";

/// Pause inserted after a file edit before reverting it, and before the
/// real navigation when a stream preload is needed.
pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Which package script launches the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    Dev,
    Prod,
}

impl LaunchMode {
    pub fn script(&self) -> &'static str {
        match self {
            LaunchMode::Dev => "dev",
            LaunchMode::Prod => "prod",
        }
    }

    /// Full launch command, e.g. `pnpm run dev`
    pub fn command(&self, package_manager: &str) -> String {
        format!("{} run {}", package_manager, self.script())
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, LaunchMode::Prod)
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.script())
    }
}

impl FromStr for LaunchMode {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(LaunchMode::Dev),
            "prod" => Ok(LaunchMode::Prod),
            other => Err(E2eError::Config(format!(
                "unknown launch mode '{}' (expected dev or prod)",
                other
            ))),
        }
    }
}

/// Per-scenario toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioOptions {
    /// Skip the server-side HMR checks and accept log noise after mutations
    pub skip_server_hmr: bool,
    /// Serve on https://localhost:3000
    pub https: bool,
    /// Allow the process runner to retry a failed launch
    pub is_flaky: bool,
    /// The app registers no server `onCreate` hook
    pub no_server_hook: bool,
}

impl ScenarioOptions {
    pub fn server_url(&self) -> &'static str {
        if self.https {
            "https://localhost:3000"
        } else {
            "http://127.0.0.1:3000"
        }
    }
}

/// Server framework adapter the app is built on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adapter {
    #[default]
    Hono,
    Express,
    Fastify,
    H3,
    Elysia,
}

impl Adapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Adapter::Hono => "hono",
            Adapter::Express => "express",
            Adapter::Fastify => "fastify",
            Adapter::H3 => "h3",
            Adapter::Elysia => "elysia",
        }
    }

    /// Read the adapter from `VIKE_NODE_FRAMEWORK`, defaulting to hono.
    pub fn from_env() -> E2eResult<Self> {
        match std::env::var(ADAPTER_ENV) {
            Ok(v) if !v.is_empty() => v.parse(),
            _ => Ok(Adapter::default()),
        }
    }

    /// Server entry edited by the server-side HMR check
    pub fn server_entry(&self) -> PathBuf {
        PathBuf::from(format!("./server/index-{}.ts", self.as_str()))
    }

    /// Whether the first navigation must be preceded by a throwaway one.
    ///
    /// h3 streams poorly in production (unjs/h3#986), so the page is
    /// requested once and given time to warm up.
    pub fn needs_stream_preload(&self, mode: LaunchMode) -> bool {
        matches!((self, mode), (Adapter::H3, LaunchMode::Prod))
    }
}

impl fmt::Display for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Adapter {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hono" => Ok(Adapter::Hono),
            "express" => Ok(Adapter::Express),
            "fastify" => Ok(Adapter::Fastify),
            "h3" => Ok(Adapter::H3),
            "elysia" => Ok(Adapter::Elysia),
            other => Err(E2eError::Config(format!(
                "unknown {} value '{}'",
                ADAPTER_ENV, other
            ))),
        }
    }
}

/// Polling policy for retrying assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub server: ServerConfig,
    pub playwright: PlaywrightConfig,
    pub retry: RetryPolicy,

    /// Upper bound on a single test case
    pub case_timeout: Duration,

    /// Output directory for results
    pub output_dir: PathBuf,
}

impl RunnerConfig {
    pub fn app_dir(&self) -> &Path {
        &self.server.app_dir
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            playwright: PlaywrightConfig::default(),
            retry: RetryPolicy::default(),
            case_timeout: Duration::from_secs(60),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

//! E2E scenario entry point
//!
//! This file is the test binary that launches the app and runs the scenario.
//! Run with: cargo test --package server-e2e --test e2e -- --mode dev --app-dir <app>

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use server_e2e::config::{Adapter, LaunchMode, RetryPolicy, RunnerConfig, ScenarioOptions};
use server_e2e::matrix::ScenarioMatrix;
use server_e2e::page::{Browser, PlaywrightConfig};
use server_e2e::server::ServerConfig;
use server_e2e::{E2eResult, Scenario, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "server-e2e")]
#[command(about = "E2E scenario runner for a server integration")]
struct Args {
    /// Launch mode (dev or prod)
    #[arg(long, default_value = "dev")]
    mode: LaunchMode,

    /// Serve on https://localhost:3000
    #[arg(long)]
    https: bool,

    /// Skip server-side HMR checks
    #[arg(long)]
    skip_server_hmr: bool,

    /// Retry the server launch when it fails
    #[arg(long)]
    is_flaky: bool,

    /// The app has no server onCreate hook
    #[arg(long)]
    no_server_hook: bool,

    /// Run every entry of a YAML matrix file (or directory) instead
    #[arg(long)]
    matrix: Option<PathBuf>,

    /// Directory of the app under test
    #[arg(long, default_value = ".")]
    app_dir: PathBuf,

    /// Package manager running the dev/prod scripts
    #[arg(long, default_value = "pnpm")]
    package_manager: String,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    browser: String,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Interval between retried assertions
    #[arg(long, default_value = "100")]
    retry_interval_ms: u64,

    /// Give up on a retried assertion after this long
    #[arg(long, default_value = "5000")]
    retry_timeout_ms: u64,

    /// Time allowed for the server to start answering
    #[arg(long, default_value = "60")]
    startup_timeout_secs: u64,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let adapter = Adapter::from_env()?;

    let scenarios = match &args.matrix {
        Some(path) => ScenarioMatrix::load(path)?.scenarios(adapter),
        None => vec![Scenario::new(
            args.mode,
            ScenarioOptions {
                skip_server_hmr: args.skip_server_hmr,
                https: args.https,
                is_flaky: args.is_flaky,
                no_server_hook: args.no_server_hook,
            },
            adapter,
        )],
    };

    let config = RunnerConfig {
        server: ServerConfig {
            app_dir: args.app_dir,
            package_manager: args.package_manager,
            startup_timeout: Duration::from_secs(args.startup_timeout_secs),
            ..Default::default()
        },
        playwright: PlaywrightConfig {
            browser: Browser::parse(&args.browser),
            headless: !args.headed,
            ..Default::default()
        },
        retry: RetryPolicy {
            interval: Duration::from_millis(args.retry_interval_ms),
            timeout: Duration::from_millis(args.retry_timeout_ms),
        },
        output_dir: args.output,
        ..Default::default()
    };

    let runner = TestRunner::with_config(config);

    let mut suites = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        suites.push(runner.run_scenario(scenario).await?);
    }

    runner.write_results(&suites)?;

    Ok(suites.iter().all(|s| s.success()))
}

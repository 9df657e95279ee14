//! Server management - launching the app server and waiting for it to answer

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};
use crate::http::HttpClient;
use crate::logs::{LogBuffer, LogSource};

/// What to launch and where it will answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupDirective {
    /// Shell command, e.g. `pnpm run dev`
    pub command: String,
    pub server_url: String,
    /// Retry the launch when it fails
    pub is_flaky: bool,
}

/// Configuration for launching a server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory of the app under test; commands run and edits apply here
    pub app_dir: PathBuf,

    /// Package manager used to run the dev/prod scripts
    pub package_manager: String,

    /// Timeout for the server to start answering
    pub startup_timeout: Duration,

    /// Launch attempts for flaky scenarios
    pub launch_attempts: usize,

    /// Time between SIGTERM and SIGKILL on shutdown
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("."),
            package_manager: "pnpm".to_string(),
            startup_timeout: Duration::from_secs(60),
            launch_attempts: 3,
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// Handle to a running server process
pub struct ServerHandle {
    child: Child,
    pub server_url: String,
    shutdown_grace: Duration,
}

impl ServerHandle {
    /// Launch the server, retrying a failed launch when the directive is flaky
    pub async fn spawn(
        directive: &StartupDirective,
        config: &ServerConfig,
        logs: LogBuffer,
    ) -> E2eResult<Self> {
        let attempts = if directive.is_flaky {
            config.launch_attempts.max(1)
        } else {
            1
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            match Self::spawn_once(directive, config, logs.clone()).await {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    warn!("Launch attempt {}/{} failed: {}", attempt, attempts, e);
                    logs.push(
                        LogSource::Runner,
                        &format!("launch attempt {} failed: {}", attempt, e),
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| E2eError::ServerStartup("no launch attempted".to_string())))
    }

    async fn spawn_once(
        directive: &StartupDirective,
        config: &ServerConfig,
        logs: LogBuffer,
    ) -> E2eResult<Self> {
        info!(
            "Running `{}` in {} (expecting {})",
            directive.command,
            config.app_dir.display(),
            directive.server_url
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&directive.command)
            .current_dir(&config.app_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so the package manager and its children stop together
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!("Failed to spawn `{}`: {}", directive.command, e))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(BufReader::new(stdout), logs.clone(), LogSource::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(BufReader::new(stderr), logs.clone(), LogSource::Stderr));
        }

        let mut handle = ServerHandle {
            child,
            server_url: directive.server_url.clone(),
            shutdown_grace: config.shutdown_grace,
        };

        if let Err(e) = handle.wait_for_ready(config.startup_timeout).await {
            handle.stop().await;
            return Err(e);
        }

        info!("Server is answering at {}", handle.server_url);
        Ok(handle)
    }

    /// Wait until the server answers any HTTP request
    async fn wait_for_ready(&mut self, timeout_duration: Duration) -> E2eResult<()> {
        let http = HttpClient::new(&self.server_url, Duration::from_secs(2))?;
        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            if let Some(status) = self.child.try_wait()? {
                return Err(E2eError::ServerStartup(format!(
                    "process exited with {} before answering",
                    status
                )));
            }

            if http.is_up().await {
                return Ok(());
            }

            if attempts == 1 {
                info!("Waiting for server to start...");
            }
            sleep(Duration::from_millis(100)).await;
        }

        Err(E2eError::ServerHealthCheck {
            url: self.server_url.clone(),
            attempts,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Stop the server: SIGTERM to its process group, then kill
    pub async fn stop(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        info!("Stopping server (pid: {})", pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if killpg(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(self.shutdown_grace, self.child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }

        let _ = self.child.kill().await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // kill_on_drop covers the shell; take the rest of the group with it
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }
}

/// Copy a process stream into the log buffer until EOF.
///
/// Lines are decoded lossily so non-UTF-8 output never stops the pipe from
/// being drained.
async fn pump_lines<R>(mut reader: R, logs: LogBuffer, source: LogSource)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => logs.push(source, &String::from_utf8_lossy(&buf)),
            Err(e) => {
                warn!("Failed to read server {}: {}", source, e);
                if e.kind() != std::io::ErrorKind::Interrupted {
                    break;
                }
            }
        }
    }
}

//! Browser page automation
//!
//! [`PageDriver`] is the seam the scenario talks to. [`PlaywrightPage`] drives
//! a real browser through a long-lived Node process running Playwright; the
//! two sides exchange one JSON object per line over stdin/stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::logs::{LogBuffer, LogSource};

/// Status and headers of the main-frame response of a navigation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavigationResponse {
    pub status: u16,
    /// Header names are lower-case
    pub headers: HashMap<String, String>,
}

impl NavigationResponse {
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Operations the scenario performs on the live page
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load event
    async fn goto(&self, url: &str) -> E2eResult<NavigationResponse>;

    /// Start a navigation without waiting for it to finish
    async fn goto_detached(&self, url: &str) -> E2eResult<()>;

    /// `textContent` of the first element matching `selector`
    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>>;

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()>;

    async fn click(&self, selector: &str) -> E2eResult<()>;

    /// Evaluate a JavaScript expression in the page
    async fn evaluate(&self, expression: &str) -> E2eResult<Value>;

    async fn close(&self) -> E2eResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "firefox" => Browser::Firefox,
            "webkit" => Browser::Webkit,
            _ => Browser::Chromium,
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Per-operation timeout on both sides of the bridge
    pub op_timeout: Duration,
    /// Working directory of the bridge, where `playwright` must resolve
    pub node_cwd: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            op_timeout: Duration::from_secs(15),
            node_cwd: PathBuf::from("."),
        }
    }
}

const BRIDGE_JS: &str = r#"
const readline = require('readline');
const pw = require('playwright');

const [browserName, headless, width, height, timeoutMs] = process.argv.slice(2);
const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

(async () => {
  const browser = await pw[browserName].launch({ headless: headless === 'true' });
  const context = await browser.newContext({
    viewport: { width: Number(width), height: Number(height) },
    ignoreHTTPSErrors: true,
  });
  const page = await context.newPage();
  page.setDefaultTimeout(Number(timeoutMs));
  page.on('console', (m) => send({ event: m.type() === 'error' ? 'error' : 'log', text: m.text() }));
  page.on('pageerror', (e) => send({ event: 'error', text: String(e && e.stack || e) }));

  const ops = {
    async goto({ url }) {
      const res = await page.goto(url);
      return res ? { status: res.status(), headers: await res.allHeaders() } : { status: 0, headers: {} };
    },
    async gotoDetached({ url }) { page.goto(url).catch(() => {}); return null; },
    async textContent({ selector }) { return await page.textContent(selector); },
    async fill({ selector, value }) { await page.fill(selector, value); return null; },
    async click({ selector }) { await page.click(selector); return null; },
    async evaluate({ expression }) { return await page.evaluate(expression); },
    async close() { await browser.close(); setImmediate(() => process.exit(0)); return null; },
  };

  send({ ready: true });
  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    const req = JSON.parse(line);
    try {
      send({ id: req.id, ok: true, result: await ops[req.op](req) });
    } catch (e) {
      send({ id: req.id, ok: false, error: String(e && e.message || e) });
    }
  }
  await browser.close();
})().catch((e) => { send({ fatal: String(e && e.message || e) }); process.exit(1); });
"#;

/// A message from the bridge
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeMessage {
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        text: String,
    },
    Ready {
        ready: bool,
    },
    Fatal {
        fatal: String,
    },
}

type Pending = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<E2eResult<Value>>>>>;

/// Browser page driven through the Node bridge
pub struct PlaywrightPage {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    seq: AtomicU64,
    op_timeout: Duration,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightPage {
    /// Launch the browser; console output of the page goes to `logs`
    pub async fn launch(config: PlaywrightConfig, logs: LogBuffer) -> E2eResult<Self> {
        Self::check_playwright_installed(&config).await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.cjs");
        std::fs::write(&script_path, BRIDGE_JS)?;

        info!(
            "Launching {} (headless: {})",
            config.browser.as_str(),
            config.headless
        );

        // NODE_PATH lets the bridge resolve the app's playwright install.
        let mut child = Command::new("node")
            .arg(&script_path)
            .arg(config.browser.as_str())
            .arg(config.headless.to_string())
            .arg(config.viewport_width.to_string())
            .arg(config.viewport_height.to_string())
            .arg(config.op_timeout.as_millis().to_string())
            .current_dir(&config.node_cwd)
            .env("NODE_PATH", config.node_cwd.join("node_modules"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Playwright(format!("failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| E2eError::Playwright("bridge stderr unavailable".to_string()))?;

        let pending: Pending = Arc::default();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();

        tokio::spawn(read_bridge(
            BufReader::new(stdout),
            pending.clone(),
            logs.clone(),
            ready_tx,
        ));
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("playwright: {}", line);
            }
        });

        // Browser startup is slower than any single page operation.
        match timeout(config.op_timeout * 4, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(fatal))) => return Err(E2eError::Playwright(fatal)),
            Ok(Err(_)) => {
                return Err(E2eError::Playwright(
                    "bridge exited before the browser was ready".to_string(),
                ))
            }
            Err(_) => {
                return Err(E2eError::Playwright(
                    "timed out launching the browser".to_string(),
                ))
            }
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            seq: AtomicU64::new(1),
            op_timeout: config.op_timeout,
            _script_dir: script_dir,
        })
    }

    async fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
        let status = Command::new("npx")
            .args(["--no-install", "playwright", "--version"])
            .current_dir(&config.node_cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    async fn request(&self, op: &str, mut args: Value) -> E2eResult<Value> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst);
        args["id"] = json!(id);
        args["op"] = json!(op);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let line = serde_json::to_string(&args)? + "\n";
        debug!("bridge >>> {}", line.trim_end());
        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }

        // The bridge enforces op_timeout itself; allow a margin on top.
        match timeout(self.op_timeout + Duration::from_secs(5), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(E2eError::Playwright(format!(
                "bridge closed while waiting for {}",
                op
            ))),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(E2eError::Timeout {
                    what: format!("page.{}", op),
                    last: "no response from bridge".to_string(),
                })
            }
        }
    }
}

async fn read_bridge(
    reader: BufReader<tokio::process::ChildStdout>,
    pending: Pending,
    logs: LogBuffer,
    ready_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut lines = reader.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let message: BridgeMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(_) => {
                // Anything the browser libraries print on their own
                debug!("bridge: {}", line);
                continue;
            }
        };

        match message {
            BridgeMessage::Response { id, ok, result, error } => {
                let Some(tx) = pending.lock().remove(&id) else {
                    continue;
                };
                let outcome = if ok {
                    Ok(result)
                } else {
                    Err(E2eError::Playwright(
                        error.unwrap_or_else(|| "unknown error".to_string()),
                    ))
                };
                let _ = tx.send(outcome);
            }
            BridgeMessage::Event { event, text } => {
                let source = if event == "error" {
                    LogSource::BrowserError
                } else {
                    LogSource::BrowserLog
                };
                logs.push(source, &text);
            }
            BridgeMessage::Ready { .. } => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            BridgeMessage::Fatal { fatal } => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(fatal));
                } else {
                    logs.push(LogSource::BrowserError, &fatal);
                }
            }
        }
    }

    // Fail whatever is still waiting
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(E2eError::Playwright("bridge exited".to_string())));
    }
}

#[async_trait]
impl PageDriver for PlaywrightPage {
    async fn goto(&self, url: &str) -> E2eResult<NavigationResponse> {
        let result = self.request("goto", json!({ "url": url })).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn goto_detached(&self, url: &str) -> E2eResult<()> {
        self.request("gotoDetached", json!({ "url": url })).await?;
        Ok(())
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        let result = self
            .request("textContent", json!({ "selector": selector }))
            .await?;
        Ok(result.as_str().map(String::from))
    }

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()> {
        self.request("fill", json!({ "selector": selector, "value": value }))
            .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        self.request("click", json!({ "selector": selector })).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> E2eResult<Value> {
        self.request("evaluate", json!({ "expression": expression }))
            .await
    }

    async fn close(&self) -> E2eResult<()> {
        let closed = self.request("close", json!({})).await;
        let mut child = self.child.lock().await;
        if closed.is_err() {
            let _ = child.kill().await;
        }
        let _ = child.wait().await;
        closed.map(|_| ())
    }
}

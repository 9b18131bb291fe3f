//! Playwright browser automation
//!
//! A single Node process hosts Playwright for the whole run. The harness
//! writes the bridge script to a temp dir, spawns `node` on it, and speaks
//! newline-delimited JSON over stdio: one request, one response, in order.
//! Contexts and pages are ids on the bridge side.

use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    ClickOutcome, Context, ContextOptions, Driver, ElementNode, ElementRef, LoadState, Page,
    PageSnapshot, SurfaceInfo, SurfaceWaiter,
};
use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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
}

impl FromStr for Browser {
    type Err = HarnessError;

    fn from_str(s: &str) -> HarnessResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(HarnessError::Config(format!("unknown browser: {}", other))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    /// Node executable.
    pub node_binary: PathBuf,
    /// `node_modules` directory holding the `playwright` package.
    pub node_modules: PathBuf,
    /// Per-action bound for clicks, fills and key presses.
    pub action_timeout_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            node_modules: PathBuf::from("node_modules"),
            action_timeout_ms: 5000,
        }
    }
}

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

// waiters: waiter id -> page id. Each page entry keeps its live waiters in
// registration order; a popup goes to the oldest one still without a popup.
const state = { browser: null, contexts: new Map(), pages: new Map(), waiters: new Map(), seq: 0 };

function entryOf(id) {
  const entry = state.pages.get(id);
  if (!entry) throw new Error(`unknown page ${id}`);
  return entry;
}

async function elementOf(entry, index) {
  const handle = await entry.page.evaluateHandle((i) => (window.__flowprobe || [])[i], index);
  const element = handle.asElement();
  if (!element) throw new Error(`stale element #${index}`);
  return element;
}

function snapshotDocument() {
  const all = Array.from(document.querySelectorAll('*'));
  const index = new Map(all.map((el, i) => [el, i]));
  window.__flowprobe = all;
  const textOf = (el) => (el.innerText !== undefined ? el.innerText : el.textContent || '').trim();
  const nameOf = (el) => {
    const labelledBy = el.getAttribute('aria-labelledby');
    if (labelledBy) {
      const label = labelledBy.split(/\s+/).map((id) => document.getElementById(id)).filter(Boolean);
      if (label.length) return label.map(textOf).join(' ');
    }
    return el.getAttribute('aria-label')
      || (el.labels && el.labels.length ? textOf(el.labels[0]) : '')
      || el.getAttribute('placeholder')
      || el.getAttribute('alt')
      || el.getAttribute('title')
      || textOf(el);
  };
  const visibleOf = (el) => (typeof el.checkVisibility === 'function'
    ? el.checkVisibility({ checkOpacity: true, checkVisibilityCSS: true })
    : !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length));
  return {
    url: location.href,
    elements: all.map((el) => ({
      tag: el.tagName.toLowerCase(),
      parent: el.parentElement && index.has(el.parentElement) ? index.get(el.parentElement) : null,
      id: el.id || null,
      classes: Array.from(el.classList || []),
      test_id: el.getAttribute('data-testid'),
      role: el.getAttribute('role'),
      name: nameOf(el),
      text: textOf(el),
      visible: visibleOf(el),
      attributes: Object.fromEntries(Array.from(el.attributes).map((a) => [a.name, a.value])),
    })),
  };
}

const handlers = {
  async launch({ browser, headless }) {
    state.browser = await playwright[browser].launch({ headless });
    return null;
  },
  async newContext({ width, height }) {
    const context = await state.browser.newContext({ viewport: { width, height } });
    const id = `ctx-${++state.seq}`;
    state.contexts.set(id, context);
    return id;
  },
  async newPage({ context }) {
    const page = await state.contexts.get(context).newPage();
    const id = `page-${++state.seq}`;
    const entry = { page, context, waiters: new Map(), unclaimed: 0 };
    page.on('popup', (popup) => {
      for (const waiter of entry.waiters.values()) {
        if (!waiter.popup) {
          waiter.popup = popup;
          if (waiter.notify) waiter.notify(popup);
          return;
        }
      }
      entry.unclaimed += 1;
    });
    state.pages.set(id, entry);
    return id;
  },
  async closeContext({ context }) {
    for (const [id, entry] of state.pages) {
      if (entry.context !== context) continue;
      for (const waiter of entry.waiters.keys()) state.waiters.delete(waiter);
      state.pages.delete(id);
    }
    const ctx = state.contexts.get(context);
    state.contexts.delete(context);
    if (ctx) await ctx.close();
    return null;
  },
  async goto({ page, url, timeout }) {
    await entryOf(page).page.goto(url, { timeout });
    return null;
  },
  async waitForLoadState({ page, state: loadState, timeout }) {
    await entryOf(page).page.waitForLoadState(loadState, { timeout });
    return null;
  },
  async snapshot({ page }) {
    return entryOf(page).page.evaluate(snapshotDocument);
  },
  async click({ page, element, timeout }) {
    const entry = entryOf(page);
    const before = entry.unclaimed;
    await (await elementOf(entry, element)).click({ timeout });
    await entry.page.waitForTimeout(250);
    return { unclaimed_surfaces: entry.unclaimed - before };
  },
  async fill({ page, element, text, timeout }) {
    const entry = entryOf(page);
    await (await elementOf(entry, element)).fill(text, { timeout });
    return null;
  },
  async press({ page, element, key, timeout }) {
    const entry = entryOf(page);
    await (await elementOf(entry, element)).press(key, { timeout });
    return null;
  },
  async attribute({ page, element, name }) {
    const entry = entryOf(page);
    return (await elementOf(entry, element)).getAttribute(name);
  },
  async url({ page }) {
    return entryOf(page).page.url();
  },
  async title({ page }) {
    return entryOf(page).page.title();
  },
  async expectSurface({ page }) {
    const entry = entryOf(page);
    const id = ++state.seq;
    entry.waiters.set(id, { popup: null, notify: null });
    state.waiters.set(id, page);
    return id;
  },
  async awaitSurface({ waiter, timeout }) {
    const page = state.waiters.get(waiter);
    if (page === undefined) throw new Error(`unknown surface waiter ${waiter}`);
    state.waiters.delete(waiter);
    const entry = state.pages.get(page);
    const pending = entry && entry.waiters.get(waiter);
    if (!pending) throw new Error(`surface waiter ${waiter} outlived its page`);
    let timer;
    try {
      const popup = pending.popup || await new Promise((resolve, reject) => {
        pending.notify = resolve;
        timer = setTimeout(() => reject(Object.assign(new Error(`no new surface within ${timeout} ms`), { name: 'TimeoutError' })), timeout);
      });
      await popup.waitForLoadState('domcontentloaded', { timeout }).catch(() => {});
      const url = popup.url();
      await popup.close();
      return { url };
    } finally {
      clearTimeout(timer);
      entry.waiters.delete(waiter);
    }
  },
  async shutdown() {
    if (state.browser) await state.browser.close();
    state.browser = null;
    return null;
  },
};

const rl = readline.createInterface({ input: process.stdin });
let chain = Promise.resolve();
rl.on('line', (line) => {
  chain = chain.then(async () => {
    let request;
    try {
      request = JSON.parse(line);
    } catch (error) {
      process.stdout.write(JSON.stringify({ id: null, ok: false, error: `bad request: ${error.message}` }) + '\n');
      return;
    }
    const { id, op, args } = request;
    try {
      const handler = handlers[op];
      if (!handler) throw new Error(`unknown op ${op}`);
      const result = await handler(args || {});
      process.stdout.write(JSON.stringify({ id, ok: true, result: result === undefined ? null : result }) + '\n');
    } catch (error) {
      const kind = error && error.name === 'TimeoutError' ? 'timeout' : 'error';
      process.stdout.write(JSON.stringify({ id, ok: false, kind, error: String(error && error.message || error) }) + '\n');
    }
  });
});
rl.on('close', () => { chain.then(() => handlers.shutdown()).finally(() => process.exit(0)); });
"#;

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Failure reported by the bridge for one request.
enum BridgeFailure {
    Timeout(String),
    Other(String),
}

struct Bridge {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl Bridge {
    async fn call(&mut self, op: &str, args: Value) -> HarnessResult<Result<Value, BridgeFailure>> {
        self.next_id += 1;
        let id = self.next_id;
        let mut line = serde_json::to_string(&json!({ "id": id, "op": op, "args": args }))?;
        line.push('\n');
        debug!("bridge -> {} #{}", op, id);
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(HarnessError::Driver(format!(
                    "Playwright bridge exited during {}",
                    op
                )));
            };
            let response: BridgeResponse = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(_) => {
                    // Stray console output from page scripts or Playwright itself.
                    debug!("bridge: {}", line);
                    continue;
                }
            };
            if response.id != Some(id) {
                warn!("Dropping out-of-order bridge response {:?}", response.id);
                continue;
            }
            if response.ok {
                return Ok(Ok(response.result));
            }
            let message = response.error.unwrap_or_else(|| "unknown bridge error".to_string());
            return Ok(Err(match response.kind.as_deref() {
                Some("timeout") => BridgeFailure::Timeout(message),
                _ => BridgeFailure::Other(message),
            }));
        }
    }

    /// Call and turn any bridge-side failure into a driver error.
    async fn request(&mut self, op: &str, args: Value) -> HarnessResult<Value> {
        match self.call(op, args).await? {
            Ok(value) => Ok(value),
            Err(BridgeFailure::Timeout(message)) | Err(BridgeFailure::Other(message)) => {
                Err(HarnessError::Driver(format!("{}: {}", op, message)))
            }
        }
    }
}

type SharedBridge = Arc<Mutex<Bridge>>;

/// Playwright browser handle
pub struct PlaywrightDriver {
    bridge: SharedBridge,
    config: PlaywrightConfig,
    /// Holds the bridge script for the lifetime of the process.
    _script_dir: tempfile::TempDir,
}

impl PlaywrightDriver {
    /// Spawn the bridge and launch the configured browser.
    pub async fn launch(config: PlaywrightConfig) -> HarnessResult<Self> {
        Self::check_playwright_installed(&config).await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("flowprobe-bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let node_modules = std::env::current_dir()?.join(&config.node_modules);
        debug!("Spawning Playwright bridge: {}", script_path.display());

        let mut child = Command::new(&config.node_binary)
            .arg(&script_path)
            .env("NODE_PATH", &node_modules)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HarnessError::Driver(format!(
                    "failed to spawn {}: {}",
                    config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Driver("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Driver("bridge stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("bridge stderr: {}", line);
                }
            });
        }

        let mut bridge = Bridge {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
        };
        bridge
            .request(
                "launch",
                json!({ "browser": config.browser.as_str(), "headless": config.headless }),
            )
            .await?;
        info!("Launched {} (headless: {})", config.browser.as_str(), config.headless);

        Ok(Self {
            bridge: Arc::new(Mutex::new(bridge)),
            config,
            _script_dir: script_dir,
        })
    }

    /// Check if Playwright is installed
    async fn check_playwright_installed(config: &PlaywrightConfig) -> HarnessResult<()> {
        let status = Command::new(&config.node_binary)
            .args(["-e", "require('playwright')"])
            .env("NODE_PATH", std::env::current_dir()?.join(&config.node_modules))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(HarnessError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl Driver for PlaywrightDriver {
    async fn new_context(&self, options: &ContextOptions) -> HarnessResult<Box<dyn Context>> {
        let id = self
            .bridge
            .lock()
            .await
            .request(
                "newContext",
                json!({ "width": options.viewport.width, "height": options.viewport.height }),
            )
            .await?;
        let id = id
            .as_str()
            .ok_or_else(|| HarnessError::Driver("newContext returned no id".into()))?
            .to_string();
        debug!("Opened browser context {}", id);
        Ok(Box::new(PlaywrightContext {
            id,
            bridge: self.bridge.clone(),
            action_timeout_ms: self.config.action_timeout_ms,
        }))
    }

    async fn shutdown(&self) -> HarnessResult<()> {
        let mut bridge = self.bridge.lock().await;
        if let Err(e) = bridge.request("shutdown", Value::Null).await {
            warn!("Browser shutdown failed: {}", e);
        }

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = bridge.child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(Duration::from_millis(500), bridge.child.wait())
                        .await
                        .is_ok()
                {
                    return Ok(());
                }
            }
        }

        // Force kill if still running
        let _ = bridge.child.kill().await;
        Ok(())
    }
}

struct PlaywrightContext {
    id: String,
    bridge: SharedBridge,
    action_timeout_ms: u64,
}

#[async_trait]
impl Context for PlaywrightContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_page(&mut self) -> HarnessResult<Box<dyn Page>> {
        let page = self
            .bridge
            .lock()
            .await
            .request("newPage", json!({ "context": self.id }))
            .await?;
        let page = page
            .as_str()
            .ok_or_else(|| HarnessError::Driver("newPage returned no id".into()))?
            .to_string();
        Ok(Box::new(PlaywrightPage {
            id: page,
            bridge: self.bridge.clone(),
            action_timeout_ms: self.action_timeout_ms,
            last_url: String::new(),
        }))
    }

    async fn close(self: Box<Self>) -> HarnessResult<()> {
        debug!("Closing browser context {}", self.id);
        self.bridge
            .lock()
            .await
            .request("closeContext", json!({ "context": self.id }))
            .await
            .map(|_| ())
    }
}

struct PlaywrightPage {
    id: String,
    bridge: SharedBridge,
    action_timeout_ms: u64,
    /// Last URL requested by `goto`, for timeout reports.
    last_url: String,
}

impl PlaywrightPage {
    async fn request(&self, op: &str, mut args: Value) -> HarnessResult<Value> {
        args["page"] = json!(self.id);
        self.bridge.lock().await.request(op, args).await
    }

    /// Like [`Self::request`], but a bridge timeout becomes a navigation timeout.
    async fn navigation(&self, op: &str, mut args: Value, timeout: Duration) -> HarnessResult<()> {
        args["page"] = json!(self.id);
        args["timeout"] = json!(timeout.as_millis() as u64);
        match self.bridge.lock().await.call(op, args).await? {
            Ok(_) => Ok(()),
            Err(BridgeFailure::Timeout(_)) => Err(HarnessError::NavigationTimeout {
                url: self.last_url.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(BridgeFailure::Other(message)) => {
                Err(HarnessError::Driver(format!("{}: {}", op, message)))
            }
        }
    }

    async fn element_call(&self, op: &str, element: ElementRef, mut args: Value) -> HarnessResult<Value> {
        args["element"] = json!(element.0);
        args["timeout"] = json!(self.action_timeout_ms);
        self.request(op, args).await
    }
}

/// A click reply must say how many popups nobody registered for.
fn click_outcome(result: &Value) -> HarnessResult<ClickOutcome> {
    let unclaimed = result["unclaimed_surfaces"].as_u64().ok_or_else(|| {
        HarnessError::Driver(format!("click returned no popup count: {}", result))
    })?;
    Ok(ClickOutcome {
        unclaimed_surfaces: unclaimed as usize,
    })
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    url: String,
    elements: Vec<ElementNode>,
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> HarnessResult<()> {
        self.last_url = url.to_string();
        self.navigation("goto", json!({ "url": url }), timeout).await
    }

    async fn wait_for_load_state(&mut self, state: LoadState, timeout: Duration) -> HarnessResult<()> {
        self.navigation("waitForLoadState", json!({ "state": state.as_str() }), timeout)
            .await
    }

    async fn wait_for_timeout(&mut self, duration: Duration) -> HarnessResult<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn snapshot(&mut self) -> HarnessResult<PageSnapshot> {
        let raw: RawSnapshot = serde_json::from_value(self.request("snapshot", json!({})).await?)?;
        Ok(PageSnapshot {
            url: raw.url,
            elements: raw.elements,
        })
    }

    async fn click(&mut self, element: ElementRef) -> HarnessResult<ClickOutcome> {
        click_outcome(&self.element_call("click", element, json!({})).await?)
    }

    async fn fill(&mut self, element: ElementRef, text: &str) -> HarnessResult<()> {
        self.element_call("fill", element, json!({ "text": text })).await.map(|_| ())
    }

    async fn press(&mut self, element: ElementRef, key: &str) -> HarnessResult<()> {
        self.element_call("press", element, json!({ "key": key })).await.map(|_| ())
    }

    async fn attribute(&mut self, element: ElementRef, name: &str) -> HarnessResult<Option<String>> {
        let value = self
            .element_call("attribute", element, json!({ "name": name }))
            .await?;
        Ok(value.as_str().map(String::from))
    }

    async fn url(&mut self) -> HarnessResult<String> {
        Ok(self.request("url", json!({})).await?.as_str().unwrap_or_default().to_string())
    }

    async fn title(&mut self) -> HarnessResult<String> {
        Ok(self.request("title", json!({})).await?.as_str().unwrap_or_default().to_string())
    }

    async fn expect_new_surface(&mut self) -> HarnessResult<SurfaceWaiter> {
        let id = self.request("expectSurface", json!({})).await?;
        let id = id
            .as_u64()
            .ok_or_else(|| HarnessError::Driver("expectSurface returned no id".into()))?;
        Ok(SurfaceWaiter::new(id))
    }

    async fn wait_for_surface(&mut self, waiter: SurfaceWaiter, timeout: Duration) -> HarnessResult<SurfaceInfo> {
        let result = self
            .request(
                "awaitSurface",
                json!({ "waiter": waiter.id(), "timeout": timeout.as_millis() as u64 }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

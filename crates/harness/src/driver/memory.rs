//! Deterministic in-memory driver
//!
//! Serves a hand-built [`MemorySite`]: pages keyed by absolute URL, each a
//! flat element list with click/enter behaviours. No network and no timing
//! jitter, so flows over it are reproducible. Used by the test suite and by
//! `flowprobe run --driver memory --site <file>` to dry-run suites.
//!
//! A site can be built in code or loaded from a YAML model where elements
//! nest as a tree:
//!
//! ```yaml
//! base_url: https://aiaxio.com
//! pages:
//!   /:
//!     title: Home
//!     elements:
//!       - tag: nav
//!         test_id: navbar-aiaxio
//!         children:
//!           - tag: a
//!             test_id: nav-link-Tools
//!             attributes: { href: /tools/ }
//!             text: Tools
//!             on_click: { action: navigate, url: /tools/ }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use super::{
    ClickOutcome, Context, ContextOptions, Driver, ElementNode, ElementRef, LoadState, Page,
    PageSnapshot, SurfaceInfo, SurfaceWaiter,
};
use crate::error::{HarnessError, HarnessResult};
use crate::step::join_url;

/// What happens when an element is clicked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClickAction {
    #[default]
    Nothing,
    /// Same-tab navigation.
    Navigate(String),
    /// Opens a new surface at the URL.
    Popup(String),
    /// Makes another element of the same page visible.
    Reveal(usize),
    /// Reveals `reveal` if the value filled into `input` looks like an email.
    SubmitEmail { input: usize, reveal: usize },
}

#[derive(Debug, Clone, Default)]
pub struct MemoryElement {
    pub node: ElementNode,
    pub on_click: ClickAction,
    /// Navigation target on Enter; `{value}` expands to the element's value.
    pub on_enter: Option<String>,
}

impl MemoryElement {
    pub fn new(tag: &str) -> Self {
        Self {
            node: ElementNode {
                tag: tag.to_string(),
                visible: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn parent(mut self, parent: usize) -> Self {
        self.node.parent = Some(parent);
        self
    }

    pub fn test_id(mut self, id: &str) -> Self {
        self.node.test_id = Some(id.to_string());
        self
    }

    /// Sets both the rendered text and, unless set otherwise, the accessible name.
    pub fn text(mut self, text: &str) -> Self {
        self.node.text = text.to_string();
        if self.node.name.is_empty() {
            self.node.name = text.to_string();
        }
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.node.name = name.to_string();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.node.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.node.visible = false;
        self
    }

    pub fn on_click(mut self, action: ClickAction) -> Self {
        self.on_click = action;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SitePage {
    pub title: String,
    pub elements: Vec<MemoryElement>,
}

impl SitePage {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            elements: Vec::new(),
        }
    }

    /// Append an element and return its index for use as a parent.
    pub fn add(&mut self, element: MemoryElement) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }
}

/// The site served by a [`MemoryDriver`].
#[derive(Debug, Clone)]
pub struct MemorySite {
    pages: BTreeMap<String, SitePage>,
    idle_supported: bool,
    /// URLs whose network never goes idle.
    stalled: BTreeSet<String>,
    /// URLs whose document takes this long to load.
    slow: BTreeMap<String, Duration>,
    fail_close: bool,
}

impl Default for MemorySite {
    fn default() -> Self {
        Self {
            pages: BTreeMap::new(),
            idle_supported: true,
            stalled: BTreeSet::new(),
            slow: BTreeMap::new(),
            fail_close: false,
        }
    }
}

impl MemorySite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, page: SitePage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// Report idle detection as unsupported, forcing fixed-delay fallbacks.
    pub fn without_idle_detection(mut self) -> Self {
        self.idle_supported = false;
        self
    }

    pub fn stalled(mut self, url: &str) -> Self {
        self.stalled.insert(url.to_string());
        self
    }

    pub fn slow_load(mut self, url: &str, delay: Duration) -> Self {
        self.slow.insert(url.to_string(), delay);
        self
    }

    /// Make every context close fail, as a crashed browser would.
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let file: SiteFile = serde_yaml::from_str(yaml)?;
        file.build()
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        debug!("Loading site model from {}", path.display());
        Self::from_yaml(&std::fs::read_to_string(path)?).map_err(|e| {
            HarnessError::Config(format!("site model {}: {}", path.display(), e))
        })
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SiteFile {
    base_url: String,
    #[serde(default = "default_true")]
    idle_detection: bool,
    /// Paths whose network never goes idle
    #[serde(default)]
    stalled: Vec<String>,
    pages: BTreeMap<String, PageFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PageFile {
    title: String,
    #[serde(default)]
    elements: Vec<ElementFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ElementFile {
    tag: String,
    /// Handle for `reveal` / `submit_email` references
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    id: Option<String>,
    /// Space-separated class list
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    test_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    name: Option<String>,
    /// Own text; descendants' text is appended
    #[serde(default)]
    text: Option<String>,
    /// Hides the element and its subtree
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    on_click: Option<ClickFile>,
    #[serde(default)]
    on_enter: Option<String>,
    #[serde(default)]
    children: Vec<ElementFile>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClickFile {
    Navigate { url: String },
    Popup { url: String },
    Reveal { target: String },
    SubmitEmail { input: String, reveal: String },
}

/// Roles whose accessible name comes from their content.
const NAME_FROM_CONTENT: &[&str] = &["link", "button", "heading", "tab", "menuitem", "option", "listitem"];

struct PageBuilder<'f> {
    base: &'f str,
    page: SitePage,
    keys: BTreeMap<&'f str, usize>,
    clicks: Vec<(usize, &'f ClickFile)>,
}

impl<'f> PageBuilder<'f> {
    /// Append `file` and its subtree in document order; returns the
    /// subtree's text.
    fn add(&mut self, file: &'f ElementFile, parent: Option<usize>, hidden: bool) -> HarnessResult<String> {
        let hidden = hidden || file.hidden;
        let mut element = MemoryElement::new(&file.tag);
        element.node.parent = parent;
        element.node.id = file.id.clone();
        element.node.test_id = file.test_id.clone();
        element.node.role = file.role.clone();
        element.node.visible = !hidden;
        element.node.attributes = file.attributes.clone();
        if let Some(class) = &file.class {
            element.node.classes = class.split_whitespace().map(str::to_string).collect();
        }
        element.on_enter = file.on_enter.as_ref().map(|url| join_url(self.base, url));

        let index = self.page.add(element);
        if let Some(key) = &file.key {
            if self.keys.insert(key, index).is_some() {
                return Err(HarnessError::Config(format!("duplicate element key {:?}", key)));
            }
        }
        if let Some(click) = &file.on_click {
            self.clicks.push((index, click));
        }

        let mut texts: Vec<String> = file.text.iter().cloned().collect();
        for child in &file.children {
            let text = self.add(child, Some(index), hidden)?;
            if !text.is_empty() {
                texts.push(text);
            }
        }
        let text = texts.join(" ");

        let node = &mut self.page.elements[index].node;
        node.text = text.clone();
        node.name = match &file.name {
            Some(name) => name.clone(),
            None if node
                .effective_role()
                .map(|role| NAME_FROM_CONTENT.contains(&role.as_str()))
                .unwrap_or(false) =>
            {
                text.clone()
            }
            None => String::new(),
        };
        Ok(text)
    }

    fn key(&self, key: &str) -> HarnessResult<usize> {
        self.keys
            .get(key)
            .copied()
            .ok_or_else(|| HarnessError::Config(format!("unknown element key {:?}", key)))
    }

    fn finish(mut self) -> HarnessResult<SitePage> {
        for (index, click) in std::mem::take(&mut self.clicks) {
            let action = match click {
                ClickFile::Navigate { url } => ClickAction::Navigate(join_url(self.base, url)),
                ClickFile::Popup { url } => ClickAction::Popup(url.clone()),
                ClickFile::Reveal { target } => ClickAction::Reveal(self.key(target)?),
                ClickFile::SubmitEmail { input, reveal } => ClickAction::SubmitEmail {
                    input: self.key(input)?,
                    reveal: self.key(reveal)?,
                },
            };
            self.page.elements[index].on_click = action;
        }
        Ok(self.page)
    }
}

impl SiteFile {
    fn build(&self) -> HarnessResult<MemorySite> {
        let mut site = MemorySite::new();
        site.idle_supported = self.idle_detection;
        for path in &self.stalled {
            site.stalled.insert(join_url(&self.base_url, path));
        }

        for (path, file) in &self.pages {
            let mut builder = PageBuilder {
                base: &self.base_url,
                page: SitePage::new(&file.title),
                keys: BTreeMap::new(),
                clicks: Vec::new(),
            };
            for element in &file.elements {
                builder.add(element, None, false)?;
            }
            site.pages.insert(join_url(&self.base_url, path), builder.finish()?);
        }
        Ok(site)
    }
}

/// Everything the driver did, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct DriverLog {
    pub contexts_opened: Vec<String>,
    pub contexts_closed: Vec<String>,
    /// (context id, operation) per page call.
    pub calls: Vec<(String, String)>,
    pub surfaces: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryDriver {
    site: Arc<MemorySite>,
    log: Arc<Mutex<DriverLog>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryDriver {
    pub fn new(site: MemorySite) -> Self {
        Self {
            site: Arc::new(site),
            log: Arc::new(Mutex::new(DriverLog::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn log(&self) -> DriverLog {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn new_context(&self, _options: &ContextOptions) -> HarnessResult<Box<dyn Context>> {
        let id = format!("memory-ctx-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!("Opening in-memory context {}", id);
        self.log.lock().contexts_opened.push(id.clone());
        Ok(Box::new(MemoryContext {
            id,
            site: self.site.clone(),
            log: self.log.clone(),
            next_id: self.next_id.clone(),
        }))
    }
}

struct MemoryContext {
    id: String,
    site: Arc<MemorySite>,
    log: Arc<Mutex<DriverLog>>,
    next_id: Arc<AtomicU64>,
}

#[async_trait]
impl Context for MemoryContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn new_page(&mut self) -> HarnessResult<Box<dyn Page>> {
        Ok(Box::new(MemoryTab {
            context_id: self.id.clone(),
            site: self.site.clone(),
            log: self.log.clone(),
            next_id: self.next_id.clone(),
            url: "about:blank".to_string(),
            revealed: BTreeSet::new(),
            values: BTreeMap::new(),
            waiters: Vec::new(),
            opened: BTreeMap::new(),
        }))
    }

    async fn close(self: Box<Self>) -> HarnessResult<()> {
        self.log.lock().contexts_closed.push(self.id.clone());
        if self.site.fail_close {
            return Err(HarnessError::Driver(format!("context {} crashed on close", self.id)));
        }
        Ok(())
    }
}

struct MemoryTab {
    context_id: String,
    site: Arc<MemorySite>,
    log: Arc<Mutex<DriverLog>>,
    next_id: Arc<AtomicU64>,
    url: String,
    /// Per-document state, reset on navigation.
    revealed: BTreeSet<usize>,
    values: BTreeMap<usize, String>,
    /// Registered surface expectations, oldest first.
    waiters: Vec<u64>,
    /// Surfaces opened for a waiter, not yet awaited.
    opened: BTreeMap<u64, String>,
}

impl MemoryTab {
    fn record(&self, op: impl Into<String>) {
        self.log.lock().calls.push((self.context_id.clone(), op.into()));
    }

    fn current(&self) -> Option<&SitePage> {
        self.site.pages.get(&self.url)
    }

    fn element(&self, element: ElementRef) -> HarnessResult<&MemoryElement> {
        self.current()
            .and_then(|page| page.elements.get(element.0))
            .ok_or_else(|| {
                HarnessError::Driver(format!("stale element #{} on {}", element.0, self.url))
            })
    }

    /// Revealing an element reveals its subtree.
    fn is_revealed(&self, page: &SitePage, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            if self.revealed.contains(&i) {
                return true;
            }
            current = page.elements.get(i).and_then(|e| e.node.parent);
        }
        false
    }

    fn navigate(&mut self, url: &str) {
        self.url = url.to_string();
        self.revealed.clear();
        self.values.clear();
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

#[async_trait]
impl Page for MemoryTab {
    async fn goto(&mut self, url: &str, timeout: Duration) -> HarnessResult<()> {
        self.record(format!("goto {}", url));
        if let Some(delay) = self.site.slow.get(url).copied() {
            tokio::time::sleep(delay.min(timeout)).await;
            if delay > timeout {
                return Err(HarnessError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
        self.navigate(url);
        Ok(())
    }

    async fn wait_for_load_state(&mut self, state: LoadState, timeout: Duration) -> HarnessResult<()> {
        self.record(format!("wait {}", state.as_str()));
        if state != LoadState::NetworkIdle {
            return Ok(());
        }
        if !self.site.idle_supported {
            return Err(HarnessError::IdleUnsupported);
        }
        // A real idle check is a round trip to the browser.
        tokio::task::yield_now().await;
        if self.site.stalled.contains(&self.url) {
            tokio::time::sleep(timeout).await;
            return Err(HarnessError::NavigationTimeout {
                url: self.url.clone(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn snapshot(&mut self) -> HarnessResult<PageSnapshot> {
        self.record("snapshot");
        let elements = match self.current() {
            Some(page) => page
                .elements
                .iter()
                .enumerate()
                .map(|(index, element)| {
                    let mut node = element.node.clone();
                    node.visible = node.visible || self.is_revealed(page, index);
                    node
                })
                .collect(),
            None => Vec::new(),
        };
        Ok(PageSnapshot {
            url: self.url.clone(),
            elements,
        })
    }

    async fn click(&mut self, element: ElementRef) -> HarnessResult<ClickOutcome> {
        self.record(format!("click #{}", element.0));
        let action = self.element(element)?.on_click.clone();
        let mut outcome = ClickOutcome::default();

        match action {
            ClickAction::Nothing => {}
            ClickAction::Navigate(url) => self.navigate(&url),
            ClickAction::Popup(url) => {
                self.log.lock().surfaces.push(url.clone());
                if self.waiters.is_empty() {
                    outcome.unclaimed_surfaces += 1;
                } else {
                    let waiter = self.waiters.remove(0);
                    self.opened.insert(waiter, url);
                }
            }
            ClickAction::Reveal(target) => {
                self.revealed.insert(target);
            }
            ClickAction::SubmitEmail { input, reveal } => {
                if self.values.get(&input).map(|v| looks_like_email(v)).unwrap_or(false) {
                    self.revealed.insert(reveal);
                }
            }
        }
        Ok(outcome)
    }

    async fn fill(&mut self, element: ElementRef, text: &str) -> HarnessResult<()> {
        self.record(format!("fill #{}", element.0));
        self.element(element)?;
        self.values.insert(element.0, text.to_string());
        Ok(())
    }

    async fn press(&mut self, element: ElementRef, key: &str) -> HarnessResult<()> {
        self.record(format!("press #{} {}", element.0, key));
        let template = self.element(element)?.on_enter.clone();
        if key == "Enter" {
            if let Some(template) = template {
                let value = self.values.get(&element.0).cloned().unwrap_or_default();
                let target = template.replace("{value}", &value);
                self.navigate(&target);
            }
        }
        Ok(())
    }

    async fn attribute(&mut self, element: ElementRef, name: &str) -> HarnessResult<Option<String>> {
        self.record(format!("attribute #{} {}", element.0, name));
        let node = &self.element(element)?.node;
        Ok(match name {
            "data-testid" => node.test_id.clone(),
            "id" => node.id.clone(),
            _ => node.attributes.get(name).cloned(),
        })
    }

    async fn url(&mut self) -> HarnessResult<String> {
        self.record("url");
        Ok(self.url.clone())
    }

    async fn title(&mut self) -> HarnessResult<String> {
        self.record("title");
        Ok(self.current().map(|p| p.title.clone()).unwrap_or_default())
    }

    async fn expect_new_surface(&mut self) -> HarnessResult<SurfaceWaiter> {
        self.record("expect surface");
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.waiters.push(id);
        Ok(SurfaceWaiter::new(id))
    }

    async fn wait_for_surface(&mut self, waiter: SurfaceWaiter, timeout: Duration) -> HarnessResult<SurfaceInfo> {
        self.record("wait surface");
        match self.opened.remove(&waiter.id()) {
            Some(url) => Ok(SurfaceInfo { url }),
            None => {
                self.waiters.retain(|w| *w != waiter.id());
                tokio::time::sleep(timeout).await;
                Err(HarnessError::Driver(format!(
                    "no new surface opened within {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}
